//! Command-line harness around the session core: manage the server
//! manifest, connect, list tools, and invoke them.

use crate::core::config::data::{Manifest, ServerConfig};
use crate::core::config::store::{plan_upsert, ConfigStore, MemoryConfigStore, UpsertPlan};
use crate::mcp::client::SessionRegistry;
use crate::mcp::events::EventLog;
use crate::mcp::outcome::{InvocationOutcome, OutcomeContent, OutcomeStatus};
use crate::mcp::tools::Tool;
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "toolbridge")]
#[command(about = "Manage and invoke MCP tool servers from the terminal")]
#[command(long_about = "Toolbridge keeps a manifest of named tool servers, connects to them over \
stdio or one of two HTTP streaming protocols (with automatic fallback to the \
older event-stream protocol), lists the tools they expose, and invokes those \
tools with JSON arguments.")]
pub struct Cli {
    /// Path to the server manifest (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the configured servers
    Servers,
    /// Add or update a server in the manifest
    Add {
        name: String,
        /// "stdio", "streamable-http" or "sse"
        #[arg(long)]
        transport: Option<String>,
        #[arg(long)]
        command: Option<String>,
        /// Repeat for each argument, in order
        #[arg(long = "arg")]
        args: Vec<String>,
        #[arg(long)]
        cwd: Option<String>,
        /// KEY=VALUE environment overlay entries
        #[arg(long = "env")]
        env: Vec<String>,
        #[arg(long)]
        url: Option<String>,
        /// NAME=VALUE extra request headers
        #[arg(long = "header")]
        headers: Vec<String>,
        /// Rename an existing entry
        #[arg(long)]
        rename_from: Option<String>,
    },
    /// Remove a server from the manifest
    Remove { name: String },
    /// Connect to a server and list its tools
    Tools { name: String },
    /// Connect to a server and invoke one of its tools
    Call {
        name: String,
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(long)]
        args: Option<String>,
    },
    /// Show the event log collected for a server during this run
    Log { name: String },
}

pub async fn run() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let manifest_path = match cli.config {
        Some(path) => path,
        None => Manifest::default_path().ok_or("Could not determine a config directory.")?,
    };
    let manifest = Manifest::load_from_path(&manifest_path)?;
    let mut store = MemoryConfigStore::new(manifest.servers);

    match cli.command {
        Command::Servers => {
            for server in store.list() {
                println!("{:24} {}", server.name, describe_target(&server));
            }
            Ok(())
        }
        Command::Add {
            name,
            transport,
            command,
            args,
            cwd,
            env,
            url,
            headers,
            rename_from,
        } => {
            let config = ServerConfig {
                name,
                transport,
                command,
                args: (!args.is_empty()).then_some(args),
                cwd,
                env: parse_pairs(&env, "--env")?,
                url,
                headers: parse_pairs(&headers, "--header")?,
                ..ServerConfig::default()
            };
            config.validate()?;

            let plan = plan_upsert(&store, rename_from.as_deref(), &config)?;
            if let UpsertPlan::Rename { from } = &plan {
                store.remove(from);
            }
            let name = config.name.clone();
            store.upsert(config);
            save_store(&store, &manifest_path)?;
            match plan {
                UpsertPlan::Create => println!("Added {name}."),
                UpsertPlan::Update => println!("Updated {name}."),
                UpsertPlan::Rename { from } => println!("Renamed {from} to {name}."),
            }
            Ok(())
        }
        Command::Remove { name } => {
            if !store.remove(&name) {
                return Err(format!("No server named {name}.").into());
            }
            save_store(&store, &manifest_path)?;
            println!("Removed {name}.");
            Ok(())
        }
        Command::Tools { name } => {
            let config = require_server(&store, &name)?;
            let registry = new_registry();
            let tools = registry.connect_and_register(&config).await?;
            if tools.is_empty() {
                println!("{name} exposes no tools.");
            }
            for tool in &tools {
                print_tool(tool);
            }
            registry.disconnect(&name).await?;
            Ok(())
        }
        Command::Call { name, tool, args } => {
            let arguments = parse_arguments(args.as_deref())?;
            let config = require_server(&store, &name)?;
            let registry = new_registry();
            registry.connect_and_register(&config).await?;
            let outcome = registry.invoke(&name, &tool, arguments).await;
            print_outcome(&outcome);
            registry.disconnect(&name).await?;
            if outcome.is_failure() {
                return Err("Tool call failed.".into());
            }
            Ok(())
        }
        Command::Log { name } => {
            let config = require_server(&store, &name)?;
            let registry = new_registry();
            registry.connect_and_register(&config).await?;
            for entry in registry.events().read(&name) {
                let marker = if entry.is_error { "!" } else { " " };
                println!("{} {} {}", entry.at.format("%H:%M:%S"), marker, entry.message);
            }
            registry.disconnect(&name).await?;
            Ok(())
        }
    }
}

fn new_registry() -> SessionRegistry {
    SessionRegistry::new(Arc::new(EventLog::new()))
}

fn require_server(store: &MemoryConfigStore, name: &str) -> Result<ServerConfig, Box<dyn Error>> {
    store
        .get(name)
        .ok_or_else(|| format!("No server named {name}.").into())
}

fn save_store(store: &MemoryConfigStore, path: &std::path::Path) -> Result<(), Box<dyn Error>> {
    let manifest = Manifest {
        servers: store.clone().into_servers(),
    };
    manifest.save_to_path(path)?;
    Ok(())
}

fn describe_target(server: &ServerConfig) -> String {
    match server.transport_name().as_str() {
        "stdio" => format!(
            "stdio: {} {}",
            server.command.as_deref().unwrap_or("?"),
            server.args.as_deref().unwrap_or_default().join(" ")
        ),
        transport => format!("{transport}: {}", server.url.as_deref().unwrap_or("?")),
    }
}

fn parse_pairs(
    raw: &[String],
    flag: &str,
) -> Result<Option<HashMap<String, String>>, Box<dyn Error>> {
    if raw.is_empty() {
        return Ok(None);
    }
    let mut pairs = HashMap::new();
    for entry in raw {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| format!("{flag} entries must look like KEY=VALUE, got {entry:?}."))?;
        pairs.insert(key.to_string(), value.to_string());
    }
    Ok(Some(pairs))
}

fn parse_arguments(raw: Option<&str>) -> Result<Option<Map<String, Value>>, Box<dyn Error>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(Some(map)),
        Ok(_) => Err("Tool arguments must be a JSON object.".into()),
        Err(err) => Err(format!("Invalid tool arguments: {err}").into()),
    }
}

fn print_tool(tool: &Tool) {
    println!("{}", tool.name);
    if !tool.description.is_empty() {
        for line in tool.description.lines() {
            println!("    {line}");
        }
    }
    for parameter in &tool.parameters {
        let required = if parameter.required { " (required)" } else { "" };
        let description = parameter
            .description
            .as_deref()
            .map(|text| format!(" - {text}"))
            .unwrap_or_default();
        println!(
            "    {}: {:?}{}{}",
            parameter.name, parameter.kind, required, description
        );
    }
}

fn print_outcome(outcome: &InvocationOutcome) {
    match outcome.status {
        OutcomeStatus::Success => println!("ok"),
        OutcomeStatus::ToolFailure => println!("tool failure"),
        OutcomeStatus::TransportError => println!("transport error"),
    }
    match &outcome.content {
        OutcomeContent::Text(text) => println!("{text}"),
        OutcomeContent::StructuredJson(value) | OutcomeContent::Raw(value) => {
            println!(
                "{}",
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            );
        }
        OutcomeContent::Image { data, mime_type } => {
            println!("[{} image, {} bytes]", mime_type, data.len());
        }
    }
}
