use crate::core::config::data::{Manifest, ServerConfig};
use crate::core::config::store::{plan_upsert, ConfigStore, MemoryConfigStore, UpsertPlan};
use crate::core::error::ConfigError;

fn stdio_config(name: &str) -> ServerConfig {
    ServerConfig {
        name: name.to_string(),
        transport: Some("stdio".to_string()),
        command: Some("uv".to_string()),
        args: Some(vec!["run".to_string(), "server.py".to_string()]),
        ..ServerConfig::default()
    }
}

fn remote_config(name: &str, url: &str) -> ServerConfig {
    ServerConfig {
        name: name.to_string(),
        transport: Some("streamable-http".to_string()),
        url: Some(url.to_string()),
        ..ServerConfig::default()
    }
}

#[test]
fn stdio_config_requires_command() {
    let mut config = stdio_config("alpha");
    config.command = None;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::MissingCommand)
    ));

    config.command = Some("  ".to_string());
    assert!(matches!(
        config.validate(),
        Err(ConfigError::MissingCommand)
    ));

    assert!(stdio_config("alpha").validate().is_ok());
}

#[test]
fn remote_config_requires_url_with_known_suffix() {
    let mut config = remote_config("alpha", "https://mcp.example.com/mcp");
    assert!(config.validate().is_ok());

    config.url = Some("https://mcp.example.com/sse".to_string());
    assert!(config.validate().is_ok());

    config.url = Some("https://mcp.example.com/tools".to_string());
    assert!(matches!(
        config.validate(),
        Err(ConfigError::UnexpectedUrlPath { .. })
    ));

    config.url = Some("not a url".to_string());
    assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl { .. })));

    config.url = None;
    assert!(matches!(config.validate(), Err(ConfigError::MissingUrl)));
}

#[test]
fn unknown_transport_is_rejected() {
    let mut config = stdio_config("alpha");
    config.transport = Some("carrier-pigeon".to_string());
    assert!(matches!(
        config.validate(),
        Err(ConfigError::UnknownTransport(_))
    ));
}

#[test]
fn missing_transport_defaults_to_streamable_http() {
    let mut config = remote_config("alpha", "https://mcp.example.com/mcp");
    config.transport = None;
    assert!(config.validate().is_ok());
}

#[test]
fn empty_name_is_rejected() {
    let mut config = stdio_config("");
    config.name = " ".to_string();
    assert!(matches!(config.validate(), Err(ConfigError::MissingName)));
}

#[test]
fn store_lookup_is_case_insensitive() {
    let mut store = MemoryConfigStore::default();
    store.upsert(stdio_config("Alpha"));

    assert!(store.get("alpha").is_some());
    assert!(store.get("ALPHA").is_some());
    assert!(store.get("beta").is_none());
    assert!(store.remove("aLpHa"));
    assert!(store.list().is_empty());
}

#[test]
fn upsert_replaces_existing_entry_in_place() {
    let mut store = MemoryConfigStore::default();
    store.upsert(stdio_config("alpha"));
    store.upsert(stdio_config("beta"));

    let mut updated = stdio_config("alpha");
    updated.command = Some("python3".to_string());
    store.upsert(updated);

    let servers = store.list();
    assert_eq!(servers.len(), 2);
    assert_eq!(servers[0].name, "alpha");
    assert_eq!(servers[0].command.as_deref(), Some("python3"));
    assert_eq!(servers[1].name, "beta");
}

#[test]
fn plan_upsert_classifies_create_update_rename() {
    let mut store = MemoryConfigStore::default();
    store.upsert(stdio_config("alpha"));

    let plan = plan_upsert(&store, None, &stdio_config("beta")).expect("plan should succeed");
    assert_eq!(plan, UpsertPlan::Create);

    let plan = plan_upsert(&store, None, &stdio_config("alpha")).expect("plan should succeed");
    assert_eq!(plan, UpsertPlan::Update);

    let plan =
        plan_upsert(&store, Some("alpha"), &stdio_config("gamma")).expect("plan should succeed");
    assert_eq!(
        plan,
        UpsertPlan::Rename {
            from: "alpha".to_string()
        }
    );
}

#[test]
fn plan_upsert_rejects_colliding_rename() {
    let mut store = MemoryConfigStore::default();
    store.upsert(stdio_config("alpha"));
    store.upsert(stdio_config("beta"));

    let result = plan_upsert(&store, Some("alpha"), &stdio_config("beta"));
    assert!(matches!(result, Err(ConfigError::DuplicateName(_))));
}

#[test]
fn plan_upsert_same_name_rename_is_an_update() {
    let mut store = MemoryConfigStore::default();
    store.upsert(stdio_config("alpha"));

    let plan =
        plan_upsert(&store, Some("Alpha"), &stdio_config("alpha")).expect("plan should succeed");
    assert_eq!(plan, UpsertPlan::Update);
}

#[test]
fn manifest_round_trips_through_toml() {
    let dir = tempfile::tempdir().expect("tempdir should create");
    let path = dir.path().join("servers.toml");

    let manifest = Manifest {
        servers: vec![
            stdio_config("alpha"),
            remote_config("beta", "https://mcp.example.com/mcp"),
        ],
    };
    manifest.save_to_path(&path).expect("save should succeed");

    let loaded = Manifest::load_from_path(&path).expect("load should succeed");
    assert_eq!(loaded.servers.len(), 2);
    assert_eq!(loaded.servers[0].name, "alpha");
    assert_eq!(loaded.servers[0].command.as_deref(), Some("uv"));
    assert_eq!(
        loaded.servers[1].url.as_deref(),
        Some("https://mcp.example.com/mcp")
    );
}

#[test]
fn missing_manifest_loads_empty() {
    let dir = tempfile::tempdir().expect("tempdir should create");
    let loaded = Manifest::load_from_path(&dir.path().join("absent.toml"))
        .expect("missing manifest should load as default");
    assert!(loaded.servers.is_empty());
}
