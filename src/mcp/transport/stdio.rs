use crate::core::config::data::ServerConfig;
use crate::core::error::{ConfigError, ConnectError};
use crate::mcp::client::protocol::parse_initialize_result;
use crate::mcp::events::EventLog;
use crate::mcp::transport::{client_details_for, HANDSHAKE_TIMEOUT_SECONDS, REQUEST_TIMEOUT_SECONDS};
use rust_mcp_schema::schema_utils::{
    ClientMessage, FromMessage, MessageFromClient, NotificationFromClient, RequestFromClient,
    ServerMessage,
};
use rust_mcp_schema::RequestId;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

const UV_RUNNER: &str = "uv";
const UV_DIRECTORY_FLAG: &str = "--directory";

const WRITE_TIMEOUT_SECONDS: u64 = 10;

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<ServerMessage>>>>;

/// The spawn invocation computed for a stdio server, separated from the
/// spawn itself so the uv rewrite stays a pure, testable step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdioLaunchPlan {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
}

impl StdioLaunchPlan {
    /// The uv runner ignores the OS-level working-directory hint, so a
    /// configured cwd is rewritten into its `--directory` flag and the spawn
    /// option is dropped.
    pub fn for_config(config: &ServerConfig) -> Result<Self, ConnectError> {
        let program = config
            .command
            .clone()
            .filter(|command| !command.trim().is_empty())
            .ok_or(ConnectError::Config(ConfigError::MissingCommand))?;
        let mut args = config.args.clone().unwrap_or_default();
        let mut cwd = config
            .cwd
            .clone()
            .filter(|cwd| !cwd.trim().is_empty());

        let is_uv = Path::new(&program)
            .file_stem()
            .and_then(OsStr::to_str)
            .is_some_and(|stem| stem.eq_ignore_ascii_case(UV_RUNNER));
        if is_uv {
            if let Some(directory) = cwd.take() {
                args.insert(0, directory);
                args.insert(0, UV_DIRECTORY_FLAG.to_string());
            }
        }

        Ok(Self { program, args, cwd })
    }
}

/// A local subprocess speaking line-delimited JSON-RPC over its standard
/// streams. Stderr is drained for the lifetime of the session into the
/// per-server event log.
pub struct StdioChannel {
    stdin: Mutex<ChildStdin>,
    child: Mutex<Child>,
    pending: PendingMap,
    next_request_id: AtomicI64,
    server_name: String,
}

impl StdioChannel {
    pub(crate) async fn connect(
        config: &ServerConfig,
        events: Arc<EventLog>,
    ) -> Result<Arc<Self>, ConnectError> {
        let plan = StdioLaunchPlan::for_config(config)?;
        debug!(command = %plan.program, args = ?plan.args, "Starting stdio server");

        let mut cmd = Command::new(&plan.program);
        cmd.args(&plan.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        if let Some(directory) = &plan.cwd {
            cmd.current_dir(directory);
        }
        if let Some(env) = &config.env {
            // Overlay on the inherited environment; PATH survives.
            cmd.envs(env);
        }

        let spawn_error = |message: String| ConnectError::Spawn {
            command: plan.program.clone(),
            message,
        };
        let mut child = cmd.spawn().map_err(|err| spawn_error(err.to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error("Unable to retrieve stdin.".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("Unable to retrieve stdout.".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| spawn_error("Unable to retrieve stderr.".to_string()))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let channel = Arc::new(Self {
            stdin: Mutex::new(stdin),
            child: Mutex::new(child),
            pending: pending.clone(),
            next_request_id: AtomicI64::new(0),
            server_name: config.name.clone(),
        });

        spawn_stdout_reader(pending, stdout, config.name.clone());
        spawn_stderr_logger(stderr, config.name.clone(), events);

        let handshake = tokio::time::Duration::from_secs(HANDSHAKE_TIMEOUT_SECONDS);
        match tokio::time::timeout(handshake, channel.initialize(config)).await {
            Ok(Ok(())) => Ok(channel),
            Ok(Err(message)) => {
                channel.close().await;
                Err(ConnectError::Handshake(message))
            }
            Err(_) => {
                channel.close().await;
                Err(ConnectError::Timeout(HANDSHAKE_TIMEOUT_SECONDS))
            }
        }
    }

    async fn initialize(&self, config: &ServerConfig) -> Result<(), String> {
        let response = self
            .send_request(RequestFromClient::InitializeRequest(client_details_for(
                config,
            )))
            .await?;
        parse_initialize_result(response)?;
        self.send_notification(NotificationFromClient::InitializedNotification(None))
            .await
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Integer(self.next_request_id.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) async fn send_request(
        &self,
        request: RequestFromClient,
    ) -> Result<ServerMessage, String> {
        let request_id = self.next_request_id();
        debug!(server = %self.server_name, request_id = ?request_id, "Sending stdio request");
        let message = ClientMessage::from_message(
            MessageFromClient::RequestFromClient(request),
            Some(request_id.clone()),
        )
        .map_err(|err| err.to_string())?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(request_id.clone(), tx);
        }

        if let Err(message) = self.write_message(&message).await {
            self.pending.lock().await.remove(&request_id);
            return Err(message);
        }

        let timeout = tokio::time::Duration::from_secs(REQUEST_TIMEOUT_SECONDS);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(message)) => {
                debug!(server = %self.server_name, request_id = ?request_id, "Stdio response received");
                Ok(message)
            }
            Ok(Err(_)) => Err("Stdio response channel closed.".to_string()),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err("Stdio request timed out.".to_string())
            }
        }
    }

    async fn send_notification(&self, notification: NotificationFromClient) -> Result<(), String> {
        let message = ClientMessage::from_message(
            MessageFromClient::NotificationFromClient(notification),
            None,
        )
        .map_err(|err| err.to_string())?;
        self.write_message(&message).await
    }

    async fn write_message(&self, message: &ClientMessage) -> Result<(), String> {
        let payload = serde_json::to_string(message).map_err(|err| err.to_string())?;
        let write_timeout = tokio::time::Duration::from_secs(WRITE_TIMEOUT_SECONDS);

        let mut stdin = match tokio::time::timeout(write_timeout, self.stdin.lock()).await {
            Ok(stdin) => stdin,
            Err(_) => return Err("Timed out waiting for the stdio stdin lock.".to_string()),
        };
        debug!(server = %self.server_name, bytes = payload.len(), "Writing stdio message");
        tokio::time::timeout(write_timeout, stdin.write_all(payload.as_bytes()))
            .await
            .map_err(|_| "Timed out writing stdio message.".to_string())?
            .map_err(|err| err.to_string())?;
        tokio::time::timeout(write_timeout, stdin.write_all(b"\n"))
            .await
            .map_err(|_| "Timed out writing stdio newline.".to_string())?
            .map_err(|err| err.to_string())?;
        tokio::time::timeout(write_timeout, stdin.flush())
            .await
            .map_err(|_| "Timed out flushing stdio message.".to_string())?
            .map_err(|err| err.to_string())?;
        Ok(())
    }

    pub(crate) async fn close(&self) {
        let _ = self.child.lock().await.start_kill();
        self.pending.lock().await.clear();
    }
}

fn spawn_stdout_reader(pending: PendingMap, stdout: ChildStdout, server_name: String) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            let value = match serde_json::from_str::<serde_json::Value>(&line) {
                Ok(value) => value,
                Err(_) => continue,
            };
            if let Some(items) = value.as_array() {
                for item in items {
                    if let Ok(message) = serde_json::from_value::<ServerMessage>(item.clone()) {
                        dispatch_message(&pending, message, &server_name).await;
                    }
                }
            } else if let Ok(message) = serde_json::from_value::<ServerMessage>(value) {
                dispatch_message(&pending, message, &server_name).await;
            }
        }
        // Process exited or closed stdout; fail the requests still waiting.
        pending.lock().await.clear();
    });
}

fn spawn_stderr_logger(stderr: ChildStderr, server_name: String, events: Arc<EventLog>) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            debug!(server = %server_name, line = %line, "Server stderr");
            events.append(&server_name, format!("stderr: {line}"), None, false);
        }
    });
}

pub(crate) async fn dispatch_message(
    pending: &PendingMap,
    message: ServerMessage,
    server_name: &str,
) {
    match &message {
        ServerMessage::Response(response) => {
            let id = response.id.clone();
            debug!(server = %server_name, response_id = ?id, "Received response");
            let sender = pending.lock().await.remove(&id);
            if let Some(tx) = sender {
                let _ = tx.send(message);
            }
        }
        ServerMessage::Error(error) => {
            let id = error.id.clone();
            debug!(server = %server_name, error_code = error.error.code, "Received error");
            if let Some(id) = id {
                let sender = pending.lock().await.remove(&id);
                if let Some(tx) = sender {
                    let _ = tx.send(message);
                }
            }
        }
        ServerMessage::Request(_) | ServerMessage::Notification(_) => {
            debug!(server = %server_name, "Ignoring unsolicited server message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdio_config(command: &str, args: &[&str], cwd: Option<&str>) -> ServerConfig {
        ServerConfig {
            name: "alpha".to_string(),
            transport: Some("stdio".to_string()),
            command: Some(command.to_string()),
            args: Some(args.iter().map(|arg| arg.to_string()).collect()),
            cwd: cwd.map(str::to_string),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn uv_with_cwd_is_rewritten_to_the_directory_flag() {
        let config = stdio_config("uv", &["run", "server.py"], Some("/srv/tools"));
        let plan = StdioLaunchPlan::for_config(&config).expect("plan should build");

        assert_eq!(plan.program, "uv");
        assert_eq!(
            plan.args,
            vec!["--directory", "/srv/tools", "run", "server.py"]
        );
        assert_eq!(plan.cwd, None);
    }

    #[test]
    fn uv_rewrite_matches_path_and_extension_forms() {
        let config = stdio_config("/usr/local/bin/uv", &["run", "server.py"], Some("/srv"));
        let plan = StdioLaunchPlan::for_config(&config).expect("plan should build");
        assert_eq!(plan.args[..2], ["--directory", "/srv"]);

        let config = stdio_config("uv.exe", &["run", "server.py"], Some("C:\\srv"));
        let plan = StdioLaunchPlan::for_config(&config).expect("plan should build");
        assert_eq!(plan.args[..2], ["--directory", "C:\\srv"]);
    }

    #[test]
    fn uv_without_cwd_is_left_alone() {
        let config = stdio_config("uv", &["run", "server.py"], None);
        let plan = StdioLaunchPlan::for_config(&config).expect("plan should build");
        assert_eq!(plan.args, vec!["run", "server.py"]);
        assert_eq!(plan.cwd, None);
    }

    #[test]
    fn other_commands_keep_the_working_directory_option() {
        let config = stdio_config("python3", &["server.py"], Some("/srv/tools"));
        let plan = StdioLaunchPlan::for_config(&config).expect("plan should build");

        assert_eq!(plan.args, vec!["server.py"]);
        assert_eq!(plan.cwd.as_deref(), Some("/srv/tools"));
    }

    #[test]
    fn missing_command_is_a_config_error() {
        let mut config = stdio_config("uv", &[], None);
        config.command = None;
        assert!(matches!(
            StdioLaunchPlan::for_config(&config),
            Err(ConnectError::Config(ConfigError::MissingCommand))
        ));
    }
}
