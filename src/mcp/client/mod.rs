//! Session lifecycle and tool invocation against configured servers.
//!
//! The registry is the only shared mutable state in the core. It holds at
//! most one live session per server name and never persists an intermediate
//! "connecting" state; callers render their own progress indication while a
//! connect is outstanding.

use crate::core::config::data::ServerConfig;
use crate::core::error::{ConnectError, DisconnectError, ToolFetchError};
use crate::mcp::events::EventLog;
use crate::mcp::outcome::{classify_call_result, InvocationOutcome};
use crate::mcp::tools::{normalize_tools, Tool};
use crate::mcp::transport::{self, LiveChannel};
use rust_mcp_schema::schema_utils::RequestFromClient;
use rust_mcp_schema::{CallToolRequestParams, PaginatedRequestParams};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

pub(crate) mod protocol;


/// Results are never delivered faster than this, so a caller's busy
/// indicator is perceptible instead of flickering.
pub const INVOKE_MIN_LATENCY_MS: u64 = 200;

const MAX_TOOL_LIST: usize = 100;

/// A live, registered communication channel to one configured server.
pub struct Session {
    pub config: ServerConfig,
    channel: LiveChannel,
    pub connected_at: Instant,
}

impl Session {
    pub fn protocol(&self) -> &'static str {
        self.channel.protocol()
    }
}

/// Name-keyed map of live sessions. Mutations against the same name are
/// serialized through a per-name lock; different names interleave freely.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    name_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    events: Arc<EventLog>,
}

impl SessionRegistry {
    pub fn new(events: Arc<EventLog>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            name_locks: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    async fn name_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.name_locks.lock().await;
        locks.entry(key.to_string()).or_default().clone()
    }

    /// Connects, fetches and normalizes the server's tool list, and registers
    /// the session. A tool-fetch failure tears the fresh channel down again:
    /// a registered session always has had a usable tool list.
    pub async fn connect_and_register(
        &self,
        config: &ServerConfig,
    ) -> Result<Vec<Tool>, ConnectError> {
        if let Err(err) = config.validate() {
            self.events.append(
                &config.name,
                format!("Invalid configuration: {err}"),
                None,
                true,
            );
            return Err(ConnectError::Config(err));
        }

        let key = config.name.to_ascii_lowercase();
        let lock = self.name_lock(&key).await;
        let _guard = lock.lock().await;

        // Replacing a live session tears the old one down first.
        let previous = self.sessions.lock().await.remove(&key);
        if let Some(previous) = previous {
            previous.channel.close().await;
        }

        let channel = transport::connect(config, &self.events).await?;
        let tools = match self.fetch_tools(&channel).await {
            Ok(tools) => tools,
            Err(message) => {
                channel.close().await;
                self.events.append(
                    &config.name,
                    format!("Tool listing failed: {message}"),
                    Some(Value::String(message.clone())),
                    true,
                );
                return Err(ConnectError::ToolFetch(ToolFetchError(message)));
            }
        };

        debug!(server = %config.name, tools = tools.len(), protocol = channel.protocol(), "Session registered");
        let session = Arc::new(Session {
            config: config.clone(),
            channel,
            connected_at: Instant::now(),
        });
        self.sessions.lock().await.insert(key, session);
        Ok(tools)
    }

    async fn fetch_tools(&self, channel: &LiveChannel) -> Result<Vec<Tool>, String> {
        let mut raw_tools: Vec<Value> = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.take().map(|cursor| PaginatedRequestParams {
                cursor: Some(cursor),
                meta: None,
            });
            let message = channel
                .send_request(RequestFromClient::ListToolsRequest(params))
                .await?;
            let page = protocol::parse_tool_list_page(message)?;
            raw_tools.extend(page.tools);

            if raw_tools.len() >= MAX_TOOL_LIST {
                raw_tools.truncate(MAX_TOOL_LIST);
                break;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(normalize_tools(&raw_tools))
    }

    /// Closes and removes the named session. The entry is removed even if
    /// closing the channel reports nothing back.
    pub async fn disconnect(&self, name: &str) -> Result<(), DisconnectError> {
        let key = name.to_ascii_lowercase();
        let lock = self.name_lock(&key).await;
        let _guard = lock.lock().await;

        let session = self.sessions.lock().await.remove(&key);
        match session {
            Some(session) => {
                session.channel.close().await;
                self.events.append(name, "Disconnected", None, false);
                Ok(())
            }
            None => {
                self.events
                    .append(name, "Disconnect failed: no active connection", None, true);
                Err(DisconnectError::NotConnected(name.to_string()))
            }
        }
    }

    pub async fn is_connected(&self, name: &str) -> bool {
        self.sessions
            .lock()
            .await
            .contains_key(&name.to_ascii_lowercase())
    }

    pub async fn session(&self, name: &str) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .await
            .get(&name.to_ascii_lowercase())
            .cloned()
    }

    pub async fn connected_servers(&self) -> Vec<String> {
        self.sessions
            .lock()
            .await
            .values()
            .map(|session| session.config.name.clone())
            .collect()
    }

    /// Invokes a tool on a live session and classifies the response. Never
    /// reconnects implicitly; a missing session is a transport error.
    pub async fn invoke(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> InvocationOutcome {
        let started = Instant::now();
        let outcome = self.invoke_inner(server_name, tool_name, arguments).await;

        let floor = Duration::from_millis(INVOKE_MIN_LATENCY_MS);
        let elapsed = started.elapsed();
        if elapsed < floor {
            tokio::time::sleep(floor - elapsed).await;
        }
        outcome
    }

    async fn invoke_inner(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> InvocationOutcome {
        let Some(session) = self.session(server_name).await else {
            self.events.append(
                server_name,
                format!("{tool_name} failed: no active connection"),
                None,
                true,
            );
            return InvocationOutcome::transport_error(format!(
                "No active connection for {server_name}."
            ));
        };

        debug!(server = %server_name, tool = %tool_name, "Invoking tool");
        let mut params = CallToolRequestParams::new(tool_name);
        if let Some(arguments) = arguments {
            params = params.with_arguments(arguments);
        }
        let result = match session
            .channel
            .send_request(RequestFromClient::CallToolRequest(params))
            .await
        {
            Ok(message) => protocol::parse_response_value(message),
            Err(message) => Err(message),
        };

        let raw = match &result {
            Ok(value) => value.clone(),
            Err(message) => Value::String(message.clone()),
        };
        let outcome = classify_call_result(result);
        let summary = if outcome.is_failure() {
            format!("{tool_name} failed")
        } else {
            format!("{tool_name} succeeded")
        };
        self.events
            .append(server_name, summary, Some(raw), outcome.is_failure());
        outcome
    }
}
