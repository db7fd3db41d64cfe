//! Transport negotiation for tool-server sessions.
//!
//! A server is reached either by spawning a local subprocess (stdio) or over
//! HTTP. Remote servers may speak one of two streaming sub-protocols; the
//! negotiator tries them in order and only fails once every candidate has
//! failed, so servers speaking the older event-stream protocol stay reachable
//! without extra user configuration.

use crate::core::config::data::{ServerConfig, REMOTE_TRANSPORTS, STDIO_TRANSPORTS};
use crate::core::error::{ConnectError, NegotiationAttempt};
use crate::mcp::events::EventLog;
use async_trait::async_trait;
use rust_mcp_schema::schema_utils::RequestFromClient;
use rust_mcp_schema::schema_utils::ServerMessage;
use rust_mcp_schema::{ClientCapabilities, Implementation, InitializeRequestParams};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub mod sse;
pub mod stdio;
pub mod streamable_http;

use sse::SseChannel;
use stdio::StdioChannel;
use streamable_http::StreamableHttpChannel;

/// Timeout applied to the session handshake only, never to process spawn.
pub const HANDSHAKE_TIMEOUT_SECONDS: u64 = 10;

/// Upper bound on how long a single in-flight request may wait for its
/// response on a live channel.
pub(crate) const REQUEST_TIMEOUT_SECONDS: u64 = 60;

/// Supported transport families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    RemoteStream,
}

impl TransportKind {
    /// Resolves the transport family from config, defaulting to remote
    /// streamable HTTP.
    pub fn from_config(config: &ServerConfig) -> Result<Self, String> {
        let transport = config.transport_name();
        if STDIO_TRANSPORTS.contains(&transport.as_str()) {
            Ok(TransportKind::Stdio)
        } else if REMOTE_TRANSPORTS.contains(&transport.as_str()) {
            Ok(TransportKind::RemoteStream)
        } else {
            Err(format!("Unsupported transport: {}", transport))
        }
    }
}

/// A live, handshaked communication channel to one server.
#[derive(Clone)]
pub enum LiveChannel {
    Stdio(Arc<StdioChannel>),
    StreamableHttp(Arc<StreamableHttpChannel>),
    LegacySse(Arc<SseChannel>),
}

impl LiveChannel {
    pub fn protocol(&self) -> &'static str {
        match self {
            LiveChannel::Stdio(_) => "stdio",
            LiveChannel::StreamableHttp(_) => "streamable-http",
            LiveChannel::LegacySse(_) => "sse",
        }
    }

    pub async fn send_request(&self, request: RequestFromClient) -> Result<ServerMessage, String> {
        match self {
            LiveChannel::Stdio(channel) => channel.send_request(request).await,
            LiveChannel::StreamableHttp(channel) => channel.send_request(request).await,
            LiveChannel::LegacySse(channel) => channel.send_request(request).await,
        }
    }

    pub async fn close(&self) {
        match self {
            LiveChannel::Stdio(channel) => channel.close().await,
            LiveChannel::StreamableHttp(channel) => channel.close().await,
            LiveChannel::LegacySse(channel) => channel.close().await,
        }
    }
}

/// One remote sub-protocol candidate. Adding a future sub-protocol means
/// adding an entry to [`REMOTE_PROTOCOLS`], nothing else.
#[async_trait]
trait RemoteProtocol: Send + Sync {
    fn label(&self) -> &'static str;
    async fn open(&self, config: &ServerConfig) -> Result<LiveChannel, String>;
}

struct StreamableHttpProtocol;
struct LegacySseProtocol;

#[async_trait]
impl RemoteProtocol for StreamableHttpProtocol {
    fn label(&self) -> &'static str {
        "streamable-http"
    }

    async fn open(&self, config: &ServerConfig) -> Result<LiveChannel, String> {
        let channel = StreamableHttpChannel::open(config).await?;
        Ok(LiveChannel::StreamableHttp(channel))
    }
}

#[async_trait]
impl RemoteProtocol for LegacySseProtocol {
    fn label(&self) -> &'static str {
        "sse"
    }

    async fn open(&self, config: &ServerConfig) -> Result<LiveChannel, String> {
        let channel = SseChannel::open(config).await?;
        Ok(LiveChannel::LegacySse(channel))
    }
}

static REMOTE_PROTOCOLS: &[&(dyn RemoteProtocol)] = &[&StreamableHttpProtocol, &LegacySseProtocol];

/// Establishes a live channel for the given identity, reporting every
/// terminal success or failure to the event log.
pub async fn connect(
    config: &ServerConfig,
    events: &Arc<EventLog>,
) -> Result<LiveChannel, ConnectError> {
    let kind = match TransportKind::from_config(config) {
        Ok(kind) => kind,
        Err(message) => {
            events.append(&config.name, message, None, true);
            return Err(ConnectError::Unsupported(config.transport_name()));
        }
    };

    match kind {
        TransportKind::Stdio => {
            match StdioChannel::connect(config, Arc::clone(events)).await {
                Ok(channel) => {
                    events.append(&config.name, "Connected via stdio", None, false);
                    Ok(LiveChannel::Stdio(channel))
                }
                Err(err) => {
                    events.append(
                        &config.name,
                        format!("Connect failed: {err}"),
                        Some(Value::String(err.to_string())),
                        true,
                    );
                    Err(err)
                }
            }
        }
        TransportKind::RemoteStream => {
            let mut attempts = Vec::new();
            for protocol in REMOTE_PROTOCOLS {
                debug!(server = %config.name, protocol = protocol.label(), "Attempting remote handshake");
                match protocol.open(config).await {
                    Ok(channel) => {
                        events.append(
                            &config.name,
                            format!("Connected via {}", protocol.label()),
                            None,
                            false,
                        );
                        return Ok(channel);
                    }
                    Err(message) => {
                        events.append(
                            &config.name,
                            format!("{} connect failed: {message}", protocol.label()),
                            Some(Value::String(message.clone())),
                            true,
                        );
                        attempts.push(NegotiationAttempt {
                            protocol: protocol.label(),
                            message,
                        });
                    }
                }
            }
            Err(ConnectError::Negotiation(attempts))
        }
    }
}

pub(crate) fn client_details_for(config: &ServerConfig) -> InitializeRequestParams {
    InitializeRequestParams {
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "toolbridge".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("Toolbridge MCP Client".to_string()),
            description: Some("Toolbridge tool-server client runtime".to_string()),
            icons: Vec::new(),
            website_url: Some("https://github.com/permacommons/toolbridge".to_string()),
        },
        meta: None,
        protocol_version: crate::mcp::client::protocol::requested_protocol_version(config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_transport(transport: Option<&str>) -> ServerConfig {
        ServerConfig {
            name: "alpha".to_string(),
            transport: transport.map(str::to_string),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn transport_kind_resolution_matches_config_strings() {
        assert_eq!(
            TransportKind::from_config(&config_with_transport(Some("stdio"))),
            Ok(TransportKind::Stdio)
        );
        assert_eq!(
            TransportKind::from_config(&config_with_transport(Some("streamable-http"))),
            Ok(TransportKind::RemoteStream)
        );
        assert_eq!(
            TransportKind::from_config(&config_with_transport(Some("SSE"))),
            Ok(TransportKind::RemoteStream)
        );
        assert_eq!(
            TransportKind::from_config(&config_with_transport(None)),
            Ok(TransportKind::RemoteStream)
        );
        assert!(TransportKind::from_config(&config_with_transport(Some("smoke-signal"))).is_err());
    }

    #[tokio::test]
    async fn unknown_transport_is_rejected_without_an_attempt() {
        let events = Arc::new(EventLog::new());
        let config = config_with_transport(Some("smoke-signal"));

        let err = match connect(&config, &events).await {
            Ok(_) => panic!("connect should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, ConnectError::Unsupported(_)));

        let entries = events.read("alpha");
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_error);
    }
}
