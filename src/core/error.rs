use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by server configuration validation and the manifest io.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Server name must not be empty.")]
    MissingName,

    #[error("A command is required for stdio transport.")]
    MissingCommand,

    #[error("A url is required for remote transports.")]
    MissingUrl,

    #[error("Invalid server url {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Server url {url} must end in /mcp or /sse.")]
    UnexpectedUrlPath { url: String },

    #[error("Unsupported transport: {0}")]
    UnknownTransport(String),

    #[error("A server named {0} already exists.")]
    DuplicateName(String),

    #[error("Failed to read manifest at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse manifest at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to write manifest at {}: {message}", path.display())]
    Write { path: PathBuf, message: String },
}

/// One failed attempt while negotiating among remote sub-protocols.
#[derive(Debug, Clone)]
pub struct NegotiationAttempt {
    pub protocol: &'static str,
    pub message: String,
}

/// Errors raised while establishing a session.
///
/// Transport channels keep plain string diagnostics internally; the variants
/// here type the boundary the registry and callers see.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Unsupported transport: {0}")]
    Unsupported(String),

    #[error("Failed to start {command}: {message}")]
    Spawn { command: String, message: String },

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Handshake timed out after {0} seconds.")]
    Timeout(u64),

    #[error("{}", format_attempts(.0))]
    Negotiation(Vec<NegotiationAttempt>),

    #[error(transparent)]
    ToolFetch(#[from] ToolFetchError),
}

fn format_attempts(attempts: &[NegotiationAttempt]) -> String {
    let details = attempts
        .iter()
        .map(|attempt| format!("{}: {}", attempt.protocol, attempt.message))
        .collect::<Vec<_>>()
        .join("; ");
    format!("All remote protocols failed ({details})")
}

/// Connect succeeded but the follow-up tool listing did not; the session is
/// torn down before this is returned.
#[derive(Debug, Error)]
#[error("Tool listing failed: {0}")]
pub struct ToolFetchError(pub String);

#[derive(Debug, Error)]
pub enum DisconnectError {
    #[error("No active connection for {0}.")]
    NotConnected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_error_concatenates_attempts() {
        let err = ConnectError::Negotiation(vec![
            NegotiationAttempt {
                protocol: "streamable-http",
                message: "HTTP error: 405".to_string(),
            },
            NegotiationAttempt {
                protocol: "sse",
                message: "connection refused".to_string(),
            },
        ]);
        let rendered = err.to_string();
        assert!(rendered.contains("streamable-http: HTTP error: 405"));
        assert!(rendered.contains("sse: connection refused"));
    }
}
