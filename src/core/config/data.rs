use crate::core::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Static description of one configured tool server.
///
/// A single struct serves both transport kinds; `transport` selects which of
/// the optional blocks must be populated. The shape is manifest-friendly so
/// the CLI can round-trip it through TOML untouched.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ServerConfig {
    pub name: String,
    /// "stdio" for local subprocesses; "streamable-http", "http" or "sse"
    /// for remote servers. Missing defaults to streamable-http.
    pub transport: Option<String>,
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub cwd: Option<String>,
    pub env: Option<HashMap<String, String>>,
    pub url: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub protocol_version: Option<String>,
    pub enabled: Option<bool>,
}

pub(crate) const STDIO_TRANSPORTS: &[&str] = &["stdio"];
pub(crate) const REMOTE_TRANSPORTS: &[&str] = &["streamable-http", "streamable_http", "http", "sse"];
pub(crate) const DEFAULT_TRANSPORT: &str = "streamable-http";

impl ServerConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn transport_name(&self) -> String {
        self.transport
            .as_deref()
            .unwrap_or(DEFAULT_TRANSPORT)
            .to_ascii_lowercase()
    }

    /// Checks that the declared transport has its mandatory fields populated
    /// before any io is attempted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingName);
        }

        let transport = self.transport_name();
        if STDIO_TRANSPORTS.contains(&transport.as_str()) {
            match self.command.as_deref() {
                Some(command) if !command.trim().is_empty() => Ok(()),
                _ => Err(ConfigError::MissingCommand),
            }
        } else if REMOTE_TRANSPORTS.contains(&transport.as_str()) {
            let url = self
                .url
                .as_deref()
                .filter(|url| !url.trim().is_empty())
                .ok_or(ConfigError::MissingUrl)?;
            let parsed = reqwest::Url::parse(url).map_err(|err| ConfigError::InvalidUrl {
                url: url.to_string(),
                message: err.to_string(),
            })?;
            if parsed.path().ends_with("/mcp") || parsed.path().ends_with("/sse") {
                Ok(())
            } else {
                Err(ConfigError::UnexpectedUrlPath {
                    url: url.to_string(),
                })
            }
        } else {
            Err(ConfigError::UnknownTransport(transport))
        }
    }
}

/// The on-disk server manifest consumed by the CLI binary.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Manifest {
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}
