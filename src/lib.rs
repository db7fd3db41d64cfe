//! Toolbridge manages named MCP tool servers for a host runtime: it
//! connects to them over stdio or HTTP streaming transports, normalizes the
//! tools they expose, and classifies invocation outcomes.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the server configuration model, the config-store
//!   collaborator surface, the manifest io, and the error taxonomy.
//! - [`mcp`] is the session core: the transport negotiator (stdio,
//!   streamable HTTP, legacy SSE with ordered fallback), the session
//!   registry, the tool-schema normalizer, the invocation classifier, and
//!   the bounded per-server event log.
//! - [`cli`] implements the terminal harness that exercises the core end to
//!   end.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`cli::run`].

pub mod cli;
pub mod core;
pub mod mcp;
