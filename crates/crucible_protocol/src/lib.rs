//! Shared types for the Crucible sandbox server.
//!
//! This crate holds the value types exchanged between subsystems: security
//! tiers, resource limits, execution results and records, error kinds, and
//! the canonical server configuration with its defaults. It deliberately
//! contains no behavior beyond derivations over these types, so every other
//! crate can depend on it without pulling in subsystem logic.

pub mod config;
pub mod paths;
pub mod types;

pub use config::{
    BreakerConfig, ConnectionLimits, RateLimits, RetentionConfig, ServerConfig,
};
pub use types::{
    ErrorKind, ExecutionRecord, ExecutionResult, Language, ResourceLimits, SecurityTier,
};

/// MCP protocol version advertised by the server.
pub const MCP_PROTOCOL_VERSION: &str = "2.0";

/// Server name reported in `initialize` and `server_info`.
pub const SERVER_NAME: &str = "crucible";
