//! MCP (Model Context Protocol) server for the Crucible sandbox.
//!
//! Wire format is JSON-RPC 2.0 over stdio (newline-delimited JSON). The
//! dispatcher validates the envelope, authenticates when configured,
//! consults the gateway's rate limiter, and routes `tools/call` requests
//! to the sandbox's tool handlers.
//!
//! # Error Surfaces
//!
//! Failures of user code (timeouts, exceptions, blocked commands) are
//! values inside the tool result payload; the RPC layer still answers
//! with `result`. Envelope, auth and rate-limit failures answer with
//! JSON-RPC `error` objects.

pub mod audit;
pub mod auth;
pub mod protocol;
pub mod server;
pub mod state;
pub mod tools;
pub mod validate;

pub use server::McpServer;
pub use state::ServerState;
