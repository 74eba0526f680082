//! Security subsystem: command filtering, input validation, resource limits.
//!
//! # Policy Layers
//!
//! Candidate commands and code bodies pass through three layers, in order:
//!
//! 1. **Safe whitelist** — common interpreter/build/VCS invocations are
//!    allowed outright.
//! 2. **Tiered blacklist** — forbidden patterns grouped by severity
//!    (critical > high > medium). All groups at or above the current tier's
//!    severity are always evaluated.
//! 3. **Conditional restrictions** — extra patterns evaluated only when the
//!    workspace runs at `high` or `critical` tier.
//!
//! Every blocked pattern carries a remediation hint that is surfaced to the
//! caller alongside the violation.

mod auditor;
mod command_filter;
mod input_validator;
mod limits;
mod path_guard;

pub use auditor::{SecurityAuditor, SecuritySummary};
pub use command_filter::{CommandFilter, Violation, ViolationKind};
pub use input_validator::{InputKind, InputValidator};
pub use limits::{apply_limits, limits_for_tier};
pub use path_guard::PathGuard;

use thiserror::Error;

/// Errors raised by security components themselves (not policy decisions).
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("Path not allowed: {path}")]
    PathNotAllowed { path: String },

    #[error("Path traversal detected: {path}")]
    PathTraversal { path: String },

    #[error("Audit log error: {0}")]
    AuditError(String),
}
