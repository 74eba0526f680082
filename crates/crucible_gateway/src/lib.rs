//! Connection/session layer for the Crucible sandbox server.
//!
//! Admission control (global and per-IP caps), sliding-window rate
//! limiting, a three-state circuit breaker, background reaping of idle
//! and failed sessions, and periodic health snapshots.
//!
//! The connection manager and the circuit breaker are peers: the manager
//! consults the breaker before admitting, and error recording drives the
//! breaker's failure counter. Each sits behind its own lock; no lock is
//! ever taken while holding the other.

pub mod breaker;
pub mod connections;
pub mod health;
pub mod rate_limit;

pub use breaker::{BreakerState, CircuitBreaker};
pub use connections::{
    spawn_reaper, AdmitError, ConnectionInfo, ConnectionManager, ConnectionState,
    ConnectionStats, DegradationLevel, DegradationReport,
};
pub use health::{
    spawn_monitor, ComponentHealth, HealthInputs, HealthMonitor, HealthSnapshot, HealthStatus,
    HealthThresholds,
};
pub use rate_limit::SlidingWindowRateLimiter;
