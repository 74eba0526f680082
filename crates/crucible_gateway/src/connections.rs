//! Connection manager: admission, error recording, reconnection, reaping.
//!
//! All mutation happens under a single manager lock with short critical
//! sections. The circuit breaker sits behind its own lock and is never
//! taken while the manager lock is held in a way that could recurse.
//!
//! Removed connections leave a `Closed` tombstone so a stale id cannot be
//! resurrected through the reconnect path; tombstones do not count toward
//! any capacity and are purged by the reaper.

use crate::breaker::{BreakerState, CircuitBreaker};
use crate::rate_limit::SlidingWindowRateLimiter;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use crucible_protocol::config::{BreakerConfig, ConnectionLimits, RateLimits};
use crucible_protocol::ErrorKind;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors kept per connection.
const MAX_ERROR_HISTORY: usize = 10;

/// Failed connections with more than this many recorded errors are reaped.
const REAP_ERROR_THRESHOLD: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    Failed,
    Closed,
}

/// One recorded connection error.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionError {
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
    pub recoverable: bool,
}

/// Per-session record.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub connection_id: String,
    pub client_ip: String,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    pub state: ConnectionState,
    pub error_history: Vec<ConnectionError>,
    pub reconnect_attempts: u32,
}

/// Admission rejection, typed by cause.
#[derive(Debug, Error)]
pub enum AdmitError {
    #[error("Service temporarily unavailable")]
    CircuitOpen,

    #[error("Maximum connections ({0}) exceeded")]
    TooManyConnections(usize),

    #[error("Maximum connections per IP ({0}) exceeded")]
    TooManyFromIp(usize),

    #[error("Connection not in failed state: {0:?}")]
    NotReconnectable(ConnectionState),
}

impl AdmitError {
    /// Error kind surfaced to the protocol layer.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AdmitError::CircuitOpen => ErrorKind::Network,
            AdmitError::TooManyConnections(_) => ErrorKind::Resource,
            AdmitError::TooManyFromIp(_) => ErrorKind::Security,
            AdmitError::NotReconnectable(_) => ErrorKind::Protocol,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionMetrics {
    pub total_connections_created: u64,
    pub total_connections_closed: u64,
    pub total_errors: u64,
    pub errors_by_kind: HashMap<String, u64>,
    pub reconnection_attempts: u64,
    pub successful_reconnections: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    Normal,
    ModerateLoad,
    HighLoad,
    HighErrorRate,
    CircuitOpen,
}

/// Degradation assessment returned to the health monitor.
#[derive(Debug, Clone, Serialize)]
pub struct DegradationReport {
    pub level: DegradationLevel,
    pub connection_utilization: f64,
    pub error_rate: f64,
    pub breaker_state: BreakerState,
    pub recommendations: Vec<String>,
}

/// Aggregate connection statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub connections_by_ip: HashMap<String, usize>,
    pub connections_by_state: HashMap<String, usize>,
    pub max_connections: usize,
    pub max_per_ip: usize,
    pub average_connection_age_seconds: f64,
    pub metrics: ConnectionMetrics,
    pub degradation: DegradationReport,
}

#[derive(Default)]
struct Inner {
    active: HashMap<String, ConnectionInfo>,
    by_ip: HashMap<String, HashSet<String>>,
    /// Ids counted toward capacity (admitted, not tombstoned/failed-reject).
    admitted: HashSet<String>,
    metrics: ConnectionMetrics,
}

/// Session lifecycle manager.
pub struct ConnectionManager {
    limits: ConnectionLimits,
    inner: Mutex<Inner>,
    breaker: Mutex<CircuitBreaker>,
    limiter: Option<Mutex<SlidingWindowRateLimiter>>,
}

impl ConnectionManager {
    pub fn new(
        limits: ConnectionLimits,
        breaker: &BreakerConfig,
        rate_limits: Option<&RateLimits>,
    ) -> Self {
        info!(
            "ConnectionManager initialized: max_connections={}, max_per_ip={}, timeout={}s",
            limits.max_connections, limits.max_per_ip, limits.connection_timeout_secs
        );
        Self {
            limits,
            inner: Mutex::new(Inner::default()),
            breaker: Mutex::new(CircuitBreaker::new(breaker)),
            limiter: rate_limits.map(|r| Mutex::new(SlidingWindowRateLimiter::new(r))),
        }
    }

    /// Admit a new connection.
    pub fn admit(
        &self,
        connection_id: &str,
        client_ip: &str,
        user_agent: Option<String>,
        session_id: Option<String>,
    ) -> Result<(), AdmitError> {
        let breaker_allows = self.lock_breaker().allow(Instant::now());
        if !breaker_allows {
            warn!(
                "Connection rejected by circuit breaker: {}",
                connection_id
            );
            let err = AdmitError::CircuitOpen;
            self.record_rejection(connection_id, client_ip, &err);
            return Err(err);
        }

        let mut inner = self.lock_inner();

        if inner.admitted.len() >= self.limits.max_connections {
            let err = AdmitError::TooManyConnections(self.limits.max_connections);
            Self::record_rejection_locked(&mut inner, connection_id, client_ip, &err);
            drop(inner);
            self.lock_breaker().abort_trial();
            return Err(err);
        }

        let per_ip = inner.by_ip.get(client_ip).map_or(0, |s| s.len());
        if per_ip >= self.limits.max_per_ip {
            warn!(
                "IP connection limit exceeded for {}: {}/{}",
                client_ip, per_ip, self.limits.max_per_ip
            );
            let err = AdmitError::TooManyFromIp(self.limits.max_per_ip);
            Self::record_rejection_locked(&mut inner, connection_id, client_ip, &err);
            drop(inner);
            self.lock_breaker().abort_trial();
            return Err(err);
        }

        let now = Utc::now();
        let entry = inner
            .active
            .entry(connection_id.to_string())
            .or_insert_with(|| ConnectionInfo {
                connection_id: connection_id.to_string(),
                client_ip: client_ip.to_string(),
                connected_at: now,
                last_activity: now,
                user_agent: None,
                session_id: None,
                state: ConnectionState::Connecting,
                error_history: Vec::new(),
                reconnect_attempts: 0,
            });
        entry.client_ip = client_ip.to_string();
        entry.last_activity = now;
        entry.user_agent = user_agent;
        entry.session_id = session_id;
        entry.state = ConnectionState::Connected;

        inner
            .by_ip
            .entry(client_ip.to_string())
            .or_default()
            .insert(connection_id.to_string());
        inner.admitted.insert(connection_id.to_string());
        inner.metrics.total_connections_created += 1;
        drop(inner);

        // A successful admission is the half-open trial's success signal.
        self.lock_breaker().on_success();

        info!("Connection established: {} from {}", connection_id, client_ip);
        Ok(())
    }

    /// Close a connection. Returns `false` when there was nothing to close
    /// (unknown id or already closed) - the call is idempotent.
    pub fn remove(&self, connection_id: &str, reason: &str) -> bool {
        let mut inner = self.lock_inner();
        let Some(entry) = inner.active.get_mut(connection_id) else {
            debug!("Attempted to remove non-existent connection: {}", connection_id);
            return false;
        };
        if entry.state == ConnectionState::Closed {
            return false;
        }

        entry.state = ConnectionState::Closed;
        let client_ip = entry.client_ip.clone();
        let duration = (Utc::now() - entry.connected_at).num_milliseconds() as f64 / 1000.0;
        info!(
            "Connection closed: {} from {}, duration={:.2}s, reason={}",
            connection_id, client_ip, duration, reason
        );

        Self::drop_from_indices(&mut inner, connection_id, &client_ip);
        inner.metrics.total_connections_closed += 1;
        drop(inner);

        if let Some(limiter) = &self.limiter {
            self.lock_limiter(limiter).forget(connection_id);
        }
        true
    }

    /// Bump the activity timestamp. Returns `false` for unknown ids.
    pub fn update_activity(&self, connection_id: &str) -> bool {
        let mut inner = self.lock_inner();
        match inner.active.get_mut(connection_id) {
            Some(entry) => {
                entry.last_activity = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Classify and record an error against a connection. The entry moves
    /// to `Failed`; Internal classifications also feed the breaker.
    pub fn record_error(&self, connection_id: &str, message: &str, context: &str) -> ErrorKind {
        let kind = classify_error(message, context);

        {
            let mut inner = self.lock_inner();
            if let Some(entry) = inner.active.get_mut(connection_id) {
                push_error(entry, kind, message);
                entry.state = ConnectionState::Failed;
            }
            inner.metrics.total_errors += 1;
            *inner
                .metrics
                .errors_by_kind
                .entry(kind.to_string())
                .or_default() += 1;
        }

        if kind == ErrorKind::Internal {
            self.lock_breaker().on_failure(Instant::now());
        }

        warn!(
            "Error recorded for connection {}: {} - {}",
            connection_id, kind, message
        );
        kind
    }

    /// Re-admit a previously failed connection.
    ///
    /// Unknown ids fall through to a fresh admit; entries in any state
    /// other than `Failed` are not reconnectable.
    pub fn attempt_reconnect(
        &self,
        connection_id: &str,
        client_ip: &str,
        user_agent: Option<String>,
        session_id: Option<String>,
    ) -> Result<(), AdmitError> {
        {
            let mut inner = self.lock_inner();
            let state = inner.active.get(connection_id).map(|e| e.state);
            match state {
                Some(ConnectionState::Failed) => {
                    let attempts = {
                        let entry = inner
                            .active
                            .get_mut(connection_id)
                            .expect("entry checked above");
                        entry.reconnect_attempts += 1;
                        entry.state = ConnectionState::Reconnecting;
                        entry.reconnect_attempts
                    };
                    inner.metrics.reconnection_attempts += 1;
                    info!(
                        "Attempting reconnection for {} (attempt {})",
                        connection_id, attempts
                    );
                }
                Some(state) => {
                    return Err(AdmitError::NotReconnectable(state));
                }
                None => {}
            }
        }

        match self.admit(connection_id, client_ip, user_agent, session_id) {
            Ok(()) => {
                let mut inner = self.lock_inner();
                if let Some(entry) = inner.active.get_mut(connection_id) {
                    entry.reconnect_attempts = 0;
                }
                inner.metrics.successful_reconnections += 1;
                info!("Reconnection successful for {}", connection_id);
                Ok(())
            }
            Err(e) => {
                let mut inner = self.lock_inner();
                if let Some(entry) = inner.active.get_mut(connection_id) {
                    if entry.state == ConnectionState::Reconnecting {
                        entry.state = ConnectionState::Failed;
                    }
                }
                warn!("Reconnection failed for {}: {}", connection_id, e);
                Err(e)
            }
        }
    }

    /// Consult the sliding-window limiter for this connection.
    ///
    /// Returns `(allowed, retry_after_seconds)`.
    pub fn check_rate_limit(&self, connection_id: &str) -> (bool, f64) {
        let Some(limiter) = &self.limiter else {
            return (true, 0.0);
        };
        {
            let inner = self.lock_inner();
            if !inner.admitted.contains(connection_id) {
                return (false, 0.0);
            }
        }
        self.lock_limiter(limiter)
            .is_allowed(connection_id, Instant::now())
    }

    /// Utilization/error-rate assessment for the health monitor.
    pub fn degradation_check(&self) -> DegradationReport {
        let (utilization, error_rate) = {
            let inner = self.lock_inner();
            let utilization =
                inner.admitted.len() as f64 / self.limits.max_connections.max(1) as f64;
            let error_rate = inner.metrics.total_errors as f64
                / inner.metrics.total_connections_created.max(1) as f64;
            (utilization, error_rate)
        };
        let breaker_state = self.lock_breaker().state();

        let mut level = DegradationLevel::Normal;
        let mut recommendations = Vec::new();

        if utilization > 0.9 {
            level = DegradationLevel::HighLoad;
            recommendations.push("Reduce connection acceptance rate".to_string());
        } else if utilization > 0.8 {
            level = DegradationLevel::ModerateLoad;
            recommendations.push("Monitor connection health closely".to_string());
        }

        if error_rate > 0.1 {
            level = DegradationLevel::HighErrorRate;
            recommendations.push("Enable circuit breaker protection".to_string());
            recommendations.push("Increase error recovery timeouts".to_string());
        }

        if breaker_state == BreakerState::Open {
            level = DegradationLevel::CircuitOpen;
            recommendations.push("Service temporarily unavailable".to_string());
            recommendations.push("Check upstream service health".to_string());
        }

        DegradationReport {
            level,
            connection_utilization: utilization,
            error_rate,
            breaker_state,
            recommendations,
        }
    }

    /// Aggregate statistics snapshot.
    pub fn stats(&self) -> ConnectionStats {
        let degradation = self.degradation_check();
        let inner = self.lock_inner();
        let now = Utc::now();

        let connections_by_ip = inner
            .by_ip
            .iter()
            .map(|(ip, ids)| (ip.clone(), ids.len()))
            .collect();

        let mut connections_by_state: HashMap<String, usize> = HashMap::new();
        let mut total_age = 0.0;
        for entry in inner.active.values() {
            *connections_by_state
                .entry(format!("{:?}", entry.state).to_lowercase())
                .or_default() += 1;
            total_age += (now - entry.connected_at).num_milliseconds() as f64 / 1000.0;
        }
        let average_age = if inner.active.is_empty() {
            0.0
        } else {
            total_age / inner.active.len() as f64
        };

        ConnectionStats {
            total_connections: inner.admitted.len(),
            connections_by_ip,
            connections_by_state,
            max_connections: self.limits.max_connections,
            max_per_ip: self.limits.max_per_ip,
            average_connection_age_seconds: average_age,
            metrics: inner.metrics.clone(),
            degradation,
        }
    }

    /// Current breaker state (diagnostics).
    pub fn breaker_state(&self) -> BreakerState {
        self.lock_breaker().state()
    }

    /// Feed an admission-path failure directly into the breaker.
    pub fn record_admission_failure(&self) {
        self.lock_breaker().on_failure(Instant::now());
    }

    /// One reaper pass at `now`: drop idle-expired connections and failed
    /// connections with too many errors, then run the health sweep.
    pub fn reap(&self, now: DateTime<Utc>) {
        let timeout = ChronoDuration::seconds(self.limits.connection_timeout_secs as i64);
        let mut expired = Vec::new();
        let mut failed = Vec::new();

        {
            let inner = self.lock_inner();
            for (id, entry) in inner.active.iter() {
                if now - entry.last_activity > timeout {
                    expired.push(id.clone());
                } else if entry.state == ConnectionState::Failed
                    && entry.error_history.len() > REAP_ERROR_THRESHOLD
                {
                    failed.push(id.clone());
                }
            }
        }

        for id in &expired {
            self.purge(id, "expired");
        }
        for id in &failed {
            self.purge(id, "too_many_errors");
        }
        if !expired.is_empty() || !failed.is_empty() {
            info!(
                "Reaped {} expired and {} failed connections",
                expired.len(),
                failed.len()
            );
        }

        self.health_sweep(now);
    }

    /// Open the breaker when fewer than half the admitted connections are
    /// healthy.
    fn health_sweep(&self, _now: DateTime<Utc>) {
        let (admitted, healthy) = {
            let inner = self.lock_inner();
            let admitted = inner.admitted.len();
            let healthy = inner
                .admitted
                .iter()
                .filter(|id| {
                    inner
                        .active
                        .get(*id)
                        .map_or(false, |e| e.state != ConnectionState::Failed)
                })
                .count();
            (admitted, healthy)
        };

        if admitted == 0 {
            return;
        }
        let fraction = healthy as f64 / admitted as f64;
        if fraction < 0.5 {
            let mut breaker = self.lock_breaker();
            if breaker.state() == BreakerState::Closed {
                warn!(
                    "Connection health critically low ({:.0}% healthy), opening circuit breaker",
                    fraction * 100.0
                );
                breaker.force_open(Instant::now());
            }
        }
    }

    /// Snapshot of one connection (diagnostics, tests).
    pub fn connection(&self, connection_id: &str) -> Option<ConnectionInfo> {
        self.lock_inner().active.get(connection_id).cloned()
    }

    /// Ids currently counted toward capacity.
    pub fn admitted_count(&self) -> usize {
        self.lock_inner().admitted.len()
    }

    /// Fully delete an entry (tombstones included) and its limiter state.
    fn purge(&self, connection_id: &str, reason: &str) {
        let mut inner = self.lock_inner();
        if let Some(entry) = inner.active.remove(connection_id) {
            let was_admitted = inner.admitted.contains(connection_id);
            Self::drop_from_indices(&mut inner, connection_id, &entry.client_ip);
            if was_admitted {
                inner.metrics.total_connections_closed += 1;
            }
            debug!("Purged connection {} ({})", connection_id, reason);
        }
        drop(inner);
        if let Some(limiter) = &self.limiter {
            self.lock_limiter(limiter).forget(connection_id);
        }
    }

    fn drop_from_indices(inner: &mut Inner, connection_id: &str, client_ip: &str) {
        inner.admitted.remove(connection_id);
        if let Some(ids) = inner.by_ip.get_mut(client_ip) {
            ids.remove(connection_id);
            if ids.is_empty() {
                inner.by_ip.remove(client_ip);
            }
        }
    }

    fn record_rejection(&self, connection_id: &str, client_ip: &str, err: &AdmitError) {
        let mut inner = self.lock_inner();
        Self::record_rejection_locked(&mut inner, connection_id, client_ip, err);
    }

    /// Keep a `Failed`-state record of the rejection so the error history
    /// survives for diagnostics and the reconnect path.
    fn record_rejection_locked(
        inner: &mut Inner,
        connection_id: &str,
        client_ip: &str,
        err: &AdmitError,
    ) {
        let kind = err.kind();
        let now = Utc::now();
        let entry = inner
            .active
            .entry(connection_id.to_string())
            .or_insert_with(|| ConnectionInfo {
                connection_id: connection_id.to_string(),
                client_ip: client_ip.to_string(),
                connected_at: now,
                last_activity: now,
                user_agent: None,
                session_id: None,
                state: ConnectionState::Failed,
                error_history: Vec::new(),
                reconnect_attempts: 0,
            });
        push_error(entry, kind, &err.to_string());
        entry.state = ConnectionState::Failed;

        inner.metrics.total_errors += 1;
        *inner
            .metrics
            .errors_by_kind
            .entry(kind.to_string())
            .or_default() += 1;
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_breaker(&self) -> MutexGuard<'_, CircuitBreaker> {
        self.breaker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_limiter<'a>(
        &self,
        limiter: &'a Mutex<SlidingWindowRateLimiter>,
    ) -> MutexGuard<'a, SlidingWindowRateLimiter> {
        limiter.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn push_error(entry: &mut ConnectionInfo, kind: ErrorKind, message: &str) {
    entry.error_history.push(ConnectionError {
        kind,
        message: message.to_string(),
        at: Utc::now(),
        recoverable: kind != ErrorKind::Internal,
    });
    if entry.error_history.len() > MAX_ERROR_HISTORY {
        let excess = entry.error_history.len() - MAX_ERROR_HISTORY;
        entry.error_history.drain(..excess);
    }
}

/// String-heuristic classification of connection-layer errors.
fn classify_error(message: &str, context: &str) -> ErrorKind {
    let haystack = format!("{} {}", message, context).to_lowercase();

    if ["connection", "network", "socket"]
        .iter()
        .any(|k| haystack.contains(k))
    {
        ErrorKind::Network
    } else if haystack.contains("timeout") || haystack.contains("timed out") {
        ErrorKind::Timeout
    } else if ["permission", "access", "forbidden", "unauthorized"]
        .iter()
        .any(|k| haystack.contains(k))
    {
        ErrorKind::Security
    } else if ["resource", "limit", "capacity", "memory"]
        .iter()
        .any(|k| haystack.contains(k))
    {
        ErrorKind::Resource
    } else if ["protocol", "frame", "message", "envelope"]
        .iter()
        .any(|k| haystack.contains(k))
    {
        ErrorKind::Protocol
    } else {
        ErrorKind::Internal
    }
}

/// Spawn the background reaper thread. It runs a pass every `interval`
/// and exits when `stop` is set.
pub fn spawn_reaper(
    manager: Arc<ConnectionManager>,
    interval: Duration,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        info!("connection reaper started (interval {:?})", interval);
        while !stop.load(Ordering::SeqCst) {
            let deadline = Instant::now() + interval;
            while Instant::now() < deadline {
                if stop.load(Ordering::SeqCst) {
                    return;
                }
                std::thread::sleep(Duration::from_millis(100));
            }
            manager.reap(Utc::now());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(max: usize, per_ip: usize) -> ConnectionManager {
        ConnectionManager::new(
            ConnectionLimits {
                max_connections: max,
                max_per_ip: per_ip,
                connection_timeout_secs: 3600,
            },
            &BreakerConfig::default(),
            None,
        )
    }

    #[test]
    fn test_admit_and_caps() {
        let m = manager(2, 2);
        assert!(m.admit("c1", "1.1.1.1", None, None).is_ok());
        assert!(m.admit("c2", "1.1.1.1", None, None).is_ok());

        let err = m.admit("c3", "2.2.2.2", None, None).unwrap_err();
        assert!(matches!(err, AdmitError::TooManyConnections(2)));
        assert_eq!(err.kind(), ErrorKind::Resource);
        assert_eq!(m.admitted_count(), 2);

        // The rejection left a Failed record with the error attached.
        let rejected = m.connection("c3").unwrap();
        assert_eq!(rejected.state, ConnectionState::Failed);
        assert_eq!(rejected.error_history.len(), 1);
    }

    #[test]
    fn test_per_ip_cap() {
        let m = manager(10, 2);
        assert!(m.admit("c1", "1.1.1.1", None, None).is_ok());
        assert!(m.admit("c2", "1.1.1.1", None, None).is_ok());
        let err = m.admit("c3", "1.1.1.1", None, None).unwrap_err();
        assert!(matches!(err, AdmitError::TooManyFromIp(2)));
        assert_eq!(err.kind(), ErrorKind::Security);

        // A different IP still fits.
        assert!(m.admit("c4", "2.2.2.2", None, None).is_ok());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let m = manager(10, 10);
        m.admit("c1", "1.1.1.1", None, None).unwrap();
        assert!(m.remove("c1", "normal_closure"));
        assert!(!m.remove("c1", "normal_closure"));
        assert!(!m.remove("ghost", "normal_closure"));
        assert_eq!(m.admitted_count(), 0);
    }

    #[test]
    fn test_closed_connection_frees_ip_slot() {
        let m = manager(10, 1);
        m.admit("c1", "1.1.1.1", None, None).unwrap();
        assert!(m.admit("c2", "1.1.1.1", None, None).is_err());
        m.remove("c1", "done");
        assert!(m.admit("c2", "1.1.1.1", None, None).is_ok());
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(classify_error("socket reset by peer", ""), ErrorKind::Network);
        assert_eq!(classify_error("request timed out", ""), ErrorKind::Timeout);
        assert_eq!(classify_error("access denied", ""), ErrorKind::Security);
        assert_eq!(classify_error("memory limit reached", ""), ErrorKind::Resource);
        assert_eq!(classify_error("bad frame", ""), ErrorKind::Protocol);
        assert_eq!(classify_error("segfault", ""), ErrorKind::Internal);
    }

    #[test]
    fn test_record_error_bounds_history_and_fails_connection() {
        let m = manager(10, 10);
        m.admit("c1", "1.1.1.1", None, None).unwrap();

        for _ in 0..15 {
            m.record_error("c1", "socket error", "io");
        }
        let info = m.connection("c1").unwrap();
        assert_eq!(info.state, ConnectionState::Failed);
        assert_eq!(info.error_history.len(), MAX_ERROR_HISTORY);
    }

    #[test]
    fn test_reconnect_only_from_failed() {
        let m = manager(10, 10);
        m.admit("c1", "1.1.1.1", None, None).unwrap();

        // Connected: not reconnectable.
        let err = m
            .attempt_reconnect("c1", "1.1.1.1", None, None)
            .unwrap_err();
        assert!(matches!(err, AdmitError::NotReconnectable(ConnectionState::Connected)));

        // Failed: reconnectable, and the counter resets on success.
        m.record_error("c1", "socket error", "io");
        assert!(m.attempt_reconnect("c1", "1.1.1.1", None, None).is_ok());
        let info = m.connection("c1").unwrap();
        assert_eq!(info.state, ConnectionState::Connected);
        assert_eq!(info.reconnect_attempts, 0);

        // Closed: must not be re-admittable.
        m.remove("c1", "bye");
        let err = m
            .attempt_reconnect("c1", "1.1.1.1", None, None)
            .unwrap_err();
        assert!(matches!(err, AdmitError::NotReconnectable(ConnectionState::Closed)));
    }

    #[test]
    fn test_breaker_trips_admission() {
        let m = ConnectionManager::new(
            ConnectionLimits::default(),
            &BreakerConfig {
                failure_threshold: 5,
                recovery_timeout_secs: 60,
            },
            None,
        );
        m.admit("c1", "1.1.1.1", None, None).unwrap();

        // Five Internal-classified errors trip the breaker.
        for _ in 0..5 {
            m.record_error("c1", "segfault in handler", "dispatch");
        }
        assert_eq!(m.breaker_state(), BreakerState::Open);

        let err = m.admit("c2", "2.2.2.2", None, None).unwrap_err();
        assert!(matches!(err, AdmitError::CircuitOpen));
        assert_eq!(err.to_string(), "Service temporarily unavailable");
    }

    #[test]
    fn test_reap_expired_and_failed() {
        let m = ConnectionManager::new(
            ConnectionLimits {
                max_connections: 10,
                max_per_ip: 10,
                connection_timeout_secs: 3600,
            },
            &BreakerConfig::default(),
            Some(&RateLimits::default()),
        );
        m.admit("idle", "1.1.1.1", None, None).unwrap();
        m.admit("broken", "1.1.1.1", None, None).unwrap();
        for _ in 0..6 {
            m.record_error("broken", "socket error", "io");
        }

        // Nothing expires yet, but the failed connection goes.
        m.reap(Utc::now());
        assert!(m.connection("broken").is_none());
        assert!(m.connection("idle").is_some());

        // Two hours later the idle connection expires too.
        m.reap(Utc::now() + ChronoDuration::hours(2));
        assert!(m.connection("idle").is_none());
        assert_eq!(m.admitted_count(), 0);
    }

    #[test]
    fn test_health_sweep_opens_breaker() {
        let m = manager(10, 10);
        m.admit("c1", "1.1.1.1", None, None).unwrap();
        m.admit("c2", "1.1.1.2", None, None).unwrap();
        m.admit("c3", "1.1.1.3", None, None).unwrap();

        // Two of three failed (but below the reap error threshold).
        m.record_error("c1", "socket error", "io");
        m.record_error("c2", "socket error", "io");

        m.reap(Utc::now());
        assert_eq!(m.breaker_state(), BreakerState::Open);
    }

    #[test]
    fn test_degradation_levels() {
        let m = manager(10, 10);
        assert_eq!(m.degradation_check().level, DegradationLevel::Normal);

        for i in 0..10 {
            m.admit(&format!("c{}", i), &format!("1.1.1.{}", i), None, None)
                .unwrap();
        }
        let report = m.degradation_check();
        assert_eq!(report.level, DegradationLevel::HighLoad);
        assert!(!report.recommendations.is_empty());
    }

    #[test]
    fn test_rate_limit_requires_admission() {
        let m = ConnectionManager::new(
            ConnectionLimits::default(),
            &BreakerConfig::default(),
            Some(&RateLimits {
                max_requests: 2,
                window_seconds: 10,
                burst_limit: 100,
            }),
        );
        assert_eq!(m.check_rate_limit("ghost"), (false, 0.0));

        m.admit("c1", "1.1.1.1", None, None).unwrap();
        assert!(m.check_rate_limit("c1").0);
        assert!(m.check_rate_limit("c1").0);
        let (allowed, retry) = m.check_rate_limit("c1");
        assert!(!allowed);
        assert!(retry > 0.0);
    }
}
