//! Three-state circuit breaker gating connection admission.
//!
//! State machine:
//!
//! ```text
//! Closed --(failures >= threshold)--> Open
//! Open --(recovery timeout elapsed)--> HalfOpen (single trial)
//! HalfOpen --success--> Closed     HalfOpen --failure--> Open
//! ```
//!
//! The only path from Open back to Closed runs through HalfOpen.

use crucible_protocol::config::BreakerConfig;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: BreakerState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    failure_threshold: u32,
    recovery_timeout: Duration,
    /// In HalfOpen, only one trial call may pass.
    trial_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            last_failure_at: None,
            failure_threshold: config.failure_threshold,
            recovery_timeout: Duration::from_secs(config.recovery_timeout_secs),
            trial_in_flight: false,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Gate a call at `now`. In Open, a lapsed recovery timeout moves the
    /// breaker to HalfOpen and admits one trial.
    pub fn allow(&mut self, now: Instant) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let recovered = self
                    .last_failure_at
                    .map_or(true, |at| now.duration_since(at) >= self.recovery_timeout);
                if recovered {
                    info!("circuit breaker half-open, admitting trial call");
                    self.state = BreakerState::HalfOpen;
                    self.trial_in_flight = true;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if self.trial_in_flight {
                    false
                } else {
                    self.trial_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful call.
    pub fn on_success(&mut self) {
        if self.state == BreakerState::HalfOpen {
            info!("circuit breaker reset to closed");
            self.state = BreakerState::Closed;
            self.failure_count = 0;
        }
        self.trial_in_flight = false;
    }

    /// Record a failed call at `now`.
    pub fn on_failure(&mut self, now: Instant) {
        self.failure_count += 1;
        self.last_failure_at = Some(now);
        self.trial_in_flight = false;

        match self.state {
            BreakerState::Closed => {
                if self.failure_count >= self.failure_threshold {
                    warn!(
                        "circuit breaker opened after {} failures",
                        self.failure_count
                    );
                    self.state = BreakerState::Open;
                }
            }
            BreakerState::HalfOpen => {
                warn!("circuit breaker reopened during half-open trial");
                self.state = BreakerState::Open;
            }
            BreakerState::Open => {}
        }
    }

    /// Release a half-open trial slot without deciding the outcome.
    ///
    /// Used when the trial call was turned away for reasons unrelated to
    /// service health (capacity caps), so the next caller can still probe.
    pub fn abort_trial(&mut self) {
        self.trial_in_flight = false;
    }

    /// Proactive trip from the health sweep.
    pub fn force_open(&mut self, now: Instant) {
        if self.state != BreakerState::Open {
            warn!("circuit breaker forced open");
            self.state = BreakerState::Open;
            self.last_failure_at = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, recovery_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(&BreakerConfig {
            failure_threshold: threshold,
            recovery_timeout_secs: recovery_secs,
        })
    }

    #[test]
    fn test_trips_after_threshold() {
        let mut b = breaker(5, 60);
        let now = Instant::now();

        for _ in 0..4 {
            b.on_failure(now);
            assert_eq!(b.state(), BreakerState::Closed);
        }
        b.on_failure(now);
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow(now));
    }

    #[test]
    fn test_recovery_path_goes_through_half_open() {
        let mut b = breaker(1, 60);
        let now = Instant::now();
        b.on_failure(now);
        assert_eq!(b.state(), BreakerState::Open);

        // Before the timeout, still rejecting.
        assert!(!b.allow(now + Duration::from_secs(30)));

        // After the timeout: one trial allowed, not two.
        let later = now + Duration::from_secs(60);
        assert!(b.allow(later));
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert!(!b.allow(later));

        b.on_success();
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.failure_count(), 0);
        assert!(b.allow(later));
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let mut b = breaker(1, 60);
        let now = Instant::now();
        b.on_failure(now);

        let later = now + Duration::from_secs(61);
        assert!(b.allow(later));
        b.on_failure(later);
        assert_eq!(b.state(), BreakerState::Open);

        // The recovery timer restarted at the half-open failure.
        assert!(!b.allow(later + Duration::from_secs(30)));
        assert!(b.allow(later + Duration::from_secs(60)));
    }

    #[test]
    fn test_never_open_to_closed_directly() {
        let mut b = breaker(1, 60);
        let now = Instant::now();
        b.on_failure(now);
        assert_eq!(b.state(), BreakerState::Open);

        // A success recorded while Open must not close the breaker.
        b.on_success();
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[test]
    fn test_force_open() {
        let mut b = breaker(100, 60);
        let now = Instant::now();
        assert!(b.allow(now));
        b.force_open(now);
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow(now + Duration::from_secs(1)));
    }
}
