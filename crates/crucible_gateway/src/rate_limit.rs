//! Sliding-window rate limiter, keyed by connection id.
//!
//! Each connection keeps an ordered queue of admitted-request timestamps.
//! A check drops stale entries from the front, admits if the queue is
//! under the cap, and otherwise reports how long until the oldest entry
//! leaves the window. All operations are O(1) amortized.

use crucible_protocol::config::RateLimits;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Width of the secondary burst window.
const BURST_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct Window {
    requests: VecDeque<Instant>,
    burst: VecDeque<Instant>,
}

/// Per-connection sliding-window limiter with a short burst cap.
#[derive(Debug)]
pub struct SlidingWindowRateLimiter {
    max_requests: usize,
    window: Duration,
    burst_limit: usize,
    windows: HashMap<String, Window>,
}

impl SlidingWindowRateLimiter {
    pub fn new(config: &RateLimits) -> Self {
        Self {
            max_requests: config.max_requests,
            window: Duration::from_secs(config.window_seconds),
            burst_limit: config.burst_limit,
            windows: HashMap::new(),
        }
    }

    /// Check whether a request is admitted at `now`.
    ///
    /// Returns `(true, 0.0)` on admission, else `(false, retry_after_secs)`.
    pub fn is_allowed(&mut self, connection_id: &str, now: Instant) -> (bool, f64) {
        let window_width = self.window;
        let burst_width = BURST_WINDOW;
        let entry = self.windows.entry(connection_id.to_string()).or_default();

        while entry
            .requests
            .front()
            .is_some_and(|&t| now.duration_since(t) >= window_width)
        {
            entry.requests.pop_front();
        }
        while entry
            .burst
            .front()
            .is_some_and(|&t| now.duration_since(t) >= burst_width)
        {
            entry.burst.pop_front();
        }

        if entry.requests.len() >= self.max_requests {
            let retry = retry_after(entry.requests.front(), window_width, now);
            return (false, retry);
        }

        if entry.burst.len() >= self.burst_limit {
            let retry = retry_after(entry.burst.front(), burst_width, now);
            return (false, retry);
        }

        entry.requests.push_back(now);
        entry.burst.push_back(now);
        (true, 0.0)
    }

    /// Drop all state for a disconnected connection.
    pub fn forget(&mut self, connection_id: &str) {
        self.windows.remove(connection_id);
    }

    /// Number of tracked connections (reaper diagnostics).
    pub fn tracked_connections(&self) -> usize {
        self.windows.len()
    }
}

fn retry_after(oldest: Option<&Instant>, width: Duration, now: Instant) -> f64 {
    match oldest {
        Some(&t) => {
            let free_at = t + width;
            free_at.saturating_duration_since(now).as_secs_f64()
        }
        None => 0.0,
    }
}
