//! Gateway integration: breaker trip/recovery and rate limiting driven
//! through the public ConnectionManager surface.

use crucible_gateway::{BreakerState, ConnectionManager};
use crucible_protocol::config::{BreakerConfig, ConnectionLimits, RateLimits};
use std::time::Duration;

fn manager_with_breaker(recovery_secs: u64) -> ConnectionManager {
    ConnectionManager::new(
        ConnectionLimits::default(),
        &BreakerConfig {
            failure_threshold: 5,
            recovery_timeout_secs: recovery_secs,
        },
        None,
    )
}

#[test]
fn test_breaker_trip_and_recovery_cycle() {
    let manager = manager_with_breaker(1);
    manager.admit("seed", "10.0.0.1", None, None).unwrap();

    // Five internal failures trip the breaker.
    for _ in 0..5 {
        manager.record_error("seed", "unexpected fault in dispatcher", "admission");
    }
    assert_eq!(manager.breaker_state(), BreakerState::Open);

    // While open, admissions short-circuit with the human-readable reason.
    let err = manager.admit("next", "10.0.0.2", None, None).unwrap_err();
    assert_eq!(err.to_string(), "Service temporarily unavailable");

    // After the recovery timeout one trial admission succeeds and the
    // breaker closes again; subsequent admits pass.
    std::thread::sleep(Duration::from_millis(1100));
    manager.admit("trial", "10.0.0.3", None, None).unwrap();
    assert_eq!(manager.breaker_state(), BreakerState::Closed);
    manager.admit("after", "10.0.0.4", None, None).unwrap();
}

#[test]
fn test_window_rate_limit_over_connection() {
    let manager = ConnectionManager::new(
        ConnectionLimits::default(),
        &BreakerConfig::default(),
        Some(&RateLimits {
            max_requests: 5,
            window_seconds: 10,
            burst_limit: 100,
        }),
    );
    manager.admit("c1", "10.0.0.1", None, None).unwrap();

    for n in 0..5 {
        let (allowed, _) = manager.check_rate_limit("c1");
        assert!(allowed, "request {} should pass", n);
    }
    let (allowed, retry_after) = manager.check_rate_limit("c1");
    assert!(!allowed);
    assert!(
        retry_after > 8.0 && retry_after <= 10.0,
        "retry_after = {}",
        retry_after
    );

    // A second connection has its own window.
    manager.admit("c2", "10.0.0.2", None, None).unwrap();
    assert!(manager.check_rate_limit("c2").0);
}

#[test]
fn test_admission_invariants_hold_under_churn() {
    let manager = ConnectionManager::new(
        ConnectionLimits {
            max_connections: 8,
            max_per_ip: 2,
            connection_timeout_secs: 3600,
        },
        &BreakerConfig::default(),
        None,
    );

    // Fill up from four IPs, two each.
    for ip in 0..4 {
        for n in 0..2 {
            manager
                .admit(&format!("c{}-{}", ip, n), &format!("10.0.0.{}", ip), None, None)
                .unwrap();
        }
    }
    assert_eq!(manager.admitted_count(), 8);

    // Both the global and per-IP caps reject further admissions.
    assert!(manager.admit("extra", "10.0.0.9", None, None).is_err());
    manager.remove("c0-0", "churn");
    assert!(manager.admit("c0-2", "10.0.0.0", None, None).is_ok());
    assert!(manager.admit("c0-3", "10.0.0.0", None, None).is_err());
    assert_eq!(manager.admitted_count(), 8);

    let stats = manager.stats();
    assert!(stats
        .connections_by_ip
        .values()
        .all(|&count| count <= 2));
}
