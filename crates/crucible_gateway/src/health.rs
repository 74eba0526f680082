//! Health monitor: periodic per-component snapshots with a history ring.
//!
//! Host metrics (cpu/memory/disk) come from `sysinfo`; service metrics
//! (error recovery, operation success, latency) are supplied by the
//! caller through [`HealthInputs`] so this module stays decoupled from
//! the engine and connection manager.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use sysinfo::{Disks, System};
use tracing::{debug, info, warn};

/// Snapshot ring capacity before trimming.
const HISTORY_CAP: usize = 1000;
/// Snapshots kept after a trim.
const HISTORY_KEEP: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
    pub metrics: HashMap<String, serde_json::Value>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub taken_at: DateTime<Utc>,
    pub overall: HealthStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub summary: String,
}

/// Service-level metrics fed in by the server wiring.
#[derive(Debug, Clone, Default)]
pub struct HealthInputs {
    /// Fraction of errors that were recovered (0..1).
    pub error_recovery_rate: Option<f64>,
    /// Fraction of operations that succeeded (0..1).
    pub operation_success_rate: Option<f64>,
    /// Mean operation duration in milliseconds.
    pub average_operation_ms: Option<f64>,
}

/// Alert thresholds, all overridable.
#[derive(Debug, Clone)]
pub struct HealthThresholds {
    pub cpu_warn: f64,
    pub cpu_critical: f64,
    pub memory_warn: f64,
    pub memory_critical: f64,
    pub disk_warn: f64,
    pub disk_critical: f64,
    pub disk_unhealthy: f64,
    pub recovery_rate_warn: f64,
    pub recovery_rate_critical: f64,
    pub success_rate_warn: f64,
    pub success_rate_critical: f64,
    pub duration_warn_ms: f64,
    pub duration_critical_ms: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            cpu_warn: 80.0,
            cpu_critical: 95.0,
            memory_warn: 80.0,
            memory_critical: 95.0,
            disk_warn: 85.0,
            disk_critical: 95.0,
            disk_unhealthy: 98.0,
            recovery_rate_warn: 0.7,
            recovery_rate_critical: 0.5,
            success_rate_warn: 0.9,
            success_rate_critical: 0.7,
            duration_warn_ms: 3000.0,
            duration_critical_ms: 10000.0,
        }
    }
}

/// Periodic health checker with bounded snapshot history.
pub struct HealthMonitor {
    thresholds: HealthThresholds,
    system: Mutex<System>,
    history: Mutex<Vec<HealthSnapshot>>,
}

impl HealthMonitor {
    pub fn new(thresholds: HealthThresholds) -> Self {
        info!("Health monitor initialized");
        Self {
            thresholds,
            system: Mutex::new(System::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Run one sweep over all components and record the snapshot.
    pub fn check(&self, inputs: &HealthInputs) -> HealthSnapshot {
        let (cpu_percent, memory_percent, memory_available_gb) = {
            let mut system = self.lock(&self.system);
            system.refresh_cpu_usage();
            system.refresh_memory();
            let cpu = f64::from(system.global_cpu_usage());
            let total = system.total_memory() as f64;
            let used = system.used_memory() as f64;
            let percent = if total > 0.0 { used / total * 100.0 } else { 0.0 };
            let available_gb = system.available_memory() as f64 / 1024.0 / 1024.0 / 1024.0;
            (cpu, percent, available_gb)
        };
        let disk_percent = worst_disk_usage_percent();

        let mut components = HashMap::new();
        components.insert(
            "system".to_string(),
            self.check_system(cpu_percent, memory_percent, disk_percent),
        );
        components.insert(
            "cpu".to_string(),
            self.check_scaled("cpu", cpu_percent, self.thresholds.cpu_warn, self.thresholds.cpu_critical),
        );
        components.insert(
            "memory".to_string(),
            self.check_memory(memory_percent, memory_available_gb),
        );
        components.insert("disk".to_string(), self.check_disk(disk_percent));
        components.insert("errors".to_string(), self.check_errors(inputs));
        components.insert("performance".to_string(), self.check_performance(inputs));

        let mut overall = components
            .values()
            .map(|c| c.status)
            .fold(HealthStatus::Healthy, aggregate);
        // Any Critical component makes the system as a whole Unhealthy.
        if overall >= HealthStatus::Critical {
            overall = HealthStatus::Unhealthy;
        }

        let summary = summarize(&components, overall);
        let snapshot = HealthSnapshot {
            taken_at: Utc::now(),
            overall,
            components,
            summary,
        };

        if overall != HealthStatus::Healthy {
            warn!("health sweep: {:?} - {}", overall, snapshot.summary);
        } else {
            debug!("health sweep: healthy");
        }

        let mut history = self.lock(&self.history);
        history.push(snapshot.clone());
        if history.len() > HISTORY_CAP {
            let start = history.len() - HISTORY_KEEP;
            history.drain(..start);
        }

        snapshot
    }

    /// Most recent snapshots, newest first.
    pub fn recent(&self, limit: usize) -> Vec<HealthSnapshot> {
        let history = self.lock(&self.history);
        history.iter().rev().take(limit).cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.lock(&self.history).len()
    }

    fn check_system(
        &self,
        cpu_percent: f64,
        memory_percent: f64,
        disk_percent: Option<f64>,
    ) -> ComponentHealth {
        let mut status = HealthStatus::Healthy;
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if cpu_percent > self.thresholds.cpu_warn {
            warnings.push(format!("High CPU usage: {:.1}%", cpu_percent));
            status = aggregate(status, HealthStatus::Warning);
        }
        if memory_percent > self.thresholds.memory_warn {
            warnings.push(format!("High memory usage: {:.1}%", memory_percent));
            status = aggregate(status, HealthStatus::Warning);
        }
        if cpu_percent > self.thresholds.cpu_critical {
            errors.push("Critical CPU usage".to_string());
            status = aggregate(status, HealthStatus::Critical);
        }
        if memory_percent > self.thresholds.memory_critical {
            errors.push("Critical memory usage".to_string());
            status = aggregate(status, HealthStatus::Critical);
        }
        if let Some(disk) = disk_percent {
            if disk > self.thresholds.disk_unhealthy {
                errors.push("Critical disk space".to_string());
                status = aggregate(status, HealthStatus::Unhealthy);
            }
        }

        let message = if errors.is_empty() && warnings.is_empty() {
            format!(
                "System running normally (CPU: {:.1}%, Memory: {:.1}%)",
                cpu_percent, memory_percent
            )
        } else if errors.is_empty() {
            format!("System warnings detected: {}", warnings.join(", "))
        } else {
            format!("System errors detected: {}", errors.join(", "))
        };

        let mut metrics = HashMap::new();
        metrics.insert("cpu_percent".to_string(), json!(cpu_percent));
        metrics.insert("memory_percent".to_string(), json!(memory_percent));
        if let Some(disk) = disk_percent {
            metrics.insert("disk_percent".to_string(), json!(disk));
        }

        ComponentHealth {
            name: "system".to_string(),
            status,
            message,
            metrics,
            warnings,
            errors,
        }
    }

    fn check_scaled(&self, name: &str, percent: f64, warn: f64, critical: f64) -> ComponentHealth {
        let mut status = HealthStatus::Healthy;
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if percent > critical {
            errors.push(format!("Critical {} usage: {:.1}%", name, percent));
            status = HealthStatus::Critical;
        } else if percent > warn {
            warnings.push(format!("High {} usage: {:.1}%", name, percent));
            status = HealthStatus::Warning;
        }

        let mut metrics = HashMap::new();
        metrics.insert(format!("{}_percent", name), json!(percent));

        ComponentHealth {
            name: name.to_string(),
            status,
            message: format!("{} usage {:.1}%", name, percent),
            metrics,
            warnings,
            errors,
        }
    }

    fn check_memory(&self, percent: f64, available_gb: f64) -> ComponentHealth {
        let mut component = self.check_scaled(
            "memory",
            percent,
            self.thresholds.memory_warn,
            self.thresholds.memory_critical,
        );
        component
            .metrics
            .insert("memory_available_gb".to_string(), json!(available_gb));
        component
    }

    fn check_disk(&self, percent: Option<f64>) -> ComponentHealth {
        let Some(percent) = percent else {
            return ComponentHealth {
                name: "disk".to_string(),
                status: HealthStatus::Healthy,
                message: "No disks visible".to_string(),
                metrics: HashMap::new(),
                warnings: Vec::new(),
                errors: Vec::new(),
            };
        };

        let mut status = HealthStatus::Healthy;
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if percent > self.thresholds.disk_unhealthy {
            errors.push("Disk almost full".to_string());
            status = HealthStatus::Unhealthy;
        } else if percent > self.thresholds.disk_critical {
            errors.push("Critical disk space".to_string());
            status = HealthStatus::Critical;
        } else if percent > self.thresholds.disk_warn {
            warnings.push(format!("High disk usage: {:.1}%", percent));
            status = HealthStatus::Warning;
        }

        let mut metrics = HashMap::new();
        metrics.insert("disk_percent".to_string(), json!(percent));

        ComponentHealth {
            name: "disk".to_string(),
            status,
            message: format!("Disk usage {:.1}%", percent),
            metrics,
            warnings,
            errors,
        }
    }

    fn check_errors(&self, inputs: &HealthInputs) -> ComponentHealth {
        let mut status = HealthStatus::Healthy;
        let mut warnings = Vec::new();
        let mut errors = Vec::new();
        let mut metrics = HashMap::new();

        match inputs.error_recovery_rate {
            Some(rate) => {
                metrics.insert("error_recovery_rate".to_string(), json!(rate));
                if rate < self.thresholds.recovery_rate_critical {
                    errors.push(format!("Error recovery rate critically low: {:.2}", rate));
                    status = HealthStatus::Critical;
                } else if rate < self.thresholds.recovery_rate_warn {
                    warnings.push(format!("Error recovery rate low: {:.2}", rate));
                    status = HealthStatus::Warning;
                }
            }
            None => {
                metrics.insert("error_recovery_rate".to_string(), json!(null));
            }
        }

        ComponentHealth {
            name: "errors".to_string(),
            status,
            message: match status {
                HealthStatus::Healthy => "Error recovery healthy".to_string(),
                _ => "Error recovery degraded".to_string(),
            },
            metrics,
            warnings,
            errors,
        }
    }

    fn check_performance(&self, inputs: &HealthInputs) -> ComponentHealth {
        let mut status = HealthStatus::Healthy;
        let mut warnings = Vec::new();
        let mut errors = Vec::new();
        let mut metrics = HashMap::new();

        if let Some(rate) = inputs.operation_success_rate {
            metrics.insert("operation_success_rate".to_string(), json!(rate));
            if rate < self.thresholds.success_rate_critical {
                errors.push(format!("Operation success rate critically low: {:.2}", rate));
                status = aggregate(status, HealthStatus::Critical);
            } else if rate < self.thresholds.success_rate_warn {
                warnings.push(format!("Operation success rate low: {:.2}", rate));
                status = aggregate(status, HealthStatus::Warning);
            }
        }

        if let Some(avg_ms) = inputs.average_operation_ms {
            metrics.insert("average_operation_ms".to_string(), json!(avg_ms));
            if avg_ms > self.thresholds.duration_critical_ms {
                errors.push(format!("Operations critically slow: {:.0}ms", avg_ms));
                status = aggregate(status, HealthStatus::Critical);
            } else if avg_ms > self.thresholds.duration_warn_ms {
                warnings.push(format!("Operations slow: {:.0}ms", avg_ms));
                status = aggregate(status, HealthStatus::Warning);
            }
        }

        ComponentHealth {
            name: "performance".to_string(),
            status,
            message: match status {
                HealthStatus::Healthy => "Performance within bounds".to_string(),
                _ => "Performance degraded".to_string(),
            },
            metrics,
            warnings,
            errors,
        }
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(HealthThresholds::default())
    }
}

/// Overall status aggregation: any Critical/Unhealthy component makes the
/// system Unhealthy; otherwise one Warning makes it Warning.
fn aggregate(current: HealthStatus, next: HealthStatus) -> HealthStatus {
    current.max(next)
}

fn summarize(components: &HashMap<String, ComponentHealth>, overall: HealthStatus) -> String {
    let degraded: Vec<&str> = components
        .values()
        .filter(|c| c.status != HealthStatus::Healthy)
        .map(|c| c.name.as_str())
        .collect();
    if degraded.is_empty() {
        "all components healthy".to_string()
    } else {
        let mut names = degraded;
        names.sort_unstable();
        format!("{:?}: {}", overall, names.join(", "))
    }
}

fn worst_disk_usage_percent() -> Option<f64> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|d| d.total_space() > 0)
        .map(|d| {
            let total = d.total_space() as f64;
            let used = total - d.available_space() as f64;
            used / total * 100.0
        })
        .fold(None, |worst: Option<f64>, pct| {
            Some(worst.map_or(pct, |w| w.max(pct)))
        })
}

/// Spawn the background monitoring thread. `inputs` is sampled before
/// every sweep; the thread exits when `stop` is set.
pub fn spawn_monitor<F>(
    monitor: Arc<HealthMonitor>,
    interval: Duration,
    stop: Arc<AtomicBool>,
    inputs: F,
) -> JoinHandle<()>
where
    F: Fn() -> HealthInputs + Send + 'static,
{
    std::thread::spawn(move || {
        info!("health monitor started (interval {:?})", interval);
        while !stop.load(Ordering::SeqCst) {
            let deadline = Instant::now() + interval;
            while Instant::now() < deadline {
                if stop.load(Ordering::SeqCst) {
                    return;
                }
                std::thread::sleep(Duration::from_millis(100));
            }
            monitor.check(&inputs());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregation_rules() {
        assert_eq!(
            aggregate(HealthStatus::Healthy, HealthStatus::Warning),
            HealthStatus::Warning
        );
        assert_eq!(
            aggregate(HealthStatus::Warning, HealthStatus::Critical),
            HealthStatus::Critical
        );
        assert_eq!(
            aggregate(HealthStatus::Unhealthy, HealthStatus::Healthy),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn test_check_produces_all_components() {
        let monitor = HealthMonitor::default();
        let snapshot = monitor.check(&HealthInputs::default());
        for name in ["system", "cpu", "memory", "disk", "errors", "performance"] {
            assert!(snapshot.components.contains_key(name), "missing {}", name);
        }
        assert_eq!(monitor.history_len(), 1);
    }

    #[test]
    fn test_degraded_inputs_escalate() {
        let monitor = HealthMonitor::default();
        let snapshot = monitor.check(&HealthInputs {
            error_recovery_rate: Some(0.4),
            operation_success_rate: Some(0.95),
            average_operation_ms: Some(100.0),
        });
        assert_eq!(
            snapshot.components["errors"].status,
            HealthStatus::Critical
        );
        assert_eq!(snapshot.overall, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_warning_inputs() {
        let monitor = HealthMonitor::default();
        let snapshot = monitor.check(&HealthInputs {
            error_recovery_rate: Some(0.95),
            operation_success_rate: Some(0.85),
            average_operation_ms: Some(5000.0),
        });
        let perf = &snapshot.components["performance"];
        assert_eq!(perf.status, HealthStatus::Warning);
        assert_eq!(perf.warnings.len(), 2);
    }

    #[test]
    fn test_history_ring_trims() {
        let monitor = HealthMonitor::default();
        let inputs = HealthInputs::default();
        for _ in 0..(HISTORY_CAP + 1) {
            monitor.check(&inputs);
        }
        assert_eq!(monitor.history_len(), HISTORY_KEEP);

        let recent = monitor.recent(2);
        assert_eq!(recent.len(), 2);
        assert!(recent[0].taken_at >= recent[1].taken_at);
    }
}
