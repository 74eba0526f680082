//! Shared server state handed to every tool handler.
//!
//! The legacy pattern of process-wide singletons is replaced by one
//! explicit state object owned by the server and passed by reference;
//! nothing here is global.

use anyhow::{Context, Result};
use crucible_artifacts::ArtifactStore;
use crucible_engine::ExecutionEngine;
use crucible_gateway::{ConnectionManager, HealthInputs, HealthMonitor, HealthThresholds};
use crucible_protocol::ServerConfig;
use crucible_security::PathGuard;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Everything a tool handler can reach.
pub struct ServerState {
    pub config: ServerConfig,
    pub engine: Arc<ExecutionEngine>,
    pub store: Arc<ArtifactStore>,
    pub connections: Arc<ConnectionManager>,
    pub health: Arc<HealthMonitor>,
    /// Allowlist for file-ingesting tools (`store_artifact`).
    pub guard: PathGuard,
}

impl ServerState {
    /// Build the full subsystem graph from a configuration.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let base_dir = config.resolved_base_dir();
        std::fs::create_dir_all(&base_dir)
            .with_context(|| format!("Failed to create base dir: {}", base_dir.display()))?;

        let store = Arc::new(
            ArtifactStore::new(base_dir.join("artifacts"))
                .context("Failed to open artifact store")?,
        );
        let engine = Arc::new(ExecutionEngine::new(
            base_dir.join("workspaces"),
            config.security_tier,
        ));
        let connections = Arc::new(ConnectionManager::new(
            config.connections.clone(),
            &config.breaker,
            config.enable_rate_limiting.then_some(&config.rate_limits),
        ));
        let health = Arc::new(HealthMonitor::new(HealthThresholds::default()));

        let mut roots: Vec<PathBuf> = vec![base_dir.clone()];
        if let Ok(cwd) = std::env::current_dir() {
            roots.push(cwd);
        }
        let guard = PathGuard::new(roots);

        info!("Server state initialized (base dir {})", base_dir.display());

        Ok(Self {
            config,
            engine,
            store,
            connections,
            health,
            guard,
        })
    }

    /// Service-level metrics for the health monitor.
    pub fn health_inputs(&self) -> HealthInputs {
        let stats = self.engine.statistics();
        let connection_stats = self.connections.stats();

        let recovery_rate = {
            let errors = connection_stats.metrics.total_errors;
            let recovered = connection_stats.metrics.successful_reconnections;
            if errors == 0 {
                None
            } else {
                Some((recovered as f64 / errors as f64).min(1.0))
            }
        };

        HealthInputs {
            error_recovery_rate: recovery_rate,
            operation_success_rate: (stats.executions.total_executions > 0)
                .then(|| stats.success_rate),
            average_operation_ms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_builds_subsystem_graph() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            base_dir: Some(dir.path().join("crucible")),
            ..Default::default()
        };
        let state = ServerState::new(config).unwrap();

        assert!(dir.path().join("crucible/artifacts/storage").exists());
        assert_eq!(state.engine.statistics().active_contexts, 0);
        assert_eq!(state.connections.admitted_count(), 0);
    }

    #[test]
    fn test_health_inputs_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            base_dir: Some(dir.path().join("crucible")),
            ..Default::default()
        };
        let state = ServerState::new(config).unwrap();
        let inputs = state.health_inputs();
        assert!(inputs.error_recovery_rate.is_none());
        assert!(inputs.operation_success_rate.is_none());
    }
}
