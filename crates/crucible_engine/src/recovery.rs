//! Opt-in recovery strategies, registered per error kind.
//!
//! Strategies are policy knobs set by the operator, not automatic
//! defaults. Each is invoked once per failure; the outcome is recorded
//! for diagnostics alongside the error.

use crate::context::{lock_context, ContextHandle};
use chrono::{DateTime, Utc};
use crucible_protocol::ErrorKind;
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;

/// Absolute ceiling for deadline doubling.
const MAX_DEADLINE_SECS: u64 = 300;

/// Floor below which the memory cap is not halved further.
const MIN_MEMORY_MIB: u64 = 32;

/// A registered remediation action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Clear the workspace's persistent bindings; the caller retries.
    ClearBindings,
    /// Double the workspace deadline, up to the absolute cap.
    DoubleTimeout,
    /// Halve the workspace memory cap.
    HalveMemory,
}

/// What a strategy invocation did.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryOutcome {
    pub strategy: String,
    pub detail: String,
    pub at: DateTime<Utc>,
}

/// Registry of strategies keyed by the error kind that triggers them.
#[derive(Debug, Default)]
pub struct RecoveryRegistry {
    strategies: HashMap<ErrorKind, RecoveryStrategy>,
    outcomes: Vec<RecoveryOutcome>,
}

impl RecoveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: ErrorKind, strategy: RecoveryStrategy) {
        self.strategies.insert(kind, strategy);
    }

    pub fn strategy_for(&self, kind: ErrorKind) -> Option<RecoveryStrategy> {
        self.strategies.get(&kind).copied()
    }

    /// Apply the registered strategy for `kind` to a workspace, if any.
    pub fn attempt(&mut self, kind: ErrorKind, handle: &ContextHandle) -> Option<RecoveryOutcome> {
        let strategy = self.strategy_for(kind)?;
        let mut context = lock_context(handle);

        let detail = match strategy {
            RecoveryStrategy::ClearBindings => {
                context.clear_bindings();
                format!("cleared persistent bindings for {}", context.workspace_id)
            }
            RecoveryStrategy::DoubleTimeout => {
                let doubled = (context.resource_limits.cpu_seconds * 2).min(MAX_DEADLINE_SECS);
                context.resource_limits.cpu_seconds = doubled;
                format!(
                    "deadline for {} raised to {}s",
                    context.workspace_id, doubled
                )
            }
            RecoveryStrategy::HalveMemory => {
                let halved = (context.resource_limits.memory_mib / 2).max(MIN_MEMORY_MIB);
                context.resource_limits.memory_mib = halved;
                format!(
                    "memory cap for {} lowered to {} MiB",
                    context.workspace_id, halved
                )
            }
        };

        info!("recovery applied: {}", detail);
        let outcome = RecoveryOutcome {
            strategy: format!("{:?}", strategy),
            detail,
            at: Utc::now(),
        };
        self.outcomes.push(outcome.clone());
        Some(outcome)
    }

    /// Recorded outcomes, oldest first.
    pub fn outcomes(&self) -> &[RecoveryOutcome] {
        &self.outcomes
    }
}
