//! Security Auditor - Violation History and Summaries
//!
//! Keeps a bounded in-memory record of policy violations for diagnostics.
//! Raw inputs are never stored, only a short hash-free prefix count per
//! tier and kind.

use crate::command_filter::{Violation, ViolationKind};
use chrono::{DateTime, Utc};
use crucible_protocol::SecurityTier;
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

const MAX_VIOLATIONS: usize = 1000;

#[derive(Debug, Clone, Serialize)]
pub struct RecordedViolation {
    pub tier: SecurityTier,
    pub kind: ViolationKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Aggregated counts for `get_security_status`-style reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SecuritySummary {
    pub total_violations: usize,
    pub violations_by_tier: HashMap<String, usize>,
    pub violations_by_kind: HashMap<String, usize>,
    /// Violations recorded in the last hour.
    pub recent_violations: usize,
}

/// Bounded violation log.
#[derive(Debug, Default)]
pub struct SecurityAuditor {
    violations: Vec<RecordedViolation>,
}

impl SecurityAuditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, violation: &Violation) {
        warn!(
            "Security violation: {:?} - {}",
            violation.kind, violation.message
        );
        self.violations.push(RecordedViolation {
            tier: violation.tier,
            kind: violation.kind,
            message: violation.message.clone(),
            at: Utc::now(),
        });
        if self.violations.len() > MAX_VIOLATIONS {
            let excess = self.violations.len() - MAX_VIOLATIONS;
            self.violations.drain(..excess);
        }
    }

    pub fn summary(&self) -> SecuritySummary {
        let mut by_tier: HashMap<String, usize> = HashMap::new();
        let mut by_kind: HashMap<String, usize> = HashMap::new();
        let hour_ago = Utc::now() - chrono::Duration::hours(1);
        let mut recent = 0;

        for v in &self.violations {
            *by_tier.entry(v.tier.to_string()).or_default() += 1;
            *by_kind
                .entry(format!("{:?}", v.kind).to_lowercase())
                .or_default() += 1;
            if v.at >= hour_ago {
                recent += 1;
            }
        }

        SecuritySummary {
            total_violations: self.violations.len(),
            violations_by_tier: by_tier,
            violations_by_kind: by_kind,
            recent_violations: recent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CommandFilter;

    #[test]
    fn test_record_and_summarize() {
        let filter = CommandFilter::new();
        let mut auditor = SecurityAuditor::new();

        let violation = filter
            .check_command("rm -rf /", SecurityTier::Moderate)
            .unwrap();
        auditor.record(&violation);
        auditor.record(&violation);

        let summary = auditor.summary();
        assert_eq!(summary.total_violations, 2);
        assert_eq!(summary.recent_violations, 2);
        assert_eq!(summary.violations_by_tier.get("critical"), Some(&2));
    }

    #[test]
    fn test_history_is_bounded() {
        let filter = CommandFilter::new();
        let mut auditor = SecurityAuditor::new();
        let violation = filter
            .check_command("shutdown now", SecurityTier::Low)
            .unwrap();

        for _ in 0..(MAX_VIOLATIONS + 50) {
            auditor.record(&violation);
        }
        assert_eq!(auditor.summary().total_violations, MAX_VIOLATIONS);
    }
}
