//! Execution history ring and aggregate statistics.

use crucible_protocol::{ExecutionRecord, Language};
use serde::Serialize;
use std::collections::HashMap;

/// Capacity before trimming kicks in.
const HISTORY_CAP: usize = 1000;
/// Number of most-recent records kept after a trim.
const HISTORY_KEEP: usize = 500;

/// Fixed-capacity record ring. On overflow the oldest half is discarded
/// in one batch rather than record-by-record.
#[derive(Debug, Default)]
pub struct HistoryRing {
    records: Vec<ExecutionRecord>,
}

impl HistoryRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ExecutionRecord) {
        self.records.push(record);
        if self.records.len() > HISTORY_CAP {
            let start = self.records.len() - HISTORY_KEEP;
            self.records.drain(..start);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Recent records, newest first, optionally filtered.
    pub fn query(
        &self,
        workspace_id: Option<&str>,
        language: Option<Language>,
        limit: usize,
    ) -> Vec<ExecutionRecord> {
        self.records
            .iter()
            .rev()
            .filter(|r| workspace_id.map_or(true, |id| r.workspace_id == id))
            .filter(|r| language.map_or(true, |l| r.language == l))
            .take(limit)
            .cloned()
            .collect()
    }
}

/// Running counters across all executions.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ExecutionStats {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub by_language: HashMap<String, u64>,
}

impl ExecutionStats {
    pub fn record(&mut self, language: Language, success: bool) {
        self.total_executions += 1;
        if success {
            self.successful_executions += 1;
        } else {
            self.failed_executions += 1;
        }
        *self.by_language.entry(language.to_string()).or_default() += 1;
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_executions == 0 {
            1.0
        } else {
            self.successful_executions as f64 / self.total_executions as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crucible_protocol::ExecutionResult;

    fn record(workspace: &str, language: Language, n: usize) -> ExecutionRecord {
        ExecutionRecord {
            execution_id: format!("exec-{}", n),
            code: "x = 1".to_string(),
            language,
            workspace_id: workspace.to_string(),
            result: ExecutionResult::ok(String::new(), 1),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_ring_trims_to_half_on_overflow() {
        let mut ring = HistoryRing::new();
        for n in 0..(HISTORY_CAP + 1) {
            ring.push(record("ws", Language::Python, n));
        }
        assert_eq!(ring.len(), HISTORY_KEEP);
        // The newest record survived the trim.
        let newest = ring.query(None, None, 1);
        assert_eq!(newest[0].execution_id, format!("exec-{}", HISTORY_CAP));
    }

    #[test]
    fn test_query_filters() {
        let mut ring = HistoryRing::new();
        ring.push(record("ws1", Language::Python, 0));
        ring.push(record("ws2", Language::Shell, 1));
        ring.push(record("ws1", Language::Shell, 2));

        assert_eq!(ring.query(Some("ws1"), None, 10).len(), 2);
        assert_eq!(ring.query(None, Some(Language::Shell), 10).len(), 2);
        assert_eq!(ring.query(Some("ws1"), Some(Language::Shell), 10).len(), 1);

        // Newest first.
        let all = ring.query(None, None, 10);
        assert_eq!(all[0].execution_id, "exec-2");
    }

    #[test]
    fn test_stats_counters() {
        let mut stats = ExecutionStats::default();
        stats.record(Language::Python, true);
        stats.record(Language::Python, false);
        stats.record(Language::Shell, true);

        assert_eq!(stats.total_executions, 3);
        assert_eq!(stats.successful_executions, 2);
        assert_eq!(stats.by_language["python"], 2);
        assert!((stats.success_rate() - 2.0 / 3.0).abs() < f64::EPSILON);
    }
}
