//! Core value types: security tiers, resource limits, execution results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Security tier controlling command filtering and resource caps.
///
/// Total-ordered from most permissive (`Low`) to strictest (`Critical`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityTier {
    Low,
    Moderate,
    High,
    Critical,
}

impl SecurityTier {
    /// All tiers, most permissive first.
    pub const ALL: [SecurityTier; 4] = [
        SecurityTier::Low,
        SecurityTier::Moderate,
        SecurityTier::High,
        SecurityTier::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityTier::Low => "low",
            SecurityTier::Moderate => "moderate",
            SecurityTier::High => "high",
            SecurityTier::Critical => "critical",
        }
    }
}

impl fmt::Display for SecurityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(SecurityTier::Low),
            // "medium" accepted as a legacy alias for moderate
            "moderate" | "medium" => Ok(SecurityTier::Moderate),
            "high" => Ok(SecurityTier::High),
            "critical" => Ok(SecurityTier::Critical),
            other => Err(format!("unknown security tier: {}", other)),
        }
    }
}

impl Default for SecurityTier {
    fn default() -> Self {
        SecurityTier::Moderate
    }
}

/// Per-execution resource caps. All values are positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Wallclock/CPU seconds before the execution is cancelled.
    pub cpu_seconds: u64,
    /// Address-space cap in MiB.
    pub memory_mib: u64,
    /// Maximum number of processes the child may spawn.
    pub max_processes: u64,
    /// Maximum size of a single file written by the child, in MiB.
    pub max_file_size_mib: u64,
    /// Maximum number of files in the workspace.
    pub max_total_files: u64,
}

impl ResourceLimits {
    /// Derive the default limits for a security tier.
    ///
    /// | Tier     | CPU s | Memory MiB | Procs |
    /// |----------|-------|------------|-------|
    /// | low      | 60    | 1024       | 20    |
    /// | moderate | 30    | 512        | 10    |
    /// | high     | 15    | 256        | 5     |
    /// | critical | 10    | 128        | 3     |
    pub fn for_tier(tier: SecurityTier) -> Self {
        let (cpu_seconds, memory_mib, max_processes) = match tier {
            SecurityTier::Low => (60, 1024, 20),
            SecurityTier::Moderate => (30, 512, 10),
            SecurityTier::High => (15, 256, 5),
            SecurityTier::Critical => (10, 128, 3),
        };
        Self {
            cpu_seconds,
            memory_mib,
            max_processes,
            max_file_size_mib: 100,
            max_total_files: 1000,
        }
    }

    /// Override the deadline, keeping the other caps.
    pub fn with_cpu_seconds(mut self, cpu_seconds: u64) -> Self {
        self.cpu_seconds = cpu_seconds;
        self
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::for_tier(SecurityTier::Moderate)
    }
}

/// Closed set of error classifications surfaced in results and RPC errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Denied by the command filter or input validator.
    Security,
    /// Deadline fired.
    Timeout,
    /// User code raised.
    RuntimeFailure,
    /// Child exited nonzero.
    CommandError,
    /// Required external tool missing.
    NotInstalled,
    /// A limit was reached (connections, memory, disk, processes).
    Resource,
    /// Request envelope invalid.
    Validation,
    /// Authentication or authorization failure.
    Auth,
    /// Connection-layer network classification.
    Network,
    /// Connection-layer protocol classification.
    Protocol,
    /// Unexpected fault; implementation bug.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Security => "Security",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::RuntimeFailure => "RuntimeFailure",
            ErrorKind::CommandError => "CommandError",
            ErrorKind::NotInstalled => "NotInstalled",
            ErrorKind::Resource => "Resource",
            ErrorKind::Validation => "Validation",
            ErrorKind::Auth => "Auth",
            ErrorKind::Network => "Network",
            ErrorKind::Protocol => "Protocol",
            ErrorKind::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution language for history records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Shell,
    Animation,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Language::Python => "python",
            Language::Shell => "shell",
            Language::Animation => "animation",
        };
        f.write_str(s)
    }
}

/// Result of one execution. Failures of user code are values here, not
/// errors at the RPC layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Captured stdout.
    #[serde(default)]
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub duration_ms: u64,
    /// Relative paths of files produced under the workspace artifacts dir.
    #[serde(default)]
    pub artifacts: Vec<String>,
    /// Open-ended per-execution metadata (return codes, quality flags, ...).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ExecutionResult {
    /// A successful result with the given stdout.
    pub fn ok(output: String, duration_ms: u64) -> Self {
        Self {
            success: true,
            output,
            error: None,
            error_kind: None,
            duration_ms,
            artifacts: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// A failed result with a classified error.
    pub fn failed(kind: ErrorKind, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            error_kind: Some(kind),
            duration_ms,
            artifacts: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// One entry in the execution history ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    /// The submitted source or command.
    pub code: String,
    pub language: Language,
    pub workspace_id: String,
    pub result: ExecutionResult,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering() {
        assert!(SecurityTier::Low < SecurityTier::Moderate);
        assert!(SecurityTier::Moderate < SecurityTier::High);
        assert!(SecurityTier::High < SecurityTier::Critical);
    }

    #[test]
    fn test_tier_parse_aliases() {
        assert_eq!(
            "medium".parse::<SecurityTier>().unwrap(),
            SecurityTier::Moderate
        );
        assert_eq!(
            "CRITICAL".parse::<SecurityTier>().unwrap(),
            SecurityTier::Critical
        );
        assert!("paranoid".parse::<SecurityTier>().is_err());
    }

    #[test]
    fn test_limits_table() {
        let low = ResourceLimits::for_tier(SecurityTier::Low);
        assert_eq!(low.cpu_seconds, 60);
        assert_eq!(low.memory_mib, 1024);
        assert_eq!(low.max_processes, 20);

        let critical = ResourceLimits::for_tier(SecurityTier::Critical);
        assert_eq!(critical.cpu_seconds, 10);
        assert_eq!(critical.memory_mib, 128);
        assert_eq!(critical.max_processes, 3);
    }

    #[test]
    fn test_tier_serde_roundtrip() {
        let json = serde_json::to_string(&SecurityTier::Moderate).unwrap();
        assert_eq!(json, "\"moderate\"");
        let tier: SecurityTier = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(tier, SecurityTier::High);
    }

    #[test]
    fn test_result_serialization_omits_empty() {
        let result = ExecutionResult::ok("42\n".to_string(), 12);
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("error_kind"));
        assert!(!json.contains("metadata"));

        let failed = ExecutionResult::failed(ErrorKind::Timeout, "deadline", 2000);
        let json = serde_json::to_string(&failed).unwrap();
        assert!(json.contains("\"Timeout\""));
    }
}
