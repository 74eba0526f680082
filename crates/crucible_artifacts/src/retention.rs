//! Retention policies for artifact cleanup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Declarative cleanup rules. Every field is optional; absence means no
/// constraint on that axis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Artifacts older than this many days become candidates.
    pub max_age_days: Option<u32>,
    /// Target ceiling for total stored bytes; oldest artifacts are added
    /// to the candidate set until the total fits.
    pub max_total_size_mib: Option<u64>,
    /// Cap per category (reserved for callers; evaluated as a candidate
    /// filter when set).
    pub max_artifacts_per_category: Option<usize>,
    /// Categories cleaned regardless of age.
    pub categories_to_clean: Option<Vec<String>>,
    /// Artifacts carrying any of these tags are never deleted.
    pub preserve_tags: Option<Vec<String>>,
}

impl RetentionPolicy {
    /// The periodic auto-cleanup policy: expire by configured age, always
    /// sweep temporary/cache output, never touch pinned artifacts.
    pub fn auto(retention_days: u32) -> Self {
        Self {
            max_age_days: Some(retention_days),
            categories_to_clean: Some(vec!["temporary".to_string(), "cache".to_string()]),
            preserve_tags: Some(vec!["important".to_string(), "keep".to_string()]),
            ..Default::default()
        }
    }

    pub(crate) fn preserves(&self, tags: &[String]) -> bool {
        match &self.preserve_tags {
            Some(preserve) => tags.iter().any(|t| preserve.contains(t)),
            None => false,
        }
    }
}

/// Result of a cleanup sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupReport {
    pub total_artifacts: usize,
    pub deleted_artifacts: usize,
    pub freed_bytes: u64,
    pub deleted_by_category: HashMap<String, usize>,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_policy_shape() {
        let policy = RetentionPolicy::auto(7);
        assert_eq!(policy.max_age_days, Some(7));
        assert!(policy
            .categories_to_clean
            .as_ref()
            .unwrap()
            .contains(&"temporary".to_string()));
        assert!(policy.preserves(&["keep".to_string()]));
        assert!(!policy.preserves(&["scratch".to_string()]));
    }
}
