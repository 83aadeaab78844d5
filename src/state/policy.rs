//! Feature policy table: which features are free, paid, or metered.
//!
//! Immutable once built. Engine code only looks features up here; quotas and
//! allowlists are never written inline elsewhere.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// When free-tier usage counters start over.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResetPolicy {
    /// Counts accumulate forever.
    #[default]
    Never,
    /// Counts restart once `period_secs` have passed since the period began.
    Rolling { period_secs: u64 },
}

impl ResetPolicy {
    pub fn has_rolled_over(&self, period_start: i64, now: i64) -> bool {
        match self {
            ResetPolicy::Never => false,
            ResetPolicy::Rolling { period_secs } => {
                let period = i64::try_from(*period_secs).unwrap_or(i64::MAX);
                period_start.saturating_add(period) <= now
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturePolicy {
    /// Always accessible, never metered
    pub free_allowlist: BTreeSet<String>,

    /// Accessible with an active subscription
    pub premium: BTreeSet<String>,

    /// Free invocations allowed before a subscription is required
    pub quotas: BTreeMap<String, u64>,

    #[serde(default)]
    pub reset: ResetPolicy,
}

impl FeaturePolicy {
    /// Build a policy, rejecting features that are both free and metered.
    pub fn new(
        free_allowlist: BTreeSet<String>,
        premium: BTreeSet<String>,
        quotas: BTreeMap<String, u64>,
        reset: ResetPolicy,
    ) -> Result<Self> {
        let policy = FeaturePolicy {
            free_allowlist,
            premium,
            quotas,
            reset,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Catalog shipped with the app.
    pub fn default_catalog() -> Self {
        fn set(items: &[&str]) -> BTreeSet<String> {
            items.iter().map(|s| s.to_string()).collect()
        }
        let quotas = [
            ("ai_explanations", 50),
            ("business_assets", 10),
            ("skill_guides", 3),
            ("cultural_content", 5),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), *v))
        .collect();

        FeaturePolicy {
            free_allowlist: set(&["basic_explanations", "limited_languages", "basic_skills"]),
            premium: set(&[
                "unlimited_explanations",
                "all_languages",
                "business_tools",
                "cultural_content",
                "offline_access",
                "advanced_skills",
                "priority_support",
            ]),
            quotas,
            reset: ResetPolicy::Never,
        }
    }

    /// Load a policy from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            Error::InvalidPolicy(format!("Failed to read policy {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let policy: FeaturePolicy = serde_json::from_str(raw)
            .map_err(|e| Error::InvalidPolicy(format!("Failed to parse policy JSON: {}", e)))?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(feature) = self.free_allowlist.iter().find(|f| self.quotas.contains_key(*f)) {
            return Err(Error::InvalidPolicy(format!(
                "feature {} is both free and metered",
                feature
            )));
        }
        if let ResetPolicy::Rolling { period_secs: 0 } = self.reset {
            return Err(Error::InvalidPolicy("reset period must be positive".to_string()));
        }
        Ok(())
    }

    pub fn is_free(&self, feature: &str) -> bool {
        self.free_allowlist.contains(feature)
    }

    /// Unlocked by a subscription: premium features and every metered one.
    pub fn is_paid(&self, feature: &str) -> bool {
        self.premium.contains(feature) || self.quotas.contains_key(feature)
    }

    pub fn is_metered(&self, feature: &str) -> bool {
        self.quotas.contains_key(feature)
    }

    /// Free-tier quota; unknown features get zero.
    pub fn quota(&self, feature: &str) -> u64 {
        self.quotas.get(feature).copied().unwrap_or(0)
    }
}

impl Default for FeaturePolicy {
    fn default() -> Self {
        FeaturePolicy::default_catalog()
    }
}
