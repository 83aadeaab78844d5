use super::policy::ResetPolicy;
use serde::{Deserialize, Serialize};

/// Usage counter for one meterable feature.
///
/// Invariants:
/// - `count` only grows through `record`
/// - A counter whose period has rolled over reads as zero
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageCounter {
    /// Feature key (e.g., "ai_explanations")
    pub feature: String,

    /// Invocations in the current tracking period
    pub count: u64,

    /// Unix seconds when the current tracking period began
    pub period_start: i64,
}

impl UsageCounter {
    /// Create an empty counter whose period starts at `now`
    pub fn new(feature: String, now: i64) -> Self {
        UsageCounter {
            feature,
            count: 0,
            period_start: now,
        }
    }

    /// Count for the period containing `now`
    pub fn current(&self, reset: &ResetPolicy, now: i64) -> u64 {
        if reset.has_rolled_over(self.period_start, now) {
            0
        } else {
            self.count
        }
    }

    /// Start a fresh period if the old one lapsed
    pub fn roll_period(&mut self, reset: &ResetPolicy, now: i64) {
        if reset.has_rolled_over(self.period_start, now) {
            self.count = 0;
            self.period_start = now;
        }
    }

    /// Record one invocation, returning the new count
    pub fn record(&mut self) -> u64 {
        self.count = self.count.saturating_add(1);
        self.count
    }
}
