pub mod hook;
pub mod ledger;
pub mod plans;
pub mod policy;
pub mod subscription;
pub mod usage;

pub use hook::{Hook, HookEvent, NoOpHook, RecordingHook};
pub use plans::{BillingInterval, PlanCatalog, SubscriptionPlan};
pub use policy::{FeaturePolicy, ResetPolicy};
pub use subscription::{SubscriptionRecord, SubscriptionStatus};
pub use usage::UsageCounter;

use serde::Serialize;
use std::collections::BTreeMap;

/// Point-in-time view of the ledger for reporting.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub subscribed: bool,
    pub subscription: Option<SubscriptionRecord>,
    /// Seconds of access left (0 when not subscribed)
    pub seconds_left: i64,
    /// Current-period count per metered feature
    pub usage: BTreeMap<String, u64>,
}
