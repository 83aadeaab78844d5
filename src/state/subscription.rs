use serde::{Deserialize, Serialize};

/// Persisted subscription status.
///
/// Expiry is never stored; it is derived from `expires_at` against the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    /// Revoked by the store of record (refund, chargeback).
    Cancelled,
}

/// Subscription aggregate: the user's current plan.
///
/// Invariants:
/// - Effectively active only while `status == Active` and `expires_at > now`
/// - Replaced whole on purchase/restore, never merged field by field
/// - `auto_renew` is informational and does not affect access
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionRecord {
    /// Purchased plan identifier (opaque to the engine)
    pub plan_id: String,

    pub status: SubscriptionStatus,

    /// Unix seconds after which the subscription no longer grants access
    pub expires_at: i64,

    pub auto_renew: bool,
}

impl SubscriptionRecord {
    /// Create a freshly purchased, auto-renewing record
    pub fn active(plan_id: String, expires_at: i64) -> Self {
        SubscriptionRecord {
            plan_id,
            status: SubscriptionStatus::Active,
            expires_at,
            auto_renew: true,
        }
    }

    /// Whether this record grants access at `now`
    pub fn is_active_at(&self, now: i64) -> bool {
        self.status == SubscriptionStatus::Active && self.expires_at > now
    }

    /// Stop renewal; access continues until `expires_at`
    pub fn cancel_renewal(&mut self) {
        self.auto_renew = false;
    }

    /// Seconds of access left at `now` (0 once lapsed or revoked)
    pub fn seconds_left(&self, now: i64) -> i64 {
        if self.is_active_at(now) {
            self.expires_at - now
        } else {
            0
        }
    }
}
