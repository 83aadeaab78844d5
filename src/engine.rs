//! Entitlement engine: the single authority on "may the user do X now?"
//!
//! Reads the feature policy and the ledger, and is the only writer of the
//! subscription record and usage counters.
//!
//! Concurrency:
//! - The subscription record is one mutex-guarded cell; writers save first
//!   and swap the in-memory copy only after the save succeeded.
//! - Purchase, restore and cancel hold `writer` from the store call through
//!   the save, so the ledger and the store of record agree on the last write.
//! - Each metered feature has its own mutex, held across load, compare and
//!   save in `track_usage`, so at most `quota` invocations are ever accepted.
//!   The lock table is fixed by the policy; every other key shares one lock.

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::state::ledger;
use crate::state::{FeaturePolicy, Hook, LedgerSnapshot, NoOpHook, SubscriptionRecord, UsageCounter};
use crate::storage::Storage;
use crate::store::PurchaseProvider;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// Result of metering one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TrackOutcome {
    /// Counted; `count` is the new total for the current period.
    Accepted { count: u64 },
    /// Allowlisted feature; nothing counted.
    Unmetered,
    /// Free quota used up; nothing counted.
    LimitReached { feature: String, quota: u64 },
}

impl TrackOutcome {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, TrackOutcome::LimitReached { .. })
    }
}

/// Remaining free invocations.
///
/// Serializes as the string `"unlimited"` or a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
    Unlimited,
    Limited(u64),
}

impl Serialize for Remaining {
    fn serialize<Z: Serializer>(&self, serializer: Z) -> std::result::Result<Z::Ok, Z::Error> {
        match self {
            Remaining::Unlimited => serializer.serialize_str("unlimited"),
            Remaining::Limited(n) => serializer.serialize_u64(*n),
        }
    }
}

impl fmt::Display for Remaining {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Remaining::Unlimited => write!(f, "unlimited"),
            Remaining::Limited(n) => write!(f, "{}", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PaywallReason {
    /// Feature is only available to subscribers.
    SubscriptionRequired,
    /// Free quota for a metered feature is used up.
    QuotaExhausted { quota: u64 },
}

/// What the presentation layer should do with a requested action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    Allow,
    Paywall { feature: String, reason: PaywallReason },
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allow)
    }
}

pub struct EntitlementEngine<S, C, P, H = NoOpHook> {
    storage: S,
    clock: C,
    provider: P,
    hook: H,
    policy: FeaturePolicy,
    subscription: Mutex<Option<SubscriptionRecord>>,
    writer: Mutex<()>,
    usage_locks: HashMap<String, Mutex<()>>,
    unmetered_lock: Mutex<()>,
}

impl<S, C, P> EntitlementEngine<S, C, P, NoOpHook>
where
    S: Storage,
    C: Clock,
    P: PurchaseProvider,
{
    /// Open the engine over an existing (or empty) ledger.
    ///
    /// A corrupt subscription record is discarded and the engine starts with
    /// no subscription. Storage faults are returned.
    pub fn open(storage: S, clock: C, provider: P, policy: FeaturePolicy) -> Result<Self> {
        policy.validate()?;

        let subscription = match ledger::read_subscription(&storage) {
            Ok(record) => record,
            Err(Error::CorruptRecord(reason)) => {
                warn!(%reason, "discarding unreadable subscription record");
                None
            }
            Err(e) => return Err(e),
        };

        let usage_locks = policy
            .quotas
            .keys()
            .map(|feature| (feature.clone(), Mutex::new(())))
            .collect();

        Ok(EntitlementEngine {
            storage,
            clock,
            provider,
            hook: NoOpHook,
            policy,
            subscription: Mutex::new(subscription),
            writer: Mutex::new(()),
            usage_locks,
            unmetered_lock: Mutex::new(()),
        })
    }
}

impl<S, C, P, H> EntitlementEngine<S, C, P, H>
where
    S: Storage,
    C: Clock,
    P: PurchaseProvider,
    H: Hook,
{
    /// Replace the observer hook.
    pub fn with_hook<H2: Hook>(self, hook: H2) -> EntitlementEngine<S, C, P, H2> {
        EntitlementEngine {
            storage: self.storage,
            clock: self.clock,
            provider: self.provider,
            hook,
            policy: self.policy,
            subscription: self.subscription,
            writer: self.writer,
            usage_locks: self.usage_locks,
            unmetered_lock: self.unmetered_lock,
        }
    }

    pub fn policy(&self) -> &FeaturePolicy {
        &self.policy
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Current subscription record, active or not.
    pub fn subscription(&self) -> Option<SubscriptionRecord> {
        self.lock_subscription().clone()
    }

    /// Whether an active, unexpired subscription exists right now.
    pub fn is_subscribed(&self) -> bool {
        self.is_subscribed_at(self.clock.now())
    }

    /// Allowlisted features always; otherwise paid features for subscribers.
    pub fn has_feature_access(&self, feature: &str) -> bool {
        if self.policy.is_free(feature) {
            return true;
        }
        self.is_subscribed() && self.policy.is_paid(feature)
    }

    /// Meter one invocation of `feature`.
    ///
    /// Free users are refused once the quota is used up; subscribers are
    /// counted but never refused. `Accepted` is only returned after the new
    /// count is durable; a failed save is an `Err` and grants nothing.
    pub fn track_usage(&self, feature: &str) -> Result<TrackOutcome> {
        if self.policy.is_free(feature) {
            return Ok(TrackOutcome::Unmetered);
        }

        let _guard = self
            .feature_lock(feature)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let now = self.clock.now();
        let mut counter = self.load_counter(feature, now)?;
        counter.roll_period(&self.policy.reset, now);

        if !self.is_subscribed_at(now) {
            let quota = self.policy.quota(feature);
            if counter.count >= quota {
                info!(feature, quota, "free quota exhausted");
                self.hook.on_limit_reached(feature, quota);
                return Ok(TrackOutcome::LimitReached {
                    feature: feature.to_string(),
                    quota,
                });
            }
        }

        let count = counter.record();
        if let Err(e) = ledger::write_usage(&self.storage, &counter) {
            error!(feature, error = %e, "usage not recorded, denying");
            return Err(e);
        }

        debug!(feature, count, "usage recorded");
        self.hook.on_usage_recorded(feature, count);
        Ok(TrackOutcome::Accepted { count })
    }

    /// Free invocations left for `feature`; `Unlimited` for subscribers.
    pub fn remaining_usage(&self, feature: &str) -> Result<Remaining> {
        let now = self.clock.now();
        if self.is_subscribed_at(now) {
            return Ok(Remaining::Unlimited);
        }
        let used = self.load_counter(feature, now)?.current(&self.policy.reset, now);
        Ok(Remaining::Limited(self.policy.quota(feature).saturating_sub(used)))
    }

    /// Invocations counted for `feature` in the current period.
    pub fn usage(&self, feature: &str) -> Result<u64> {
        let now = self.clock.now();
        Ok(self.load_counter(feature, now)?.current(&self.policy.reset, now))
    }

    /// Decide whether an action on `feature` may go ahead, metering it if
    /// it is a quota feature.
    pub fn authorize(&self, feature: &str) -> Result<GateDecision> {
        if self.policy.is_metered(feature) {
            return Ok(match self.track_usage(feature)? {
                TrackOutcome::LimitReached { feature, quota } => GateDecision::Paywall {
                    feature,
                    reason: PaywallReason::QuotaExhausted { quota },
                },
                _ => GateDecision::Allow,
            });
        }

        if self.has_feature_access(feature) {
            Ok(GateDecision::Allow)
        } else {
            Ok(GateDecision::Paywall {
                feature: feature.to_string(),
                reason: PaywallReason::SubscriptionRequired,
            })
        }
    }

    /// Buy `plan_id` through the store and replace the subscription record.
    ///
    /// Returns `false` if the store declines or the record cannot be saved;
    /// the previous record is then left untouched.
    pub fn purchase_subscription(&self, plan_id: &str) -> bool {
        let _writer = self.lock_writer();
        let now = self.clock.now();
        let receipt = match self.provider.purchase(plan_id, now) {
            Ok(receipt) => receipt,
            Err(e) => {
                error!(plan_id, error = %e, "purchase failed");
                return false;
            }
        };

        let record = SubscriptionRecord::active(receipt.plan_id, receipt.expires_at);
        let ok = self.replace_subscription(record);
        if ok {
            info!(plan_id, "subscription purchased");
        }
        ok
    }

    /// Re-derive the subscription record from the store of record.
    ///
    /// A store with nothing to restore is a successful no-op.
    pub fn restore_purchases(&self) -> bool {
        let _writer = self.lock_writer();
        let now = self.clock.now();
        match self.provider.restore(now) {
            Ok(Some(receipt)) => {
                let ok = self.replace_subscription(receipt.into_record());
                if ok {
                    info!("purchases restored");
                }
                ok
            }
            Ok(None) => {
                debug!("nothing to restore");
                true
            }
            Err(e) => {
                error!(error = %e, "restore failed");
                false
            }
        }
    }

    /// Turn off renewal. Access continues until the current expiry.
    pub fn cancel_subscription(&self) -> bool {
        let _writer = self.lock_writer();
        if self.lock_subscription().is_none() {
            return true;
        }

        if let Err(e) = self.provider.cancel_renewal() {
            error!(error = %e, "cancellation failed");
            return false;
        }

        let mut current = self.lock_subscription();
        let mut record = match current.clone() {
            Some(record) => record,
            None => return true,
        };
        record.cancel_renewal();

        if let Err(e) = ledger::write_subscription(&self.storage, &record) {
            error!(error = %e, "cancellation not recorded");
            return false;
        }
        self.hook.on_subscription_changed(&record);
        info!(plan_id = %record.plan_id, expires_at = record.expires_at, "renewal cancelled");
        *current = Some(record);
        true
    }

    /// Subscription state plus current usage of every metered feature.
    pub fn snapshot(&self) -> Result<LedgerSnapshot> {
        let mut usage = BTreeMap::new();
        for feature in self.policy.quotas.keys() {
            usage.insert(feature.clone(), self.usage(feature)?);
        }
        let now = self.clock.now();
        let subscription = self.subscription();
        Ok(LedgerSnapshot {
            subscribed: self.is_subscribed_at(now),
            seconds_left: subscription
                .as_ref()
                .map(|record| record.seconds_left(now))
                .unwrap_or(0),
            subscription,
            usage,
        })
    }

    fn is_subscribed_at(&self, now: i64) -> bool {
        self.lock_subscription()
            .as_ref()
            .map(|record| record.is_active_at(now))
            .unwrap_or(false)
    }

    // The cell is only assigned after a successful save, so a poisoned lock
    // still holds a coherent record.
    fn lock_subscription(&self) -> MutexGuard<'_, Option<SubscriptionRecord>> {
        self.subscription.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn replace_subscription(&self, record: SubscriptionRecord) -> bool {
        let mut current = self.lock_subscription();
        if let Err(e) = ledger::write_subscription(&self.storage, &record) {
            error!(plan_id = %record.plan_id, error = %e, "subscription not recorded");
            return false;
        }
        self.hook.on_subscription_changed(&record);
        *current = Some(record);
        true
    }

    fn feature_lock(&self, feature: &str) -> &Mutex<()> {
        self.usage_locks.get(feature).unwrap_or(&self.unmetered_lock)
    }

    fn load_counter(&self, feature: &str, now: i64) -> Result<UsageCounter> {
        match ledger::read_usage(&self.storage, feature) {
            Ok(Some(counter)) => Ok(counter),
            Ok(None) => Ok(UsageCounter::new(feature.to_string(), now)),
            Err(Error::CorruptRecord(reason)) => {
                warn!(feature, %reason, "resetting unreadable usage counter");
                Ok(UsageCounter::new(feature.to_string(), now))
            }
            Err(e) => Err(e),
        }
    }
}
