//! Hook: injectable observer for entitlement decisions.
//!
//! The presentation layer implements this to learn when a paywall is due
//! without polling the engine. Hooks observe; they cannot veto.

use super::SubscriptionRecord;
use std::sync::Mutex;

pub trait Hook: Send + Sync {
    /// Called after an invocation is durably counted.
    fn on_usage_recorded(&self, _feature: &str, _count: u64) {}

    /// Called when a free user hits the quota for `feature`.
    fn on_limit_reached(&self, _feature: &str, _quota: u64) {}

    /// Called after the subscription record is replaced or updated.
    fn on_subscription_changed(&self, _record: &SubscriptionRecord) {}
}

/// No-op hook: default when nothing listens.
#[derive(Debug, Clone, Default)]
pub struct NoOpHook;

impl Hook for NoOpHook {}

/// Events captured by `RecordingHook`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    UsageRecorded { feature: String, count: u64 },
    LimitReached { feature: String, quota: u64 },
    SubscriptionChanged { plan_id: String, auto_renew: bool },
}

/// Hook that keeps every event in order, for tests and audit trails.
#[derive(Debug, Default)]
pub struct RecordingHook {
    events: Mutex<Vec<HookEvent>>,
}

impl RecordingHook {
    pub fn new() -> Self {
        RecordingHook::default()
    }

    pub fn events(&self) -> Vec<HookEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    fn push(&self, event: HookEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl Hook for RecordingHook {
    fn on_usage_recorded(&self, feature: &str, count: u64) {
        self.push(HookEvent::UsageRecorded {
            feature: feature.to_string(),
            count,
        });
    }

    fn on_limit_reached(&self, feature: &str, quota: u64) {
        self.push(HookEvent::LimitReached {
            feature: feature.to_string(),
            quota,
        });
    }

    fn on_subscription_changed(&self, record: &SubscriptionRecord) {
        self.push(HookEvent::SubscriptionChanged {
            plan_id: record.plan_id.clone(),
            auto_renew: record.auto_renew,
        });
    }
}

impl<H: Hook + ?Sized> Hook for std::sync::Arc<H> {
    fn on_usage_recorded(&self, feature: &str, count: u64) {
        (**self).on_usage_recorded(feature, count)
    }

    fn on_limit_reached(&self, feature: &str, quota: u64) {
        (**self).on_limit_reached(feature, quota)
    }

    fn on_subscription_changed(&self, record: &SubscriptionRecord) {
        (**self).on_subscription_changed(record)
    }
}
