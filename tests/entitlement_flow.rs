use entitlement_meter::clock::ManualClock;
use entitlement_meter::engine::{EntitlementEngine, GateDecision, PaywallReason, Remaining, TrackOutcome};
use entitlement_meter::state::{ledger, FeaturePolicy, PlanCatalog, ResetPolicy, UsageCounter};
use entitlement_meter::storage::{FileStorage, MemoryStorage, Storage};
use entitlement_meter::store::{PurchaseProvider, SimulatedStore};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

const DAY: i64 = 86_400;
const PERIOD: i64 = 30 * DAY;
const START: i64 = 1_700_000_000;

type FileEngine = EntitlementEngine<Arc<FileStorage>, ManualClock, SimulatedStore<Arc<FileStorage>>>;
type MemEngine = EntitlementEngine<Arc<MemoryStorage>, ManualClock, SimulatedStore<MemoryStorage>>;

fn open_file_engine(dir: &TempDir, clock: &ManualClock) -> FileEngine {
    let storage = Arc::new(FileStorage::with_dir(dir.path().join("kv")));
    let store = SimulatedStore::new(storage.clone(), PlanCatalog::default_catalog(), PERIOD);
    EntitlementEngine::open(storage, clock.clone(), store, FeaturePolicy::default_catalog()).unwrap()
}

fn open_mem_engine(policy: FeaturePolicy) -> (MemEngine, Arc<MemoryStorage>, ManualClock) {
    let storage = Arc::new(MemoryStorage::new());
    let clock = ManualClock::new(START);
    let store = SimulatedStore::new(MemoryStorage::new(), PlanCatalog::default_catalog(), PERIOD);
    let engine = EntitlementEngine::open(storage.clone(), clock.clone(), store, policy).unwrap();
    (engine, storage, clock)
}

fn seed_usage<S: Storage>(storage: &S, feature: &str, count: u64) {
    let counter = UsageCounter {
        feature: feature.to_string(),
        count,
        period_start: START,
    };
    ledger::write_usage(storage, &counter).unwrap();
}

fn single_quota_policy(feature: &str, quota: u64) -> FeaturePolicy {
    let mut quotas = BTreeMap::new();
    quotas.insert(feature.to_string(), quota);
    FeaturePolicy::new(BTreeSet::new(), BTreeSet::new(), quotas, ResetPolicy::Never).unwrap()
}

/// Free user meters through the quota, subscribes, cancels, and lapses.
#[test]
fn test_free_to_paid_lifecycle() {
    let temp_dir = TempDir::new().unwrap();
    let clock = ManualClock::new(START);
    let engine = open_file_engine(&temp_dir, &clock);

    // 1. Free tier: three skill guides allowed
    for expected in 1..=3 {
        assert_eq!(
            engine.track_usage("skill_guides").unwrap(),
            TrackOutcome::Accepted { count: expected }
        );
    }
    assert_eq!(
        engine.authorize("skill_guides").unwrap(),
        GateDecision::Paywall {
            feature: "skill_guides".to_string(),
            reason: PaywallReason::QuotaExhausted { quota: 3 },
        }
    );

    // 2. Subscribe: unlimited
    assert!(engine.purchase_subscription("pro"));
    assert!(engine.is_subscribed());
    assert_eq!(engine.remaining_usage("skill_guides").unwrap(), Remaining::Unlimited);
    assert!(engine.authorize("skill_guides").unwrap().is_allowed());
    assert!(engine.has_feature_access("offline_access"));

    // 3. Cancel: still active until expiry
    assert!(engine.cancel_subscription());
    clock.advance(PERIOD - DAY);
    assert!(engine.is_subscribed());

    // 4. Lapse: back to the free tier with usage intact
    clock.advance(DAY);
    assert!(!engine.is_subscribed());
    assert!(!engine.has_feature_access("offline_access"));
    assert_eq!(engine.usage("skill_guides").unwrap(), 4);
    assert_eq!(engine.remaining_usage("skill_guides").unwrap(), Remaining::Limited(0));
    assert!(!engine.track_usage("skill_guides").unwrap().is_allowed());
}

/// Ledger survives a restart of the engine.
#[test]
fn test_ledger_persists_across_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let clock = ManualClock::new(START);

    {
        let engine = open_file_engine(&temp_dir, &clock);
        engine.track_usage("business_assets").unwrap();
        engine.track_usage("business_assets").unwrap();
        assert!(engine.purchase_subscription("basic"));
        assert!(engine.cancel_subscription());
    }

    let engine = open_file_engine(&temp_dir, &clock);
    let record = engine.subscription().unwrap();
    assert_eq!(record.plan_id, "basic");
    assert!(!record.auto_renew);
    assert!(engine.is_subscribed());
    assert_eq!(engine.usage("business_assets").unwrap(), 2);
}

/// Restore re-derives the record from the store after local state is lost.
#[test]
fn test_restore_after_local_loss() {
    let store_dir = TempDir::new().unwrap();
    let store_storage = Arc::new(FileStorage::with_dir(store_dir.path().join("store")));
    let clock = ManualClock::new(START);

    let first = EntitlementEngine::open(
        Arc::new(MemoryStorage::new()),
        clock.clone(),
        SimulatedStore::new(store_storage.clone(), PlanCatalog::default_catalog(), PERIOD),
        FeaturePolicy::default_catalog(),
    )
    .unwrap();
    assert!(first.purchase_subscription("premium"));

    let second = EntitlementEngine::open(
        Arc::new(MemoryStorage::new()),
        clock.clone(),
        SimulatedStore::new(store_storage, PlanCatalog::default_catalog(), PERIOD),
        FeaturePolicy::default_catalog(),
    )
    .unwrap();
    assert!(!second.is_subscribed());
    assert!(second.restore_purchases());
    assert!(second.is_subscribed());
    assert_eq!(second.subscription().unwrap().expires_at, START + PERIOD);
}

#[test]
fn test_business_assets_scenario() {
    let (engine, storage, _) = open_mem_engine(FeaturePolicy::default_catalog());
    seed_usage(storage.as_ref(), "business_assets", 8);

    assert_eq!(engine.remaining_usage("business_assets").unwrap(), Remaining::Limited(2));
    assert!(engine.track_usage("business_assets").unwrap().is_allowed());
    assert!(engine.track_usage("business_assets").unwrap().is_allowed());
    assert_eq!(engine.usage("business_assets").unwrap(), 10);
    assert_eq!(
        engine.track_usage("business_assets").unwrap(),
        TrackOutcome::LimitReached {
            feature: "business_assets".to_string(),
            quota: 10,
        }
    );
}

#[test]
fn test_allowlist_ignores_usage_and_subscription() {
    let (engine, storage, _) = open_mem_engine(FeaturePolicy::default_catalog());
    seed_usage(storage.as_ref(), "basic_explanations", 1_000);
    assert!(!engine.is_subscribed());
    assert!(engine.has_feature_access("basic_explanations"));
    assert_eq!(engine.authorize("basic_explanations").unwrap(), GateDecision::Allow);
}

#[test]
fn test_expiry_is_lazy() {
    let (engine, _, clock) = open_mem_engine(FeaturePolicy::default_catalog());
    assert!(engine.purchase_subscription("pro"));
    assert_eq!(engine.subscription().unwrap().expires_at, START + 30 * DAY);

    clock.advance(30 * DAY + 1);
    assert!(!engine.is_subscribed());
    // Repurchase overwrites the lapsed record
    assert!(engine.purchase_subscription("pro"));
    assert!(engine.is_subscribed());
}

#[test]
fn test_remaining_is_idempotent() {
    let (engine, storage, _) = open_mem_engine(FeaturePolicy::default_catalog());
    seed_usage(storage.as_ref(), "ai_explanations", 45);
    let first = engine.remaining_usage("ai_explanations").unwrap();
    let second = engine.remaining_usage("ai_explanations").unwrap();
    assert_eq!(first, Remaining::Limited(5));
    assert_eq!(first, second);
}

/// Two racing calls for the last unit: exactly one wins.
#[test]
fn test_concurrent_last_unit() {
    for _ in 0..50 {
        let (engine, storage, _) = open_mem_engine(FeaturePolicy::default_catalog());
        seed_usage(storage.as_ref(), "skill_guides", 2);
        let engine = Arc::new(engine);
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    engine.track_usage("skill_guides").unwrap()
                })
            })
            .collect();

        let outcomes: Vec<TrackOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let accepted = outcomes.iter().filter(|o| o.is_allowed()).count();
        assert_eq!(accepted, 1, "outcomes: {:?}", outcomes);
        assert_eq!(engine.usage("skill_guides").unwrap(), 3);
    }
}

/// Many threads hammering one feature never exceed its quota.
#[test]
fn test_concurrent_quota_on_disk() {
    let temp_dir = TempDir::new().unwrap();
    let clock = ManualClock::new(START);
    let engine = Arc::new(open_file_engine(&temp_dir, &clock));
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..5)
                    .filter(|_| engine.track_usage("business_assets").unwrap().is_allowed())
                    .count()
            })
        })
        .collect();

    let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(accepted, 10);
    assert_eq!(engine.usage("business_assets").unwrap(), 10);
}

/// A purchase racing a cancellation leaves one coherent record.
#[test]
fn test_purchase_races_cancel() {
    let (engine, _, clock) = open_mem_engine(FeaturePolicy::default_catalog());
    assert!(engine.purchase_subscription("basic"));
    clock.advance(DAY);
    let engine = Arc::new(engine);

    let buyer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.purchase_subscription("pro"))
    };
    let canceller = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.cancel_subscription())
    };
    assert!(buyer.join().unwrap());
    assert!(canceller.join().unwrap());

    let record = engine.subscription().unwrap();
    match record.plan_id.as_str() {
        // Cancel ran last and applied to the new purchase
        "pro" if !record.auto_renew => assert_eq!(record.expires_at, START + DAY + PERIOD),
        // Purchase ran last and replaced the cancelled record
        "pro" => assert!(record.auto_renew),
        other => panic!("unexpected plan {}", other),
    }
}

/// After racing purchase and cancel, the store receipt and the ledger agree.
#[test]
fn test_purchase_cancel_race_keeps_store_and_ledger_in_step() {
    for _ in 0..50 {
        let (engine, _, clock) = open_mem_engine(FeaturePolicy::default_catalog());
        assert!(engine.purchase_subscription("basic"));
        clock.advance(DAY);
        let engine = Arc::new(engine);
        let barrier = Arc::new(Barrier::new(2));

        let buyer = {
            let (engine, barrier) = (Arc::clone(&engine), Arc::clone(&barrier));
            thread::spawn(move || {
                barrier.wait();
                engine.purchase_subscription("pro")
            })
        };
        let canceller = {
            let (engine, barrier) = (Arc::clone(&engine), Arc::clone(&barrier));
            thread::spawn(move || {
                barrier.wait();
                engine.cancel_subscription()
            })
        };
        assert!(buyer.join().unwrap());
        assert!(canceller.join().unwrap());

        let record = engine.subscription().unwrap();
        assert_eq!(record.plan_id, "pro");
        assert_eq!(record.expires_at, START + DAY + PERIOD);
        let receipt = engine.provider().restore(START + DAY).unwrap().unwrap();
        assert_eq!(receipt.into_record(), record);
    }
}

#[test]
fn test_unknown_feature_denied_for_free_user() {
    let (engine, _, _) = open_mem_engine(FeaturePolicy::default_catalog());
    for feature in ["time_travel", "holograms", ""] {
        assert!(!engine.has_feature_access(feature));
        assert!(!engine.authorize(feature).unwrap().is_allowed());
    }
}

proptest! {
    #[test]
    fn prop_count_never_exceeds_quota(quota in 0u64..20, calls in 0usize..40) {
        let (engine, _, _) = open_mem_engine(single_quota_policy("summaries", quota));
        let mut accepted = 0u64;
        for _ in 0..calls {
            match engine.track_usage("summaries").unwrap() {
                TrackOutcome::Accepted { .. } => accepted += 1,
                TrackOutcome::LimitReached { .. } => {}
                TrackOutcome::Unmetered => prop_assert!(false, "metered feature reported unmetered"),
            }
        }
        let used = engine.usage("summaries").unwrap();
        prop_assert_eq!(accepted, used);
        prop_assert!(used <= quota);
        prop_assert_eq!(used, quota.min(calls as u64));
        prop_assert_eq!(
            engine.remaining_usage("summaries").unwrap(),
            Remaining::Limited(quota - used)
        );
    }

    #[test]
    fn prop_subscriber_never_denied(calls in 1usize..30) {
        let (engine, _, _) = open_mem_engine(single_quota_policy("summaries", 0));
        prop_assert!(engine.purchase_subscription("pro"));
        for _ in 0..calls {
            prop_assert!(engine.track_usage("summaries").unwrap().is_allowed());
        }
        prop_assert_eq!(engine.remaining_usage("summaries").unwrap(), Remaining::Unlimited);
    }
}
