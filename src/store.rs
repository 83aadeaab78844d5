//! Store-purchase provider: the platform that actually sells subscriptions.
//!
//! `SimulatedStore` stands in for a commercial in-app-purchase service. It
//! keeps its own receipt under a separate storage key so restores work
//! across process restarts.

use crate::error::{Error, Result};
use crate::state::ledger;
use crate::state::{PlanCatalog, SubscriptionRecord, SubscriptionStatus};
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

const RECEIPT_KEY: &str = "store:receipt";

/// Store of record's view of an entitlement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Receipt {
    pub plan_id: String,
    pub expires_at: i64,
    pub auto_renew: bool,
    /// Refunded or revoked by the store
    pub revoked: bool,
}

impl Receipt {
    pub fn into_record(self) -> SubscriptionRecord {
        SubscriptionRecord {
            plan_id: self.plan_id,
            status: if self.revoked {
                SubscriptionStatus::Cancelled
            } else {
                SubscriptionStatus::Active
            },
            expires_at: self.expires_at,
            auto_renew: self.auto_renew,
        }
    }
}

pub trait PurchaseProvider: Send + Sync {
    /// Buy `plan_id`. `Err` means the store declined or was unreachable.
    fn purchase(&self, plan_id: &str, now: i64) -> Result<Receipt>;

    /// Latest receipt held by the store, if any.
    fn restore(&self, now: i64) -> Result<Option<Receipt>>;

    /// Turn off renewal at the store.
    fn cancel_renewal(&self) -> Result<()> {
        Ok(())
    }
}

/// Simulated store: sells any plan in its catalog for a fixed period.
///
/// Every read-modify-write of the receipt holds `receipt_lock`, so a
/// cancellation can never write back a receipt that a purchase replaced.
pub struct SimulatedStore<S: Storage> {
    storage: S,
    catalog: PlanCatalog,
    period_secs: i64,
    offline: AtomicBool,
    receipt_lock: Mutex<()>,
}

impl<S: Storage> SimulatedStore<S> {
    pub fn new(storage: S, catalog: PlanCatalog, period_secs: i64) -> Self {
        SimulatedStore {
            storage,
            catalog,
            period_secs,
            offline: AtomicBool::new(false),
            receipt_lock: Mutex::new(()),
        }
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    /// Simulate the store being unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Simulate a refund: the held receipt becomes revoked.
    pub fn revoke(&self) -> Result<()> {
        let _guard = self.lock_receipt();
        if let Some(mut receipt) = self.load_receipt()? {
            receipt.revoked = true;
            receipt.auto_renew = false;
            ledger::write(&self.storage, RECEIPT_KEY, &receipt)?;
        }
        Ok(())
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Purchase("store unreachable".to_string()));
        }
        Ok(())
    }

    fn lock_receipt(&self) -> MutexGuard<'_, ()> {
        self.receipt_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load_receipt(&self) -> Result<Option<Receipt>> {
        ledger::read(&self.storage, RECEIPT_KEY)
            .map_err(|e| Error::Purchase(format!("receipt unavailable: {}", e)))
    }
}

impl<S: Storage> PurchaseProvider for SimulatedStore<S> {
    fn purchase(&self, plan_id: &str, now: i64) -> Result<Receipt> {
        self.ensure_online()?;
        if !self.catalog.contains(plan_id) {
            return Err(Error::Purchase(format!("unknown plan {}", plan_id)));
        }

        let receipt = Receipt {
            plan_id: plan_id.to_string(),
            expires_at: now.saturating_add(self.period_secs),
            auto_renew: true,
            revoked: false,
        };
        let _guard = self.lock_receipt();
        ledger::write(&self.storage, RECEIPT_KEY, &receipt)
            .map_err(|e| Error::Purchase(format!("receipt not recorded: {}", e)))?;
        Ok(receipt)
    }

    fn restore(&self, _now: i64) -> Result<Option<Receipt>> {
        self.ensure_online()?;
        let _guard = self.lock_receipt();
        self.load_receipt()
    }

    fn cancel_renewal(&self) -> Result<()> {
        self.ensure_online()?;
        let _guard = self.lock_receipt();
        if let Some(mut receipt) = self.load_receipt()? {
            receipt.auto_renew = false;
            ledger::write(&self.storage, RECEIPT_KEY, &receipt)
                .map_err(|e| Error::Purchase(format!("receipt not recorded: {}", e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn store() -> SimulatedStore<MemoryStorage> {
        SimulatedStore::new(MemoryStorage::new(), PlanCatalog::default_catalog(), 100)
    }

    #[test]
    fn test_purchase_known_plan() {
        let store = store();
        let receipt = store.purchase("pro", 1_000).unwrap();
        assert_eq!(receipt.expires_at, 1_100);
        assert!(receipt.auto_renew);
        assert_eq!(store.restore(1_001).unwrap(), Some(receipt));
    }

    #[test]
    fn test_purchase_unknown_plan() {
        let store = store();
        assert!(matches!(
            store.purchase("platinum", 0),
            Err(Error::Purchase(_))
        ));
        assert!(store.restore(0).unwrap().is_none());
    }

    #[test]
    fn test_offline() {
        let store = store();
        store.set_offline(true);
        assert!(store.purchase("pro", 0).is_err());
        assert!(store.restore(0).is_err());
    }

    #[test]
    fn test_revoke_maps_to_cancelled() {
        let store = store();
        store.purchase("basic", 0).unwrap();
        store.revoke().unwrap();
        let record = store.restore(0).unwrap().unwrap().into_record();
        assert_eq!(record.status, SubscriptionStatus::Cancelled);
        assert!(!record.is_active_at(1));
    }

    #[test]
    fn test_cancel_renewal() {
        let store = store();
        store.purchase("pro", 0).unwrap();
        store.cancel_renewal().unwrap();
        assert!(!store.restore(0).unwrap().unwrap().auto_renew);
    }

    #[test]
    fn test_cancel_never_overwrites_newer_purchase() {
        for _ in 0..50 {
            let store = Arc::new(store());
            store.purchase("basic", 0).unwrap();
            let barrier = Arc::new(Barrier::new(2));

            let buyer = {
                let (store, barrier) = (Arc::clone(&store), Arc::clone(&barrier));
                thread::spawn(move || {
                    barrier.wait();
                    store.purchase("pro", 10).unwrap()
                })
            };
            let canceller = {
                let (store, barrier) = (Arc::clone(&store), Arc::clone(&barrier));
                thread::spawn(move || {
                    barrier.wait();
                    store.cancel_renewal().unwrap()
                })
            };
            buyer.join().unwrap();
            canceller.join().unwrap();

            let receipt = store.restore(10).unwrap().unwrap();
            assert_eq!(receipt.plan_id, "pro");
            assert_eq!(receipt.expires_at, 110);
        }
    }
}
