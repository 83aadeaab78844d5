pub mod kv;
pub mod memory;

pub use kv::FileStorage;
pub use memory::MemoryStorage;

use crate::error::Result;
use std::sync::Arc;

/// Durable key-value store backing the ledger.
///
/// Implementations must preserve:
/// - Read-after-write consistency for a single key
/// - All-or-nothing writes: a reader sees the old bytes or the new bytes, never a mix
///
/// Nothing is promised across keys.
pub trait Storage: Send + Sync {
    /// Load the bytes stored under `key`, or `None` if never written.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Durably replace the bytes under `key`.
    fn save(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

impl<S: Storage + ?Sized> Storage for Arc<S> {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).load(key)
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        (**self).save(key, bytes)
    }
}
