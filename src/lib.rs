pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod logger;
pub mod state;
pub mod storage;
pub mod store;

pub use engine::{EntitlementEngine, GateDecision, PaywallReason, Remaining, TrackOutcome};

use sha2::{Digest, Sha256};

/// Get current Unix timestamp
pub fn current_timestamp() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Calculate SHA256 digest
pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}
