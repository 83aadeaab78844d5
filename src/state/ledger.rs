//! Ledger layout in the key-value store.
//!
//! Each record lives under its own key so a write never spans keys:
//! - `subscription`: bincode `SubscriptionRecord`
//! - `usage:<feature>`: bincode `UsageCounter`

use super::{SubscriptionRecord, UsageCounter};
use crate::error::{Error, Result};
use crate::storage::Storage;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub const SUBSCRIPTION_KEY: &str = "subscription";
const USAGE_PREFIX: &str = "usage:";

pub fn usage_key(feature: &str) -> String {
    format!("{}{}", USAGE_PREFIX, feature)
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value)
        .map_err(|e| Error::Persistence(format!("Failed to serialize record: {}", e)))
}

pub fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes)
        .map_err(|e| Error::CorruptRecord(format!("{}: {}", key, e)))
}

/// Read and decode `key`.
///
/// Absent keys are `Ok(None)`; unreadable bytes are `Err(CorruptRecord)`.
pub fn read<S: Storage + ?Sized, T: DeserializeOwned>(storage: &S, key: &str) -> Result<Option<T>> {
    match storage.load(key)? {
        Some(bytes) => decode(key, &bytes).map(Some),
        None => Ok(None),
    }
}

pub fn write<S: Storage + ?Sized, T: Serialize>(storage: &S, key: &str, value: &T) -> Result<()> {
    let bytes = encode(value)?;
    storage.save(key, &bytes)
}

pub fn read_subscription<S: Storage + ?Sized>(storage: &S) -> Result<Option<SubscriptionRecord>> {
    read(storage, SUBSCRIPTION_KEY)
}

pub fn write_subscription<S: Storage + ?Sized>(
    storage: &S,
    record: &SubscriptionRecord,
) -> Result<()> {
    write(storage, SUBSCRIPTION_KEY, record)
}

pub fn read_usage<S: Storage + ?Sized>(storage: &S, feature: &str) -> Result<Option<UsageCounter>> {
    read(storage, &usage_key(feature))
}

pub fn write_usage<S: Storage + ?Sized>(storage: &S, counter: &UsageCounter) -> Result<()> {
    write(storage, &usage_key(&counter.feature), counter)
}
