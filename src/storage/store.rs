//! In-memory key-value store
//!
//! One `RwLock` guards the whole map. Readers share the lock, every mutation takes
//! it exclusively, and no method calls back into the store while holding it.

use crate::storage::item::Item;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::trace;

/// Thread-safe expiring map from string keys to items
#[derive(Debug, Default)]
pub struct Store {
    items: RwLock<HashMap<String, Item>>,
}

impl Store {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a value that never expires
    pub fn set(&self, key: impl Into<String>, value: impl Into<Bytes>) {
        let item = Item::new(value.into());
        self.items.write().insert(key.into(), item);
    }

    /// Insert or overwrite a value expiring `ttl` from now (zero = no expiry)
    pub fn set_with_ttl(&self, key: impl Into<String>, value: impl Into<Bytes>, ttl: Duration) {
        let item = Item::with_ttl(value.into(), ttl);
        self.items.write().insert(key.into(), item);
    }

    /// Get a value by key (with lazy expiration)
    ///
    /// Expired entries are reported as missing but left in place for the sweep.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let items = self.items.read();
        match items.get(key) {
            Some(item) if !item.is_expired() => Some(item.data.clone()),
            Some(_) => {
                trace!(key, "Lazy expiration: hiding expired key");
                None
            }
            None => None,
        }
    }

    /// Delete a key
    ///
    /// Returns `true` if a live entry was removed. Deleting a missing key is a no-op.
    pub fn delete(&self, key: &str) -> bool {
        self.items
            .write()
            .remove(key)
            .is_some_and(|item| !item.is_expired())
    }

    /// Remove every entry
    pub fn purge(&self) {
        let old = std::mem::take(&mut *self.items.write());
        // The old map is freed after the write lock is released
        drop(old);
    }

    /// Number of live (non-expired) entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.items
            .read()
            .values()
            .filter(|item| !item.is_expired_at(now))
            .count()
    }

    /// Returns true if the store holds no live entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all live keys, in no particular order
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        self.items
            .read()
            .iter()
            .filter(|(_, item)| !item.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Physically delete every expired entry; returns how many were removed
    pub fn remove_expired(&self) -> usize {
        let now = Instant::now();
        let mut items = self.items.write();
        let before = items.len();
        items.retain(|_, item| !item.is_expired_at(now));
        before - items.len()
    }

    /// Raw entry count including expired-but-unswept items
    #[cfg(test)]
    fn raw_len(&self) -> usize {
        self.items.read().len()
    }
}
