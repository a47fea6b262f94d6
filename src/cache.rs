//! In-memory token cache store
//!
//! A keyed blob store backing every identity client of a run. The identity
//! layer decides the keys and the blob format; the store only moves bytes
//! between the layer's [`Marshaler`]/[`Unmarshaler`] and its map.
//!
//! Cache trouble is never fatal: a failed marshal skips the write and a
//! failed unmarshal leaves the caller with whatever state it had, which the
//! identity layer treats as a cache miss.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::{debug, warn};

use crate::error::CacheError;

/// Serializes identity-layer state into a cache blob
pub trait Marshaler {
    fn marshal(&self) -> Result<Vec<u8>, CacheError>;
}

/// Rehydrates identity-layer state from a cache blob
pub trait Unmarshaler {
    fn unmarshal(&mut self, data: &[u8]) -> Result<(), CacheError>;
}

/// Cache plugin contract called by the identity layer
pub trait CacheAccessor: Send + Sync {
    /// Store the marshaled state under `key`, overwriting any prior value
    fn export(&self, marshaler: &dyn Marshaler, key: &str);

    /// Feed the blob stored under `key` (if any) into `unmarshaler`
    fn replace(&self, unmarshaler: &mut dyn Unmarshaler, key: &str);
}

/// Process-lifetime key → blob store shared by every identity client
#[derive(Debug, Default)]
pub struct TokenCacheStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl TokenCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Human-readable rendering of every entry, blobs pretty-printed as JSON
    pub fn dump(&self) -> String {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);

        let mut keys: Vec<&String> = entries.keys().collect();
        keys.sort();

        let mut out = String::new();
        for key in keys {
            let blob = &entries[key];
            let rendered = serde_json::from_slice::<serde_json::Value>(blob)
                .ok()
                .and_then(|value| serde_json::to_string_pretty(&value).ok())
                .unwrap_or_else(|| format!("<{} bytes, not JSON>", blob.len()));
            out.push_str(&format!("Key: '{}'\n{}\n", key, rendered));
        }
        out
    }
}

impl CacheAccessor for TokenCacheStore {
    fn export(&self, marshaler: &dyn Marshaler, key: &str) {
        let blob = match marshaler.marshal() {
            Ok(blob) => blob,
            Err(e) => {
                warn!(key = %key, error = %e, "Skipping cache write");
                return;
            }
        };

        debug!(key = %key, bytes = blob.len(), "Cache export");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), blob);
    }

    fn replace(&self, unmarshaler: &mut dyn Unmarshaler, key: &str) {
        // Copy out so the lock is not held while the identity layer parses
        let Some(blob) = self.get(key) else {
            debug!(key = %key, "Cache miss");
            return;
        };

        if let Err(e) = unmarshaler.unmarshal(&blob) {
            warn!(key = %key, error = %e, "Ignoring unreadable cache entry");
        }
    }
}
