//! Shared key-value store abstraction
//!
//! The sync protocol only needs string put/get with TTL plus a small
//! hash-per-key map. [`RedisStore`](super::RedisStore) backs this in
//! deployments; [`MemoryStore`] is an in-process stand-in with the same
//! expiry semantics, used by tests and single-process setups.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;

use crate::{Error, Result};

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Overwrite `key` with `value`, (re)setting its TTL.
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set one field of the hash at `key` and refresh the whole key's TTL.
    async fn hash_put(&self, key: &str, field: &str, value: String, ttl: Duration) -> Result<()>;

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>>;

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Cheapest possible round trip.
    async fn ping(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
enum StoredValue {
    Text(String),
    Hash(Arc<HashMap<String, String>>),
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: StoredValue,
    ttl: Duration,
}

/// Each entry expires after its own TTL, restarted on every write.
struct PerEntryTtl;

impl Expiry<String, StoredEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

fn wrong_type(key: &str) -> Error {
    Error::InvalidInput(format!(
        "WRONGTYPE operation against key \"{key}\" holding the wrong kind of value"
    ))
}

/// In-process store backed by a Moka cache
#[derive(Clone)]
pub struct MemoryStore {
    entries: moka::future::Cache<String, StoredEntry>,
}

impl MemoryStore {
    /// Default maximum number of keys
    pub const DEFAULT_CAPACITY: u64 = 10_000;

    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(max_capacity: u64) -> Self {
        Self {
            entries: moka::future::Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.entries
            .insert(
                key.to_string(),
                StoredEntry {
                    value: StoredValue::Text(value),
                    ttl,
                },
            )
            .await;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entries.get(key).await.map(|entry| entry.value) {
            None => Ok(None),
            Some(StoredValue::Text(value)) => Ok(Some(value)),
            Some(StoredValue::Hash(_)) => Err(wrong_type(key)),
        }
    }

    async fn hash_put(&self, key: &str, field: &str, value: String, ttl: Duration) -> Result<()> {
        if let Some(StoredEntry {
            value: StoredValue::Text(_),
            ..
        }) = self.entries.get(key).await
        {
            return Err(wrong_type(key));
        }

        let field = field.to_string();
        self.entries
            .entry(key.to_string())
            .and_upsert_with(|existing| {
                let mut fields = match existing.map(|entry| entry.into_value().value) {
                    Some(StoredValue::Hash(fields)) => (*fields).clone(),
                    _ => HashMap::new(),
                };
                fields.insert(field, value);
                std::future::ready(StoredEntry {
                    value: StoredValue::Hash(Arc::new(fields)),
                    ttl,
                })
            })
            .await;
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        match self.entries.get(key).await.map(|entry| entry.value) {
            None => Ok(None),
            Some(StoredValue::Hash(fields)) => Ok(fields.get(field).cloned()),
            Some(StoredValue::Text(_)) => Err(wrong_type(key)),
        }
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        match self.entries.get(key).await.map(|entry| entry.value) {
            None => Ok(HashMap::new()),
            Some(StoredValue::Hash(fields)) => Ok((*fields).clone()),
            Some(StoredValue::Text(_)) => Err(wrong_type(key)),
        }
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
