//! Key-value persistence contract for the session store.
//!
//! The production deployment points this at an external store with
//! per-key TTL (the gateway only depends on the trait). The in-memory
//! implementation backs tests and single-process runs.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use mando_domain::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Narrow contract over the external KV store: get/set/delete with
/// per-key TTL, plus an expiry scan for the cleanup sweep.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    /// Read a key. Expired keys read as absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a key. `ttl = None` persists without expiry.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Renew the TTL of an existing key. Missing keys are a no-op.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Keys under `prefix` whose TTL elapsed before `now` but which have
    /// not been physically removed yet.
    async fn scan_expired(&self, prefix: &str, now: DateTime<Utc>) -> Result<Vec<String>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Entry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

/// In-process reference implementation of [`KvStore`].
#[derive(Default)]
pub struct InMemoryKv {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn deadline(ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        ttl.map(|d| Utc::now() + chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero()))
    }

    /// Number of live entries (test helper).
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait::async_trait]
impl KvStore for InMemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read();
        Ok(entries.get(key).and_then(|e| {
            match e.expires_at {
                Some(deadline) if deadline <= Utc::now() => None,
                _ => Some(e.value.clone()),
            }
        }))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let mut entries = self.entries.write();
        entries.insert(
            key.to_owned(),
            Entry {
                value,
                expires_at: Self::deadline(ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Self::deadline(Some(ttl));
        }
        Ok(())
    }

    async fn scan_expired(&self, prefix: &str, now: DateTime<Utc>) -> Result<Vec<String>> {
        let entries = self.entries.read();
        let mut expired: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| {
                key.starts_with(prefix)
                    && entry.expires_at.is_some_and(|deadline| deadline <= now)
            })
            .map(|(key, _)| key.clone())
            .collect();
        expired.sort();
        Ok(expired)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
