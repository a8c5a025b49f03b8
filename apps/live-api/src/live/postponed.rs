//! Time-bounded store for requests waiting on a later asynchronous event.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::error::LiveError;

/// A request suspended until, for example, its scene attaches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PendingRequest {
    pub path: String,
    #[serde(default)]
    pub payload: Value,
    pub postponed_at: DateTime<Utc>,
}

impl PendingRequest {
    pub fn new(path: impl Into<String>, payload: Value) -> Self {
        Self {
            path: path.into(),
            payload,
            postponed_at: Utc::now(),
        }
    }
}

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// Key→value cache whose entries expire `max_age` after insertion, whether
/// or not they were read in between.
///
/// Expired entries are evicted lazily on lookup and in bulk by
/// [`PostponedCache::evict_expired`]. Keys are expected to be random tokens.
pub struct PostponedCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    max_age: Duration,
}

impl<V: Clone> PostponedCache<V> {
    pub fn new(max_age: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            max_age,
        }
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Look up a live entry without consuming it.
    pub fn get(&self, key: &str) -> Result<V, LiveError> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.max_age => {
                return Ok(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove(key);
        }
        Err(LiveError::PostponedNotFound(key.to_string()))
    }

    /// Remove and return a live entry.
    pub fn take(&self, key: &str) -> Result<V, LiveError> {
        match self.entries.remove(key) {
            Some((_, entry)) if entry.inserted_at.elapsed() < self.max_age => Ok(entry.value),
            _ => Err(LiveError::PostponedNotFound(key.to_string())),
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let before = self.entries.len();
        let max_age = self.max_age;
        self.entries.retain(|_, entry| entry.inserted_at.elapsed() < max_age);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
