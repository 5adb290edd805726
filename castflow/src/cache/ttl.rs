//! TTL cache persisted to a single JSON index.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::utils::{read_json, write_json_atomic, Clock, SystemClock, Timestamp};

/// Default entry lifetime: one day.
pub const DEFAULT_TTL_SECONDS: u64 = 86_400;

/// One cached value as stored in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// When the value was stored.
    pub timestamp: Timestamp,
    /// Lifetime in seconds.
    pub ttl: u64,
    /// The cached value.
    pub data: Value,
}

impl CacheEntry {
    /// Returns true while `now - timestamp < ttl`.
    #[must_use]
    pub fn is_fresh(&self, now: Timestamp) -> bool {
        let ttl_ms = i64::try_from(self.ttl).unwrap_or(i64::MAX).saturating_mul(1000);
        (now - self.timestamp).num_milliseconds() < ttl_ms
    }
}

/// Keyed storage with expiry.
///
/// Every mutating call rewrites the whole index file through a temp file
/// and an atomic rename. Write failures are logged; the in-memory table stays
/// authoritative. Assumes a single writing process per index file.
#[derive(Debug)]
pub struct TtlCache {
    entries: Mutex<BTreeMap<String, CacheEntry>>,
    index_path: Option<PathBuf>,
    default_ttl: u64,
    clock: Arc<dyn Clock>,
}

impl TtlCache {
    /// Opens the cache backed by `index_path`, loading any existing index.
    ///
    /// An unreadable index is logged and the cache starts empty.
    #[must_use]
    pub fn open(index_path: impl Into<PathBuf>, default_ttl: u64) -> Self {
        let index_path = index_path.into();
        let entries = match read_json::<BTreeMap<String, CacheEntry>>(&index_path) {
            Ok(Some(entries)) => entries,
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!(path = %index_path.display(), error = %e, "Ignoring unreadable cache index");
                BTreeMap::new()
            }
        };
        debug!(path = %index_path.display(), entries = entries.len(), "Opened cache");
        Self {
            entries: Mutex::new(entries),
            index_path: Some(index_path),
            default_ttl,
            clock: Arc::new(SystemClock),
        }
    }

    /// Creates a cache that is never written to disk.
    #[must_use]
    pub fn in_memory(default_ttl: u64) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            index_path: None,
            default_ttl,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock used for timestamps and expiry.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the index path, if persisted.
    #[must_use]
    pub fn index_path(&self) -> Option<&Path> {
        self.index_path.as_deref()
    }

    /// Returns the default TTL in seconds.
    #[must_use]
    pub fn default_ttl(&self) -> u64 {
        self.default_ttl
    }

    /// Returns the value for `key` if it has not expired.
    ///
    /// Expired entries are left in place for [`TtlCache::cleanup`].
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        self.entries
            .lock()
            .get(key)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| entry.data.clone())
    }

    /// Stores `data` under `key` with `ttl` seconds, or the default TTL.
    pub fn set(&self, key: impl Into<String>, data: Value, ttl: Option<u64>) {
        let entry = CacheEntry {
            timestamp: self.clock.now(),
            ttl: ttl.unwrap_or(self.default_ttl),
            data,
        };
        let mut entries = self.entries.lock();
        entries.insert(key.into(), entry);
        self.persist(&entries);
    }

    /// Removes `key`. Returns true if it was present.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut entries = self.entries.lock();
        let removed = entries.remove(key).is_some();
        if removed {
            self.persist(&entries);
        }
        removed
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.clear();
        self.persist(&entries);
    }

    /// Removes expired entries and returns how many were dropped.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now));
        let removed = before - entries.len();
        if removed > 0 {
            self.persist(&entries);
        }
        debug!(removed, "Cache cleanup");
        removed
    }

    /// Returns the number of stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn persist(&self, entries: &BTreeMap<String, CacheEntry>) {
        let Some(path) = &self.index_path else {
            return;
        };
        if let Err(e) = write_json_atomic(path, entries) {
            warn!(path = %path.display(), error = %e, "Failed to write cache index");
        }
    }
}
