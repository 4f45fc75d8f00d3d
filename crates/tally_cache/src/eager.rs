//! Eager Cache
//!
//! An in-memory cache that lives for the whole process. When bound to a
//! backend, every entry is loaded at once from a single backend key and written
//! back in one go by [`EagerCache::persist_if_needed`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use serde_json::{Map, Value};

use crate::{CacheError, CacheResult, CacheService};

/// Backend binding for an eager cache
struct Persistence {
    backend: Arc<dyn CacheService>,
    storage_key: String,
}

/// Process-scoped in-memory cache
pub struct EagerCache {
    entries: DashMap<String, Value>,
    /// Set when entries changed since the last load/persist
    dirty: AtomicBool,
    persistence: Option<Persistence>,
}

impl Default for EagerCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EagerCache {
    /// Create an empty cache with no backend
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            dirty: AtomicBool::new(false),
            persistence: None,
        }
    }

    /// Create a cache bound to `backend`, loading whatever was persisted under
    /// `storage_key`
    ///
    /// A backend that cannot be read yields an empty cache; the failure is
    /// logged and the next persist will try again.
    pub fn with_backend(backend: Arc<dyn CacheService>, storage_key: impl Into<String>) -> Self {
        let storage_key = storage_key.into();
        let entries = DashMap::new();

        match Self::load_snapshot(backend.as_ref(), &storage_key) {
            Ok(Some(snapshot)) => {
                tracing::debug!(
                    storage_key = %storage_key,
                    entries = snapshot.len(),
                    "Loaded eager cache snapshot"
                );
                for (key, value) in snapshot {
                    entries.insert(key, value);
                }
            }
            Ok(None) => {
                tracing::debug!(storage_key = %storage_key, "No eager cache snapshot yet");
            }
            Err(e) => {
                tracing::warn!(
                    storage_key = %storage_key,
                    error = %e,
                    "Failed to load eager cache snapshot, starting empty"
                );
            }
        }

        Self {
            entries,
            dirty: AtomicBool::new(false),
            persistence: Some(Persistence {
                backend,
                storage_key,
            }),
        }
    }

    fn load_snapshot(
        backend: &dyn CacheService,
        storage_key: &str,
    ) -> CacheResult<Option<Map<String, Value>>> {
        if !backend.contains(storage_key)? {
            return Ok(None);
        }

        match backend.fetch(storage_key)? {
            Value::Object(map) => Ok(Some(map)),
            other => Err(CacheError::Unavailable(format!(
                "eager cache snapshot is not an object: {}",
                other
            ))),
        }
    }

    /// Whether entries changed since the last load or persist
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Write all entries to the backend if anything changed
    ///
    /// Returns `true` when a snapshot was written. Without a backend this is a
    /// no-op.
    pub fn persist_if_needed(&self) -> CacheResult<bool> {
        let Some(persistence) = &self.persistence else {
            return Ok(false);
        };

        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }

        let snapshot: Map<String, Value> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        if let Err(e) = persistence
            .backend
            .save(&persistence.storage_key, Value::Object(snapshot))
        {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(e);
        }

        tracing::debug!(storage_key = %persistence.storage_key, "Persisted eager cache");
        Ok(true)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheService for EagerCache {
    fn contains(&self, key: &str) -> CacheResult<bool> {
        Ok(self.entries.contains_key(key))
    }

    fn fetch(&self, key: &str) -> CacheResult<Value> {
        self.entries
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CacheError::Missing(key.to_string()))
    }

    fn save(&self, key: &str, value: Value) -> CacheResult<()> {
        self.entries.insert(key.to_string(), value);
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self, key: &str) -> CacheResult<bool> {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.dirty.store(true, Ordering::SeqCst);
        }
        Ok(removed)
    }

    fn flush_all(&self) -> CacheResult<()> {
        if !self.entries.is_empty() {
            self.entries.clear();
            self.dirty.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}
