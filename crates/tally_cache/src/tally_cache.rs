//! Tally Cache - Key/value cache service used by the plugin activation layer
//!
//! The activation controller never talks to a concrete store. It only sees the
//! [`CacheService`] contract, so the process-scoped [`EagerCache`] can be
//! swapped for a [`FileCache`] (or a test fake) without touching callers.
//!
//! ## Backends
//!
//! - [`EagerCache`] - in-memory map, optionally loaded from and persisted to a
//!   slower backend under a single key
//! - [`FileCache`] - one JSON file per key in a directory

mod eager;
mod file;

pub use eager::EagerCache;
pub use file::FileCache;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Result type alias
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors returned by cache backends
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache entry not found: {0}")]
    Missing(String),

    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Unavailable(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cache Service Contract
// ─────────────────────────────────────────────────────────────────────────────

/// A process-scoped key/value store.
///
/// Implementations own no expiry logic. A `save` followed by `contains` for the
/// same key must observe the saved entry.
pub trait CacheService: Send + Sync {
    /// Check whether an entry exists for `key`
    fn contains(&self, key: &str) -> CacheResult<bool>;

    /// Fetch the entry stored under `key`
    ///
    /// Fails with [`CacheError::Missing`] when there is no such entry.
    fn fetch(&self, key: &str) -> CacheResult<Value>;

    /// Store `value` under `key`, replacing any previous entry
    fn save(&self, key: &str, value: Value) -> CacheResult<()>;

    /// Remove the entry stored under `key`, returning whether one existed
    fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Remove every entry
    fn flush_all(&self) -> CacheResult<()>;
}

/// Typed access on top of the untyped [`CacheService`] contract
pub trait CacheServiceExt: CacheService {
    /// Fetch and deserialize the entry stored under `key`
    fn fetch_as<T: DeserializeOwned>(&self, key: &str) -> CacheResult<T> {
        let value = self.fetch(key)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Serialize and store `value` under `key`
    fn save_as<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> CacheResult<()> {
        self.save(key, serde_json::to_value(value)?)
    }
}

impl<C: CacheService + ?Sized> CacheServiceExt for C {}
