//! File Cache
//!
//! Stores each entry as `<dir>/<key>.json`. Writes go to a uniquely named
//! temporary file that is renamed into place so readers never see a
//! half-written entry.

use std::fmt::Write as _;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::{CacheError, CacheResult, CacheService};

const ENTRY_EXTENSION: &str = "json";

/// On-disk layout of a single entry
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    saved_at: DateTime<Utc>,
    value: Value,
}

/// Directory-backed cache
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Create a cache rooted at `dir`, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> CacheResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        tracing::debug!("File cache directory: {}", dir.display());
        Ok(Self { dir })
    }

    /// Directory holding the entries
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// When the entry for `key` was last saved, if it exists
    pub fn saved_at(&self, key: &str) -> CacheResult<Option<DateTime<Utc>>> {
        Ok(self.read_entry(key)?.map(|entry| entry.saved_at))
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", encode_key(key), ENTRY_EXTENSION))
    }

    fn read_entry(&self, key: &str) -> CacheResult<Option<StoredEntry>> {
        let path = self.entry_path(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(serde_json::from_str(&content)?))
    }
}

/// Map a cache key to a file stem
///
/// ASCII alphanumerics, `-` and `_` are kept; every other byte becomes `%XX`.
/// The mapping is injective, so distinct keys never share a file.
fn encode_key(key: &str) -> String {
    let mut stem = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(byte as char);
        } else {
            let _ = write!(stem, "%{:02X}", byte);
        }
    }
    stem
}

impl CacheService for FileCache {
    fn contains(&self, key: &str) -> CacheResult<bool> {
        if !self.dir.is_dir() {
            return Err(CacheError::Unavailable(format!(
                "cache directory missing: {}",
                self.dir.display()
            )));
        }
        Ok(self.entry_path(key).is_file())
    }

    fn fetch(&self, key: &str) -> CacheResult<Value> {
        self.read_entry(key)?
            .map(|entry| entry.value)
            .ok_or_else(|| CacheError::Missing(key.to_string()))
    }

    fn save(&self, key: &str, value: Value) -> CacheResult<()> {
        let entry = StoredEntry {
            saved_at: Utc::now(),
            value,
        };
        let content = serde_json::to_string_pretty(&entry)?;

        let path = self.entry_path(key);
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(&path).map_err(|e| e.error)?;

        tracing::trace!(key, "Saved cache entry to {}", path.display());
        Ok(())
    }

    fn delete(&self, key: &str) -> CacheResult<bool> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn flush_all(&self) -> CacheResult<()> {
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXTENSION) {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}
