// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Durable key-value storage behind the offline queue.
//!
//! [`FileStorage`] keeps one file per key in a directory it locks for its
//! whole lifetime. A second writer on the same directory is refused rather
//! than left to interleave rewrites of the queue.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Another process or handle owns the storage directory.
    #[error("storage at {} is locked by another writer", .0.display())]
    StorageLocked(PathBuf),

    /// Key cannot be mapped to a file name.
    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// A durable string key-value store.
pub trait Storage: Send + Sync {
    /// Read the value under `key`, if any.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Durably replace the value under `key`.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Delete `key`. Missing keys are not an error.
    fn remove(&self, key: &str) -> StorageResult<()>;
}

const LOCK_FILE: &str = ".lock";

/// Directory-backed storage with an exclusive advisory lock.
pub struct FileStorage {
    dir: PathBuf,
    // Held for the lock; released on drop
    _lock: File,
}

impl FileStorage {
    /// Open (creating if needed) the storage directory and lock it.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        use fs2::FileExt;

        fs::create_dir_all(dir)?;
        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;
        lock.try_lock_exclusive()
            .map_err(|_| StorageError::StorageLocked(dir.to_path_buf()))?;

        Ok(FileStorage {
            dir: dir.to_path_buf(),
            _lock: lock,
        })
    }

    /// The directory this storage writes to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> StorageResult<PathBuf> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        match fs::read_to_string(self.path(key)?) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.path(key)?;
        let tmp = path.with_extension("json.tmp");

        // Write aside then rename, so a crash never leaves a torn value
        let mut file = File::create(&tmp)?;
        file.write_all(value.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        match fs::remove_file(self.path(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Volatile storage for tests and ephemeral clients.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;
