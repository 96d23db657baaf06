//! JSON-file backed scope: a write-through cache over a single document on disk.

use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Mutex,
};

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, warn};

use super::storage::{KeyValueScope, StorageError, StorageResult};

/// Scope persisted as one JSON object in `path`.
#[derive(Debug)]
pub struct FileScope {
    path: PathBuf,
    values: DashMap<String, Value>,
    write_gate: Mutex<()>,
}

impl FileScope {
    /// Open (or lazily create) the scope file.
    ///
    /// A missing file is an empty scope; an unreadable or corrupt one is
    /// reported so callers can decide to fall back to memory.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        let values = DashMap::new();

        match fs::read_to_string(&path) {
            Ok(contents) => {
                let document: BTreeMap<String, Value> = serde_json::from_str(&contents)
                    .map_err(|err| {
                        StorageError::unavailable(format!("corrupt scope file {}", path.display()), err)
                    })?;
                for (key, value) in document {
                    values.insert(key, value);
                }
                debug!(path = %path.display(), count = values.len(), "loaded scope file");
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "scope file not found; starting empty");
            }
            Err(err) => {
                return Err(StorageError::unavailable(
                    format!("failed to read {}", path.display()),
                    err,
                ));
            }
        }

        Ok(Self {
            path,
            values,
            write_gate: Mutex::new(()),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> StorageResult<()> {
        let _gate = self
            .write_gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let document: BTreeMap<String, Value> = self
            .values
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let encoded = serde_json::to_vec_pretty(&document).map_err(|source| StorageError::Encode {
            key: self.path.display().to_string(),
            source,
        })?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| {
                    StorageError::unavailable(format!("failed to create {}", parent.display()), err)
                })?;
            }
        }

        // Write to a sibling file first so a crash never leaves a truncated document.
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, encoded).map_err(|err| {
            StorageError::unavailable(format!("failed to write {}", staging.display()), err)
        })?;
        fs::rename(&staging, &self.path).map_err(|err| {
            warn!(path = %self.path.display(), error = %err, "failed to replace scope file");
            StorageError::unavailable(format!("failed to replace {}", self.path.display()), err)
        })
    }
}

impl KeyValueScope for FileScope {
    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.values.get(key).map(|entry| entry.value().clone()))
    }

    fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        self.values.insert(key.to_string(), value);
        self.flush()
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        if self.values.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }

    fn clear_prefix(&self, prefix: &str) -> StorageResult<()> {
        self.values.retain(|key, _| !key.starts_with(prefix));
        self.flush()
    }
}
