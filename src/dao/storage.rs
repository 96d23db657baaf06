use std::{error::Error, sync::Arc};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use super::memory::MemoryScope;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of where the values live.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backing medium could not be read or written.
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A value could not be converted to or from its stored JSON form.
    #[error("failed to encode value for key `{key}`")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}

/// One storage scope holding raw JSON values under fully qualified keys.
///
/// Writes are last-write-wins per key; there are no cross-key transactions.
pub trait KeyValueScope: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> StorageResult<()>;
    fn remove(&self, key: &str) -> StorageResult<()>;
    /// Remove every key starting with `prefix`.
    fn clear_prefix(&self, prefix: &str) -> StorageResult<()>;
}

/// Which of the two scopes a key lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Survives process restarts.
    Persistent,
    /// Survives reloads but is dropped when the session ends.
    Session,
}

/// Namespaced facade over the persistent and session scopes.
///
/// Typed accessors never fail outward: read or decode problems are logged and
/// treated as a missing value, mirroring how the rest of the client treats
/// storage as best-effort.
#[derive(Clone)]
pub struct DurableStore {
    prefix: Arc<str>,
    persistent: Arc<dyn KeyValueScope>,
    session: Arc<dyn KeyValueScope>,
}

impl DurableStore {
    /// Assemble a store from two scope backends and a key prefix.
    pub fn new(
        prefix: impl Into<Arc<str>>,
        persistent: Arc<dyn KeyValueScope>,
        session: Arc<dyn KeyValueScope>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            persistent,
            session,
        }
    }

    /// Store with both scopes held in memory.
    pub fn in_memory(prefix: impl Into<Arc<str>>) -> Self {
        Self::new(
            prefix,
            Arc::new(MemoryScope::new()),
            Arc::new(MemoryScope::new()),
        )
    }

    fn scope(&self, scope: Scope) -> &dyn KeyValueScope {
        match scope {
            Scope::Persistent => self.persistent.as_ref(),
            Scope::Session => self.session.as_ref(),
        }
    }

    fn qualified(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Read and decode a value, returning `None` when absent or unreadable.
    pub fn get<T>(&self, scope: Scope, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let full_key = self.qualified(key);
        let raw = match self.scope(scope).get(&full_key) {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(key = %full_key, error = %err, "failed to read stored value");
                return None;
            }
        };
        match serde_json::from_value(raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key = %full_key, error = %err, "stored value has an unexpected shape");
                None
            }
        }
    }

    /// Encode and write a value, logging on failure.
    pub fn set<T>(&self, scope: Scope, key: &str, value: &T)
    where
        T: Serialize + ?Sized,
    {
        let full_key = self.qualified(key);
        let result = serde_json::to_value(value)
            .map_err(|source| StorageError::Encode {
                key: full_key.clone(),
                source,
            })
            .and_then(|encoded| self.scope(scope).set(&full_key, encoded));
        if let Err(err) = result {
            warn!(key = %full_key, error = %err, "failed to write stored value");
        }
    }

    /// Delete a value, logging on failure.
    pub fn remove(&self, scope: Scope, key: &str) {
        let full_key = self.qualified(key);
        if let Err(err) = self.scope(scope).remove(&full_key) {
            warn!(key = %full_key, error = %err, "failed to remove stored value");
        }
    }

    /// Whether a value is currently stored under `key`.
    pub fn contains(&self, scope: Scope, key: &str) -> bool {
        matches!(self.scope(scope).get(&self.qualified(key)), Ok(Some(_)))
    }

    /// Drop every session-scoped key of this application (the "tab closed" case).
    pub fn end_session(&self) -> StorageResult<()> {
        self.session.clear_prefix(&self.prefix)
    }
}
