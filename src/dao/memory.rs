use dashmap::DashMap;
use serde_json::Value;

use super::storage::{KeyValueScope, StorageResult};

/// Process-local scope; its contents disappear with the process.
#[derive(Debug, Default)]
pub struct MemoryScope {
    values: DashMap<String, Value>,
}

impl MemoryScope {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueScope for MemoryScope {
    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.values.get(key).map(|entry| entry.value().clone()))
    }

    fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.values.remove(key);
        Ok(())
    }

    fn clear_prefix(&self, prefix: &str) -> StorageResult<()> {
        self.values.retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}
