use std::collections::HashMap;
use std::sync::RwLock;

use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("key-value backend: {0}")]
    Backend(String),
    #[error("corrupt value under `{key}`: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode value for `{key}`: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("store lock poisoned")]
    Poisoned,
}

/// Byte-level storage seam. Everything above it (users, workouts, posts,
/// sessions) is written once against `dyn KeyValue`.
pub trait KeyValue {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }
}

impl dyn KeyValue + '_ {
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| StoreError::Corrupt {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    pub fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.set(key, &bytes)
    }

    /// Reads an id index list, treating a missing key as empty.
    pub fn get_ids(&self, key: &str) -> Result<Vec<u64>, StoreError> {
        Ok(self.get_json(key)?.unwrap_or_default())
    }

    /// Allocates the next integer id for an entity. Read-then-write: the
    /// store has no atomic increment.
    pub fn next_id(&self, entity: &str) -> Result<u64, StoreError> {
        let key = format!("seq:{}", entity);
        let next = self.get_json::<u64>(&key)?.unwrap_or(0) + 1;
        self.set_json(&key, &next)?;
        Ok(next)
    }
}

/// In-process map, used by the native server and the tests.
#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValue for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.contains_key(key))
    }
}

/// The Spin component's default key-value store.
pub struct SpinKv {
    store: spin_sdk::key_value::Store,
}

impl SpinKv {
    pub fn open_default() -> Result<Self, StoreError> {
        spin_sdk::key_value::Store::open_default()
            .map(|store| Self { store })
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

impl KeyValue for SpinKv {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.store
            .get(key)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.store
            .set(key, value)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.store
            .delete(key)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.store
            .exists(key)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}
