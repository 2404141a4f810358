//! Object store gateway
//!
//! A generic key/blob store. Keys are `/`-separated paths; `list` returns keys
//! in lexicographic order and deleting a missing key succeeds.

use crate::error::OtlpStorageError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Key/blob store used for batch objects and session records
#[async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// Store `bytes` under `key`, replacing any previous value
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), OtlpStorageError>;

    /// Fetch the value stored under `key`
    async fn get(&self, key: &str) -> Result<Vec<u8>, OtlpStorageError>;

    /// All keys starting with `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>, OtlpStorageError>;

    /// Remove `key`
    async fn delete(&self, key: &str) -> Result<(), OtlpStorageError>;

    /// Immediate child prefixes of `prefix`, each ending in `/`, sorted
    ///
    /// `prefix` is empty or ends in `/`. Objects stored directly under
    /// `prefix` are not reported.
    async fn list_prefixes(&self, prefix: &str) -> Result<Vec<String>, OtlpStorageError>;
}

/// In-process object store
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether the store holds no objects
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), OtlpStorageError> {
        self.objects.write().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, OtlpStorageError> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| OtlpStorageError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, OtlpStorageError> {
        let objects = self.objects.read().await;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), OtlpStorageError> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn list_prefixes(&self, prefix: &str) -> Result<Vec<String>, OtlpStorageError> {
        let objects = self.objects.read().await;
        let mut prefixes = Vec::new();
        let mut from = prefix.to_string();
        loop {
            let Some((key, _)) = objects.range(from.clone()..).next() else {
                break;
            };
            let Some(rest) = key.strip_prefix(prefix) else {
                break;
            };
            let Some(end) = rest.find('/') else {
                // Plain object; step past it
                from = format!("{}\0", key);
                continue;
            };
            let child = format!("{}{}/", prefix, &rest[..end]);
            // '0' sorts right after '/', skipping the rest of this child
            from = format!("{}{}0", prefix, &rest[..end]);
            prefixes.push(child);
        }
        Ok(prefixes)
    }
}
