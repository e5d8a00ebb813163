//! An in-process key-value store used as the persistence collaborator.
//! Exposes the same `Store` surface an etcd-backed implementation would,
//! so the manager never knows which one it is talking to.

use crate::types::v0::store::definitions::{
    ObjectKey, StorableObject, Store, StoreError, StoreKey, StoreValue,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc};

/// In-memory store with injectable write failures for tests.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    inner: Arc<Mutex<MemStoreInner>>,
}

#[derive(Debug, Default)]
struct MemStoreInner {
    values: BTreeMap<String, Value>,
    /// When set, the next put fails (and the flag clears).
    fail_next_put: bool,
}

impl MemStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
    /// Make the next `put` fail, to exercise store-unavailable paths.
    pub fn fail_next_put(&self) {
        self.inner.lock().fail_next_put = true;
    }
}

#[async_trait]
impl Store for MemStore {
    async fn put_kv<K: StoreKey, V: StoreValue>(
        &mut self,
        key: &K,
        value: &V,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(value)
            .map_err(|source| StoreError::SerialiseValue { source })?;
        let mut inner = self.inner.lock();
        if std::mem::take(&mut inner.fail_next_put) {
            return Err(StoreError::Put {
                key: key.to_string(),
                reason: "injected put failure".to_string(),
            });
        }
        inner.values.insert(key.to_string(), value);
        Ok(())
    }

    async fn get_kv<K: StoreKey>(&mut self, key: &K) -> Result<Value, StoreError> {
        let inner = self.inner.lock();
        match inner.values.get(&key.to_string()) {
            Some(value) => Ok(value.clone()),
            None => Err(StoreError::MissingEntry {
                key: key.to_string(),
            }),
        }
    }

    async fn delete_kv<K: StoreKey>(&mut self, key: &K) -> Result<(), StoreError> {
        self.inner.lock().values.remove(&key.to_string());
        Ok(())
    }

    async fn put_obj<O: StorableObject>(&mut self, object: &O) -> Result<(), StoreError> {
        let key = object.key().key();
        self.put_kv(&key, object).await
    }

    async fn get_obj<O: StorableObject>(&mut self, key: &O::Key) -> Result<O, StoreError> {
        let value = self.get_kv(&key.key()).await?;
        serde_json::from_value(value.clone()).map_err(|source| StoreError::DeserialiseValue {
            value: value.to_string(),
            source,
        })
    }

    async fn get_values_prefix(
        &mut self,
        key_prefix: &str,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .values
            .range(key_prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(key_prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn online(&mut self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete() {
        let mut store = MemStore::new();
        store.put_kv(&"/a/b", &serde_json::json!({"x": 1})).await.unwrap();
        let value = store.get_kv(&"/a/b").await.unwrap();
        assert_eq!(value["x"], 1);
        store.delete_kv(&"/a/b").await.unwrap();
        assert!(matches!(
            store.get_kv(&"/a/b").await,
            Err(StoreError::MissingEntry { .. })
        ));
    }

    #[tokio::test]
    async fn prefix_scan() {
        let mut store = MemStore::new();
        store.put_kv(&"/p/1", &1).await.unwrap();
        store.put_kv(&"/p/2", &2).await.unwrap();
        store.put_kv(&"/q/1", &3).await.unwrap();
        let values = store.get_values_prefix("/p/").await.unwrap();
        assert_eq!(values.len(), 2);
    }

    #[tokio::test]
    async fn injected_failure() {
        let mut store = MemStore::new();
        store.fail_next_put();
        assert!(store.put_kv(&"/a", &1).await.is_err());
        store.put_kv(&"/a", &1).await.unwrap();
    }
}
