use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Error as SerdeError, Value};
use snafu::Snafu;
use strum_macros::Display;

/// Definition of errors that can be returned from the key-value store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub), context(suffix(false)))]
pub enum StoreError {
    /// Failed to 'put' an entry in the store.
    #[snafu(display("Failed to 'put' entry with key {}: {}", key, reason))]
    Put { key: String, reason: String },
    /// Failed to 'get' an entry from the store.
    #[snafu(display("Failed to 'get' entry with key {}: {}", key, reason))]
    Get { key: String, reason: String },
    /// Failed to find an entry with the given key.
    #[snafu(display("Entry with key {} not found.", key))]
    MissingEntry { key: String },
    /// Failed to 'delete' an entry from the store.
    #[snafu(display("Failed to 'delete' entry with key {}: {}", key, reason))]
    Delete { key: String, reason: String },
    /// Failed to deserialise value.
    #[snafu(display("Failed to deserialise value {}. Error {}", value, source))]
    DeserialiseValue { value: String, source: SerdeError },
    /// Failed to serialise value.
    #[snafu(display("Failed to serialise value. Error {}", source))]
    SerialiseValue { source: SerdeError },
    /// Failed to run operation within a timeout.
    #[snafu(display("Timed out during {} operation after {:?}", operation, timeout))]
    Timeout {
        operation: String,
        timeout: std::time::Duration,
    },
}

/// Store keys type trait.
pub trait StoreKey: Sync + ToString {}
impl<T> StoreKey for T where T: Sync + ToString {}
/// Store value type trait.
pub trait StoreValue: Sync + serde::Serialize {}
impl<T> StoreValue for T where T: Sync + serde::Serialize {}

/// Trait defining the operations that can be performed on a key-value store.
#[async_trait]
pub trait Store: Sync + Send {
    /// Put entry into the store.
    async fn put_kv<K: StoreKey, V: StoreValue>(
        &mut self,
        key: &K,
        value: &V,
    ) -> Result<(), StoreError>;
    /// Get an entry from the store.
    async fn get_kv<K: StoreKey>(&mut self, key: &K) -> Result<Value, StoreError>;
    /// Delete an entry from the store.
    async fn delete_kv<K: StoreKey>(&mut self, key: &K) -> Result<(), StoreError>;
    /// Put a storable object into the store.
    async fn put_obj<O: StorableObject>(&mut self, object: &O) -> Result<(), StoreError>;
    /// Get a storable object from the store.
    async fn get_obj<O: StorableObject>(&mut self, key: &O::Key) -> Result<O, StoreError>;
    /// Returns a vector of tuples. Each tuple represents a key-value pair.
    async fn get_values_prefix(
        &mut self,
        key_prefix: &str,
    ) -> Result<Vec<(String, Value)>, StoreError>;
    /// Whether the store is reachable.
    async fn online(&mut self) -> bool;
}

/// Implemented by keys of storable objects, eg: VolumeSpecKey.
pub trait ObjectKey: Sync + Send {
    /// The full store key, `<prefix>/<uuid>`.
    fn key(&self) -> String {
        format!("{}/{}", key_prefix_obj(self.key_type()), self.key_uuid())
    }
    /// The object type of this key.
    fn key_type(&self) -> StorableObjectType;
    /// The uuid component of this key.
    fn key_uuid(&self) -> String;
}

/// Implemented by objects which get stored in the store, eg: VolumeSpec.
pub trait StorableObject: Serialize + Sync + Send + DeserializeOwned {
    /// The key type of the object.
    type Key: ObjectKey;

    /// The key of this object instance.
    fn key(&self) -> Self::Key;
}

/// All types of objects which are storable in our store.
#[derive(Display, Copy, Clone, Debug, Eq, PartialEq)]
pub enum StorableObjectType {
    VolumeSpec,
    SnapshotSpec,
    GroupSpec,
    GroupSnapshotSpec,
}

/// Returns the key prefix used by the store for all objects of this type.
pub fn key_prefix_obj(obj_type: StorableObjectType) -> String {
    format!("/control-plane/{obj_type}")
}
