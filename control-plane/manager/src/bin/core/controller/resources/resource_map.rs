use super::ResourceMutex;
use std::{collections::HashMap, hash::Hash};
use vol_port::types::v0::store::ResourceUuid;

/// Generic map of resource specs wrapped in their shared mutexes.
#[derive(Default, Debug)]
pub(crate) struct ResourceMap<I, S> {
    map: HashMap<I, ResourceMutex<S>>,
}

impl<I, S> ResourceMap<I, S>
where
    I: Eq + Hash + Clone,
    S: Clone + ResourceUuid<Id = I> + std::fmt::Debug,
{
    /// Get the resource with the given key.
    pub(crate) fn get(&self, key: &I) -> Option<&ResourceMutex<S>> {
        self.map.get(key)
    }

    /// Clear the contents of the map.
    pub(crate) fn clear(&mut self) {
        self.map.clear();
    }

    /// Insert an element or update an existing entry in the map.
    pub(crate) fn insert(&mut self, value: S) -> ResourceMutex<S> {
        let key = value.uuid();
        let resource: ResourceMutex<S> = value.into();
        self.map.insert(key, resource.clone());
        resource
    }

    /// Remove an element from the map.
    pub(crate) fn remove(&mut self, key: &I) {
        self.map.remove(key);
    }

    /// Populate the map with a pre-loaded set of specs.
    /// Should only be called if the map is empty because a new Mutex is
    /// created for each spec.
    pub(crate) fn populate(&mut self, values: impl IntoIterator<Item = S>) {
        assert!(self.map.is_empty());
        for value in values {
            self.map.insert(value.uuid(), value.into());
        }
    }

    /// Get all the resources as a vector.
    pub(crate) fn to_vec(&self) -> Vec<ResourceMutex<S>> {
        self.map.values().cloned().collect()
    }

    /// The number of entries in the map.
    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }
}
