use super::{
    super::registry::Registry, resource_map::ResourceMap, OperationGuardArc, ResourceMutex,
    UpdateInnerValue,
};

use manager::errors::SvcError;
use vol_port::{
    transport_api::ResourceKind,
    types::v0::{
        store::{
            definitions::{key_prefix_obj, ObjectKey, StorableObject, StorableObjectType, Store},
            group::GroupSpec,
            group_snapshot::GroupSnapshotSpec,
            snapshot::SnapshotSpec,
            volume::VolumeSpec,
            AsOperationSequencer, OperationSequence, SpecTransaction,
        },
        transport::{GroupId, GroupSnapshotId, SnapshotId, VolumeId},
    },
};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::{fmt::Debug, ops::Deref, sync::Arc};

/// What to do when creation fails.
pub(crate) enum OnCreateFail {
    /// Leave object as `creating`, could allow for frontend retries.
    #[allow(unused)]
    LeaveAsIs,
    /// Set the object to `error`; a force-delete can still remove it.
    SetError,
    /// When nothing was provisioned yet, simply delete the record.
    Delete,
}

/// This trait is used to encapsulate common behaviour for all different types of resources,
/// including validation rules and error handling.
#[async_trait]
pub(crate) trait GuardedOperationsHelper:
    Debug + Sync + Send + Sized + Deref<Target = ResourceMutex<Self::Inner>> + UpdateInnerValue
{
    type Create: Debug + PartialEq + Sync + Send;
    type Inner: SpecOperationsHelper<Create = Self::Create>;

    /// Start a create operation and attempt to log the transaction to the store.
    /// In case of error, the log is undone and an error is returned.
    async fn start_create<O>(
        &self,
        registry: &Registry,
        request: &Self::Create,
    ) -> Result<Self::Inner, SvcError>
    where
        Self::Inner: PartialEq<Self::Create>,
        Self::Inner: SpecTransaction<O>,
        Self::Inner: StorableObject,
    {
        let spec_clone = {
            let mut spec = self.lock();
            match spec.start_create_inner(request) {
                Err(SvcError::InvalidUuid { uuid, kind }) => {
                    drop(spec);
                    self.remove_spec(registry);
                    return Err(SvcError::InvalidUuid { uuid, kind });
                }
                Err(error) => Err(error),
                Ok(_) => Ok(()),
            }?;
            spec.clone()
        };
        match self.store_operation_log(registry, &spec_clone).await {
            Ok(_) => Ok(spec_clone),
            Err(e) => {
                self.delete_spec(registry).await.ok();
                Err(e)
            }
        }
    }

    /// Completes a create operation by trying to update the spec in the persistent store.
    /// If the persistent store operation fails then the spec is marked accordingly so the
    /// operation can be re-driven when the store is back online.
    async fn complete_create<O, R: Send>(
        &self,
        result: Result<R, SvcError>,
        registry: &Registry,
        on_fail: OnCreateFail,
    ) -> Result<R, SvcError>
    where
        Self::Inner: SpecTransaction<O>,
        Self::Inner: StorableObject,
    {
        match result {
            Ok(val) => {
                let mut spec_clone = self.lock().clone();
                spec_clone.commit_op();
                let stored = registry.store_obj(&spec_clone).await;
                let mut spec = self.lock();
                match stored {
                    Ok(_) => {
                        spec.commit_op();
                        Ok(val)
                    }
                    Err(error) => {
                        spec.set_op_result(true);
                        Err(error)
                    }
                }
            }
            Err(error) => Err(self.handle_create_failed(registry, error, on_fail).await),
        }
    }

    /// Validates the outcome of an intermediate create step.
    /// In case of an error, it is handled as per the `OnCreateFail` policy.
    async fn validate_create_step<R: Send, O>(
        &self,
        registry: &Registry,
        result: Result<R, SvcError>,
        on_fail: OnCreateFail,
    ) -> Result<R, SvcError>
    where
        Self::Inner: SpecTransaction<O>,
        Self::Inner: StorableObject,
    {
        match result {
            Ok(val) => Ok(val),
            Err(error) => Err(self.handle_create_failed(registry, error, on_fail).await),
        }
    }

    /// Handles a failed creation according to the `OnCreateFail` policy.
    async fn handle_create_failed<O>(
        &self,
        registry: &Registry,
        error: SvcError,
        on_fail: OnCreateFail,
    ) -> SvcError
    where
        Self::Inner: SpecTransaction<O>,
        Self::Inner: StorableObject,
    {
        match on_fail {
            OnCreateFail::LeaveAsIs => error,
            OnCreateFail::SetError => {
                let spec = self.lock().fail_creating_to_error();
                registry.store_obj(&spec).await.ok();
                error
            }
            OnCreateFail::Delete => {
                self.delete_spec(registry).await.ok();
                error
            }
        }
    }

    /// Attempt to remove the spec from the persistent store and the registry.
    /// If the persistent store is unavailable the operation result is marked failed so
    /// a retry can tidy it up.
    async fn delete_spec<O>(&self, registry: &Registry) -> Result<(), SvcError>
    where
        Self::Inner: SpecTransaction<O>,
        Self::Inner: StorableObject,
    {
        let spec_clone = self.lock().clone();

        match registry.delete_kv(&spec_clone.key().key()).await {
            Ok(_) => {
                self.remove_spec(registry);
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    "Failed to delete spec {:?} from the persistent store. Error {:?}",
                    spec_clone,
                    e
                );
                self.lock().set_op_result(false);
                Err(e)
            }
        }
    }

    /// Start a destroy operation and attempt to log the transaction to the store.
    /// In case of error, the log is undone and an error is returned.
    async fn start_destroy<O: Sync + Send>(
        &self,
        registry: &Registry,
        operation: O,
    ) -> Result<(), SvcError>
    where
        Self::Inner: SpecTransaction<O>,
        Self::Inner: StorableObject,
    {
        let spec_clone = {
            let mut spec = self.lock();
            spec.busy()?;
            if spec.spec_deleted() {
                return Ok(());
            }
            spec.start_op(operation);
            spec.clone()
        };

        self.store_operation_log(registry, &spec_clone).await?;
        Ok(())
    }

    /// Completes a destroy operation by committing the tombstone to the persistent store.
    /// Deletion is a soft delete: the record stays in the store and in the registry with
    /// the `deleted` flag raised.
    async fn complete_destroy<O, R: Send>(
        &mut self,
        result: Result<R, SvcError>,
        registry: &Registry,
    ) -> Result<R, SvcError>
    where
        Self::Inner: SpecTransaction<O>,
        Self::Inner: StorableObject,
    {
        match result {
            Ok(val) => {
                let mut spec_clone = self.lock().clone();
                spec_clone.commit_op();
                let stored = registry.store_obj(&spec_clone).await;
                match stored {
                    Ok(_) => {
                        self.complete_op();
                        Ok(val)
                    }
                    Err(error) => {
                        self.lock().set_op_result(true);
                        self.update();
                        Err(error)
                    }
                }
            }
            Err(error) => {
                let mut spec_clone = self.lock().clone();
                spec_clone.clear_op();
                let stored = registry.store_obj(&spec_clone).await;
                let mut spec = self.lock();
                match stored {
                    Ok(_) => {
                        spec.clear_op();
                        Err(error)
                    }
                    Err(error) => {
                        spec.set_op_result(false);
                        Err(error)
                    }
                }
            }
        }
    }

    /// Start an update operation and attempt to log the transaction to the store.
    /// In case of error, the log is undone and an error is returned.
    async fn start_update<O: Sync + Send>(
        &self,
        registry: &Registry,
        operation: O,
    ) -> Result<Self::Inner, SvcError>
    where
        Self::Inner: SpecTransaction<O>,
        Self::Inner: StorableObject,
    {
        let spec_clone = {
            let mut spec = self.lock();
            spec.start_update_inner(operation)?;
            spec.clone()
        };

        self.store_operation_log(registry, &spec_clone).await?;
        Ok(spec_clone)
    }

    /// Completes an update operation by trying to update the spec in the persistent store.
    async fn complete_update<R: Send, O>(
        &mut self,
        registry: &Registry,
        result: Result<R, SvcError>,
        mut spec_clone: Self::Inner,
    ) -> Result<R, SvcError>
    where
        Self::Inner: SpecTransaction<O>,
        Self::Inner: StorableObject,
    {
        match result {
            Ok(val) => {
                spec_clone.commit_op();
                let stored = registry.store_obj(&spec_clone).await;
                match stored {
                    Ok(_) => {
                        self.complete_op();
                        Ok(val)
                    }
                    Err(error) => {
                        self.lock().set_op_result(true);
                        Err(error)
                    }
                }
            }
            Err(error) => {
                spec_clone.clear_op();
                let stored = registry.store_obj(&spec_clone).await;
                let mut spec = self.lock();
                match stored {
                    Ok(_) => {
                        spec.clear_op();
                        Err(error)
                    }
                    Err(error) => {
                        spec.set_op_result(false);
                        Err(error)
                    }
                }
            }
        }
    }

    /// Validates the outcome of an intermediate step, part of a transaction operation.
    /// In case of an error, it undoes the changes to the spec.
    async fn validate_update_step<R: Send, O>(
        &self,
        registry: &Registry,
        result: Result<R, SvcError>,
        spec_clone: &Self::Inner,
    ) -> Result<R, SvcError>
    where
        Self::Inner: SpecTransaction<O>,
        Self::Inner: StorableObject,
    {
        match result {
            Ok(val) => Ok(val),
            Err(error) => {
                let mut spec_clone = spec_clone.clone();
                spec_clone.clear_op();
                let stored = registry.store_obj(&spec_clone).await;
                let mut spec = self.lock();
                match stored {
                    Ok(_) => {
                        spec.clear_op();
                        Err(error)
                    }
                    Err(error) => {
                        spec.set_op_result(false);
                        Err(error)
                    }
                }
            }
        }
    }

    /// Attempt to store a spec object with a logged SpecOperation to the persistent store.
    /// In case of failure the operation cannot proceed so clear it and return an error.
    async fn store_operation_log<O>(
        &self,
        registry: &Registry,
        spec_clone: &Self::Inner,
    ) -> Result<(), SvcError>
    where
        Self::Inner: SpecTransaction<O>,
        Self::Inner: StorableObject,
    {
        if let Err(error) = registry.store_obj(spec_clone).await {
            let mut spec = self.lock();
            spec.clear_op();
            Err(error)
        } else {
            Ok(())
        }
    }

    /// Remove the object from the global Spec List.
    fn remove_spec(&self, registry: &Registry);

    fn complete_op<O>(&mut self)
    where
        Self::Inner: SpecTransaction<O>,
    {
        self.lock().commit_op();
        self.update();
    }
}

/// Resource specific behaviour plugged into the guarded operation helpers.
pub(crate) trait SpecOperationsHelper:
    Clone + Debug + StorableObject + AsOperationSequencer + PartialEq<Self::Create>
{
    type Create: Debug + PartialEq + Sync + Send;

    /// When a create request is issued we need to validate by verifying that:
    /// 1. a previous create operation is no longer in progress
    /// 2. if it's a retry then it must have the same parameters as the original request
    fn start_create_inner(&mut self, request: &Self::Create) -> Result<(), SvcError>
    where
        Self: PartialEq<Self::Create>,
    {
        self.busy()?;
        if self.uuid_str() == uuid::Uuid::nil().to_string() {
            return Err(SvcError::InvalidUuid {
                uuid: self.uuid_str(),
                kind: self.kind(),
            });
        }
        if self.status_creating() {
            if self != request {
                Err(SvcError::ReCreateMismatch {
                    id: self.uuid_str(),
                    kind: self.kind(),
                })
            } else {
                self.start_create_op();
                Ok(())
            }
        } else if self.status_created() {
            Err(SvcError::AlreadyExists {
                kind: self.kind(),
                id: self.uuid_str(),
            })
        } else {
            Err(SvcError::Deleting {})
        }
    }

    /// Checks that the object is ready to accept a new update operation.
    fn start_update_inner<O>(&mut self, operation: O) -> Result<(), SvcError>
    where
        Self: SpecTransaction<O>,
    {
        self.busy()?;
        if self.status_creating() {
            return Err(SvcError::PendingCreation {
                id: self.uuid_str(),
                kind: self.kind(),
            });
        }
        if self.spec_deleted() || self.spec_deleting() {
            return Err(SvcError::PendingDeletion {
                id: self.uuid_str(),
                kind: self.kind(),
            });
        }
        self.start_op(operation);
        Ok(())
    }

    /// Check if the object is free to be modified or if it's still busy.
    fn busy(&self) -> Result<(), SvcError> {
        if self.dirty() {
            return Err(SvcError::StoreDirty {
                kind: self.kind(),
                id: self.uuid_str(),
            });
        }
        Ok(())
    }

    /// When creating fails the spec moves to `error` and the create op is cleared.
    fn fail_creating_to_error<O>(&mut self) -> Self
    where
        Self: SpecTransaction<O>,
    {
        self.set_status_error();
        self.clear_op();
        self.clone()
    }

    /// Check if the object is dirty -> a previous operation result could not be flushed
    /// to the persistent store.
    fn dirty(&self) -> bool;
    /// Get the kind (for log messages).
    fn kind(&self) -> ResourceKind;
    /// Get the UUID as a string (for log messages).
    fn uuid_str(&self) -> String;
    /// Whether the object is still being created.
    fn status_creating(&self) -> bool;
    /// Whether the object has completed creation and is live.
    fn status_created(&self) -> bool;
    /// Whether a destroy is in flight.
    fn spec_deleting(&self) -> bool;
    /// Whether the object is soft-deleted.
    fn spec_deleted(&self) -> bool;
    /// Move the status to its error state.
    fn set_status_error(&mut self);
    /// Start a create transaction.
    fn start_create_op(&mut self);
}

/// Operations are locked: only one exclusive operation per resource at a time.
#[async_trait::async_trait]
pub(crate) trait OperationSequenceGuard<T: AsOperationSequencer + SpecOperationsHelper> {
    /// Attempt to obtain the exclusive operation guard.
    fn operation_guard(&self) -> Result<OperationGuardArc<T>, SvcError>;
    /// Attempt to obtain the exclusive operation guard.
    /// A few attempts are made with an async sleep in case something else is already running.
    async fn operation_guard_wait(&self) -> Result<OperationGuardArc<T>, SvcError>;
}

#[async_trait::async_trait]
impl<T: AsOperationSequencer + SpecOperationsHelper> OperationSequenceGuard<T>
    for ResourceMutex<T>
{
    fn operation_guard(&self) -> Result<OperationGuardArc<T>, SvcError> {
        let get_value = |s: &Self| s.lock().clone();

        match OperationGuardArc::try_sequence(self, get_value) {
            Ok(guard) => Ok(guard),
            Err(error) => {
                tracing::debug!("Resource '{}' is busy: {}", self.lock().uuid_str(), error);
                Err(SvcError::Conflict {})
            }
        }
    }
    async fn operation_guard_wait(&self) -> Result<OperationGuardArc<T>, SvcError> {
        let mut tries = 5;
        loop {
            tries -= 1;
            match self.operation_guard() {
                Ok(guard) => return Ok(guard),
                Err(error) if tries == 0 => {
                    return Err(error);
                }
                Err(_) => {}
            };

            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        }
    }
}

/// Locked Resource Specs.
#[derive(Default, Clone, Debug)]
pub(crate) struct ResourceSpecsLocked(Arc<RwLock<ResourceSpecs>>);

impl Deref for ResourceSpecsLocked {
    type Target = Arc<RwLock<ResourceSpecs>>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Resource Specs.
#[derive(Default, Debug)]
pub(crate) struct ResourceSpecs {
    pub(crate) volumes: ResourceMap<VolumeId, VolumeSpec>,
    pub(crate) snapshots: ResourceMap<SnapshotId, SnapshotSpec>,
    pub(crate) groups: ResourceMap<GroupId, GroupSpec>,
    pub(crate) group_snapshots: ResourceMap<GroupSnapshotId, GroupSnapshotSpec>,
}

impl ResourceSpecsLocked {
    pub(crate) fn new() -> Self {
        ResourceSpecsLocked::default()
    }

    /// Initialise the resource specs with the content from the persistent store.
    /// Operations which were interrupted mid-flight are re-driven from their logged
    /// result: a recorded success commits, anything else rolls back.
    pub(crate) async fn init<S: Store>(&self, store: &mut S) {
        let spec_types = [
            StorableObjectType::VolumeSpec,
            StorableObjectType::SnapshotSpec,
            StorableObjectType::GroupSpec,
            StorableObjectType::GroupSnapshotSpec,
        ];
        for spec in &spec_types {
            if let Err(e) = self.populate_specs(store, *spec).await {
                panic!("Failed to initialise resource specs. Err {e}.");
            }
        }
    }

    /// Deserialise a vector of serde_json values into specific spec types.
    /// If deserialisation fails for any object, return an error.
    fn deserialise_specs<T>(values: Vec<serde_json::Value>) -> Result<Vec<T>, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        values
            .iter()
            .map(|v| serde_json::from_value(v.clone()))
            .collect()
    }

    /// Populate the resource specs with data from the persistent store.
    async fn populate_specs<S: Store>(
        &self,
        store: &mut S,
        spec_type: StorableObjectType,
    ) -> Result<(), SvcError> {
        let prefix = key_prefix_obj(spec_type);
        let store_entries = store.get_values_prefix(&prefix).await?;
        let store_values = store_entries.iter().map(|e| e.1.clone()).collect();

        let mut resource_specs = self.0.write();
        match spec_type {
            StorableObjectType::VolumeSpec => {
                let specs = Self::deserialise_specs::<VolumeSpec>(store_values)
                    .map_err(|error| deserialise_error(spec_type, error))?;
                resource_specs.volumes.populate(specs.into_iter().map(|s| {
                    let mut spec = recover_spec(s);
                    spec.sequencer = OperationSequence::new(spec.uuid.as_str());
                    spec
                }));
            }
            StorableObjectType::SnapshotSpec => {
                let specs = Self::deserialise_specs::<SnapshotSpec>(store_values)
                    .map_err(|error| deserialise_error(spec_type, error))?;
                resource_specs
                    .snapshots
                    .populate(specs.into_iter().map(|s| {
                        let mut spec = recover_spec(s);
                        spec.sequencer = OperationSequence::new(spec.uuid.as_str());
                        spec
                    }));
            }
            StorableObjectType::GroupSpec => {
                let specs = Self::deserialise_specs::<GroupSpec>(store_values)
                    .map_err(|error| deserialise_error(spec_type, error))?;
                resource_specs.groups.populate(specs.into_iter().map(|s| {
                    let mut spec = recover_spec(s);
                    spec.sequencer = OperationSequence::new(spec.uuid.as_str());
                    spec
                }));
            }
            StorableObjectType::GroupSnapshotSpec => {
                let specs = Self::deserialise_specs::<GroupSnapshotSpec>(store_values)
                    .map_err(|error| deserialise_error(spec_type, error))?;
                resource_specs
                    .group_snapshots
                    .populate(specs.into_iter().map(|s| {
                        let mut spec = recover_spec(s);
                        spec.sequencer = OperationSequence::new(spec.uuid.as_str());
                        spec
                    }));
            }
        };
        Ok(())
    }
}

fn deserialise_error(obj_type: StorableObjectType, source: serde_json::Error) -> SvcError {
    SvcError::MalformedResponse {
        detail: format!("failed to deserialise stored {obj_type}: {source}"),
    }
}

/// Resolve an operation which was interrupted before its outcome was persisted.
fn recover_spec<O, T: SpecTransaction<O>>(mut spec: T) -> T {
    match spec.operation_result() {
        Some(Some(true)) => spec.commit_op(),
        Some(Some(false)) | Some(None) => spec.clear_op(),
        None => {}
    }
    spec
}
