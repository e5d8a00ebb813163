use crate::controller::{
    registry::Registry,
    resources::{
        operations::{ResourceAttach, ResourceLifecycle, ResourceResize, ResourceRetype},
        operations_helper::OperationSequenceGuard,
        OperationGuardArc,
    },
};

use manager::errors::SvcError;
use vol_port::types::v0::{
    store::volume::VolumeSpec,
    transport::{
        AttachVolume, CreateVolume, DestroyVolume, DetachVolume, ExtendVolume, ReadDeleted,
        ReserveVolume, RetypeVolume, Volume, VolumeId,
    },
};

/// The volume service: guard acquisition and concurrency bounds around the
/// volume operations.
#[derive(Debug, Clone)]
pub(crate) struct Service {
    registry: Registry,
}

impl Service {
    pub(crate) fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Get the volume with the given id.
    pub(crate) fn get_volume(
        &self,
        id: &VolumeId,
        mode: ReadDeleted,
    ) -> Result<Volume, SvcError> {
        let volume = self.registry.specs().volume(id, mode)?;
        let spec = volume.lock().clone();
        Ok(Volume::new(spec))
    }

    /// List volumes, honouring the soft-delete read mode.
    pub(crate) fn get_volumes(&self, mode: ReadDeleted) -> Vec<Volume> {
        self.registry
            .specs()
            .volumes(mode)
            .into_iter()
            .map(Volume::new)
            .collect()
    }

    /// Create a volume. Concurrent creates beyond the configured limit wait
    /// for a slot.
    pub(crate) async fn create_volume(&self, request: &CreateVolume) -> Result<Volume, SvcError> {
        let _permit = self.registry.create_volume_permit().await?;
        OperationGuardArc::<VolumeSpec>::create(&self.registry, request).await
    }

    /// Destroy a volume. Tombstones are admitted so that a repeated delete
    /// stays a no-op.
    pub(crate) async fn destroy_volume(&self, request: &DestroyVolume) -> Result<(), SvcError> {
        let volume = self.registry.specs().volume(&request.uuid, ReadDeleted::Yes)?;
        let mut guard = volume.operation_guard_wait().await?;
        guard.destroy(&self.registry, request).await
    }

    /// Extend a volume to a larger size.
    pub(crate) async fn extend_volume(&self, request: &ExtendVolume) -> Result<Volume, SvcError> {
        let volume = self.registry.specs().volume(&request.uuid, ReadDeleted::No)?;
        let mut guard = volume.operation_guard_wait().await?;
        guard.resize(&self.registry, request).await
    }

    /// Move a volume to a new volume type.
    pub(crate) async fn retype_volume(&self, request: &RetypeVolume) -> Result<Volume, SvcError> {
        let volume = self.registry.specs().volume(&request.uuid, ReadDeleted::No)?;
        let mut guard = volume.operation_guard_wait().await?;
        guard.retype(&self.registry, request).await
    }

    /// Reserve a volume for an upcoming attach.
    pub(crate) async fn reserve_volume(&self, request: &ReserveVolume) -> Result<(), SvcError> {
        let volume = self.registry.specs().volume(&request.uuid, ReadDeleted::No)?;
        let mut guard = volume.operation_guard_wait().await?;
        guard.reserve(&self.registry, request).await
    }

    /// Complete an attach on a previously reserved volume.
    pub(crate) async fn attach_volume(&self, request: &AttachVolume) -> Result<(), SvcError> {
        let volume = self.registry.specs().volume(&request.uuid, ReadDeleted::No)?;
        let mut guard = volume.operation_guard_wait().await?;
        guard.attach(&self.registry, request).await
    }

    /// Detach a volume.
    pub(crate) async fn detach_volume(&self, request: &DetachVolume) -> Result<(), SvcError> {
        let volume = self.registry.specs().volume(&request.uuid, ReadDeleted::No)?;
        let mut guard = volume.operation_guard_wait().await?;
        guard.detach(&self.registry, request).await
    }
}
