use crate::controller::{
    registry::Registry,
    resources::{
        operations::ResourceLifecycle, operations_helper::OperationSequenceGuard,
        OperationGuardArc,
    },
};

use manager::errors::SvcError;
use vol_port::types::v0::{
    store::snapshot::SnapshotSpec,
    transport::{CreateSnapshot, DestroySnapshot, ReadDeleted, SnapshotId},
};

/// The snapshot service.
#[derive(Debug, Clone)]
pub(crate) struct Service {
    registry: Registry,
}

impl Service {
    pub(crate) fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Get the snapshot with the given id.
    pub(crate) fn get_snapshot(
        &self,
        id: &SnapshotId,
        mode: ReadDeleted,
    ) -> Result<SnapshotSpec, SvcError> {
        let snapshot = self.registry.specs().snapshot(id, mode)?;
        let spec = snapshot.lock().clone();
        Ok(spec)
    }

    /// List snapshots, honouring the soft-delete read mode.
    pub(crate) fn get_snapshots(&self, mode: ReadDeleted) -> Vec<SnapshotSpec> {
        self.registry.specs().snapshots(mode)
    }

    /// Take a snapshot of a volume.
    pub(crate) async fn create_snapshot(
        &self,
        request: &CreateSnapshot,
    ) -> Result<SnapshotSpec, SvcError> {
        OperationGuardArc::<SnapshotSpec>::create(&self.registry, request).await
    }

    /// Destroy a snapshot. Tombstones are admitted so that a repeated delete
    /// stays a no-op.
    pub(crate) async fn destroy_snapshot(&self, request: &DestroySnapshot) -> Result<(), SvcError> {
        let snapshot = self
            .registry
            .specs()
            .snapshot(&request.uuid, ReadDeleted::Yes)?;
        let mut guard = snapshot.operation_guard_wait().await?;
        guard.destroy(&self.registry, request).await
    }
}
