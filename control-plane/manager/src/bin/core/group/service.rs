use super::operations::create_group_from_source;
use crate::controller::{
    registry::Registry,
    resources::{
        operations::{ResourceLifecycle, ResourceMembership},
        operations_helper::OperationSequenceGuard,
        OperationGuardArc,
    },
};

use manager::errors::SvcError;
use vol_port::types::v0::{
    store::{group::GroupSpec, group_snapshot::GroupSnapshotSpec},
    transport::{
        CreateGroup, CreateGroupFromSource, CreateGroupSnapshot, DestroyGroup,
        DestroyGroupSnapshot, GroupId, GroupSnapshotId, ReadDeleted, UpdateGroup,
    },
};

/// The group and group snapshot service.
#[derive(Debug, Clone)]
pub(crate) struct Service {
    registry: Registry,
}

impl Service {
    pub(crate) fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Get the group with the given id.
    pub(crate) fn get_group(
        &self,
        id: &GroupId,
        mode: ReadDeleted,
    ) -> Result<GroupSpec, SvcError> {
        let group = self.registry.specs().group(id, mode)?;
        let spec = group.lock().clone();
        Ok(spec)
    }

    /// List groups, honouring the soft-delete read mode.
    pub(crate) fn get_groups(&self, mode: ReadDeleted) -> Vec<GroupSpec> {
        self.registry.specs().groups(mode)
    }

    /// Create a volume group.
    pub(crate) async fn create_group(&self, request: &CreateGroup) -> Result<GroupSpec, SvcError> {
        OperationGuardArc::<GroupSpec>::create(&self.registry, request).await
    }

    /// Create a group whose members are cloned from a source group or
    /// restored from a group snapshot.
    pub(crate) async fn create_group_from_src(
        &self,
        request: &CreateGroupFromSource,
    ) -> Result<GroupSpec, SvcError> {
        create_group_from_source(&self.registry, request).await
    }

    /// Update the membership of a group.
    pub(crate) async fn update_group(&self, request: &UpdateGroup) -> Result<GroupSpec, SvcError> {
        let group = self.registry.specs().group(&request.uuid, ReadDeleted::No)?;
        let mut guard = group.operation_guard_wait().await?;
        guard.update(&self.registry, request).await
    }

    /// Destroy a group, optionally deleting its member volumes. Tombstones
    /// are admitted so that a repeated delete stays a no-op.
    pub(crate) async fn destroy_group(&self, request: &DestroyGroup) -> Result<(), SvcError> {
        let group = self.registry.specs().group(&request.uuid, ReadDeleted::Yes)?;
        let mut guard = group.operation_guard_wait().await?;
        guard.destroy(&self.registry, request).await
    }

    /// Get the group snapshot with the given id.
    pub(crate) fn get_group_snapshot(
        &self,
        id: &GroupSnapshotId,
        mode: ReadDeleted,
    ) -> Result<GroupSnapshotSpec, SvcError> {
        let snapshot = self.registry.specs().group_snapshot(id, mode)?;
        let spec = snapshot.lock().clone();
        Ok(spec)
    }

    /// List group snapshots, honouring the soft-delete read mode.
    pub(crate) fn get_group_snapshots(&self, mode: ReadDeleted) -> Vec<GroupSnapshotSpec> {
        self.registry.specs().group_snapshots(mode)
    }

    /// Snapshot every member of a group at once.
    pub(crate) async fn create_group_snapshot(
        &self,
        request: &CreateGroupSnapshot,
    ) -> Result<GroupSnapshotSpec, SvcError> {
        OperationGuardArc::<GroupSnapshotSpec>::create(&self.registry, request).await
    }

    /// Destroy a group snapshot and its children.
    pub(crate) async fn destroy_group_snapshot(
        &self,
        request: &DestroyGroupSnapshot,
    ) -> Result<(), SvcError> {
        let snapshot = self
            .registry
            .specs()
            .group_snapshot(&request.uuid, ReadDeleted::Yes)?;
        let mut guard = snapshot.operation_guard_wait().await?;
        guard.destroy(&self.registry, request).await
    }
}
