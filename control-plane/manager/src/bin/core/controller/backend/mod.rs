//! The capability interface a storage backend implements. Vendor adapters are
//! injected at configuration time; the manager never persists state on their
//! behalf, it applies the model updates they return.

/// A fake backend used by tests and local runs.
pub(crate) mod fake;

use manager::errors::SvcError;
use vol_port::types::v0::{
    store::{group::GroupSpec, group_snapshot::GroupSnapshotSpec, snapshot::SnapshotSpec, volume::VolumeSpec},
    transport::{BackendHost, GroupStatus, ImageId, MigrationStatus, VolumeId, VolumeStatus, VolumeType},
};

use async_trait::async_trait;

/// Model fields a driver call may ask the manager to apply to a volume.
#[derive(Debug, Clone, Default)]
pub(crate) struct VolumeModelUpdate {
    /// New lifecycle status, if changed.
    pub(crate) status: Option<VolumeStatus>,
    /// New placement, if the volume moved.
    pub(crate) host: Option<BackendHost>,
}

/// Model fields a driver call may ask the manager to apply to a group.
#[derive(Debug, Clone)]
pub(crate) struct GroupModelUpdate {
    /// New lifecycle status of the group.
    pub(crate) status: GroupStatus,
}

/// The per-member outcome of a compound group operation.
#[derive(Debug, Clone)]
pub(crate) struct MemberModelUpdate {
    /// The member volume.
    pub(crate) uuid: VolumeId,
    /// Its new lifecycle status.
    pub(crate) status: VolumeStatus,
}

/// Everything returned by a group membership update, applied atomically.
#[derive(Debug, Clone)]
pub(crate) struct GroupUpdateModel {
    /// New lifecycle status of the group.
    pub(crate) status: GroupStatus,
    /// Updates to the volumes which joined.
    pub(crate) added: Vec<MemberModelUpdate>,
    /// Updates to the volumes which left.
    pub(crate) removed: Vec<MemberModelUpdate>,
}

/// Abstract interface a storage backend implements.
///
/// `delete_volume` must distinguish a busy volume (`SvcError::VolumeIsBusy`)
/// from a generic failure; a not-found is reported as `SvcError::NotFound`
/// and treated by the manager as already deleted.
#[async_trait]
pub(crate) trait BackendDriver: Send + Sync {
    /// Provision a blank volume.
    async fn create_volume(&self, volume: &VolumeSpec) -> Result<(), SvcError>;
    /// Provision a volume with the content of a snapshot.
    async fn create_volume_from_snapshot(
        &self,
        volume: &VolumeSpec,
        snapshot: &SnapshotSpec,
    ) -> Result<(), SvcError>;
    /// Provision a volume as a clone of another volume.
    async fn create_cloned_volume(
        &self,
        volume: &VolumeSpec,
        source: &VolumeSpec,
    ) -> Result<(), SvcError>;
    /// Provision a volume as an efficient clone of an image, when the backend
    /// keeps volume-backed images. Returns `Ok(None)` when unsupported and the
    /// caller falls back to a raw copy.
    async fn clone_image(
        &self,
        volume: &VolumeSpec,
        image: &ImageId,
    ) -> Result<Option<VolumeModelUpdate>, SvcError>;
    /// Write the content of an image into a provisioned volume.
    async fn copy_image_to_volume(
        &self,
        volume: &VolumeSpec,
        image: &ImageId,
    ) -> Result<(), SvcError>;
    /// Delete the backend resource of a volume.
    async fn delete_volume(&self, volume: &VolumeSpec) -> Result<(), SvcError>;
    /// Grow the backend resource of a volume.
    async fn extend_volume(&self, volume: &VolumeSpec, new_size: u64) -> Result<(), SvcError>;
    /// Take a snapshot of a volume.
    async fn create_snapshot(&self, snapshot: &SnapshotSpec) -> Result<(), SvcError>;
    /// Delete the backend resource of a snapshot.
    async fn delete_snapshot(&self, snapshot: &SnapshotSpec) -> Result<(), SvcError>;
    /// Create a consistency group.
    async fn create_group(&self, group: &GroupSpec) -> Result<GroupModelUpdate, SvcError>;
    /// Delete a group and report the per-member outcome.
    async fn delete_group(
        &self,
        group: &GroupSpec,
        volumes: &[VolumeSpec],
    ) -> Result<(GroupModelUpdate, Vec<MemberModelUpdate>), SvcError>;
    /// Update group membership and report the group and per-member outcome.
    async fn update_group(
        &self,
        group: &GroupSpec,
        add_volumes: &[VolumeSpec],
        remove_volumes: &[VolumeSpec],
    ) -> Result<GroupUpdateModel, SvcError>;
    /// Snapshot every member of a group at once.
    async fn create_group_snapshot(
        &self,
        group_snapshot: &GroupSnapshotSpec,
        snapshots: &[SnapshotSpec],
    ) -> Result<(), SvcError>;
    /// Delete a group snapshot and its member snapshots.
    async fn delete_group_snapshot(
        &self,
        group_snapshot: &GroupSnapshotSpec,
        snapshots: &[SnapshotSpec],
    ) -> Result<(), SvcError>;
    /// Move a volume to another backend. Returns whether the migration already
    /// completed synchronously, plus an optional model update.
    async fn migrate_volume(
        &self,
        volume: &VolumeSpec,
        destination: &BackendHost,
    ) -> Result<(bool, Option<VolumeModelUpdate>), SvcError>;
    /// Progress of an asynchronous migration started by `migrate_volume`.
    async fn migration_progress(&self, volume: &VolumeSpec) -> Result<MigrationStatus, SvcError>;
    /// Change the type of a volume in place. Returns false when the backend
    /// cannot do so and a migration is required instead.
    async fn retype(
        &self,
        volume: &VolumeSpec,
        new_type: &VolumeType,
    ) -> Result<bool, SvcError>;
}
