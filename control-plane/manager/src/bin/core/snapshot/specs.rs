use crate::controller::{
    registry::Registry,
    resources::{
        operations_helper::{GuardedOperationsHelper, ResourceSpecsLocked, SpecOperationsHelper},
        OperationGuardArc, ResourceMutex,
    },
};

use manager::errors::SvcError;
use vol_port::{
    transport_api::ResourceKind,
    types::v0::{
        store::snapshot::{SnapshotOperation, SnapshotSpec},
        transport::{
            CreateSnapshot, GroupSnapshotId, ReadDeleted, SnapshotId, SnapshotStatus, VolumeId,
        },
    },
};

impl ResourceSpecsLocked {
    /// Get the resource mutex of the given snapshot, honouring the
    /// soft-delete read mode.
    pub(crate) fn snapshot(
        &self,
        id: &SnapshotId,
        mode: ReadDeleted,
    ) -> Result<ResourceMutex<SnapshotSpec>, SvcError> {
        let not_found = || SvcError::SnapshotNotFound {
            snap_id: id.to_string(),
        };
        let snapshot = self
            .read()
            .snapshots
            .get(id)
            .cloned()
            .ok_or_else(not_found)?;
        let deleted = snapshot.lock().deleted;
        match mode {
            ReadDeleted::No if deleted => Err(not_found()),
            ReadDeleted::Only if !deleted => Err(not_found()),
            _ => Ok(snapshot),
        }
    }

    /// All snapshot specs matching the soft-delete read mode.
    pub(crate) fn snapshots(&self, mode: ReadDeleted) -> Vec<SnapshotSpec> {
        self.read()
            .snapshots
            .to_vec()
            .into_iter()
            .map(|s| s.lock().clone())
            .filter(|spec| match mode {
                ReadDeleted::No => !spec.deleted,
                ReadDeleted::Yes => true,
                ReadDeleted::Only => spec.deleted,
            })
            .collect()
    }

    /// The live snapshots taken from the given volume.
    pub(crate) fn snapshots_by_volume(
        &self,
        volume_id: &VolumeId,
    ) -> Vec<ResourceMutex<SnapshotSpec>> {
        self.read()
            .snapshots
            .to_vec()
            .into_iter()
            .filter(|snapshot| {
                let spec = snapshot.lock();
                !spec.deleted && &spec.volume_id == volume_id
            })
            .collect()
    }

    /// The live member snapshots of the given group snapshot.
    pub(crate) fn snapshots_by_group_snapshot(
        &self,
        group_snapshot_id: &GroupSnapshotId,
    ) -> Vec<ResourceMutex<SnapshotSpec>> {
        self.read()
            .snapshots
            .to_vec()
            .into_iter()
            .filter(|snapshot| {
                let spec = snapshot.lock();
                !spec.deleted && spec.group_snapshot_id.as_ref() == Some(group_snapshot_id)
            })
            .collect()
    }

    /// Get or create the resource mutex for the requested snapshot. The size
    /// of the owning volume is captured at this instant.
    pub(crate) fn get_or_create_snapshot(
        &self,
        request: &CreateSnapshot,
        volume_size: u64,
    ) -> ResourceMutex<SnapshotSpec> {
        let mut specs = self.write();
        if let Some(snapshot) = specs.snapshots.get(&request.uuid) {
            snapshot.clone()
        } else {
            specs
                .snapshots
                .insert(SnapshotSpec::from_request(request, volume_size))
        }
    }

    /// Insert a snapshot spec built outside a create request, eg a group
    /// snapshot child.
    pub(crate) fn insert_snapshot(&self, spec: SnapshotSpec) -> ResourceMutex<SnapshotSpec> {
        self.write().snapshots.insert(spec)
    }

    /// Remove the snapshot from the map.
    pub(crate) fn remove_snapshot(&self, id: &SnapshotId) {
        self.write().snapshots.remove(id);
    }
}

impl SpecOperationsHelper for SnapshotSpec {
    type Create = CreateSnapshot;

    fn dirty(&self) -> bool {
        self.operation
            .as_ref()
            .map(|op| op.result.is_some())
            .unwrap_or(false)
    }
    fn kind(&self) -> ResourceKind {
        ResourceKind::Snapshot
    }
    fn uuid_str(&self) -> String {
        self.uuid.to_string()
    }
    fn status_creating(&self) -> bool {
        self.status == SnapshotStatus::Creating
    }
    fn status_created(&self) -> bool {
        !self.deleted
            && !matches!(
                self.status,
                SnapshotStatus::Creating | SnapshotStatus::Deleting
            )
    }
    fn spec_deleting(&self) -> bool {
        self.status == SnapshotStatus::Deleting
    }
    fn spec_deleted(&self) -> bool {
        self.deleted
    }
    fn set_status_error(&mut self) {
        self.status = SnapshotStatus::Error;
    }
    fn start_create_op(&mut self) {
        use vol_port::types::v0::store::SpecTransaction;
        self.start_op(SnapshotOperation::Create);
    }
}

impl GuardedOperationsHelper for OperationGuardArc<SnapshotSpec> {
    type Create = CreateSnapshot;
    type Inner = SnapshotSpec;

    fn remove_spec(&self, registry: &Registry) {
        let uuid = self.lock().uuid.clone();
        registry.specs().remove_snapshot(&uuid);
    }
}
