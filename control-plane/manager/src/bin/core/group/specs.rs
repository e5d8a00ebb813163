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
        store::{
            group::{GroupOperation, GroupSpec},
            group_snapshot::{GroupSnapshotOperation, GroupSnapshotSpec},
            snapshot::SnapshotSpec,
            volume::VolumeSpec,
        },
        transport::{
            CreateGroup, CreateGroupFromSource, CreateGroupSnapshot, GroupId, GroupSnapshotId,
            GroupSnapshotStatus, GroupStatus, ReadDeleted,
        },
    },
};

impl ResourceSpecsLocked {
    /// Get the resource mutex of the given group, honouring the soft-delete
    /// read mode.
    pub(crate) fn group(
        &self,
        id: &GroupId,
        mode: ReadDeleted,
    ) -> Result<ResourceMutex<GroupSpec>, SvcError> {
        let not_found = || SvcError::GroupNotFound {
            group_id: id.to_string(),
        };
        let group = self.read().groups.get(id).cloned().ok_or_else(not_found)?;
        let deleted = group.lock().deleted;
        match mode {
            ReadDeleted::No if deleted => Err(not_found()),
            ReadDeleted::Only if !deleted => Err(not_found()),
            _ => Ok(group),
        }
    }

    /// All group specs matching the soft-delete read mode.
    pub(crate) fn groups(&self, mode: ReadDeleted) -> Vec<GroupSpec> {
        self.read()
            .groups
            .to_vec()
            .into_iter()
            .map(|g| g.lock().clone())
            .filter(|spec| match mode {
                ReadDeleted::No => !spec.deleted,
                ReadDeleted::Yes => true,
                ReadDeleted::Only => spec.deleted,
            })
            .collect()
    }

    /// Get or create the resource mutex for the requested group.
    pub(crate) fn get_or_create_group(&self, request: &CreateGroup) -> ResourceMutex<GroupSpec> {
        let mut specs = self.write();
        if let Some(group) = specs.groups.get(&request.uuid) {
            group.clone()
        } else {
            specs.groups.insert(GroupSpec::from(request))
        }
    }

    /// Get or create the resource mutex for a group cloned from a source.
    pub(crate) fn get_or_create_group_from_source(
        &self,
        request: &CreateGroupFromSource,
    ) -> ResourceMutex<GroupSpec> {
        let mut specs = self.write();
        if let Some(group) = specs.groups.get(&request.uuid) {
            group.clone()
        } else {
            specs.groups.insert(GroupSpec::from(request))
        }
    }

    /// Remove the group from the map.
    pub(crate) fn remove_group(&self, id: &GroupId) {
        self.write().groups.remove(id);
    }

    /// Get the resource mutex of the given group snapshot, honouring the
    /// soft-delete read mode.
    pub(crate) fn group_snapshot(
        &self,
        id: &GroupSnapshotId,
        mode: ReadDeleted,
    ) -> Result<ResourceMutex<GroupSnapshotSpec>, SvcError> {
        let not_found = || SvcError::GroupSnapshotNotFound {
            group_snap_id: id.to_string(),
        };
        let snapshot = self
            .read()
            .group_snapshots
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

    /// All group snapshot specs matching the soft-delete read mode.
    pub(crate) fn group_snapshots(&self, mode: ReadDeleted) -> Vec<GroupSnapshotSpec> {
        self.read()
            .group_snapshots
            .to_vec()
            .into_iter()
            .map(|g| g.lock().clone())
            .filter(|spec| match mode {
                ReadDeleted::No => !spec.deleted,
                ReadDeleted::Yes => true,
                ReadDeleted::Only => spec.deleted,
            })
            .collect()
    }

    /// Get or create the resource mutex for the requested group snapshot.
    pub(crate) fn get_or_create_group_snapshot(
        &self,
        request: &CreateGroupSnapshot,
    ) -> ResourceMutex<GroupSnapshotSpec> {
        let mut specs = self.write();
        if let Some(snapshot) = specs.group_snapshots.get(&request.uuid) {
            snapshot.clone()
        } else {
            specs.group_snapshots.insert(GroupSnapshotSpec::from(request))
        }
    }

    /// Remove the group snapshot from the map.
    pub(crate) fn remove_group_snapshot(&self, id: &GroupSnapshotId) {
        self.write().group_snapshots.remove(id);
    }
}

/// Pair each new member volume with its source snapshot, in member order.
/// Every member must name a snapshot and every named snapshot must be among
/// the children of the source group snapshot.
pub(crate) fn sort_snapshots(
    volumes: &[VolumeSpec],
    snapshots: &[SnapshotSpec],
) -> Result<Vec<(VolumeSpec, SnapshotSpec)>, SvcError> {
    if volumes.is_empty() || snapshots.is_empty() {
        return Err(SvcError::InvalidInput {
            detail: "a group restored from a snapshot needs at least one member on both sides"
                .to_string(),
        });
    }
    volumes
        .iter()
        .map(|volume| {
            let snap_id = volume
                .source
                .as_ref()
                .and_then(|source| source.as_snapshot())
                .ok_or_else(|| SvcError::InvalidVolume {
                    vol_id: volume.uuid.to_string(),
                    detail: "member volume names no source snapshot".to_string(),
                })?;
            let snapshot = snapshots
                .iter()
                .find(|snapshot| &snapshot.uuid == snap_id)
                .ok_or_else(|| SvcError::SnapshotNotFound {
                    snap_id: snap_id.to_string(),
                })?;
            Ok((volume.clone(), snapshot.clone()))
        })
        .collect()
}

/// Pair each new member volume with its source volume, in member order.
pub(crate) fn sort_source_volumes(
    volumes: &[VolumeSpec],
    sources: &[VolumeSpec],
) -> Result<Vec<(VolumeSpec, VolumeSpec)>, SvcError> {
    if volumes.is_empty() || sources.is_empty() {
        return Err(SvcError::InvalidInput {
            detail: "a group cloned from a group needs at least one member on both sides"
                .to_string(),
        });
    }
    volumes
        .iter()
        .map(|volume| {
            let vol_id = volume
                .source
                .as_ref()
                .and_then(|source| source.as_volume())
                .ok_or_else(|| SvcError::InvalidVolume {
                    vol_id: volume.uuid.to_string(),
                    detail: "member volume names no source volume".to_string(),
                })?;
            let source = sources
                .iter()
                .find(|source| &source.uuid == vol_id)
                .ok_or_else(|| SvcError::VolumeNotFound {
                    vol_id: vol_id.to_string(),
                })?;
            Ok((volume.clone(), source.clone()))
        })
        .collect()
}

impl SpecOperationsHelper for GroupSpec {
    type Create = CreateGroup;

    fn dirty(&self) -> bool {
        self.operation
            .as_ref()
            .map(|op| op.result.is_some())
            .unwrap_or(false)
    }
    fn kind(&self) -> ResourceKind {
        ResourceKind::Group
    }
    fn uuid_str(&self) -> String {
        self.uuid.to_string()
    }
    fn status_creating(&self) -> bool {
        self.status == GroupStatus::Creating
    }
    fn status_created(&self) -> bool {
        !self.deleted && !matches!(self.status, GroupStatus::Creating | GroupStatus::Deleting)
    }
    fn spec_deleting(&self) -> bool {
        self.status == GroupStatus::Deleting
    }
    fn spec_deleted(&self) -> bool {
        self.deleted
    }
    fn set_status_error(&mut self) {
        self.status = GroupStatus::Error;
    }
    fn start_create_op(&mut self) {
        use vol_port::types::v0::store::SpecTransaction;
        self.start_op(GroupOperation::Create);
    }
}

impl GuardedOperationsHelper for OperationGuardArc<GroupSpec> {
    type Create = CreateGroup;
    type Inner = GroupSpec;

    fn remove_spec(&self, registry: &Registry) {
        let uuid = self.lock().uuid.clone();
        registry.specs().remove_group(&uuid);
    }
}

impl SpecOperationsHelper for GroupSnapshotSpec {
    type Create = CreateGroupSnapshot;

    fn dirty(&self) -> bool {
        self.operation
            .as_ref()
            .map(|op| op.result.is_some())
            .unwrap_or(false)
    }
    fn kind(&self) -> ResourceKind {
        ResourceKind::GroupSnapshot
    }
    fn uuid_str(&self) -> String {
        self.uuid.to_string()
    }
    fn status_creating(&self) -> bool {
        self.status == GroupSnapshotStatus::Creating
    }
    fn status_created(&self) -> bool {
        !self.deleted
            && !matches!(
                self.status,
                GroupSnapshotStatus::Creating | GroupSnapshotStatus::Deleting
            )
    }
    fn spec_deleting(&self) -> bool {
        self.status == GroupSnapshotStatus::Deleting
    }
    fn spec_deleted(&self) -> bool {
        self.deleted
    }
    fn set_status_error(&mut self) {
        self.status = GroupSnapshotStatus::Error;
    }
    fn start_create_op(&mut self) {
        use vol_port::types::v0::store::SpecTransaction;
        self.start_op(GroupSnapshotOperation::Create);
    }
}

impl GuardedOperationsHelper for OperationGuardArc<GroupSnapshotSpec> {
    type Create = CreateGroupSnapshot;
    type Inner = GroupSnapshotSpec;

    fn remove_spec(&self, registry: &Registry) {
        let uuid = self.lock().uuid.clone();
        registry.specs().remove_group_snapshot(&uuid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vol_port::types::v0::{
        store::volume::VolumeContentSource,
        transport::{SnapshotId, VolumeId},
    };

    fn member_from_snapshot(snap_id: &SnapshotId) -> VolumeSpec {
        VolumeSpec {
            uuid: VolumeId::new(),
            source: Some(VolumeContentSource::Snapshot(snap_id.clone())),
            ..Default::default()
        }
    }

    fn child_snapshot(uuid: &SnapshotId) -> SnapshotSpec {
        SnapshotSpec {
            uuid: uuid.clone(),
            ..Default::default()
        }
    }

    #[test]
    fn snapshots_pair_in_member_order() {
        let first = SnapshotId::new();
        let second = SnapshotId::new();
        let members = vec![member_from_snapshot(&second), member_from_snapshot(&first)];
        let children = vec![child_snapshot(&first), child_snapshot(&second)];

        let pairs = sort_snapshots(&members, &children).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].1.uuid, second);
        assert_eq!(pairs[1].1.uuid, first);
    }

    #[test]
    fn empty_source_is_invalid() {
        let members = vec![member_from_snapshot(&SnapshotId::new())];
        assert!(matches!(
            sort_snapshots(&members, &[]),
            Err(SvcError::InvalidInput { .. })
        ));
        assert!(matches!(
            sort_source_volumes(&[], &[VolumeSpec::default()]),
            Err(SvcError::InvalidInput { .. })
        ));
    }

    #[test]
    fn unmatched_snapshot_is_reported() {
        let members = vec![member_from_snapshot(&SnapshotId::new())];
        let children = vec![child_snapshot(&SnapshotId::new())];
        assert!(matches!(
            sort_snapshots(&members, &children),
            Err(SvcError::SnapshotNotFound { .. })
        ));
    }

    #[test]
    fn unmatched_source_volume_is_reported() {
        let source = VolumeSpec {
            uuid: VolumeId::new(),
            ..Default::default()
        };
        let member = VolumeSpec {
            uuid: VolumeId::new(),
            source: Some(VolumeContentSource::Volume(VolumeId::new())),
            ..Default::default()
        };
        assert!(matches!(
            sort_source_volumes(&[member], &[source]),
            Err(SvcError::VolumeNotFound { .. })
        ));
    }
}
