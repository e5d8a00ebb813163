//! A fake backend driver: keeps provisioned resources in a set and supports
//! fault injection per operation, so the manager's failure paths can be
//! exercised without a storage array.

use super::{
    BackendDriver, GroupModelUpdate, GroupUpdateModel, MemberModelUpdate, VolumeModelUpdate,
};

use manager::errors::SvcError;
use vol_port::{
    transport_api::ResourceKind,
    types::v0::{
        store::{
            group::GroupSpec, group_snapshot::GroupSnapshotSpec, snapshot::SnapshotSpec,
            volume::VolumeSpec,
        },
        transport::{BackendHost, GroupStatus, ImageId, MigrationStatus, VolumeStatus, VolumeType},
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// The kind of failure to inject on the next call of an operation.
#[derive(Debug, Clone, Copy)]
pub(crate) enum FakeFault {
    /// The resource is busy on the array.
    Busy,
    /// A generic backend api failure.
    Api,
    /// The driver has not finished initialising.
    NotInitialized,
}

impl FakeFault {
    fn error(&self, id: &str, host: &str) -> SvcError {
        match self {
            Self::Busy => SvcError::VolumeIsBusy {
                vol_id: id.to_string(),
            },
            Self::Api => SvcError::BackendApi {
                host: host.to_string(),
                detail: "injected backend failure".to_string(),
            },
            Self::NotInitialized => SvcError::DriverNotInitialized {
                host: host.to_string(),
            },
        }
    }
}

#[derive(Debug, Default)]
struct FakeBackendInner {
    volumes: HashSet<String>,
    snapshots: HashSet<String>,
    groups: HashSet<String>,
    group_snapshots: HashSet<String>,
    /// One-shot faults keyed by operation name.
    faults: HashMap<&'static str, FakeFault>,
    /// Sticky faults keyed by operation name; not cleared when hit.
    sticky_faults: HashMap<&'static str, FakeFault>,
    /// Member volumes which fail when their group is deleted.
    failing_members: HashSet<String>,
    /// Whether the backend keeps volume-backed images.
    image_clone_supported: bool,
    /// Whether retype succeeds without a migration.
    retype_in_place: bool,
    /// Number of progress polls a migration reports `migrating` for.
    migration_polls: u32,
}

/// Fake backend driver with injectable failures.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeBackend {
    inner: Arc<Mutex<FakeBackendInner>>,
}

impl FakeBackend {
    /// A fake backend which succeeds at everything.
    pub(crate) fn new() -> Self {
        let fake = Self::default();
        fake.inner.lock().retype_in_place = true;
        fake
    }
    /// Inject a one-shot fault for the named operation.
    pub(crate) fn fail(&self, operation: &'static str, fault: FakeFault) {
        self.inner.lock().faults.insert(operation, fault);
    }
    /// Inject a fault for the named operation which fires on every call.
    pub(crate) fn fail_always(&self, operation: &'static str, fault: FakeFault) {
        self.inner.lock().sticky_faults.insert(operation, fault);
    }
    /// Make the deletion of the given group member report `error_deleting`.
    pub(crate) fn fail_member_delete(&self, vol_id: &str) {
        self.inner.lock().failing_members.insert(vol_id.to_string());
    }
    /// Toggle volume-backed image clone support.
    pub(crate) fn support_image_clone(&self, supported: bool) {
        self.inner.lock().image_clone_supported = supported;
    }
    /// Toggle in-place retype support.
    pub(crate) fn retype_in_place(&self, in_place: bool) {
        self.inner.lock().retype_in_place = in_place;
    }
    /// Make migrations asynchronous, reporting `migrating` for the given
    /// number of progress polls.
    pub(crate) fn migration_polls(&self, polls: u32) {
        self.inner.lock().migration_polls = polls;
    }
    /// Whether the backend currently holds the given volume.
    pub(crate) fn has_volume(&self, id: &str) -> bool {
        self.inner.lock().volumes.contains(id)
    }
    /// Whether the backend currently holds the given snapshot.
    pub(crate) fn has_snapshot(&self, id: &str) -> bool {
        self.inner.lock().snapshots.contains(id)
    }
    /// Drop a volume behind the manager's back, to exercise idempotent delete.
    pub(crate) fn forget_volume(&self, id: &str) {
        self.inner.lock().volumes.remove(id);
    }

    fn fault(&self, operation: &'static str) -> Option<FakeFault> {
        let mut inner = self.inner.lock();
        inner
            .faults
            .remove(operation)
            .or_else(|| inner.sticky_faults.get(operation).copied())
    }
    fn check(&self, operation: &'static str, id: &str, host: &str) -> Result<(), SvcError> {
        match self.fault(operation) {
            Some(fault) => Err(fault.error(id, host)),
            None => Ok(()),
        }
    }
}

fn host_str(host: &Option<BackendHost>) -> String {
    host.as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "fake".to_string())
}

#[async_trait]
impl BackendDriver for FakeBackend {
    async fn create_volume(&self, volume: &VolumeSpec) -> Result<(), SvcError> {
        self.check("create_volume", volume.uuid.as_str(), &host_str(&volume.host))?;
        self.inner.lock().volumes.insert(volume.uuid.to_string());
        Ok(())
    }

    async fn create_volume_from_snapshot(
        &self,
        volume: &VolumeSpec,
        snapshot: &SnapshotSpec,
    ) -> Result<(), SvcError> {
        self.check("create_volume_from_snapshot", volume.uuid.as_str(), &host_str(&volume.host))?;
        let mut inner = self.inner.lock();
        if !inner.snapshots.contains(snapshot.uuid.as_str()) {
            return Err(SvcError::NotFound {
                kind: ResourceKind::Snapshot,
                id: snapshot.uuid.to_string(),
            });
        }
        inner.volumes.insert(volume.uuid.to_string());
        Ok(())
    }

    async fn create_cloned_volume(
        &self,
        volume: &VolumeSpec,
        source: &VolumeSpec,
    ) -> Result<(), SvcError> {
        self.check("create_cloned_volume", volume.uuid.as_str(), &host_str(&volume.host))?;
        let mut inner = self.inner.lock();
        if !inner.volumes.contains(source.uuid.as_str()) {
            return Err(SvcError::NotFound {
                kind: ResourceKind::Volume,
                id: source.uuid.to_string(),
            });
        }
        inner.volumes.insert(volume.uuid.to_string());
        Ok(())
    }

    async fn clone_image(
        &self,
        volume: &VolumeSpec,
        _image: &ImageId,
    ) -> Result<Option<VolumeModelUpdate>, SvcError> {
        self.check("clone_image", volume.uuid.as_str(), &host_str(&volume.host))?;
        let mut inner = self.inner.lock();
        if !inner.image_clone_supported {
            return Ok(None);
        }
        inner.volumes.insert(volume.uuid.to_string());
        Ok(Some(VolumeModelUpdate::default()))
    }

    async fn copy_image_to_volume(
        &self,
        volume: &VolumeSpec,
        _image: &ImageId,
    ) -> Result<(), SvcError> {
        self.check("copy_image_to_volume", volume.uuid.as_str(), &host_str(&volume.host))?;
        self.inner.lock().volumes.insert(volume.uuid.to_string());
        Ok(())
    }

    async fn delete_volume(&self, volume: &VolumeSpec) -> Result<(), SvcError> {
        self.check("delete_volume", volume.uuid.as_str(), &host_str(&volume.host))?;
        let mut inner = self.inner.lock();
        if !inner.volumes.remove(volume.uuid.as_str()) {
            return Err(SvcError::NotFound {
                kind: ResourceKind::Volume,
                id: volume.uuid.to_string(),
            });
        }
        Ok(())
    }

    async fn extend_volume(&self, volume: &VolumeSpec, _new_size: u64) -> Result<(), SvcError> {
        self.check("extend_volume", volume.uuid.as_str(), &host_str(&volume.host))?;
        if !self.has_volume(volume.uuid.as_str()) {
            return Err(SvcError::NotFound {
                kind: ResourceKind::Volume,
                id: volume.uuid.to_string(),
            });
        }
        Ok(())
    }

    async fn create_snapshot(&self, snapshot: &SnapshotSpec) -> Result<(), SvcError> {
        self.check("create_snapshot", snapshot.uuid.as_str(), "fake")?;
        let mut inner = self.inner.lock();
        if !inner.volumes.contains(snapshot.volume_id.as_str()) {
            return Err(SvcError::NotFound {
                kind: ResourceKind::Volume,
                id: snapshot.volume_id.to_string(),
            });
        }
        inner.snapshots.insert(snapshot.uuid.to_string());
        Ok(())
    }

    async fn delete_snapshot(&self, snapshot: &SnapshotSpec) -> Result<(), SvcError> {
        self.check("delete_snapshot", snapshot.uuid.as_str(), "fake")?;
        let mut inner = self.inner.lock();
        if !inner.snapshots.remove(snapshot.uuid.as_str()) {
            return Err(SvcError::NotFound {
                kind: ResourceKind::Snapshot,
                id: snapshot.uuid.to_string(),
            });
        }
        Ok(())
    }

    async fn create_group(&self, group: &GroupSpec) -> Result<GroupModelUpdate, SvcError> {
        self.check("create_group", group.uuid.as_str(), &host_str(&group.host))?;
        self.inner.lock().groups.insert(group.uuid.to_string());
        Ok(GroupModelUpdate {
            status: GroupStatus::Available,
        })
    }

    async fn delete_group(
        &self,
        group: &GroupSpec,
        volumes: &[VolumeSpec],
    ) -> Result<(GroupModelUpdate, Vec<MemberModelUpdate>), SvcError> {
        self.check("delete_group", group.uuid.as_str(), &host_str(&group.host))?;
        let mut inner = self.inner.lock();
        inner.groups.remove(group.uuid.as_str());
        let members = volumes
            .iter()
            .map(|volume| {
                let failed = inner.failing_members.contains(volume.uuid.as_str());
                if !failed {
                    inner.volumes.remove(volume.uuid.as_str());
                }
                MemberModelUpdate {
                    uuid: volume.uuid.clone(),
                    status: if failed {
                        VolumeStatus::ErrorDeleting
                    } else {
                        VolumeStatus::Deleted
                    },
                }
            })
            .collect();
        Ok((
            GroupModelUpdate {
                status: GroupStatus::Deleted,
            },
            members,
        ))
    }

    async fn update_group(
        &self,
        group: &GroupSpec,
        add_volumes: &[VolumeSpec],
        remove_volumes: &[VolumeSpec],
    ) -> Result<GroupUpdateModel, SvcError> {
        self.check("update_group", group.uuid.as_str(), &host_str(&group.host))?;
        Ok(GroupUpdateModel {
            status: GroupStatus::Available,
            added: add_volumes
                .iter()
                .map(|volume| MemberModelUpdate {
                    uuid: volume.uuid.clone(),
                    status: VolumeStatus::Available,
                })
                .collect(),
            removed: remove_volumes
                .iter()
                .map(|volume| MemberModelUpdate {
                    uuid: volume.uuid.clone(),
                    status: VolumeStatus::Available,
                })
                .collect(),
        })
    }

    async fn create_group_snapshot(
        &self,
        group_snapshot: &GroupSnapshotSpec,
        snapshots: &[SnapshotSpec],
    ) -> Result<(), SvcError> {
        self.check("create_group_snapshot", group_snapshot.uuid.as_str(), "fake")?;
        let mut inner = self.inner.lock();
        inner
            .group_snapshots
            .insert(group_snapshot.uuid.to_string());
        for snapshot in snapshots {
            inner.snapshots.insert(snapshot.uuid.to_string());
        }
        Ok(())
    }

    async fn delete_group_snapshot(
        &self,
        group_snapshot: &GroupSnapshotSpec,
        snapshots: &[SnapshotSpec],
    ) -> Result<(), SvcError> {
        self.check("delete_group_snapshot", group_snapshot.uuid.as_str(), "fake")?;
        let mut inner = self.inner.lock();
        inner.group_snapshots.remove(group_snapshot.uuid.as_str());
        for snapshot in snapshots {
            inner.snapshots.remove(snapshot.uuid.as_str());
        }
        Ok(())
    }

    async fn migrate_volume(
        &self,
        volume: &VolumeSpec,
        destination: &BackendHost,
    ) -> Result<(bool, Option<VolumeModelUpdate>), SvcError> {
        self.check("migrate_volume", volume.uuid.as_str(), &host_str(&volume.host))?;
        let polls = self.inner.lock().migration_polls;
        if polls == 0 {
            Ok((
                true,
                Some(VolumeModelUpdate {
                    status: None,
                    host: Some(destination.clone()),
                }),
            ))
        } else {
            Ok((false, None))
        }
    }

    async fn migration_progress(&self, volume: &VolumeSpec) -> Result<MigrationStatus, SvcError> {
        self.check("migration_progress", volume.uuid.as_str(), &host_str(&volume.host))?;
        let mut inner = self.inner.lock();
        if inner.migration_polls > 0 {
            inner.migration_polls -= 1;
            Ok(MigrationStatus::Migrating)
        } else {
            Ok(MigrationStatus::Success)
        }
    }

    async fn retype(
        &self,
        volume: &VolumeSpec,
        _new_type: &VolumeType,
    ) -> Result<bool, SvcError> {
        self.check("retype", volume.uuid.as_str(), &host_str(&volume.host))?;
        Ok(self.inner.lock().retype_in_place)
    }
}
