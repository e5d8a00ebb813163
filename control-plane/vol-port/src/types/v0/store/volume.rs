//! Definition of volume types that can be saved to the persistent store.

use crate::types::v0::{
    store::{
        definitions::{ObjectKey, StorableObject, StorableObjectType},
        AsOperationSequencer, OperationSequence, ResourceUuid, SpecTransaction,
    },
    transport::{
        AttachStatus, AvailabilityZone, BackendHost, CreateVolume, GroupId, ImageId,
        MigrationStatus, ProjectId, SnapshotId, UserId, VolumeId, VolumeStatus, VolumeType,
    },
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What a volume's content was materialized from.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum VolumeContentSource {
    /// Created from a snapshot.
    Snapshot(SnapshotId),
    /// Cloned from another volume.
    Volume(VolumeId),
    /// Copied or cloned from an image.
    Image(ImageId),
}

impl VolumeContentSource {
    /// The snapshot id, if sourced from a snapshot.
    pub fn as_snapshot(&self) -> Option<&SnapshotId> {
        match self {
            Self::Snapshot(id) => Some(id),
            _ => None,
        }
    }
    /// The source volume id, if cloned from a volume.
    pub fn as_volume(&self) -> Option<&VolumeId> {
        match self {
            Self::Volume(id) => Some(id),
            _ => None,
        }
    }
}

/// User specification of a volume, the persisted source of truth.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct VolumeSpec {
    /// Volume Id.
    pub uuid: VolumeId,
    /// The owning project, charged quota when `use_quota` is set.
    pub project_id: ProjectId,
    /// The creating user.
    pub user_id: UserId,
    /// Display name.
    pub name: String,
    /// Display description.
    pub description: Option<String>,
    /// Size in GiB.
    pub size: u64,
    /// Lifecycle status.
    pub status: VolumeStatus,
    /// The status to return to when a transitional operation completes.
    pub previous_status: Option<VolumeStatus>,
    /// Attachment axis, independent from `status`.
    pub attach_status: AttachStatus,
    /// Pool-qualified placement, set once scheduled.
    pub host: Option<BackendHost>,
    /// Resolved availability zone.
    pub availability_zone: AvailabilityZone,
    /// The volume type, if any.
    pub volume_type: Option<VolumeType>,
    /// What the content was materialized from, if not blank.
    pub source: Option<VolumeContentSource>,
    /// Membership of a volume group.
    pub group_id: Option<GroupId>,
    /// Status of an in-flight or finished migration.
    pub migration_status: Option<MigrationStatus>,
    /// Key id in the key manager, for encrypted volumes.
    pub encryption_key_id: Option<String>,
    /// Whether multiple simultaneous attachments are allowed.
    pub multiattach: bool,
    /// Whether this volume counts towards project quota. False for internal
    /// temporary volumes, eg migration scratch space.
    pub use_quota: bool,
    /// Whether the volume holds a bootable image.
    pub bootable: bool,
    /// Image metadata carried over from the image service or a source volume.
    pub image_metadata: HashMap<String, String>,
    /// Free-form user metadata.
    pub metadata: HashMap<String, String>,
    /// Soft-delete flag; tombstones stay in the store.
    pub deleted: bool,
    /// When the volume was soft-deleted.
    pub deleted_at: Option<DateTime<Utc>>,
    /// When the volume row was created.
    pub created_at: DateTime<Utc>,
    /// Update of the state in progress.
    #[serde(skip)]
    pub sequencer: OperationSequence,
    /// Record of the operation in progress.
    pub operation: Option<VolumeOperationState>,
}

impl AsOperationSequencer for VolumeSpec {
    fn as_ref(&self) -> &OperationSequence {
        &self.sequencer
    }
    fn as_mut(&mut self) -> &mut OperationSequence {
        &mut self.sequencer
    }
}

impl ResourceUuid for VolumeSpec {
    type Id = VolumeId;
    fn uuid(&self) -> VolumeId {
        self.uuid.clone()
    }
}

/// Operation State for a volume spec resource.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VolumeOperationState {
    /// Record of the operation.
    pub operation: VolumeOperation,
    /// Result of the operation.
    pub result: Option<bool>,
}

/// Available volume operations.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum VolumeOperation {
    Create,
    Destroy {
        force: bool,
        cascade: bool,
    },
    Extend(u64),
    Retype {
        new_type: VolumeType,
        /// The destination when the retype needs a migration.
        new_host: Option<BackendHost>,
    },
    /// Reserve for an upcoming attach.
    Reserve,
    Attach,
    Detach,
}

impl SpecTransaction<VolumeOperation> for VolumeSpec {
    fn pending_op(&self) -> bool {
        self.operation.is_some()
    }

    fn commit_op(&mut self) {
        if let Some(op) = self.operation.clone() {
            match op.operation {
                VolumeOperation::Create => {
                    self.status = VolumeStatus::Available;
                    self.attach_status = AttachStatus::Detached;
                }
                VolumeOperation::Destroy { .. } => {
                    self.status = VolumeStatus::Deleted;
                    self.deleted = true;
                    self.deleted_at = Some(Utc::now());
                    self.previous_status = None;
                }
                VolumeOperation::Extend(new_size) => {
                    self.size = new_size;
                    self.status = self.previous_status.take().unwrap_or(VolumeStatus::Available);
                }
                VolumeOperation::Retype { new_type, new_host } => {
                    self.volume_type = Some(new_type);
                    if let Some(host) = new_host {
                        self.host = Some(host);
                        self.migration_status = Some(MigrationStatus::Success);
                    }
                    self.status = self.previous_status.take().unwrap_or(VolumeStatus::Available);
                }
                VolumeOperation::Reserve => {
                    // stays `attaching` until the attach completes
                }
                VolumeOperation::Attach => {
                    self.status = VolumeStatus::InUse;
                    self.attach_status = AttachStatus::Attached;
                }
                VolumeOperation::Detach => {
                    self.status = VolumeStatus::Available;
                    self.attach_status = AttachStatus::Detached;
                }
            }
        }
        self.clear_pending();
    }

    fn clear_op(&mut self) {
        if let Some(op) = self.operation.clone() {
            match op.operation {
                VolumeOperation::Create => {}
                VolumeOperation::Destroy { .. }
                | VolumeOperation::Extend(_)
                | VolumeOperation::Retype { .. }
                | VolumeOperation::Detach => {
                    if let Some(previous) = self.previous_status.take() {
                        self.status = previous;
                    }
                }
                VolumeOperation::Reserve | VolumeOperation::Attach => {
                    if let Some(previous) = self.previous_status.take() {
                        self.status = previous;
                    }
                }
            }
        }
        self.clear_pending();
    }

    fn start_op(&mut self, operation: VolumeOperation) {
        match &operation {
            VolumeOperation::Create => {}
            VolumeOperation::Destroy { .. } => {
                self.previous_status = Some(self.status);
                self.status = VolumeStatus::Deleting;
            }
            VolumeOperation::Extend(_) => {
                self.previous_status = Some(self.status);
                self.status = VolumeStatus::Extending;
            }
            VolumeOperation::Retype { .. } => {
                self.previous_status = Some(self.status);
                self.status = VolumeStatus::Retyping;
            }
            VolumeOperation::Reserve => {
                self.previous_status = Some(self.status);
                self.status = VolumeStatus::Attaching;
            }
            VolumeOperation::Attach => {
                self.previous_status = Some(self.status);
            }
            VolumeOperation::Detach => {
                self.previous_status = Some(self.status);
                self.status = VolumeStatus::Detaching;
            }
        }
        self.operation = Some(VolumeOperationState {
            operation,
            result: None,
        });
    }

    fn set_op_result(&mut self, result: bool) {
        if let Some(op) = &mut self.operation {
            op.result = Some(result);
        }
    }

    fn operation_result(&self) -> Option<Option<bool>> {
        self.operation.as_ref().map(|op| op.result)
    }
}

impl VolumeSpec {
    fn clear_pending(&mut self) {
        self.operation = None;
    }
    /// Whether a non-deleted snapshot may still reference this volume.
    pub fn deletable_status(&self) -> bool {
        self.status.deletable()
    }
}

/// Key used by the store to uniquely identify a VolumeSpec structure.
pub struct VolumeSpecKey(VolumeId);

impl From<&VolumeId> for VolumeSpecKey {
    fn from(id: &VolumeId) -> Self {
        Self(id.clone())
    }
}

impl ObjectKey for VolumeSpecKey {
    fn key_type(&self) -> StorableObjectType {
        StorableObjectType::VolumeSpec
    }
    fn key_uuid(&self) -> String {
        self.0.to_string()
    }
}

impl StorableObject for VolumeSpec {
    type Key = VolumeSpecKey;

    fn key(&self) -> Self::Key {
        VolumeSpecKey(self.uuid.clone())
    }
}

impl From<&CreateVolume> for VolumeSpec {
    fn from(request: &CreateVolume) -> Self {
        let source = match (&request.snapshot_id, &request.source_volid, &request.image_id) {
            (Some(snap), _, _) => Some(VolumeContentSource::Snapshot(snap.clone())),
            (_, Some(vol), _) => Some(VolumeContentSource::Volume(vol.clone())),
            (_, _, Some(image)) => Some(VolumeContentSource::Image(image.clone())),
            _ => None,
        };
        Self {
            uuid: request.uuid.clone(),
            project_id: request.project_id.clone(),
            user_id: request.user_id.clone(),
            name: request.name.clone(),
            description: request.description.clone(),
            size: request.size,
            status: VolumeStatus::Creating,
            attach_status: AttachStatus::Detached,
            availability_zone: request.availability_zone.clone().unwrap_or_default(),
            volume_type: request.volume_type.clone(),
            source,
            group_id: request.group_id.clone(),
            multiattach: request.multiattach,
            use_quota: true,
            metadata: request.metadata.clone(),
            created_at: Utc::now(),
            sequencer: OperationSequence::new(request.uuid.as_str()),
            ..Default::default()
        }
    }
}

impl PartialEq<CreateVolume> for VolumeSpec {
    fn eq(&self, other: &CreateVolume) -> bool {
        self.uuid == other.uuid
            && self.project_id == other.project_id
            && self.size == other.size
            && self.name == other.name
    }
}
