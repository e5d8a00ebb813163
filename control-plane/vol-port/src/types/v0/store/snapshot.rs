//! Definition of snapshot types that can be saved to the persistent store.

use crate::types::v0::{
    store::{
        definitions::{ObjectKey, StorableObject, StorableObjectType},
        AsOperationSequencer, OperationSequence, ResourceUuid, SpecTransaction,
    },
    transport::{
        CreateSnapshot, GroupSnapshotId, ProjectId, SnapshotId, SnapshotStatus, UserId, VolumeId,
    },
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User specification of a snapshot.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SnapshotSpec {
    /// Snapshot Id.
    pub uuid: SnapshotId,
    /// The volume this snapshot was taken from.
    pub volume_id: VolumeId,
    /// The owning project.
    pub project_id: ProjectId,
    /// The creating user.
    pub user_id: UserId,
    /// Display name.
    pub name: String,
    /// Display description.
    pub description: Option<String>,
    /// Lifecycle status.
    pub status: SnapshotStatus,
    /// Size of the volume at the instant the snapshot was taken. Immutable;
    /// a volume created from this snapshot must be at least this large.
    pub volume_size: u64,
    /// Parent group snapshot, when taken as part of one.
    pub group_snapshot_id: Option<GroupSnapshotId>,
    /// Whether this snapshot counts towards project quota.
    pub use_quota: bool,
    /// Soft-delete flag.
    pub deleted: bool,
    /// When the snapshot was soft-deleted.
    pub deleted_at: Option<DateTime<Utc>>,
    /// When the snapshot row was created.
    pub created_at: DateTime<Utc>,
    /// Update of the state in progress.
    #[serde(skip)]
    pub sequencer: OperationSequence,
    /// Record of the operation in progress.
    pub operation: Option<SnapshotOperationState>,
}

impl AsOperationSequencer for SnapshotSpec {
    fn as_ref(&self) -> &OperationSequence {
        &self.sequencer
    }
    fn as_mut(&mut self) -> &mut OperationSequence {
        &mut self.sequencer
    }
}

impl ResourceUuid for SnapshotSpec {
    type Id = SnapshotId;
    fn uuid(&self) -> SnapshotId {
        self.uuid.clone()
    }
}

/// Operation State for a snapshot spec resource.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SnapshotOperationState {
    /// Record of the operation.
    pub operation: SnapshotOperation,
    /// Result of the operation.
    pub result: Option<bool>,
}

/// Available snapshot operations.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum SnapshotOperation {
    Create,
    Destroy,
}

impl SpecTransaction<SnapshotOperation> for SnapshotSpec {
    fn pending_op(&self) -> bool {
        self.operation.is_some()
    }

    fn commit_op(&mut self) {
        if let Some(op) = self.operation.clone() {
            match op.operation {
                SnapshotOperation::Create => {
                    self.status = SnapshotStatus::Available;
                }
                SnapshotOperation::Destroy => {
                    self.status = SnapshotStatus::Deleted;
                    self.deleted = true;
                    self.deleted_at = Some(Utc::now());
                }
            }
        }
        self.operation = None;
    }

    fn clear_op(&mut self) {
        if let Some(op) = self.operation.clone() {
            if let SnapshotOperation::Destroy = op.operation {
                self.status = SnapshotStatus::Available;
            }
        }
        self.operation = None;
    }

    fn start_op(&mut self, operation: SnapshotOperation) {
        if let SnapshotOperation::Destroy = &operation {
            self.status = SnapshotStatus::Deleting;
        }
        self.operation = Some(SnapshotOperationState {
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

/// Key used by the store to uniquely identify a SnapshotSpec structure.
pub struct SnapshotSpecKey(SnapshotId);

impl From<&SnapshotId> for SnapshotSpecKey {
    fn from(id: &SnapshotId) -> Self {
        Self(id.clone())
    }
}

impl ObjectKey for SnapshotSpecKey {
    fn key_type(&self) -> StorableObjectType {
        StorableObjectType::SnapshotSpec
    }
    fn key_uuid(&self) -> String {
        self.0.to_string()
    }
}

impl StorableObject for SnapshotSpec {
    type Key = SnapshotSpecKey;

    fn key(&self) -> Self::Key {
        SnapshotSpecKey(self.uuid.clone())
    }
}

impl SnapshotSpec {
    /// Build a new spec in `creating` status from the request and the size
    /// of the owning volume, captured at this instant.
    pub fn from_request(request: &CreateSnapshot, volume_size: u64) -> Self {
        Self {
            uuid: request.uuid.clone(),
            volume_id: request.volume_id.clone(),
            project_id: request.project_id.clone(),
            user_id: request.user_id.clone(),
            name: request.name.clone(),
            description: request.description.clone(),
            status: SnapshotStatus::Creating,
            volume_size,
            use_quota: true,
            created_at: Utc::now(),
            sequencer: OperationSequence::new(request.uuid.as_str()),
            ..Default::default()
        }
    }
}

impl PartialEq<CreateSnapshot> for SnapshotSpec {
    fn eq(&self, other: &CreateSnapshot) -> bool {
        self.uuid == other.uuid && self.volume_id == other.volume_id
    }
}
