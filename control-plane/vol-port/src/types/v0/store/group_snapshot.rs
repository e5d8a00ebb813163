//! Definition of group snapshot types that can be saved to the persistent store.

use crate::types::v0::{
    store::{
        definitions::{ObjectKey, StorableObject, StorableObjectType},
        AsOperationSequencer, OperationSequence, ResourceUuid, SpecTransaction,
    },
    transport::{CreateGroupSnapshot, GroupId, GroupSnapshotId, GroupSnapshotStatus, ProjectId, UserId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User specification of a group snapshot; the per-volume children are
/// regular `SnapshotSpec`s tagged with this parent's id.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct GroupSnapshotSpec {
    /// Group snapshot Id.
    pub uuid: GroupSnapshotId,
    /// The snapshotted group.
    pub group_id: GroupId,
    /// The owning project.
    pub project_id: ProjectId,
    /// The creating user.
    pub user_id: UserId,
    /// Display name.
    pub name: String,
    /// Lifecycle status.
    pub status: GroupSnapshotStatus,
    /// Soft-delete flag.
    pub deleted: bool,
    /// When the group snapshot was soft-deleted.
    pub deleted_at: Option<DateTime<Utc>>,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// Update of the state in progress.
    #[serde(skip)]
    pub sequencer: OperationSequence,
    /// Record of the operation in progress.
    pub operation: Option<GroupSnapshotOperationState>,
}

impl AsOperationSequencer for GroupSnapshotSpec {
    fn as_ref(&self) -> &OperationSequence {
        &self.sequencer
    }
    fn as_mut(&mut self) -> &mut OperationSequence {
        &mut self.sequencer
    }
}

impl ResourceUuid for GroupSnapshotSpec {
    type Id = GroupSnapshotId;
    fn uuid(&self) -> GroupSnapshotId {
        self.uuid.clone()
    }
}

/// Operation State for a group snapshot spec resource.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GroupSnapshotOperationState {
    /// Record of the operation.
    pub operation: GroupSnapshotOperation,
    /// Result of the operation.
    pub result: Option<bool>,
}

/// Available group snapshot operations.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum GroupSnapshotOperation {
    Create,
    Destroy,
}

impl SpecTransaction<GroupSnapshotOperation> for GroupSnapshotSpec {
    fn pending_op(&self) -> bool {
        self.operation.is_some()
    }

    fn commit_op(&mut self) {
        if let Some(op) = self.operation.clone() {
            match op.operation {
                GroupSnapshotOperation::Create => {
                    self.status = GroupSnapshotStatus::Available;
                }
                GroupSnapshotOperation::Destroy => {
                    self.status = GroupSnapshotStatus::Deleted;
                    self.deleted = true;
                    self.deleted_at = Some(Utc::now());
                }
            }
        }
        self.operation = None;
    }

    fn clear_op(&mut self) {
        if let Some(op) = self.operation.clone() {
            if let GroupSnapshotOperation::Destroy = op.operation {
                self.status = GroupSnapshotStatus::Available;
            }
        }
        self.operation = None;
    }

    fn start_op(&mut self, operation: GroupSnapshotOperation) {
        if let GroupSnapshotOperation::Destroy = &operation {
            self.status = GroupSnapshotStatus::Deleting;
        }
        self.operation = Some(GroupSnapshotOperationState {
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

/// Key used by the store to uniquely identify a GroupSnapshotSpec structure.
pub struct GroupSnapshotSpecKey(GroupSnapshotId);

impl From<&GroupSnapshotId> for GroupSnapshotSpecKey {
    fn from(id: &GroupSnapshotId) -> Self {
        Self(id.clone())
    }
}

impl ObjectKey for GroupSnapshotSpecKey {
    fn key_type(&self) -> StorableObjectType {
        StorableObjectType::GroupSnapshotSpec
    }
    fn key_uuid(&self) -> String {
        self.0.to_string()
    }
}

impl StorableObject for GroupSnapshotSpec {
    type Key = GroupSnapshotSpecKey;

    fn key(&self) -> Self::Key {
        GroupSnapshotSpecKey(self.uuid.clone())
    }
}

impl From<&CreateGroupSnapshot> for GroupSnapshotSpec {
    fn from(request: &CreateGroupSnapshot) -> Self {
        Self {
            uuid: request.uuid.clone(),
            group_id: request.group_id.clone(),
            project_id: request.project_id.clone(),
            user_id: request.user_id.clone(),
            name: request.name.clone(),
            status: GroupSnapshotStatus::Creating,
            created_at: Utc::now(),
            sequencer: OperationSequence::new(request.uuid.as_str()),
            ..Default::default()
        }
    }
}

impl PartialEq<CreateGroupSnapshot> for GroupSnapshotSpec {
    fn eq(&self, other: &CreateGroupSnapshot) -> bool {
        self.uuid == other.uuid && self.group_id == other.group_id
    }
}
