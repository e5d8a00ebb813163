//! Definition of volume group types that can be saved to the persistent store.

use crate::types::v0::{
    store::{
        definitions::{ObjectKey, StorableObject, StorableObjectType},
        AsOperationSequencer, OperationSequence, ResourceUuid, SpecTransaction,
    },
    transport::{
        AvailabilityZone, BackendHost, CreateGroup, CreateGroupFromSource, GroupId, GroupSource,
        GroupStatus, ProjectId, UserId, VolumeId, VolumeType,
    },
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User specification of a volume group.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct GroupSpec {
    /// Group Id.
    pub uuid: GroupId,
    /// The owning project.
    pub project_id: ProjectId,
    /// The creating user.
    pub user_id: UserId,
    /// Display name.
    pub name: String,
    /// Lifecycle status.
    pub status: GroupStatus,
    /// Pool-qualified placement shared by all member volumes.
    pub host: Option<BackendHost>,
    /// Resolved availability zone.
    pub availability_zone: AvailabilityZone,
    /// Member volume types; groups require at least one.
    pub volume_types: Vec<VolumeType>,
    /// The group this one was cloned from, if any.
    pub source_group_id: Option<GroupId>,
    /// The group snapshot this one was restored from, if any.
    pub group_snapshot_id: Option<crate::types::v0::transport::GroupSnapshotId>,
    /// Soft-delete flag.
    pub deleted: bool,
    /// When the group was soft-deleted.
    pub deleted_at: Option<DateTime<Utc>>,
    /// When the group row was created.
    pub created_at: DateTime<Utc>,
    /// Update of the state in progress.
    #[serde(skip)]
    pub sequencer: OperationSequence,
    /// Record of the operation in progress.
    pub operation: Option<GroupOperationState>,
}

impl AsOperationSequencer for GroupSpec {
    fn as_ref(&self) -> &OperationSequence {
        &self.sequencer
    }
    fn as_mut(&mut self) -> &mut OperationSequence {
        &mut self.sequencer
    }
}

impl ResourceUuid for GroupSpec {
    type Id = GroupId;
    fn uuid(&self) -> GroupId {
        self.uuid.clone()
    }
}

/// Operation State for a group spec resource.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GroupOperationState {
    /// Record of the operation.
    pub operation: GroupOperation,
    /// Result of the operation.
    pub result: Option<bool>,
}

/// Available group operations.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum GroupOperation {
    Create,
    Destroy,
    Update {
        add: Vec<VolumeId>,
        remove: Vec<VolumeId>,
    },
}

impl SpecTransaction<GroupOperation> for GroupSpec {
    fn pending_op(&self) -> bool {
        self.operation.is_some()
    }

    fn commit_op(&mut self) {
        if let Some(op) = self.operation.clone() {
            match op.operation {
                GroupOperation::Create => {
                    self.status = GroupStatus::Available;
                }
                GroupOperation::Destroy => {
                    self.status = GroupStatus::Deleted;
                    self.deleted = true;
                    self.deleted_at = Some(Utc::now());
                }
                GroupOperation::Update { .. } => {
                    self.status = GroupStatus::Available;
                }
            }
        }
        self.operation = None;
    }

    fn clear_op(&mut self) {
        if let Some(op) = self.operation.clone() {
            match op.operation {
                GroupOperation::Create => {}
                GroupOperation::Destroy | GroupOperation::Update { .. } => {
                    self.status = GroupStatus::Available;
                }
            }
        }
        self.operation = None;
    }

    fn start_op(&mut self, operation: GroupOperation) {
        match &operation {
            GroupOperation::Create => {}
            GroupOperation::Destroy => {
                self.status = GroupStatus::Deleting;
            }
            GroupOperation::Update { .. } => {
                self.status = GroupStatus::Updating;
            }
        }
        self.operation = Some(GroupOperationState {
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

/// Key used by the store to uniquely identify a GroupSpec structure.
pub struct GroupSpecKey(GroupId);

impl From<&GroupId> for GroupSpecKey {
    fn from(id: &GroupId) -> Self {
        Self(id.clone())
    }
}

impl ObjectKey for GroupSpecKey {
    fn key_type(&self) -> StorableObjectType {
        StorableObjectType::GroupSpec
    }
    fn key_uuid(&self) -> String {
        self.0.to_string()
    }
}

impl StorableObject for GroupSpec {
    type Key = GroupSpecKey;

    fn key(&self) -> Self::Key {
        GroupSpecKey(self.uuid.clone())
    }
}

impl From<&CreateGroup> for GroupSpec {
    fn from(request: &CreateGroup) -> Self {
        Self {
            uuid: request.uuid.clone(),
            project_id: request.project_id.clone(),
            user_id: request.user_id.clone(),
            name: request.name.clone(),
            status: GroupStatus::Creating,
            availability_zone: request.availability_zone.clone().unwrap_or_default(),
            volume_types: request.volume_types.clone(),
            created_at: Utc::now(),
            sequencer: OperationSequence::new(request.uuid.as_str()),
            ..Default::default()
        }
    }
}

impl From<&CreateGroupFromSource> for GroupSpec {
    fn from(request: &CreateGroupFromSource) -> Self {
        let (source_group_id, group_snapshot_id) = match &request.source {
            GroupSource::Group(id) => (Some(id.clone()), None),
            GroupSource::GroupSnapshot(id) => (None, Some(id.clone())),
        };
        Self {
            uuid: request.uuid.clone(),
            project_id: request.project_id.clone(),
            user_id: request.user_id.clone(),
            name: request.name.clone(),
            status: GroupStatus::Creating,
            source_group_id,
            group_snapshot_id,
            created_at: Utc::now(),
            sequencer: OperationSequence::new(request.uuid.as_str()),
            ..Default::default()
        }
    }
}

impl PartialEq<CreateGroup> for GroupSpec {
    fn eq(&self, other: &CreateGroup) -> bool {
        self.uuid == other.uuid && self.project_id == other.project_id
    }
}
