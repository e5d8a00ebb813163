use super::*;

use crate::impl_string_uuid;

impl_string_uuid!(GroupId, "UUID of a volume group");
impl_string_uuid!(GroupSnapshotId, "UUID of a group snapshot");

/// The lifecycle status of a group, mirroring the volume create/delete/update cycle.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, strum_macros::Display, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GroupStatus {
    #[default]
    Creating,
    Available,
    Updating,
    Deleting,
    Deleted,
    Error,
    ErrorDeleting,
}

/// The lifecycle status of a group snapshot.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, strum_macros::Display, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GroupSnapshotStatus {
    #[default]
    Creating,
    Available,
    Deleting,
    Deleted,
    Error,
    ErrorDeleting,
}

/// Create group request.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CreateGroup {
    /// The uuid of the group.
    pub uuid: GroupId,
    /// The project which owns the group.
    pub project_id: ProjectId,
    /// The user issuing the request.
    pub user_id: UserId,
    /// Display name.
    pub name: String,
    /// The volume types members may use; must not be empty.
    pub volume_types: Vec<VolumeType>,
    /// Requested availability zone.
    pub availability_zone: Option<AvailabilityZone>,
}

/// The source a group is cloned from: exactly one must be given.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum GroupSource {
    /// Clone every member of an existing group.
    Group(GroupId),
    /// Restore every member of a group snapshot.
    GroupSnapshot(GroupSnapshotId),
}

/// Create a group from a source group or group snapshot.
///
/// The member volumes must already exist in `creating` status, each carrying
/// the `snapshot_id`/`source_volid` of its source counterpart.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CreateGroupFromSource {
    /// The uuid of the new group.
    pub uuid: GroupId,
    /// The project which owns the group.
    pub project_id: ProjectId,
    /// The user issuing the request.
    pub user_id: UserId,
    /// Display name.
    pub name: String,
    /// The source to clone from.
    pub source: GroupSource,
    /// The member volumes of the new group, in creation order.
    pub volumes: Vec<VolumeId>,
}

/// Update group membership request.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct UpdateGroup {
    /// The uuid of the group.
    pub uuid: GroupId,
    /// Volumes to add to the group.
    pub add_volumes: Vec<VolumeId>,
    /// Volumes to remove from the group.
    pub remove_volumes: Vec<VolumeId>,
}

/// Delete group request.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DestroyGroup {
    /// The uuid of the group.
    pub uuid: GroupId,
    /// Also delete the member volumes.
    pub delete_volumes: bool,
}

/// Create group snapshot request.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CreateGroupSnapshot {
    /// The uuid of the group snapshot.
    pub uuid: GroupSnapshotId,
    /// The group to snapshot; every current member volume is snapshotted.
    pub group_id: GroupId,
    /// The project charged quota for the child snapshots.
    pub project_id: ProjectId,
    /// The user issuing the request.
    pub user_id: UserId,
    /// Display name.
    pub name: String,
}

/// Destroy group snapshot request.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DestroyGroupSnapshot {
    /// The uuid of the group snapshot.
    pub uuid: GroupSnapshotId,
}
