use super::*;

use crate::impl_string_uuid;

impl_string_uuid!(SnapshotId, "UUID of a volume snapshot");

/// The lifecycle status of a snapshot.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, strum_macros::Display, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SnapshotStatus {
    #[default]
    Creating,
    Available,
    Deleting,
    Deleted,
    Error,
    ErrorDeleting,
}

impl SnapshotStatus {
    /// Statuses from which a delete may start.
    pub fn deletable(&self) -> bool {
        matches!(self, Self::Available | Self::Error)
    }
}

/// Create snapshot request.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CreateSnapshot {
    /// The uuid of the snapshot.
    pub uuid: SnapshotId,
    /// The volume to snapshot.
    pub volume_id: VolumeId,
    /// The project charged quota for the snapshot.
    pub project_id: ProjectId,
    /// The user issuing the request.
    pub user_id: UserId,
    /// Display name.
    pub name: String,
    /// Display description.
    pub description: Option<String>,
}

/// Destroy snapshot request.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DestroySnapshot {
    /// The uuid of the snapshot.
    pub uuid: SnapshotId,
}

impl DestroySnapshot {
    /// Destroy the given snapshot.
    pub fn new(uuid: &SnapshotId) -> Self {
        Self {
            uuid: uuid.clone(),
        }
    }
}
