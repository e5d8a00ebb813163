use super::*;

use crate::{impl_string_uuid, types::v0::store::volume::VolumeSpec};
use std::collections::HashMap;

impl_string_uuid!(VolumeId, "UUID of a volume");

/// The lifecycle status of a volume, as persisted in the store.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, strum_macros::Display, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VolumeStatus {
    /// The row exists but the backend resource does not yet.
    #[default]
    Creating,
    /// Provisioned and detached.
    Available,
    /// Provisioned and attached to at least one consumer.
    InUse,
    /// Reserved for an in-flight attach.
    Attaching,
    /// An attachment is being torn down.
    Detaching,
    /// A delete is in flight.
    Deleting,
    /// Soft-deleted.
    Deleted,
    /// A previous operation failed; force-delete is still permitted.
    Error,
    ErrorDeleting,
    ErrorExtending,
    /// A resize is in flight.
    Extending,
    /// A retype is in flight.
    Retyping,
    /// Administratively fenced, eg after a migration poll timeout.
    Maintenance,
    /// The volume content is being uploaded to the image service.
    Uploading,
}

impl VolumeStatus {
    /// Statuses from which a regular (non-forced) delete may start.
    pub fn deletable(&self) -> bool {
        matches!(
            self,
            Self::Available | Self::Error | Self::ErrorDeleting | Self::ErrorExtending
        )
    }
}

/// Whether any attachment exists; independent axis from `VolumeStatus`.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, strum_macros::Display, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttachStatus {
    #[default]
    Detached,
    Attached,
}

/// Status of an in-flight or finished volume migration.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MigrationStatus {
    Migrating,
    Success,
    Error,
}

/// A volume type: a named bundle of backend extra-specs.
#[derive(Serialize, Deserialize, Debug, Clone, Default, Eq, PartialEq)]
pub struct VolumeType {
    /// Name of the type, also the quota bucket qualifier.
    pub name: VolumeTypeName,
    /// Opaque driver hints, eg `max_size_gb` or `multiattach`.
    pub extra_specs: HashMap<String, String>,
}

impl VolumeType {
    /// A volume type with the given name and no extra-specs.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: VolumeTypeName::from(name.into()),
            extra_specs: HashMap::new(),
        }
    }
    /// Add an extra-spec entry.
    pub fn with_extra_spec(mut self, key: &str, value: &str) -> Self {
        self.extra_specs.insert(key.to_string(), value.to_string());
        self
    }
    /// Whether volumes of this type may be attached to multiple consumers.
    pub fn multiattach(&self) -> bool {
        self.extra_specs.get("multiattach").map(String::as_str) == Some("true")
    }
    /// The configured maximum size for volumes of this type, if any.
    pub fn max_size_gb(&self) -> Option<u64> {
        self.extra_specs.get("max_size_gb")?.parse().ok()
    }
}

/// Create volume request.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CreateVolume {
    /// The uuid of the volume.
    pub uuid: VolumeId,
    /// The project which owns the volume and is charged quota for it.
    pub project_id: ProjectId,
    /// The user issuing the request.
    pub user_id: UserId,
    /// Display name.
    pub name: String,
    /// Display description.
    pub description: Option<String>,
    /// Requested size in GiB, must be at least 1.
    pub size: u64,
    /// The volume type, resolved by the API layer.
    pub volume_type: Option<VolumeType>,
    /// Create from this snapshot. Mutually exclusive with the other sources.
    pub snapshot_id: Option<SnapshotId>,
    /// Clone from this volume. Mutually exclusive with the other sources.
    pub source_volid: Option<VolumeId>,
    /// Materialize from this image. Mutually exclusive with the other sources.
    pub image_id: Option<ImageId>,
    /// Membership of a volume group, which pins placement to the group host.
    pub group_id: Option<GroupId>,
    /// Requested availability zone; resolved against the source/defaults.
    pub availability_zone: Option<AvailabilityZone>,
    /// Whether multiple simultaneous attachments are allowed.
    pub multiattach: bool,
    /// Whether the volume must be encrypted at rest.
    pub encrypted: bool,
    /// User metadata.
    pub metadata: HashMap<String, String>,
}

/// Destroy volume request.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DestroyVolume {
    /// The uuid of the volume.
    pub uuid: VolumeId,
    /// Delete even from `in-use` or `error_*` statuses.
    pub force: bool,
    /// Also delete all dependent snapshots, all-or-nothing.
    pub cascade: bool,
}

impl DestroyVolume {
    /// Destroy the given volume, no force, no cascade.
    pub fn new(uuid: &VolumeId) -> Self {
        Self {
            uuid: uuid.clone(),
            ..Default::default()
        }
    }
    /// Enable force-delete.
    pub fn with_force(mut self) -> Self {
        self.force = true;
        self
    }
    /// Enable snapshot cascade.
    pub fn with_cascade(mut self) -> Self {
        self.cascade = true;
        self
    }
}

/// Extend volume request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExtendVolume {
    /// The uuid of the volume.
    pub uuid: VolumeId,
    /// The new size in GiB, must exceed the current size.
    pub new_size: u64,
    /// Allow extending while `in-use` (online extend).
    pub attached: bool,
}

/// Retype volume request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RetypeVolume {
    /// The uuid of the volume.
    pub uuid: VolumeId,
    /// The new volume type.
    pub new_type: VolumeType,
}

/// Reserve a volume for an upcoming attach (`available` -> `attaching`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReserveVolume {
    /// The uuid of the volume.
    pub uuid: VolumeId,
}

/// Complete an attach (`attaching` -> `in-use`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AttachVolume {
    /// The uuid of the volume.
    pub uuid: VolumeId,
}

/// Detach a volume (`in-use` -> `available`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DetachVolume {
    /// The uuid of the volume.
    pub uuid: VolumeId,
}

/// Volume information as returned to callers: the persisted spec is the
/// single source of truth, so this is a read-only view over it.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    spec: VolumeSpec,
}

impl Volume {
    /// Construct a new volume view.
    pub fn new(spec: VolumeSpec) -> Self {
        Self { spec }
    }
    /// Get the volume spec.
    pub fn spec(&self) -> &VolumeSpec {
        &self.spec
    }
    /// Get the volume's uuid.
    pub fn uuid(&self) -> &VolumeId {
        &self.spec.uuid
    }
    /// Get the volume's lifecycle status.
    pub fn status(&self) -> VolumeStatus {
        self.spec.status
    }
    /// Get the volume's size in GiB.
    pub fn size(&self) -> u64 {
        self.spec.size
    }
}

impl From<VolumeSpec> for Volume {
    fn from(spec: VolumeSpec) -> Self {
        Self::new(spec)
    }
}
