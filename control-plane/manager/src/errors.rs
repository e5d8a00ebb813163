use snafu::Snafu;
use vol_port::{
    transport_api::ResourceKind,
    types::v0::store::definitions::StoreError,
};

/// Common service errors, converted into persisted entity status and a
/// notification at the manager boundary.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub), context(suffix(false)))]
#[allow(missing_docs)]
pub enum SvcError {
    #[snafu(display("Invalid input: {}", detail))]
    InvalidInput { detail: String },
    #[snafu(display("Invalid volume '{}': {}", vol_id, detail))]
    InvalidVolume { vol_id: String, detail: String },
    #[snafu(display("Invalid snapshot '{}': {}", snap_id, detail))]
    InvalidSnapshot { snap_id: String, detail: String },
    #[snafu(display("Invalid group '{}': {}", group_id, detail))]
    InvalidGroup { group_id: String, detail: String },
    #[snafu(display("{} '{}' not found", kind, id))]
    NotFound { kind: ResourceKind, id: String },
    #[snafu(display("Volume '{}' not found", vol_id))]
    VolumeNotFound { vol_id: String },
    #[snafu(display("Snapshot '{}' not found", snap_id))]
    SnapshotNotFound { snap_id: String },
    #[snafu(display("Group '{}' not found", group_id))]
    GroupNotFound { group_id: String },
    #[snafu(display("Group snapshot '{}' not found", group_snap_id))]
    GroupSnapshotNotFound { group_snap_id: String },
    #[snafu(display("Resource is busy with another operation, please retry"))]
    Conflict {},
    #[snafu(display("Pending deletion"))]
    Deleting {},
    #[snafu(display("{} '{}' is still being created", kind, id))]
    PendingCreation { id: String, kind: ResourceKind },
    #[snafu(display("{} '{}' is being deleted", kind, id))]
    PendingDeletion { id: String, kind: ResourceKind },
    #[snafu(display("{} '{}' already exists", kind, id))]
    AlreadyExists { kind: ResourceKind, id: String },
    #[snafu(display(
        "{} '{}' create request conflicts with an in-progress create with different parameters",
        kind,
        id
    ))]
    ReCreateMismatch { id: String, kind: ResourceKind },
    #[snafu(display("Invalid uuid '{}' for {}", uuid, kind))]
    InvalidUuid { uuid: String, kind: ResourceKind },
    #[snafu(display("Failed to persist to the store: {}", source))]
    Store { source: StoreError },
    #[snafu(display("{} '{}' has a pending dirty operation, please retry", kind, id))]
    StoreDirty { kind: ResourceKind, id: String },
    #[snafu(display(
        "Quota exceeded for project '{}' on resource '{}'",
        project_id,
        resource
    ))]
    QuotaExceeded { project_id: String, resource: String },
    #[snafu(display("Volume '{}' is busy on the backend", vol_id))]
    VolumeIsBusy { vol_id: String },
    #[snafu(display("Backend api failure on '{}': {}", host, detail))]
    BackendApi { host: String, detail: String },
    #[snafu(display("Backend driver on '{}' is not initialized", host))]
    DriverNotInitialized { host: String },
    #[snafu(display("Migration of volume '{}' failed: {}", vol_id, detail))]
    VolumeMigrationFailed { vol_id: String, detail: String },
    #[snafu(display("Malformed backend response: {}", detail))]
    MalformedResponse { detail: String },
    #[snafu(display("Failed to copy image metadata to volume '{}'", vol_id))]
    MetadataCopyFailure { vol_id: String },
    #[snafu(display("Timed out during '{}' after {} attempts", operation, attempts))]
    PollTimedOut { operation: String, attempts: u32 },
    #[snafu(display("Backend '{}' is frozen", host))]
    FrozenBackend { host: String },
    #[snafu(display("Resource '{}' on host '{}' is not managed by this instance", id, host))]
    NotOwner { id: String, host: String },
    #[snafu(display("No suitable backend available for the request"))]
    NoBackendsAvailable {},
}

impl SvcError {
    /// Whether the failed create attempt may be retried on another backend.
    /// Validation and quota errors never reschedule.
    pub fn reschedulable(&self) -> bool {
        matches!(
            self,
            Self::BackendApi { .. } | Self::DriverNotInitialized { .. }
        )
    }
}

impl From<StoreError> for SvcError {
    fn from(source: StoreError) -> Self {
        Self::Store { source }
    }
}
