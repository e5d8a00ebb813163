//! Lifecycle notifications: exactly two (`start`, `end`) per completed
//! operation, `start` only when the operation fails before completion.

use chrono::{DateTime, Utc};
use vol_port::types::v0::{
    store::{group::GroupSpec, group_snapshot::GroupSnapshotSpec, snapshot::SnapshotSpec, volume::VolumeSpec},
    transport::{AvailabilityZone, ProjectId, UserId},
};

use parking_lot::Mutex;

/// The half of a lifecycle operation being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifecycleAction {
    CreateStart,
    CreateEnd,
    DeleteStart,
    DeleteEnd,
    UpdateStart,
    UpdateEnd,
}

impl std::fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let action = match self {
            Self::CreateStart => "create.start",
            Self::CreateEnd => "create.end",
            Self::DeleteStart => "delete.start",
            Self::DeleteEnd => "delete.end",
            Self::UpdateStart => "update.start",
            Self::UpdateEnd => "update.end",
        };
        write!(f, "{action}")
    }
}

/// The fixed payload shape carried by every lifecycle event.
#[derive(Debug, Clone)]
pub(crate) struct NotificationPayload {
    pub(crate) status: String,
    pub(crate) name: String,
    pub(crate) availability_zone: Option<AvailabilityZone>,
    pub(crate) tenant_id: ProjectId,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) user_id: UserId,
    pub(crate) resource_id: String,
}

impl From<&VolumeSpec> for NotificationPayload {
    fn from(spec: &VolumeSpec) -> Self {
        Self {
            status: spec.status.to_string(),
            name: spec.name.clone(),
            availability_zone: Some(spec.availability_zone.clone()),
            tenant_id: spec.project_id.clone(),
            created_at: spec.created_at,
            user_id: spec.user_id.clone(),
            resource_id: spec.uuid.to_string(),
        }
    }
}
impl From<&SnapshotSpec> for NotificationPayload {
    fn from(spec: &SnapshotSpec) -> Self {
        Self {
            status: spec.status.to_string(),
            name: spec.name.clone(),
            availability_zone: None,
            tenant_id: spec.project_id.clone(),
            created_at: spec.created_at,
            user_id: spec.user_id.clone(),
            resource_id: spec.uuid.to_string(),
        }
    }
}
impl From<&GroupSpec> for NotificationPayload {
    fn from(spec: &GroupSpec) -> Self {
        Self {
            status: spec.status.to_string(),
            name: spec.name.clone(),
            availability_zone: Some(spec.availability_zone.clone()),
            tenant_id: spec.project_id.clone(),
            created_at: spec.created_at,
            user_id: spec.user_id.clone(),
            resource_id: spec.uuid.to_string(),
        }
    }
}
impl From<&GroupSnapshotSpec> for NotificationPayload {
    fn from(spec: &GroupSnapshotSpec) -> Self {
        Self {
            status: spec.status.to_string(),
            name: spec.name.clone(),
            availability_zone: None,
            tenant_id: spec.project_id.clone(),
            created_at: spec.created_at,
            user_id: spec.user_id.clone(),
            resource_id: spec.uuid.to_string(),
        }
    }
}

/// Lifecycle event sink.
pub(crate) trait Notifier: Send + Sync {
    /// Emit a lifecycle event, eg `volume.create.start`.
    fn notify(&self, resource: &str, action: LifecycleAction, payload: NotificationPayload);
    /// Surface a user-facing failure message for a resource.
    fn user_message(&self, resource_id: &str, message: &str);
}

/// Notifier which emits structured log events.
#[derive(Debug, Default)]
pub(crate) struct EventNotifier {}

impl Notifier for EventNotifier {
    fn notify(&self, resource: &str, action: LifecycleAction, payload: NotificationPayload) {
        tracing::info!(
            event = %format!("{resource}.{action}"),
            resource.id = %payload.resource_id,
            status = %payload.status,
            tenant.id = %payload.tenant_id,
            "lifecycle event"
        );
    }
    fn user_message(&self, resource_id: &str, message: &str) {
        tracing::warn!(resource.id = %resource_id, message, "user message");
    }
}

/// Notifier which records events, for assertions in tests.
#[derive(Debug, Default)]
pub(crate) struct CollectingNotifier {
    events: Mutex<Vec<(String, NotificationPayload)>>,
    messages: Mutex<Vec<(String, String)>>,
}

impl CollectingNotifier {
    /// The event names recorded so far.
    pub(crate) fn event_names(&self) -> Vec<String> {
        self.events.lock().iter().map(|(name, _)| name.clone()).collect()
    }
    /// The recorded events for the given resource id.
    pub(crate) fn events_for(&self, resource_id: &str) -> Vec<(String, NotificationPayload)> {
        self.events
            .lock()
            .iter()
            .filter(|(_, payload)| payload.resource_id == resource_id)
            .cloned()
            .collect()
    }
    /// The user messages recorded so far.
    pub(crate) fn user_messages(&self) -> Vec<(String, String)> {
        self.messages.lock().clone()
    }
}

impl Notifier for CollectingNotifier {
    fn notify(&self, resource: &str, action: LifecycleAction, payload: NotificationPayload) {
        self.events
            .lock()
            .push((format!("{resource}.{action}"), payload));
    }
    fn user_message(&self, resource_id: &str, message: &str) {
        self.messages
            .lock()
            .push((resource_id.to_string(), message.to_string()));
    }
}
