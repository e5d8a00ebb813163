use crate::controller::{
    notify::{LifecycleAction, NotificationPayload},
    quota::{snapshot_deltas, QuotaDeltas, QuotaReservation},
    registry::Registry,
    resources::{
        operations::ResourceLifecycle,
        operations_helper::{GuardedOperationsHelper, OnCreateFail, OperationSequenceGuard},
        OperationGuardArc, ResourceMutex, UpdateInnerValue,
    },
};

use manager::errors::SvcError;
use vol_port::types::v0::{
    store::{
        group_snapshot::{GroupSnapshotOperation, GroupSnapshotSpec},
        snapshot::SnapshotSpec,
        volume::VolumeSpec,
        OperationSequence,
    },
    transport::{
        CreateGroupSnapshot, DestroyGroupSnapshot, GroupSnapshotStatus, GroupStatus, ReadDeleted,
        SnapshotId, SnapshotStatus,
    },
};

use chrono::Utc;

#[async_trait::async_trait]
impl ResourceLifecycle for OperationGuardArc<GroupSnapshotSpec> {
    type Create = CreateGroupSnapshot;
    type CreateOutput = GroupSnapshotSpec;
    type Destroy = DestroyGroupSnapshot;

    /// Snapshot every member of a group at once. Quota for all the children
    /// is reserved up front; the children either all become available with
    /// the parent or all move to `error` with it.
    async fn create(
        registry: &Registry,
        request: &Self::Create,
    ) -> Result<GroupSnapshotSpec, SvcError> {
        let group = registry.specs().group(&request.group_id, ReadDeleted::No)?;
        let group_spec = group.lock().clone();
        if let Some(host) = &group_spec.host {
            registry.ensure_not_frozen(host)?;
        }
        if group_spec.status != GroupStatus::Available {
            return Err(SvcError::InvalidGroup {
                group_id: group_spec.uuid.to_string(),
                detail: format!("status '{}' does not permit a snapshot", group_spec.status),
            });
        }
        let members = registry.specs().volumes_by_group(&request.group_id);
        if members.is_empty() {
            return Err(SvcError::InvalidGroup {
                group_id: group_spec.uuid.to_string(),
                detail: "group has no member volumes".to_string(),
            });
        }

        let mut deltas = QuotaDeltas::new();
        for member in &members {
            let member = member.lock().clone();
            for (resource, delta) in snapshot_deltas(1, member.size as i64, &member.volume_type) {
                *deltas.entry(resource).or_insert(0) += delta;
            }
        }
        let reservation = QuotaReservation::reserve(registry, &request.project_id, &deltas).await?;

        match create_reserved(registry, request, &members).await {
            Ok(snapshot) => {
                reservation.commit().await;
                Ok(snapshot)
            }
            Err(error) => {
                reservation.rollback().await;
                Err(error)
            }
        }
    }

    /// Destroy a group snapshot and its children, children first.
    async fn destroy(
        &mut self,
        registry: &Registry,
        _request: &Self::Destroy,
    ) -> Result<(), SvcError> {
        let spec = self.lock().clone();
        if spec.deleted {
            return Ok(());
        }
        if let Ok(group) = registry.specs().group(&spec.group_id, ReadDeleted::Yes) {
            let host = group.lock().host.clone();
            if let Some(host) = &host {
                registry.ensure_not_frozen(host)?;
            }
        }
        if !matches!(
            spec.status,
            GroupSnapshotStatus::Available | GroupSnapshotStatus::Error
        ) {
            return Err(SvcError::InvalidInput {
                detail: format!(
                    "group snapshot '{}' status '{}' does not permit deletion",
                    spec.uuid, spec.status
                ),
            });
        }

        registry.notifier().notify(
            "group_snapshot",
            LifecycleAction::DeleteStart,
            NotificationPayload::from(&spec),
        );

        let children = registry.specs().snapshots_by_group_snapshot(&spec.uuid);
        let mut deltas = QuotaDeltas::new();
        for child in &children {
            let child = child.lock().clone();
            let volume_type = match registry.specs().volume(&child.volume_id, ReadDeleted::Yes) {
                Ok(volume) => {
                    let volume_type = volume.lock().volume_type.clone();
                    volume_type
                }
                Err(_) => None,
            };
            for (resource, delta) in
                snapshot_deltas(-1, -(child.volume_size as i64), &volume_type)
            {
                *deltas.entry(resource).or_insert(0) += delta;
            }
        }
        let reservation = QuotaReservation::reserve(registry, &spec.project_id, &deltas).await?;

        if let Err(error) = self
            .start_destroy(registry, GroupSnapshotOperation::Destroy)
            .await
        {
            reservation.rollback().await;
            return Err(error);
        }

        let mut guards = Vec::with_capacity(children.len());
        let mut child_specs = Vec::with_capacity(children.len());
        for child in &children {
            match child.operation_guard_wait().await {
                Ok(guard) => {
                    child_specs.push(guard.lock().clone());
                    guards.push(guard);
                }
                Err(error) => {
                    let result: Result<(), SvcError> = Err(error);
                    let result = self.complete_destroy(result, registry).await;
                    reservation.rollback().await;
                    return result;
                }
            }
        }

        let result = match registry
            .backend()
            .delete_group_snapshot(&spec, &child_specs)
            .await
        {
            Err(SvcError::NotFound { .. }) => Ok(()),
            other => other,
        };
        match result {
            Ok(()) => {
                for guard in guards.iter_mut() {
                    let spec_clone = {
                        let mut child = guard.lock();
                        child.status = SnapshotStatus::Deleted;
                        child.deleted = true;
                        child.deleted_at = Some(Utc::now());
                        child.clone()
                    };
                    registry.store_obj(&spec_clone).await.ok();
                    guard.update();
                }
                if let Err(error) = self.complete_destroy(Ok(()), registry).await {
                    reservation.rollback().await;
                    return Err(error);
                }
                reservation.commit().await;
                let done = self.lock().clone();
                registry.notifier().notify(
                    "group_snapshot",
                    LifecycleAction::DeleteEnd,
                    NotificationPayload::from(&done),
                );
                Ok(())
            }
            Err(error) => {
                for guard in guards.iter_mut() {
                    let spec_clone = {
                        let mut child = guard.lock();
                        child.status = SnapshotStatus::ErrorDeleting;
                        child.clone()
                    };
                    registry.store_obj(&spec_clone).await.ok();
                    guard.update();
                }
                let result: Result<(), SvcError> = Err(error);
                let result = self.complete_destroy(result, registry).await;
                let spec_clone = {
                    let mut spec = self.lock();
                    spec.status = GroupSnapshotStatus::ErrorDeleting;
                    spec.clone()
                };
                registry.store_obj(&spec_clone).await.ok();
                self.update();
                reservation.rollback().await;
                result
            }
        }
    }
}

/// The post-reservation half of the group snapshot create: fan out one child
/// snapshot per member, then ask the backend for a point-in-time capture of
/// all of them.
async fn create_reserved(
    registry: &Registry,
    request: &CreateGroupSnapshot,
    members: &[ResourceMutex<VolumeSpec>],
) -> Result<GroupSnapshotSpec, SvcError> {
    let parent = registry.specs().get_or_create_group_snapshot(request);
    let guard = parent.operation_guard_wait().await?;
    guard.start_create(registry, request).await?;

    registry.notifier().notify(
        "group_snapshot",
        LifecycleAction::CreateStart,
        NotificationPayload::from(&guard.lock().clone()),
    );

    let mut children = Vec::with_capacity(members.len());
    let mut child_specs = Vec::with_capacity(members.len());
    for member in members {
        let member = member.lock().clone();
        let uuid = SnapshotId::new();
        let child = SnapshotSpec {
            uuid: uuid.clone(),
            volume_id: member.uuid.clone(),
            project_id: request.project_id.clone(),
            user_id: request.user_id.clone(),
            name: format!("{}.{}", request.name, member.name),
            status: SnapshotStatus::Creating,
            volume_size: member.size,
            group_snapshot_id: Some(request.uuid.clone()),
            use_quota: true,
            created_at: Utc::now(),
            sequencer: OperationSequence::new(uuid.as_str()),
            ..Default::default()
        };
        child_specs.push(child.clone());
        children.push(registry.specs().insert_snapshot(child));
    }
    for child in &child_specs {
        if let Err(error) = registry.store_obj(child).await {
            let result: Result<(), SvcError> = Err(error);
            return guard
                .complete_create(result, registry, OnCreateFail::SetError)
                .await
                .map(|()| guard.lock().clone());
        }
    }

    let parent_spec = guard.lock().clone();
    let result = registry
        .backend()
        .create_group_snapshot(&parent_spec, &child_specs)
        .await;
    match result {
        Ok(()) => {
            for child in &children {
                let spec_clone = {
                    let mut spec = child.lock();
                    spec.status = SnapshotStatus::Available;
                    spec.clone()
                };
                registry.store_obj(&spec_clone).await.ok();
            }
            guard
                .complete_create(Ok(()), registry, OnCreateFail::SetError)
                .await?;
            let done = guard.lock().clone();
            registry.notifier().notify(
                "group_snapshot",
                LifecycleAction::CreateEnd,
                NotificationPayload::from(&done),
            );
            Ok(done)
        }
        Err(error) => {
            // all-or-nothing: the children fail together with the parent
            for child in &children {
                let spec_clone = {
                    let mut spec = child.lock();
                    spec.status = SnapshotStatus::Error;
                    spec.clone()
                };
                registry.store_obj(&spec_clone).await.ok();
            }
            let result: Result<(), SvcError> = Err(error);
            guard
                .complete_create(result, registry, OnCreateFail::SetError)
                .await
                .map(|()| guard.lock().clone())
        }
    }
}
