use super::specs;
use crate::{
    controller::{
        notify::{LifecycleAction, NotificationPayload},
        quota::{volume_deltas, QuotaDeltas, QuotaReservation},
        registry::Registry,
        resources::{
            operations::{ResourceLifecycle, ResourceMembership},
            operations_helper::{
                GuardedOperationsHelper, OnCreateFail, OperationSequenceGuard, SpecOperationsHelper,
            },
            OperationGuardArc, UpdateInnerValue,
        },
        scheduling,
    },
    volume::flow,
};

use manager::errors::SvcError;
use vol_port::types::v0::{
    store::{
        group::{GroupOperation, GroupSpec},
        volume::VolumeSpec,
        SpecTransaction,
    },
    transport::{
        CreateGroup, CreateGroupFromSource, DestroyGroup, GroupSource, GroupStatus, ReadDeleted,
        UpdateGroup, VolumeStatus,
    },
};

use chrono::Utc;

#[async_trait::async_trait]
impl ResourceLifecycle for OperationGuardArc<GroupSpec> {
    type Create = CreateGroup;
    type CreateOutput = GroupSpec;
    type Destroy = DestroyGroup;

    /// Create a volume group. The group is placed on a single backend which
    /// serves every admitted volume type; members created into the group are
    /// pinned to that placement.
    async fn create(registry: &Registry, request: &Self::Create) -> Result<GroupSpec, SvcError> {
        if request.volume_types.is_empty() {
            return Err(SvcError::InvalidInput {
                detail: "a group requires at least one volume type".to_string(),
            });
        }
        let zone = request
            .availability_zone
            .clone()
            .unwrap_or_else(|| registry.config().default_availability_zone.clone());
        let host = scheduling::schedule_create_group(registry, &zone, &request.volume_types)?;

        let group = registry.specs().get_or_create_group(request);
        {
            let mut spec = group.lock();
            if spec.status == GroupStatus::Creating {
                spec.availability_zone = zone;
                spec.host = Some(host);
            }
        }
        let guard = group.operation_guard_wait().await?;
        guard.start_create(registry, request).await?;

        registry.notifier().notify(
            "group",
            LifecycleAction::CreateStart,
            NotificationPayload::from(&guard.lock().clone()),
        );

        let spec_clone = guard.lock().clone();
        let result = registry
            .backend()
            .create_group(&spec_clone)
            .await
            .map(|_update| ());
        match guard
            .complete_create(result, registry, OnCreateFail::SetError)
            .await
        {
            Ok(()) => {
                let done = guard.lock().clone();
                registry.notifier().notify(
                    "group",
                    LifecycleAction::CreateEnd,
                    NotificationPayload::from(&done),
                );
                Ok(done)
            }
            Err(error) => Err(error),
        }
    }

    /// Destroy a group and, when requested, its member volumes. Every member
    /// must be managed by this instance; a member which fails to delete is
    /// parked in `error_deleting` and the group follows, none of the deleted
    /// members are resurrected.
    async fn destroy(
        &mut self,
        registry: &Registry,
        request: &Self::Destroy,
    ) -> Result<(), SvcError> {
        let spec = self.lock().clone();
        if spec.deleted {
            return Ok(());
        }
        if let Some(host) = &spec.host {
            registry.ensure_not_frozen(host)?;
        }

        let members = registry.specs().volumes_by_group(&spec.uuid);
        if !request.delete_volumes && !members.is_empty() {
            return Err(SvcError::InvalidGroup {
                group_id: spec.uuid.to_string(),
                detail: "group still has member volumes".to_string(),
            });
        }
        let local = registry.config().host.clone();
        for member in &members {
            let member = member.lock();
            if let Some(host) = &member.host {
                if host.host() != local {
                    return Err(SvcError::NotOwner {
                        id: member.uuid.to_string(),
                        host: host.to_string(),
                    });
                }
            }
        }

        registry.notifier().notify(
            "group",
            LifecycleAction::DeleteStart,
            NotificationPayload::from(&spec),
        );

        self.start_destroy(registry, GroupOperation::Destroy).await?;

        let mut guards = Vec::with_capacity(members.len());
        let mut member_specs = Vec::with_capacity(members.len());
        for member in &members {
            match member.operation_guard_wait().await {
                Ok(guard) => {
                    member_specs.push(guard.lock().clone());
                    guards.push(guard);
                }
                Err(error) => {
                    let result: Result<(), SvcError> = Err(error);
                    return self.complete_destroy(result, registry).await;
                }
            }
        }

        match registry.backend().delete_group(&spec, &member_specs).await {
            Ok((_group_update, member_updates)) => {
                let mut failed = false;
                for guard in guards.iter_mut() {
                    let member = guard.lock().clone();
                    let errored = member_updates
                        .iter()
                        .find(|update| update.uuid == member.uuid)
                        .map(|update| update.status == VolumeStatus::ErrorDeleting)
                        .unwrap_or(false);
                    if errored {
                        failed = true;
                        let spec_clone = {
                            let mut spec = guard.lock();
                            spec.status = VolumeStatus::ErrorDeleting;
                            spec.clone()
                        };
                        registry.store_obj(&spec_clone).await.ok();
                        guard.update();
                        registry.notifier().user_message(
                            &member.uuid.to_string(),
                            "failed to delete group member volume",
                        );
                        continue;
                    }
                    if let Err(error) = destroy_member_record(registry, guard, &member).await {
                        tracing::warn!(
                            volume.uuid = %member.uuid,
                            %error,
                            "failed to record group member deletion"
                        );
                        failed = true;
                    }
                }
                if failed {
                    let error = SvcError::InvalidGroup {
                        group_id: spec.uuid.to_string(),
                        detail: "one or more member volumes could not be deleted".to_string(),
                    };
                    let result: Result<(), SvcError> = Err(error);
                    let result = self.complete_destroy(result, registry).await;
                    let spec_clone = {
                        let mut spec = self.lock();
                        spec.status = GroupStatus::ErrorDeleting;
                        spec.clone()
                    };
                    registry.store_obj(&spec_clone).await.ok();
                    UpdateInnerValue::update(self);
                    result
                } else {
                    self.complete_destroy(Ok(()), registry).await?;
                    let done = self.lock().clone();
                    registry.notifier().notify(
                        "group",
                        LifecycleAction::DeleteEnd,
                        NotificationPayload::from(&done),
                    );
                    Ok(())
                }
            }
            Err(error) => {
                let result: Result<(), SvcError> = Err(error);
                let result = self.complete_destroy(result, registry).await;
                let spec_clone = {
                    let mut spec = self.lock();
                    spec.status = GroupStatus::ErrorDeleting;
                    spec.clone()
                };
                registry.store_obj(&spec_clone).await.ok();
                UpdateInnerValue::update(self);
                result
            }
        }
    }
}

/// Soft-delete one member volume record after the backend removed it, pairing
/// the member's own quota release.
async fn destroy_member_record(
    registry: &Registry,
    guard: &mut OperationGuardArc<VolumeSpec>,
    member: &VolumeSpec,
) -> Result<(), SvcError> {
    let deltas = if member.use_quota {
        volume_deltas(-1, -(member.size as i64), &member.volume_type)
    } else {
        QuotaDeltas::new()
    };
    let reservation = QuotaReservation::reserve(registry, &member.project_id, &deltas).await?;

    let spec_clone = {
        let mut spec = guard.lock();
        spec.status = VolumeStatus::Deleted;
        spec.deleted = true;
        spec.deleted_at = Some(Utc::now());
        spec.clone()
    };
    match registry.store_obj(&spec_clone).await {
        Ok(()) => {
            reservation.commit().await;
            if let Some(host) = &member.host {
                registry.release_capacity(host, member.size);
            }
            guard.update();
            Ok(())
        }
        Err(error) => {
            reservation.rollback().await;
            Err(error)
        }
    }
}

/// Create a group whose members are cloned from an existing group or restored
/// from a group snapshot. The member volume rows must already exist in
/// `creating` status, each naming its source counterpart.
pub(crate) async fn create_group_from_source(
    registry: &Registry,
    request: &CreateGroupFromSource,
) -> Result<GroupSpec, SvcError> {
    if request.volumes.is_empty() {
        return Err(SvcError::InvalidInput {
            detail: "a group created from a source needs at least one member volume".to_string(),
        });
    }

    // the placement is inherited from the source group, so the frozen guard
    // is evaluated against it before pairing or any driver call
    let source_group = match &request.source {
        GroupSource::GroupSnapshot(snap_id) => {
            let parent = registry.specs().group_snapshot(snap_id, ReadDeleted::No)?;
            let group_id = parent.lock().group_id.clone();
            registry.specs().group(&group_id, ReadDeleted::Yes)?
        }
        GroupSource::Group(group_id) => registry.specs().group(group_id, ReadDeleted::No)?,
    };
    let source_group = source_group.lock().clone();
    if let Some(host) = &source_group.host {
        registry.ensure_not_frozen(host)?;
    }

    let members = request
        .volumes
        .iter()
        .map(|id| {
            registry
                .specs()
                .volume(id, ReadDeleted::No)
                .map(|volume| volume.lock().clone())
        })
        .collect::<Result<Vec<VolumeSpec>, SvcError>>()?;

    match &request.source {
        GroupSource::GroupSnapshot(snap_id) => {
            let children = registry
                .specs()
                .snapshots_by_group_snapshot(snap_id)
                .iter()
                .map(|snapshot| snapshot.lock().clone())
                .collect::<Vec<_>>();
            specs::sort_snapshots(&members, &children)?;
        }
        GroupSource::Group(group_id) => {
            let source_members = registry
                .specs()
                .volumes_by_group(group_id)
                .iter()
                .map(|volume| volume.lock().clone())
                .collect::<Vec<_>>();
            specs::sort_source_volumes(&members, &source_members)?;
        }
    }

    let group = registry.specs().get_or_create_group_from_source(request);
    {
        let mut spec = group.lock();
        if spec.status == GroupStatus::Creating {
            spec.availability_zone = source_group.availability_zone.clone();
            spec.host = source_group.host.clone();
            spec.volume_types = source_group.volume_types.clone();
        }
    }
    let guard = group.operation_guard_wait().await?;

    // the request shape differs from CreateGroup so the create transaction is
    // driven by hand
    let spec_clone = {
        let mut spec = guard.lock();
        spec.busy()?;
        if spec.status_created() {
            return Err(SvcError::AlreadyExists {
                kind: spec.kind(),
                id: spec.uuid_str(),
            });
        }
        if !spec.status_creating() {
            return Err(SvcError::Deleting {});
        }
        spec.start_op(GroupOperation::Create);
        spec.clone()
    };
    guard.store_operation_log(registry, &spec_clone).await?;

    registry.notifier().notify(
        "group",
        LifecycleAction::CreateStart,
        NotificationPayload::from(&spec_clone),
    );

    let result = materialize_members(registry, &guard, request).await;
    match guard
        .complete_create(result, registry, OnCreateFail::SetError)
        .await
    {
        Ok(()) => {
            let done = guard.lock().clone();
            registry.notifier().notify(
                "group",
                LifecycleAction::CreateEnd,
                NotificationPayload::from(&done),
            );
            Ok(done)
        }
        Err(error) => Err(error),
    }
}

/// Materialize every member volume of a source-cloned group from its paired
/// source, in member order. The first failure parks the member in `error` and
/// aborts the group.
async fn materialize_members(
    registry: &Registry,
    guard: &OperationGuardArc<GroupSpec>,
    request: &CreateGroupFromSource,
) -> Result<(), SvcError> {
    let group = guard.lock().clone();
    for vol_id in &request.volumes {
        let volume = registry.specs().volume(vol_id, ReadDeleted::No)?;
        {
            let mut spec = volume.lock();
            spec.group_id = Some(group.uuid.clone());
            spec.host = group.host.clone();
            spec.availability_zone = group.availability_zone.clone();
        }
        if let Err(error) = flow::materialize(registry, &volume).await {
            let spec_clone = {
                let mut spec = volume.lock();
                spec.status = VolumeStatus::Error;
                spec.clone()
            };
            registry.store_obj(&spec_clone).await.ok();
            return Err(error);
        }
        let spec_clone = {
            let mut spec = volume.lock();
            spec.status = VolumeStatus::Available;
            spec.clone()
        };
        registry.store_obj(&spec_clone).await?;
    }
    Ok(())
}

#[async_trait::async_trait]
impl ResourceMembership for OperationGuardArc<GroupSpec> {
    type Update = UpdateGroup;
    type UpdateOutput = GroupSpec;

    /// Update the membership of a group. Additions must be available volumes
    /// of an admitted type; removals must be current members. The model
    /// changes returned by the backend are applied under the group guard.
    async fn update(
        &mut self,
        registry: &Registry,
        request: &Self::Update,
    ) -> Result<GroupSpec, SvcError> {
        let spec = self.lock().clone();
        if let Some(host) = &spec.host {
            registry.ensure_not_frozen(host)?;
        }
        if spec.status != GroupStatus::Available {
            return Err(SvcError::InvalidGroup {
                group_id: spec.uuid.to_string(),
                detail: format!("status '{}' does not permit an update", spec.status),
            });
        }

        let mut add_specs = Vec::with_capacity(request.add_volumes.len());
        for vol_id in &request.add_volumes {
            let volume = registry.specs().volume(vol_id, ReadDeleted::No)?;
            let volume = volume.lock().clone();
            if volume.group_id.is_some() {
                return Err(SvcError::InvalidVolume {
                    vol_id: vol_id.to_string(),
                    detail: "volume already belongs to a group".to_string(),
                });
            }
            if volume.status != VolumeStatus::Available {
                return Err(SvcError::InvalidVolume {
                    vol_id: vol_id.to_string(),
                    detail: format!("status '{}' does not permit joining a group", volume.status),
                });
            }
            let admitted = volume
                .volume_type
                .as_ref()
                .map(|vt| spec.volume_types.iter().any(|t| t.name == vt.name))
                .unwrap_or(false);
            if !admitted {
                return Err(SvcError::InvalidInput {
                    detail: format!(
                        "volume '{vol_id}' is not of a type served by group '{}'",
                        spec.uuid
                    ),
                });
            }
            add_specs.push(volume);
        }
        let mut remove_specs = Vec::with_capacity(request.remove_volumes.len());
        for vol_id in &request.remove_volumes {
            let volume = registry.specs().volume(vol_id, ReadDeleted::No)?;
            let volume = volume.lock().clone();
            if volume.group_id.as_ref() != Some(&spec.uuid) {
                return Err(SvcError::InvalidVolume {
                    vol_id: vol_id.to_string(),
                    detail: format!("volume is not a member of group '{}'", spec.uuid),
                });
            }
            remove_specs.push(volume);
        }

        registry.notifier().notify(
            "group",
            LifecycleAction::UpdateStart,
            NotificationPayload::from(&spec),
        );

        let operation = GroupOperation::Update {
            add: request.add_volumes.clone(),
            remove: request.remove_volumes.clone(),
        };
        let spec_clone = self.start_update(registry, operation).await?;

        match registry
            .backend()
            .update_group(&spec_clone, &add_specs, &remove_specs)
            .await
        {
            Ok(update_model) => {
                for member in &update_model.added {
                    if let Ok(volume) = registry.specs().volume(&member.uuid, ReadDeleted::No) {
                        let member_clone = {
                            let mut spec = volume.lock();
                            spec.group_id = Some(self.lock().uuid.clone());
                            spec.clone()
                        };
                        registry.store_obj(&member_clone).await.ok();
                    }
                }
                for member in &update_model.removed {
                    if let Ok(volume) = registry.specs().volume(&member.uuid, ReadDeleted::No) {
                        let member_clone = {
                            let mut spec = volume.lock();
                            spec.group_id = None;
                            spec.clone()
                        };
                        registry.store_obj(&member_clone).await.ok();
                    }
                }
                match self.complete_update(registry, Ok(()), spec_clone).await {
                    Ok(()) => {
                        let done = self.lock().clone();
                        registry.notifier().notify(
                            "group",
                            LifecycleAction::UpdateEnd,
                            NotificationPayload::from(&done),
                        );
                        Ok(done)
                    }
                    Err(error) => Err(error),
                }
            }
            Err(error) => {
                let result: Result<(), SvcError> = Err(error);
                match self.complete_update(registry, result, spec_clone).await {
                    Ok(()) => Ok(self.lock().clone()),
                    Err(error) => Err(error),
                }
            }
        }
    }
}
