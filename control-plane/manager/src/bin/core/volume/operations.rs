use super::flow;
use crate::controller::{
    notify::{LifecycleAction, NotificationPayload},
    poller::poll_until,
    quota::{volume_deltas, QuotaDeltas, QuotaReservation},
    registry::Registry,
    resources::{
        operations::{ResourceAttach, ResourceLifecycle, ResourceResize, ResourceRetype},
        operations_helper::{GuardedOperationsHelper, OnCreateFail, OperationSequenceGuard},
        OperationGuardArc, ResourceMutex, UpdateInnerValue,
    },
    scheduling::{self, FilterProperties, RequestSpec},
};

use manager::errors::SvcError;
use vol_port::types::v0::{
    store::{
        snapshot::SnapshotSpec,
        volume::{VolumeOperation, VolumeSpec},
    },
    transport::{
        AttachVolume, AvailabilityZone, BackendHost, CreateVolume, DestroySnapshot, DestroyVolume,
        DetachVolume, ExtendVolume, MigrationStatus, ReadDeleted, ReserveVolume, RetypeVolume,
        Volume, VolumeStatus,
    },
};

#[async_trait::async_trait]
impl ResourceLifecycle for OperationGuardArc<VolumeSpec> {
    type Create = CreateVolume;
    type CreateOutput = Volume;
    type Destroy = DestroyVolume;

    /// Create a volume: validate, reserve quota, schedule, materialize the
    /// content and copy the source metadata. The quota reservation is
    /// committed only when the whole task succeeded.
    async fn create(registry: &Registry, request: &Self::Create) -> Result<Volume, SvcError> {
        flow::validate_request(registry, request).await?;
        let zone = flow::resolve_availability_zone(registry, request)?;
        let pinned = flow::pinned_host(registry, request)?;
        let encryption_key = flow::derive_encryption_key(registry, request).await?;

        let deltas = volume_deltas(1, request.size as i64, &request.volume_type);
        let reservation = QuotaReservation::reserve(registry, &request.project_id, &deltas).await?;

        match create_reserved(registry, request, zone, pinned, encryption_key).await {
            Ok(volume) => {
                reservation.commit().await;
                Ok(volume)
            }
            Err(error) => {
                reservation.rollback().await;
                Err(error)
            }
        }
    }

    /// Destroy a volume, optionally cascading over its snapshots. A backend
    /// which no longer knows the volume is treated as already deleted so the
    /// request stays idempotent.
    async fn destroy(
        &mut self,
        registry: &Registry,
        request: &Self::Destroy,
    ) -> Result<(), SvcError> {
        let spec = self.lock().clone();
        if spec.deleted {
            return Ok(());
        }
        if !request.force && !spec.status.deletable() {
            return Err(SvcError::InvalidVolume {
                vol_id: spec.uuid.to_string(),
                detail: format!("status '{}' does not permit deletion", spec.status),
            });
        }

        let snapshots = registry.specs().snapshots_by_volume(&spec.uuid);
        if !snapshots.is_empty() {
            if !request.cascade {
                return Err(SvcError::InvalidVolume {
                    vol_id: spec.uuid.to_string(),
                    detail: "volume has dependent snapshots".to_string(),
                });
            }
            // all-or-nothing: refuse up front rather than leave a partially
            // deleted tree behind
            for snapshot in &snapshots {
                let snapshot = snapshot.lock();
                if !snapshot.status.deletable() {
                    return Err(SvcError::InvalidVolume {
                        vol_id: spec.uuid.to_string(),
                        detail: format!(
                            "dependent snapshot '{}' is '{}', cascade refused",
                            snapshot.uuid, snapshot.status
                        ),
                    });
                }
            }
        }

        registry.notifier().notify(
            "volume",
            LifecycleAction::DeleteStart,
            NotificationPayload::from(&spec),
        );

        let deltas = if spec.use_quota {
            volume_deltas(-1, -(spec.size as i64), &spec.volume_type)
        } else {
            QuotaDeltas::new()
        };
        let reservation = QuotaReservation::reserve(registry, &spec.project_id, &deltas).await?;

        let operation = VolumeOperation::Destroy {
            force: request.force,
            cascade: request.cascade,
        };
        if let Err(error) = self.start_destroy(registry, operation).await {
            reservation.rollback().await;
            return Err(error);
        }

        for snapshot in snapshots {
            let destroyed = destroy_dependent_snapshot(registry, &snapshot).await;
            if let Err(error) = destroyed {
                let result: Result<(), SvcError> = Err(error);
                let result = self.complete_destroy(result, registry).await;
                reservation.rollback().await;
                return result;
            }
        }

        let result = match registry.backend().delete_volume(&spec).await {
            // the backend resource is already gone, delete the record anyway
            Err(SvcError::NotFound { .. }) => Ok(()),
            other => other,
        };
        match result {
            Ok(()) => {
                if let Err(error) = self.complete_destroy(Ok(()), registry).await {
                    reservation.rollback().await;
                    return Err(error);
                }
                reservation.commit().await;
                if let Some(host) = &spec.host {
                    registry.release_capacity(host, spec.size);
                }
                let done = self.lock().clone();
                registry.notifier().notify(
                    "volume",
                    LifecycleAction::DeleteEnd,
                    NotificationPayload::from(&done),
                );
                Ok(())
            }
            Err(error @ SvcError::VolumeIsBusy { .. }) => {
                // not fatal, revert to the previous status; the consumer must
                // let go before another attempt
                tracing::warn!(volume.uuid = %spec.uuid, %error, "volume busy, delete reverted");
                let result: Result<(), SvcError> = Err(error);
                self.complete_destroy(result, registry).await.ok();
                reservation.rollback().await;
                Ok(())
            }
            Err(error) => {
                let result: Result<(), SvcError> = Err(error);
                match self.complete_destroy(result, registry).await {
                    Ok(()) => Ok(()),
                    Err(error) => {
                        // park in error_deleting for an operator retry
                        let spec_clone = {
                            let mut spec = self.lock();
                            spec.status = VolumeStatus::ErrorDeleting;
                            spec.clone()
                        };
                        registry.store_obj(&spec_clone).await.ok();
                        self.update();
                        reservation.rollback().await;
                        Err(error)
                    }
                }
            }
        }
    }
}

/// Delete one dependent snapshot as part of a cascade.
async fn destroy_dependent_snapshot(
    registry: &Registry,
    snapshot: &ResourceMutex<SnapshotSpec>,
) -> Result<(), SvcError> {
    let uuid = snapshot.lock().uuid.clone();
    let mut guard = snapshot.operation_guard_wait().await?;
    guard.destroy(registry, &DestroySnapshot::new(&uuid)).await
}

/// The post-reservation half of the create task. Any failure after the
/// operation log is written parks the record in `error`.
async fn create_reserved(
    registry: &Registry,
    request: &CreateVolume,
    zone: AvailabilityZone,
    pinned: Option<BackendHost>,
    encryption_key: Option<String>,
) -> Result<Volume, SvcError> {
    let volume = registry.specs().get_or_create_volume(request);
    {
        let mut spec = volume.lock();
        if spec.status == VolumeStatus::Creating {
            spec.availability_zone = zone;
            if spec.encryption_key_id.is_none() {
                spec.encryption_key_id = encryption_key;
            }
        }
    }
    let guard = volume.operation_guard_wait().await?;
    guard.start_create(registry, request).await?;

    registry.notifier().notify(
        "volume",
        LifecycleAction::CreateStart,
        NotificationPayload::from(&guard.lock().clone()),
    );

    let result = provision(registry, &guard, request, pinned).await;
    match guard
        .complete_create(result, registry, OnCreateFail::SetError)
        .await
    {
        Ok(host) => {
            registry.allocate_capacity(&host, request.size);
            let spec = guard.lock().clone();
            registry.notifier().notify(
                "volume",
                LifecycleAction::CreateEnd,
                NotificationPayload::from(&spec),
            );
            Ok(Volume::new(spec))
        }
        Err(error) => Err(error),
    }
}

/// Place the volume and materialize its content, rescheduling onto another
/// backend when the failure is worth retrying elsewhere. The content source,
/// if any, is guarded for the duration so it cannot be deleted mid-copy.
async fn provision(
    registry: &Registry,
    guard: &OperationGuardArc<VolumeSpec>,
    request: &CreateVolume,
    pinned: Option<BackendHost>,
) -> Result<BackendHost, SvcError> {
    let mut _source_volume: Option<OperationGuardArc<VolumeSpec>> = None;
    let mut _source_snapshot: Option<OperationGuardArc<SnapshotSpec>> = None;
    if let Some(vol_id) = &request.source_volid {
        let source = registry.specs().volume(vol_id, ReadDeleted::No)?;
        _source_volume = Some(source.operation_guard_wait().await?);
    }
    if let Some(snap_id) = &request.snapshot_id {
        let snapshot = registry.specs().snapshot(snap_id, ReadDeleted::No)?;
        _source_snapshot = Some(snapshot.operation_guard_wait().await?);
    }

    let request_spec = RequestSpec {
        size: request.size,
        volume_type: request.volume_type.clone(),
        availability_zone: guard.lock().availability_zone.clone(),
    };
    let mut filters = FilterProperties::default();
    let mut attempt = 0;
    loop {
        let host = match &pinned {
            Some(host) => host.clone(),
            None => scheduling::schedule_create_volume(registry, &request_spec, &filters)?,
        };
        let spec_clone = {
            let mut spec = guard.lock();
            spec.host = Some(host.clone());
            spec.clone()
        };
        registry.store_obj(&spec_clone).await?;

        match flow::materialize(registry, guard).await {
            Ok(()) => {
                return match flow::copy_source_metadata(registry, guard).await {
                    Ok(()) => Ok(host),
                    Err(error) => {
                        let spec = guard.lock().clone();
                        registry.backend().delete_volume(&spec).await.ok();
                        Err(error)
                    }
                };
            }
            Err(error)
                if pinned.is_none()
                    && error.reschedulable()
                    && attempt < registry.config().schedule_retries =>
            {
                attempt += 1;
                let spec = guard.lock().clone();
                // drop whatever half-provisioned artifact may exist
                registry.backend().delete_volume(&spec).await.ok();
                tracing::warn!(
                    volume.uuid = %spec.uuid,
                    backend = %host,
                    %error,
                    "create volume failed, rescheduling"
                );
                filters.exclude(host);
            }
            Err(error) => {
                let spec = guard.lock().clone();
                registry.backend().delete_volume(&spec).await.ok();
                return Err(error);
            }
        }
    }
}

#[async_trait::async_trait]
impl ResourceResize for OperationGuardArc<VolumeSpec> {
    type Resize = ExtendVolume;
    type ResizeOutput = Volume;

    async fn resize(
        &mut self,
        registry: &Registry,
        request: &Self::Resize,
    ) -> Result<Volume, SvcError> {
        let spec = self.lock().clone();
        if request.new_size <= spec.size {
            return Err(SvcError::InvalidInput {
                detail: format!(
                    "new size {}GiB must exceed the current size {}GiB",
                    request.new_size, spec.size
                ),
            });
        }
        if let Some(volume_type) = &spec.volume_type {
            if let Some(max_size) = volume_type.max_size_gb() {
                if request.new_size > max_size {
                    return Err(SvcError::InvalidInput {
                        detail: format!(
                            "new size {}GiB exceeds the '{}' type limit of {max_size}GiB",
                            request.new_size, volume_type.name
                        ),
                    });
                }
            }
        }
        let online = spec.status == VolumeStatus::InUse && request.attached;
        if spec.status != VolumeStatus::Available && !online {
            return Err(SvcError::InvalidVolume {
                vol_id: spec.uuid.to_string(),
                detail: format!("status '{}' does not permit an extend", spec.status),
            });
        }

        registry.notifier().notify(
            "volume",
            LifecycleAction::UpdateStart,
            NotificationPayload::from(&spec),
        );

        let delta = (request.new_size - spec.size) as i64;
        let deltas = if spec.use_quota {
            volume_deltas(0, delta, &spec.volume_type)
        } else {
            QuotaDeltas::new()
        };
        let reservation = QuotaReservation::reserve(registry, &spec.project_id, &deltas).await?;

        let spec_clone = match self
            .start_update(registry, VolumeOperation::Extend(request.new_size))
            .await
        {
            Ok(spec_clone) => spec_clone,
            Err(error) => {
                reservation.rollback().await;
                return Err(error);
            }
        };

        match registry
            .backend()
            .extend_volume(&spec_clone, request.new_size)
            .await
        {
            Ok(()) => match self.complete_update(registry, Ok(()), spec_clone).await {
                Ok(()) => {
                    reservation.commit().await;
                    if let Some(host) = &spec.host {
                        registry.allocate_capacity(host, request.new_size - spec.size);
                    }
                    let done = self.lock().clone();
                    registry.notifier().notify(
                        "volume",
                        LifecycleAction::UpdateEnd,
                        NotificationPayload::from(&done),
                    );
                    Ok(Volume::new(done))
                }
                Err(error) => {
                    reservation.rollback().await;
                    Err(error)
                }
            },
            Err(error) => {
                let result: Result<(), SvcError> = Err(error);
                match self.complete_update(registry, result, spec_clone).await {
                    Ok(()) => Ok(Volume::new(self.lock().clone())),
                    Err(error) => {
                        let spec_clone = {
                            let mut spec = self.lock();
                            spec.status = VolumeStatus::ErrorExtending;
                            spec.clone()
                        };
                        registry.store_obj(&spec_clone).await.ok();
                        self.update();
                        registry.notifier().user_message(
                            &spec.uuid.to_string(),
                            &format!("extend volume failed: {error}"),
                        );
                        reservation.rollback().await;
                        Err(error)
                    }
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl ResourceRetype for OperationGuardArc<VolumeSpec> {
    type Retype = RetypeVolume;
    type RetypeOutput = Volume;

    async fn retype(
        &mut self,
        registry: &Registry,
        request: &Self::Retype,
    ) -> Result<Volume, SvcError> {
        let spec = self.lock().clone();
        if !matches!(spec.status, VolumeStatus::Available | VolumeStatus::InUse) {
            return Err(SvcError::InvalidVolume {
                vol_id: spec.uuid.to_string(),
                detail: format!("status '{}' does not permit a retype", spec.status),
            });
        }
        if spec.status == VolumeStatus::InUse {
            let multiattach = spec
                .volume_type
                .as_ref()
                .map(|vt| vt.multiattach())
                .unwrap_or(false);
            if multiattach != request.new_type.multiattach() {
                return Err(SvcError::InvalidInput {
                    detail: "cannot change the multiattach capability of an attached volume"
                        .to_string(),
                });
            }
        }
        let current_host = spec.host.clone().ok_or_else(|| SvcError::InvalidVolume {
            vol_id: spec.uuid.to_string(),
            detail: "volume has no placement".to_string(),
        })?;

        // decide up front whether the current backend can serve the new type,
        // otherwise pick a destination and migrate
        let in_place = registry
            .backend_state(&current_host)
            .map(|state| state.supports_type(&Some(request.new_type.clone())))
            .unwrap_or(false);
        let destination = if in_place {
            None
        } else {
            let request_spec = RequestSpec {
                size: spec.size,
                volume_type: Some(request.new_type.clone()),
                availability_zone: spec.availability_zone.clone(),
            };
            let mut filters = FilterProperties::default();
            filters.exclude(current_host.clone());
            Some(scheduling::schedule_create_volume(
                registry,
                &request_spec,
                &filters,
            )?)
        };

        registry.notifier().notify(
            "volume",
            LifecycleAction::UpdateStart,
            NotificationPayload::from(&spec),
        );

        let operation = VolumeOperation::Retype {
            new_type: request.new_type.clone(),
            new_host: destination.clone(),
        };
        let spec_clone = self.start_update(registry, operation).await?;

        let result = match &destination {
            None => match registry.backend().retype(&spec_clone, &request.new_type).await {
                Ok(true) => Ok(()),
                Ok(false) => Err(SvcError::VolumeMigrationFailed {
                    vol_id: spec.uuid.to_string(),
                    detail: "the backend cannot retype the volume in place".to_string(),
                }),
                Err(error) => Err(error),
            },
            Some(destination) => migrate(registry, self, &spec_clone, destination).await,
        };

        match result {
            Ok(()) => {
                self.complete_update(registry, Ok(()), spec_clone).await?;
                if let Some(destination) = &destination {
                    registry.release_capacity(&current_host, spec.size);
                    registry.allocate_capacity(destination, spec.size);
                }
                let done = self.lock().clone();
                registry.notifier().notify(
                    "volume",
                    LifecycleAction::UpdateEnd,
                    NotificationPayload::from(&done),
                );
                Ok(Volume::new(done))
            }
            Err(error) => {
                let timed_out = matches!(error, SvcError::PollTimedOut { .. });
                let result: Result<(), SvcError> = Err(error);
                match self.complete_update(registry, result, spec_clone).await {
                    Ok(()) => Ok(Volume::new(self.lock().clone())),
                    Err(error) => {
                        if timed_out {
                            // the backend may still be moving data around;
                            // fence the volume until an operator reconciles it
                            let spec_clone = {
                                let mut spec = self.lock();
                                spec.status = VolumeStatus::Maintenance;
                                spec.migration_status = Some(MigrationStatus::Error);
                                spec.clone()
                            };
                            registry.store_obj(&spec_clone).await.ok();
                            self.update();
                        }
                        Err(error)
                    }
                }
            }
        }
    }
}

/// Move the volume to the destination backend, polling when the backend
/// performs the migration asynchronously.
async fn migrate(
    registry: &Registry,
    volume: &ResourceMutex<VolumeSpec>,
    spec: &VolumeSpec,
    destination: &BackendHost,
) -> Result<(), SvcError> {
    {
        volume.lock().migration_status = Some(MigrationStatus::Migrating);
    }
    let (done, update) = registry.backend().migrate_volume(spec, destination).await?;
    if let Some(update) = update {
        if let Some(host) = update.host {
            volume.lock().host = Some(host);
        }
    }
    if done {
        return Ok(());
    }
    let period = registry.config().poll_period;
    let attempts = registry.config().poll_attempts;
    poll_until("volume migration", period, attempts, || async {
        match registry.backend().migration_progress(spec).await? {
            MigrationStatus::Migrating => Ok(None),
            MigrationStatus::Success => Ok(Some(())),
            MigrationStatus::Error => Err(SvcError::VolumeMigrationFailed {
                vol_id: spec.uuid.to_string(),
                detail: "the backend reported a failed migration".to_string(),
            }),
        }
    })
    .await
}

#[async_trait::async_trait]
impl ResourceAttach for OperationGuardArc<VolumeSpec> {
    type Reserve = ReserveVolume;
    type Attach = AttachVolume;
    type Detach = DetachVolume;

    async fn reserve(
        &mut self,
        registry: &Registry,
        _request: &Self::Reserve,
    ) -> Result<(), SvcError> {
        let spec = self.lock().clone();
        let multiattach_ok = spec.status == VolumeStatus::InUse && spec.multiattach;
        if spec.status != VolumeStatus::Available && !multiattach_ok {
            return Err(SvcError::InvalidVolume {
                vol_id: spec.uuid.to_string(),
                detail: format!("status '{}' does not permit a reservation", spec.status),
            });
        }
        let spec_clone = self.start_update(registry, VolumeOperation::Reserve).await?;
        self.complete_update(registry, Ok(()), spec_clone).await
    }

    async fn attach(
        &mut self,
        registry: &Registry,
        _request: &Self::Attach,
    ) -> Result<(), SvcError> {
        if self.lock().status != VolumeStatus::Attaching {
            let spec = self.lock().clone();
            return Err(SvcError::InvalidVolume {
                vol_id: spec.uuid.to_string(),
                detail: format!("status '{}' holds no reservation", spec.status),
            });
        }
        let spec_clone = self.start_update(registry, VolumeOperation::Attach).await?;
        self.complete_update(registry, Ok(()), spec_clone).await
    }

    async fn detach(
        &mut self,
        registry: &Registry,
        _request: &Self::Detach,
    ) -> Result<(), SvcError> {
        if self.lock().status != VolumeStatus::InUse {
            let spec = self.lock().clone();
            return Err(SvcError::InvalidVolume {
                vol_id: spec.uuid.to_string(),
                detail: format!("status '{}' is not attached", spec.status),
            });
        }
        let spec_clone = self.start_update(registry, VolumeOperation::Detach).await?;
        self.complete_update(registry, Ok(()), spec_clone).await
    }
}
