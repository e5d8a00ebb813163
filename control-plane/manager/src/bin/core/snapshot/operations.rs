use crate::controller::{
    notify::{LifecycleAction, NotificationPayload},
    quota::{snapshot_deltas, QuotaDeltas, QuotaReservation},
    registry::Registry,
    resources::{
        operations::ResourceLifecycle,
        operations_helper::{GuardedOperationsHelper, OnCreateFail, OperationSequenceGuard},
        OperationGuardArc, UpdateInnerValue,
    },
};

use manager::errors::SvcError;
use vol_port::types::v0::{
    store::snapshot::{SnapshotOperation, SnapshotSpec},
    transport::{CreateSnapshot, DestroySnapshot, ReadDeleted, SnapshotStatus, VolumeStatus},
};

#[async_trait::async_trait]
impl ResourceLifecycle for OperationGuardArc<SnapshotSpec> {
    type Create = CreateSnapshot;
    type CreateOutput = SnapshotSpec;
    type Destroy = DestroySnapshot;

    /// Take a snapshot of a volume. The owning volume is guarded for the
    /// duration so it cannot be deleted from under the snapshot, and its size
    /// at this instant is captured into the snapshot record.
    async fn create(
        registry: &Registry,
        request: &Self::Create,
    ) -> Result<SnapshotSpec, SvcError> {
        let volume = registry.specs().volume(&request.volume_id, ReadDeleted::No)?;
        let _volume_guard = volume.operation_guard_wait().await?;
        let volume_spec = volume.lock().clone();
        if !matches!(
            volume_spec.status,
            VolumeStatus::Available | VolumeStatus::InUse
        ) {
            return Err(SvcError::InvalidVolume {
                vol_id: volume_spec.uuid.to_string(),
                detail: format!(
                    "status '{}' does not permit a snapshot",
                    volume_spec.status
                ),
            });
        }

        let deltas = snapshot_deltas(1, volume_spec.size as i64, &volume_spec.volume_type);
        let reservation = QuotaReservation::reserve(registry, &request.project_id, &deltas).await?;

        match create_reserved(registry, request, volume_spec.size).await {
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

    /// Destroy a snapshot. A backend which no longer knows the snapshot is
    /// treated as already deleted.
    async fn destroy(
        &mut self,
        registry: &Registry,
        _request: &Self::Destroy,
    ) -> Result<(), SvcError> {
        let spec = self.lock().clone();
        if spec.deleted {
            return Ok(());
        }
        if !spec.status.deletable() {
            return Err(SvcError::InvalidSnapshot {
                snap_id: spec.uuid.to_string(),
                detail: format!("status '{}' does not permit deletion", spec.status),
            });
        }

        registry.notifier().notify(
            "snapshot",
            LifecycleAction::DeleteStart,
            NotificationPayload::from(&spec),
        );

        let volume_type = match registry.specs().volume(&spec.volume_id, ReadDeleted::Yes) {
            Ok(volume) => {
                let volume_type = volume.lock().volume_type.clone();
                volume_type
            }
            Err(_) => None,
        };
        let deltas = if spec.use_quota {
            snapshot_deltas(-1, -(spec.volume_size as i64), &volume_type)
        } else {
            QuotaDeltas::new()
        };
        let reservation = QuotaReservation::reserve(registry, &spec.project_id, &deltas).await?;

        if let Err(error) = self.start_destroy(registry, SnapshotOperation::Destroy).await {
            reservation.rollback().await;
            return Err(error);
        }

        let result = match registry.backend().delete_snapshot(&spec).await {
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
                let done = self.lock().clone();
                registry.notifier().notify(
                    "snapshot",
                    LifecycleAction::DeleteEnd,
                    NotificationPayload::from(&done),
                );
                Ok(())
            }
            Err(error) => {
                let result: Result<(), SvcError> = Err(error);
                match self.complete_destroy(result, registry).await {
                    Ok(()) => Ok(()),
                    Err(error) => {
                        let spec_clone = {
                            let mut spec = self.lock();
                            spec.status = SnapshotStatus::ErrorDeleting;
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

/// The post-reservation half of the snapshot create.
async fn create_reserved(
    registry: &Registry,
    request: &CreateSnapshot,
    volume_size: u64,
) -> Result<SnapshotSpec, SvcError> {
    let snapshot = registry.specs().get_or_create_snapshot(request, volume_size);
    let guard = snapshot.operation_guard_wait().await?;
    guard.start_create(registry, request).await?;

    registry.notifier().notify(
        "snapshot",
        LifecycleAction::CreateStart,
        NotificationPayload::from(&guard.lock().clone()),
    );

    let spec_clone = guard.lock().clone();
    let result = registry.backend().create_snapshot(&spec_clone).await;
    match guard
        .complete_create(result, registry, OnCreateFail::SetError)
        .await
    {
        Ok(()) => {
            let done = guard.lock().clone();
            registry.notifier().notify(
                "snapshot",
                LifecycleAction::CreateEnd,
                NotificationPayload::from(&done),
            );
            Ok(done)
        }
        Err(error) => Err(error),
    }
}
