use super::{volume_request, TestCluster};
use crate::controller::{backend::fake::FakeFault, registry::BackendState};

use manager::errors::SvcError;
use vol_port::types::v0::transport::{
    AttachVolume, CreateSnapshot, DestroyVolume, DetachVolume, ExtendVolume, ImageId, MigrationStatus,
    ReadDeleted, ReserveVolume, RetypeVolume, SnapshotId, SnapshotStatus, VolumeStatus, VolumeType,
};

use std::collections::HashMap;

#[tokio::test]
async fn create_and_destroy_roundtrip() {
    let cluster = TestCluster::new().await;
    let service = cluster.volumes();
    let request = volume_request(4);

    let volume = service.create_volume(&request).await.unwrap();
    assert_eq!(volume.status(), VolumeStatus::Available);
    assert_eq!(volume.spec().host, Some(TestCluster::pool_a()));
    assert!(cluster.backend.has_volume(request.uuid.as_str()));

    let project = TestCluster::project();
    assert_eq!(cluster.quotas.usage(&project, "volumes"), 1);
    assert_eq!(cluster.quotas.usage(&project, "gigabytes"), 4);
    assert_eq!(cluster.quotas.in_flight(), 0);

    let events: Vec<String> = cluster
        .notifier
        .events_for(request.uuid.as_str())
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(events, vec!["volume.create.start", "volume.create.end"]);

    service
        .destroy_volume(&DestroyVolume::new(&request.uuid))
        .await
        .unwrap();
    assert!(!cluster.backend.has_volume(request.uuid.as_str()));
    assert_eq!(cluster.quotas.usage(&project, "volumes"), 0);
    assert_eq!(cluster.quotas.usage(&project, "gigabytes"), 0);
    assert_eq!(cluster.quotas.in_flight(), 0);

    // a second delete of the same volume is a no-op
    service
        .destroy_volume(&DestroyVolume::new(&request.uuid))
        .await
        .unwrap();
}

#[tokio::test]
async fn create_rejects_multiple_sources() {
    let cluster = TestCluster::new().await;
    let mut request = volume_request(1);
    request.snapshot_id = Some(SnapshotId::new());
    request.image_id = Some(ImageId::new());

    let error = cluster.volumes().create_volume(&request).await.unwrap_err();
    assert!(matches!(error, SvcError::InvalidInput { .. }));
    assert!(cluster.volumes().get_volumes(ReadDeleted::Yes).is_empty());
}

#[tokio::test]
async fn quota_exceeded_leaves_no_row_behind() {
    let cluster = TestCluster::new().await;
    let project = TestCluster::project();
    cluster.quotas.set_limit(&project, "gigabytes", 5);

    let error = cluster
        .volumes()
        .create_volume(&volume_request(10))
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::QuotaExceeded { .. }));
    assert!(cluster.volumes().get_volumes(ReadDeleted::Yes).is_empty());
    assert_eq!(cluster.quotas.in_flight(), 0);
    assert_eq!(cluster.quotas.usage(&project, "gigabytes"), 0);
}

#[tokio::test]
async fn failed_create_parks_in_error() {
    let cluster = TestCluster::new().await;
    cluster
        .backend
        .fail_always("create_volume", FakeFault::Api);
    let request = volume_request(2);

    let error = cluster.volumes().create_volume(&request).await.unwrap_err();
    // the only backend gets excluded after the failed attempt
    assert!(matches!(error, SvcError::NoBackendsAvailable {}));

    let volume = cluster
        .volumes()
        .get_volume(&request.uuid, ReadDeleted::No)
        .unwrap();
    assert_eq!(volume.status(), VolumeStatus::Error);

    let project = TestCluster::project();
    assert_eq!(cluster.quotas.usage(&project, "volumes"), 0);
    assert_eq!(cluster.quotas.in_flight(), 0);

    let events: Vec<String> = cluster
        .notifier
        .events_for(request.uuid.as_str())
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(events, vec!["volume.create.start"]);

    // an errored record can still be force-deleted
    cluster
        .volumes()
        .destroy_volume(&DestroyVolume::new(&request.uuid).with_force())
        .await
        .unwrap();
}

#[tokio::test]
async fn create_reschedules_onto_another_backend() {
    let cluster = TestCluster::new().await;
    cluster.add_pool_b();
    // pool-b has the most free space so it is tried first and fails once
    cluster.backend.fail("create_volume", FakeFault::Api);
    let request = volume_request(2);

    let volume = cluster.volumes().create_volume(&request).await.unwrap();
    assert_eq!(volume.status(), VolumeStatus::Available);
    assert_eq!(volume.spec().host, Some(TestCluster::pool_a()));
    assert!(cluster.backend.has_volume(request.uuid.as_str()));
    assert_eq!(cluster.quotas.usage(&TestCluster::project(), "volumes"), 1);
}

#[tokio::test]
async fn destroy_is_idempotent_when_backend_forgot() {
    let cluster = TestCluster::new().await;
    let request = volume_request(1);
    cluster.volumes().create_volume(&request).await.unwrap();

    cluster.backend.forget_volume(request.uuid.as_str());
    cluster
        .volumes()
        .destroy_volume(&DestroyVolume::new(&request.uuid))
        .await
        .unwrap();
    assert!(cluster
        .volumes()
        .get_volume(&request.uuid, ReadDeleted::Only)
        .is_ok());
}

#[tokio::test]
async fn busy_delete_reverts_to_previous_status() {
    let cluster = TestCluster::new().await;
    let request = volume_request(2);
    cluster.volumes().create_volume(&request).await.unwrap();

    cluster.backend.fail("delete_volume", FakeFault::Busy);
    // busy is recovered locally, the caller sees a success with the volume
    // left in place
    cluster
        .volumes()
        .destroy_volume(&DestroyVolume::new(&request.uuid))
        .await
        .unwrap();
    assert!(cluster.backend.has_volume(request.uuid.as_str()));

    let volume = cluster
        .volumes()
        .get_volume(&request.uuid, ReadDeleted::No)
        .unwrap();
    assert_eq!(volume.status(), VolumeStatus::Available);
    let project = TestCluster::project();
    assert_eq!(cluster.quotas.usage(&project, "volumes"), 1);
    assert_eq!(cluster.quotas.in_flight(), 0);

    // once the consumer lets go the delete goes through
    cluster
        .volumes()
        .destroy_volume(&DestroyVolume::new(&request.uuid))
        .await
        .unwrap();
    assert_eq!(cluster.quotas.usage(&project, "volumes"), 0);
}

#[tokio::test]
async fn delete_failure_parks_error_deleting() {
    let cluster = TestCluster::new().await;
    let request = volume_request(2);
    cluster.volumes().create_volume(&request).await.unwrap();

    cluster.backend.fail("delete_volume", FakeFault::Api);
    let error = cluster
        .volumes()
        .destroy_volume(&DestroyVolume::new(&request.uuid))
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::BackendApi { .. }));

    let volume = cluster
        .volumes()
        .get_volume(&request.uuid, ReadDeleted::No)
        .unwrap();
    assert_eq!(volume.status(), VolumeStatus::ErrorDeleting);
    assert_eq!(cluster.quotas.usage(&TestCluster::project(), "volumes"), 1);
    assert_eq!(cluster.quotas.in_flight(), 0);

    // error_deleting is retryable without force
    cluster
        .volumes()
        .destroy_volume(&DestroyVolume::new(&request.uuid))
        .await
        .unwrap();
}

#[tokio::test]
async fn attached_volume_requires_force_delete() {
    let cluster = TestCluster::new().await;
    let service = cluster.volumes();
    let request = volume_request(1);
    service.create_volume(&request).await.unwrap();
    service
        .reserve_volume(&ReserveVolume {
            uuid: request.uuid.clone(),
        })
        .await
        .unwrap();
    service
        .attach_volume(&AttachVolume {
            uuid: request.uuid.clone(),
        })
        .await
        .unwrap();

    let error = service
        .destroy_volume(&DestroyVolume::new(&request.uuid))
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::InvalidVolume { .. }));

    service
        .destroy_volume(&DestroyVolume::new(&request.uuid).with_force())
        .await
        .unwrap();
    assert!(!cluster.backend.has_volume(request.uuid.as_str()));
}

#[tokio::test]
async fn delete_with_snapshots_needs_cascade() {
    let cluster = TestCluster::new().await;
    let request = volume_request(4);
    cluster.volumes().create_volume(&request).await.unwrap();

    let snap = CreateSnapshot {
        uuid: SnapshotId::new(),
        volume_id: request.uuid.clone(),
        project_id: TestCluster::project(),
        user_id: "user-1".into(),
        name: "snap-1".to_string(),
        ..Default::default()
    };
    cluster.snapshots().create_snapshot(&snap).await.unwrap();

    let error = cluster
        .volumes()
        .destroy_volume(&DestroyVolume::new(&request.uuid))
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::InvalidVolume { .. }));

    cluster
        .volumes()
        .destroy_volume(&DestroyVolume::new(&request.uuid).with_cascade())
        .await
        .unwrap();
    assert!(cluster
        .snapshots()
        .get_snapshot(&snap.uuid, ReadDeleted::Only)
        .is_ok());

    let project = TestCluster::project();
    assert_eq!(cluster.quotas.usage(&project, "volumes"), 0);
    assert_eq!(cluster.quotas.usage(&project, "snapshots"), 0);
    assert_eq!(cluster.quotas.usage(&project, "gigabytes"), 0);
}

#[tokio::test]
async fn cascade_is_all_or_nothing() {
    let cluster = TestCluster::new().await;
    let request = volume_request(2);
    cluster.volumes().create_volume(&request).await.unwrap();

    let good = CreateSnapshot {
        uuid: SnapshotId::new(),
        volume_id: request.uuid.clone(),
        project_id: TestCluster::project(),
        user_id: "user-1".into(),
        name: "snap-good".to_string(),
        ..Default::default()
    };
    cluster.snapshots().create_snapshot(&good).await.unwrap();
    let stuck = CreateSnapshot {
        uuid: SnapshotId::new(),
        volume_id: request.uuid.clone(),
        project_id: TestCluster::project(),
        user_id: "user-1".into(),
        name: "snap-stuck".to_string(),
        ..Default::default()
    };
    cluster.snapshots().create_snapshot(&stuck).await.unwrap();
    cluster
        .registry
        .specs()
        .snapshot(&stuck.uuid, ReadDeleted::No)
        .unwrap()
        .lock()
        .status = SnapshotStatus::Creating;

    // one undeletable snapshot refuses the whole cascade up front
    let error = cluster
        .volumes()
        .destroy_volume(&DestroyVolume::new(&request.uuid).with_cascade())
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::InvalidVolume { .. }));
    assert_eq!(
        cluster
            .snapshots()
            .get_snapshot(&good.uuid, ReadDeleted::No)
            .unwrap()
            .status,
        SnapshotStatus::Available
    );

    cluster
        .registry
        .specs()
        .snapshot(&stuck.uuid, ReadDeleted::No)
        .unwrap()
        .lock()
        .status = SnapshotStatus::Available;
    cluster
        .volumes()
        .destroy_volume(&DestroyVolume::new(&request.uuid).with_cascade())
        .await
        .unwrap();
}

#[tokio::test]
async fn extend_grows_size_and_quota() {
    let cluster = TestCluster::new().await;
    let request = volume_request(2);
    cluster.volumes().create_volume(&request).await.unwrap();

    let volume = cluster
        .volumes()
        .extend_volume(&ExtendVolume {
            uuid: request.uuid.clone(),
            new_size: 5,
            attached: false,
        })
        .await
        .unwrap();
    assert_eq!(volume.size(), 5);
    assert_eq!(volume.status(), VolumeStatus::Available);
    assert_eq!(cluster.quotas.usage(&TestCluster::project(), "gigabytes"), 5);
    assert_eq!(cluster.quotas.in_flight(), 0);
}

#[tokio::test]
async fn extend_validates_bounds() {
    let cluster = TestCluster::new().await;
    let mut request = volume_request(4);
    request.volume_type = Some(VolumeType::named("std").with_extra_spec("max_size_gb", "8"));
    cluster.volumes().create_volume(&request).await.unwrap();

    // not a growth
    let error = cluster
        .volumes()
        .extend_volume(&ExtendVolume {
            uuid: request.uuid.clone(),
            new_size: 4,
            attached: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::InvalidInput { .. }));

    // beyond the type limit
    let error = cluster
        .volumes()
        .extend_volume(&ExtendVolume {
            uuid: request.uuid.clone(),
            new_size: 10,
            attached: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::InvalidInput { .. }));

    cluster
        .volumes()
        .extend_volume(&ExtendVolume {
            uuid: request.uuid.clone(),
            new_size: 8,
            attached: false,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn extend_failure_parks_error_extending() {
    let cluster = TestCluster::new().await;
    let request = volume_request(2);
    cluster.volumes().create_volume(&request).await.unwrap();

    cluster.backend.fail("extend_volume", FakeFault::Api);
    let error = cluster
        .volumes()
        .extend_volume(&ExtendVolume {
            uuid: request.uuid.clone(),
            new_size: 6,
            attached: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::BackendApi { .. }));

    let volume = cluster
        .volumes()
        .get_volume(&request.uuid, ReadDeleted::No)
        .unwrap();
    assert_eq!(volume.status(), VolumeStatus::ErrorExtending);
    assert_eq!(volume.size(), 2);
    assert_eq!(cluster.quotas.usage(&TestCluster::project(), "gigabytes"), 2);
    assert_eq!(cluster.quotas.in_flight(), 0);

    let messages = cluster.notifier.user_messages();
    assert!(messages
        .iter()
        .any(|(id, _)| id == request.uuid.as_str()));
}

#[tokio::test]
async fn retype_in_place() {
    let cluster = TestCluster::new().await;
    let mut request = volume_request(2);
    request.volume_type = Some(VolumeType::named("std"));
    cluster.volumes().create_volume(&request).await.unwrap();

    let volume = cluster
        .volumes()
        .retype_volume(&RetypeVolume {
            uuid: request.uuid.clone(),
            new_type: VolumeType::named("fast"),
        })
        .await
        .unwrap();
    assert_eq!(volume.status(), VolumeStatus::Available);
    assert_eq!(
        volume.spec().volume_type.as_ref().map(|vt| vt.name.as_str()),
        Some("fast")
    );
    assert_eq!(volume.spec().host, Some(TestCluster::pool_a()));
}

#[tokio::test]
async fn retype_refused_by_backend_fails() {
    let cluster = TestCluster::new().await;
    cluster.backend.retype_in_place(false);
    let mut request = volume_request(2);
    request.volume_type = Some(VolumeType::named("std"));
    cluster.volumes().create_volume(&request).await.unwrap();

    let error = cluster
        .volumes()
        .retype_volume(&RetypeVolume {
            uuid: request.uuid.clone(),
            new_type: VolumeType::named("fast"),
        })
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::VolumeMigrationFailed { .. }));
    let volume = cluster
        .volumes()
        .get_volume(&request.uuid, ReadDeleted::No)
        .unwrap();
    assert_eq!(volume.status(), VolumeStatus::Available);
}

/// Two pools, each serving a single volume type.
async fn typed_cluster() -> TestCluster {
    let cluster = TestCluster::new().await;
    cluster.registry.add_backend(
        TestCluster::pool_a(),
        BackendState::new("nova".into(), 1024).with_types(vec![VolumeType::named("std")]),
    );
    cluster.registry.add_backend(
        TestCluster::pool_b(),
        BackendState::new("nova".into(), 2048).with_types(vec![VolumeType::named("fast")]),
    );
    cluster
}

#[tokio::test]
async fn retype_migrates_to_supporting_backend() {
    let cluster = typed_cluster().await;
    let mut request = volume_request(3);
    request.volume_type = Some(VolumeType::named("std"));
    cluster.volumes().create_volume(&request).await.unwrap();

    let volume = cluster
        .volumes()
        .retype_volume(&RetypeVolume {
            uuid: request.uuid.clone(),
            new_type: VolumeType::named("fast"),
        })
        .await
        .unwrap();
    assert_eq!(volume.status(), VolumeStatus::Available);
    assert_eq!(volume.spec().host, Some(TestCluster::pool_b()));
    assert_eq!(volume.spec().migration_status, Some(MigrationStatus::Success));

    // capacity accounting follows the volume to the destination
    let source = cluster.registry.backend_state(&TestCluster::pool_a()).unwrap();
    let destination = cluster.registry.backend_state(&TestCluster::pool_b()).unwrap();
    assert_eq!(source.allocated_gb, 0);
    assert_eq!(destination.allocated_gb, 3);
}

#[tokio::test]
async fn migration_timeout_fences_the_volume() {
    let cluster = typed_cluster().await;
    cluster.backend.migration_polls(100);
    let mut request = volume_request(2);
    request.volume_type = Some(VolumeType::named("std"));
    cluster.volumes().create_volume(&request).await.unwrap();

    let error = cluster
        .volumes()
        .retype_volume(&RetypeVolume {
            uuid: request.uuid.clone(),
            new_type: VolumeType::named("fast"),
        })
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::PollTimedOut { .. }));

    let volume = cluster
        .volumes()
        .get_volume(&request.uuid, ReadDeleted::No)
        .unwrap();
    assert_eq!(volume.status(), VolumeStatus::Maintenance);
    assert_eq!(volume.spec().migration_status, Some(MigrationStatus::Error));
}

#[tokio::test]
async fn reserve_attach_detach_cycle() {
    let cluster = TestCluster::new().await;
    let service = cluster.volumes();
    let request = volume_request(1);
    service.create_volume(&request).await.unwrap();

    let reserve = ReserveVolume {
        uuid: request.uuid.clone(),
    };
    service.reserve_volume(&reserve).await.unwrap();
    assert_eq!(
        service
            .get_volume(&request.uuid, ReadDeleted::No)
            .unwrap()
            .status(),
        VolumeStatus::Attaching
    );

    // a second reservation loses the race
    let error = service.reserve_volume(&reserve).await.unwrap_err();
    assert!(matches!(error, SvcError::InvalidVolume { .. }));

    service
        .attach_volume(&AttachVolume {
            uuid: request.uuid.clone(),
        })
        .await
        .unwrap();
    assert_eq!(
        service
            .get_volume(&request.uuid, ReadDeleted::No)
            .unwrap()
            .status(),
        VolumeStatus::InUse
    );

    service
        .detach_volume(&DetachVolume {
            uuid: request.uuid.clone(),
        })
        .await
        .unwrap();
    assert_eq!(
        service
            .get_volume(&request.uuid, ReadDeleted::No)
            .unwrap()
            .status(),
        VolumeStatus::Available
    );
}

#[tokio::test]
async fn create_from_snapshot_pins_and_checks_size() {
    let cluster = TestCluster::new().await;
    let parent = volume_request(4);
    cluster.volumes().create_volume(&parent).await.unwrap();
    let snap = CreateSnapshot {
        uuid: SnapshotId::new(),
        volume_id: parent.uuid.clone(),
        project_id: TestCluster::project(),
        user_id: "user-1".into(),
        name: "snap-1".to_string(),
        ..Default::default()
    };
    cluster.snapshots().create_snapshot(&snap).await.unwrap();

    let mut too_small = volume_request(2);
    too_small.snapshot_id = Some(snap.uuid.clone());
    let error = cluster
        .volumes()
        .create_volume(&too_small)
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::InvalidInput { .. }));

    let mut restore = volume_request(4);
    restore.snapshot_id = Some(snap.uuid.clone());
    let volume = cluster.volumes().create_volume(&restore).await.unwrap();
    assert_eq!(volume.status(), VolumeStatus::Available);
    // restored next to its parent
    assert_eq!(volume.spec().host, Some(TestCluster::pool_a()));
}

#[tokio::test]
async fn clone_inherits_image_metadata() {
    let cluster = TestCluster::new().await;
    let source = volume_request(2);
    cluster.volumes().create_volume(&source).await.unwrap();
    cluster
        .registry
        .specs()
        .volume(&source.uuid, ReadDeleted::No)
        .unwrap()
        .lock()
        .image_metadata = HashMap::from([("os".to_string(), "linux".to_string())]);

    let mut clone = volume_request(2);
    clone.source_volid = Some(source.uuid.clone());
    let volume = cluster.volumes().create_volume(&clone).await.unwrap();
    assert_eq!(volume.status(), VolumeStatus::Available);
    assert_eq!(
        volume.spec().image_metadata.get("os").map(String::as_str),
        Some("linux")
    );
}

#[tokio::test]
async fn create_from_image_copies_when_clone_unsupported() {
    let cluster = TestCluster::new().await;
    let image = ImageId::new();
    cluster.images.add_image(
        &image,
        2,
        HashMap::from([("os".to_string(), "linux".to_string())]),
    );

    let mut too_small = volume_request(1);
    too_small.image_id = Some(image.clone());
    let error = cluster
        .volumes()
        .create_volume(&too_small)
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::InvalidInput { .. }));

    let mut request = volume_request(2);
    request.image_id = Some(image.clone());
    let volume = cluster.volumes().create_volume(&request).await.unwrap();
    assert_eq!(volume.status(), VolumeStatus::Available);
    assert!(volume.spec().bootable);
    assert_eq!(
        volume.spec().image_metadata.get("image_id").map(String::as_str),
        Some(image.as_str())
    );
    assert_eq!(
        volume.spec().image_metadata.get("os").map(String::as_str),
        Some("linux")
    );
    assert!(cluster.backend.has_volume(request.uuid.as_str()));
}

#[tokio::test]
async fn create_from_image_uses_clone_when_supported() {
    let cluster = TestCluster::new().await;
    cluster.backend.support_image_clone(true);
    let image = ImageId::new();
    cluster.images.add_image(&image, 1, HashMap::new());

    let mut request = volume_request(1);
    request.image_id = Some(image.clone());
    let volume = cluster.volumes().create_volume(&request).await.unwrap();
    assert_eq!(volume.status(), VolumeStatus::Available);
    assert!(volume.spec().bootable);
    assert!(cluster.backend.has_volume(request.uuid.as_str()));
}

#[tokio::test]
async fn encrypted_create_gets_a_key() {
    let cluster = TestCluster::new().await;
    let mut request = volume_request(1);
    request.encrypted = true;
    let volume = cluster.volumes().create_volume(&request).await.unwrap();
    assert!(volume.spec().encryption_key_id.is_some());
}

#[tokio::test]
async fn soft_delete_read_modes() {
    let cluster = TestCluster::new().await;
    let service = cluster.volumes();
    let request = volume_request(1);
    service.create_volume(&request).await.unwrap();
    service
        .destroy_volume(&DestroyVolume::new(&request.uuid))
        .await
        .unwrap();

    assert!(matches!(
        service.get_volume(&request.uuid, ReadDeleted::No),
        Err(SvcError::VolumeNotFound { .. })
    ));
    let tombstone = service
        .get_volume(&request.uuid, ReadDeleted::Yes)
        .unwrap();
    assert_eq!(tombstone.status(), VolumeStatus::Deleted);
    assert!(tombstone.spec().deleted_at.is_some());
    assert_eq!(service.get_volumes(ReadDeleted::Only).len(), 1);
    assert!(service.get_volumes(ReadDeleted::No).is_empty());
}
