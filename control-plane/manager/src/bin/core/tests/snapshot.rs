use super::{volume_request, TestCluster};
use crate::controller::backend::fake::FakeFault;

use manager::errors::SvcError;
use vol_port::types::v0::transport::{
    CreateSnapshot, DestroySnapshot, ExtendVolume, ReadDeleted, SnapshotId, SnapshotStatus,
    VolumeId, VolumeStatus,
};

fn snapshot_request(volume_id: &VolumeId, name: &str) -> CreateSnapshot {
    CreateSnapshot {
        uuid: SnapshotId::new(),
        volume_id: volume_id.clone(),
        project_id: TestCluster::project(),
        user_id: "user-1".into(),
        name: name.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn snapshot_lifecycle() {
    let cluster = TestCluster::new().await;
    let volume = volume_request(4);
    cluster.volumes().create_volume(&volume).await.unwrap();

    let request = snapshot_request(&volume.uuid, "snap-1");
    let snapshot = cluster.snapshots().create_snapshot(&request).await.unwrap();
    assert_eq!(snapshot.status, SnapshotStatus::Available);
    assert_eq!(snapshot.volume_size, 4);
    assert!(cluster.backend.has_snapshot(request.uuid.as_str()));

    let project = TestCluster::project();
    assert_eq!(cluster.quotas.usage(&project, "snapshots"), 1);
    // the parent volume and the snapshot each charge their size
    assert_eq!(cluster.quotas.usage(&project, "gigabytes"), 8);

    let events: Vec<String> = cluster
        .notifier
        .events_for(request.uuid.as_str())
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(events, vec!["snapshot.create.start", "snapshot.create.end"]);

    cluster
        .snapshots()
        .destroy_snapshot(&DestroySnapshot::new(&request.uuid))
        .await
        .unwrap();
    assert!(!cluster.backend.has_snapshot(request.uuid.as_str()));
    assert_eq!(cluster.quotas.usage(&project, "snapshots"), 0);
    assert_eq!(cluster.quotas.usage(&project, "gigabytes"), 4);
    assert_eq!(cluster.quotas.in_flight(), 0);

    // deleting a tombstone is a no-op
    cluster
        .snapshots()
        .destroy_snapshot(&DestroySnapshot::new(&request.uuid))
        .await
        .unwrap();
    assert!(cluster
        .snapshots()
        .get_snapshot(&request.uuid, ReadDeleted::Only)
        .is_ok());
}

#[tokio::test]
async fn snapshot_of_missing_volume() {
    let cluster = TestCluster::new().await;
    let request = snapshot_request(&VolumeId::new(), "snap-1");
    let error = cluster
        .snapshots()
        .create_snapshot(&request)
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::VolumeNotFound { .. }));
}

#[tokio::test]
async fn snapshot_refused_while_volume_is_transitioning() {
    let cluster = TestCluster::new().await;
    let volume = volume_request(1);
    cluster.volumes().create_volume(&volume).await.unwrap();
    cluster
        .registry
        .specs()
        .volume(&volume.uuid, ReadDeleted::No)
        .unwrap()
        .lock()
        .status = VolumeStatus::Uploading;

    let error = cluster
        .snapshots()
        .create_snapshot(&snapshot_request(&volume.uuid, "snap-1"))
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::InvalidVolume { .. }));
    assert_eq!(cluster.quotas.usage(&TestCluster::project(), "snapshots"), 0);
}

#[tokio::test]
async fn failed_snapshot_rolls_back_quota() {
    let cluster = TestCluster::new().await;
    let volume = volume_request(2);
    cluster.volumes().create_volume(&volume).await.unwrap();

    cluster.backend.fail("create_snapshot", FakeFault::Api);
    let request = snapshot_request(&volume.uuid, "snap-1");
    let error = cluster
        .snapshots()
        .create_snapshot(&request)
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::BackendApi { .. }));

    let snapshot = cluster
        .snapshots()
        .get_snapshot(&request.uuid, ReadDeleted::No)
        .unwrap();
    assert_eq!(snapshot.status, SnapshotStatus::Error);

    let project = TestCluster::project();
    assert_eq!(cluster.quotas.usage(&project, "snapshots"), 0);
    assert_eq!(cluster.quotas.usage(&project, "gigabytes"), 2);
    assert_eq!(cluster.quotas.in_flight(), 0);

    let events: Vec<String> = cluster
        .notifier
        .events_for(request.uuid.as_str())
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(events, vec!["snapshot.create.start"]);
}

#[tokio::test]
async fn delete_failure_parks_error_deleting() {
    let cluster = TestCluster::new().await;
    let volume = volume_request(2);
    cluster.volumes().create_volume(&volume).await.unwrap();
    let request = snapshot_request(&volume.uuid, "snap-1");
    cluster.snapshots().create_snapshot(&request).await.unwrap();

    cluster.backend.fail("delete_snapshot", FakeFault::Api);
    let error = cluster
        .snapshots()
        .destroy_snapshot(&DestroySnapshot::new(&request.uuid))
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::BackendApi { .. }));

    let snapshot = cluster
        .snapshots()
        .get_snapshot(&request.uuid, ReadDeleted::No)
        .unwrap();
    assert_eq!(snapshot.status, SnapshotStatus::ErrorDeleting);
    assert_eq!(cluster.quotas.usage(&TestCluster::project(), "snapshots"), 1);
    assert_eq!(cluster.quotas.in_flight(), 0);

    // error_deleting needs an operator reset before another attempt
    let error = cluster
        .snapshots()
        .destroy_snapshot(&DestroySnapshot::new(&request.uuid))
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::InvalidSnapshot { .. }));
}

#[tokio::test]
async fn volume_size_is_captured_at_snapshot_time() {
    let cluster = TestCluster::new().await;
    let volume = volume_request(2);
    cluster.volumes().create_volume(&volume).await.unwrap();

    let before = snapshot_request(&volume.uuid, "snap-before");
    cluster.snapshots().create_snapshot(&before).await.unwrap();

    cluster
        .volumes()
        .extend_volume(&ExtendVolume {
            uuid: volume.uuid.clone(),
            new_size: 5,
            attached: false,
        })
        .await
        .unwrap();

    let after = snapshot_request(&volume.uuid, "snap-after");
    cluster.snapshots().create_snapshot(&after).await.unwrap();

    let snapshots = cluster.snapshots();
    assert_eq!(
        snapshots
            .get_snapshot(&before.uuid, ReadDeleted::No)
            .unwrap()
            .volume_size,
        2
    );
    assert_eq!(
        snapshots
            .get_snapshot(&after.uuid, ReadDeleted::No)
            .unwrap()
            .volume_size,
        5
    );
}
