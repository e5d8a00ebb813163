use super::{volume_request, TestCluster};
use crate::controller::backend::fake::FakeFault;

use manager::errors::SvcError;
use vol_port::types::v0::transport::{
    BackendHost, CreateGroup, CreateGroupFromSource, CreateGroupSnapshot, CreateVolume,
    DestroyGroup, DestroyGroupSnapshot, GroupId, GroupSnapshotId, GroupSnapshotStatus, GroupSource,
    GroupStatus, ReadDeleted, SnapshotStatus, UpdateGroup, VolumeId, VolumeStatus, VolumeType,
};

fn group_request() -> CreateGroup {
    CreateGroup {
        uuid: GroupId::new(),
        project_id: TestCluster::project(),
        user_id: "user-1".into(),
        name: "group-1".to_string(),
        volume_types: vec![VolumeType::named("std")],
        ..Default::default()
    }
}

fn member_request(group_id: &GroupId, size: u64) -> CreateVolume {
    let mut request = volume_request(size);
    request.group_id = Some(group_id.clone());
    request.volume_type = Some(VolumeType::named("std"));
    request
}

/// An available group with the given member volume sizes.
async fn group_with_members(cluster: &TestCluster, sizes: &[u64]) -> (GroupId, Vec<VolumeId>) {
    let request = group_request();
    cluster.groups().create_group(&request).await.unwrap();
    let mut members = Vec::with_capacity(sizes.len());
    for size in sizes {
        let member = member_request(&request.uuid, *size);
        cluster.volumes().create_volume(&member).await.unwrap();
        members.push(member.uuid);
    }
    (request.uuid, members)
}

#[tokio::test]
async fn group_lifecycle() {
    let cluster = TestCluster::new().await;
    let request = group_request();

    let group = cluster.groups().create_group(&request).await.unwrap();
    assert_eq!(group.status, GroupStatus::Available);
    assert_eq!(group.host, Some(TestCluster::pool_a()));
    assert_eq!(group.availability_zone.as_str(), "nova");

    let events: Vec<String> = cluster
        .notifier
        .events_for(request.uuid.as_str())
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(events, vec!["group.create.start", "group.create.end"]);

    // members are pinned to the group placement
    let member = member_request(&request.uuid, 2);
    let volume = cluster.volumes().create_volume(&member).await.unwrap();
    assert_eq!(volume.spec().host, Some(TestCluster::pool_a()));

    // an empty group deletes without delete_volumes
    let error = cluster
        .groups()
        .destroy_group(&DestroyGroup {
            uuid: request.uuid.clone(),
            delete_volumes: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::InvalidGroup { .. }));

    cluster
        .groups()
        .destroy_group(&DestroyGroup {
            uuid: request.uuid.clone(),
            delete_volumes: true,
        })
        .await
        .unwrap();
    assert!(cluster
        .groups()
        .get_group(&request.uuid, ReadDeleted::Only)
        .is_ok());
    assert!(cluster
        .volumes()
        .get_volume(&member.uuid, ReadDeleted::Only)
        .is_ok());
    assert!(!cluster.backend.has_volume(member.uuid.as_str()));
    assert_eq!(cluster.quotas.usage(&TestCluster::project(), "volumes"), 0);
    assert_eq!(cluster.quotas.in_flight(), 0);

    // a second delete of the same group is a no-op
    cluster
        .groups()
        .destroy_group(&DestroyGroup {
            uuid: request.uuid.clone(),
            delete_volumes: false,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn group_requires_a_volume_type() {
    let cluster = TestCluster::new().await;
    let mut request = group_request();
    request.volume_types.clear();

    let error = cluster.groups().create_group(&request).await.unwrap_err();
    assert!(matches!(error, SvcError::InvalidInput { .. }));
    assert!(cluster.groups().get_groups(ReadDeleted::Yes).is_empty());
}

#[tokio::test]
async fn failed_group_create_parks_in_error() {
    let cluster = TestCluster::new().await;
    cluster.backend.fail("create_group", FakeFault::Api);
    let request = group_request();

    let error = cluster.groups().create_group(&request).await.unwrap_err();
    assert!(matches!(error, SvcError::BackendApi { .. }));
    assert_eq!(
        cluster
            .groups()
            .get_group(&request.uuid, ReadDeleted::No)
            .unwrap()
            .status,
        GroupStatus::Error
    );
}

#[tokio::test]
async fn frozen_backend_fails_group_operations_first() {
    let cluster = TestCluster::new().await;
    let (group_id, members) = group_with_members(&cluster, &[1]).await;
    cluster.registry.set_frozen(&TestCluster::pool_a(), true);

    let error = cluster
        .groups()
        .update_group(&UpdateGroup {
            uuid: group_id.clone(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::FrozenBackend { .. }));

    // the freeze wins over the membership precondition
    let error = cluster
        .groups()
        .destroy_group(&DestroyGroup {
            uuid: group_id.clone(),
            delete_volumes: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::FrozenBackend { .. }));

    let error = cluster
        .groups()
        .create_group_snapshot(&CreateGroupSnapshot {
            uuid: GroupSnapshotId::new(),
            group_id: group_id.clone(),
            project_id: TestCluster::project(),
            user_id: "user-1".into(),
            name: "gs-1".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::FrozenBackend { .. }));

    // a clone inherits the source group placement, so the freeze wins there
    // too, before any pairing
    let error = cluster
        .groups()
        .create_group_from_src(&CreateGroupFromSource {
            uuid: GroupId::new(),
            project_id: TestCluster::project(),
            user_id: "user-1".into(),
            name: "group-clone".to_string(),
            source: GroupSource::Group(group_id.clone()),
            volumes: vec![members[0].clone()],
        })
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::FrozenBackend { .. }));
}

#[tokio::test]
async fn group_destroy_refuses_foreign_members() {
    let cluster = TestCluster::new().await;
    let (group_id, members) = group_with_members(&cluster, &[1]).await;
    cluster
        .registry
        .specs()
        .volume(&members[0], ReadDeleted::No)
        .unwrap()
        .lock()
        .host = Some(BackendHost::from("remote@fake#pool-z"));

    let error = cluster
        .groups()
        .destroy_group(&DestroyGroup {
            uuid: group_id.clone(),
            delete_volumes: true,
        })
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::NotOwner { .. }));

    // nothing was touched
    let group = cluster
        .groups()
        .get_group(&group_id, ReadDeleted::No)
        .unwrap();
    assert_eq!(group.status, GroupStatus::Available);
    assert_eq!(
        cluster
            .volumes()
            .get_volume(&members[0], ReadDeleted::No)
            .unwrap()
            .status(),
        VolumeStatus::Available
    );
}

#[tokio::test]
async fn member_delete_failure_parks_member_and_group() {
    let cluster = TestCluster::new().await;
    let (group_id, members) = group_with_members(&cluster, &[1, 2]).await;
    cluster.backend.fail_member_delete(members[0].as_str());

    let error = cluster
        .groups()
        .destroy_group(&DestroyGroup {
            uuid: group_id.clone(),
            delete_volumes: true,
        })
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::InvalidGroup { .. }));

    // the failed member and the group are parked; the other member stays gone
    assert_eq!(
        cluster
            .volumes()
            .get_volume(&members[0], ReadDeleted::No)
            .unwrap()
            .status(),
        VolumeStatus::ErrorDeleting
    );
    assert!(cluster
        .volumes()
        .get_volume(&members[1], ReadDeleted::Only)
        .is_ok());
    assert_eq!(
        cluster
            .groups()
            .get_group(&group_id, ReadDeleted::No)
            .unwrap()
            .status,
        GroupStatus::ErrorDeleting
    );
    assert!(cluster
        .notifier
        .user_messages()
        .iter()
        .any(|(id, _)| id == members[0].as_str()));
    // only the deleted member released its quota
    assert_eq!(cluster.quotas.usage(&TestCluster::project(), "volumes"), 1);
    assert_eq!(cluster.quotas.in_flight(), 0);
}

#[tokio::test]
async fn membership_update_validations() {
    let cluster = TestCluster::new().await;
    let (group_id, members) = group_with_members(&cluster, &[1]).await;

    // already a member of this group
    let error = cluster
        .groups()
        .update_group(&UpdateGroup {
            uuid: group_id.clone(),
            add_volumes: vec![members[0].clone()],
            remove_volumes: vec![],
        })
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::InvalidVolume { .. }));

    // untyped volumes are never admitted
    let untyped = volume_request(1);
    cluster.volumes().create_volume(&untyped).await.unwrap();
    let error = cluster
        .groups()
        .update_group(&UpdateGroup {
            uuid: group_id.clone(),
            add_volumes: vec![untyped.uuid.clone()],
            remove_volumes: vec![],
        })
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::InvalidInput { .. }));

    // additions must be available
    let mut busy = volume_request(1);
    busy.volume_type = Some(VolumeType::named("std"));
    cluster.volumes().create_volume(&busy).await.unwrap();
    cluster
        .registry
        .specs()
        .volume(&busy.uuid, ReadDeleted::No)
        .unwrap()
        .lock()
        .status = VolumeStatus::InUse;
    let error = cluster
        .groups()
        .update_group(&UpdateGroup {
            uuid: group_id.clone(),
            add_volumes: vec![busy.uuid.clone()],
            remove_volumes: vec![],
        })
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::InvalidVolume { .. }));

    // removals must be members
    let error = cluster
        .groups()
        .update_group(&UpdateGroup {
            uuid: group_id.clone(),
            add_volumes: vec![],
            remove_volumes: vec![untyped.uuid.clone()],
        })
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::InvalidVolume { .. }));
}

#[tokio::test]
async fn membership_update_applies_model_changes() {
    let cluster = TestCluster::new().await;
    let (group_id, members) = group_with_members(&cluster, &[1]).await;

    let mut joiner = volume_request(1);
    joiner.volume_type = Some(VolumeType::named("std"));
    cluster.volumes().create_volume(&joiner).await.unwrap();

    let group = cluster
        .groups()
        .update_group(&UpdateGroup {
            uuid: group_id.clone(),
            add_volumes: vec![joiner.uuid.clone()],
            remove_volumes: vec![members[0].clone()],
        })
        .await
        .unwrap();
    assert_eq!(group.status, GroupStatus::Available);

    assert_eq!(
        cluster
            .volumes()
            .get_volume(&joiner.uuid, ReadDeleted::No)
            .unwrap()
            .spec()
            .group_id,
        Some(group_id.clone())
    );
    assert_eq!(
        cluster
            .volumes()
            .get_volume(&members[0], ReadDeleted::No)
            .unwrap()
            .spec()
            .group_id,
        None
    );

    let events: Vec<String> = cluster
        .notifier
        .events_for(group_id.as_str())
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert!(events.contains(&"group.update.start".to_string()));
    assert!(events.contains(&"group.update.end".to_string()));
}

#[tokio::test]
async fn group_snapshot_fans_out_over_members() {
    let cluster = TestCluster::new().await;
    let (group_id, members) = group_with_members(&cluster, &[2, 3]).await;

    let request = CreateGroupSnapshot {
        uuid: GroupSnapshotId::new(),
        group_id: group_id.clone(),
        project_id: TestCluster::project(),
        user_id: "user-1".into(),
        name: "gs-1".to_string(),
    };
    let snapshot = cluster
        .groups()
        .create_group_snapshot(&request)
        .await
        .unwrap();
    assert_eq!(snapshot.status, GroupSnapshotStatus::Available);

    let children: Vec<_> = cluster
        .snapshots()
        .get_snapshots(ReadDeleted::No)
        .into_iter()
        .filter(|child| child.group_snapshot_id.as_ref() == Some(&request.uuid))
        .collect();
    assert_eq!(children.len(), members.len());
    for child in &children {
        assert_eq!(child.status, SnapshotStatus::Available);
        assert!(cluster.backend.has_snapshot(child.uuid.as_str()));
    }

    let project = TestCluster::project();
    assert_eq!(cluster.quotas.usage(&project, "snapshots"), 2);
    // member volumes (5GiB) plus their snapshots (5GiB)
    assert_eq!(cluster.quotas.usage(&project, "gigabytes"), 10);

    cluster
        .groups()
        .destroy_group_snapshot(&DestroyGroupSnapshot {
            uuid: request.uuid.clone(),
        })
        .await
        .unwrap();
    for child in &children {
        assert!(cluster
            .snapshots()
            .get_snapshot(&child.uuid, ReadDeleted::Only)
            .is_ok());
        assert!(!cluster.backend.has_snapshot(child.uuid.as_str()));
    }
    assert!(cluster
        .groups()
        .get_group_snapshot(&request.uuid, ReadDeleted::Only)
        .is_ok());
    assert_eq!(cluster.quotas.usage(&project, "snapshots"), 0);
    assert_eq!(cluster.quotas.usage(&project, "gigabytes"), 5);
    assert_eq!(cluster.quotas.in_flight(), 0);

    // a second delete of the same group snapshot is a no-op
    cluster
        .groups()
        .destroy_group_snapshot(&DestroyGroupSnapshot {
            uuid: request.uuid.clone(),
        })
        .await
        .unwrap();
    assert_eq!(cluster.quotas.usage(&project, "snapshots"), 0);
}

#[tokio::test]
async fn group_snapshot_failure_errors_all_children() {
    let cluster = TestCluster::new().await;
    let (group_id, _members) = group_with_members(&cluster, &[1, 1]).await;
    cluster
        .backend
        .fail("create_group_snapshot", FakeFault::Api);

    let request = CreateGroupSnapshot {
        uuid: GroupSnapshotId::new(),
        group_id: group_id.clone(),
        project_id: TestCluster::project(),
        user_id: "user-1".into(),
        name: "gs-1".to_string(),
    };
    let error = cluster
        .groups()
        .create_group_snapshot(&request)
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::BackendApi { .. }));

    assert_eq!(
        cluster
            .groups()
            .get_group_snapshot(&request.uuid, ReadDeleted::No)
            .unwrap()
            .status,
        GroupSnapshotStatus::Error
    );
    let children: Vec<_> = cluster
        .snapshots()
        .get_snapshots(ReadDeleted::No)
        .into_iter()
        .filter(|child| child.group_snapshot_id.as_ref() == Some(&request.uuid))
        .collect();
    assert_eq!(children.len(), 2);
    for child in &children {
        assert_eq!(child.status, SnapshotStatus::Error);
    }
    assert_eq!(cluster.quotas.usage(&TestCluster::project(), "snapshots"), 0);
    assert_eq!(cluster.quotas.in_flight(), 0);
}

#[tokio::test]
async fn restore_a_group_from_its_snapshot() {
    let cluster = TestCluster::new().await;
    let (group_id, _members) = group_with_members(&cluster, &[2]).await;

    let snapshot = CreateGroupSnapshot {
        uuid: GroupSnapshotId::new(),
        group_id: group_id.clone(),
        project_id: TestCluster::project(),
        user_id: "user-1".into(),
        name: "gs-1".to_string(),
    };
    cluster
        .groups()
        .create_group_snapshot(&snapshot)
        .await
        .unwrap();
    let child = cluster
        .snapshots()
        .get_snapshots(ReadDeleted::No)
        .into_iter()
        .find(|child| child.group_snapshot_id.as_ref() == Some(&snapshot.uuid))
        .unwrap();

    // the member rows exist in `creating`, each naming its source snapshot
    let mut restored = volume_request(child.volume_size);
    restored.snapshot_id = Some(child.uuid.clone());
    cluster.registry.specs().get_or_create_volume(&restored);

    let request = CreateGroupFromSource {
        uuid: GroupId::new(),
        project_id: TestCluster::project(),
        user_id: "user-1".into(),
        name: "group-restored".to_string(),
        source: GroupSource::GroupSnapshot(snapshot.uuid.clone()),
        volumes: vec![restored.uuid.clone()],
    };
    let group = cluster
        .groups()
        .create_group_from_src(&request)
        .await
        .unwrap();
    assert_eq!(group.status, GroupStatus::Available);
    // placement and admitted types are inherited from the source group
    assert_eq!(group.host, Some(TestCluster::pool_a()));
    assert_eq!(group.volume_types, vec![VolumeType::named("std")]);

    let member = cluster
        .volumes()
        .get_volume(&restored.uuid, ReadDeleted::No)
        .unwrap();
    assert_eq!(member.status(), VolumeStatus::Available);
    assert_eq!(member.spec().group_id, Some(request.uuid.clone()));
    assert!(cluster.backend.has_volume(restored.uuid.as_str()));
}

#[tokio::test]
async fn group_from_source_rejects_unpaired_members() {
    let cluster = TestCluster::new().await;
    let (group_id, _members) = group_with_members(&cluster, &[1]).await;

    // a member row with no source counterpart cannot be paired
    let unpaired = volume_request(1);
    cluster.registry.specs().get_or_create_volume(&unpaired);

    let error = cluster
        .groups()
        .create_group_from_src(&CreateGroupFromSource {
            uuid: GroupId::new(),
            project_id: TestCluster::project(),
            user_id: "user-1".into(),
            name: "group-clone".to_string(),
            source: GroupSource::Group(group_id.clone()),
            volumes: vec![unpaired.uuid.clone()],
        })
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::InvalidVolume { .. }));

    let error = cluster
        .groups()
        .create_group_from_src(&CreateGroupFromSource {
            uuid: GroupId::new(),
            project_id: TestCluster::project(),
            user_id: "user-1".into(),
            name: "group-clone".to_string(),
            source: GroupSource::Group(group_id),
            volumes: vec![],
        })
        .await
        .unwrap_err();
    assert!(matches!(error, SvcError::InvalidInput { .. }));
}
