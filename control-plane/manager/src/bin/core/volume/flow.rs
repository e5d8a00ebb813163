//! The stages of the create-volume task: request validation, zone and
//! placement resolution, content materialization and source metadata copy.

use crate::controller::{registry::Registry, resources::ResourceMutex, scheduling};

use manager::errors::SvcError;
use vol_port::types::v0::{
    store::volume::{VolumeContentSource, VolumeSpec},
    transport::{
        AvailabilityZone, BackendHost, CreateVolume, GroupStatus, ReadDeleted, SnapshotStatus,
        VolumeStatus,
    },
};

/// Check the request parameters against the catalogue before any row or
/// reservation exists.
pub(crate) async fn validate_request(
    registry: &Registry,
    request: &CreateVolume,
) -> Result<(), SvcError> {
    if request.size == 0 {
        return Err(SvcError::InvalidInput {
            detail: "volume size must be at least 1 GiB".to_string(),
        });
    }
    let sources = [
        request.snapshot_id.is_some(),
        request.source_volid.is_some(),
        request.image_id.is_some(),
    ]
    .iter()
    .filter(|source| **source)
    .count();
    if sources > 1 {
        return Err(SvcError::InvalidInput {
            detail: "at most one of snapshot, source volume and image may be given".to_string(),
        });
    }

    if let Some(snap_id) = &request.snapshot_id {
        let snapshot = registry.specs().snapshot(snap_id, ReadDeleted::No)?;
        let snapshot = snapshot.lock().clone();
        if snapshot.status != SnapshotStatus::Available {
            return Err(SvcError::InvalidSnapshot {
                snap_id: snap_id.to_string(),
                detail: format!("status is '{}', not available", snapshot.status),
            });
        }
        if request.size < snapshot.volume_size {
            return Err(SvcError::InvalidInput {
                detail: format!(
                    "size {}GiB is smaller than the snapshot source ({}GiB)",
                    request.size, snapshot.volume_size
                ),
            });
        }
    }

    if let Some(vol_id) = &request.source_volid {
        let source = registry.specs().volume(vol_id, ReadDeleted::No)?;
        let source = source.lock().clone();
        if !matches!(source.status, VolumeStatus::Available | VolumeStatus::InUse) {
            return Err(SvcError::InvalidVolume {
                vol_id: vol_id.to_string(),
                detail: format!("status is '{}', cannot be cloned", source.status),
            });
        }
        if request.size < source.size {
            return Err(SvcError::InvalidInput {
                detail: format!(
                    "size {}GiB is smaller than the source volume ({}GiB)",
                    request.size, source.size
                ),
            });
        }
        if let Some(zone) = &request.availability_zone {
            if zone != &source.availability_zone {
                return Err(SvcError::InvalidInput {
                    detail: format!(
                        "availability zone '{zone}' differs from the source volume's '{}'",
                        source.availability_zone
                    ),
                });
            }
        }
    }

    if let Some(image) = &request.image_id {
        let image_size = registry.images().image_size(image).await?;
        if request.size < image_size {
            return Err(SvcError::InvalidInput {
                detail: format!(
                    "size {}GiB is smaller than the image ({}GiB)",
                    request.size, image_size
                ),
            });
        }
    }

    if let Some(group_id) = &request.group_id {
        let group = registry.specs().group(group_id, ReadDeleted::No)?;
        let group = group.lock().clone();
        if group.status != GroupStatus::Available {
            return Err(SvcError::InvalidGroup {
                group_id: group_id.to_string(),
                detail: format!("status is '{}', not available", group.status),
            });
        }
        if let Some(volume_type) = &request.volume_type {
            if !group
                .volume_types
                .iter()
                .any(|vt| vt.name == volume_type.name)
            {
                return Err(SvcError::InvalidInput {
                    detail: format!(
                        "volume type '{}' is not served by group '{group_id}'",
                        volume_type.name
                    ),
                });
            }
        }
    }

    Ok(())
}

/// Resolve the zone the volume will live in: an explicit request wins, then
/// the zone inherited from the group or source, then the configured default,
/// then the first enabled zone.
pub(crate) fn resolve_availability_zone(
    registry: &Registry,
    request: &CreateVolume,
) -> Result<AvailabilityZone, SvcError> {
    if let Some(zone) = &request.availability_zone {
        return Ok(zone.clone());
    }
    if let Some(group_id) = &request.group_id {
        let group = registry.specs().group(group_id, ReadDeleted::No)?;
        return Ok(group.lock().availability_zone.clone());
    }
    if let Some(vol_id) = &request.source_volid {
        let source = registry.specs().volume(vol_id, ReadDeleted::No)?;
        return Ok(source.lock().availability_zone.clone());
    }
    if let Some(snap_id) = &request.snapshot_id {
        let snapshot = registry.specs().snapshot(snap_id, ReadDeleted::No)?;
        let volume_id = snapshot.lock().volume_id.clone();
        if let Ok(parent) = registry.specs().volume(&volume_id, ReadDeleted::Yes) {
            return Ok(parent.lock().availability_zone.clone());
        }
    }
    let default = registry.config().default_availability_zone.clone();
    if !default.as_str().is_empty() {
        return Ok(default);
    }
    scheduling::enabled_zones(registry)
        .into_iter()
        .next()
        .ok_or(SvcError::NoBackendsAvailable {})
}

/// The placement pin, when a group or content source already fixes the host.
pub(crate) fn pinned_host(
    registry: &Registry,
    request: &CreateVolume,
) -> Result<Option<BackendHost>, SvcError> {
    if let Some(group_id) = &request.group_id {
        let group = registry.specs().group(group_id, ReadDeleted::No)?;
        return Ok(group.lock().host.clone());
    }
    if let Some(vol_id) = &request.source_volid {
        let source = registry.specs().volume(vol_id, ReadDeleted::No)?;
        return Ok(source.lock().host.clone());
    }
    if let Some(snap_id) = &request.snapshot_id {
        let snapshot = registry.specs().snapshot(snap_id, ReadDeleted::No)?;
        let volume_id = snapshot.lock().volume_id.clone();
        if let Ok(parent) = registry.specs().volume(&volume_id, ReadDeleted::Yes) {
            return Ok(parent.lock().host.clone());
        }
        return Ok(None);
    }
    Ok(None)
}

/// A fresh key id when the volume, or the source it is materialized from, is
/// encrypted. A clone never shares its source's key.
pub(crate) async fn derive_encryption_key(
    registry: &Registry,
    request: &CreateVolume,
) -> Result<Option<String>, SvcError> {
    let source_encrypted = if let Some(vol_id) = &request.source_volid {
        let source = registry.specs().volume(vol_id, ReadDeleted::No)?;
        let encrypted = source.lock().encryption_key_id.is_some();
        encrypted
    } else if let Some(snap_id) = &request.snapshot_id {
        let snapshot = registry.specs().snapshot(snap_id, ReadDeleted::No)?;
        let volume_id = snapshot.lock().volume_id.clone();
        match registry.specs().volume(&volume_id, ReadDeleted::Yes) {
            Ok(parent) => {
                let encrypted = parent.lock().encryption_key_id.is_some();
                encrypted
            }
            Err(_) => false,
        }
    } else {
        false
    };

    if request.encrypted || source_encrypted {
        let key = registry.keys().create_key(&request.project_id).await?;
        Ok(Some(key))
    } else {
        Ok(None)
    }
}

/// Materialize the volume content on its placed backend, per content source.
/// An image clone falls back to provision-then-copy when the backend reports
/// it cannot clone.
pub(crate) async fn materialize(
    registry: &Registry,
    volume: &ResourceMutex<VolumeSpec>,
) -> Result<(), SvcError> {
    let spec = volume.lock().clone();
    match &spec.source {
        None => registry.backend().create_volume(&spec).await,
        Some(VolumeContentSource::Snapshot(snap_id)) => {
            let snapshot = registry.specs().snapshot(snap_id, ReadDeleted::No)?;
            let snapshot = snapshot.lock().clone();
            registry
                .backend()
                .create_volume_from_snapshot(&spec, &snapshot)
                .await
        }
        Some(VolumeContentSource::Volume(vol_id)) => {
            let source = registry.specs().volume(vol_id, ReadDeleted::No)?;
            let source = source.lock().clone();
            registry.backend().create_cloned_volume(&spec, &source).await
        }
        Some(VolumeContentSource::Image(image)) => {
            match registry.backend().clone_image(&spec, image).await? {
                Some(update) => {
                    if let Some(host) = update.host {
                        volume.lock().host = Some(host);
                    }
                    Ok(())
                }
                None => {
                    registry.backend().create_volume(&spec).await?;
                    registry.backend().copy_image_to_volume(&spec, image).await
                }
            }
        }
    }
}

/// Copy metadata from the content source into the new volume and persist it.
/// A persistence failure here is fatal to the create; serving a volume whose
/// recorded metadata may not match its content is worse than failing.
pub(crate) async fn copy_source_metadata(
    registry: &Registry,
    volume: &ResourceMutex<VolumeSpec>,
) -> Result<(), SvcError> {
    let spec = volume.lock().clone();
    let from_image = matches!(&spec.source, Some(VolumeContentSource::Image(_)));
    let metadata = match &spec.source {
        None => return Ok(()),
        Some(VolumeContentSource::Image(image)) => {
            let mut metadata = registry
                .images()
                .image_metadata(image)
                .await?
                .unwrap_or_default();
            metadata.insert("image_id".to_string(), image.to_string());
            metadata
        }
        Some(VolumeContentSource::Volume(vol_id)) => {
            match registry.specs().volume(vol_id, ReadDeleted::Yes) {
                Ok(source) => source.lock().image_metadata.clone(),
                Err(_) => Default::default(),
            }
        }
        Some(VolumeContentSource::Snapshot(snap_id)) => {
            let snapshot = registry.specs().snapshot(snap_id, ReadDeleted::Yes)?;
            let volume_id = snapshot.lock().volume_id.clone();
            match registry.specs().volume(&volume_id, ReadDeleted::Yes) {
                Ok(parent) => parent.lock().image_metadata.clone(),
                Err(_) => Default::default(),
            }
        }
    };
    if metadata.is_empty() {
        return Ok(());
    }

    let spec_clone = {
        let mut spec = volume.lock();
        spec.image_metadata = metadata;
        if from_image {
            spec.bootable = true;
        }
        spec.clone()
    };
    registry
        .store_obj(&spec_clone)
        .await
        .map_err(|_| SvcError::MetadataCopyFailure {
            vol_id: spec.uuid.to_string(),
        })
}
