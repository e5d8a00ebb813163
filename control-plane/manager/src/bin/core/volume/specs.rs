use crate::controller::{
    registry::Registry,
    resources::{
        operations_helper::{GuardedOperationsHelper, ResourceSpecsLocked, SpecOperationsHelper},
        OperationGuardArc, ResourceMutex,
    },
};

use manager::errors::SvcError;
use vol_port::{
    transport_api::ResourceKind,
    types::v0::{
        store::volume::{VolumeOperation, VolumeSpec},
        transport::{CreateVolume, GroupId, ReadDeleted, VolumeId, VolumeStatus},
    },
};

impl ResourceSpecsLocked {
    /// Get the resource mutex of the given volume, honouring the soft-delete
    /// read mode.
    pub(crate) fn volume(
        &self,
        id: &VolumeId,
        mode: ReadDeleted,
    ) -> Result<ResourceMutex<VolumeSpec>, SvcError> {
        let not_found = || SvcError::VolumeNotFound {
            vol_id: id.to_string(),
        };
        let volume = self
            .read()
            .volumes
            .get(id)
            .cloned()
            .ok_or_else(not_found)?;
        let deleted = volume.lock().deleted;
        match mode {
            ReadDeleted::No if deleted => Err(not_found()),
            ReadDeleted::Only if !deleted => Err(not_found()),
            _ => Ok(volume),
        }
    }

    /// All volume specs matching the soft-delete read mode.
    pub(crate) fn volumes(&self, mode: ReadDeleted) -> Vec<VolumeSpec> {
        self.read()
            .volumes
            .to_vec()
            .into_iter()
            .map(|v| v.lock().clone())
            .filter(|spec| match mode {
                ReadDeleted::No => !spec.deleted,
                ReadDeleted::Yes => true,
                ReadDeleted::Only => spec.deleted,
            })
            .collect()
    }

    /// The live member volumes of the given group.
    pub(crate) fn volumes_by_group(&self, group_id: &GroupId) -> Vec<ResourceMutex<VolumeSpec>> {
        self.read()
            .volumes
            .to_vec()
            .into_iter()
            .filter(|volume| {
                let spec = volume.lock();
                !spec.deleted && spec.group_id.as_ref() == Some(group_id)
            })
            .collect()
    }

    /// Get or create the resource mutex for the requested volume.
    pub(crate) fn get_or_create_volume(&self, request: &CreateVolume) -> ResourceMutex<VolumeSpec> {
        let mut specs = self.write();
        if let Some(volume) = specs.volumes.get(&request.uuid) {
            volume.clone()
        } else {
            specs.volumes.insert(VolumeSpec::from(request))
        }
    }

    /// Remove the volume from the map; used when a create never got anywhere.
    pub(crate) fn remove_volume(&self, id: &VolumeId) {
        self.write().volumes.remove(id);
    }
}

impl SpecOperationsHelper for VolumeSpec {
    type Create = CreateVolume;

    fn dirty(&self) -> bool {
        self.operation
            .as_ref()
            .map(|op| op.result.is_some())
            .unwrap_or(false)
    }
    fn kind(&self) -> ResourceKind {
        ResourceKind::Volume
    }
    fn uuid_str(&self) -> String {
        self.uuid.to_string()
    }
    fn status_creating(&self) -> bool {
        self.status == VolumeStatus::Creating
    }
    fn status_created(&self) -> bool {
        !self.deleted && !matches!(self.status, VolumeStatus::Creating | VolumeStatus::Deleting)
    }
    fn spec_deleting(&self) -> bool {
        self.status == VolumeStatus::Deleting
    }
    fn spec_deleted(&self) -> bool {
        self.deleted
    }
    fn set_status_error(&mut self) {
        self.status = VolumeStatus::Error;
    }
    fn start_create_op(&mut self) {
        use vol_port::types::v0::store::SpecTransaction;
        self.start_op(VolumeOperation::Create);
    }
}

impl GuardedOperationsHelper for OperationGuardArc<VolumeSpec> {
    type Create = CreateVolume;
    type Inner = VolumeSpec;

    fn remove_spec(&self, registry: &Registry) {
        let uuid = self.lock().uuid.clone();
        registry.specs().remove_volume(&uuid);
    }
}
