//! The image service collaborator, consulted when a volume is materialized
//! from an image.

use manager::errors::SvcError;
use vol_port::types::v0::transport::ImageId;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Read access to the image catalogue.
#[async_trait]
pub(crate) trait ImageService: Send + Sync {
    /// The metadata of an image; `Ok(None)` when the image carries none,
    /// which is an expected empty case and not an error.
    async fn image_metadata(
        &self,
        image: &ImageId,
    ) -> Result<Option<HashMap<String, String>>, SvcError>;
    /// The virtual size of the image in GiB.
    async fn image_size(&self, image: &ImageId) -> Result<u64, SvcError>;
}

/// In-memory image catalogue for tests and local runs.
#[derive(Debug, Default)]
pub(crate) struct FakeImages {
    images: Mutex<HashMap<ImageId, (u64, HashMap<String, String>)>>,
}

impl FakeImages {
    /// Register an image with the given size and metadata.
    pub(crate) fn add_image(&self, image: &ImageId, size: u64, metadata: HashMap<String, String>) {
        self.images.lock().insert(image.clone(), (size, metadata));
    }
}

#[async_trait]
impl ImageService for FakeImages {
    async fn image_metadata(
        &self,
        image: &ImageId,
    ) -> Result<Option<HashMap<String, String>>, SvcError> {
        match self.images.lock().get(image) {
            Some((_, metadata)) if metadata.is_empty() => Ok(None),
            Some((_, metadata)) => Ok(Some(metadata.clone())),
            None => Err(SvcError::InvalidInput {
                detail: format!("image '{image}' does not exist"),
            }),
        }
    }

    async fn image_size(&self, image: &ImageId) -> Result<u64, SvcError> {
        match self.images.lock().get(image) {
            Some((size, _)) => Ok(*size),
            None => Err(SvcError::InvalidInput {
                detail: format!("image '{image}' does not exist"),
            }),
        }
    }
}
