//! The key manager collaborator. Volumes created from an encrypted source get
//! a freshly derived key rather than reusing the source's key.

use manager::errors::SvcError;
use vol_port::types::v0::transport::ProjectId;

use async_trait::async_trait;

/// Creation of per-volume encryption keys.
#[async_trait]
pub(crate) trait KeyManager: Send + Sync {
    /// Create a new key for the project and return its id.
    async fn create_key(&self, project_id: &ProjectId) -> Result<String, SvcError>;
}

/// Key manager which hands out random key ids.
#[derive(Debug, Default)]
pub(crate) struct FakeKeys {}

#[async_trait]
impl KeyManager for FakeKeys {
    async fn create_key(&self, _project_id: &ProjectId) -> Result<String, SvcError> {
        Ok(uuid::Uuid::new_v4().to_string())
    }
}
