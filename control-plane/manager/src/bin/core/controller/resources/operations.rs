use crate::controller::registry::Registry;
use manager::errors::SvcError;

/// Resource Lifecycle Operations.
#[async_trait::async_trait]
pub(crate) trait ResourceLifecycle {
    type Create: Sync + Send;
    type CreateOutput: Sync + Send + Sized;
    type Destroy: Sync + Send;
    /// Create the `Self` Resource itself.
    async fn create(
        registry: &Registry,
        request: &Self::Create,
    ) -> Result<Self::CreateOutput, SvcError>;
    /// Destroy the resource itself.
    async fn destroy(
        &mut self,
        registry: &Registry,
        request: &Self::Destroy,
    ) -> Result<(), SvcError>;
}

/// Resource Resize Operations.
#[async_trait::async_trait]
pub(crate) trait ResourceResize {
    type Resize: Sync + Send;
    type ResizeOutput: Sync + Send + Sized;

    /// Resize the resource to a larger size.
    async fn resize(
        &mut self,
        registry: &Registry,
        request: &Self::Resize,
    ) -> Result<Self::ResizeOutput, SvcError>;
}

/// Resource Retype Operations.
#[async_trait::async_trait]
pub(crate) trait ResourceRetype {
    type Retype: Sync + Send;
    type RetypeOutput: Sync + Send + Sized;

    /// Move the resource to a new volume type, migrating if the current
    /// backend cannot serve the new type in place.
    async fn retype(
        &mut self,
        registry: &Registry,
        request: &Self::Retype,
    ) -> Result<Self::RetypeOutput, SvcError>;
}

/// Resource Attach Operations.
#[async_trait::async_trait]
pub(crate) trait ResourceAttach {
    type Reserve: Sync + Send;
    type Attach: Sync + Send;
    type Detach: Sync + Send;

    /// Reserve the resource for an upcoming attach.
    async fn reserve(
        &mut self,
        registry: &Registry,
        request: &Self::Reserve,
    ) -> Result<(), SvcError>;
    /// Complete an attach on a previously reserved resource.
    async fn attach(
        &mut self,
        registry: &Registry,
        request: &Self::Attach,
    ) -> Result<(), SvcError>;
    /// Detach the resource.
    async fn detach(
        &mut self,
        registry: &Registry,
        request: &Self::Detach,
    ) -> Result<(), SvcError>;
}

/// Resource Membership Operations.
#[async_trait::async_trait]
pub(crate) trait ResourceMembership {
    type Update: Sync + Send;
    type UpdateOutput: Sync + Send + Sized;

    /// Update the member list of the resource.
    async fn update(
        &mut self,
        registry: &Registry,
        request: &Self::Update,
    ) -> Result<Self::UpdateOutput, SvcError>;
}
