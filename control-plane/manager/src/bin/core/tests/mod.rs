//! End to end exercises of the lifecycle operations against the in-memory
//! store and the fake backend driver.

mod group;
mod snapshot;
mod volume;

use crate::controller::{
    backend::fake::FakeBackend,
    image::FakeImages,
    keys::FakeKeys,
    notify::CollectingNotifier,
    quota::MemQuotas,
    registry::{BackendState, CoreConfig, Registry},
};

use vol_port::types::v0::{
    store::mem::MemStore,
    transport::{BackendHost, CreateVolume, ProjectId, VolumeId},
};

use std::sync::Arc;

/// A self-contained manager instance wired to fakes.
pub(crate) struct TestCluster {
    pub(crate) registry: Registry,
    pub(crate) backend: Arc<FakeBackend>,
    pub(crate) notifier: Arc<CollectingNotifier>,
    pub(crate) quotas: Arc<MemQuotas>,
    pub(crate) images: Arc<FakeImages>,
}

impl TestCluster {
    pub(crate) async fn new() -> Self {
        Self::with_config(CoreConfig::default()).await
    }

    pub(crate) async fn with_config(config: CoreConfig) -> Self {
        let backend = Arc::new(FakeBackend::new());
        let notifier = Arc::new(CollectingNotifier::default());
        let quotas = Arc::new(MemQuotas::default());
        let images = Arc::new(FakeImages::default());
        let registry = Registry::new(
            MemStore::new(),
            quotas.clone(),
            notifier.clone(),
            backend.clone(),
            images.clone(),
            Arc::new(FakeKeys {}),
            config,
        );
        registry.add_backend(Self::pool_a(), BackendState::new("nova".into(), 1024));
        registry.init().await;
        Self {
            registry,
            backend,
            notifier,
            quotas,
            images,
        }
    }

    pub(crate) fn pool_a() -> BackendHost {
        BackendHost::from("localhost@fake#pool-a")
    }

    pub(crate) fn pool_b() -> BackendHost {
        BackendHost::from("localhost@fake#pool-b")
    }

    pub(crate) fn add_pool_b(&self) {
        self.registry
            .add_backend(Self::pool_b(), BackendState::new("nova".into(), 2048));
    }

    pub(crate) fn project() -> ProjectId {
        ProjectId::from("project-1")
    }

    pub(crate) fn volumes(&self) -> crate::volume::service::Service {
        crate::volume::service::Service::new(self.registry.clone())
    }

    pub(crate) fn snapshots(&self) -> crate::snapshot::service::Service {
        crate::snapshot::service::Service::new(self.registry.clone())
    }

    pub(crate) fn groups(&self) -> crate::group::service::Service {
        crate::group::service::Service::new(self.registry.clone())
    }
}

/// A plain create volume request of the given size.
pub(crate) fn volume_request(size: u64) -> CreateVolume {
    CreateVolume {
        uuid: VolumeId::new(),
        project_id: TestCluster::project(),
        user_id: "user-1".into(),
        name: "vol-1".to_string(),
        size,
        ..Default::default()
    }
}
