//! Registry containing all manager specs and the injected collaborators.

use super::{
    backend::BackendDriver,
    image::ImageService,
    keys::KeyManager,
    notify::Notifier,
    quota::QuotaService,
    resources::operations_helper::ResourceSpecsLocked,
};

use manager::errors::SvcError;
use vol_port::types::v0::{
    store::{
        definitions::{StorableObject, Store},
        mem::MemStore,
    },
    transport::{AvailabilityZone, BackendHost, VolumeType},
};

use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc, time::Duration};

/// Core configuration of a manager instance.
#[derive(Debug, Clone)]
pub(crate) struct CoreConfig {
    /// The host this manager instance runs on; used for ownership checks.
    pub(crate) host: String,
    /// Assigned when neither the request nor its source names a zone.
    pub(crate) default_availability_zone: AvailabilityZone,
    /// The maximum number of concurrent create volume requests.
    pub(crate) create_volume_limit: usize,
    /// How many times a failed create may be rescheduled onto another backend.
    pub(crate) schedule_retries: u32,
    /// The period at which an asynchronous backend migration is polled.
    pub(crate) poll_period: Duration,
    /// The maximum number of migration poll attempts.
    pub(crate) poll_attempts: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            default_availability_zone: "nova".into(),
            create_volume_limit: 10,
            schedule_retries: 3,
            poll_period: Duration::from_millis(10),
            poll_attempts: 10,
        }
    }
}

/// Per-backend mutable state tracked by this manager instance.
#[derive(Debug, Clone)]
pub(crate) struct BackendState {
    /// The availability zone the backend serves.
    pub(crate) availability_zone: AvailabilityZone,
    /// Total capacity in GiB.
    pub(crate) capacity_gb: u64,
    /// Capacity allocated to live volumes, in GiB.
    pub(crate) allocated_gb: u64,
    /// Administratively paused; all group operations fail fast.
    pub(crate) frozen: bool,
    /// The volume types this backend can serve; empty means any.
    pub(crate) supported_types: Vec<VolumeType>,
}

impl BackendState {
    /// A live backend with the given zone and capacity.
    pub(crate) fn new(availability_zone: AvailabilityZone, capacity_gb: u64) -> Self {
        Self {
            availability_zone,
            capacity_gb,
            allocated_gb: 0,
            frozen: false,
            supported_types: vec![],
        }
    }
    /// Restrict the backend to the given volume types.
    pub(crate) fn with_types(mut self, types: Vec<VolumeType>) -> Self {
        self.supported_types = types;
        self
    }
    /// The unallocated capacity in GiB.
    pub(crate) fn free_gb(&self) -> u64 {
        self.capacity_gb.saturating_sub(self.allocated_gb)
    }
    /// Whether the backend can serve volumes of the given type.
    pub(crate) fn supports_type(&self, volume_type: &Option<VolumeType>) -> bool {
        match volume_type {
            None => true,
            Some(vt) => {
                self.supported_types.is_empty()
                    || self.supported_types.iter().any(|t| t.name == vt.name)
            }
        }
    }
}

/// Registry containing all manager specs and the injected collaborators.
#[derive(Clone)]
pub(crate) struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    specs: ResourceSpecsLocked,
    store: tokio::sync::Mutex<MemStore>,
    quotas: Arc<dyn QuotaService>,
    notifier: Arc<dyn Notifier>,
    backend: Arc<dyn BackendDriver>,
    images: Arc<dyn ImageService>,
    keys: Arc<dyn KeyManager>,
    backends: RwLock<HashMap<BackendHost, BackendState>>,
    config: CoreConfig,
    create_volume_limiter: Arc<tokio::sync::Semaphore>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.inner.config)
            .field("backends", &*self.inner.backends.read())
            .finish()
    }
}

impl Registry {
    /// Create a registry with the given collaborators.
    pub(crate) fn new(
        store: MemStore,
        quotas: Arc<dyn QuotaService>,
        notifier: Arc<dyn Notifier>,
        backend: Arc<dyn BackendDriver>,
        images: Arc<dyn ImageService>,
        keys: Arc<dyn KeyManager>,
        config: CoreConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                specs: ResourceSpecsLocked::new(),
                store: tokio::sync::Mutex::new(store),
                quotas,
                notifier,
                backend,
                images,
                keys,
                backends: RwLock::new(HashMap::new()),
                create_volume_limiter: Arc::new(tokio::sync::Semaphore::new(
                    config.create_volume_limit,
                )),
                config,
            }),
        }
    }

    /// Load all specs from the persistent store.
    pub(crate) async fn init(&self) {
        let mut store = self.inner.store.lock().await;
        self.inner.specs.init(&mut *store).await;
    }

    /// The locked specs of all resources.
    pub(crate) fn specs(&self) -> &ResourceSpecsLocked {
        &self.inner.specs
    }

    /// The quota reservation service.
    pub(crate) fn quotas(&self) -> &Arc<dyn QuotaService> {
        &self.inner.quotas
    }

    /// The lifecycle notifier.
    pub(crate) fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.inner.notifier
    }

    /// The backend driver.
    pub(crate) fn backend(&self) -> &Arc<dyn BackendDriver> {
        &self.inner.backend
    }

    /// The image service.
    pub(crate) fn images(&self) -> &Arc<dyn ImageService> {
        &self.inner.images
    }

    /// The encryption key manager.
    pub(crate) fn keys(&self) -> &Arc<dyn KeyManager> {
        &self.inner.keys
    }

    /// The core configuration.
    pub(crate) fn config(&self) -> &CoreConfig {
        &self.inner.config
    }

    /// Serialize and persist an object to the store.
    pub(crate) async fn store_obj<O: StorableObject>(&self, object: &O) -> Result<(), SvcError> {
        let mut store = self.inner.store.lock().await;
        store.put_obj(object).await.map_err(SvcError::from)
    }

    /// Delete the entry with the given key from the store.
    pub(crate) async fn delete_kv(&self, key: &str) -> Result<(), SvcError> {
        let mut store = self.inner.store.lock().await;
        store.delete_kv(&key).await.map_err(SvcError::from)
    }

    /// Register a backend pool with this manager instance.
    pub(crate) fn add_backend(&self, host: BackendHost, state: BackendState) {
        self.inner.backends.write().insert(host, state);
    }

    /// The state of the given backend pool, if registered.
    pub(crate) fn backend_state(&self, host: &BackendHost) -> Option<BackendState> {
        self.inner.backends.read().get(host).cloned()
    }

    /// All registered backend pools and their state.
    pub(crate) fn backends(&self) -> Vec<(BackendHost, BackendState)> {
        self.inner
            .backends
            .read()
            .iter()
            .map(|(host, state)| (host.clone(), state.clone()))
            .collect()
    }

    /// Freeze or thaw a backend pool.
    pub(crate) fn set_frozen(&self, host: &BackendHost, frozen: bool) {
        if let Some(state) = self.inner.backends.write().get_mut(host) {
            state.frozen = frozen;
        }
    }

    /// Fail fast when the given backend is administratively frozen.
    pub(crate) fn ensure_not_frozen(&self, host: &BackendHost) -> Result<(), SvcError> {
        match self.backend_state(host) {
            Some(state) if state.frozen => Err(SvcError::FrozenBackend {
                host: host.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Account capacity allocated to a live volume on the given backend.
    pub(crate) fn allocate_capacity(&self, host: &BackendHost, size: u64) {
        if let Some(state) = self.inner.backends.write().get_mut(host) {
            state.allocated_gb = state.allocated_gb.saturating_add(size);
        }
    }

    /// Release capacity previously allocated on the given backend.
    pub(crate) fn release_capacity(&self, host: &BackendHost, size: u64) {
        if let Some(state) = self.inner.backends.write().get_mut(host) {
            state.allocated_gb = state.allocated_gb.saturating_sub(size);
        }
    }

    /// Take a slot from the bounded create-volume concurrency budget.
    pub(crate) async fn create_volume_permit(
        &self,
    ) -> Result<tokio::sync::OwnedSemaphorePermit, SvcError> {
        self.inner
            .create_volume_limiter
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SvcError::Conflict {})
    }
}
