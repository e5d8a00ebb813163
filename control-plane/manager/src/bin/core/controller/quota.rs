//! Quota reservations: every mutating operation reserves its deltas first and
//! must reach exactly one of commit/rollback, on every exit path. The
//! `QuotaReservation` guard enforces the pairing.

use super::registry::Registry;

use manager::errors::SvcError;
use vol_port::types::v0::transport::{ProjectId, VolumeType};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};

/// Opaque token identifying one reservation.
pub(crate) type ReservationToken = String;

/// Named usage deltas, eg `volumes: 1, gigabytes: 10`.
pub(crate) type QuotaDeltas = HashMap<String, i64>;

/// The deltas charged for a volume, in the total buckets and the
/// per-volume-type buckets.
pub(crate) fn volume_deltas(count: i64, gigabytes: i64, volume_type: &Option<VolumeType>) -> QuotaDeltas {
    let mut deltas = QuotaDeltas::new();
    deltas.insert("volumes".to_string(), count);
    deltas.insert("gigabytes".to_string(), gigabytes);
    if let Some(volume_type) = volume_type {
        deltas.insert(format!("volumes_{}", volume_type.name), count);
        deltas.insert(format!("gigabytes_{}", volume_type.name), gigabytes);
    }
    deltas
}

/// The deltas charged for a snapshot.
pub(crate) fn snapshot_deltas(count: i64, gigabytes: i64, volume_type: &Option<VolumeType>) -> QuotaDeltas {
    let mut deltas = QuotaDeltas::new();
    deltas.insert("snapshots".to_string(), count);
    deltas.insert("gigabytes".to_string(), gigabytes);
    if let Some(volume_type) = volume_type {
        deltas.insert(format!("snapshots_{}", volume_type.name), count);
        deltas.insert(format!("gigabytes_{}", volume_type.name), gigabytes);
    }
    deltas
}

/// Per-project resource usage accounting.
#[async_trait]
pub(crate) trait QuotaService: Send + Sync {
    /// Reserve the deltas against the project's limits.
    async fn reserve(
        &self,
        project_id: &ProjectId,
        deltas: &QuotaDeltas,
    ) -> Result<Vec<ReservationToken>, SvcError>;
    /// Apply a previous reservation to the project's usage.
    async fn commit(&self, project_id: &ProjectId, tokens: Vec<ReservationToken>);
    /// Discard a previous reservation.
    async fn rollback(&self, project_id: &ProjectId, tokens: Vec<ReservationToken>);
}

#[derive(Debug, Default)]
struct MemQuotasInner {
    /// Limits per project and resource name; absent means unlimited.
    limits: HashMap<(ProjectId, String), i64>,
    /// Committed usage per project and resource name.
    usage: HashMap<(ProjectId, String), i64>,
    /// In-flight reservations by token.
    reservations: HashMap<ReservationToken, (ProjectId, QuotaDeltas)>,
}

impl MemQuotasInner {
    fn reserved(&self, project_id: &ProjectId, resource: &str) -> i64 {
        self.reservations
            .values()
            .filter(|(project, _)| project == project_id)
            .filter_map(|(_, deltas)| deltas.get(resource))
            .sum()
    }
}

/// In-memory quota service.
#[derive(Debug, Default)]
pub(crate) struct MemQuotas {
    inner: Mutex<MemQuotasInner>,
}

impl MemQuotas {
    /// Set the limit of a resource for a project.
    pub(crate) fn set_limit(&self, project_id: &ProjectId, resource: &str, limit: i64) {
        self.inner
            .lock()
            .limits
            .insert((project_id.clone(), resource.to_string()), limit);
    }
    /// The committed usage of a resource for a project.
    pub(crate) fn usage(&self, project_id: &ProjectId, resource: &str) -> i64 {
        self.inner
            .lock()
            .usage
            .get(&(project_id.clone(), resource.to_string()))
            .copied()
            .unwrap_or(0)
    }
    /// The number of in-flight reservations, all projects included.
    pub(crate) fn in_flight(&self) -> usize {
        self.inner.lock().reservations.len()
    }
}

#[async_trait]
impl QuotaService for MemQuotas {
    async fn reserve(
        &self,
        project_id: &ProjectId,
        deltas: &QuotaDeltas,
    ) -> Result<Vec<ReservationToken>, SvcError> {
        let mut inner = self.inner.lock();
        for (resource, delta) in deltas {
            if *delta <= 0 {
                continue;
            }
            let key = (project_id.clone(), resource.clone());
            if let Some(limit) = inner.limits.get(&key).copied() {
                let used = inner.usage.get(&key).copied().unwrap_or(0);
                let reserved = inner.reserved(project_id, resource);
                if used + reserved + delta > limit {
                    return Err(SvcError::QuotaExceeded {
                        project_id: project_id.to_string(),
                        resource: resource.clone(),
                    });
                }
            }
        }
        let token = uuid::Uuid::new_v4().to_string();
        inner
            .reservations
            .insert(token.clone(), (project_id.clone(), deltas.clone()));
        Ok(vec![token])
    }

    async fn commit(&self, project_id: &ProjectId, tokens: Vec<ReservationToken>) {
        let mut inner = self.inner.lock();
        for token in tokens {
            if let Some((_, deltas)) = inner.reservations.remove(&token) {
                for (resource, delta) in deltas {
                    *inner
                        .usage
                        .entry((project_id.clone(), resource))
                        .or_insert(0) += delta;
                }
            }
        }
    }

    async fn rollback(&self, project_id: &ProjectId, tokens: Vec<ReservationToken>) {
        let mut inner = self.inner.lock();
        for token in tokens {
            if inner.reservations.remove(&token).is_none() {
                tracing::warn!(
                    project.id = %project_id,
                    "rollback of an unknown quota reservation"
                );
            }
        }
    }
}

/// Scoped quota reservation: exactly one of `commit`/`rollback` consumes it.
/// Dropping an unconsumed reservation rolls it back.
pub(crate) struct QuotaReservation {
    project_id: ProjectId,
    tokens: Vec<ReservationToken>,
    quotas: Arc<dyn QuotaService>,
}

impl QuotaReservation {
    /// Reserve the deltas for the project, returning the scoped guard.
    pub(crate) async fn reserve(
        registry: &Registry,
        project_id: &ProjectId,
        deltas: &QuotaDeltas,
    ) -> Result<Self, SvcError> {
        let quotas = registry.quotas().clone();
        let tokens = quotas.reserve(project_id, deltas).await?;
        Ok(Self {
            project_id: project_id.clone(),
            tokens,
            quotas,
        })
    }

    /// Apply the reservation to the project's usage.
    pub(crate) async fn commit(mut self) {
        let tokens = std::mem::take(&mut self.tokens);
        self.quotas.commit(&self.project_id, tokens).await;
    }

    /// Discard the reservation.
    pub(crate) async fn rollback(mut self) {
        let tokens = std::mem::take(&mut self.tokens);
        self.quotas.rollback(&self.project_id, tokens).await;
    }
}

impl Drop for QuotaReservation {
    fn drop(&mut self) {
        if self.tokens.is_empty() {
            return;
        }
        let tokens = std::mem::take(&mut self.tokens);
        let project_id = self.project_id.clone();
        let quotas = self.quotas.clone();
        tokio::spawn(async move {
            tracing::warn!(project.id = %project_id, "unpaired quota reservation, rolling back");
            quotas.rollback(&project_id, tokens).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reserve_commit_rollback() {
        let quotas = MemQuotas::default();
        let project = ProjectId::from("p1");
        quotas.set_limit(&project, "gigabytes", 10);

        let deltas = volume_deltas(1, 8, &None);
        let tokens = quotas.reserve(&project, &deltas).await.unwrap();
        // a second reservation beyond the limit fails while the first is held
        assert!(matches!(
            quotas.reserve(&project, &volume_deltas(1, 8, &None)).await,
            Err(SvcError::QuotaExceeded { .. })
        ));
        quotas.commit(&project, tokens).await;
        assert_eq!(quotas.usage(&project, "gigabytes"), 8);
        assert_eq!(quotas.usage(&project, "volumes"), 1);

        let tokens = quotas.reserve(&project, &volume_deltas(1, 2, &None)).await.unwrap();
        quotas.rollback(&project, tokens).await;
        assert_eq!(quotas.usage(&project, "gigabytes"), 8);
        assert_eq!(quotas.in_flight(), 0);
    }

    #[tokio::test]
    async fn negative_deltas_always_reserve() {
        let quotas = MemQuotas::default();
        let project = ProjectId::from("p1");
        quotas.set_limit(&project, "gigabytes", 1);

        let tokens = quotas.reserve(&project, &volume_deltas(-1, -8, &None)).await.unwrap();
        quotas.commit(&project, tokens).await;
        assert_eq!(quotas.usage(&project, "gigabytes"), -8);
    }

    #[tokio::test]
    async fn type_qualified_buckets() {
        let vt = Some(VolumeType::named("fast"));
        let deltas = snapshot_deltas(1, 5, &vt);
        assert_eq!(deltas["snapshots"], 1);
        assert_eq!(deltas["snapshots_fast"], 1);
        assert_eq!(deltas["gigabytes_fast"], 5);
    }
}
