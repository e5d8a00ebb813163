//! Placement of new resources onto backend pools: filter out unsuitable
//! candidates, then weigh the survivors by free capacity.

use super::registry::{BackendState, Registry};

use manager::errors::SvcError;
use vol_port::types::v0::transport::{AvailabilityZone, BackendHost, VolumeType};

use itertools::Itertools;

/// What the requested resource needs from a backend.
#[derive(Debug, Clone)]
pub(crate) struct RequestSpec {
    /// Requested size in GiB.
    pub(crate) size: u64,
    /// The volume type the backend must serve, if any.
    pub(crate) volume_type: Option<VolumeType>,
    /// The availability zone the backend must be in.
    pub(crate) availability_zone: AvailabilityZone,
}

/// Constraints accumulated across scheduling attempts.
#[derive(Debug, Clone, Default)]
pub(crate) struct FilterProperties {
    /// Backends which already failed this request.
    pub(crate) excluded: Vec<BackendHost>,
}

impl FilterProperties {
    /// Exclude a backend from further attempts.
    pub(crate) fn exclude(&mut self, host: BackendHost) {
        self.excluded.push(host);
    }
}

fn suitable(state: &BackendState, request: &RequestSpec) -> bool {
    !state.frozen
        && state.availability_zone == request.availability_zone
        && state.supports_type(&request.volume_type)
        && state.free_gb() >= request.size
}

/// Choose the backend pool with the most free capacity among those which pass
/// every filter.
pub(crate) fn schedule_create_volume(
    registry: &Registry,
    request: &RequestSpec,
    filters: &FilterProperties,
) -> Result<BackendHost, SvcError> {
    registry
        .backends()
        .into_iter()
        .filter(|(host, _)| !filters.excluded.contains(host))
        .filter(|(_, state)| suitable(state, request))
        .sorted_by_key(|(_, state)| std::cmp::Reverse(state.free_gb()))
        .map(|(host, _)| host)
        .next()
        .ok_or(SvcError::NoBackendsAvailable {})
}

/// Choose the backend pool for a group: it must serve every volume type the
/// group admits.
pub(crate) fn schedule_create_group(
    registry: &Registry,
    availability_zone: &AvailabilityZone,
    volume_types: &[VolumeType],
) -> Result<BackendHost, SvcError> {
    registry
        .backends()
        .into_iter()
        .filter(|(_, state)| !state.frozen && &state.availability_zone == availability_zone)
        .filter(|(_, state)| {
            volume_types
                .iter()
                .all(|vt| state.supports_type(&Some(vt.clone())))
        })
        .sorted_by_key(|(_, state)| std::cmp::Reverse(state.free_gb()))
        .map(|(host, _)| host)
        .next()
        .ok_or(SvcError::NoBackendsAvailable {})
}

/// The zones of the registered backends which are not frozen, sorted by name.
pub(crate) fn enabled_zones(registry: &Registry) -> Vec<AvailabilityZone> {
    registry
        .backends()
        .into_iter()
        .filter(|(_, state)| !state.frozen)
        .map(|(_, state)| state.availability_zone)
        .unique()
        .sorted_by(|a, b| a.as_str().cmp(b.as_str()))
        .collect()
}
