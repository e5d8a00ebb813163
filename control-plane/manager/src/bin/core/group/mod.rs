/// The group operations.
pub(crate) mod operations;
/// The group service exposed to callers.
pub(crate) mod service;
/// The group snapshot operations.
pub(crate) mod snapshot_operations;
/// Group spec lookups, helpers and source pairing.
pub(crate) mod specs;
