/// The snapshot operations.
pub(crate) mod operations;
/// The snapshot service exposed to callers.
pub(crate) mod service;
/// Snapshot spec lookups and helpers.
pub(crate) mod specs;
