/// The create-volume task pipeline stages.
pub(crate) mod flow;
/// The volume operations.
pub(crate) mod operations;
/// The volume service exposed to callers.
pub(crate) mod service;
/// Volume spec lookups and helpers.
pub(crate) mod specs;
