//! Shared types for the control-plane: persistent store objects, transport
//! (request/response) types and the operation sequencing machinery used by
//! the manager to serialize mutations per resource.

/// Common error chaining helpers and resource kinds.
pub mod transport_api;
/// Common types for the various resources used by the control-plane internal components.
pub mod types;
