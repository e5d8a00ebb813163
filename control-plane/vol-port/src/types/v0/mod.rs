/// Types which get persisted in the store.
pub mod store;
/// Types which are passed between components.
pub mod transport;
