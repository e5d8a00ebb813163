/// The backend driver capability and its fake implementation.
pub(crate) mod backend;
/// The image service collaborator.
pub(crate) mod image;
/// The encryption key manager collaborator.
pub(crate) mod keys;
/// The lifecycle notification collaborators.
pub(crate) mod notify;
/// Bounded polling of asynchronous backend operations.
pub(crate) mod poller;
/// The quota reservation service and its reservation guard.
pub(crate) mod quota;
/// The registry which contains all the resources.
pub(crate) mod registry;
/// Resource guards and specs.
pub(crate) mod resources;
/// Placement of new resources onto backends.
pub(crate) mod scheduling;
