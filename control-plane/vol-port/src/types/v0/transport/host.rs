use crate::impl_string_id;
use serde::{Deserialize, Serialize};

impl_string_id!(AvailabilityZone, "Name of an availability zone");
impl_string_id!(VolumeTypeName, "Name of a volume type");

/// Location of a backend pool, formatted as `host@backend#pool`.
///
/// The three components form a hierarchy: a manager host runs one or more
/// backends, and each backend exposes one or more pools. Placement decisions
/// are pool-qualified; ownership checks compare only the host component.
#[derive(Serialize, Deserialize, Debug, Clone, Default, Eq, PartialEq, Hash)]
#[serde(transparent)]
pub struct BackendHost(String);

impl BackendHost {
    /// Build a `BackendHost` from its three components.
    pub fn new(host: &str, backend: &str, pool: &str) -> Self {
        Self(format!("{host}@{backend}#{pool}"))
    }
    /// The host component, eg `host1` for `host1@lvm#pool-a`.
    pub fn host(&self) -> &str {
        self.0.split('@').next().unwrap_or(&self.0)
    }
    /// The host and backend components, eg `host1@lvm` for `host1@lvm#pool-a`.
    pub fn backend(&self) -> &str {
        self.0.split('#').next().unwrap_or(&self.0)
    }
    /// The pool component, if pool-qualified.
    pub fn pool(&self) -> Option<&str> {
        self.0.split_once('#').map(|(_, pool)| pool)
    }
    /// The full `host@backend#pool` string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BackendHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BackendHost {
    fn from(host: &str) -> Self {
        Self(host.to_string())
    }
}
impl From<String> for BackendHost {
    fn from(host: String) -> Self {
        Self(host)
    }
}
