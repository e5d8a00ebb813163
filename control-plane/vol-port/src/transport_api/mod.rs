//! Cross-component helpers shared by every service of the control-plane.

use serde::{Deserialize, Serialize};

/// All the different resources the control-plane manages.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, strum_macros::Display, Eq, PartialEq)]
pub enum ResourceKind {
    /// Unknown or unspecified resource.
    Unknown,
    /// Volume.
    Volume,
    /// Volume Snapshot.
    Snapshot,
    /// Volume Group.
    Group,
    /// Group Snapshot.
    GroupSnapshot,
    /// Volume Type.
    VolumeType,
    /// Storage Backend.
    Backend,
}

impl Default for ResourceKind {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Report the full error chain, source by source.
pub trait ErrorChain: std::error::Error {
    /// Loops through the error chain and formats into a single string
    /// containing all the lower level errors.
    fn full_string(&self) -> String {
        let mut msg = format!("{self}");
        let mut opt_source = self.source();
        while let Some(source) = opt_source {
            msg = format!("{msg}: {source}");
            opt_source = source.source();
        }
        msg
    }
}

impl<T: std::error::Error> ErrorChain for T {}
