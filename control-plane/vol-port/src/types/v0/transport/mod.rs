mod group;
mod host;
mod snapshot;
mod volume;

pub use group::*;
pub use host::*;
pub use snapshot::*;
pub use volume::*;

use serde::{Deserialize, Serialize};

/// Implements a plain string identifier newtype.
#[macro_export]
macro_rules! impl_string_id {
    ($Name:ident, $Doc:literal) => {
        #[doc = $Doc]
        #[derive(
            serde::Serialize, serde::Deserialize, Debug, Clone, Default, Eq, PartialEq, Hash,
        )]
        pub struct $Name(String);

        impl std::fmt::Display for $Name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl $Name {
            /// Build Self from any string-like id.
            pub fn from<T: Into<String>>(id: T) -> Self {
                $Name(id.into())
            }
            /// Generates a new random identifier.
            pub fn new() -> Self {
                $Name(uuid::Uuid::new_v4().to_string())
            }
            /// The identifier as a string slice.
            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<&str> for $Name {
            fn from(id: &str) -> Self {
                $Name::from(id)
            }
        }
        impl From<String> for $Name {
            fn from(id: String) -> Self {
                $Name(id)
            }
        }
        impl From<&$Name> for $Name {
            fn from(id: &$Name) -> $Name {
                id.clone()
            }
        }
        impl From<$Name> for String {
            fn from(id: $Name) -> String {
                id.0
            }
        }
    };
}

/// Implements a uuid-backed string identifier newtype.
#[macro_export]
macro_rules! impl_string_uuid {
    ($Name:ident, $Doc:literal) => {
        #[doc = $Doc]
        #[derive(Debug, Clone, Eq, PartialEq, Hash)]
        pub struct $Name(uuid::Uuid, String);

        impl serde::Serialize for $Name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> serde::Deserialize<'de> for $Name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let uuid = uuid::Uuid::deserialize(deserializer)?;
                Ok($Name(uuid, uuid.to_string()))
            }
        }

        impl std::ops::Deref for $Name {
            type Target = uuid::Uuid;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl std::fmt::Display for $Name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.1)
            }
        }

        impl Default for $Name {
            /// Generates a blank (nil uuid) identifier.
            fn default() -> Self {
                let uuid = uuid::Uuid::default();
                $Name(uuid, uuid.to_string())
            }
        }

        impl $Name {
            /// Generates a new random identifier.
            pub fn new() -> Self {
                let uuid = uuid::Uuid::new_v4();
                $Name(uuid, uuid.to_string())
            }
            /// The identifier as a string slice.
            pub fn as_str(&self) -> &str {
                self.1.as_str()
            }
            /// Get a reference to the inner `uuid::Uuid`.
            pub fn uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl From<&$Name> for $Name {
            fn from(id: &$Name) -> $Name {
                id.clone()
            }
        }
        impl From<&uuid::Uuid> for $Name {
            fn from(uuid: &uuid::Uuid) -> $Name {
                $Name(*uuid, uuid.to_string())
            }
        }
        impl From<uuid::Uuid> for $Name {
            fn from(uuid: uuid::Uuid) -> $Name {
                $Name::from(&uuid)
            }
        }
        impl From<$Name> for String {
            fn from(id: $Name) -> String {
                id.1
            }
        }
        impl std::convert::TryFrom<&str> for $Name {
            type Error = uuid::Error;
            fn try_from(value: &str) -> Result<Self, Self::Error> {
                let uuid: uuid::Uuid = std::str::FromStr::from_str(value)?;
                Ok($Name::from(uuid))
            }
        }
    };
}

impl_string_id!(ProjectId, "Identifier of the project (tenant) owning a resource");
impl_string_id!(UserId, "Identifier of the user acting on a resource");
impl_string_uuid!(ImageId, "UUID of a bootable image in the image service");

/// Read mode for soft-deleted records.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq)]
pub enum ReadDeleted {
    /// Only live records (the default).
    No,
    /// Live and soft-deleted records.
    Yes,
    /// Only soft-deleted records (administrative queries).
    Only,
}

impl Default for ReadDeleted {
    fn default() -> Self {
        Self::No
    }
}
