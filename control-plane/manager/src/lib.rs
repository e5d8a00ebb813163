//! Library part of the manager: the error types shared by the binaries.

/// Errors returned by the manager services.
pub mod errors;
