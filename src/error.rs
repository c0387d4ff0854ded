//! Central error type for the dexflow crate.
//!
//! Lattice and propagation operations never fail: malformed user input is
//! reported through [`crate::context::Reporter`] and the operation continues
//! best-effort, while internal invariant violations panic. The error type
//! below covers the fallible *parsing* surfaces only (textual access paths
//! and canonical names).

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DexflowError>;

/// Errors produced by dexflow parsing surfaces.
#[derive(Debug, Error)]
pub enum DexflowError {
    /// A textual access path could not be parsed.
    #[error("invalid access path `{path}`: {message}")]
    InvalidAccessPath {
        /// The offending input.
        path: String,
        /// What went wrong.
        message: String,
    },

    /// A textual access path root could not be parsed.
    #[error("invalid access path root `{0}`")]
    InvalidRoot(String),

    /// A generic invalid-argument error.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl DexflowError {
    /// Build an [`DexflowError::InvalidAccessPath`] from an input and message.
    pub(crate) fn invalid_access_path(
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        DexflowError::InvalidAccessPath {
            path: path.into(),
            message: message.into(),
        }
    }
}
