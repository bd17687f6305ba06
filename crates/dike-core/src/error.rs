//! Error types for Dike core operations.
//!
//! This module defines the error types used throughout the `dike-core` crate.

use thiserror::Error;

use crate::field::ErrorList;

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Dike core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Policy document could not be decoded.
    #[error("Failed to parse policy: {reason}")]
    PolicyParseError {
        /// Reason for the parse failure.
        reason: String,
    },

    /// Policy failed structural validation.
    #[error("Policy validation failed: {0}")]
    PolicyValidationError(ErrorList),

    /// Admission request could not be decoded.
    #[error("Invalid admission request: {reason}")]
    InvalidRequest {
        /// Reason the request is invalid.
        reason: String,
    },

    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// YAML deserialization error.
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

impl From<ErrorList> for Error {
    fn from(errors: ErrorList) -> Self {
        Self::PolicyValidationError(errors)
    }
}
