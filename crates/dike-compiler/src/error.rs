//! Error types for the Dike compiler.

use dike_cel::EnvError;
use dike_core::ErrorList;
use thiserror::Error;

/// Result type alias for compiler operations.
pub type Result<T> = std::result::Result<T, CompilerError>;

/// Errors that can occur while compiling a policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompilerError {
    /// A policy environment could not be assembled.
    ///
    /// This indicates broken library wiring and is not specific to any policy.
    #[error("failed to build policy environment: {0}")]
    Environment(#[from] EnvError),

    /// The policy failed structural validation or expression compilation.
    #[error("policy {name} is invalid: {errors}")]
    Invalid {
        /// Name of the rejected policy.
        name: String,
        /// Field-indexed diagnostics.
        errors: ErrorList,
    },
}

impl CompilerError {
    /// Returns the field errors of an [`CompilerError::Invalid`] error.
    #[must_use]
    pub const fn field_errors(&self) -> Option<&ErrorList> {
        match self {
            Self::Invalid { errors, .. } => Some(errors),
            Self::Environment(_) => None,
        }
    }
}
