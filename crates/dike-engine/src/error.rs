//! Error types for the engine crate.
//!
//! This module defines the errors that can occur while installing and
//! evaluating policies.

use std::fmt;

use dike_cel::EvalError;
use dike_compiler::CompilerError;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// A match condition that failed to evaluate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionError {
    /// Name of the condition.
    pub name: String,
    /// The evaluation failure.
    pub error: EvalError,
}

impl fmt::Display for ConditionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to evaluate condition '{}': {}", self.name, self.error)
    }
}

/// The failures of one match-condition list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchError {
    errors: Vec<ConditionError>,
}

impl MatchError {
    pub(crate) const fn new(errors: Vec<ConditionError>) -> Self {
        Self { errors }
    }

    /// The individual condition failures, in evaluation order.
    #[must_use]
    pub fn errors(&self) -> &[ConditionError] {
        &self.errors
    }
}

impl fmt::Display for MatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MatchError {}

/// Errors that can occur in the policy engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A policy failed to compile and was not installed.
    #[error(transparent)]
    Compile(#[from] CompilerError),

    /// Match conditions or exception conditions failed to evaluate.
    #[error("match evaluation failed: {0}")]
    Match(#[from] MatchError),

    /// A validation, image extractor or condition failed to evaluate.
    #[error("{stage}[{index}] evaluation failed: {source}")]
    Evaluation {
        /// Which program list failed, e.g. `validations`.
        stage: &'static str,
        /// Index of the failing program.
        index: usize,
        /// The evaluation failure.
        #[source]
        source: EvalError,
    },

    /// The policy's match constraints could not be applied.
    #[error("failed to execute matching: {0}")]
    Constraints(String),

    /// The input could not be bound for evaluation.
    #[error("invalid input: {reason}")]
    InvalidInput {
        /// Why the input was rejected.
        reason: String,
    },

    /// The policy was used with an evaluator for another kind or mode.
    #[error("policy {name} cannot be evaluated as {expected}")]
    WrongKind {
        /// Policy name.
        name: String,
        /// The evaluation that was attempted.
        expected: &'static str,
    },

    /// A blocking evaluation task panicked or was cancelled.
    #[error("evaluation task failed: {0}")]
    Task(String),
}

impl EngineError {
    pub(crate) const fn evaluation(stage: &'static str, index: usize, source: EvalError) -> Self {
        Self::Evaluation { stage, index, source }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidInput {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_error_display_joins_conditions() {
        let err = MatchError::new(vec![
            ConditionError {
                name: "a".to_string(),
                error: EvalError::DivisionByZero,
            },
            ConditionError {
                name: "b".to_string(),
                error: EvalError::NoSuchKey("team".to_string()),
            },
        ]);
        assert_eq!(
            err.to_string(),
            "failed to evaluate condition 'a': division by zero; failed to evaluate condition 'b': no such key: team"
        );
    }

    #[test]
    fn test_evaluation_error_display() {
        let err = EngineError::evaluation("validations", 2, EvalError::DivisionByZero);
        assert_eq!(err.to_string(), "validations[2] evaluation failed: division by zero");
    }
}
