//! Error types for expression compilation and evaluation.

use std::fmt;

use dike_core::ContextError;
use thiserror::Error;

/// Result type alias for evaluation.
pub type Result<T> = std::result::Result<T, EvalError>;

/// Errors raised while evaluating a program.
///
/// Evaluation errors are values: they are cloned into memoized variable
/// slots and replayed on every access, so every variant owns its data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// A map or object has no entry for the selected key.
    #[error("no such key: {0}")]
    NoSuchKey(String),

    /// A name could not be resolved in the activation.
    #[error("no such attribute: {0}")]
    NoSuchAttribute(String),

    /// No overload accepts the runtime argument types.
    #[error("found no matching overload for '{function}' applied to '({args})'")]
    NoMatchingOverload {
        /// Function or operator name.
        function: String,
        /// Comma separated runtime argument types.
        args: String,
    },

    /// A list index is outside the list bounds.
    #[error("index out of range: {0}")]
    IndexOutOfRange(i64),

    /// Integer division by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// Integer modulus by zero.
    #[error("modulus by zero")]
    ModulusByZero,

    /// Integer arithmetic overflowed.
    #[error("{0} overflow")]
    Overflow(&'static str),

    /// A value could not be converted to the requested type.
    #[error("type conversion error from '{from}' to '{to}'")]
    Conversion {
        /// Source type.
        from: String,
        /// Requested type.
        to: String,
    },

    /// A native binding rejected one of its arguments.
    #[error("invalid arg {index}: {message}")]
    InvalidArgument {
        /// Zero-based argument index, receiver included.
        index: usize,
        /// Why the argument was rejected.
        message: String,
    },

    /// A native binding failed.
    #[error("{function}: {message}")]
    Function {
        /// Function name.
        function: String,
        /// Failure description.
        message: String,
    },

    /// The injected context failed a lookup.
    #[error(transparent)]
    Context(ContextError),

    /// The caller cancelled evaluation.
    #[error("evaluation cancelled")]
    Cancelled,

    /// The evaluation deadline passed.
    #[error("evaluation deadline exceeded")]
    DeadlineExceeded,
}

impl From<ContextError> for EvalError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => Self::Cancelled,
            ContextError::DeadlineExceeded => Self::DeadlineExceeded,
            other => Self::Context(other),
        }
    }
}

impl EvalError {
    /// Creates a [`EvalError::Function`] error.
    pub fn function(function: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Function {
            function: function.into(),
            message: message.to_string(),
        }
    }

    /// Creates a [`EvalError::Conversion`] error.
    pub fn conversion(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::Conversion {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Creates a [`EvalError::InvalidArgument`] error.
    pub fn invalid_argument(index: usize, message: impl fmt::Display) -> Self {
        Self::InvalidArgument {
            index,
            message: message.to_string(),
        }
    }
}

/// Errors raised while assembling an environment.
///
/// These indicate broken library wiring rather than a bad policy, and are
/// fatal at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvError {
    /// Two overloads share an identifier but differ in signature.
    #[error("overload '{id}' declared more than once with different signatures")]
    DuplicateOverload {
        /// Overload identifier.
        id: String,
    },

    /// Two overloads of a function have the same signature.
    #[error("overload '{id}' of '{function}' collides with overload '{existing}'")]
    OverloadCollision {
        /// Function name.
        function: String,
        /// New overload identifier.
        id: String,
        /// Existing overload identifier.
        existing: String,
    },

    /// A variable was redeclared with a different type.
    #[error("variable '{name}' redeclared as '{declared}', previously '{existing}'")]
    VariableConflict {
        /// Variable name.
        name: String,
        /// Previously declared type.
        existing: String,
        /// Newly declared type.
        declared: String,
    },

    /// A type was redeclared with different fields.
    #[error("type '{name}' redeclared with a different shape")]
    TypeConflict {
        /// Type name.
        name: String,
    },

    /// A declaration references a type that was never declared.
    #[error("unknown type '{name}' referenced by {referrer}")]
    UnknownType {
        /// Missing type name.
        name: String,
        /// Declaration that referenced it.
        referrer: String,
    },
}

/// A single compile diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    /// Diagnostic message.
    pub message: String,
    /// One-based line number.
    pub line: usize,
    /// One-based column number, in characters.
    pub column: usize,
}

/// The diagnostics produced by a failed compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issues {
    source: String,
    issues: Vec<Issue>,
}

impl Issues {
    pub(crate) fn new(source: &str, errors: Vec<(usize, String)>) -> Self {
        let issues = errors
            .into_iter()
            .map(|(offset, message)| {
                let (line, column) = position(source, offset);
                Issue {
                    message,
                    line,
                    column,
                }
            })
            .collect();
        Self {
            source: source.to_string(),
            issues,
        }
    }

    /// Returns the individual diagnostics.
    #[must_use]
    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    /// Returns the first diagnostic message, if any.
    #[must_use]
    pub fn first_message(&self) -> Option<&str> {
        self.issues.first().map(|i| i.message.as_str())
    }
}

impl fmt::Display for Issues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, issue) in self.issues.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(
                f,
                "ERROR: <input>:{}:{}: {}",
                issue.line, issue.column, issue.message
            )?;
            if let Some(text) = self.source.lines().nth(issue.line - 1) {
                write!(f, "\n | {text}\n | {}^", ".".repeat(issue.column - 1))?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for Issues {}

/// Converts a byte offset into a one-based line and character column.
fn position(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = source.get(..offset).unwrap_or(source);
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    let column = before[line_start..].chars().count() + 1;
    (line, column)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_interruptions_stop_evaluation() {
        assert_eq!(EvalError::from(ContextError::Cancelled), EvalError::Cancelled);
        assert_eq!(EvalError::from(ContextError::DeadlineExceeded), EvalError::DeadlineExceeded);
        assert!(matches!(
            EvalError::from(ContextError::Backend("down".to_string())),
            EvalError::Context(ContextError::Backend(_))
        ));
    }

    #[test]
    fn test_no_matching_overload_display() {
        let err = EvalError::NoMatchingOverload {
            function: "_+_".to_string(),
            args: "int, string".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "found no matching overload for '_+_' applied to '(int, string)'"
        );
    }

    #[test]
    fn test_invalid_argument_display() {
        let err = EvalError::invalid_argument(1, EvalError::conversion("bool", "string"));
        assert_eq!(
            err.to_string(),
            "invalid arg 1: type conversion error from 'bool' to 'string'"
        );
    }

    #[test]
    fn test_function_error_display() {
        let err = EvalError::function("http.Get", "connection refused");
        assert_eq!(err.to_string(), "http.Get: connection refused");
    }

    #[test]
    fn test_issue_positions() {
        let issues = Issues::new("a &&\n  b + ", vec![(7, "undeclared reference to 'b'".to_string())]);
        let issue = &issues.issues()[0];
        assert_eq!(issue.line, 2);
        assert_eq!(issue.column, 3);
    }

    #[test]
    fn test_issues_display_has_caret() {
        let issues = Issues::new("foo == 1", vec![(0, "undeclared reference to 'foo'".to_string())]);
        assert_eq!(
            issues.to_string(),
            "ERROR: <input>:1:1: undeclared reference to 'foo'\n | foo == 1\n | ^"
        );
        assert_eq!(issues.first_message(), Some("undeclared reference to 'foo'"));
    }

    #[test]
    fn test_env_error_display() {
        let err = EnvError::UnknownType {
            name: "image.Image".to_string(),
            referrer: "function 'image'".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unknown type 'image.Image' referenced by function 'image'"
        );
    }
}
