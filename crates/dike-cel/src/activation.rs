//! Evaluation-time name bindings and cancellation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dike_core::Cancellation;
use tokio_util::sync::CancellationToken;

use crate::error::EvalError;
use crate::value::Value;

/// Cancellation and deadline state shared by one evaluation.
///
/// Long-running operations (comprehensions, HTTP calls, context lookups)
/// call [`EvalContext::check`] and abort as soon as the caller cancels or
/// the deadline passes. Context lookups also receive the underlying
/// [`Cancellation`] so blocking backends can stop early.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    cancellation: Cancellation,
}

impl EvalContext {
    /// Creates a context that is never cancelled and has no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses the given cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = self.cancellation.with_token(token);
        self
    }

    /// Sets an absolute deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.cancellation = self.cancellation.with_deadline(deadline);
        self
    }

    /// Sets a deadline relative to now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Returns an error if evaluation should stop.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::Cancelled`] or [`EvalError::DeadlineExceeded`].
    pub fn check(&self) -> Result<(), EvalError> {
        self.cancellation.check().map_err(EvalError::from)
    }

    /// Time left before the deadline, if one is set.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.cancellation.remaining()
    }

    /// Returns the cancellation token.
    #[must_use]
    pub const fn cancellation_token(&self) -> &CancellationToken {
        self.cancellation.token()
    }

    /// Returns the state handed to [`dike_core::Context`] calls.
    #[must_use]
    pub const fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }
}

/// Resolves names to values during evaluation.
pub trait Activation {
    /// Resolves a top-level identifier.
    fn resolve(&self, name: &str) -> Option<Value>;

    /// Resolves the lazy policy variable registered at `index`.
    ///
    /// # Errors
    ///
    /// Returns the variable's evaluation error, or
    /// [`EvalError::NoSuchAttribute`] when no variables are bound.
    fn variable(&self, index: usize, name: &str) -> Result<Value, EvalError> {
        let _ = index;
        Err(EvalError::NoSuchAttribute(format!("variables.{name}")))
    }

    /// Returns the cancellation state of this evaluation.
    fn eval_context(&self) -> &EvalContext;
}

/// An activation backed by a hash map.
///
/// # Examples
///
/// ```
/// use dike_cel::{Activation, MapActivation, Value};
///
/// let activation = MapActivation::new().with("name", "web");
/// assert_eq!(activation.resolve("name"), Some(Value::from("web")));
/// assert_eq!(activation.resolve("other"), None);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MapActivation {
    values: HashMap<String, Value>,
    context: EvalContext,
}

impl MapActivation {
    /// Creates an empty activation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a name.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Binds a name in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Uses the given evaluation context.
    #[must_use]
    pub fn with_context(mut self, context: EvalContext) -> Self {
        self.context = context;
        self
    }
}

impl Activation for MapActivation {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }

    fn eval_context(&self) -> &EvalContext {
        &self.context
    }
}

/// Binds a comprehension variable on top of a parent activation.
pub(crate) struct Frame<'a> {
    pub parent: &'a dyn Activation,
    pub name: &'a str,
    pub value: Value,
}

impl Activation for Frame<'_> {
    fn resolve(&self, name: &str) -> Option<Value> {
        if name == self.name {
            Some(self.value.clone())
        } else {
            self.parent.resolve(name)
        }
    }

    fn variable(&self, index: usize, name: &str) -> Result<Value, EvalError> {
        self.parent.variable(index, name)
    }

    fn eval_context(&self) -> &EvalContext {
        self.parent.eval_context()
    }
}
