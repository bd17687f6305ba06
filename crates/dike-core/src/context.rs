//! The capability interface injected into every evaluation.
//!
//! Expressions reach cluster state, global-context entries, image metadata
//! and the resource generator only through a [`Context`]. Its lifecycle and
//! implementation belong to the surrounding controllers.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors reported by a [`Context`] implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// The requested object does not exist.
    #[error("{resource} \"{name}\" not found")]
    NotFound {
        /// Resource type, e.g. `pods`.
        resource: String,
        /// Object name.
        name: String,
    },

    /// The requested global-context entry does not exist.
    #[error("global context entry not found: {name}")]
    EntryNotFound {
        /// Entry name.
        name: String,
    },

    /// No metadata is known for the requested image.
    #[error("image data not found for {image}, available images: {}", available.join(", "))]
    ImageDataNotFound {
        /// Requested image reference.
        image: String,
        /// Images the context knows about.
        available: Vec<String>,
    },

    /// A resource payload was rejected.
    #[error("invalid resource: {reason}")]
    InvalidResource {
        /// Reason for the rejection.
        reason: String,
    },

    /// Any other backend failure.
    #[error("{0}")]
    Backend(String),

    /// The calling evaluation was cancelled.
    #[error("evaluation cancelled")]
    Cancelled,

    /// The calling evaluation ran out of time.
    #[error("evaluation deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation and deadline of the evaluation issuing a [`Context`] call.
///
/// Implementations that block (network lookups, registry fetches) should
/// give up once [`Cancellation::check`] fails and bound their own timeouts
/// by [`Cancellation::remaining`].
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// Never cancelled, no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses the given cancellation token.
    #[must_use]
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Sets an absolute deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Returns an error once the caller cancelled or the deadline passed.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Cancelled`] or [`ContextError::DeadlineExceeded`].
    pub fn check(&self) -> Result<(), ContextError> {
        if self.token.is_cancelled() {
            return Err(ContextError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ContextError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Time left before the deadline, if one is set.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Returns the cancellation token.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns the deadline, if one is set.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

/// Identifies the trigger of a generate operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateContext {
    /// Policy performing the generation.
    pub policy_name: String,
    /// Name of the triggering resource.
    pub trigger_name: String,
    /// Namespace of the triggering resource.
    pub trigger_namespace: String,
    /// API version of the triggering resource.
    pub trigger_api_version: String,
    /// API group of the triggering resource.
    pub trigger_group: String,
    /// Kind of the triggering resource.
    pub trigger_kind: String,
    /// UID of the triggering resource.
    pub trigger_uid: String,
    /// Whether cached generated resources should be restored.
    pub restore_cache: bool,
}

/// Capability object giving expressions access to the outside world.
///
/// Implementations must be safe to share between concurrent evaluations.
/// Every call is synchronous and receives the [`Cancellation`] of the
/// evaluation that issued it; implementations own retry policy.
pub trait Context: Send + Sync {
    /// Fetches a single object.
    ///
    /// An empty `namespace` addresses a cluster-scoped object.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::NotFound`] if the object does not exist.
    fn get_resource(
        &self,
        cancel: &Cancellation,
        api_version: &str,
        resource: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Value, ContextError>;

    /// Lists objects, optionally filtered by a label selector.
    ///
    /// # Errors
    ///
    /// Returns a backend error if listing fails.
    fn list_resources(
        &self,
        cancel: &Cancellation,
        api_version: &str,
        resource: &str,
        namespace: &str,
        label_selector: Option<&BTreeMap<String, String>>,
    ) -> Result<Value, ContextError>;

    /// Creates an object and returns the stored result.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::InvalidResource`] if the payload is rejected.
    fn post_resource(
        &self,
        cancel: &Cancellation,
        api_version: &str,
        resource: &str,
        namespace: &str,
        data: Value,
    ) -> Result<Value, ContextError>;

    /// Looks up a global-context entry, optionally projected.
    ///
    /// Returns `Ok(None)` when the entry exists but holds no data.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::EntryNotFound`] if the entry is unknown.
    fn get_global_reference(
        &self,
        cancel: &Cancellation,
        name: &str,
        projection: &str,
    ) -> Result<Option<Value>, ContextError>;

    /// Fetches image metadata for an image reference.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::ImageDataNotFound`] if no metadata is available.
    fn get_image_data(&self, cancel: &Cancellation, image: &str) -> Result<Map<String, Value>, ContextError>;

    /// Schedules resources for generation in the given namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if a resource cannot be generated.
    fn generate_resources(
        &self,
        cancel: &Cancellation,
        namespace: &str,
        resources: Vec<Value>,
    ) -> Result<(), ContextError>;

    /// Forgets previously generated resources.
    fn clear_generated_resources(&self);

    /// Records the trigger of subsequent generate calls.
    fn set_generate_context(&self, context: GenerateContext);
}
