//! The policy engine.
//!
//! [`Engine`] owns the compiler, the policy cache and the injected
//! [`Context`]. Policies are compiled when installed; requests are evaluated
//! against a snapshot of the cache, one policy at a time. A policy that
//! errors is reported as [`Outcome::Error`] and does not affect the others.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use dike_compiler::{CompiledPolicy, CompilerError, PolicyCompiler};
use dike_core::{
    AdmissionRequest, Context, DeletingPolicy, EvaluationMode, ImageValidatingPolicy, Namespace, PolicyException,
    PolicyKind, ValidatingPolicy,
};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::cache::{PolicyCache, PolicyKey};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::evaluator::{EvaluationResult, Evaluator};

/// The outcome of one policy for one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Every validation held. For deleting policies, the resource is
    /// eligible for deletion.
    Pass,
    /// A validation failed.
    Fail,
    /// The policy did not match, or an exception applied.
    Skip,
    /// The policy could not be evaluated.
    Error,
}

impl Outcome {
    /// Returns the canonical string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Skip => "skip",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The response of one policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyResponse {
    /// Policy name.
    pub policy: String,
    /// Policy kind.
    pub kind: PolicyKind,
    /// Outcome.
    pub outcome: Outcome,
    /// Failure or error message.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Index of the failing validation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    /// Failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Audit annotations.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub audit_annotations: BTreeMap<String, String>,
    /// Names of the exceptions that applied.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exceptions: Vec<String>,
}

impl PolicyResponse {
    fn new(policy: &CompiledPolicy, outcome: Outcome) -> Self {
        Self {
            policy: policy.name.clone(),
            kind: policy.kind,
            outcome,
            message: String::new(),
            index: None,
            reason: None,
            audit_annotations: BTreeMap::new(),
            exceptions: Vec::new(),
        }
    }

    fn from_evaluation(policy: &CompiledPolicy, evaluation: Result<Option<EvaluationResult>>) -> Self {
        match evaluation {
            Err(err) => {
                warn!(policy = %policy.name, error = %err, "Policy evaluation failed");
                Self {
                    message: err.to_string(),
                    ..Self::new(policy, Outcome::Error)
                }
            }
            Ok(None) => Self::new(policy, Outcome::Skip),
            Ok(Some(result)) if result.is_excepted() => {
                let exceptions: Vec<String> = result.exceptions.iter().map(|e| e.name().to_string()).collect();
                Self {
                    message: format!("skipped due to policy exceptions: {}", exceptions.join(", ")),
                    exceptions,
                    ..Self::new(policy, Outcome::Skip)
                }
            }
            Ok(Some(result)) if result.result => Self::new(policy, Outcome::Pass),
            Ok(Some(result)) => Self {
                message: result.message,
                index: result.index,
                reason: result.reason,
                audit_annotations: result.audit_annotations,
                ..Self::new(policy, Outcome::Fail)
            },
        }
    }
}

/// The responses of every evaluated policy for one input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineResponse {
    /// Per-policy responses, ordered by kind and name.
    pub policies: Vec<PolicyResponse>,
}

impl EngineResponse {
    /// Returns true if no policy failed or errored.
    #[must_use]
    pub fn allowed(&self) -> bool {
        self.policies
            .iter()
            .all(|p| !matches!(p.outcome, Outcome::Fail | Outcome::Error))
    }

    /// Responses with the given outcome.
    pub fn with_outcome(&self, outcome: Outcome) -> impl Iterator<Item = &PolicyResponse> {
        self.policies.iter().filter(move |p| p.outcome == outcome)
    }

    /// The response of a policy.
    #[must_use]
    pub fn policy(&self, name: &str) -> Option<&PolicyResponse> {
        self.policies.iter().find(|p| p.policy == name)
    }
}

/// Compiles, caches and evaluates policies.
pub struct Engine {
    compiler: PolicyCompiler,
    cache: PolicyCache,
    context: Arc<dyn Context>,
    config: EngineConfig,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine with a default compiler and configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the policy environments cannot be built.
    pub fn new(context: Arc<dyn Context>) -> Result<Self> {
        Ok(Self::with_compiler(PolicyCompiler::new()?, context))
    }

    /// Creates an engine around an existing compiler.
    #[must_use]
    pub fn with_compiler(compiler: PolicyCompiler, context: Arc<dyn Context>) -> Self {
        Self {
            compiler,
            cache: PolicyCache::new(),
            context,
            config: EngineConfig::default(),
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// The compiled policy cache.
    #[must_use]
    pub const fn cache(&self) -> &PolicyCache {
        &self.cache
    }

    /// The configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compiles and installs a validating policy with its exceptions.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Compile`] if the policy does not compile; any
    /// previously installed version is removed.
    pub fn install_validating(&self, policy: &ValidatingPolicy, exceptions: &[PolicyException]) -> Result<u64> {
        self.install(
            PolicyKey::new(PolicyKind::ValidatingPolicy, policy.name()),
            self.compiler.compile_validating(policy, exceptions),
        )
    }

    /// Compiles and installs an image-validating policy with its exceptions.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Compile`] if the policy does not compile; any
    /// previously installed version is removed.
    pub fn install_image_validating(
        &self,
        policy: &ImageValidatingPolicy,
        exceptions: &[PolicyException],
    ) -> Result<u64> {
        self.install(
            PolicyKey::new(PolicyKind::ImageValidatingPolicy, policy.name()),
            self.compiler.compile_image_validating(policy, exceptions),
        )
    }

    /// Compiles and installs a deleting policy with its exceptions.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Compile`] if the policy does not compile; any
    /// previously installed version is removed.
    pub fn install_deleting(&self, policy: &DeletingPolicy, exceptions: &[PolicyException]) -> Result<u64> {
        self.install(
            PolicyKey::new(PolicyKind::DeletingPolicy, policy.name()),
            self.compiler.compile_deleting(policy, exceptions),
        )
    }

    /// Removes a policy. Returns true if it was installed.
    pub fn remove(&self, kind: PolicyKind, name: &str) -> bool {
        self.cache.remove(&PolicyKey::new(kind, name))
    }

    fn install(&self, key: PolicyKey, compiled: std::result::Result<CompiledPolicy, CompilerError>) -> Result<u64> {
        match compiled {
            Ok(policy) => Ok(self.cache.install(policy)),
            Err(err) => {
                self.cache.reject(&key, err.field_errors());
                Err(err.into())
            }
        }
    }

    fn evaluator(&self) -> Evaluator<'_> {
        Evaluator::new(&self.context, &self.config)
    }

    /// Evaluates every structured-mode validating and image-validating
    /// policy against an admission request.
    #[instrument(skip_all, fields(uid = %request.uid, resource = %request.resource))]
    pub fn handle(&self, request: &AdmissionRequest, namespace: Option<&Namespace>) -> EngineResponse {
        let policies = self
            .cache
            .snapshot(&[PolicyKind::ValidatingPolicy, PolicyKind::ImageValidatingPolicy]);
        let evaluator = self.evaluator();
        let responses: Vec<PolicyResponse> = policies
            .iter()
            .filter(|policy| policy.mode == EvaluationMode::Kubernetes)
            .map(|policy| PolicyResponse::from_evaluation(policy, evaluator.evaluate(policy, request, namespace)))
            .collect();
        debug!(policies = responses.len(), "Handled admission request");
        EngineResponse { policies: responses }
    }

    /// Evaluates every JSON-mode validating policy against a payload.
    #[instrument(skip_all)]
    pub fn handle_json(&self, payload: &serde_json::Value) -> EngineResponse {
        let policies = self.cache.snapshot(&[PolicyKind::ValidatingPolicy]);
        let evaluator = self.evaluator();
        let responses: Vec<PolicyResponse> = policies
            .iter()
            .filter(|policy| policy.mode == EvaluationMode::Json)
            .map(|policy| PolicyResponse::from_evaluation(policy, evaluator.evaluate_json(policy, payload)))
            .collect();
        debug!(policies = responses.len(), "Handled JSON payload");
        EngineResponse { policies: responses }
    }

    /// Evaluates every deleting policy against an existing resource.
    /// [`Outcome::Pass`] marks the resource as eligible for deletion.
    #[instrument(skip_all)]
    pub fn handle_deletion(&self, resource: &serde_json::Value, namespace: Option<&Namespace>) -> EngineResponse {
        let policies = self.cache.snapshot(&[PolicyKind::DeletingPolicy]);
        let evaluator = self.evaluator();
        let responses: Vec<PolicyResponse> = policies
            .iter()
            .map(|policy| {
                PolicyResponse::from_evaluation(policy, evaluator.evaluate_deletion(policy, resource, namespace))
            })
            .collect();
        debug!(policies = responses.len(), "Handled deletion candidate");
        EngineResponse { policies: responses }
    }

    /// Runs [`Engine::handle`] on the blocking thread pool, since library
    /// calls may block on I/O.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Task`] if the evaluation task panics or is
    /// cancelled.
    pub async fn handle_async(
        self: Arc<Self>,
        request: AdmissionRequest,
        namespace: Option<Namespace>,
    ) -> Result<EngineResponse> {
        tokio::task::spawn_blocking(move || self.handle(&request, namespace.as_ref()))
            .await
            .map_err(|e| EngineError::Task(e.to_string()))
    }
}
