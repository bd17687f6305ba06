//! Policy evaluation.
//!
//! Every evaluation follows the same control flow: check match constraints,
//! bind the inputs, check exceptions, check match conditions, then run the
//! kind-specific stage.
//! A matching exception ends evaluation before match conditions are looked
//! at. Failing match conditions end it with no result, which callers report
//! as a skip.

use std::collections::BTreeMap;
use std::sync::Arc;

use dike_cel::{Activation, EvalContext, Value};
use dike_compiler::environment::{
    EXCEPTIONS_KEY, IMAGES_KEY, NAMESPACE_OBJECT_KEY, OBJECT_KEY, OLD_OBJECT_KEY, REQUEST_KEY,
};
use dike_compiler::{CompiledPolicy, CompiledValidation, ImageMatcher};
use dike_core::{
    AdmissionRequest, Context, EvaluationMode, GroupVersionResource, Namespace, PolicyException, PolicyKind,
};
use tracing::{debug, instrument, warn};

use crate::activation::PolicyActivation;
use crate::bindings::{exceptions_value, json_value, namespace_value, request_value};
use crate::config::EngineConfig;
use crate::constraints::constraints_match;
use crate::error::{EngineError, Result};
use crate::matching::{as_bool, match_conditions, matched_exceptions};

/// The outcome of evaluating one policy against one input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationResult {
    /// True if every validation held. For deletion, true if the resource is
    /// eligible for deletion.
    pub result: bool,
    /// Index of the failing validation.
    pub index: Option<usize>,
    /// Failure message.
    pub message: String,
    /// Failure reason of the failing validation.
    pub reason: Option<String>,
    /// Audit annotations computed on failure. Empty values are omitted.
    pub audit_annotations: BTreeMap<String, String>,
    /// Exceptions that matched. When non-empty nothing else was evaluated.
    pub exceptions: Vec<Arc<PolicyException>>,
}

impl EvaluationResult {
    /// A passing result.
    #[must_use]
    pub fn passed() -> Self {
        Self {
            result: true,
            ..Self::default()
        }
    }

    /// A result recording the exceptions that preempted evaluation.
    #[must_use]
    pub fn excepted(exceptions: Vec<Arc<PolicyException>>) -> Self {
        Self {
            result: true,
            exceptions,
            ..Self::default()
        }
    }

    /// Returns true if an exception preempted evaluation.
    #[must_use]
    pub fn is_excepted(&self) -> bool {
        !self.exceptions.is_empty()
    }
}

/// What exceptions and match conditions decided.
enum Gate {
    Excepted(EvaluationResult),
    NoMatch,
    Matched,
}

/// Evaluates compiled policies against a [`Context`].
#[derive(Clone, Copy)]
pub struct Evaluator<'a> {
    context: &'a Arc<dyn Context>,
    config: &'a EngineConfig,
}

impl<'a> Evaluator<'a> {
    /// Creates an evaluator.
    #[must_use]
    pub const fn new(context: &'a Arc<dyn Context>, config: &'a EngineConfig) -> Self {
        Self { context, config }
    }

    /// Evaluates a structured-mode validating or image-validating policy
    /// against an admission request.
    ///
    /// Returns `Ok(None)` if the policy does not match.
    ///
    /// # Errors
    ///
    /// Returns an error if matching fails under the `Fail` failure policy,
    /// or if an image extractor or validation fails to evaluate.
    #[instrument(skip_all, fields(policy = %policy.name, operation = %request.operation))]
    pub fn evaluate(
        &self,
        policy: &CompiledPolicy,
        request: &AdmissionRequest,
        namespace: Option<&Namespace>,
    ) -> Result<Option<EvaluationResult>> {
        let image_validating = match (policy.kind, policy.mode) {
            (PolicyKind::ValidatingPolicy, EvaluationMode::Kubernetes) => false,
            (PolicyKind::ImageValidatingPolicy, _) => true,
            _ => return Err(wrong_kind(policy, "an admission policy")),
        };
        if let Some(constraints) = &policy.match_constraints {
            if !constraints_match(constraints, request, namespace)? {
                debug!("Request outside match constraints");
                return Ok(None);
            }
        }

        let mut activation = self
            .activation(policy)
            .with(OBJECT_KEY, json_value(request.object.as_ref()))
            .with(OLD_OBJECT_KEY, json_value(request.old_object.as_ref()))
            .with(REQUEST_KEY, request_value(request)?)
            .with(NAMESPACE_OBJECT_KEY, namespace_value(namespace)?)
            .with(EXCEPTIONS_KEY, exceptions_value(&policy.exceptions));

        match self.gate(policy, &activation)? {
            Gate::Excepted(result) => return Ok(Some(result)),
            Gate::NoMatch => return Ok(None),
            Gate::Matched => {}
        }
        if image_validating {
            activation.bind(IMAGES_KEY, extract_images(policy, &request.resource, &activation)?);
        }
        validate(policy, &activation).map(Some)
    }

    /// Evaluates a JSON-mode validating policy against a payload.
    ///
    /// Returns `Ok(None)` if the policy does not match.
    ///
    /// # Errors
    ///
    /// Returns an error if matching fails under the `Fail` failure policy,
    /// or if a validation fails to evaluate.
    #[instrument(skip_all, fields(policy = %policy.name))]
    pub fn evaluate_json(&self, policy: &CompiledPolicy, payload: &serde_json::Value) -> Result<Option<EvaluationResult>> {
        if policy.kind != PolicyKind::ValidatingPolicy || policy.mode != EvaluationMode::Json {
            return Err(wrong_kind(policy, "a JSON policy"));
        }
        let activation = self.activation(policy).with(OBJECT_KEY, Value::from_json(payload));
        match self.gate(policy, &activation)? {
            Gate::Excepted(result) => return Ok(Some(result)),
            Gate::NoMatch => return Ok(None),
            Gate::Matched => {}
        }
        validate(policy, &activation).map(Some)
    }

    /// Evaluates a deleting policy against an existing resource.
    ///
    /// Returns a passing result if the resource is eligible for deletion and
    /// `Ok(None)` if it is not.
    ///
    /// # Errors
    ///
    /// Returns an error if matching or a condition fails under the `Fail`
    /// failure policy.
    #[instrument(skip_all, fields(policy = %policy.name))]
    pub fn evaluate_deletion(
        &self,
        policy: &CompiledPolicy,
        resource: &serde_json::Value,
        namespace: Option<&Namespace>,
    ) -> Result<Option<EvaluationResult>> {
        if policy.kind != PolicyKind::DeletingPolicy {
            return Err(wrong_kind(policy, "a deleting policy"));
        }
        let activation = self
            .activation(policy)
            .with(OBJECT_KEY, Value::from_json(resource))
            .with(NAMESPACE_OBJECT_KEY, namespace_value(namespace)?)
            .with(EXCEPTIONS_KEY, exceptions_value(&policy.exceptions));

        match self.gate(policy, &activation)? {
            Gate::Excepted(result) => return Ok(Some(result)),
            Gate::NoMatch => return Ok(None),
            Gate::Matched => {}
        }
        let failure_policy = self.config.effective_failure_policy(policy.failure_policy);
        if !match_conditions(&policy.conditions, &activation, failure_policy)? {
            debug!("Deletion conditions not met");
            return Ok(None);
        }
        Ok(Some(EvaluationResult::passed()))
    }

    fn activation<'p>(&self, policy: &'p CompiledPolicy) -> PolicyActivation<'p> {
        PolicyActivation::new(&policy.variables, self.config.eval_context())
            .with_libraries(&policy.libraries, self.context)
    }

    /// Runs exceptions, then match conditions.
    fn gate(&self, policy: &CompiledPolicy, activation: &dyn Activation) -> Result<Gate> {
        let failure_policy = self.config.effective_failure_policy(policy.failure_policy);
        let exceptions = matched_exceptions(&policy.exceptions, activation, failure_policy)?;
        if !exceptions.is_empty() {
            debug!(exceptions = exceptions.len(), "Policy preempted by exceptions");
            return Ok(Gate::Excepted(EvaluationResult::excepted(exceptions)));
        }
        if !match_conditions(&policy.match_conditions, activation, failure_policy)? {
            debug!("Policy did not match");
            return Ok(Gate::NoMatch);
        }
        Ok(Gate::Matched)
    }
}

fn wrong_kind(policy: &CompiledPolicy, expected: &'static str) -> EngineError {
    EngineError::WrongKind {
        name: policy.name.clone(),
        expected,
    }
}

/// Evaluates the image extractors for `gvr` into the `images` map, keeping
/// only the images the policy's `matchImageReferences` accept.
fn extract_images(policy: &CompiledPolicy, gvr: &GroupVersionResource, activation: &dyn Activation) -> Result<Value> {
    let mut images = Vec::new();
    for (index, extractor) in policy.image_extractors_for(gvr).iter().enumerate() {
        let value = extractor
            .program
            .eval(activation)
            .and_then(|value| string_list(&value))
            .map_err(|e| EngineError::evaluation("images", index, e))?;
        let value = if policy.match_image_references.is_empty() {
            value
        } else {
            let mut kept = Vec::new();
            for image in value.as_list().unwrap_or_default() {
                let reference = image.as_str().unwrap_or_default();
                if image_applies(reference, &policy.match_image_references, activation.eval_context())? {
                    kept.push(image.clone());
                }
            }
            Value::list(kept)
        };
        images.push((extractor.name.as_str(), value));
    }
    Ok(Value::map(images))
}

fn image_applies(image: &str, matchers: &[ImageMatcher], context: &EvalContext) -> Result<bool> {
    for (index, matcher) in matchers.iter().enumerate() {
        let matched = matcher
            .matches(image, context)
            .map_err(|e| EngineError::evaluation("matchImageReferences", index, e))?;
        if matched {
            debug!(image, index, "Image reference matched");
            return Ok(true);
        }
    }
    Ok(matchers.is_empty())
}

fn string_list(value: &Value) -> std::result::Result<Value, dike_cel::EvalError> {
    let conversion = || dike_cel::EvalError::conversion(value.type_of().to_string(), "list(string)");
    let items = value.as_list().ok_or_else(conversion)?;
    if items.iter().all(|item| matches!(item, Value::String(_))) {
        Ok(value.clone())
    } else {
        Err(conversion())
    }
}

/// Runs validations in order; the first `false` fails the policy and
/// nothing after it is evaluated.
fn validate(policy: &CompiledPolicy, activation: &dyn Activation) -> Result<EvaluationResult> {
    for (index, validation) in policy.validations.iter().enumerate() {
        let passed = validation
            .program
            .eval(activation)
            .and_then(|value| as_bool(&value))
            .map_err(|e| EngineError::evaluation("validations", index, e))?;
        if passed {
            continue;
        }
        debug!(index, "Validation failed");
        return Ok(EvaluationResult {
            result: false,
            index: Some(index),
            message: failure_message(validation, index, activation),
            reason: validation.reason.clone(),
            audit_annotations: audit_annotations(policy, activation),
            exceptions: Vec::new(),
        });
    }
    Ok(EvaluationResult::passed())
}

/// The message of a failed validation. A message expression takes
/// precedence over the static message unless its output is empty or only
/// whitespace; the output is otherwise kept untrimmed.
fn failure_message(validation: &CompiledValidation, index: usize, activation: &dyn Activation) -> String {
    let message = validation.message.clone().unwrap_or_default();
    let Some(program) = &validation.message_expression else {
        return message;
    };
    match program.eval(activation) {
        Ok(Value::String(text)) if !text.trim().is_empty() => text.to_string(),
        Ok(_) => message,
        Err(err) => {
            warn!(index, error = %err, "Message expression failed");
            format!("validation {index} failed; message expression could not be evaluated: {err}")
        }
    }
}

fn audit_annotations(policy: &CompiledPolicy, activation: &dyn Activation) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    for (key, program) in &policy.audit_annotations {
        match program.eval(activation) {
            Ok(Value::String(value)) if !value.is_empty() => {
                annotations.insert(key.clone(), value.to_string());
            }
            Ok(_) => {}
            Err(err) => debug!(key = %key, error = %err, "Skipping audit annotation"),
        }
    }
    annotations
}

#[cfg(test)]
mod tests {
    use dike_compiler::PolicyCompiler;
    use dike_core::{FailurePolicy, ImageValidatingPolicy, ValidatingPolicy, Validation};
    use dike_test::{create_request, FakeContext, PodBuilder};
    use serde_json::json;

    use super::*;

    fn context() -> Arc<dyn Context> {
        Arc::new(FakeContext::new())
    }

    fn compile(policy: &ValidatingPolicy) -> CompiledPolicy {
        PolicyCompiler::new().unwrap().compile_validating(policy, &[]).unwrap()
    }

    fn pod() -> serde_json::Value {
        PodBuilder::new("web")
            .namespace("prod")
            .label("app", "web")
            .container("nginx", "nginx:1.25")
            .build()
    }

    #[test]
    fn test_first_failing_validation_wins() {
        let policy = compile(
            &ValidatingPolicy::new("ordered")
                .with_validation(Validation::new("true").with_message("first"))
                .with_validation(Validation::new("false").with_message("second"))
                .with_validation(Validation::new("1 / 0 == 0").with_message("third")),
        );
        let context = context();
        let config = EngineConfig::default();
        let result = Evaluator::new(&context, &config)
            .evaluate(&policy, &create_request(pod()), None)
            .unwrap()
            .unwrap();
        assert!(!result.result);
        assert_eq!(result.index, Some(1));
        assert_eq!(result.message, "second");
    }

    #[test]
    fn test_validation_error_is_returned() {
        let policy = compile(&ValidatingPolicy::new("boom").with_validation(Validation::new("1 / 0 == 0")));
        let context = context();
        let config = EngineConfig::default();
        let err = Evaluator::new(&context, &config)
            .evaluate(&policy, &create_request(pod()), None)
            .unwrap_err();
        assert!(matches!(err, EngineError::Evaluation { stage: "validations", index: 0, .. }));
    }

    #[test]
    fn test_message_expression_fallbacks() {
        let policy = compile(
            &ValidatingPolicy::new("messages")
                .with_validation(
                    Validation::new("false")
                        .with_message("static")
                        .with_message_expression("string(1 / 0)"),
                ),
        );
        let context = context();
        let config = EngineConfig::default();
        let result = Evaluator::new(&context, &config)
            .evaluate(&policy, &create_request(pod()), None)
            .unwrap()
            .unwrap();
        assert!(result.message.starts_with("validation 0 failed; message expression could not be evaluated"));

        let policy = compile(
            &ValidatingPolicy::new("messages")
                .with_validation(Validation::new("false").with_message("static").with_message_expression("''")),
        );
        let result = Evaluator::new(&context, &config)
            .evaluate(&policy, &create_request(pod()), None)
            .unwrap()
            .unwrap();
        assert_eq!(result.message, "static");
    }

    #[test]
    fn test_blank_message_expression_uses_static_message() {
        let context = context();
        let config = EngineConfig::default();
        for (expression, expected) in [("'  \\t '", "static"), ("' padded '", " padded ")] {
            let policy = compile(
                &ValidatingPolicy::new("messages")
                    .with_validation(Validation::new("false").with_message("static").with_message_expression(expression)),
            );
            let result = Evaluator::new(&context, &config)
                .evaluate(&policy, &create_request(pod()), None)
                .unwrap()
                .unwrap();
            assert_eq!(result.message, expected);
        }
    }

    #[test]
    fn test_missing_message_is_empty() {
        let policy = compile(&ValidatingPolicy::new("bare").with_validation(Validation::new("false")));
        let context = context();
        let config = EngineConfig::default();
        let result = Evaluator::new(&context, &config)
            .evaluate(&policy, &create_request(pod()), None)
            .unwrap()
            .unwrap();
        assert_eq!(result.message, "");
    }

    #[test]
    fn test_audit_annotations_skip_errors_and_empty() {
        let policy = compile(
            &ValidatingPolicy::new("annotated")
                .with_validation(Validation::new("false"))
                .with_audit_annotation("name", "string(object.metadata.name)")
                .with_audit_annotation("empty", "''")
                .with_audit_annotation("null", "null")
                .with_audit_annotation("broken", "string(1 / 0)"),
        );
        let context = context();
        let config = EngineConfig::default();
        let result = Evaluator::new(&context, &config)
            .evaluate(&policy, &create_request(pod()), None)
            .unwrap()
            .unwrap();
        assert_eq!(result.audit_annotations.len(), 1);
        assert_eq!(result.audit_annotations["name"], "web");
    }

    #[test]
    fn test_failure_policy_override() {
        let policy = compile(
            &ValidatingPolicy::new("ignored")
                .with_match_condition("broken", "object.missing.field == 'x'")
                .with_validation(Validation::new("false")),
        );
        let context = context();
        let config = EngineConfig::default();
        assert!(Evaluator::new(&context, &config)
            .evaluate(&policy, &create_request(pod()), None)
            .is_err());

        let config = EngineConfig::default().with_failure_policy(FailurePolicy::Ignore);
        assert_eq!(
            Evaluator::new(&context, &config)
                .evaluate(&policy, &create_request(pod()), None)
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_images_bound_for_image_policies() {
        let policy = ImageValidatingPolicy::new("registry")
            .with_validation(Validation::new("images.containers.all(i, i.startsWith('ghcr.io/'))").with_message("untrusted"));
        let policy = PolicyCompiler::new().unwrap().compile_image_validating(&policy, &[]).unwrap();
        let context = context();
        let config = EngineConfig::default();
        let result = Evaluator::new(&context, &config)
            .evaluate(&policy, &create_request(pod()), None)
            .unwrap()
            .unwrap();
        assert!(!result.result);
        assert_eq!(result.message, "untrusted");
    }

    #[test]
    fn test_wrong_kind() {
        let policy = compile(&ValidatingPolicy::new("k8s").with_validation(Validation::new("true")));
        let context = context();
        let config = EngineConfig::default();
        let err = Evaluator::new(&context, &config)
            .evaluate_json(&policy, &json!({}))
            .unwrap_err();
        assert_eq!(err.to_string(), "policy k8s cannot be evaluated as a JSON policy");
    }
}
