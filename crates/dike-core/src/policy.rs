//! Policy specification model.
//!
//! These types mirror the Kubernetes-style policy documents that authors
//! write. They carry raw expression strings only; turning them into
//! executable programs is the job of `dike-compiler`.

use std::collections::HashSet;
use std::fmt;

use k8s_openapi::api::admissionregistration::v1::MatchResources;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

use crate::field::{ErrorList, FieldError, FieldPath, Validate};

/// A named boolean pre-filter expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCondition {
    /// Condition name, unique within its list.
    pub name: String,
    /// Expression that must evaluate to a boolean.
    pub expression: String,
}

impl MatchCondition {
    /// Creates a new match condition.
    #[must_use]
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
        }
    }
}

/// A named expression whose value is available to later expressions as
/// `variables.<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    /// Variable name; must be a valid identifier.
    pub name: String,
    /// Expression producing the variable value.
    pub expression: String,
}

impl Variable {
    /// Creates a new variable declaration.
    #[must_use]
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
        }
    }
}

/// A boolean rule with its failure message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validation {
    /// Expression that must evaluate to a boolean.
    pub expression: String,

    /// Static failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Expression producing the failure message; takes precedence over `message`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_expression: Option<String>,

    /// Machine-readable failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Validation {
    /// Creates a validation from its boolean expression.
    #[must_use]
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            ..Self::default()
        }
    }

    /// Sets the static failure message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Sets the message expression.
    #[must_use]
    pub fn with_message_expression(mut self, expression: impl Into<String>) -> Self {
        self.message_expression = Some(expression.into());
        self
    }
}

/// An audit annotation computed when a validation fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditAnnotation {
    /// Annotation key, unique within the policy.
    pub key: String,
    /// Expression producing a string or null.
    pub value_expression: String,
}

impl AuditAnnotation {
    /// Creates a new audit annotation.
    #[must_use]
    pub fn new(key: impl Into<String>, value_expression: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value_expression: value_expression.into(),
        }
    }
}

/// A named expression extracting image references from a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageExtractor {
    /// Extractor name; becomes the key under `images`.
    pub name: String,
    /// Expression producing a list of strings.
    pub expression: String,
}

impl ImageExtractor {
    /// Creates a new image extractor.
    #[must_use]
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
        }
    }
}

/// Selects the images an image-validating policy applies to, by glob or by
/// a boolean expression over `ref`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchImageReference {
    /// Glob pattern over the full image reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glob: Option<String>,
    /// Expression over `ref`, the image reference string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

impl MatchImageReference {
    /// Matches image references against a glob.
    #[must_use]
    pub fn glob(pattern: impl Into<String>) -> Self {
        Self {
            glob: Some(pattern.into()),
            expression: None,
        }
    }

    /// Matches image references with a boolean expression.
    #[must_use]
    pub fn expression(expression: impl Into<String>) -> Self {
        Self {
            glob: None,
            expression: Some(expression.into()),
        }
    }
}

/// How match-condition evaluation errors are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Errors are reported as a failure of the policy.
    #[default]
    Fail,
    /// Errors are treated as "did not match".
    Ignore,
}

impl FailurePolicy {
    /// Returns the canonical string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fail => "Fail",
            Self::Ignore => "Ignore",
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a policy is evaluated against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvaluationMode {
    /// Structured admission requests and cluster objects.
    #[default]
    Kubernetes,
    /// Arbitrary JSON payloads bound as `object`.
    #[serde(rename = "JSON")]
    Json,
}

/// Evaluation settings of a policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationConfiguration {
    /// Evaluation mode; defaults to [`EvaluationMode::Kubernetes`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<EvaluationMode>,
}

/// The kind of a policy document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PolicyKind {
    /// A [`ValidatingPolicy`].
    ValidatingPolicy,
    /// An [`ImageValidatingPolicy`].
    ImageValidatingPolicy,
    /// A [`DeletingPolicy`].
    DeletingPolicy,
}

impl PolicyKind {
    /// Returns the kind name as used in policy references.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ValidatingPolicy => "ValidatingPolicy",
            Self::ImageValidatingPolicy => "ImageValidatingPolicy",
            Self::DeletingPolicy => "DeletingPolicy",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Specification of a [`ValidatingPolicy`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatingPolicySpec {
    /// Resources and operations the policy applies to. Unset matches every
    /// request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_constraints: Option<MatchResources>,

    /// Conditions that must all hold for the policy to apply.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_conditions: Vec<MatchCondition>,

    /// Named variables, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<Variable>,

    /// Validation rules, evaluated in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validations: Vec<Validation>,

    /// Audit annotations computed on failure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audit_annotations: Vec<AuditAnnotation>,

    /// Failure policy; defaults to [`FailurePolicy::Fail`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<FailurePolicy>,

    /// Evaluation settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationConfiguration>,
}

impl ValidatingPolicySpec {
    /// Returns the effective failure policy.
    #[must_use]
    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy.unwrap_or_default()
    }

    /// Returns the effective evaluation mode.
    #[must_use]
    pub fn evaluation_mode(&self) -> EvaluationMode {
        self.evaluation
            .as_ref()
            .and_then(|e| e.mode)
            .unwrap_or_default()
    }
}

/// A policy that validates admission requests or JSON payloads.
///
/// # Examples
///
/// ```rust
/// use dike_core::{FailurePolicy, Validation, ValidatingPolicy};
///
/// let policy = ValidatingPolicy::new("require-team-label")
///     .with_match_condition("is-create", "request.operation == 'CREATE'")
///     .with_variable("labels", "has(object.metadata.labels) ? object.metadata.labels : {}")
///     .with_validation(Validation::new("'team' in variables.labels").with_message("team label required"))
///     .with_failure_policy(FailurePolicy::Ignore);
///
/// assert_eq!(policy.name(), "require-team-label");
/// assert_eq!(policy.spec.validations.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidatingPolicy {
    /// Object metadata.
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Policy specification.
    pub spec: ValidatingPolicySpec,
}

impl ValidatingPolicy {
    /// Creates an empty policy with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: named_meta(name),
            spec: ValidatingPolicySpec::default(),
        }
    }

    /// Returns the policy name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Adds a match condition.
    #[must_use]
    pub fn with_match_condition(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.spec.match_conditions.push(MatchCondition::new(name, expression));
        self
    }

    /// Restricts the resources and operations the policy applies to.
    #[must_use]
    pub fn with_match_constraints(mut self, constraints: MatchResources) -> Self {
        self.spec.match_constraints = Some(constraints);
        self
    }

    /// Adds a variable.
    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.spec.variables.push(Variable::new(name, expression));
        self
    }

    /// Adds a validation rule.
    #[must_use]
    pub fn with_validation(mut self, validation: Validation) -> Self {
        self.spec.validations.push(validation);
        self
    }

    /// Adds an audit annotation.
    #[must_use]
    pub fn with_audit_annotation(mut self, key: impl Into<String>, value_expression: impl Into<String>) -> Self {
        self.spec.audit_annotations.push(AuditAnnotation::new(key, value_expression));
        self
    }

    /// Sets the failure policy.
    #[must_use]
    pub const fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.spec.failure_policy = Some(failure_policy);
        self
    }

    /// Sets the evaluation mode.
    #[must_use]
    pub fn with_evaluation_mode(mut self, mode: EvaluationMode) -> Self {
        self.spec.evaluation = Some(EvaluationConfiguration { mode: Some(mode) });
        self
    }
}

impl Validate for ValidatingPolicy {
    fn validate(&self) -> Result<(), ErrorList> {
        let mut errors = ErrorList::new();
        validate_name(&self.metadata, &mut errors);

        let spec = FieldPath::new("spec");
        validate_rules(
            &spec,
            &self.spec.match_conditions,
            &self.spec.variables,
            &self.spec.validations,
            &self.spec.audit_annotations,
            &mut errors,
        );
        errors.into_result()
    }
}

/// Specification of an [`ImageValidatingPolicy`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageValidatingPolicySpec {
    /// Resources and operations the policy applies to. Unset matches every
    /// request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_constraints: Option<MatchResources>,

    /// Images the policy applies to. Empty matches every image.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_image_references: Vec<MatchImageReference>,

    /// Conditions that must all hold for the policy to apply.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_conditions: Vec<MatchCondition>,

    /// Named variables, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<Variable>,

    /// User-supplied image extractors, merged with the defaults for the
    /// target resource.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageExtractor>,

    /// Validation rules, evaluated in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validations: Vec<Validation>,

    /// Audit annotations computed on failure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audit_annotations: Vec<AuditAnnotation>,

    /// Failure policy; defaults to [`FailurePolicy::Fail`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<FailurePolicy>,
}

impl ImageValidatingPolicySpec {
    /// Returns the effective failure policy.
    #[must_use]
    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy.unwrap_or_default()
    }
}

/// A policy that validates the container images referenced by a resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageValidatingPolicy {
    /// Object metadata.
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Policy specification.
    pub spec: ImageValidatingPolicySpec,
}

impl ImageValidatingPolicy {
    /// Creates an empty policy with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: named_meta(name),
            spec: ImageValidatingPolicySpec::default(),
        }
    }

    /// Returns the policy name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Adds a match condition.
    #[must_use]
    pub fn with_match_condition(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.spec.match_conditions.push(MatchCondition::new(name, expression));
        self
    }

    /// Restricts the resources and operations the policy applies to.
    #[must_use]
    pub fn with_match_constraints(mut self, constraints: MatchResources) -> Self {
        self.spec.match_constraints = Some(constraints);
        self
    }

    /// Adds an image reference matcher.
    #[must_use]
    pub fn with_match_image_reference(mut self, reference: MatchImageReference) -> Self {
        self.spec.match_image_references.push(reference);
        self
    }

    /// Adds an image extractor.
    #[must_use]
    pub fn with_image_extractor(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.spec.images.push(ImageExtractor::new(name, expression));
        self
    }

    /// Adds a validation rule.
    #[must_use]
    pub fn with_validation(mut self, validation: Validation) -> Self {
        self.spec.validations.push(validation);
        self
    }
}

impl Validate for ImageValidatingPolicy {
    fn validate(&self) -> Result<(), ErrorList> {
        let mut errors = ErrorList::new();
        validate_name(&self.metadata, &mut errors);

        let spec = FieldPath::new("spec");
        validate_rules(
            &spec,
            &self.spec.match_conditions,
            &self.spec.variables,
            &self.spec.validations,
            &self.spec.audit_annotations,
            &mut errors,
        );

        let mut seen = HashSet::new();
        for (i, extractor) in self.spec.images.iter().enumerate() {
            let path = spec.child("images").index(i).child("name");
            if extractor.name.is_empty() {
                errors.push(FieldError::required(&path, ""));
            } else if !seen.insert(extractor.name.as_str()) {
                errors.push(FieldError::duplicate(&path, &extractor.name));
            }
        }
        errors.into_result()
    }
}

/// Specification of a [`DeletingPolicy`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletingPolicySpec {
    /// Conditions that must all hold for the policy to apply.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_conditions: Vec<MatchCondition>,

    /// Named variables, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<Variable>,

    /// Deletion conditions; may reference `variables`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<MatchCondition>,

    /// Cron schedule on which the policy is evaluated.
    #[serde(default)]
    pub schedule: String,
}

/// A policy that marks matching resources as eligible for deletion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeletingPolicy {
    /// Object metadata.
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Policy specification.
    pub spec: DeletingPolicySpec,
}

impl DeletingPolicy {
    /// Creates an empty policy with the given name and schedule.
    #[must_use]
    pub fn new(name: impl Into<String>, schedule: impl Into<String>) -> Self {
        Self {
            metadata: named_meta(name),
            spec: DeletingPolicySpec {
                schedule: schedule.into(),
                ..DeletingPolicySpec::default()
            },
        }
    }

    /// Returns the policy name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Adds a match condition.
    #[must_use]
    pub fn with_match_condition(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.spec.match_conditions.push(MatchCondition::new(name, expression));
        self
    }

    /// Adds a deletion condition.
    #[must_use]
    pub fn with_condition(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.spec.conditions.push(MatchCondition::new(name, expression));
        self
    }

    /// Adds a variable.
    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.spec.variables.push(Variable::new(name, expression));
        self
    }
}

impl Validate for DeletingPolicy {
    fn validate(&self) -> Result<(), ErrorList> {
        let mut errors = ErrorList::new();
        validate_name(&self.metadata, &mut errors);

        let spec = FieldPath::new("spec");
        if self.spec.schedule.trim().is_empty() {
            errors.push(FieldError::required(&spec.child("schedule"), ""));
        }
        validate_named(&spec.child("matchConditions"), self.spec.match_conditions.iter().map(|c| c.name.as_str()), &mut errors);
        validate_named(&spec.child("conditions"), self.spec.conditions.iter().map(|c| c.name.as_str()), &mut errors);
        validate_variables(&spec.child("variables"), &self.spec.variables, &mut errors);
        errors.into_result()
    }
}

/// Returns true if `name` can be referenced as `variables.<name>`.
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub(crate) fn named_meta(name: impl Into<String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        ..ObjectMeta::default()
    }
}

pub(crate) fn validate_name(metadata: &ObjectMeta, errors: &mut ErrorList) {
    if metadata.name.as_deref().map_or(true, str::is_empty) {
        errors.push(FieldError::required(&FieldPath::new("metadata").child("name"), ""));
    }
}

fn validate_rules(
    spec: &FieldPath,
    match_conditions: &[MatchCondition],
    variables: &[Variable],
    validations: &[Validation],
    audit_annotations: &[AuditAnnotation],
    errors: &mut ErrorList,
) {
    validate_named(
        &spec.child("matchConditions"),
        match_conditions.iter().map(|c| c.name.as_str()),
        errors,
    );
    validate_variables(&spec.child("variables"), variables, errors);

    if validations.is_empty() && audit_annotations.is_empty() {
        errors.push(FieldError::required(
            &spec.child("validations"),
            "validations or auditAnnotations must contain at least one item",
        ));
    }
    for (i, validation) in validations.iter().enumerate() {
        if validation.expression.trim().is_empty() {
            errors.push(FieldError::required(
                &spec.child("validations").index(i).child("expression"),
                "",
            ));
        }
    }

    let mut keys = HashSet::new();
    for (i, annotation) in audit_annotations.iter().enumerate() {
        let path = spec.child("auditAnnotations").index(i).child("key");
        if annotation.key.is_empty() {
            errors.push(FieldError::required(&path, ""));
        } else if !keys.insert(annotation.key.as_str()) {
            errors.push(FieldError::duplicate(&path, &annotation.key));
        }
    }
}

fn validate_named<'a>(path: &FieldPath, names: impl Iterator<Item = &'a str>, errors: &mut ErrorList) {
    let mut seen = HashSet::new();
    for (i, name) in names.enumerate() {
        let path = path.index(i).child("name");
        if name.is_empty() {
            errors.push(FieldError::required(&path, ""));
        } else if !seen.insert(name) {
            errors.push(FieldError::duplicate(&path, name));
        }
    }
}

fn validate_variables(path: &FieldPath, variables: &[Variable], errors: &mut ErrorList) {
    let mut seen = HashSet::new();
    for (i, variable) in variables.iter().enumerate() {
        let name_path = path.index(i).child("name");
        if variable.name.is_empty() {
            errors.push(FieldError::required(&name_path, ""));
        } else if !is_identifier(&variable.name) {
            errors.push(FieldError::invalid(
                &name_path,
                &variable.name,
                "must be a valid identifier",
            ));
        } else if !seen.insert(variable.name.as_str()) {
            errors.push(FieldError::duplicate(&name_path, &variable.name));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_policy_default_is_fail() {
        assert_eq!(FailurePolicy::default(), FailurePolicy::Fail);
        assert_eq!(ValidatingPolicySpec::default().failure_policy(), FailurePolicy::Fail);
    }

    #[test]
    fn test_evaluation_mode_default_is_kubernetes() {
        assert_eq!(ValidatingPolicySpec::default().evaluation_mode(), EvaluationMode::Kubernetes);
        let policy = ValidatingPolicy::new("p").with_evaluation_mode(EvaluationMode::Json);
        assert_eq!(policy.spec.evaluation_mode(), EvaluationMode::Json);
    }

    #[test]
    fn test_deserialize_validating_policy() {
        let yaml = r#"
metadata:
  name: check-labels
spec:
  failurePolicy: Ignore
  evaluation:
    mode: JSON
  matchConditions:
    - name: always
      expression: "true"
  variables:
    - name: team
      expression: "object.metadata.labels.team"
  validations:
    - expression: "variables.team != ''"
      messageExpression: "'team is ' + variables.team"
  auditAnnotations:
    - key: team
      valueExpression: "variables.team"
"#;
        let policy: ValidatingPolicy = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(policy.name(), "check-labels");
        assert_eq!(policy.spec.failure_policy(), FailurePolicy::Ignore);
        assert_eq!(policy.spec.evaluation_mode(), EvaluationMode::Json);
        assert_eq!(policy.spec.variables[0].name, "team");
        assert_eq!(
            policy.spec.validations[0].message_expression.as_deref(),
            Some("'team is ' + variables.team")
        );
        assert_eq!(policy.spec.audit_annotations[0].value_expression, "variables.team");
    }

    #[test]
    fn test_deserialize_image_policy_matchers() {
        let yaml = r#"
metadata:
  name: verify-ghcr
spec:
  matchConstraints:
    resourceRules:
      - apiGroups: [""]
        apiVersions: [v1]
        operations: [CREATE, UPDATE]
        resources: [pods]
  matchImageReferences:
    - glob: "ghcr.io/*"
    - expression: "ref.startsWith('docker.io/')"
  validations:
    - expression: "true"
"#;
        let policy: ImageValidatingPolicy = serde_yaml::from_str(yaml).unwrap();
        let rules = policy.spec.match_constraints.unwrap().resource_rules.unwrap();
        assert_eq!(rules[0].resources.as_deref(), Some(&["pods".to_string()][..]));
        assert_eq!(rules[0].operations.as_ref().map(Vec::len), Some(2));
        assert_eq!(
            policy.spec.match_image_references,
            vec![
                MatchImageReference::glob("ghcr.io/*"),
                MatchImageReference::expression("ref.startsWith('docker.io/')"),
            ]
        );
    }

    #[test]
    fn test_serialize_skips_empty_fields() {
        let policy = ValidatingPolicy::new("p").with_validation(Validation::new("true"));
        let json = serde_json::to_value(&policy).unwrap();
        assert!(json["spec"].get("matchConditions").is_none());
        assert!(json["spec"].get("failurePolicy").is_none());
        assert_eq!(json["spec"]["validations"][0]["expression"], "true");
    }

    #[test]
    fn test_validate_valid_policy() {
        let policy = ValidatingPolicy::new("p")
            .with_variable("x", "1")
            .with_validation(Validation::new("variables.x == 1"));
        assert!(policy.is_valid());
    }

    #[test]
    fn test_validate_missing_name() {
        let mut policy = ValidatingPolicy::new("").with_validation(Validation::new("true"));
        policy.metadata.name = None;
        let errors = policy.validate().unwrap_err();
        assert_eq!(errors.first().unwrap().field, "metadata.name");
    }

    #[test]
    fn test_validate_requires_validations_or_annotations() {
        let errors = ValidatingPolicy::new("p").validate().unwrap_err();
        assert_eq!(errors.first().unwrap().field, "spec.validations");
    }

    #[test]
    fn test_validate_duplicate_variable() {
        let policy = ValidatingPolicy::new("p")
            .with_variable("x", "1")
            .with_variable("x", "2")
            .with_validation(Validation::new("true"));
        let errors = policy.validate().unwrap_err();
        let err = errors.first().unwrap();
        assert_eq!(err.field, "spec.variables[1].name");
        assert_eq!(err.kind, crate::FieldErrorKind::Duplicate);
    }

    #[test]
    fn test_validate_invalid_variable_name() {
        let policy = ValidatingPolicy::new("p")
            .with_variable("not-valid", "1")
            .with_validation(Validation::new("true"));
        let errors = policy.validate().unwrap_err();
        assert!(errors.first().unwrap().detail.contains("identifier"));
    }

    #[test]
    fn test_validate_duplicate_audit_annotation() {
        let policy = ValidatingPolicy::new("p")
            .with_audit_annotation("a", "'x'")
            .with_audit_annotation("a", "'y'");
        let errors = policy.validate().unwrap_err();
        assert_eq!(errors.first().unwrap().field, "spec.auditAnnotations[1].key");
    }

    #[test]
    fn test_validate_image_policy_duplicate_extractor() {
        let policy = ImageValidatingPolicy::new("p")
            .with_image_extractor("ext", "[]")
            .with_image_extractor("ext", "[]")
            .with_validation(Validation::new("true"));
        let errors = policy.validate().unwrap_err();
        assert_eq!(errors.first().unwrap().field, "spec.images[1].name");
    }

    #[test]
    fn test_validate_deleting_policy_requires_schedule() {
        let policy = DeletingPolicy::new("cleanup", " ");
        let errors = policy.validate().unwrap_err();
        assert_eq!(errors.first().unwrap().field, "spec.schedule");
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("x"));
        assert!(is_identifier("_private1"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier("a.b"));
    }

    #[test]
    fn test_policy_kind_display() {
        assert_eq!(PolicyKind::ValidatingPolicy.to_string(), "ValidatingPolicy");
        assert_eq!(PolicyKind::DeletingPolicy.as_str(), "DeletingPolicy");
    }
}
