//! Policy exceptions.
//!
//! An exception references one or more policies by name and kind. When its
//! match conditions hold for a resource, the referenced policies are skipped.

use serde::{Deserialize, Serialize};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::field::{ErrorList, FieldError, FieldPath, Validate};
use crate::policy::{named_meta, validate_name, MatchCondition, PolicyKind};

/// A reference from an exception to a policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyRef {
    /// Name of the referenced policy.
    pub name: String,
    /// Kind of the referenced policy.
    pub kind: String,
}

impl PolicyRef {
    /// Creates a reference to a policy.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: PolicyKind) -> Self {
        Self {
            name: name.into(),
            kind: kind.as_str().to_string(),
        }
    }
}

/// Specification of a [`PolicyException`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyExceptionSpec {
    /// Policies this exception applies to.
    #[serde(default)]
    pub policy_refs: Vec<PolicyRef>,

    /// Conditions that must all hold for the exception to apply.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_conditions: Vec<MatchCondition>,

    /// Image references exempted by this exception, exposed as
    /// `exceptions.allowedImages`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,

    /// Free-form values exposed as `exceptions.allowedValues`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<String>,
}

/// An exception to one or more policies.
///
/// # Examples
///
/// ```rust
/// use dike_core::{PolicyException, PolicyKind};
///
/// let exception = PolicyException::new("allow-kube-system")
///     .with_policy_ref("disallow-latest-tag", PolicyKind::ValidatingPolicy)
///     .with_match_condition("system-ns", "object.metadata.namespace == 'kube-system'");
///
/// assert!(exception.applies_to("disallow-latest-tag", PolicyKind::ValidatingPolicy));
/// assert!(!exception.applies_to("disallow-latest-tag", PolicyKind::DeletingPolicy));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyException {
    /// Object metadata.
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Exception specification.
    pub spec: PolicyExceptionSpec,
}

impl PolicyException {
    /// Creates an empty exception with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: named_meta(name),
            spec: PolicyExceptionSpec::default(),
        }
    }

    /// Returns the exception name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Returns the exception namespace, if any.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    /// Returns true if the exception references the given policy.
    #[must_use]
    pub fn applies_to(&self, policy_name: &str, kind: PolicyKind) -> bool {
        self.spec
            .policy_refs
            .iter()
            .any(|r| r.name == policy_name && r.kind == kind.as_str())
    }

    /// Adds a policy reference.
    #[must_use]
    pub fn with_policy_ref(mut self, name: impl Into<String>, kind: PolicyKind) -> Self {
        self.spec.policy_refs.push(PolicyRef::new(name, kind));
        self
    }

    /// Adds a match condition.
    #[must_use]
    pub fn with_match_condition(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.spec.match_conditions.push(MatchCondition::new(name, expression));
        self
    }

    /// Adds an allowed image.
    #[must_use]
    pub fn with_allowed_image(mut self, image: impl Into<String>) -> Self {
        self.spec.images.push(image.into());
        self
    }

    /// Adds an allowed value.
    #[must_use]
    pub fn with_allowed_value(mut self, value: impl Into<String>) -> Self {
        self.spec.allowed_values.push(value.into());
        self
    }
}

impl Validate for PolicyException {
    fn validate(&self) -> Result<(), ErrorList> {
        let mut errors = ErrorList::new();
        validate_name(&self.metadata, &mut errors);

        let refs = FieldPath::new("spec").child("policyRefs");
        if self.spec.policy_refs.is_empty() {
            errors.push(FieldError::required(&refs, "at least one policy reference"));
        }
        for (i, policy_ref) in self.spec.policy_refs.iter().enumerate() {
            if policy_ref.name.is_empty() {
                errors.push(FieldError::required(&refs.index(i).child("name"), ""));
            }
            let known = [
                PolicyKind::ValidatingPolicy,
                PolicyKind::ImageValidatingPolicy,
                PolicyKind::DeletingPolicy,
            ];
            if !known.iter().any(|k| k.as_str() == policy_ref.kind) {
                errors.push(FieldError::not_supported(
                    &refs.index(i).child("kind"),
                    &policy_ref.kind,
                    &known.map(|k| k.as_str()),
                ));
            }
        }
        errors.into_result()
    }
}
