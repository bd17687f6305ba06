//! # Dike Core
//!
//! Core types and traits for the Dike expression-policy engine.
//!
//! This crate provides the data structures shared by the compiler and the
//! evaluation engine:
//!
//! - [`ValidatingPolicy`], [`ImageValidatingPolicy`], [`DeletingPolicy`] - policy specifications
//! - [`PolicyException`] - named overrides attached to policies
//! - [`FieldPath`], [`FieldError`], [`ErrorList`] - field-indexed diagnostics
//! - [`AdmissionRequest`] - the request under admission
//! - [`Context`] - the capability interface injected into evaluations
//!
//! ## Example
//!
//! ```rust
//! use dike_core::{FieldPath, ValidatingPolicy, Validate, Validation};
//!
//! let policy = ValidatingPolicy::new("no-latest")
//!     .with_match_condition("is-pod", "object.kind == 'Pod'")
//!     .with_validation(
//!         Validation::new("object.spec.containers.all(c, !c.image.endsWith(':latest'))")
//!             .with_message("images must not use the latest tag"),
//!     );
//!
//! assert!(policy.validate().is_ok());
//!
//! let path = FieldPath::new("spec").child("validations").index(0);
//! assert_eq!(path.to_string(), "spec.validations[0]");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admission;
pub mod context;
pub mod error;
pub mod exception;
pub mod field;
pub mod policy;


// Re-export main types at crate root
pub use admission::{AdmissionRequest, GroupVersionKind, GroupVersionResource, Operation};
pub use context::{Cancellation, Context, ContextError, GenerateContext};
pub use error::{Error, Result};
pub use exception::{PolicyException, PolicyExceptionSpec, PolicyRef};
pub use field::{ErrorList, FieldError, FieldErrorKind, FieldPath, Validate};
pub use policy::{
    is_identifier, AuditAnnotation, DeletingPolicy, DeletingPolicySpec, EvaluationConfiguration,
    EvaluationMode, FailurePolicy, ImageExtractor, ImageValidatingPolicy, ImageValidatingPolicySpec,
    MatchCondition, MatchImageReference, PolicyKind, ValidatingPolicy, ValidatingPolicySpec, Validation, Variable,
};

// Kubernetes types that appear in public signatures
pub use k8s_openapi::api::admissionregistration::v1::{MatchResources, NamedRuleWithOperations};
pub use k8s_openapi::api::authentication::v1::UserInfo;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
pub use k8s_openapi::api::core::v1::Namespace;
