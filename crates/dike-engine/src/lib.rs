//! # Dike Engine
//!
//! Evaluates compiled policies against admission requests, JSON payloads
//! and existing resources.
//!
//! The engine keeps compiled policies in a [`PolicyCache`], replaced
//! wholesale whenever a policy changes, and evaluates each policy
//! independently:
//!
//! 1. check `matchConstraints`; a request outside them skips the policy
//! 2. bind `object`, `oldObject`, `request`, `namespaceObject` and the
//!    context-backed libraries
//! 3. evaluate exceptions; a matching exception skips the policy
//! 4. evaluate match conditions
//! 5. run validations in order until the first failure, resolving
//!    `variables.<name>` lazily
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use dike_core::{ValidatingPolicy, Validation};
//! use dike_engine::{Engine, Outcome};
//! use dike_test::{create_request, FakeContext, PodBuilder};
//!
//! let engine = Engine::new(Arc::new(FakeContext::new()))?;
//! engine.install_validating(
//!     &ValidatingPolicy::new("no-latest").with_validation(
//!         Validation::new("object.spec.containers.all(c, !c.image.endsWith(':latest'))")
//!             .with_message("latest tag is not allowed"),
//!     ),
//!     &[],
//! )?;
//!
//! let pod = PodBuilder::new("web").container("nginx", "nginx:latest").build();
//! let response = engine.handle(&create_request(pod), None);
//! let result = response.policy("no-latest").unwrap();
//! assert_eq!(result.outcome, Outcome::Fail);
//! assert_eq!(result.message, "latest tag is not allowed");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod activation;
pub mod bindings;
pub mod cache;
pub mod config;
pub mod constraints;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod matching;

#[cfg(test)]
mod proptest_tests;

pub use activation::PolicyActivation;
pub use cache::{CacheEntry, PolicyCache, PolicyKey};
pub use config::EngineConfig;
pub use constraints::{constraints_match, rule_matches, selector_matches};
pub use engine::{Engine, EngineResponse, Outcome, PolicyResponse};
pub use error::{ConditionError, EngineError, MatchError, Result};
pub use evaluator::{EvaluationResult, Evaluator};
pub use matching::{as_bool, match_conditions, matched_exceptions};
