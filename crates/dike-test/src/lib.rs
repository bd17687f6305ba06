//! # Dike Test
//!
//! Test doubles and fixtures for Dike policies.
//!
//! - [`FakeContext`] - an in-memory [`dike_core::Context`]
//! - [`fixtures`] - Pod, controller and admission-request builders
//!
//! ## Example
//!
//! ```rust
//! use dike_core::{Cancellation, Context};
//! use dike_test::FakeContext;
//! use serde_json::json;
//!
//! let context = FakeContext::new()
//!     .with_image_data("nginx:1.25", json!({"config": {"User": "nginx"}}))
//!     .with_global_reference("registries", "", json!(["ghcr.io"]));
//!
//! let cancel = Cancellation::new();
//! assert!(context.get_image_data(&cancel, "nginx:1.25").is_ok());
//! assert_eq!(
//!     context.get_global_reference(&cancel, "registries", "").unwrap(),
//!     Some(json!(["ghcr.io"]))
//! );
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fake_context;
pub mod fixtures;

pub use fake_context::FakeContext;
pub use fixtures::{create_request, delete_request, namespace, update_request, user, PodBuilder};
