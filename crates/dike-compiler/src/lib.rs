//! # Dike Compiler
//!
//! Turns policy specifications into executable programs.
//!
//! Each policy kind compiles against its own [`environment`]: the base
//! expression environment plus the variables that kind binds when it is
//! evaluated. Compilation validates the policy structurally, then compiles
//! its stages in order and stops at the first stage that fails, reporting
//! every error of that stage with its field path.
//!
//! ## Example
//!
//! ```rust
//! use dike_compiler::PolicyCompiler;
//! use dike_core::{ValidatingPolicy, Validation};
//!
//! let compiler = PolicyCompiler::new()?;
//! let policy = ValidatingPolicy::new("no-latest")
//!     .with_validation(Validation::new("!object.spec.containers.exists(c, c.image.endsWith(':latest'))"));
//!
//! let compiled = compiler.compile_validating(&policy, &[])?;
//! assert_eq!(compiled.name, "no-latest");
//!
//! let broken = ValidatingPolicy::new("broken").with_validation(Validation::new("'yes'"));
//! let err = compiler.compile_validating(&broken, &[]).unwrap_err();
//! assert!(err.to_string().starts_with("policy broken is invalid"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod compile;
pub mod compiler;
pub mod environment;
pub mod error;
pub mod extractors;
pub mod image_match;
pub mod policy;

#[cfg(test)]
mod proptest_tests;

pub use compiler::PolicyCompiler;
pub use environment::{Environments, PolicyEnv};
pub use error::{CompilerError, Result};
pub use image_match::{GlobError, ImageGlob, ImageMatcher};
pub use policy::{
    CompiledException, CompiledImageExtractor, CompiledMatchCondition, CompiledPolicy, CompiledValidation,
    CompiledVariable, ResourceClass,
};
