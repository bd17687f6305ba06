//! # Dike CEL
//!
//! A sandboxed, statically typed expression language for Dike policies, and
//! the native function libraries policies call.
//!
//! Expressions go through four stages:
//!
//! - the lexer and parser build a syntax tree
//! - the checker resolves names and overloads against an [`Env`] and infers
//!   a static type, producing an [`Ast`]
//! - [`Env::program`] binds the checked tree to the environment's globals
//! - [`Program::eval`] interprets it against an [`Activation`]
//!
//! ## Example
//!
//! ```rust
//! use dike_cel::{build_base_environment, EnvExtension, MapActivation, Type, Value};
//!
//! let env = build_base_environment()?
//!     .extend(EnvExtension::new().with_variable("name", Type::String))?;
//! let ast = env.compile("sha256(name).startsWith('2c')").expect("valid expression");
//! assert_eq!(ast.output_type(), &Type::Bool);
//!
//! let program = env.program(&ast);
//! let result = program.eval(&MapActivation::new().with("name", "hello"))?;
//! assert_eq!(result, Value::Bool(true));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod activation;
mod ast;
mod checker;
pub mod decls;
pub mod env;
pub mod error;
mod interpreter;
mod lexer;
pub mod libs;
mod parser;
pub mod program;
mod stdlib;
pub mod types;
pub mod value;
pub mod variables;


pub use activation::{Activation, EvalContext, MapActivation};
pub use decls::{Binding, CallContext, Declarations, FunctionDecl, Global, Overload};
pub use env::{build_base_environment, extend_environment, Env, EnvExtension, EnvOptions};
pub use error::{EnvError, EvalError, Issue, Issues, Result};
pub use libs::{HttpClient, HttpContext, HttpMethod, HttpOptions, HttpRequest, Library, ReqwestClient, ResourceOptions};
pub use program::{Ast, Program};
pub use types::{ObjectType, Type};
pub use value::{format_duration, MapKey, ObjectValue, OpaqueValue, Value};
pub use variables::{VariablesProvider, VARIABLES_TYPE};
