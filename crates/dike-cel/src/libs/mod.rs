//! Native function libraries.
//!
//! Each [`Library`] contributes compile-time declarations (types and
//! overloads) and optional program globals. Libraries that reach the outside
//! world through a [`Context`] also produce a per-evaluation binding via
//! [`Library::context_binding`].

use std::any::Any;
use std::sync::Arc;

use dike_core::Context;

use crate::decls::{Declarations, Global};
use crate::types::Type;
use crate::value::{OpaqueValue, Value};

pub mod generator;
pub mod globalcontext;
pub mod hash;
pub mod http;
pub mod image;
pub mod imagedata;
pub mod json;
pub mod math;
pub mod random;
pub mod resource;
pub mod time;
pub mod transform;
pub mod user;
pub mod x509;
pub mod yaml;

pub use http::{HttpClient, HttpContext, HttpMethod, HttpOptions, HttpRequest, ReqwestClient};
pub use resource::ResourceOptions;

/// A function library that can be added to an environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Library {
    /// `sha1`, `sha256`, `md5`.
    Hash,
    /// `math.round`, `round`.
    Math,
    /// `random`.
    Random,
    /// The `http` global.
    Http(HttpOptions),
    /// Image reference parsing.
    Image,
    /// The `image` variable for image metadata.
    ImageData,
    /// The `resource` variable.
    Resource(ResourceOptions),
    /// The `globalContext` variable.
    GlobalContext,
    /// `json.unmarshal`.
    Json,
    /// `yaml.parse`.
    Yaml,
    /// `x509.decode`.
    X509,
    /// `parseServiceAccount`.
    User,
    /// `time.now`, `time.truncate`, `time.toCron`.
    Time,
    /// `listObjToMap`.
    Transform,
    /// The `generator` variable.
    Generator,
}

impl Library {
    /// Every library with default options.
    #[must_use]
    pub fn all() -> Vec<Self> {
        vec![
            Self::Hash,
            Self::Math,
            Self::Random,
            Self::Http(HttpOptions::default()),
            Self::Image,
            Self::ImageData,
            Self::Resource(ResourceOptions::default()),
            Self::GlobalContext,
            Self::Json,
            Self::Yaml,
            Self::X509,
            Self::User,
            Self::Time,
            Self::Transform,
            Self::Generator,
        ]
    }

    /// The library's namespace identifier.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Hash => "hash",
            Self::Math => "math",
            Self::Random => "random",
            Self::Http(_) => "http",
            Self::Image => "image",
            Self::ImageData => "imagedata",
            Self::Resource(_) => "resource",
            Self::GlobalContext => "globalcontext",
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::X509 => "x509",
            Self::User => "user",
            Self::Time => "time",
            Self::Transform => "transform",
            Self::Generator => "generator",
        }
    }

    /// Types and overloads the library declares.
    #[must_use]
    pub fn compile_declarations(&self) -> Declarations {
        match self {
            Self::Hash => hash::declarations(),
            Self::Math => math::declarations(),
            Self::Random => random::declarations(),
            Self::Http(_) => http::declarations(),
            Self::Image => image::declarations(),
            Self::ImageData => imagedata::declarations(),
            Self::Resource(_) => resource::declarations(),
            Self::GlobalContext => globalcontext::declarations(),
            Self::Json => json::declarations(),
            Self::Yaml => yaml::declarations(),
            Self::X509 => x509::declarations(),
            Self::User => user::declarations(),
            Self::Time => time::declarations(),
            Self::Transform => transform::declarations(),
            Self::Generator => generator::declarations(),
        }
    }

    /// Constants bound into every program.
    #[must_use]
    pub fn program_globals(&self) -> Vec<Global> {
        match self {
            Self::Math => vec![namespace_global("math", math::NAMESPACE_TYPE)],
            Self::Http(options) => vec![http::global(options)],
            Self::Json => vec![namespace_global("json", json::NAMESPACE_TYPE)],
            Self::Yaml => vec![namespace_global("yaml", yaml::NAMESPACE_TYPE)],
            Self::X509 => vec![namespace_global("x509", x509::NAMESPACE_TYPE)],
            Self::Time => vec![namespace_global("time", time::NAMESPACE_TYPE)],
            _ => Vec::new(),
        }
    }

    /// The variable name and value this library binds for one evaluation,
    /// for libraries backed by a [`Context`].
    #[must_use]
    pub fn context_binding(&self, context: &Arc<dyn Context>) -> Option<(&'static str, Value)> {
        match self {
            Self::ImageData => Some((
                imagedata::VARIABLE,
                Value::opaque(imagedata::ImageDataContext::new(context.clone())),
            )),
            Self::Resource(options) => Some((
                resource::VARIABLE,
                Value::opaque(resource::ResourceContext::new(context.clone(), options.clone())),
            )),
            Self::GlobalContext => Some((
                globalcontext::VARIABLE,
                Value::opaque(globalcontext::GlobalContext::new(context.clone())),
            )),
            Self::Generator => Some((
                generator::VARIABLE,
                Value::opaque(generator::GeneratorContext::new(context.clone())),
            )),
            _ => None,
        }
    }

    /// The declared type of the variable bound by [`Library::context_binding`].
    #[must_use]
    pub fn context_variable(&self) -> Option<(&'static str, Type)> {
        match self {
            Self::ImageData => Some((imagedata::VARIABLE, Type::object(imagedata::CONTEXT_TYPE))),
            Self::Resource(_) => Some((resource::VARIABLE, Type::object(resource::CONTEXT_TYPE))),
            Self::GlobalContext => Some((globalcontext::VARIABLE, Type::object(globalcontext::CONTEXT_TYPE))),
            Self::Generator => Some((generator::VARIABLE, Type::object(generator::CONTEXT_TYPE))),
            _ => None,
        }
    }
}

/// The receiver of namespaced calls such as `json.unmarshal(s)`.
#[derive(Debug)]
pub(crate) struct Namespace(&'static str);

impl OpaqueValue for Namespace {
    fn type_name(&self) -> &str {
        self.0
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn equals(&self, other: &dyn OpaqueValue) -> bool {
        other.type_name() == self.0
    }
}

fn namespace_global(name: &str, type_name: &'static str) -> Global {
    Global::new(name, Type::object(type_name), Value::opaque(Namespace(type_name)))
}

/// Downcasts the receiver of a member overload.
pub(crate) fn receiver<'a, T: OpaqueValue>(args: &'a [Value], type_name: &str) -> crate::error::Result<&'a T> {
    args.first()
        .and_then(Value::as_opaque::<T>)
        .ok_or_else(|| crate::error::EvalError::invalid_argument(0, format!("expected {type_name}")))
}
