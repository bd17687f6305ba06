//! Cluster resource access through the `resource` variable.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use dike_core::Context;

use crate::decls::{CallContext, Declarations, Overload};
use crate::error::EvalError;
use crate::libs::receiver;
use crate::stdlib::arg_str;
use crate::types::{ObjectType, Type};
use crate::value::{OpaqueValue, Value};

/// Object type of the `resource` variable.
pub const CONTEXT_TYPE: &str = "resource.Context";

/// Name of the per-evaluation variable.
pub const VARIABLE: &str = "resource";

/// Options for the resource library.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceOptions {
    /// Namespace used when a namespaced call passes an empty namespace.
    pub namespace: Option<String>,
}

impl ResourceOptions {
    /// Scopes empty namespace arguments to `namespace`.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// The value behind the `resource` variable.
pub struct ResourceContext {
    context: Arc<dyn Context>,
    options: ResourceOptions,
}

impl ResourceContext {
    /// Wraps an evaluation context.
    #[must_use]
    pub fn new(context: Arc<dyn Context>, options: ResourceOptions) -> Self {
        Self { context, options }
    }

    fn namespace<'a>(&'a self, namespace: &'a str) -> &'a str {
        match &self.options.namespace {
            Some(scope) if namespace.is_empty() => scope,
            _ => namespace,
        }
    }
}

impl fmt::Debug for ResourceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceContext")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl OpaqueValue for ResourceContext {
    fn type_name(&self) -> &str {
        CONTEXT_TYPE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Argument layout of one overload.
#[derive(Clone, Copy)]
enum Scope {
    /// `(apiVersion, resource, namespace, ...)`.
    Namespaced,
    /// `(apiVersion, resource, ...)`.
    Cluster,
}

fn target<'a>(
    call: &CallContext<'_>,
    args: &'a [Value],
    scope: Scope,
) -> Result<(&'a ResourceContext, &'a str, &'a str, &'a str, usize), EvalError> {
    let resource = receiver::<ResourceContext>(args, CONTEXT_TYPE)?;
    let api_version = arg_str(args, 1)?;
    let kind = arg_str(args, 2)?;
    let (namespace, next) = match scope {
        Scope::Namespaced => (resource.namespace(arg_str(args, 3)?), 4),
        Scope::Cluster => ("", 3),
    };
    call.context.check()?;
    Ok((resource, api_version, kind, namespace, next))
}

fn get(call: &CallContext<'_>, args: &[Value], scope: Scope) -> Result<Value, EvalError> {
    let (resource, api_version, kind, namespace, next) = target(call, args, scope)?;
    let name = arg_str(args, next)?;
    let object = resource
        .context
        .get_resource(call.context.cancellation(), api_version, kind, namespace, name)?;
    Ok(Value::from_json(&object))
}

fn list(call: &CallContext<'_>, args: &[Value], scope: Scope, selector: bool) -> Result<Value, EvalError> {
    let (resource, api_version, kind, namespace, next) = target(call, args, scope)?;
    let labels = if selector {
        let entries = args
            .get(next)
            .and_then(Value::as_map)
            .ok_or_else(|| EvalError::invalid_argument(next, "expected label selector map"))?;
        let labels = entries
            .iter()
            .map(|(k, v)| {
                v.as_str()
                    .map(|v| (k.to_string(), v.to_string()))
                    .ok_or_else(|| EvalError::invalid_argument(next, format!("label '{k}' is not a string")))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Some(labels)
    } else {
        None
    };
    let objects = resource
        .context
        .list_resources(call.context.cancellation(), api_version, kind, namespace, labels.as_ref())?;
    Ok(Value::from_json(&objects))
}

fn post(call: &CallContext<'_>, args: &[Value], scope: Scope) -> Result<Value, EvalError> {
    let (resource, api_version, kind, namespace, next) = target(call, args, scope)?;
    let data = args
        .get(next)
        .ok_or_else(|| EvalError::invalid_argument(next, "missing argument"))?
        .to_json()?;
    let object = resource
        .context
        .post_resource(call.context.cancellation(), api_version, kind, namespace, data)?;
    Ok(Value::from_json(&object))
}

pub(crate) fn declarations() -> Declarations {
    let ctx = || Type::object(CONTEXT_TYPE);
    let s = || Type::String;
    let object = || Type::map(Type::String, Type::Dyn);
    Declarations::default()
        .with_type(ObjectType::opaque(CONTEXT_TYPE))
        .with_function(
            "Get",
            vec![
                Overload::method(
                    "resource_get_string_string_string_string",
                    vec![ctx(), s(), s(), s(), s()],
                    object(),
                    |call, args| get(call, args, Scope::Namespaced),
                ),
                Overload::method(
                    "resource_get_string_string_string",
                    vec![ctx(), s(), s(), s()],
                    object(),
                    |call, args| get(call, args, Scope::Cluster),
                ),
            ],
        )
        .with_function(
            "List",
            vec![
                Overload::method(
                    "resource_list_string_string_string",
                    vec![ctx(), s(), s(), s()],
                    object(),
                    |call, args| list(call, args, Scope::Namespaced, false),
                ),
                Overload::method(
                    "resource_list_string_string",
                    vec![ctx(), s(), s()],
                    object(),
                    |call, args| list(call, args, Scope::Cluster, false),
                ),
                Overload::method(
                    "resource_list_string_string_string_map",
                    vec![ctx(), s(), s(), s(), Type::map(Type::String, Type::String)],
                    object(),
                    |call, args| list(call, args, Scope::Namespaced, true),
                ),
            ],
        )
        .with_function(
            "Post",
            vec![
                Overload::method(
                    "resource_post_string_string_string_map",
                    vec![ctx(), s(), s(), s(), object()],
                    object(),
                    |call, args| post(call, args, Scope::Namespaced),
                ),
                Overload::method(
                    "resource_post_string_string_map",
                    vec![ctx(), s(), s(), object()],
                    object(),
                    |call, args| post(call, args, Scope::Cluster),
                ),
            ],
        )
}
