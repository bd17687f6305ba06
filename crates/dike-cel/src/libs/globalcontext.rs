//! Global-context entry lookups through the `globalContext` variable.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use dike_core::Context;

use crate::decls::{CallContext, Declarations, Overload};
use crate::error::EvalError;
use crate::libs::receiver;
use crate::stdlib::arg_str;
use crate::types::{ObjectType, Type};
use crate::value::{OpaqueValue, Value};

/// Object type of the `globalContext` variable.
pub const CONTEXT_TYPE: &str = "globalcontext.Context";

/// Name of the per-evaluation variable.
pub const VARIABLE: &str = "globalContext";

/// The value behind the `globalContext` variable.
pub struct GlobalContext {
    context: Arc<dyn Context>,
}

impl GlobalContext {
    /// Wraps an evaluation context.
    #[must_use]
    pub fn new(context: Arc<dyn Context>) -> Self {
        Self { context }
    }
}

impl fmt::Debug for GlobalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalContext").finish_non_exhaustive()
    }
}

impl OpaqueValue for GlobalContext {
    fn type_name(&self) -> &str {
        CONTEXT_TYPE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn lookup(call: &CallContext<'_>, args: &[Value], projection: &str) -> Result<Value, EvalError> {
    let global = receiver::<GlobalContext>(args, CONTEXT_TYPE)?;
    let name = arg_str(args, 1)?;
    call.context.check()?;
    Ok(global
        .context
        .get_global_reference(call.context.cancellation(), name, projection)?
        .map_or(Value::Null, |v| Value::from_json(&v)))
}

pub(crate) fn declarations() -> Declarations {
    let ctx = || Type::object(CONTEXT_TYPE);
    Declarations::default()
        .with_type(ObjectType::opaque(CONTEXT_TYPE))
        .with_function(
            "Get",
            vec![
                Overload::method("globalcontext_get_string", vec![ctx(), Type::String], Type::Dyn, |call, args| {
                    lookup(call, args, "")
                }),
                Overload::method(
                    "globalcontext_get_string_string",
                    vec![ctx(), Type::String, Type::String],
                    Type::Dyn,
                    |call, args| lookup(call, args, arg_str(args, 2)?),
                ),
            ],
        )
}
