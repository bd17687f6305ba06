//! Resource generation through the `generator` variable.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use dike_core::Context;
use tracing::debug;

use crate::decls::{Declarations, Overload};
use crate::error::EvalError;
use crate::libs::receiver;
use crate::stdlib::{arg_list, arg_str};
use crate::types::{ObjectType, Type};
use crate::value::{OpaqueValue, Value};

/// Object type of the `generator` variable.
pub const CONTEXT_TYPE: &str = "generator.Context";

/// Name of the per-evaluation variable.
pub const VARIABLE: &str = "generator";

/// The value behind the `generator` variable.
pub struct GeneratorContext {
    context: Arc<dyn Context>,
}

impl GeneratorContext {
    /// Wraps an evaluation context.
    #[must_use]
    pub fn new(context: Arc<dyn Context>) -> Self {
        Self { context }
    }
}

impl fmt::Debug for GeneratorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorContext").finish_non_exhaustive()
    }
}

impl OpaqueValue for GeneratorContext {
    fn type_name(&self) -> &str {
        CONTEXT_TYPE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn declarations() -> Declarations {
    Declarations::default()
        .with_type(ObjectType::opaque(CONTEXT_TYPE))
        .with_function(
            "Apply",
            vec![Overload::method(
                "generator_apply_string_list",
                vec![
                    Type::object(CONTEXT_TYPE),
                    Type::String,
                    Type::list(Type::map(Type::String, Type::Dyn)),
                ],
                Type::Bool,
                |call, args| {
                    let generator = receiver::<GeneratorContext>(args, CONTEXT_TYPE)?;
                    let namespace = arg_str(args, 1)?;
                    let resources = arg_list(args, 2)?
                        .iter()
                        .map(Value::to_json)
                        .collect::<Result<Vec<_>, EvalError>>()?;
                    call.context.check()?;
                    debug!(namespace, count = resources.len(), "generating resources");
                    generator
                        .context
                        .generate_resources(call.context.cancellation(), namespace, resources)?;
                    Ok(Value::Bool(true))
                },
            )],
        )
}

#[cfg(test)]
mod tests {
    use dike_test::FakeContext;

    use super::*;
    use crate::activation::MapActivation;
    use crate::env::{build_base_environment, EnvExtension};

    #[test]
    fn test_apply_records_resources_in_namespace() {
        let env = build_base_environment()
            .unwrap()
            .extend(EnvExtension::new().with_variable(VARIABLE, Type::object(CONTEXT_TYPE)))
            .unwrap();
        let program = env.program(
            &env.compile(
                "generator.Apply('prod', [{'apiVersion': dyn('v1'), 'kind': dyn('ConfigMap'), 'metadata': dyn({'name': 'cm'})}])",
            )
            .unwrap(),
        );
        let context = Arc::new(FakeContext::new());
        let dyn_context: Arc<dyn Context> = context.clone();
        let activation = MapActivation::new().with(VARIABLE, Value::opaque(GeneratorContext::new(dyn_context)));
        assert_eq!(program.eval(&activation).unwrap(), Value::Bool(true));

        let generated = context.generated_resources();
        assert_eq!(generated.len(), 1);
        assert_eq!(generated[0]["metadata"]["namespace"], "prod");
        assert_eq!(generated[0]["metadata"]["name"], "cm");
    }
}
