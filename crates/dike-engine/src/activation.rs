//! Per-evaluation bindings with lazily resolved policy variables.
//!
//! A [`PolicyActivation`] binds the free variables of one evaluation and
//! serves `variables.<name>` references by index. Each variable is
//! evaluated the first time it is referenced and its outcome, value or
//! error, is memoized for the rest of the evaluation.

use std::collections::HashMap;
use std::sync::Arc;

use dike_cel::{Activation, EvalContext, EvalError, Library, Value};
use dike_compiler::CompiledVariable;
use dike_core::Context;
use once_cell::unsync::OnceCell;

/// Bindings of one policy evaluation.
pub struct PolicyActivation<'p> {
    bindings: HashMap<&'static str, Value>,
    variables: &'p [CompiledVariable],
    resolved: Vec<OnceCell<Result<Value, EvalError>>>,
    context: EvalContext,
}

impl<'p> PolicyActivation<'p> {
    /// Creates an activation over `variables` with no bindings.
    #[must_use]
    pub fn new(variables: &'p [CompiledVariable], context: EvalContext) -> Self {
        Self {
            bindings: HashMap::new(),
            variables,
            resolved: std::iter::repeat_with(OnceCell::new).take(variables.len()).collect(),
            context,
        }
    }

    /// Binds a free variable.
    pub fn bind(&mut self, name: &'static str, value: impl Into<Value>) {
        self.bindings.insert(name, value.into());
    }

    /// Binds a free variable.
    #[must_use]
    pub fn with(mut self, name: &'static str, value: impl Into<Value>) -> Self {
        self.bind(name, value);
        self
    }

    /// Binds the context-backed variable of every library that declares one.
    #[must_use]
    pub fn with_libraries(mut self, libraries: &[Library], context: &Arc<dyn Context>) -> Self {
        for library in libraries {
            if let Some((name, value)) = library.context_binding(context) {
                self.bind(name, value);
            }
        }
        self
    }

    /// Returns true if the variable at `index` has been evaluated.
    #[must_use]
    pub fn is_resolved(&self, index: usize) -> bool {
        self.resolved.get(index).is_some_and(|cell| cell.get().is_some())
    }
}

impl Activation for PolicyActivation<'_> {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.bindings.get(name).cloned()
    }

    fn variable(&self, index: usize, name: &str) -> Result<Value, EvalError> {
        let (Some(variable), Some(cell)) = (self.variables.get(index), self.resolved.get(index)) else {
            return Err(EvalError::NoSuchAttribute(format!("variables.{name}")));
        };
        cell.get_or_init(|| variable.program.eval(self)).clone()
    }

    fn eval_context(&self) -> &EvalContext {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use dike_compiler::PolicyCompiler;
    use dike_core::{ValidatingPolicy, Validation};
    use serde_json::json;

    use super::*;

    fn compile(policy: &ValidatingPolicy) -> dike_compiler::CompiledPolicy {
        PolicyCompiler::new().unwrap().compile_validating(policy, &[]).unwrap()
    }

    #[test]
    fn test_variables_resolve_lazily() {
        let policy = compile(
            &ValidatingPolicy::new("p")
                .with_variable("name", "object.metadata.name")
                .with_variable("boom", "1 / 0")
                .with_validation(Validation::new("variables.name == 'web'")),
        );
        let activation = PolicyActivation::new(&policy.variables, EvalContext::new())
            .with("object", Value::from(json!({"metadata": {"name": "web"}})));

        assert!(!activation.is_resolved(0));
        let result = policy.validations[0].program.eval(&activation).unwrap();
        assert_eq!(result, Value::Bool(true));
        assert!(activation.is_resolved(0));
        assert!(!activation.is_resolved(1));
    }

    #[test]
    fn test_variable_errors_are_memoized() {
        let policy = compile(
            &ValidatingPolicy::new("p")
                .with_variable("boom", "1 / 0")
                .with_validation(Validation::new("variables.boom > 0")),
        );
        let activation = PolicyActivation::new(&policy.variables, EvalContext::new());
        assert_eq!(activation.variable(0, "boom"), Err(EvalError::DivisionByZero));
        assert!(activation.is_resolved(0));
        assert_eq!(activation.variable(0, "boom"), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn test_unknown_variable_index() {
        let activation = PolicyActivation::new(&[], EvalContext::new());
        assert_eq!(
            activation.variable(3, "ghost"),
            Err(EvalError::NoSuchAttribute("variables.ghost".to_string()))
        );
    }

    #[test]
    fn test_later_variables_reuse_earlier_values() {
        let policy = compile(
            &ValidatingPolicy::new("p")
                .with_variable("base", "object.replicas")
                .with_variable("double", "variables.base * 2")
                .with_validation(Validation::new("variables.double == 6")),
        );
        let activation = PolicyActivation::new(&policy.variables, EvalContext::new())
            .with("object", Value::from(json!({"replicas": 3})));
        assert_eq!(policy.validations[0].program.eval(&activation).unwrap(), Value::Bool(true));
        assert!(activation.is_resolved(0));
        assert!(activation.is_resolved(1));
    }
}
