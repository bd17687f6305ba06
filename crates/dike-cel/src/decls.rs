//! Function, type and global declarations.

use std::fmt;
use std::sync::Arc;

use crate::activation::EvalContext;
use crate::error::EvalError;
use crate::types::{ObjectType, Type};
use crate::value::Value;

/// Call-site information passed to native bindings.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    /// Name of the function being called.
    pub function: &'a str,
    /// Cancellation state of the evaluation.
    pub context: &'a EvalContext,
}

/// A native function implementation.
///
/// Member overloads receive the receiver as the first argument.
pub type Binding = Arc<dyn Fn(&CallContext<'_>, &[Value]) -> Result<Value, EvalError> + Send + Sync>;

/// One typed signature of a function and its implementation.
#[derive(Clone)]
pub struct Overload {
    /// Unique identifier, e.g. `string_starts_with_string`.
    pub id: String,
    /// Called as `receiver.f(args)` rather than `f(args)`.
    pub member: bool,
    /// Parameter types, receiver first for member overloads.
    pub params: Vec<Type>,
    /// Result type.
    pub result: Type,
    /// Implementation.
    pub binding: Binding,
}

impl Overload {
    /// Declares a free function overload.
    pub fn function<F>(id: &str, params: Vec<Type>, result: Type, f: F) -> Self
    where
        F: Fn(&CallContext<'_>, &[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        Self {
            id: id.to_string(),
            member: false,
            params,
            result,
            binding: Arc::new(f),
        }
    }

    /// Declares a member overload.
    pub fn method<F>(id: &str, params: Vec<Type>, result: Type, f: F) -> Self
    where
        F: Fn(&CallContext<'_>, &[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        Self {
            member: true,
            ..Self::function(id, params, result, f)
        }
    }

    /// Returns true if the runtime arguments fit the parameter types.
    #[must_use]
    pub fn matches_args(&self, args: &[Value]) -> bool {
        self.params.len() == args.len() && self.params.iter().zip(args).all(|(p, a)| a.matches(p))
    }

    pub(crate) fn same_signature(&self, other: &Self) -> bool {
        self.member == other.member && self.params == other.params
    }
}

impl fmt::Debug for Overload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Overload")
            .field("id", &self.id)
            .field("member", &self.member)
            .field("params", &self.params)
            .field("result", &self.result)
            .finish_non_exhaustive()
    }
}

/// A named function with its overloads.
#[derive(Debug, Clone)]
pub struct FunctionDecl {
    /// Function name.
    pub name: String,
    /// Overloads.
    pub overloads: Vec<Overload>,
}

impl FunctionDecl {
    /// Creates a function declaration.
    #[must_use]
    pub fn new(name: &str, overloads: Vec<Overload>) -> Self {
        Self {
            name: name.to_string(),
            overloads,
        }
    }
}

/// A constant bound into every program of an environment.
#[derive(Debug, Clone)]
pub struct Global {
    /// Identifier.
    pub name: String,
    /// Declared type.
    pub ty: Type,
    /// Value.
    pub value: Value,
}

impl Global {
    /// Creates a global.
    #[must_use]
    pub fn new(name: &str, ty: Type, value: Value) -> Self {
        Self {
            name: name.to_string(),
            ty,
            value,
        }
    }
}

/// The compile-time surface a library contributes.
#[derive(Debug, Clone, Default)]
pub struct Declarations {
    /// Object types.
    pub types: Vec<ObjectType>,
    /// Functions.
    pub functions: Vec<FunctionDecl>,
}

impl Declarations {
    /// Adds a type.
    #[must_use]
    pub fn with_type(mut self, ty: ObjectType) -> Self {
        self.types.push(ty);
        self
    }

    /// Adds a function.
    #[must_use]
    pub fn with_function(mut self, name: &str, overloads: Vec<Overload>) -> Self {
        self.functions.push(FunctionDecl::new(name, overloads));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &CallContext<'_>, _: &[Value]) -> Result<Value, EvalError> {
        Ok(Value::Null)
    }

    #[test]
    fn test_matches_args() {
        let overload = Overload::function("f_string_int", vec![Type::String, Type::Int], Type::Null, noop);
        assert!(overload.matches_args(&[Value::from("a"), Value::Int(1)]));
        assert!(!overload.matches_args(&[Value::from("a")]));
        assert!(!overload.matches_args(&[Value::Int(1), Value::Int(1)]));
    }

    #[test]
    fn test_same_signature_considers_member_flag() {
        let free = Overload::function("a", vec![Type::String], Type::Int, noop);
        let member = Overload::method("b", vec![Type::String], Type::Int, noop);
        assert!(!free.same_signature(&member));
        assert!(free.same_signature(&Overload::function("c", vec![Type::String], Type::Bool, noop)));
    }
}
