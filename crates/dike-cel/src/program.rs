//! Checked expressions and executable programs.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::activation::{Activation, EvalContext};
use crate::checker::Node;
use crate::error::EvalError;
use crate::interpreter;
use crate::types::Type;
use crate::value::Value;

/// A parsed and type-checked expression.
#[derive(Debug, Clone)]
pub struct Ast {
    source: Arc<str>,
    root: Arc<Node>,
}

impl Ast {
    pub(crate) fn new(source: &str, root: Node) -> Self {
        Self {
            source: Arc::from(source),
            root: Arc::new(root),
        }
    }

    /// The static type the expression evaluates to.
    #[must_use]
    pub fn output_type(&self) -> &Type {
        &self.root.ty
    }

    /// The expression source.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// An executable expression.
///
/// Programs are immutable and may be evaluated concurrently from several
/// threads against different activations.
#[derive(Clone)]
pub struct Program {
    source: Arc<str>,
    root: Arc<Node>,
    globals: Arc<HashMap<String, Value>>,
}

impl Program {
    pub(crate) fn new(ast: &Ast, globals: Arc<HashMap<String, Value>>) -> Self {
        Self {
            source: ast.source.clone(),
            root: ast.root.clone(),
            globals,
        }
    }

    /// The expression source.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The static output type.
    #[must_use]
    pub fn output_type(&self) -> &Type {
        &self.root.ty
    }

    /// Evaluates the program. Names resolve against `activation` first and
    /// then against the environment's globals.
    ///
    /// # Errors
    ///
    /// Returns the first runtime error that was not absorbed by a logical
    /// operator or comprehension.
    pub fn eval(&self, activation: &dyn Activation) -> Result<Value, EvalError> {
        activation.eval_context().check()?;
        let scoped = Scoped {
            activation,
            globals: &self.globals,
        };
        interpreter::evaluate(&self.root, &scoped)
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("source", &self.source)
            .field("output_type", &self.root.ty)
            .finish_non_exhaustive()
    }
}

struct Scoped<'a> {
    activation: &'a dyn Activation,
    globals: &'a HashMap<String, Value>,
}

impl Activation for Scoped<'_> {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.activation
            .resolve(name)
            .or_else(|| self.globals.get(name).cloned())
    }

    fn variable(&self, index: usize, name: &str) -> Result<Value, EvalError> {
        self.activation.variable(index, name)
    }

    fn eval_context(&self) -> &EvalContext {
        self.activation.eval_context()
    }
}
