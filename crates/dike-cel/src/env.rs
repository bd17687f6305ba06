//! Compilation environments.
//!
//! An [`Env`] is an immutable set of declarations: variables, object types
//! and function overloads. Environments are built once and shared; deriving
//! a new one with [`Env::extend`] copies the declarations and never touches
//! the parent.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::checker::Checker;
use crate::decls::{Declarations, Global, Overload};
use crate::error::{EnvError, Issues};
use crate::libs::Library;
use crate::parser;
use crate::program::{Ast, Program};
use crate::stdlib;
use crate::types::{ObjectType, Type};
use crate::value::Value;
use crate::variables::VariablesProvider;

/// Checker settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvOptions {
    /// Reject declarations that reference undeclared object types.
    pub eager_declaration_validation: bool,
    /// Evaluate timestamp accessors in UTC only. When disabled, accessors
    /// also accept a fixed-offset time zone argument such as `"+02:00"`.
    pub utc_time: bool,
    /// Require list and map literals to have a single element type.
    pub homogeneous_aggregate_literals: bool,
}

impl Default for EnvOptions {
    fn default() -> Self {
        Self {
            eager_declaration_validation: true,
            utc_time: true,
            homogeneous_aggregate_literals: true,
        }
    }
}

impl EnvOptions {
    /// Sets eager declaration validation.
    #[must_use]
    pub const fn with_eager_declaration_validation(mut self, enabled: bool) -> Self {
        self.eager_declaration_validation = enabled;
        self
    }

    /// Sets UTC-only timestamp accessors.
    #[must_use]
    pub const fn with_utc_time(mut self, enabled: bool) -> Self {
        self.utc_time = enabled;
        self
    }

    /// Sets homogeneous aggregate literal checking.
    #[must_use]
    pub const fn with_homogeneous_aggregate_literals(mut self, enabled: bool) -> Self {
        self.homogeneous_aggregate_literals = enabled;
        self
    }
}

/// Declarations layered onto an environment by [`Env::extend`].
#[derive(Debug, Clone, Default)]
pub struct EnvExtension {
    /// Free variables.
    pub variables: Vec<(String, Type)>,
    /// Object types.
    pub types: Vec<ObjectType>,
    /// Function libraries.
    pub libraries: Vec<Library>,
}

impl EnvExtension {
    /// Creates an empty extension.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a variable.
    #[must_use]
    pub fn with_variable(mut self, name: &str, ty: Type) -> Self {
        self.variables.push((name.to_string(), ty));
        self
    }

    /// Declares an object type.
    #[must_use]
    pub fn with_type(mut self, ty: ObjectType) -> Self {
        self.types.push(ty);
        self
    }

    /// Adds a library.
    #[must_use]
    pub fn with_library(mut self, library: Library) -> Self {
        self.libraries.push(library);
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct EnvState {
    pub options: EnvOptions,
    pub variables: BTreeMap<String, Type>,
    pub types: BTreeMap<String, ObjectType>,
    pub functions: HashMap<String, Vec<Arc<Overload>>>,
    pub globals: HashMap<String, Value>,
    pub libraries: Vec<Library>,
}

impl EnvState {
    fn declare_variable(&mut self, name: &str, ty: Type) -> Result<(), EnvError> {
        match self.variables.get(name) {
            Some(existing) if *existing == ty => Ok(()),
            Some(existing) => Err(EnvError::VariableConflict {
                name: name.to_string(),
                existing: existing.to_string(),
                declared: ty.to_string(),
            }),
            None => {
                self.variables.insert(name.to_string(), ty);
                Ok(())
            }
        }
    }

    fn declare_type(&mut self, ty: ObjectType) -> Result<(), EnvError> {
        match self.types.get(ty.name()) {
            Some(existing) if *existing == ty => Ok(()),
            Some(_) => Err(EnvError::TypeConflict {
                name: ty.name().to_string(),
            }),
            None => {
                self.types.insert(ty.name().to_string(), ty);
                Ok(())
            }
        }
    }

    fn declare_overload(&mut self, function: &str, overload: Overload) -> Result<(), EnvError> {
        let overloads = self.functions.entry(function.to_string()).or_default();
        for existing in overloads.iter() {
            if existing.id == overload.id {
                if existing.same_signature(&overload) && existing.result == overload.result {
                    return Ok(());
                }
                return Err(EnvError::DuplicateOverload { id: overload.id });
            }
            if existing.same_signature(&overload) {
                return Err(EnvError::OverloadCollision {
                    function: function.to_string(),
                    id: overload.id,
                    existing: existing.id.clone(),
                });
            }
        }
        overloads.push(Arc::new(overload));
        Ok(())
    }

    fn declare(&mut self, declarations: Declarations) -> Result<(), EnvError> {
        for ty in declarations.types {
            self.declare_type(ty)?;
        }
        for function in declarations.functions {
            for overload in function.overloads {
                self.declare_overload(&function.name, overload)?;
            }
        }
        Ok(())
    }

    fn declare_global(&mut self, global: Global) -> Result<(), EnvError> {
        self.declare_variable(&global.name, global.ty)?;
        self.globals.insert(global.name, global.value);
        Ok(())
    }

    fn add_library(&mut self, library: Library) -> Result<(), EnvError> {
        if self.libraries.contains(&library) {
            return Ok(());
        }
        debug!(library = library.name(), "adding library");
        self.declare(library.compile_declarations())?;
        for global in library.program_globals() {
            self.declare_global(global)?;
        }
        self.libraries.push(library);
        Ok(())
    }

    /// Checks that every referenced object type is declared.
    fn validate(&self) -> Result<(), EnvError> {
        let check = |ty: &Type, referrer: &dyn Fn() -> String| {
            let mut names = Vec::new();
            ty.object_names(&mut names);
            names
                .into_iter()
                .find(|name| !self.types.contains_key(name.as_ref()))
                .map_or(Ok(()), |name| {
                    Err(EnvError::UnknownType {
                        name: name.to_string(),
                        referrer: referrer(),
                    })
                })
        };
        for (name, ty) in &self.variables {
            check(ty, &|| format!("variable '{name}'"))?;
        }
        for object in self.types.values() {
            for field in object.field_types() {
                check(field, &|| format!("type '{}'", object.name()))?;
            }
        }
        for overloads in self.functions.values() {
            for overload in overloads {
                for ty in overload.params.iter().chain(std::iter::once(&overload.result)) {
                    check(ty, &|| format!("overload '{}'", overload.id))?;
                }
            }
        }
        Ok(())
    }
}

/// An immutable compilation environment.
///
/// # Examples
///
/// ```
/// use dike_cel::{build_base_environment, EnvExtension, MapActivation, Type, Value};
///
/// let base = build_base_environment().unwrap();
/// let env = base
///     .extend(EnvExtension::new().with_variable("object", Type::Dyn))
///     .unwrap();
///
/// let ast = env.compile("object.metadata.name.startsWith('web')").unwrap();
/// assert_eq!(ast.output_type(), &Type::Bool);
///
/// let program = env.program(&ast);
/// let object = serde_json::json!({"metadata": {"name": "web-1"}});
/// let activation = MapActivation::new().with("object", object);
/// assert_eq!(program.eval(&activation).unwrap(), Value::Bool(true));
/// ```
#[derive(Debug, Clone)]
pub struct Env {
    inner: Arc<EnvState>,
}

impl Env {
    /// Creates an environment with the standard library only.
    ///
    /// # Errors
    ///
    /// Returns an [`EnvError`] if the standard declarations are malformed.
    pub fn new(options: EnvOptions) -> Result<Self, EnvError> {
        let mut state = EnvState {
            options,
            variables: BTreeMap::new(),
            types: BTreeMap::new(),
            functions: HashMap::new(),
            globals: HashMap::new(),
            libraries: Vec::new(),
        };
        state.declare(stdlib::declarations(&options))?;
        for global in stdlib::globals() {
            state.declare_global(global)?;
        }
        if options.eager_declaration_validation {
            state.validate()?;
        }
        Ok(Self {
            inner: Arc::new(state),
        })
    }

    /// Derives a new environment with additional declarations.
    ///
    /// Redeclaring an identical variable, type or overload is a no-op, so
    /// extending in several steps yields the same environment as extending
    /// once with the union.
    ///
    /// # Errors
    ///
    /// Returns an [`EnvError`] for conflicting or dangling declarations.
    pub fn extend(&self, extension: EnvExtension) -> Result<Self, EnvError> {
        let mut state = (*self.inner).clone();
        for ty in extension.types {
            state.declare_type(ty)?;
        }
        for library in extension.libraries {
            state.add_library(library)?;
        }
        for (name, ty) in extension.variables {
            state.declare_variable(&name, ty)?;
        }
        if state.options.eager_declaration_validation {
            state.validate()?;
        }
        Ok(Self {
            inner: Arc::new(state),
        })
    }

    /// Returns the checker options.
    #[must_use]
    pub fn options(&self) -> &EnvOptions {
        &self.inner.options
    }

    /// Returns the declared type of a variable.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&Type> {
        self.inner.variables.get(name)
    }

    /// Returns a declared object type.
    #[must_use]
    pub fn object_type(&self, name: &str) -> Option<&ObjectType> {
        self.inner.types.get(name)
    }

    /// Returns true if a function with this name is declared.
    #[must_use]
    pub fn has_function(&self, name: &str) -> bool {
        self.inner.functions.contains_key(name)
    }

    /// Returns the libraries added to this environment, in order.
    #[must_use]
    pub fn libraries(&self) -> &[Library] {
        &self.inner.libraries
    }

    /// Parses and type-checks an expression.
    ///
    /// # Errors
    ///
    /// Returns the parse or check diagnostics.
    pub fn compile(&self, source: &str) -> Result<Ast, Issues> {
        self.check(source, None)
    }

    /// Parses and type-checks an expression that may reference
    /// `variables.<name>` for the variables registered in `provider`.
    ///
    /// # Errors
    ///
    /// Returns the parse or check diagnostics.
    pub fn compile_with_variables(
        &self,
        source: &str,
        provider: &VariablesProvider,
    ) -> Result<Ast, Issues> {
        self.check(source, Some(provider))
    }

    fn check(&self, source: &str, provider: Option<&VariablesProvider>) -> Result<Ast, Issues> {
        let expr = parser::parse(source).map_err(|e| Issues::new(source, vec![e]))?;
        let root = Checker::new(&self.inner, provider)
            .check(&expr)
            .map_err(|errors| Issues::new(source, errors))?;
        Ok(Ast::new(source, root))
    }

    /// Creates an executable program from a checked expression.
    #[must_use]
    pub fn program(&self, ast: &Ast) -> Program {
        Program::new(ast, Arc::new(self.inner.globals.clone()))
    }
}

/// Builds the base environment: the standard library and every function
/// library, with default options.
///
/// # Errors
///
/// Returns an [`EnvError`] if library declarations conflict.
pub fn build_base_environment() -> Result<Env, EnvError> {
    Env::new(EnvOptions::default())?.extend(EnvExtension {
        libraries: Library::all(),
        ..EnvExtension::default()
    })
}

/// Derives an environment with policy-specific declarations.
///
/// # Errors
///
/// Returns an [`EnvError`] for conflicting or dangling declarations.
pub fn extend_environment(
    base: &Env,
    variables: Vec<(String, Type)>,
    types: Vec<ObjectType>,
    libraries: Vec<Library>,
) -> Result<Env, EnvError> {
    base.extend(EnvExtension {
        variables,
        types,
        libraries,
    })
}
