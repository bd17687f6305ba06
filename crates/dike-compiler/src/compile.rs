//! Compilation of individual policy expressions.
//!
//! Each function compiles one list of expressions against an environment and
//! checks the output type against the slot it fills. Diagnostics are anchored
//! to the field the expression came from, e.g.
//! `spec.validations[2].messageExpression`.

use std::collections::BTreeMap;

use dike_cel::{Ast, Env, Program, Type, VariablesProvider};
use dike_core::{
    AuditAnnotation, ErrorList, FieldError, FieldPath, GroupVersionResource, ImageExtractor, MatchCondition,
    MatchImageReference, Validation, Variable,
};

use crate::extractors::default_extractors;
use crate::image_match::{ImageGlob, ImageMatcher};
use crate::policy::{CompiledImageExtractor, CompiledMatchCondition, CompiledValidation, CompiledVariable};

/// The output type an expression slot accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expected {
    Bool,
    String,
    StringOrNull,
    StringList,
    Any,
}

impl Expected {
    fn check(self, ty: &Type) -> Option<String> {
        let ok = match self {
            Self::Bool => ty == &Type::Bool,
            Self::String => ty == &Type::String,
            Self::StringOrNull => matches!(ty, Type::String | Type::Null),
            Self::StringList => Type::list(Type::String).is_assignable_from(ty),
            Self::Any => true,
        };
        if ok {
            return None;
        }
        Some(match self {
            Self::StringOrNull => format!(
                "output is expected to be either of type {} or {}",
                Type::String,
                Type::Null
            ),
            Self::StringList => format!("output is expected to be of type {}", Type::list(Type::String)),
            Self::Bool => format!("output is expected to be of type {}", Type::Bool),
            Self::String | Self::Any => format!("output is expected to be of type {}", Type::String),
        })
    }
}

fn compile_ast(
    path: &FieldPath,
    env: &Env,
    provider: Option<&VariablesProvider>,
    source: &str,
    expected: Expected,
) -> Result<Ast, FieldError> {
    let compiled = match provider {
        Some(provider) => env.compile_with_variables(source, provider),
        None => env.compile(source),
    };
    let ast = compiled.map_err(|issues| FieldError::invalid(path, source, issues.to_string()))?;
    if let Some(detail) = expected.check(ast.output_type()) {
        return Err(FieldError::invalid(path, source, detail));
    }
    Ok(ast)
}

fn compile_program(
    path: &FieldPath,
    env: &Env,
    provider: Option<&VariablesProvider>,
    source: &str,
    expected: Expected,
) -> Result<Program, FieldError> {
    compile_ast(path, env, provider, source, expected).map(|ast| env.program(&ast))
}

/// Compiles match conditions. Each must be a `bool` expression.
///
/// Every condition is compiled; if any fails, all failures are returned and
/// no programs are.
///
/// # Errors
///
/// Returns the field errors of every failing condition.
pub fn compile_match_conditions(
    path: &FieldPath,
    env: &Env,
    conditions: &[MatchCondition],
) -> Result<Vec<CompiledMatchCondition>, ErrorList> {
    let mut errors = ErrorList::new();
    let mut compiled = Vec::with_capacity(conditions.len());
    for (i, condition) in conditions.iter().enumerate() {
        let path = path.index(i).child("expression");
        match compile_program(&path, env, None, &condition.expression, Expected::Bool) {
            Ok(program) => compiled.push(CompiledMatchCondition {
                name: condition.name.clone(),
                program,
            }),
            Err(err) => errors.push(err),
        }
    }
    errors.into_result().map(|()| compiled)
}

/// Compiles variables in declaration order.
///
/// After each variable compiles, its output type is registered in `provider`
/// so later expressions can reference `variables.<name>`. Compilation stops
/// at the first failure.
///
/// # Errors
///
/// Returns the field error of the first failing variable.
pub fn compile_variables(
    path: &FieldPath,
    env: &Env,
    provider: &mut VariablesProvider,
    variables: &[Variable],
) -> Result<Vec<CompiledVariable>, ErrorList> {
    let mut compiled: Vec<CompiledVariable> = Vec::with_capacity(variables.len());
    for (i, variable) in variables.iter().enumerate() {
        let path = path.index(i).child("expression");
        let ast = compile_ast(&path, env, Some(provider), &variable.expression, Expected::Any)?;
        let index = provider.register_field(&variable.name, ast.output_type().clone());
        let entry = CompiledVariable {
            name: variable.name.clone(),
            program: env.program(&ast),
        };
        if index < compiled.len() {
            compiled[index] = entry;
        } else {
            compiled.push(entry);
        }
    }
    Ok(compiled)
}

/// Compiles a validation: its `bool` expression and, if present, its
/// `string` message expression.
///
/// # Errors
///
/// Returns the field error of whichever expression fails first.
pub fn compile_validation(
    path: &FieldPath,
    env: &Env,
    provider: &VariablesProvider,
    rule: &Validation,
) -> Result<CompiledValidation, ErrorList> {
    let program = compile_program(
        &path.child("expression"),
        env,
        Some(provider),
        &rule.expression,
        Expected::Bool,
    )?;
    let message_expression = match rule.message_expression.as_deref() {
        Some(source) if !source.is_empty() => Some(compile_program(
            &path.child("messageExpression"),
            env,
            Some(provider),
            source,
            Expected::String,
        )?),
        _ => None,
    };
    Ok(CompiledValidation {
        message: rule.message.clone(),
        message_expression,
        reason: rule.reason.clone(),
        program,
    })
}

/// Compiles audit annotations. Each value must be a `string` or `null`
/// expression.
///
/// # Errors
///
/// Returns the field error of the first failing annotation.
pub fn compile_audit_annotations(
    path: &FieldPath,
    env: &Env,
    provider: &VariablesProvider,
    annotations: &[AuditAnnotation],
) -> Result<BTreeMap<String, Program>, ErrorList> {
    let mut compiled = BTreeMap::new();
    for (i, annotation) in annotations.iter().enumerate() {
        let path = path.index(i).child("valueExpression");
        let program = compile_program(
            &path,
            env,
            Some(provider),
            &annotation.value_expression,
            Expected::StringOrNull,
        )?;
        compiled.insert(annotation.key.clone(), program);
    }
    Ok(compiled)
}

/// Compiles the image extractors applying to `gvr`: the defaults for its
/// workload class, then `extractors`, which replace defaults of the same
/// name. Each must produce a list of strings.
///
/// # Errors
///
/// Returns the field error of the first failing extractor.
pub fn compile_image_extractors(
    path: &FieldPath,
    env: &Env,
    gvr: &GroupVersionResource,
    extractors: &[ImageExtractor],
) -> Result<Vec<CompiledImageExtractor>, ErrorList> {
    let mut compiled: Vec<CompiledImageExtractor> = Vec::new();
    for (name, source) in default_extractors(gvr) {
        let program = compile_program(path, env, None, &source, Expected::StringList)
            .map_err(|err| FieldError::internal(path, format!("default extractor {name}: {}", err.detail)))?;
        compiled.push(CompiledImageExtractor {
            name: name.to_string(),
            program,
        });
    }
    for (i, extractor) in extractors.iter().enumerate() {
        let path = path.index(i).child("expression");
        let program = compile_program(&path, env, None, &extractor.expression, Expected::StringList)?;
        let entry = CompiledImageExtractor {
            name: extractor.name.clone(),
            program,
        };
        match compiled.iter_mut().find(|e| e.name == extractor.name) {
            Some(existing) => *existing = entry,
            None => compiled.push(entry),
        }
    }
    Ok(compiled)
}

/// Compiles image reference matchers. A glob takes precedence over an
/// expression set on the same entry; an expression must be `bool`.
///
/// Every entry is compiled; if any fails, all failures are returned.
///
/// # Errors
///
/// Returns the field errors of every failing entry.
pub fn compile_match_image_references(
    path: &FieldPath,
    env: &Env,
    references: &[MatchImageReference],
) -> Result<Vec<ImageMatcher>, ErrorList> {
    let mut errors = ErrorList::new();
    let mut compiled = Vec::with_capacity(references.len());
    for (i, reference) in references.iter().enumerate() {
        let path = path.index(i);
        let glob = reference.glob.as_deref().filter(|g| !g.is_empty());
        let expression = reference.expression.as_deref().filter(|e| !e.is_empty());
        let matcher = match (glob, expression) {
            (Some(glob), _) => ImageGlob::new(glob)
                .map(ImageMatcher::Glob)
                .map_err(|err| FieldError::invalid(&path.child("glob"), glob, err.to_string())),
            (None, Some(source)) => compile_program(&path.child("expression"), env, None, source, Expected::Bool)
                .map(ImageMatcher::Expression),
            (None, None) => Err(FieldError::invalid(&path, "", "either glob or expression must be set")),
        };
        match matcher {
            Ok(matcher) => compiled.push(matcher),
            Err(err) => errors.push(err),
        }
    }
    errors.into_result().map(|()| compiled)
}
