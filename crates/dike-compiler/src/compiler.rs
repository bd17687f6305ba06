//! Policy compile orchestration.
//!
//! [`PolicyCompiler`] validates a policy structurally, then compiles its
//! stages in order: match conditions, variables, validations, audit
//! annotations, exceptions. The first failing stage ends compilation and its
//! errors are returned.
//!
//! # Examples
//!
//! ```rust
//! use dike_compiler::PolicyCompiler;
//! use dike_core::{PolicyException, PolicyKind, ValidatingPolicy, Validation};
//!
//! let compiler = PolicyCompiler::new()?;
//! let policy = ValidatingPolicy::new("require-team")
//!     .with_match_condition("is-deployment", "object.kind == 'Deployment'")
//!     .with_variable("team", "object.metadata.labels.team")
//!     .with_validation(Validation::new("variables.team != ''").with_message("team label is required"));
//! let exception = PolicyException::new("allow-system")
//!     .with_policy_ref("require-team", PolicyKind::ValidatingPolicy)
//!     .with_match_condition("system", "object.metadata.namespace == 'kube-system'");
//!
//! let compiled = compiler.compile_validating(&policy, &[exception])?;
//! assert_eq!(compiled.validations.len(), 1);
//! assert_eq!(compiled.exceptions.len(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use dike_cel::{ResourceOptions, VariablesProvider};
use dike_core::{
    AuditAnnotation, DeletingPolicy, ErrorList, EvaluationMode, FieldPath, ImageExtractor, ImageValidatingPolicy,
    MatchCondition, PolicyException, PolicyKind, Validate, ValidatingPolicy, Validation, Variable,
};
use tracing::{debug, instrument};

use crate::compile::{
    compile_audit_annotations, compile_image_extractors, compile_match_conditions, compile_match_image_references,
    compile_validation, compile_variables,
};
use crate::environment::{Environments, PolicyEnv};
use crate::error::{CompilerError, Result};
use crate::policy::{CompiledException, CompiledImageExtractor, CompiledMatchCondition, CompiledPolicy, ResourceClass};

/// The rule stages shared by validating policy kinds.
struct Rules<'a> {
    match_conditions: &'a [MatchCondition],
    variables: &'a [Variable],
    validations: &'a [Validation],
    audit_annotations: &'a [AuditAnnotation],
}

/// Compiles policy specifications into [`CompiledPolicy`] values.
///
/// Environments are built once, when the compiler is created, and reused
/// for every policy.
#[derive(Debug, Clone)]
pub struct PolicyCompiler {
    environments: Arc<Environments>,
}

impl PolicyCompiler {
    /// Creates a compiler with default library options.
    ///
    /// # Errors
    ///
    /// Returns [`CompilerError::Environment`] if the environments cannot be
    /// built.
    pub fn new() -> Result<Self> {
        Ok(Self::from_environments(Environments::new()?))
    }

    /// Creates a compiler whose `resource` library is scoped by `options`.
    ///
    /// # Errors
    ///
    /// Returns [`CompilerError::Environment`] if the environments cannot be
    /// built.
    pub fn with_resource_options(options: &ResourceOptions) -> Result<Self> {
        Ok(Self::from_environments(Environments::with_resource_options(options)?))
    }

    /// Creates a compiler from prebuilt environments.
    #[must_use]
    pub fn from_environments(environments: Environments) -> Self {
        Self {
            environments: Arc::new(environments),
        }
    }

    /// The environments policies are compiled against.
    #[must_use]
    pub fn environments(&self) -> &Environments {
        &self.environments
    }

    /// Compiles a validating policy and the exceptions that reference it.
    ///
    /// In JSON mode the policy is compiled against the JSON environment;
    /// neither exceptions nor match constraints are attached.
    ///
    /// # Errors
    ///
    /// Returns [`CompilerError::Invalid`] with the errors of the first
    /// failing stage.
    #[instrument(skip_all, fields(policy = %policy.name()))]
    pub fn compile_validating(
        &self,
        policy: &ValidatingPolicy,
        exceptions: &[PolicyException],
    ) -> Result<CompiledPolicy> {
        let name = policy.name();
        policy.validate().map_err(|errors| invalid(name, errors))?;

        let spec = &policy.spec;
        let mode = spec.evaluation_mode();
        let (env, exceptions) = match mode {
            EvaluationMode::Kubernetes => (&self.environments.validating, exceptions),
            EvaluationMode::Json => (&self.environments.json, &[][..]),
        };

        let mut compiled = CompiledPolicy::new(name, PolicyKind::ValidatingPolicy);
        compiled.mode = mode;
        compiled.failure_policy = spec.failure_policy();
        if mode == EvaluationMode::Kubernetes {
            compiled.match_constraints.clone_from(&spec.match_constraints);
        }
        compile_rules(
            &mut compiled,
            env,
            &Rules {
                match_conditions: &spec.match_conditions,
                variables: &spec.variables,
                validations: &spec.validations,
                audit_annotations: &spec.audit_annotations,
            },
            exceptions,
        )
        .map_err(|errors| invalid(name, errors))?;

        debug!(
            validations = compiled.validations.len(),
            exceptions = compiled.exceptions.len(),
            "Compiled validating policy"
        );
        Ok(compiled)
    }

    /// Compiles an image-validating policy and the exceptions that reference
    /// it.
    ///
    /// Image reference matchers compile first, against an environment that
    /// declares only `ref`. Image extractors are compiled once per workload
    /// class, merging the class defaults with the policy's own extractors.
    ///
    /// # Errors
    ///
    /// Returns [`CompilerError::Invalid`] with the errors of the first
    /// failing stage.
    #[instrument(skip_all, fields(policy = %policy.name()))]
    pub fn compile_image_validating(
        &self,
        policy: &ImageValidatingPolicy,
        exceptions: &[PolicyException],
    ) -> Result<CompiledPolicy> {
        let name = policy.name();
        policy.validate().map_err(|errors| invalid(name, errors))?;

        let spec = &policy.spec;
        let env = &self.environments.image_validating;
        let mut compiled = CompiledPolicy::new(name, PolicyKind::ImageValidatingPolicy);
        compiled.failure_policy = spec.failure_policy();
        compiled.match_constraints.clone_from(&spec.match_constraints);
        compiled.match_image_references = compile_match_image_references(
            &FieldPath::new("spec").child("matchImageReferences"),
            self.environments.match_image.env(),
            &spec.match_image_references,
        )
        .map_err(|errors| invalid(name, errors))?;
        compiled.image_extractors = compile_extractor_sets(env, &spec.images).map_err(|errors| invalid(name, errors))?;
        compile_rules(
            &mut compiled,
            env,
            &Rules {
                match_conditions: &spec.match_conditions,
                variables: &spec.variables,
                validations: &spec.validations,
                audit_annotations: &spec.audit_annotations,
            },
            exceptions,
        )
        .map_err(|errors| invalid(name, errors))?;

        debug!(
            extractors = spec.images.len(),
            validations = compiled.validations.len(),
            "Compiled image validating policy"
        );
        Ok(compiled)
    }

    /// Compiles a deleting policy and the exceptions that reference it.
    ///
    /// # Errors
    ///
    /// Returns [`CompilerError::Invalid`] with the errors of the first
    /// failing stage.
    #[instrument(skip_all, fields(policy = %policy.name()))]
    pub fn compile_deleting(&self, policy: &DeletingPolicy, exceptions: &[PolicyException]) -> Result<CompiledPolicy> {
        let name = policy.name();
        policy.validate().map_err(|errors| invalid(name, errors))?;

        let spec = &policy.spec;
        let env = &self.environments.deleting;
        let mut compiled = CompiledPolicy::new(name, PolicyKind::DeletingPolicy);
        compiled.schedule = Some(spec.schedule.clone());
        compile_deleting_stages(&mut compiled, env, policy, exceptions).map_err(|errors| invalid(name, errors))?;

        debug!(conditions = compiled.conditions.len(), "Compiled deleting policy");
        Ok(compiled)
    }

}

fn compile_rules(
    compiled: &mut CompiledPolicy,
    env: &PolicyEnv,
    rules: &Rules<'_>,
    exceptions: &[PolicyException],
) -> std::result::Result<(), ErrorList> {
    let path = FieldPath::new("spec");
    compiled.libraries = env.libraries().to_vec();
    compiled.match_conditions =
        compile_match_conditions(&path.child("matchConditions"), env.env(), rules.match_conditions)?;

    let mut provider = VariablesProvider::new();
    compiled.variables = compile_variables(&path.child("variables"), env.env(), &mut provider, rules.variables)?;

    let validations = path.child("validations");
    compiled.validations = rules
        .validations
        .iter()
        .enumerate()
        .map(|(i, rule)| compile_validation(&validations.index(i), env.env(), &provider, rule))
        .collect::<std::result::Result<_, _>>()?;

    compiled.audit_annotations = compile_audit_annotations(
        &path.child("auditAnnotations"),
        env.env(),
        &provider,
        rules.audit_annotations,
    )?;
    compiled.exceptions = compile_exceptions(env, &compiled.name, compiled.kind, exceptions)?;
    Ok(())
}

fn compile_deleting_stages(
    compiled: &mut CompiledPolicy,
    env: &PolicyEnv,
    policy: &DeletingPolicy,
    exceptions: &[PolicyException],
) -> std::result::Result<(), ErrorList> {
    let path = FieldPath::new("spec");
    let spec = &policy.spec;
    compiled.libraries = env.libraries().to_vec();
    compiled.match_conditions =
        compile_match_conditions(&path.child("matchConditions"), env.env(), &spec.match_conditions)?;
    let mut provider = VariablesProvider::new();
    compiled.variables = compile_variables(&path.child("variables"), env.env(), &mut provider, &spec.variables)?;
    compiled.conditions = compile_conditions(&path.child("conditions"), env, &provider, &spec.conditions)?;
    compiled.exceptions = compile_exceptions(env, policy.name(), PolicyKind::DeletingPolicy, exceptions)?;
    Ok(())
}

fn invalid(name: &str, errors: ErrorList) -> CompilerError {
    CompilerError::Invalid {
        name: name.to_string(),
        errors,
    }
}

/// Deletion conditions are boolean like match conditions, but may reference
/// policy variables.
fn compile_conditions(
    path: &FieldPath,
    env: &PolicyEnv,
    provider: &VariablesProvider,
    conditions: &[MatchCondition],
) -> std::result::Result<Vec<CompiledMatchCondition>, ErrorList> {
    conditions
        .iter()
        .enumerate()
        .map(|(i, condition)| {
            let rule = Validation::new(condition.expression.clone());
            compile_validation(&path.index(i), env.env(), provider, &rule).map(|v| CompiledMatchCondition {
                name: condition.name.clone(),
                program: v.program,
            })
        })
        .collect()
}

/// Compiles the match conditions of every exception that references the
/// policy. Exceptions never see the policy's variables.
fn compile_exceptions(
    env: &PolicyEnv,
    policy: &str,
    kind: PolicyKind,
    exceptions: &[PolicyException],
) -> std::result::Result<Vec<CompiledException>, ErrorList> {
    let path = FieldPath::new("spec").child("matchConditions");
    exceptions
        .iter()
        .filter(|exception| exception.applies_to(policy, kind))
        .map(|exception| {
            let match_conditions = compile_match_conditions(&path, env.env(), &exception.spec.match_conditions)?;
            Ok(CompiledException {
                exception: Arc::new(exception.clone()),
                match_conditions,
            })
        })
        .collect()
}

fn compile_extractor_sets(
    env: &PolicyEnv,
    extractors: &[ImageExtractor],
) -> std::result::Result<BTreeMap<ResourceClass, Vec<CompiledImageExtractor>>, ErrorList> {
    let path = FieldPath::new("spec").child("images");
    ResourceClass::ALL
        .iter()
        .map(|&class| {
            compile_image_extractors(&path, env.env(), &class.representative(), extractors).map(|set| (class, set))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use dike_core::{EvaluationMode, FailurePolicy, MatchImageReference, MatchResources};

    use super::*;

    fn compiler() -> PolicyCompiler {
        PolicyCompiler::new().unwrap()
    }

    #[test]
    fn test_structural_errors_stop_compilation() {
        let policy = ValidatingPolicy::new("dup")
            .with_variable("a", "1")
            .with_variable("a", "2")
            .with_validation(Validation::new("true"));
        let err = compiler().compile_validating(&policy, &[]).unwrap_err();
        assert_eq!(err.field_errors().unwrap().first().unwrap().field, "spec.variables[1].name");
    }

    #[test]
    fn test_first_failing_stage_wins() {
        let policy = ValidatingPolicy::new("broken")
            .with_match_condition("bad", "1")
            .with_validation(Validation::new("'not bool'"));
        let errors = compiler().compile_validating(&policy, &[]).unwrap_err();
        let errors = errors.field_errors().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.first().unwrap().field, "spec.matchConditions[0].expression");
    }

    #[test]
    fn test_variables_visible_to_validations_only() {
        let compiler = compiler();
        let policy = ValidatingPolicy::new("vars")
            .with_variable("foo", "'bar'")
            .with_validation(Validation::new("variables.foo == 'bar'"));
        let compiled = compiler.compile_validating(&policy, &[]).unwrap();
        assert_eq!(compiled.variables[0].name, "foo");

        let policy = ValidatingPolicy::new("vars")
            .with_match_condition("uses-var", "variables.foo == 'bar'")
            .with_variable("foo", "'bar'")
            .with_validation(Validation::new("true"));
        assert!(compiler.compile_validating(&policy, &[]).is_err());
    }

    #[test]
    fn test_exceptions_compiled_at_spec_match_conditions() {
        let policy = ValidatingPolicy::new("p").with_validation(Validation::new("true"));
        let exception = PolicyException::new("e")
            .with_policy_ref("p", PolicyKind::ValidatingPolicy)
            .with_match_condition("bad", "variables.anything");
        let err = compiler().compile_validating(&policy, &[exception]).unwrap_err();
        assert_eq!(
            err.field_errors().unwrap().first().unwrap().field,
            "spec.matchConditions[0].expression"
        );
    }

    #[test]
    fn test_unrelated_exceptions_are_ignored() {
        let policy = ValidatingPolicy::new("p").with_validation(Validation::new("true"));
        let other = PolicyException::new("e")
            .with_policy_ref("p", PolicyKind::DeletingPolicy)
            .with_match_condition("bad", "not an expression");
        let compiled = compiler().compile_validating(&policy, &[other]).unwrap();
        assert!(compiled.exceptions.is_empty());
    }

    #[test]
    fn test_json_mode() {
        let compiler = compiler();
        let policy = ValidatingPolicy::new("json")
            .with_evaluation_mode(EvaluationMode::Json)
            .with_validation(Validation::new("object.replicas < 5"));
        let compiled = compiler.compile_validating(&policy, &[]).unwrap();
        assert_eq!(compiled.mode, EvaluationMode::Json);
        assert_eq!(compiled.libraries.len(), 2);
        assert_eq!(compiled.failure_policy, FailurePolicy::Fail);

        let policy = ValidatingPolicy::new("json")
            .with_evaluation_mode(EvaluationMode::Json)
            .with_validation(Validation::new("request.operation == 'CREATE'"));
        assert!(compiler.compile_validating(&policy, &[]).is_err());
    }

    #[test]
    fn test_image_validating_sets() {
        let policy = ImageValidatingPolicy::new("images")
            .with_image_extractor("bundles", "object.spec.bundles.map(b, b.ref)")
            .with_validation(Validation::new("images.containers.all(i, isImage(i))"));
        let compiled = compiler().compile_image_validating(&policy, &[]).unwrap();
        assert_eq!(compiled.image_extractors.len(), ResourceClass::ALL.len());
        assert_eq!(compiled.image_extractors[&ResourceClass::Pod].len(), 4);
        assert_eq!(compiled.image_extractors[&ResourceClass::Other].len(), 1);
    }

    #[test]
    fn test_image_references_compile_first() {
        let policy = ImageValidatingPolicy::new("refs")
            .with_match_image_reference(MatchImageReference::glob("ghcr.io/*"))
            .with_match_image_reference(MatchImageReference::expression("ref.startsWith('quay.io/')"))
            .with_validation(Validation::new("true"));
        let compiled = compiler().compile_image_validating(&policy, &[]).unwrap();
        assert_eq!(compiled.match_image_references.len(), 2);

        let broken = ImageValidatingPolicy::new("refs")
            .with_match_image_reference(MatchImageReference::expression("object.kind == 'Pod'"))
            .with_validation(Validation::new("'not bool'"));
        let errors = compiler().compile_image_validating(&broken, &[]).unwrap_err();
        let errors = errors.field_errors().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.first().unwrap().field, "spec.matchImageReferences[0].expression");
    }

    #[test]
    fn test_match_constraints_only_apply_to_structured_mode() {
        let compiler = compiler();
        let policy = ValidatingPolicy::new("pods")
            .with_match_constraints(MatchResources::default())
            .with_validation(Validation::new("true"));
        assert!(compiler.compile_validating(&policy, &[]).unwrap().match_constraints.is_some());

        let json = policy.with_evaluation_mode(EvaluationMode::Json);
        assert!(compiler.compile_validating(&json, &[]).unwrap().match_constraints.is_none());
    }

    #[test]
    fn test_deleting_conditions_see_variables() {
        let policy = DeletingPolicy::new("cleanup", "0 * * * *")
            .with_match_condition("is-pod", "object.kind == 'Pod'")
            .with_variable("phase", "object.status.phase")
            .with_condition("finished", "variables.phase == 'Succeeded'");
        let compiled = compiler().compile_deleting(&policy, &[]).unwrap();
        assert_eq!(compiled.conditions.len(), 1);
        assert_eq!(compiled.schedule.as_deref(), Some("0 * * * *"));

        let bad = DeletingPolicy::new("cleanup", "0 * * * *").with_condition("count", "1");
        let err = compiler().compile_deleting(&bad, &[]).unwrap_err();
        assert_eq!(
            err.field_errors().unwrap().first().unwrap().field,
            "spec.conditions[0].expression"
        );
    }
}
