//! Integration tests for the expression language.
//!
//! These tests drive the public API end to end: environment construction,
//! compilation diagnostics, evaluation against custom activations, and the
//! context-backed libraries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dike_cel::{
    build_base_environment, extend_environment, Activation, Env, EnvError, EnvExtension, EvalContext, EvalError,
    Library, MapActivation, ObjectType, ResourceOptions, Type, Value, VariablesProvider, VARIABLES_TYPE,
};
use dike_core::Context;
use dike_test::FakeContext;
use serde_json::json;

fn policy_env() -> Env {
    extend_environment(
        &build_base_environment().expect("base environment"),
        vec![
            ("object".to_string(), Type::Dyn),
            ("variables".to_string(), Type::object(VARIABLES_TYPE)),
        ],
        vec![ObjectType::opaque(VARIABLES_TYPE)],
        vec![],
    )
    .expect("policy environment")
}

fn pod() -> Value {
    Value::from(json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"name": "web", "namespace": "prod", "labels": {"app": "web"}},
        "spec": {"containers": [
            {"name": "nginx", "image": "nginx:1.25"},
            {"name": "sidecar", "image": "ghcr.io/acme/sidecar:latest"},
        ]},
    }))
}

/// An activation that serves lazy variables from a fixed table.
struct TableActivation {
    object: Value,
    variables: Vec<Result<Value, EvalError>>,
    context: EvalContext,
}

impl Activation for TableActivation {
    fn resolve(&self, name: &str) -> Option<Value> {
        (name == "object").then(|| self.object.clone())
    }

    fn variable(&self, index: usize, name: &str) -> Result<Value, EvalError> {
        self.variables
            .get(index)
            .cloned()
            .unwrap_or_else(|| Err(EvalError::NoSuchAttribute(format!("variables.{name}"))))
    }

    fn eval_context(&self) -> &EvalContext {
        &self.context
    }
}

// =============================================================================
// Environment Tests
// =============================================================================

#[test]
fn test_base_environment_has_every_library() {
    let env = build_base_environment().unwrap();
    assert_eq!(env.libraries().len(), Library::all().len());
    for function in ["sha1", "round", "random", "image", "isImage", "parseServiceAccount", "listObjToMap"] {
        assert!(env.has_function(function), "missing {function}");
    }
}

#[test]
fn test_extension_is_repeatable() {
    let base = build_base_environment().unwrap();
    let a = base.extend(EnvExtension::new().with_variable("object", Type::Dyn)).unwrap();
    let b = base.extend(EnvExtension::new().with_variable("object", Type::Dyn)).unwrap();
    assert_eq!(a.variable("object"), b.variable("object"));
    assert!(base.variable("object").is_none());
}

#[test]
fn test_conflicting_variable_is_fatal() {
    let env = policy_env();
    let err = env
        .extend(EnvExtension::new().with_variable("object", Type::String))
        .unwrap_err();
    assert!(matches!(err, EnvError::VariableConflict { .. }));
}

#[test]
fn test_dangling_type_reference_is_fatal() {
    let base = build_base_environment().unwrap();
    let err = base
        .extend(EnvExtension::new().with_variable("request", Type::object("admission.Request")))
        .unwrap_err();
    assert_eq!(
        err,
        EnvError::UnknownType {
            name: "admission.Request".to_string(),
            referrer: "variable 'request'".to_string(),
        }
    );
}

#[test]
fn test_adding_a_library_twice_is_a_no_op() {
    let base = build_base_environment().unwrap();
    let env = base.extend(EnvExtension::new().with_library(Library::Hash)).unwrap();
    assert_eq!(env.libraries().len(), base.libraries().len());
}

// =============================================================================
// Compilation Tests
// =============================================================================

#[test]
fn test_compile_reports_position() {
    let issues = policy_env().compile("object.kind == 'Pod' &&\n  undeclared").unwrap_err();
    assert_eq!(issues.issues().len(), 1);
    let issue = &issues.issues()[0];
    assert_eq!(issue.message, "undeclared reference to 'undeclared'");
    assert_eq!((issue.line, issue.column), (2, 3));
    assert!(issues.to_string().starts_with("ERROR: <input>:2:3: undeclared reference to 'undeclared'"));
}

#[test]
fn test_compile_infers_output_types() {
    let env = policy_env();
    assert_eq!(env.compile("object.kind == 'Pod'").unwrap().output_type(), &Type::Bool);
    assert_eq!(env.compile("'a' + 'b'").unwrap().output_type(), &Type::String);
    assert_eq!(env.compile("object.spec").unwrap().output_type(), &Type::Dyn);
    assert_eq!(
        env.compile("[1, 2].map(x, x * 2)").unwrap().output_type(),
        &Type::list(Type::Int)
    );
}

#[test]
fn test_compile_rejects_type_errors() {
    let env = policy_env();
    let issues = env.compile("1 + 'a'").unwrap_err();
    assert_eq!(
        issues.first_message(),
        Some("found no matching overload for '_+_' applied to '(int, string)'")
    );
}

#[test]
fn test_variables_require_provider_registration() {
    let env = policy_env();
    let mut provider = VariablesProvider::new();
    provider.register_field("replicas", Type::Int);
    assert_eq!(
        env.compile_with_variables("variables.replicas > 2", &provider)
            .unwrap()
            .output_type(),
        &Type::Bool
    );
    let issues = env.compile_with_variables("variables.missing", &provider).unwrap_err();
    assert_eq!(issues.first_message(), Some("undefined field 'missing'"));
}

#[test]
fn test_compile_bounds_operator_chains() {
    let env = policy_env();
    let issues = env.compile(&vec!["1"; 300].join(" + ")).unwrap_err();
    assert_eq!(issues.first_message(), Some("expression recursion limit exceeded"));

    let selects = format!("object{}", ".a".repeat(5000));
    assert!(env.compile(&selects).is_err());
    let negations = format!("{}true", "!".repeat(5000));
    assert!(env.compile(&negations).is_err());
}

#[test]
fn test_long_conjunction_compiles_and_evaluates() {
    let env = policy_env();
    let program = env.program(&env.compile(&vec!["true"; 5000].join(" && ")).unwrap());
    assert_eq!(program.eval(&MapActivation::new()).unwrap(), Value::Bool(true));

    let program = env.program(&env.compile(&vec!["false"; 5000].join(" || ")).unwrap());
    assert_eq!(program.eval(&MapActivation::new()).unwrap(), Value::Bool(false));
}

#[test]
fn test_reserved_words_as_field_names() {
    let env = policy_env();
    let program = env.program(&env.compile("object.metadata.namespace == 'prod'").unwrap());
    let result = program.eval(&MapActivation::new().with("object", pod())).unwrap();
    assert_eq!(result, Value::Bool(true));

    let issues = env.compile("namespace == 'prod'").unwrap_err();
    assert_eq!(issues.first_message(), Some("reserved identifier: namespace"));
}

// =============================================================================
// Evaluation Tests
// =============================================================================

#[test]
fn test_evaluate_against_object() {
    let env = policy_env();
    let program = env.program(
        &env.compile("object.spec.containers.all(c, isImage(c.image)) && object.metadata.labels.app == 'web'")
            .unwrap(),
    );
    let result = program.eval(&MapActivation::new().with("object", pod())).unwrap();
    assert_eq!(result, Value::Bool(true));
}

#[test]
fn test_evaluate_lazy_variables() {
    let env = policy_env();
    let mut provider = VariablesProvider::new();
    provider.register_field("name", Type::String);
    provider.register_field("broken", Type::Dyn);
    let program = env.program(
        &env.compile_with_variables("variables.name == 'web' || variables.broken", &provider)
            .unwrap(),
    );
    let activation = TableActivation {
        object: pod(),
        variables: vec![Ok(Value::from("web")), Err(EvalError::DivisionByZero)],
        context: EvalContext::new(),
    };
    assert_eq!(program.eval(&activation).unwrap(), Value::Bool(true));

    let failing = env.program(&env.compile_with_variables("variables.broken == 1", &provider).unwrap());
    assert_eq!(failing.eval(&activation), Err(EvalError::DivisionByZero));
}

#[test]
fn test_error_absorption_is_commutative() {
    let env = policy_env();
    let activation = MapActivation::new().with("object", pod());
    for expr in ["object.missing.field && false", "false && object.missing.field"] {
        let program = env.program(&env.compile(expr).unwrap());
        assert_eq!(program.eval(&activation).unwrap(), Value::Bool(false), "{expr}");
    }
    let program = env.program(&env.compile("object.missing.field && true").unwrap());
    assert!(matches!(program.eval(&activation), Err(EvalError::NoSuchKey(_))));
}

#[test]
fn test_expired_deadline_stops_evaluation() {
    let env = policy_env();
    let program = env.program(&env.compile("object.kind == 'Pod'").unwrap());
    let activation = MapActivation::new()
        .with("object", pod())
        .with_context(EvalContext::new().with_timeout(Duration::ZERO));
    std::thread::sleep(Duration::from_millis(2));
    assert_eq!(program.eval(&activation), Err(EvalError::DeadlineExceeded));
}

// =============================================================================
// Context Library Tests
// =============================================================================

#[test]
fn test_context_libraries_bind_per_evaluation() {
    let context: Arc<dyn Context> = Arc::new(
        FakeContext::new()
            .with_resource(
                "v1",
                "configmaps",
                json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "settings", "namespace": "default"}, "data": {"mode": "strict"}}),
            )
            .with_global_reference("registries", "", json!(["ghcr.io", "docker.io"])),
    );
    let libraries = [Library::Resource(ResourceOptions::default()), Library::GlobalContext];
    let env = policy_env()
        .extend(libraries.iter().fold(EnvExtension::new(), |ext, library| {
            let (name, ty) = library.context_variable().unwrap();
            ext.with_variable(name, ty)
        }))
        .unwrap();

    let mut activation = MapActivation::new().with("object", pod());
    for library in &libraries {
        let (name, value) = library.context_binding(&context).unwrap();
        activation.insert(name, value);
    }

    let program = env.program(
        &env.compile(
            "resource.Get('v1', 'configmaps', 'default', 'settings').data.mode == 'strict' && \
             image(object.spec.containers[1].image).registry() in globalContext.Get('registries')",
        )
        .unwrap(),
    );
    assert_eq!(program.eval(&activation).unwrap(), Value::Bool(true));
}

#[test]
fn test_context_lookups_receive_evaluation_deadline() {
    let fake = Arc::new(FakeContext::new().with_global_reference("registries", "", json!(["ghcr.io"])));
    let context: Arc<dyn Context> = fake.clone();
    let env = policy_env()
        .extend(EnvExtension::new().with_variable("globalContext", Library::GlobalContext.context_variable().unwrap().1))
        .unwrap();
    let program = env.program(&env.compile("size(globalContext.Get('registries')) == 1").unwrap());

    let deadline = Instant::now() + Duration::from_secs(60);
    let (name, value) = Library::GlobalContext.context_binding(&context).unwrap();
    let mut activation = MapActivation::new().with_context(EvalContext::new().with_deadline(deadline));
    activation.insert(name, value);
    assert_eq!(program.eval(&activation).unwrap(), Value::Bool(true));
    assert_eq!(fake.observed_deadlines(), vec![Some(deadline)]);
}
