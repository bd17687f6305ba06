//! Integration tests for policy evaluation.
//!
//! These tests install policies authored as YAML into an [`Engine`] and
//! evaluate admission requests, JSON payloads and deletion candidates
//! through its public API.

use std::sync::Arc;

use dike_core::{
    DeletingPolicy, FailurePolicy, ImageValidatingPolicy, Namespace, PolicyException, PolicyKind, ValidatingPolicy,
    Validation,
};
use dike_engine::{Engine, EngineConfig, Outcome};
use dike_test::{create_request, delete_request, namespace, FakeContext, PodBuilder};
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn engine() -> Engine {
    init_tracing();
    Engine::new(Arc::new(FakeContext::new())).expect("engine")
}

fn validating(yaml: &str) -> ValidatingPolicy {
    serde_yaml::from_str(yaml).expect("valid policy yaml")
}

fn exception(yaml: &str) -> PolicyException {
    serde_yaml::from_str(yaml).expect("valid exception yaml")
}

const DISALLOW_LATEST: &str = r#"
metadata:
  name: disallow-latest-tag
spec:
  matchConditions:
    - name: is-create
      expression: request.operation == 'CREATE'
  variables:
    - name: latest
      expression: object.spec.containers.filter(c, c.image.endsWith(':latest'))
  validations:
    - expression: size(variables.latest) == 0
      messageExpression: "'uses latest: ' + variables.latest.map(c, c.name).join(', ')"
      reason: Forbidden
  auditAnnotations:
    - key: offending
      valueExpression: "string(size(variables.latest))"
"#;

// =============================================================================
// Validation Tests
// =============================================================================

#[test]
fn test_failing_validation_reports_message_and_annotations() {
    let engine = engine();
    engine.install_validating(&validating(DISALLOW_LATEST), &[]).unwrap();

    let pod = PodBuilder::new("web")
        .container("app", "app:latest")
        .container("sidecar", "proxy:1.0")
        .build();
    let response = engine.handle(&create_request(pod), None);

    let policy = response.policy("disallow-latest-tag").unwrap();
    assert_eq!(policy.outcome, Outcome::Fail);
    assert_eq!(policy.index, Some(0));
    assert_eq!(policy.message, "uses latest: app");
    assert_eq!(policy.reason.as_deref(), Some("Forbidden"));
    assert_eq!(policy.audit_annotations["offending"], "1");
    assert!(!response.allowed());
}

#[test]
fn test_passing_request() {
    let engine = engine();
    engine.install_validating(&validating(DISALLOW_LATEST), &[]).unwrap();

    let pod = PodBuilder::new("web").container("app", "app:1.0").build();
    let response = engine.handle(&create_request(pod), None);
    assert_eq!(response.policy("disallow-latest-tag").unwrap().outcome, Outcome::Pass);
    assert!(response.allowed());
}

#[test]
fn test_unmatched_request_is_skipped() {
    let engine = engine();
    engine.install_validating(&validating(DISALLOW_LATEST), &[]).unwrap();

    let pod = PodBuilder::new("web").container("app", "app:latest").build();
    let response = engine.handle(&delete_request(pod), None);
    let policy = response.policy("disallow-latest-tag").unwrap();
    assert_eq!(policy.outcome, Outcome::Skip);
    assert!(policy.message.is_empty());
}

#[test]
fn test_match_constraints_gate_requests() {
    let engine = engine();
    let policy = validating(
        r#"
metadata:
  name: pods-need-owner
spec:
  matchConstraints:
    resourceRules:
      - apiGroups: [""]
        apiVersions: ["v1"]
        operations: ["CREATE"]
        resources: ["pods"]
  validations:
    - expression: has(object.metadata.labels) && 'owner' in object.metadata.labels
      message: owner label required
"#,
    );
    engine.install_validating(&policy, &[]).unwrap();

    let pod = PodBuilder::new("web").container("app", "app:1.0").build();
    let response = engine.handle(&create_request(pod.clone()), None);
    let result = response.policy("pods-need-owner").unwrap();
    assert_eq!(result.outcome, Outcome::Fail);
    assert_eq!(result.message, "owner label required");

    let response = engine.handle(&delete_request(pod), None);
    assert_eq!(response.policy("pods-need-owner").unwrap().outcome, Outcome::Skip);

    let deployment = json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": "web", "namespace": "default"},
    });
    let response = engine.handle(&create_request(deployment), None);
    assert_eq!(response.policy("pods-need-owner").unwrap().outcome, Outcome::Skip);
}

#[test]
fn test_validations_stop_at_first_failure() {
    let engine = engine();
    let policy = ValidatingPolicy::new("ordered")
        .with_validation(Validation::new("true"))
        .with_validation(Validation::new("false").with_message("second failed"))
        .with_validation(Validation::new("1 / 0 == 0"));
    engine.install_validating(&policy, &[]).unwrap();

    let pod = PodBuilder::new("web").container("app", "app:1").build();
    let response = engine.handle(&create_request(pod), None);
    let policy = response.policy("ordered").unwrap();
    assert_eq!(policy.outcome, Outcome::Fail);
    assert_eq!(policy.index, Some(1));
    assert_eq!(policy.message, "second failed");
}

#[test]
fn test_variable_round_trip() {
    let engine = engine();
    let policy = ValidatingPolicy::new("round-trip")
        .with_variable("x", "object.metadata.labels.app")
        .with_validation(Validation::new("variables.x == 'bar'").with_message("app must be bar"));
    engine.install_validating(&policy, &[]).unwrap();

    let bar = PodBuilder::new("web").label("app", "bar").container("app", "app:1").build();
    let response = engine.handle(&create_request(bar), None);
    assert_eq!(response.policy("round-trip").unwrap().outcome, Outcome::Pass);

    let baz = PodBuilder::new("web").label("app", "baz").container("app", "app:1").build();
    let response = engine.handle(&create_request(baz), None);
    let policy = response.policy("round-trip").unwrap();
    assert_eq!(policy.outcome, Outcome::Fail);
    assert_eq!(policy.message, "app must be bar");
}

#[test]
fn test_namespace_fields_are_addressable() {
    let engine = engine();
    let policy = ValidatingPolicy::new("same-namespace")
        .with_validation(Validation::new("request.namespace == object.metadata.namespace"))
        .with_validation(Validation::new("request.namespace == 'prod'").with_message("prod only"));
    engine.install_validating(&policy, &[]).unwrap();

    let prod = PodBuilder::new("web").namespace("prod").container("app", "app:1").build();
    let response = engine.handle(&create_request(prod), None);
    assert_eq!(response.policy("same-namespace").unwrap().outcome, Outcome::Pass);

    let dev = PodBuilder::new("web").namespace("dev").container("app", "app:1").build();
    let response = engine.handle(&create_request(dev), None);
    let policy = response.policy("same-namespace").unwrap();
    assert_eq!(policy.outcome, Outcome::Fail);
    assert_eq!(policy.index, Some(1));
    assert_eq!(policy.message, "prod only");
}

#[test]
fn test_validation_error_is_reported() {
    let engine = engine();
    let policy = ValidatingPolicy::new("divides").with_validation(Validation::new("1 / 0 == 0"));
    engine.install_validating(&policy, &[]).unwrap();

    let pod = PodBuilder::new("web").container("app", "app:1").build();
    let response = engine.handle(&create_request(pod), None);
    let policy = response.policy("divides").unwrap();
    assert_eq!(policy.outcome, Outcome::Error);
    assert_eq!(policy.message, "validations[0] evaluation failed: division by zero");
}

// =============================================================================
// Match Condition Tests
// =============================================================================

#[test]
fn test_false_condition_discards_earlier_errors() {
    let engine = engine();
    let policy = ValidatingPolicy::new("quirk")
        .with_match_condition("broken", "1 / 0 == 0")
        .with_match_condition("never", "false")
        .with_validation(Validation::new("false"));
    engine.install_validating(&policy, &[]).unwrap();

    let pod = PodBuilder::new("web").container("app", "app:1").build();
    let response = engine.handle(&create_request(pod), None);
    assert_eq!(response.policy("quirk").unwrap().outcome, Outcome::Skip);
}

#[test]
fn test_match_errors_follow_failure_policy() {
    let policy = ValidatingPolicy::new("broken-match")
        .with_match_condition("broken", "1 / 0 == 0")
        .with_validation(Validation::new("false"));
    let pod = PodBuilder::new("web").container("app", "app:1").build();

    let failing = engine();
    failing.install_validating(&policy, &[]).unwrap();
    let response = failing.handle(&create_request(pod.clone()), None);
    let failed = response.policy("broken-match").unwrap();
    assert_eq!(failed.outcome, Outcome::Error);
    assert!(failed.message.contains("failed to evaluate condition 'broken'"));

    let ignoring = engine().with_config(EngineConfig::new().with_failure_policy(FailurePolicy::Ignore));
    ignoring.install_validating(&policy, &[]).unwrap();
    let response = ignoring.handle(&create_request(pod), None);
    assert_eq!(response.policy("broken-match").unwrap().outcome, Outcome::Skip);
}

#[test]
fn test_namespace_object_binding() {
    let engine = engine();
    let policy = ValidatingPolicy::new("prod-only")
        .with_match_condition("namespaced", "namespaceObject != null")
        .with_validation(Validation::new("namespaceObject.metadata.labels.env == 'prod'"));
    engine.install_validating(&policy, &[]).unwrap();

    let pod = PodBuilder::new("web").namespace("team-a").container("app", "app:1").build();
    let prod: Namespace = serde_json::from_value(namespace("team-a", &[("env", "prod")])).unwrap();
    let dev: Namespace = serde_json::from_value(namespace("team-a", &[("env", "dev")])).unwrap();

    let request = create_request(pod);
    assert_eq!(engine.handle(&request, Some(&prod)).policy("prod-only").unwrap().outcome, Outcome::Pass);
    assert_eq!(engine.handle(&request, Some(&dev)).policy("prod-only").unwrap().outcome, Outcome::Fail);
    assert_eq!(engine.handle(&request, None).policy("prod-only").unwrap().outcome, Outcome::Skip);
}

// =============================================================================
// Exception Tests
// =============================================================================

const ALLOW_NGINX: &str = r#"
metadata:
  name: allow-nginx
  namespace: default
spec:
  policyRefs:
    - name: disallow-latest-tag
      kind: ValidatingPolicy
  matchConditions:
    - name: nginx-only
      expression: object.metadata.name == 'nginx'
  images:
    - nginx:latest
"#;

#[test]
fn test_matching_exception_preempts_failure() {
    let engine = engine();
    engine
        .install_validating(&validating(DISALLOW_LATEST), &[exception(ALLOW_NGINX)])
        .unwrap();

    let pod = PodBuilder::new("nginx").container("nginx", "nginx:latest").build();
    let response = engine.handle(&create_request(pod), None);
    let policy = response.policy("disallow-latest-tag").unwrap();
    assert_eq!(policy.outcome, Outcome::Skip);
    assert_eq!(policy.exceptions, ["allow-nginx"]);
    assert_eq!(policy.message, "skipped due to policy exceptions: allow-nginx");
    assert!(response.allowed());

    let other = PodBuilder::new("redis").container("redis", "redis:latest").build();
    let response = engine.handle(&create_request(other), None);
    assert_eq!(response.policy("disallow-latest-tag").unwrap().outcome, Outcome::Fail);
}

#[test]
fn test_exception_values_are_bound() {
    let engine = engine();
    let policy = validating(
        r#"
metadata:
  name: allowed-images
spec:
  validations:
    - expression: object.spec.containers.all(c, c.image in exceptions.allowedImages)
      message: image not allowed
"#,
    );
    let unmatched = exception(
        r#"
metadata:
  name: image-allowlist
spec:
  policyRefs:
    - name: allowed-images
      kind: ValidatingPolicy
  matchConditions:
    - name: never
      expression: 'false'
  images:
    - busybox:1.36
"#,
    );
    engine.install_validating(&policy, &[unmatched]).unwrap();

    let allowed = PodBuilder::new("web").container("app", "busybox:1.36").build();
    let response = engine.handle(&create_request(allowed), None);
    assert_eq!(response.policy("allowed-images").unwrap().outcome, Outcome::Pass);

    let denied = PodBuilder::new("web").container("app", "alpine:3").build();
    let response = engine.handle(&create_request(denied), None);
    assert_eq!(response.policy("allowed-images").unwrap().message, "image not allowed");
}

// =============================================================================
// JSON Mode Tests
// =============================================================================

#[test]
fn test_json_payload() {
    let engine = engine();
    let policy = validating(
        r#"
metadata:
  name: terraform
spec:
  evaluation:
    mode: JSON
  validations:
    - expression: object.resources.all(r, r.name != 'public-bucket' || r.values.blocked)
      message: public bucket must block access
"#,
    );
    engine.install_validating(&policy, &[]).unwrap();
    engine.install_validating(&validating(DISALLOW_LATEST), &[]).unwrap();

    let open = json!({"resources": [{"name": "public-bucket", "values": {"blocked": false}}]});
    let response = engine.handle_json(&open);
    assert_eq!(response.policies.len(), 1);
    let policy = response.policy("terraform").unwrap();
    assert_eq!(policy.outcome, Outcome::Fail);
    assert_eq!(policy.message, "public bucket must block access");

    let blocked = json!({"resources": [{"name": "public-bucket", "values": {"blocked": true}}]});
    assert!(engine.handle_json(&blocked).allowed());
}

#[test]
fn test_json_policies_ignore_admission_requests() {
    let engine = engine();
    let policy = ValidatingPolicy::new("json-only")
        .with_evaluation_mode(dike_core::EvaluationMode::Json)
        .with_validation(Validation::new("false"));
    engine.install_validating(&policy, &[]).unwrap();

    let pod = PodBuilder::new("web").container("app", "app:1").build();
    assert!(engine.handle(&create_request(pod), None).policies.is_empty());
}

// =============================================================================
// Image Validating Policy Tests
// =============================================================================

#[test]
fn test_image_policy_checks_extracted_images() {
    let engine = engine();
    let policy: ImageValidatingPolicy = serde_yaml::from_str(
        r#"
metadata:
  name: trusted-registry
spec:
  validations:
    - expression: images.containers.all(i, i.startsWith('ghcr.io/'))
      messageExpression: "'untrusted images: ' + images.containers.filter(i, !i.startsWith('ghcr.io/')).join(', ')"
"#,
    )
    .unwrap();
    engine.install_image_validating(&policy, &[]).unwrap();

    let trusted = PodBuilder::new("web").container("app", "ghcr.io/acme/app:1.0").build();
    let response = engine.handle(&create_request(trusted), None);
    let result = response.policy("trusted-registry").unwrap();
    assert_eq!(result.kind, PolicyKind::ImageValidatingPolicy);
    assert_eq!(result.outcome, Outcome::Pass);

    let mixed = PodBuilder::new("web")
        .container("app", "ghcr.io/acme/app:1.0")
        .container("proxy", "envoyproxy/envoy:v1.30")
        .build();
    let response = engine.handle(&create_request(mixed), None);
    let result = response.policy("trusted-registry").unwrap();
    assert_eq!(result.outcome, Outcome::Fail);
    assert_eq!(result.message, "untrusted images: envoyproxy/envoy:v1.30");
}

#[test]
fn test_image_references_narrow_checked_images() {
    let engine = engine();
    let policy: ImageValidatingPolicy = serde_yaml::from_str(
        r#"
metadata:
  name: acme-images-pinned
spec:
  matchImageReferences:
    - glob: "ghcr.io/acme/*"
    - expression: "ref.startsWith('quay.io/acme/')"
  validations:
    - expression: "!images.containers.exists(i, i.endsWith(':latest'))"
      message: acme images must be pinned
"#,
    )
    .unwrap();
    engine.install_image_validating(&policy, &[]).unwrap();

    let unrelated = PodBuilder::new("web")
        .container("app", "ghcr.io/acme/app:1.0")
        .container("proxy", "envoyproxy/envoy:latest")
        .build();
    let response = engine.handle(&create_request(unrelated), None);
    assert_eq!(response.policy("acme-images-pinned").unwrap().outcome, Outcome::Pass);

    let floating = PodBuilder::new("web")
        .container("app", "ghcr.io/acme/app:1.0")
        .container("db", "quay.io/acme/db:latest")
        .build();
    let response = engine.handle(&create_request(floating), None);
    let result = response.policy("acme-images-pinned").unwrap();
    assert_eq!(result.outcome, Outcome::Fail);
    assert_eq!(result.message, "acme images must be pinned");
}

// =============================================================================
// Deleting Policy Tests
// =============================================================================

const CLEANUP_JOBS: &str = r#"
metadata:
  name: cleanup-finished-jobs
spec:
  schedule: '*/5 * * * *'
  matchConditions:
    - name: is-job
      expression: object.kind == 'Job'
  variables:
    - name: succeeded
      expression: has(object.status.succeeded) && object.status.succeeded > 0
  conditions:
    - name: done
      expression: variables.succeeded
"#;

fn job(name: &str, succeeded: i64) -> serde_json::Value {
    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {"name": name, "namespace": "default"},
        "status": {"succeeded": succeeded},
    })
}

#[test]
fn test_deletion_eligibility() {
    let engine = engine();
    let policy: DeletingPolicy = serde_yaml::from_str(CLEANUP_JOBS).unwrap();
    engine.install_deleting(&policy, &[]).unwrap();

    let response = engine.handle_deletion(&job("done", 1), None);
    assert_eq!(response.policy("cleanup-finished-jobs").unwrap().outcome, Outcome::Pass);

    let response = engine.handle_deletion(&job("running", 0), None);
    assert_eq!(response.policy("cleanup-finished-jobs").unwrap().outcome, Outcome::Skip);

    let pod = PodBuilder::new("web").container("app", "app:1").build();
    let response = engine.handle_deletion(&pod, None);
    assert_eq!(response.policy("cleanup-finished-jobs").unwrap().outcome, Outcome::Skip);
}

#[test]
fn test_deletion_exception() {
    let engine = engine();
    let policy: DeletingPolicy = serde_yaml::from_str(CLEANUP_JOBS).unwrap();
    let keep = PolicyException::new("keep-audit")
        .with_policy_ref("cleanup-finished-jobs", PolicyKind::DeletingPolicy)
        .with_match_condition("audit", "object.metadata.name == 'audit'");
    engine.install_deleting(&policy, &[keep]).unwrap();

    let response = engine.handle_deletion(&job("audit", 1), None);
    let result = response.policy("cleanup-finished-jobs").unwrap();
    assert_eq!(result.outcome, Outcome::Skip);
    assert_eq!(result.exceptions, ["keep-audit"]);

    let response = engine.handle_deletion(&job("nightly", 1), None);
    assert_eq!(response.policy("cleanup-finished-jobs").unwrap().outcome, Outcome::Pass);
}

// =============================================================================
// Library Tests
// =============================================================================

#[test]
fn test_resource_library_reads_context() {
    init_tracing();
    let context = FakeContext::new().with_resource(
        "v1",
        "configmaps",
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "registry", "namespace": "default"},
            "data": {"prefix": "ghcr.io/"},
        }),
    );
    let engine = Engine::new(Arc::new(context)).unwrap();
    let policy = ValidatingPolicy::new("registry-from-configmap")
        .with_variable("prefix", "resource.Get('v1', 'configmaps', 'default', 'registry').data.prefix")
        .with_validation(Validation::new("object.spec.containers.all(c, c.image.startsWith(variables.prefix))"));
    engine.install_validating(&policy, &[]).unwrap();

    let trusted = PodBuilder::new("web").container("app", "ghcr.io/acme/app:1").build();
    let response = engine.handle(&create_request(trusted), None);
    assert_eq!(response.policy("registry-from-configmap").unwrap().outcome, Outcome::Pass);

    let untrusted = PodBuilder::new("web").container("app", "docker.io/app:1").build();
    let response = engine.handle(&create_request(untrusted), None);
    assert_eq!(response.policy("registry-from-configmap").unwrap().outcome, Outcome::Fail);
}

// =============================================================================
// Cache Tests
// =============================================================================

#[test]
fn test_reinstall_replaces_policy() {
    let engine = engine();
    engine
        .install_validating(&ValidatingPolicy::new("p").with_validation(Validation::new("false")), &[])
        .unwrap();
    let pod = PodBuilder::new("web").container("app", "app:1").build();
    assert!(!engine.handle(&create_request(pod.clone()), None).allowed());

    engine
        .install_validating(&ValidatingPolicy::new("p").with_validation(Validation::new("true")), &[])
        .unwrap();
    assert!(engine.handle(&create_request(pod.clone()), None).allowed());

    assert!(engine.remove(PolicyKind::ValidatingPolicy, "p"));
    assert!(engine.handle(&create_request(pod), None).policies.is_empty());
}

// =============================================================================
// Async Tests
// =============================================================================

#[tokio::test]
async fn test_handle_async() {
    let engine = Arc::new(engine());
    engine.install_validating(&validating(DISALLOW_LATEST), &[]).unwrap();

    let pod = PodBuilder::new("web").container("app", "app:latest").build();
    let response = engine.clone().handle_async(create_request(pod), None).await.unwrap();
    assert_eq!(response.policy("disallow-latest-tag").unwrap().outcome, Outcome::Fail);
}
