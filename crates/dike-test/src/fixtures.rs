//! Resource and admission-request fixtures.
//!
//! # Examples
//!
//! ```rust
//! use dike_test::fixtures::{create_request, PodBuilder};
//!
//! let pod = PodBuilder::new("web")
//!     .namespace("prod")
//!     .label("app", "web")
//!     .container("nginx", "nginx:1.25")
//!     .build();
//!
//! let request = create_request(pod);
//! assert_eq!(request.name, "web");
//! assert_eq!(request.namespace, "prod");
//! assert_eq!(request.resource.resource, "pods");
//! ```

use std::collections::BTreeMap;

use dike_core::{AdmissionRequest, GroupVersionKind, GroupVersionResource, Operation, UserInfo};
use serde_json::{json, Value};

/// Fluent builder for Pod objects.
#[derive(Debug, Clone, Default)]
pub struct PodBuilder {
    name: String,
    namespace: Option<String>,
    labels: BTreeMap<String, String>,
    containers: Vec<Value>,
    init_containers: Vec<Value>,
    ephemeral_containers: Vec<Value>,
}

fn container(name: &str, image: &str) -> Value {
    json!({"name": name, "image": image})
}

impl PodBuilder {
    /// Creates a builder for a pod with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the namespace.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Adds a label.
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Adds a regular container.
    #[must_use]
    pub fn container(mut self, name: &str, image: &str) -> Self {
        self.containers.push(container(name, image));
        self
    }

    /// Adds an init container.
    #[must_use]
    pub fn init_container(mut self, name: &str, image: &str) -> Self {
        self.init_containers.push(container(name, image));
        self
    }

    /// Adds an ephemeral container.
    #[must_use]
    pub fn ephemeral_container(mut self, name: &str, image: &str) -> Self {
        self.ephemeral_containers.push(container(name, image));
        self
    }

    /// Builds the pod `spec` alone, for embedding in templates.
    #[must_use]
    pub fn spec(&self) -> Value {
        let mut spec = json!({"containers": self.containers});
        if !self.init_containers.is_empty() {
            spec["initContainers"] = json!(self.init_containers);
        }
        if !self.ephemeral_containers.is_empty() {
            spec["ephemeralContainers"] = json!(self.ephemeral_containers);
        }
        spec
    }

    /// Builds the full Pod object.
    #[must_use]
    pub fn build(&self) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": self.metadata(),
            "spec": self.spec(),
        })
    }

    fn metadata(&self) -> Value {
        let mut metadata = json!({"name": self.name});
        if let Some(namespace) = &self.namespace {
            metadata["namespace"] = json!(namespace);
        }
        if !self.labels.is_empty() {
            metadata["labels"] = json!(self.labels);
        }
        metadata
    }
}

/// A Deployment whose pod template comes from `pod`.
#[must_use]
pub fn deployment(pod: &PodBuilder, replicas: i64) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": pod.metadata(),
        "spec": {
            "replicas": replicas,
            "template": {"metadata": {"labels": pod.labels}, "spec": pod.spec()},
        },
    })
}

/// A `CronJob` whose job template comes from `pod`.
#[must_use]
pub fn cron_job(pod: &PodBuilder, schedule: &str) -> Value {
    json!({
        "apiVersion": "batch/v1",
        "kind": "CronJob",
        "metadata": pod.metadata(),
        "spec": {
            "schedule": schedule,
            "jobTemplate": {"spec": {"template": {"spec": pod.spec()}}},
        },
    })
}

/// A Namespace object with the given labels.
#[must_use]
pub fn namespace(name: &str, labels: &[(&str, &str)]) -> Value {
    let labels: BTreeMap<&str, &str> = labels.iter().copied().collect();
    json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {"name": name, "labels": labels},
    })
}

/// A user info for a plain user with the given groups.
#[must_use]
pub fn user(name: &str, groups: &[&str]) -> UserInfo {
    UserInfo {
        username: Some(name.to_string()),
        groups: Some(groups.iter().map(ToString::to_string).collect()),
        ..UserInfo::default()
    }
}

/// The kind of an object, read from `apiVersion` and `kind`.
#[must_use]
pub fn kind_of(object: &Value) -> GroupVersionKind {
    let api_version = object["apiVersion"].as_str().unwrap_or("v1");
    let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
    GroupVersionKind::new(group, version, object["kind"].as_str().unwrap_or_default())
}

/// The resource of an object, using the lowercase plural of its kind.
#[must_use]
pub fn resource_of(object: &Value) -> GroupVersionResource {
    let kind = kind_of(object);
    GroupVersionResource::new(kind.group, kind.version, format!("{}s", kind.kind.to_lowercase()))
}

/// A CREATE request for `object`.
#[must_use]
pub fn create_request(object: Value) -> AdmissionRequest {
    AdmissionRequest::new(Operation::Create, kind_of(&object), resource_of(&object)).with_object(object)
}

/// An UPDATE request moving `old_object` to `object`.
#[must_use]
pub fn update_request(object: Value, old_object: Value) -> AdmissionRequest {
    AdmissionRequest::new(Operation::Update, kind_of(&object), resource_of(&object))
        .with_object(object)
        .with_old_object(old_object)
}

/// A DELETE request for `old_object`.
#[must_use]
pub fn delete_request(old_object: Value) -> AdmissionRequest {
    AdmissionRequest::new(Operation::Delete, kind_of(&old_object), resource_of(&old_object))
        .with_old_object(old_object)
}
