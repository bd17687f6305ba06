//! Admission request model.
//!
//! A trimmed-down rendition of the Kubernetes `AdmissionRequest`, carrying the
//! fields policy expressions can observe through `request`, `object` and
//! `oldObject`.

use std::fmt;

use k8s_openapi::api::authentication::v1::UserInfo;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A group/version/kind triple.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupVersionKind {
    /// API group; empty for the core group.
    #[serde(default)]
    pub group: String,
    /// API version.
    pub version: String,
    /// Object kind.
    pub kind: String,
}

impl GroupVersionKind {
    /// Creates a new group/version/kind.
    #[must_use]
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }
}

/// A group/version/resource triple.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupVersionResource {
    /// API group; empty for the core group.
    #[serde(default)]
    pub group: String,
    /// API version.
    pub version: String,
    /// Plural resource name, e.g. `pods`.
    pub resource: String,
}

impl GroupVersionResource {
    /// Creates a new group/version/resource.
    ///
    /// # Examples
    ///
    /// ```
    /// use dike_core::GroupVersionResource;
    ///
    /// let gvr = GroupVersionResource::new("apps", "v1", "deployments");
    /// assert_eq!(gvr.api_version(), "apps/v1");
    /// assert_eq!(GroupVersionResource::new("", "v1", "pods").api_version(), "v1");
    /// ```
    #[must_use]
    pub fn new(group: impl Into<String>, version: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
        }
    }

    /// Returns the `apiVersion` string for this resource.
    #[must_use]
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Resource={}", self.api_version(), self.resource)
    }
}

/// The operation being admitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    /// Object creation.
    #[default]
    Create,
    /// Object update.
    Update,
    /// Object deletion.
    Delete,
    /// Connect to a subresource (exec, attach, proxy).
    Connect,
}

impl Operation {
    /// Returns the wire form of the operation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Connect => "CONNECT",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An admission request under evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    /// Request identifier.
    #[serde(default)]
    pub uid: String,

    /// Kind of the object in the request.
    pub kind: GroupVersionKind,

    /// Resource being requested.
    pub resource: GroupVersionResource,

    /// Subresource, if any.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sub_resource: String,

    /// Kind of the originally requested object, if converted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_kind: Option<GroupVersionKind>,

    /// Originally requested resource, if converted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_resource: Option<GroupVersionResource>,

    /// Originally requested subresource, if converted.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_sub_resource: String,

    /// Object name.
    #[serde(default)]
    pub name: String,

    /// Object namespace; empty for cluster-scoped objects.
    #[serde(default)]
    pub namespace: String,

    /// Operation being performed.
    #[serde(default)]
    pub operation: Operation,

    /// Requesting user.
    #[serde(default)]
    pub user_info: UserInfo,

    /// New object state; absent on delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<serde_json::Value>,

    /// Previous object state; present on update and delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_object: Option<serde_json::Value>,

    /// Whether the request is a dry run.
    #[serde(default)]
    pub dry_run: bool,

    /// Operation options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
}

impl AdmissionRequest {
    /// Creates a request for the given operation on a kind/resource pair.
    #[must_use]
    pub fn new(operation: Operation, kind: GroupVersionKind, resource: GroupVersionResource) -> Self {
        Self {
            operation,
            kind,
            resource,
            ..Self::default()
        }
    }

    /// Decodes a request from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the payload is not a valid request.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::InvalidRequest {
            reason: e.to_string(),
        })
    }

    /// Sets the new object, deriving name and namespace from its metadata.
    #[must_use]
    pub fn with_object(mut self, object: serde_json::Value) -> Self {
        self.adopt_metadata(&object);
        self.object = Some(object);
        self
    }

    /// Sets the previous object state.
    #[must_use]
    pub fn with_old_object(mut self, object: serde_json::Value) -> Self {
        if self.name.is_empty() {
            self.adopt_metadata(&object);
        }
        self.old_object = Some(object);
        self
    }

    /// Sets the requesting user.
    #[must_use]
    pub fn with_user_info(mut self, user_info: UserInfo) -> Self {
        self.user_info = user_info;
        self
    }

    /// Sets the request namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    fn adopt_metadata(&mut self, object: &serde_json::Value) {
        let metadata = &object["metadata"];
        if let Some(name) = metadata["name"].as_str() {
            self.name = name.to_string();
        }
        if let Some(namespace) = metadata["namespace"].as_str() {
            self.namespace = namespace.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pods() -> (GroupVersionKind, GroupVersionResource) {
        (
            GroupVersionKind::new("", "v1", "Pod"),
            GroupVersionResource::new("", "v1", "pods"),
        )
    }

    #[test]
    fn test_operation_wire_form() {
        assert_eq!(serde_json::to_value(Operation::Delete).unwrap(), json!("DELETE"));
        assert_eq!(Operation::Connect.to_string(), "CONNECT");
    }

    #[test]
    fn test_with_object_adopts_metadata() {
        let (gvk, gvr) = pods();
        let request = AdmissionRequest::new(Operation::Create, gvk, gvr)
            .with_object(json!({"metadata": {"name": "web", "namespace": "prod"}}));
        assert_eq!(request.name, "web");
        assert_eq!(request.namespace, "prod");
    }

    #[test]
    fn test_with_old_object_keeps_existing_name() {
        let (gvk, gvr) = pods();
        let request = AdmissionRequest::new(Operation::Update, gvk, gvr)
            .with_object(json!({"metadata": {"name": "new"}}))
            .with_old_object(json!({"metadata": {"name": "old"}}));
        assert_eq!(request.name, "new");
    }

    #[test]
    fn test_from_json() {
        let request = AdmissionRequest::from_json(json!({
            "uid": "abc",
            "kind": {"group": "apps", "version": "v1", "kind": "Deployment"},
            "resource": {"group": "apps", "version": "v1", "resource": "deployments"},
            "operation": "UPDATE",
            "userInfo": {"username": "alice", "groups": ["devs"]},
            "dryRun": true
        }))
        .unwrap();
        assert_eq!(request.uid, "abc");
        assert_eq!(request.operation, Operation::Update);
        assert_eq!(request.user_info.username.as_deref(), Some("alice"));
        assert!(request.dry_run);
        assert_eq!(request.resource.api_version(), "apps/v1");
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let err = AdmissionRequest::from_json(json!({"operation": "EXPLODE"})).unwrap_err();
        assert!(err.to_string().starts_with("Invalid admission request"));
    }

    #[test]
    fn test_gvr_display() {
        let gvr = GroupVersionResource::new("batch", "v1", "cronjobs");
        assert_eq!(gvr.to_string(), "batch/v1, Resource=cronjobs");
    }
}
