//! Conversion of evaluation inputs into expression values.

use dike_cel::{ObjectValue, Value};
use dike_compiler::environment::{EXCEPTIONS_TYPE, NAMESPACE_TYPE, REQUEST_TYPE};
use dike_compiler::CompiledException;
use dike_core::{AdmissionRequest, Namespace};

use crate::error::Result;

/// Fields of an admission request that are bound separately.
const OBJECT_FIELDS: [&str; 2] = ["object", "oldObject"];

fn object_of(type_name: &str, json: serde_json::Value, skip: &[&str]) -> Value {
    let mut object = ObjectValue::new(type_name);
    if let serde_json::Value::Object(fields) = json {
        for (name, value) in fields {
            if !skip.contains(&name.as_str()) {
                object = object.with_field(name, Value::from_json(&value));
            }
        }
    }
    object.into()
}

/// The `request` value of an admission request. Fields absent from the
/// request read as their zero value.
///
/// # Errors
///
/// Returns an error if the request cannot be serialized.
pub fn request_value(request: &AdmissionRequest) -> Result<Value> {
    Ok(object_of(REQUEST_TYPE, serde_json::to_value(request)?, &OBJECT_FIELDS))
}

/// The `namespaceObject` value, or null for cluster-scoped resources.
///
/// # Errors
///
/// Returns an error if the namespace cannot be serialized.
pub fn namespace_value(namespace: Option<&Namespace>) -> Result<Value> {
    match namespace {
        Some(namespace) => Ok(object_of(NAMESPACE_TYPE, serde_json::to_value(namespace)?, &["apiVersion", "kind"])),
        None => Ok(Value::Null),
    }
}

/// A JSON document as an expression value, or null if absent.
#[must_use]
pub fn json_value(json: Option<&serde_json::Value>) -> Value {
    json.map_or(Value::Null, Value::from_json)
}

/// The `exceptions` value: the allowed images and values of every exception
/// attached to a policy.
#[must_use]
pub fn exceptions_value(exceptions: &[CompiledException]) -> Value {
    let images = exceptions
        .iter()
        .flat_map(|e| e.exception.spec.images.iter())
        .map(Value::string);
    let values = exceptions
        .iter()
        .flat_map(|e| e.exception.spec.allowed_values.iter())
        .map(Value::string);
    ObjectValue::new(EXCEPTIONS_TYPE)
        .with_field("allowedImages", Value::list(images))
        .with_field("allowedValues", Value::list(values))
        .into()
}
