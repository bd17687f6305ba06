//! Resource and operation gating through `matchConstraints`.
//!
//! A request matches when the namespace and object selectors accept it, a
//! resource rule covers it, and no exclude rule does. Versions and groups
//! are compared exactly; equivalent resources served under other versions
//! are not considered.

use std::collections::BTreeMap;

use dike_core::{AdmissionRequest, LabelSelector, MatchResources, Namespace, NamedRuleWithOperations};
use serde_json::Value;

use crate::error::{EngineError, Result};

fn covers(values: Option<&Vec<String>>, value: &str) -> bool {
    values.is_some_and(|values| values.iter().any(|v| v == "*" || v == value))
}

fn covers_resource(rule: &NamedRuleWithOperations, request: &AdmissionRequest) -> bool {
    let Some(resources) = &rule.resources else {
        return false;
    };
    resources.iter().any(|entry| {
        let (resource, sub_resource) = entry.split_once('/').unwrap_or((entry, ""));
        (resource == "*" || resource == request.resource.resource)
            && (sub_resource == "*" || sub_resource == request.sub_resource)
    })
}

fn covers_scope(rule: &NamedRuleWithOperations, request: &AdmissionRequest) -> bool {
    match rule.scope.as_deref() {
        Some("Cluster") => request.namespace.is_empty(),
        Some("Namespaced") => !request.namespace.is_empty(),
        _ => true,
    }
}

/// Returns true if `rule` covers the operation, resource, scope and name of
/// `request`.
#[must_use]
pub fn rule_matches(rule: &NamedRuleWithOperations, request: &AdmissionRequest) -> bool {
    covers(rule.operations.as_ref(), request.operation.as_str())
        && covers(rule.api_groups.as_ref(), &request.resource.group)
        && covers(rule.api_versions.as_ref(), &request.resource.version)
        && covers_resource(rule, request)
        && covers_scope(rule, request)
        && rule
            .resource_names
            .as_ref()
            .map_or(true, |names| names.is_empty() || names.contains(&request.name))
}

/// Evaluates a label selector. An unset selector accepts everything.
///
/// # Errors
///
/// Returns [`EngineError::Constraints`] for an unknown operator.
pub fn selector_matches(selector: Option<&LabelSelector>, labels: &BTreeMap<String, String>) -> Result<bool> {
    let Some(selector) = selector else {
        return Ok(true);
    };
    let labels_match = selector
        .match_labels
        .iter()
        .flatten()
        .all(|(key, value)| labels.get(key) == Some(value));
    if !labels_match {
        return Ok(false);
    }
    for requirement in selector.match_expressions.iter().flatten() {
        let values = requirement.values.as_deref().unwrap_or_default();
        let value = labels.get(&requirement.key);
        let matched = match requirement.operator.as_str() {
            "In" => value.is_some_and(|v| values.contains(v)),
            "NotIn" => value.map_or(true, |v| !values.contains(v)),
            "Exists" => value.is_some(),
            "DoesNotExist" => value.is_none(),
            other => {
                return Err(EngineError::Constraints(format!(
                    "{other:?} is not a valid label selector operator"
                )))
            }
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn object_labels(object: Option<&Value>) -> BTreeMap<String, String> {
    object
        .and_then(|o| o["metadata"]["labels"].as_object())
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Labels the namespace selector is evaluated against, or `None` when the
/// request is cluster-scoped and the selector does not apply.
fn namespace_labels(request: &AdmissionRequest, namespace: Option<&Namespace>) -> Option<BTreeMap<String, String>> {
    if request.resource.group.is_empty() && request.resource.resource == "namespaces" {
        return Some(object_labels(request.object.as_ref().or(request.old_object.as_ref())));
    }
    if request.namespace.is_empty() {
        return None;
    }
    Some(
        namespace
            .and_then(|ns| ns.metadata.labels.clone())
            .unwrap_or_default(),
    )
}

/// Returns true if `request` falls within `constraints`.
///
/// # Errors
///
/// Returns [`EngineError::Constraints`] if a selector is malformed.
pub fn constraints_match(
    constraints: &MatchResources,
    request: &AdmissionRequest,
    namespace: Option<&Namespace>,
) -> Result<bool> {
    if let Some(labels) = namespace_labels(request, namespace) {
        if !selector_matches(constraints.namespace_selector.as_ref(), &labels)? {
            return Ok(false);
        }
    }

    let selector = constraints.object_selector.as_ref();
    let object = selector_matches(selector, &object_labels(request.object.as_ref()))?;
    let old_object =
        request.old_object.is_some() && selector_matches(selector, &object_labels(request.old_object.as_ref()))?;
    if !object && !old_object {
        return Ok(false);
    }

    let included = constraints
        .resource_rules
        .iter()
        .flatten()
        .any(|rule| rule_matches(rule, request));
    let excluded = constraints
        .exclude_resource_rules
        .iter()
        .flatten()
        .any(|rule| rule_matches(rule, request));
    Ok(included && !excluded)
}
