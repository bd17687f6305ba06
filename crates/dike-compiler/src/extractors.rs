//! Default image extractors.
//!
//! Workloads that embed a pod spec get one extractor per container list.
//! Each prefers `object` and falls back to `oldObject`, so deletions still
//! yield the images of the deleted workload.

use dike_core::GroupVersionResource;

use crate::policy::ResourceClass;

/// The container lists every default extractor set covers.
pub const CONTAINER_LISTS: [&str; 3] = ["containers", "initContainers", "ephemeralContainers"];

fn pod_spec_path(class: ResourceClass) -> Option<&'static str> {
    match class {
        ResourceClass::Pod => Some("spec"),
        ResourceClass::PodController => Some("spec.template.spec"),
        ResourceClass::CronJob => Some("spec.jobTemplate.spec.template.spec"),
        ResourceClass::Other => None,
    }
}

fn images_of(root: &str, spec: &str, list: &str) -> String {
    format!("has({root}.{spec}.{list}) ? {root}.{spec}.{list}.map(c, c.image) : []")
}

/// The default `(name, expression)` extractors for a resource.
///
/// # Examples
///
/// ```
/// use dike_compiler::extractors::default_extractors;
/// use dike_core::GroupVersionResource;
///
/// let defaults = default_extractors(&GroupVersionResource::new("", "v1", "pods"));
/// assert_eq!(defaults.len(), 3);
/// assert_eq!(defaults[0].0, "containers");
/// assert!(default_extractors(&GroupVersionResource::new("", "v1", "configmaps")).is_empty());
/// ```
#[must_use]
pub fn default_extractors(gvr: &GroupVersionResource) -> Vec<(&'static str, String)> {
    let Some(spec) = pod_spec_path(ResourceClass::of(gvr)) else {
        return Vec::new();
    };
    CONTAINER_LISTS
        .iter()
        .map(|&list| {
            let expression = format!(
                "object != null ? ({}) : ({})",
                images_of("object", spec, list),
                images_of("oldObject", spec, list)
            );
            (list, expression)
        })
        .collect()
}
