//! Compiled policy model.
//!
//! A [`CompiledPolicy`] holds every program of one policy instance together
//! with the settings that steer its evaluation. It is immutable once built;
//! a spec change produces a new value.

use std::collections::BTreeMap;
use std::sync::Arc;

use dike_cel::{Library, Program};
use dike_core::{EvaluationMode, FailurePolicy, GroupVersionResource, MatchResources, PolicyException, PolicyKind};

use crate::image_match::ImageMatcher;

/// A compiled match condition.
#[derive(Debug, Clone)]
pub struct CompiledMatchCondition {
    /// Condition name.
    pub name: String,
    /// Boolean program.
    pub program: Program,
}

/// A compiled policy variable, addressed by its index in
/// [`CompiledPolicy::variables`].
#[derive(Debug, Clone)]
pub struct CompiledVariable {
    /// Variable name.
    pub name: String,
    /// Program producing the value.
    pub program: Program,
}

/// A compiled validation rule.
#[derive(Debug, Clone)]
pub struct CompiledValidation {
    /// Static failure message.
    pub message: Option<String>,
    /// String program computing the failure message.
    pub message_expression: Option<Program>,
    /// Machine-readable failure reason.
    pub reason: Option<String>,
    /// Boolean program.
    pub program: Program,
}

/// A compiled image extractor.
#[derive(Debug, Clone)]
pub struct CompiledImageExtractor {
    /// Key of the extracted list in `images`.
    pub name: String,
    /// Program producing a list of image references.
    pub program: Program,
}

/// A policy exception compiled against its policy's environment.
#[derive(Debug, Clone)]
pub struct CompiledException {
    /// The source exception.
    pub exception: Arc<PolicyException>,
    /// Boolean programs that must all hold.
    pub match_conditions: Vec<CompiledMatchCondition>,
}

impl CompiledException {
    /// Exception name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.exception.name()
    }
}

/// The class of a workload, which selects the default image extractors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceClass {
    /// A bare Pod.
    Pod,
    /// A controller with a pod template at `spec.template`.
    PodController,
    /// A `CronJob`, with a pod template at `spec.jobTemplate.spec.template`.
    CronJob,
    /// Anything else; only custom extractors apply.
    Other,
}

impl ResourceClass {
    /// Every class, in a fixed order.
    pub const ALL: [Self; 4] = [Self::Pod, Self::PodController, Self::CronJob, Self::Other];

    /// Classifies a resource.
    ///
    /// # Examples
    ///
    /// ```
    /// use dike_compiler::ResourceClass;
    /// use dike_core::GroupVersionResource;
    ///
    /// let gvr = GroupVersionResource::new("apps", "v1", "deployments");
    /// assert_eq!(ResourceClass::of(&gvr), ResourceClass::PodController);
    /// ```
    #[must_use]
    pub fn of(gvr: &GroupVersionResource) -> Self {
        match (gvr.group.as_str(), gvr.resource.as_str()) {
            ("", "pods") => Self::Pod,
            ("", "replicationcontrollers")
            | ("apps", "deployments" | "daemonsets" | "statefulsets" | "replicasets")
            | ("batch", "jobs") => Self::PodController,
            ("batch", "cronjobs") => Self::CronJob,
            _ => Self::Other,
        }
    }

    /// A resource of this class.
    #[must_use]
    pub fn representative(self) -> GroupVersionResource {
        match self {
            Self::Pod => GroupVersionResource::new("", "v1", "pods"),
            Self::PodController => GroupVersionResource::new("apps", "v1", "deployments"),
            Self::CronJob => GroupVersionResource::new("batch", "v1", "cronjobs"),
            Self::Other => GroupVersionResource::default(),
        }
    }
}

/// Every program of one policy.
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    /// Policy name.
    pub name: String,
    /// Policy kind.
    pub kind: PolicyKind,
    /// Evaluation mode.
    pub mode: EvaluationMode,
    /// How match-condition errors are treated.
    pub failure_policy: FailurePolicy,
    /// Resources and operations the policy applies to.
    pub match_constraints: Option<MatchResources>,
    /// Images an image-validating policy applies to.
    pub match_image_references: Vec<ImageMatcher>,
    /// Context-backed libraries to bind at evaluation time.
    pub libraries: Vec<Library>,
    /// Match conditions in declaration order.
    pub match_conditions: Vec<CompiledMatchCondition>,
    /// Variables in declaration order.
    pub variables: Vec<CompiledVariable>,
    /// Validations in declaration order.
    pub validations: Vec<CompiledValidation>,
    /// Audit annotations by key.
    pub audit_annotations: BTreeMap<String, Program>,
    /// Image extractors by workload class.
    pub image_extractors: BTreeMap<ResourceClass, Vec<CompiledImageExtractor>>,
    /// Deletion conditions.
    pub conditions: Vec<CompiledMatchCondition>,
    /// Deletion schedule.
    pub schedule: Option<String>,
    /// Exceptions referencing the policy.
    pub exceptions: Vec<CompiledException>,
}

impl CompiledPolicy {
    pub(crate) fn new(name: &str, kind: PolicyKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            mode: EvaluationMode::Kubernetes,
            failure_policy: FailurePolicy::Fail,
            match_constraints: None,
            match_image_references: Vec::new(),
            libraries: Vec::new(),
            match_conditions: Vec::new(),
            variables: Vec::new(),
            validations: Vec::new(),
            audit_annotations: BTreeMap::new(),
            image_extractors: BTreeMap::new(),
            conditions: Vec::new(),
            schedule: None,
            exceptions: Vec::new(),
        }
    }

    /// Image extractors for a resource.
    #[must_use]
    pub fn image_extractors_for(&self, gvr: &GroupVersionResource) -> &[CompiledImageExtractor] {
        self.image_extractors
            .get(&ResourceClass::of(gvr))
            .map_or(&[], Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_workloads() {
        let cases = [
            (("", "pods"), ResourceClass::Pod),
            (("apps", "statefulsets"), ResourceClass::PodController),
            (("batch", "jobs"), ResourceClass::PodController),
            (("batch", "cronjobs"), ResourceClass::CronJob),
            (("", "configmaps"), ResourceClass::Other),
            (("example.com", "pods"), ResourceClass::Other),
        ];
        for ((group, resource), expected) in cases {
            let gvr = GroupVersionResource::new(group, "v1", resource);
            assert_eq!(ResourceClass::of(&gvr), expected, "{group}/{resource}");
        }
    }

    #[test]
    fn test_representatives_round_trip() {
        for class in ResourceClass::ALL {
            assert_eq!(ResourceClass::of(&class.representative()), class);
        }
    }

    #[test]
    fn test_missing_extractors_are_empty() {
        let policy = CompiledPolicy::new("p", PolicyKind::ImageValidatingPolicy);
        assert!(policy
            .image_extractors_for(&GroupVersionResource::new("", "v1", "pods"))
            .is_empty());
    }
}
