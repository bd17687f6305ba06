//! Property-based tests for policy evaluation.
//!
//! These tests use proptest to verify invariants across many randomly generated inputs.

use std::sync::Arc;

use once_cell::sync::Lazy;
use proptest::prelude::*;

use dike_cel::{build_base_environment, Env, MapActivation};
use dike_compiler::{CompiledMatchCondition, PolicyCompiler};
use dike_core::{Context, FailurePolicy, ValidatingPolicy, Validation};
use dike_test::{create_request, FakeContext, PodBuilder};

use crate::{match_conditions, EngineConfig, Evaluator};

static ENV: Lazy<Env> = Lazy::new(|| build_base_environment().unwrap());

/// A condition outcome to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cond {
    True,
    False,
    Error,
}

impl Cond {
    const fn source(self) -> &'static str {
        match self {
            Self::True => "true",
            Self::False => "false",
            Self::Error => "1 / 0 == 0",
        }
    }
}

fn cond_strategy() -> impl Strategy<Value = Cond> {
    prop_oneof![Just(Cond::True), Just(Cond::False), Just(Cond::Error)]
}

fn failure_policy_strategy() -> impl Strategy<Value = FailurePolicy> {
    prop_oneof![Just(FailurePolicy::Fail), Just(FailurePolicy::Ignore)]
}

fn compile(conds: &[Cond]) -> Vec<CompiledMatchCondition> {
    conds
        .iter()
        .enumerate()
        .map(|(i, cond)| CompiledMatchCondition {
            name: format!("c{i}"),
            program: ENV.program(&ENV.compile(cond.source()).unwrap()),
        })
        .collect()
}

proptest! {
    /// Test that matching follows the short-circuit and failure-policy rules.
    #[test]
    fn match_outcome(conds in prop::collection::vec(cond_strategy(), 0..8), failure_policy in failure_policy_strategy()) {
        let result = match_conditions(&compile(&conds), &MapActivation::new(), failure_policy);

        let first_false = conds.iter().position(|c| *c == Cond::False);
        let errors_before_false = conds[..first_false.unwrap_or(conds.len())]
            .iter()
            .filter(|c| **c == Cond::Error)
            .count();
        match (first_false, errors_before_false, failure_policy) {
            (Some(_), _, _) | (None, 1.., FailurePolicy::Ignore) => prop_assert_eq!(result, Ok(false)),
            (None, 0, _) => prop_assert_eq!(result, Ok(true)),
            (None, n, FailurePolicy::Fail) => prop_assert_eq!(result.unwrap_err().errors().len(), n),
        }
    }

    /// Test that the failing index is the first false validation.
    #[test]
    fn first_false_validation_reported(outcomes in prop::collection::vec(any::<bool>(), 1..8)) {
        let mut policy = ValidatingPolicy::new("p");
        for outcome in &outcomes {
            policy = policy.with_validation(Validation::new(outcome.to_string()));
        }
        let policy = PolicyCompiler::new().unwrap().compile_validating(&policy, &[]).unwrap();
        let context: Arc<dyn Context> = Arc::new(FakeContext::new());
        let config = EngineConfig::default();
        let pod = PodBuilder::new("web").container("app", "app:1").build();

        let result = Evaluator::new(&context, &config)
            .evaluate(&policy, &create_request(pod), None)
            .unwrap()
            .unwrap();
        let first_false = outcomes.iter().position(|passed| !passed);
        prop_assert_eq!(result.result, first_false.is_none());
        prop_assert_eq!(result.index, first_false);
    }
}
