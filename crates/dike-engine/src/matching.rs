//! The match primitive shared by policies, exceptions and deletion
//! conditions.
//!
//! Conditions are evaluated in order. A condition that fails to evaluate, or
//! yields a non-boolean, is recorded and skipped. The first condition that
//! evaluates to `false` ends matching with no match and no error, even if
//! earlier conditions failed. If no condition is false, any recorded
//! failures decide the outcome through the failure policy: `Ignore` reports
//! no match, `Fail` reports the failures.

use std::sync::Arc;

use dike_cel::{Activation, EvalError, Value};
use dike_compiler::{CompiledException, CompiledMatchCondition};
use dike_core::{FailurePolicy, PolicyException};
use tracing::debug;

use crate::error::{ConditionError, MatchError};

/// Converts an evaluation result into a boolean.
///
/// # Errors
///
/// Returns a conversion error if the value is not a `bool`.
pub fn as_bool(value: &Value) -> Result<bool, EvalError> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(EvalError::conversion(other.type_of().to_string(), "bool")),
    }
}

/// Evaluates `conditions` against `activation`.
///
/// An empty list matches.
///
/// # Errors
///
/// Returns the recorded failures if no condition was false and the failure
/// policy is [`FailurePolicy::Fail`].
pub fn match_conditions(
    conditions: &[CompiledMatchCondition],
    activation: &dyn Activation,
    failure_policy: FailurePolicy,
) -> Result<bool, MatchError> {
    let mut errors = Vec::new();
    for condition in conditions {
        match condition.program.eval(activation).and_then(|value| as_bool(&value)) {
            Ok(true) => {}
            Ok(false) => {
                debug!(condition = %condition.name, discarded = errors.len(), "Condition did not match");
                return Ok(false);
            }
            Err(error) => errors.push(ConditionError {
                name: condition.name.clone(),
                error,
            }),
        }
    }
    if errors.is_empty() {
        return Ok(true);
    }
    match failure_policy {
        FailurePolicy::Ignore => {
            debug!(errors = errors.len(), "Ignoring condition failures");
            Ok(false)
        }
        FailurePolicy::Fail => Err(MatchError::new(errors)),
    }
}

/// Evaluates every exception and returns those whose conditions all hold,
/// in declaration order.
///
/// # Errors
///
/// Returns the failures of the first exception whose conditions fail to
/// evaluate under [`FailurePolicy::Fail`].
pub fn matched_exceptions(
    exceptions: &[CompiledException],
    activation: &dyn Activation,
    failure_policy: FailurePolicy,
) -> Result<Vec<Arc<PolicyException>>, MatchError> {
    let mut matched = Vec::new();
    for exception in exceptions {
        if match_conditions(&exception.match_conditions, activation, failure_policy)? {
            debug!(exception = %exception.name(), "Exception matched");
            matched.push(exception.exception.clone());
        }
    }
    Ok(matched)
}

#[cfg(test)]
mod tests {
    use dike_cel::{build_base_environment, MapActivation};

    use super::*;

    fn conditions(sources: &[&str]) -> Vec<CompiledMatchCondition> {
        let env = build_base_environment().unwrap();
        sources
            .iter()
            .enumerate()
            .map(|(i, source)| CompiledMatchCondition {
                name: format!("c{i}"),
                program: env.program(&env.compile(source).unwrap()),
            })
            .collect()
    }

    fn run(sources: &[&str], failure_policy: FailurePolicy) -> Result<bool, MatchError> {
        match_conditions(&conditions(sources), &MapActivation::new(), failure_policy)
    }

    #[test]
    fn test_empty_list_matches() {
        assert_eq!(run(&[], FailurePolicy::Fail), Ok(true));
    }

    #[test]
    fn test_all_true_matches() {
        assert_eq!(run(&["true", "1 < 2"], FailurePolicy::Fail), Ok(true));
    }

    #[test]
    fn test_false_short_circuits() {
        assert_eq!(run(&["true", "false", "1 / 0 == 1"], FailurePolicy::Fail), Ok(false));
    }

    #[test]
    fn test_false_discards_earlier_errors() {
        assert_eq!(run(&["1 / 0 == 1", "false"], FailurePolicy::Fail), Ok(false));
    }

    #[test]
    fn test_errors_fail_without_false() {
        let err = run(&["1 / 0 == 1", "true", "[1][3] == 1"], FailurePolicy::Fail).unwrap_err();
        let names: Vec<&str> = err.errors().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["c0", "c2"]);
        assert_eq!(err.errors()[0].error, EvalError::DivisionByZero);
    }

    #[test]
    fn test_errors_ignored_by_failure_policy() {
        assert_eq!(run(&["1 / 0 == 1", "true"], FailurePolicy::Ignore), Ok(false));
    }

    #[test]
    fn test_non_bool_result_is_an_error() {
        let err = run(&["dyn('yes')"], FailurePolicy::Fail).unwrap_err();
        assert_eq!(err.errors()[0].error, EvalError::conversion("string", "bool"));
    }
}
