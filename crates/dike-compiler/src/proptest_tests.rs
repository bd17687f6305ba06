//! Property-based tests for policy compilation.
//!
//! These tests use proptest to verify invariants across many randomly generated policies.

use once_cell::sync::Lazy;
use proptest::prelude::*;

use dike_core::{ValidatingPolicy, Validation};

use crate::PolicyCompiler;

static COMPILER: Lazy<PolicyCompiler> = Lazy::new(|| PolicyCompiler::new().unwrap());

/// Strategy for generating valid variable names.
fn identifier_strategy() -> impl Strategy<Value = String> {
    "x_[a-z0-9_]{0,10}"
}

/// Strategy for generating comparison operators.
fn comparison_strategy() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["==", "!=", "<", "<=", ">", ">="])
}

proptest! {
    /// Test that comparisons between ints always compile as validations.
    #[test]
    fn int_comparisons_compile(a in any::<i32>(), b in any::<i32>(), op in comparison_strategy()) {
        let policy = ValidatingPolicy::new("p").with_validation(Validation::new(format!("{a} {op} {b}")));
        prop_assert!(COMPILER.compile_validating(&policy, &[]).is_ok());
    }

    /// Test that non-boolean literals are always rejected as validations.
    #[test]
    fn non_bool_validations_rejected(n in any::<i64>()) {
        let policy = ValidatingPolicy::new("p").with_validation(Validation::new(n.to_string()));
        let err = COMPILER.compile_validating(&policy, &[]).unwrap_err();
        let first = err.field_errors().unwrap().first().unwrap().clone();
        prop_assert_eq!(first.field, "spec.validations[0].expression");
    }

    /// Test that every declared variable is compiled once, in order.
    #[test]
    fn variables_keep_declaration_order(names in prop::collection::btree_set(identifier_strategy(), 1..6)) {
        let mut policy = ValidatingPolicy::new("p").with_validation(Validation::new("true"));
        for (i, name) in names.iter().enumerate() {
            policy = policy.with_variable(name.clone(), i.to_string());
        }
        let compiled = COMPILER.compile_validating(&policy, &[]).unwrap();
        let compiled_names: Vec<&str> = compiled.variables.iter().map(|v| v.name.as_str()).collect();
        let expected: Vec<&str> = names.iter().map(String::as_str).collect();
        prop_assert_eq!(compiled_names, expected);
    }

    /// Test that a variable chain referencing earlier variables compiles.
    #[test]
    fn variables_reference_earlier_variables(depth in 1usize..8) {
        let mut policy = ValidatingPolicy::new("p").with_variable("v0", "1");
        for i in 1..=depth {
            policy = policy.with_variable(format!("v{i}"), format!("variables.v{} + 1", i - 1));
        }
        policy = policy.with_validation(Validation::new(format!("variables.v{depth} == {}", depth + 1)));
        prop_assert!(COMPILER.compile_validating(&policy, &[]).is_ok());
    }
}
