//! Decimal rounding.

use crate::decls::{Declarations, Overload};
use crate::stdlib::{arg_double, arg_int};
use crate::types::{ObjectType, Type};
use crate::value::Value;

pub(crate) const NAMESPACE_TYPE: &str = "math.Math";

/// Rounds half away from zero to `precision` decimal places. A negative
/// precision rounds to tens, hundreds and so on.
fn round(value: f64, precision: i64) -> f64 {
    #[allow(clippy::cast_possible_truncation)]
    let precision = precision.clamp(-308, 308) as i32;
    if precision >= 0 {
        let factor = 10f64.powi(precision);
        (value * factor).round() / factor
    } else {
        let factor = 10f64.powi(-precision);
        (value / factor).round() * factor
    }
}

pub(crate) fn declarations() -> Declarations {
    let free = Overload::function("round_double_int", vec![Type::Double, Type::Int], Type::Double, |_, args| {
        Ok(Value::Double(round(arg_double(args, 0)?, arg_int(args, 1)?)))
    });
    let namespaced = Overload::method(
        "math_round_double_int",
        vec![Type::object(NAMESPACE_TYPE), Type::Double, Type::Int],
        Type::Double,
        |_, args| Ok(Value::Double(round(arg_double(args, 1)?, arg_int(args, 2)?))),
    );
    Declarations::default()
        .with_type(ObjectType::opaque(NAMESPACE_TYPE))
        .with_function("round", vec![free, namespaced])
}

#[cfg(test)]
mod tests {
    use super::round;
    use crate::activation::MapActivation;
    use crate::env::build_base_environment;
    use crate::value::Value;

    fn eval(expr: &str) -> Value {
        let env = build_base_environment().unwrap();
        env.program(&env.compile(expr).unwrap())
            .eval(&MapActivation::new())
            .unwrap()
    }

    #[test]
    fn test_round_positive_precision() {
        assert!((round(10.125, 2) - 10.13).abs() < f64::EPSILON);
        assert!((round(-10.125, 2) + 10.13).abs() < f64::EPSILON);
    }

    #[test]
    fn test_round_zero_precision() {
        assert!((round(10.125, 0) - 10.0).abs() < f64::EPSILON);
        assert!((round(10.5, 0) - 11.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_round_negative_precision() {
        assert!((round(12345.6789, -2) - 12300.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_free_and_namespaced_forms() {
        assert_eq!(eval("round(10.125, 2)"), Value::Double(10.13));
        assert_eq!(eval("math.round(12345.6789, -2)"), Value::Double(12300.0));
        assert_eq!(eval("math.round(10.125, 0) == 10.0"), Value::Bool(true));
    }
}
