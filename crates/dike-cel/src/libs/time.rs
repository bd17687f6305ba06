//! `time.now`, `time.truncate` and `time.toCron`.

use chrono::{Datelike, DurationRound, Timelike, Utc};

use crate::decls::{Declarations, Overload};
use crate::error::EvalError;
use crate::stdlib::{arg_duration, arg_timestamp};
use crate::types::{ObjectType, Type};
use crate::value::Value;

pub(crate) const NAMESPACE_TYPE: &str = "time.Time";

pub(crate) fn declarations() -> Declarations {
    let ns = || Type::object(NAMESPACE_TYPE);
    Declarations::default()
        .with_type(ObjectType::opaque(NAMESPACE_TYPE))
        .with_function(
            "now",
            vec![Overload::method("time_now", vec![ns()], Type::Timestamp, |_, _| {
                Ok(Value::Timestamp(Utc::now()))
            })],
        )
        .with_function(
            "truncate",
            vec![Overload::method(
                "time_truncate_timestamp_duration",
                vec![ns(), Type::Timestamp, Type::Duration],
                Type::Timestamp,
                |_, args| {
                    let ts = arg_timestamp(args, 1)?;
                    let by = arg_duration(args, 2)?;
                    if by <= chrono::Duration::zero() {
                        return Err(EvalError::function("time.truncate", "duration must be positive"));
                    }
                    ts.duration_trunc(by)
                        .map(Value::Timestamp)
                        .map_err(|e| EvalError::function("time.truncate", e))
                },
            )],
        )
        .with_function(
            "toCron",
            vec![Overload::method("time_to_cron_timestamp", vec![ns(), Type::Timestamp], Type::String, |_, args| {
                let ts = arg_timestamp(args, 1)?;
                Ok(Value::string(format!(
                    "{} {} {} {} {}",
                    ts.minute(),
                    ts.hour(),
                    ts.day(),
                    ts.month(),
                    ts.weekday().num_days_from_sunday()
                )))
            })],
        )
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::activation::MapActivation;
    use crate::env::build_base_environment;

    fn eval(expr: &str) -> Result<Value, EvalError> {
        let env = build_base_environment().unwrap();
        env.program(&env.compile(expr).unwrap()).eval(&MapActivation::new())
    }

    #[test]
    fn test_now_is_recent() {
        let Value::Timestamp(now) = eval("time.now()").unwrap() else {
            panic!("expected timestamp");
        };
        assert!((Utc::now() - now).num_seconds().abs() < 5);
    }

    #[test]
    fn test_truncate() {
        let result = eval("time.truncate(timestamp('2024-03-05T10:47:31Z'), duration('1h'))").unwrap();
        assert_eq!(
            result,
            Value::Timestamp(Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_truncate_rejects_zero_duration() {
        assert!(matches!(
            eval("time.truncate(timestamp('2024-03-05T10:47:31Z'), duration('0s'))"),
            Err(EvalError::Function { .. })
        ));
    }

    #[test]
    fn test_to_cron() {
        // 2024-03-05 is a Tuesday.
        assert_eq!(
            eval("time.toCron(timestamp('2024-03-05T10:47:31Z'))").unwrap(),
            Value::from("47 10 5 3 2")
        );
    }
}
