//! Built-in operators, conversions and string functions.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, FixedOffset, SecondsFormat, TimeZone, Timelike, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;

use crate::decls::{CallContext, Declarations, FunctionDecl, Global, Overload};
use crate::env::EnvOptions;
use crate::error::EvalError;
use crate::types::{ObjectType, Type};
use crate::value::{format_duration, Value};
use crate::variables::VARIABLES_TYPE;

type Result<T> = std::result::Result<T, EvalError>;

// ---------------------------------------------------------------------------
// Argument accessors shared with the libraries
// ---------------------------------------------------------------------------

fn unexpected(index: usize, expected: &str, found: &Value) -> EvalError {
    EvalError::invalid_argument(index, format!("expected {expected}, found {}", found.type_of()))
}

pub(crate) fn arg_str(args: &[Value], index: usize) -> Result<&str> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(unexpected(index, "string", other)),
        None => Err(EvalError::invalid_argument(index, "missing argument")),
    }
}

pub(crate) fn arg_int(args: &[Value], index: usize) -> Result<i64> {
    match args.get(index) {
        Some(Value::Int(i)) => Ok(*i),
        Some(other) => Err(unexpected(index, "int", other)),
        None => Err(EvalError::invalid_argument(index, "missing argument")),
    }
}

pub(crate) fn arg_double(args: &[Value], index: usize) -> Result<f64> {
    match args.get(index) {
        Some(Value::Double(d)) => Ok(*d),
        Some(other) => Err(unexpected(index, "double", other)),
        None => Err(EvalError::invalid_argument(index, "missing argument")),
    }
}

pub(crate) fn arg_list(args: &[Value], index: usize) -> Result<&[Value]> {
    match args.get(index) {
        Some(Value::List(items)) => Ok(items),
        Some(other) => Err(unexpected(index, "list", other)),
        None => Err(EvalError::invalid_argument(index, "missing argument")),
    }
}

pub(crate) fn arg_timestamp(args: &[Value], index: usize) -> Result<DateTime<Utc>> {
    match args.get(index) {
        Some(Value::Timestamp(ts)) => Ok(*ts),
        Some(other) => Err(unexpected(index, "timestamp", other)),
        None => Err(EvalError::invalid_argument(index, "missing argument")),
    }
}

pub(crate) fn arg_duration(args: &[Value], index: usize) -> Result<Duration> {
    match args.get(index) {
        Some(Value::Duration(d)) => Ok(*d),
        Some(other) => Err(unexpected(index, "duration", other)),
        None => Err(EvalError::invalid_argument(index, "missing argument")),
    }
}

/// Converts a list of strings into owned strings.
pub(crate) fn string_list(items: &[Value], index: usize) -> Result<Vec<String>> {
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| unexpected(index, "list(string)", item))
        })
        .collect()
}

static REGEX_CACHE: Lazy<Mutex<HashMap<String, Regex>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Compiles a regular expression, caching the result.
pub(crate) fn cached_regex(function: &str, pattern: &str) -> Result<Regex> {
    let mut cache = REGEX_CACHE.lock();
    if let Some(re) = cache.get(pattern) {
        return Ok(re.clone());
    }
    let re = Regex::new(pattern).map_err(|e| EvalError::function(function, e))?;
    cache.insert(pattern.to_string(), re.clone());
    Ok(re)
}

/// Parses a duration such as `1h30m`, `-1.5s` or `300ms`.
pub(crate) fn parse_duration(s: &str) -> Option<Duration> {
    let (negative, mut rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    if rest == "0" {
        return Some(Duration::zero());
    }
    if rest.is_empty() {
        return None;
    }
    let mut total: i128 = 0;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_end == 0 {
            return None;
        }
        let number = &rest[..number_end];
        rest = &rest[number_end..];
        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        rest = &rest[unit_end..];
        let scale: i128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60_000_000_000,
            "h" => 3_600_000_000_000,
            _ => return None,
        };
        let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && frac.is_empty() {
            return None;
        }
        let whole: i128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
        total = total.checked_add(whole.checked_mul(scale)?)?;
        if !frac.is_empty() {
            let digits = frac.len().min(18);
            let numerator: i128 = frac[..digits].parse().ok()?;
            let denominator = 10_i128.pow(u32::try_from(digits).ok()?);
            total = total.checked_add(numerator * scale / denominator)?;
        }
    }
    if negative {
        total = -total;
    }
    i64::try_from(total).ok().map(Duration::nanoseconds)
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

pub(crate) fn declarations(options: &EnvOptions) -> Declarations {
    let mut decls = Declarations::default().with_type(ObjectType::opaque(VARIABLES_TYPE));
    arithmetic(&mut decls);
    comparisons(&mut decls);
    collections(&mut decls);
    strings(&mut decls);
    conversions(&mut decls);
    time_accessors(&mut decls, options.utc_time);
    decls
}

pub(crate) fn globals() -> Vec<Global> {
    [
        ("bool", Type::Bool),
        ("int", Type::Int),
        ("uint", Type::Uint),
        ("double", Type::Double),
        ("string", Type::String),
        ("bytes", Type::Bytes),
        ("list", Type::list(Type::Dyn)),
        ("map", Type::map(Type::Dyn, Type::Dyn)),
        ("null_type", Type::Null),
        ("type", Type::Type),
    ]
    .into_iter()
    .map(|(name, ty)| Global::new(name, Type::Type, Value::Type(ty)))
    .collect()
}

fn int_binary(id: &str, op: fn(i64, i64) -> Result<i64>) -> Overload {
    Overload::function(id, vec![Type::Int, Type::Int], Type::Int, move |_, args| {
        Ok(Value::Int(op(arg_int(args, 0)?, arg_int(args, 1)?)?))
    })
}

fn uint_binary(id: &str, op: fn(u64, u64) -> Result<u64>) -> Overload {
    Overload::function(id, vec![Type::Uint, Type::Uint], Type::Uint, move |_, args| match args {
        [Value::Uint(a), Value::Uint(b)] => Ok(Value::Uint(op(*a, *b)?)),
        _ => Err(EvalError::invalid_argument(0, "expected uint")),
    })
}

fn double_binary(id: &str, op: fn(f64, f64) -> f64) -> Overload {
    Overload::function(id, vec![Type::Double, Type::Double], Type::Double, move |_, args| {
        Ok(Value::Double(op(arg_double(args, 0)?, arg_double(args, 1)?)))
    })
}

fn arithmetic(decls: &mut Declarations) {
    let a = || Type::param("A");

    decls.functions.push(FunctionDecl::new(
        "_+_",
        vec![
            int_binary("add_int64", |a, b| a.checked_add(b).ok_or(EvalError::Overflow("int"))),
            uint_binary("add_uint64", |a, b| a.checked_add(b).ok_or(EvalError::Overflow("uint"))),
            double_binary("add_double", |a, b| a + b),
            Overload::function("add_string", vec![Type::String, Type::String], Type::String, |_, args| {
                Ok(Value::string(format!("{}{}", arg_str(args, 0)?, arg_str(args, 1)?)))
            }),
            Overload::function("add_bytes", vec![Type::Bytes, Type::Bytes], Type::Bytes, |_, args| match args {
                [Value::Bytes(x), Value::Bytes(y)] => Ok(Value::Bytes(Arc::from([&x[..], &y[..]].concat()))),
                _ => Err(EvalError::invalid_argument(0, "expected bytes")),
            }),
            Overload::function("add_list", vec![Type::list(a()), Type::list(a())], Type::list(a()), |_, args| {
                let mut items = arg_list(args, 0)?.to_vec();
                items.extend_from_slice(arg_list(args, 1)?);
                Ok(Value::list(items))
            }),
            Overload::function(
                "add_timestamp_duration",
                vec![Type::Timestamp, Type::Duration],
                Type::Timestamp,
                |_, args| shift(arg_timestamp(args, 0)?, arg_duration(args, 1)?),
            ),
            Overload::function(
                "add_duration_timestamp",
                vec![Type::Duration, Type::Timestamp],
                Type::Timestamp,
                |_, args| shift(arg_timestamp(args, 1)?, arg_duration(args, 0)?),
            ),
            Overload::function(
                "add_duration_duration",
                vec![Type::Duration, Type::Duration],
                Type::Duration,
                |_, args| {
                    arg_duration(args, 0)?
                        .checked_add(&arg_duration(args, 1)?)
                        .map(Value::Duration)
                        .ok_or(EvalError::Overflow("duration"))
                },
            ),
        ],
    ));

    decls.functions.push(FunctionDecl::new(
        "_-_",
        vec![
            int_binary("subtract_int64", |a, b| a.checked_sub(b).ok_or(EvalError::Overflow("int"))),
            uint_binary("subtract_uint64", |a, b| a.checked_sub(b).ok_or(EvalError::Overflow("uint"))),
            double_binary("subtract_double", |a, b| a - b),
            Overload::function(
                "subtract_timestamp_timestamp",
                vec![Type::Timestamp, Type::Timestamp],
                Type::Duration,
                |_, args| Ok(Value::Duration(arg_timestamp(args, 0)? - arg_timestamp(args, 1)?)),
            ),
            Overload::function(
                "subtract_timestamp_duration",
                vec![Type::Timestamp, Type::Duration],
                Type::Timestamp,
                |_, args| shift(arg_timestamp(args, 0)?, -arg_duration(args, 1)?),
            ),
            Overload::function(
                "subtract_duration_duration",
                vec![Type::Duration, Type::Duration],
                Type::Duration,
                |_, args| {
                    arg_duration(args, 0)?
                        .checked_sub(&arg_duration(args, 1)?)
                        .map(Value::Duration)
                        .ok_or(EvalError::Overflow("duration"))
                },
            ),
        ],
    ));

    decls.functions.push(FunctionDecl::new(
        "_*_",
        vec![
            int_binary("multiply_int64", |a, b| a.checked_mul(b).ok_or(EvalError::Overflow("int"))),
            uint_binary("multiply_uint64", |a, b| a.checked_mul(b).ok_or(EvalError::Overflow("uint"))),
            double_binary("multiply_double", |a, b| a * b),
        ],
    ));

    decls.functions.push(FunctionDecl::new(
        "_/_",
        vec![
            int_binary("divide_int64", |a, b| {
                if b == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                a.checked_div(b).ok_or(EvalError::Overflow("int"))
            }),
            uint_binary("divide_uint64", |a, b| a.checked_div(b).ok_or(EvalError::DivisionByZero)),
            double_binary("divide_double", |a, b| a / b),
        ],
    ));

    decls.functions.push(FunctionDecl::new(
        "_%_",
        vec![
            int_binary("modulo_int64", |a, b| {
                if b == 0 {
                    return Err(EvalError::ModulusByZero);
                }
                a.checked_rem(b).ok_or(EvalError::Overflow("int"))
            }),
            uint_binary("modulo_uint64", |a, b| a.checked_rem(b).ok_or(EvalError::ModulusByZero)),
        ],
    ));

    decls.functions.push(FunctionDecl::new(
        "-_",
        vec![
            Overload::function("negate_int64", vec![Type::Int], Type::Int, |_, args| {
                arg_int(args, 0)?
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or(EvalError::Overflow("int"))
            }),
            Overload::function("negate_double", vec![Type::Double], Type::Double, |_, args| {
                Ok(Value::Double(-arg_double(args, 0)?))
            }),
        ],
    ));

    decls.functions.push(FunctionDecl::new(
        "!_",
        vec![Overload::function("logical_not", vec![Type::Bool], Type::Bool, |_, args| {
            match args {
                [Value::Bool(b)] => Ok(Value::Bool(!b)),
                _ => Err(EvalError::invalid_argument(0, "expected bool")),
            }
        })],
    ));
}

fn shift(ts: DateTime<Utc>, by: Duration) -> Result<Value> {
    ts.checked_add_signed(by)
        .map(Value::Timestamp)
        .ok_or(EvalError::Overflow("timestamp"))
}

/// Orders two values, comparing numbers across int, uint and double.
pub(crate) fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    #[allow(clippy::cast_precision_loss)]
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Uint(x), Value::Uint(y)) => Some(x.cmp(y)),
        (Value::Double(x), Value::Double(y)) => x.partial_cmp(y),
        (Value::Int(x), Value::Uint(y)) => Some(u64::try_from(*x).map_or(Ordering::Less, |x| x.cmp(y))),
        (Value::Int(x), Value::Double(y)) => (*x as f64).partial_cmp(y),
        (Value::Uint(x), Value::Double(y)) => (*x as f64).partial_cmp(y),
        (Value::Uint(_) | Value::Double(_), Value::Int(_)) | (Value::Double(_), Value::Uint(_)) => {
            compare(b, a).map(Ordering::reverse)
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bytes(x), Value::Bytes(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Timestamp(x), Value::Timestamp(y)) => Some(x.cmp(y)),
        (Value::Duration(x), Value::Duration(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn comparisons(decls: &mut Declarations) {
    let a = || Type::param("A");
    decls.functions.push(FunctionDecl::new(
        "_==_",
        vec![Overload::function("equals", vec![a(), a()], Type::Bool, |_, args| {
            Ok(Value::Bool(args[0] == args[1]))
        })],
    ));
    decls.functions.push(FunctionDecl::new(
        "_!=_",
        vec![Overload::function("not_equals", vec![a(), a()], Type::Bool, |_, args| {
            Ok(Value::Bool(args[0] != args[1]))
        })],
    ));

    let pairs = [
        (Type::Int, Type::Int, "int64"),
        (Type::Uint, Type::Uint, "uint64"),
        (Type::Double, Type::Double, "double"),
        (Type::String, Type::String, "string"),
        (Type::Bytes, Type::Bytes, "bytes"),
        (Type::Bool, Type::Bool, "bool"),
        (Type::Timestamp, Type::Timestamp, "timestamp"),
        (Type::Duration, Type::Duration, "duration"),
        (Type::Int, Type::Uint, "int64_uint64"),
        (Type::Int, Type::Double, "int64_double"),
        (Type::Uint, Type::Int, "uint64_int64"),
        (Type::Uint, Type::Double, "uint64_double"),
        (Type::Double, Type::Int, "double_int64"),
        (Type::Double, Type::Uint, "double_uint64"),
    ];
    let operators: [(&str, &str, fn(Ordering) -> bool); 4] = [
        ("_<_", "less", Ordering::is_lt),
        ("_<=_", "less_equals", Ordering::is_le),
        ("_>_", "greater", Ordering::is_gt),
        ("_>=_", "greater_equals", Ordering::is_ge),
    ];
    for (function, prefix, test) in operators {
        let overloads = pairs
            .iter()
            .map(|(lhs, rhs, suffix)| {
                Overload::function(
                    &format!("{prefix}_{suffix}"),
                    vec![lhs.clone(), rhs.clone()],
                    Type::Bool,
                    move |_, args| Ok(Value::Bool(compare(&args[0], &args[1]).is_some_and(test))),
                )
            })
            .collect();
        decls.functions.push(FunctionDecl::new(function, overloads));
    }
}

fn collections(decls: &mut Declarations) {
    let a = || Type::param("A");
    let b = || Type::param("B");

    decls.functions.push(FunctionDecl::new(
        "@in",
        vec![
            Overload::function("in_list", vec![a(), Type::list(a())], Type::Bool, |_, args| {
                Ok(Value::Bool(arg_list(args, 1)?.contains(&args[0])))
            }),
            Overload::function("in_map", vec![a(), Type::map(a(), b())], Type::Bool, |_, args| match &args[1] {
                Value::Map(entries) => Ok(Value::Bool(Value::map_get(entries, &args[0]).is_some())),
                other => Err(unexpected(1, "map", other)),
            }),
        ],
    ));

    let size = |value: &Value| -> Result<Value> {
        let n = match value {
            Value::String(s) => s.chars().count(),
            Value::Bytes(b) => b.len(),
            Value::List(items) => items.len(),
            Value::Map(entries) => entries.len(),
            other => return Err(unexpected(0, "sized value", other)),
        };
        i64::try_from(n).map(Value::Int).map_err(|_| EvalError::Overflow("int"))
    };
    let mut overloads = Vec::new();
    for (ty, name) in [
        (Type::String, "string"),
        (Type::Bytes, "bytes"),
        (Type::list(a()), "list"),
        (Type::map(a(), b()), "map"),
    ] {
        overloads.push(Overload::function(&format!("size_{name}"), vec![ty.clone()], Type::Int, move |_, args| size(&args[0])));
        overloads.push(Overload::method(&format!("{name}_size"), vec![ty], Type::Int, move |_, args| size(&args[0])));
    }
    decls.functions.push(FunctionDecl::new("size", overloads));
}

fn string_method<F>(id: &str, params: Vec<Type>, result: Type, f: F) -> Overload
where
    F: Fn(&str, &[Value]) -> Result<Value> + Send + Sync + 'static,
{
    let mut all = vec![Type::String];
    all.extend(params);
    Overload::method(id, all, result, move |_, args| f(arg_str(args, 0)?, &args[1..]))
}

/// Converts a character offset into a byte offset.
fn byte_offset(s: &str, chars: i64, index: usize) -> Result<usize> {
    let chars = usize::try_from(chars)
        .map_err(|_| EvalError::invalid_argument(index, format!("index out of range: {chars}")))?;
    if chars == 0 {
        return Ok(0);
    }
    s.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(s.len()))
        .nth(chars)
        .ok_or_else(|| EvalError::invalid_argument(index, format!("index out of range: {chars}")))
}

fn char_index(s: &str, byte: usize) -> Value {
    Value::Int(i64::try_from(s[..byte].chars().count()).unwrap_or(i64::MAX))
}

fn strings(decls: &mut Declarations) {
    let s = || Type::String;
    let functions = vec![
        FunctionDecl::new(
            "contains",
            vec![string_method("string_contains_string", vec![s()], Type::Bool, |recv, args| {
                Ok(Value::Bool(recv.contains(arg_str(args, 0)?)))
            })],
        ),
        FunctionDecl::new(
            "startsWith",
            vec![string_method("string_starts_with_string", vec![s()], Type::Bool, |recv, args| {
                Ok(Value::Bool(recv.starts_with(arg_str(args, 0)?)))
            })],
        ),
        FunctionDecl::new(
            "endsWith",
            vec![string_method("string_ends_with_string", vec![s()], Type::Bool, |recv, args| {
                Ok(Value::Bool(recv.ends_with(arg_str(args, 0)?)))
            })],
        ),
        FunctionDecl::new(
            "matches",
            vec![
                string_method("string_matches_string", vec![s()], Type::Bool, |recv, args| {
                    Ok(Value::Bool(cached_regex("matches", arg_str(args, 0)?)?.is_match(recv)))
                }),
                Overload::function("matches_string", vec![s(), s()], Type::Bool, |_, args| {
                    Ok(Value::Bool(cached_regex("matches", arg_str(args, 1)?)?.is_match(arg_str(args, 0)?)))
                }),
            ],
        ),
        FunctionDecl::new(
            "lowerAscii",
            vec![string_method("string_lower_ascii", vec![], s(), |recv, _| {
                Ok(Value::string(recv.to_ascii_lowercase()))
            })],
        ),
        FunctionDecl::new(
            "upperAscii",
            vec![string_method("string_upper_ascii", vec![], s(), |recv, _| {
                Ok(Value::string(recv.to_ascii_uppercase()))
            })],
        ),
        FunctionDecl::new(
            "trim",
            vec![string_method("string_trim", vec![], s(), |recv, _| Ok(Value::string(recv.trim())))],
        ),
        FunctionDecl::new(
            "split",
            vec![
                string_method("string_split_string", vec![s()], Type::list(s()), |recv, args| {
                    Ok(split(recv, arg_str(args, 0)?, -1))
                }),
                string_method("string_split_string_int", vec![s(), Type::Int], Type::list(s()), |recv, args| {
                    Ok(split(recv, arg_str(args, 0)?, arg_int(args, 1)?))
                }),
            ],
        ),
        FunctionDecl::new(
            "join",
            vec![
                Overload::method("list_join", vec![Type::list(s())], s(), |_, args| {
                    Ok(Value::string(string_list(arg_list(args, 0)?, 0)?.concat()))
                }),
                Overload::method("list_join_string", vec![Type::list(s()), s()], s(), |_, args| {
                    Ok(Value::string(string_list(arg_list(args, 0)?, 0)?.join(arg_str(args, 1)?)))
                }),
            ],
        ),
        FunctionDecl::new(
            "replace",
            vec![
                string_method("string_replace_string_string", vec![s(), s()], s(), |recv, args| {
                    Ok(Value::string(recv.replace(arg_str(args, 0)?, arg_str(args, 1)?)))
                }),
                string_method(
                    "string_replace_string_string_int",
                    vec![s(), s(), Type::Int],
                    s(),
                    |recv, args| {
                        let (from, to) = (arg_str(args, 0)?, arg_str(args, 1)?);
                        let replaced = match usize::try_from(arg_int(args, 2)?) {
                            Ok(n) => recv.replacen(from, to, n),
                            Err(_) => recv.replace(from, to),
                        };
                        Ok(Value::string(replaced))
                    },
                ),
            ],
        ),
        FunctionDecl::new(
            "indexOf",
            vec![
                string_method("string_index_of_string", vec![s()], Type::Int, |recv, args| {
                    Ok(recv.find(arg_str(args, 0)?).map_or(Value::Int(-1), |b| char_index(recv, b)))
                }),
                string_method("string_index_of_string_int", vec![s(), Type::Int], Type::Int, |recv, args| {
                    let start = byte_offset(recv, arg_int(args, 1)?, 2)?;
                    Ok(recv[start..]
                        .find(arg_str(args, 0)?)
                        .map_or(Value::Int(-1), |b| char_index(recv, start + b)))
                }),
            ],
        ),
        FunctionDecl::new(
            "lastIndexOf",
            vec![
                string_method("string_last_index_of_string", vec![s()], Type::Int, |recv, args| {
                    Ok(recv.rfind(arg_str(args, 0)?).map_or(Value::Int(-1), |b| char_index(recv, b)))
                }),
                string_method("string_last_index_of_string_int", vec![s(), Type::Int], Type::Int, |recv, args| {
                    let needle = arg_str(args, 0)?;
                    let end = byte_offset(recv, arg_int(args, 1)?, 2)?;
                    let limit = (end + needle.len()).min(recv.len());
                    Ok(recv
                        .get(..limit)
                        .and_then(|head| head.rfind(needle))
                        .map_or(Value::Int(-1), |b| char_index(recv, b)))
                }),
            ],
        ),
        FunctionDecl::new(
            "substring",
            vec![
                string_method("string_substring_int", vec![Type::Int], s(), |recv, args| {
                    let start = byte_offset(recv, arg_int(args, 0)?, 1)?;
                    Ok(Value::string(&recv[start..]))
                }),
                string_method("string_substring_int_int", vec![Type::Int, Type::Int], s(), |recv, args| {
                    let (from, to) = (arg_int(args, 0)?, arg_int(args, 1)?);
                    if from > to {
                        return Err(EvalError::invalid_argument(
                            2,
                            format!("invalid substring range. start: {from}, end: {to}"),
                        ));
                    }
                    let start = byte_offset(recv, from, 1)?;
                    let end = byte_offset(recv, to, 2)?;
                    Ok(Value::string(&recv[start..end]))
                }),
            ],
        ),
        FunctionDecl::new(
            "charAt",
            vec![string_method("string_char_at_int", vec![Type::Int], s(), |recv, args| {
                let start = byte_offset(recv, arg_int(args, 0)?, 1)?;
                Ok(Value::string(
                    recv[start..].chars().next().map(String::from).unwrap_or_default(),
                ))
            })],
        ),
    ];
    decls.functions.extend(functions);
}

fn split(s: &str, sep: &str, limit: i64) -> Value {
    if limit == 0 {
        return Value::list([]);
    }
    let parts: Vec<Value> = match (usize::try_from(limit).ok(), sep.is_empty()) {
        (None, false) => s.split(sep).map(Value::string).collect(),
        (Some(n), false) => s.splitn(n, sep).map(Value::string).collect(),
        (limit, true) => {
            let chars: Vec<&str> = s
                .char_indices()
                .map(|(i, c)| &s[i..i + c.len_utf8()])
                .collect();
            match limit {
                Some(n) if n < chars.len() => {
                    let mut out: Vec<Value> = chars[..n - 1].iter().map(Value::string).collect();
                    out.push(Value::string(chars[n - 1..].concat()));
                    out
                }
                _ => chars.into_iter().map(Value::string).collect(),
            }
        }
    };
    Value::list(parts)
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn conversions(decls: &mut Declarations) {
    let a = || Type::param("A");
    let to_int = |value: &Value| -> Result<Value> {
        match value {
            Value::Int(i) => Ok(Value::Int(*i)),
            Value::Uint(u) => i64::try_from(*u).map(Value::Int).map_err(|_| EvalError::Overflow("int")),
            Value::Double(d) => {
                if d.is_finite() && *d > i64::MIN as f64 && *d < i64::MAX as f64 {
                    Ok(Value::Int(d.trunc() as i64))
                } else {
                    Err(EvalError::Overflow("int"))
                }
            }
            Value::String(s) => s
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| EvalError::conversion("string", "int")),
            Value::Timestamp(ts) => Ok(Value::Int(ts.timestamp())),
            other => Err(EvalError::conversion(other.type_of().to_string(), "int")),
        }
    };
    let to_uint = |value: &Value| -> Result<Value> {
        match value {
            Value::Uint(u) => Ok(Value::Uint(*u)),
            Value::Int(i) => u64::try_from(*i).map(Value::Uint).map_err(|_| EvalError::Overflow("uint")),
            Value::Double(d) => {
                if d.is_finite() && *d >= 0.0 && *d < u64::MAX as f64 {
                    Ok(Value::Uint(d.trunc() as u64))
                } else {
                    Err(EvalError::Overflow("uint"))
                }
            }
            Value::String(s) => s
                .parse::<u64>()
                .map(Value::Uint)
                .map_err(|_| EvalError::conversion("string", "uint")),
            other => Err(EvalError::conversion(other.type_of().to_string(), "uint")),
        }
    };
    let to_double = |value: &Value| -> Result<Value> {
        match value {
            Value::Double(d) => Ok(Value::Double(*d)),
            Value::Int(i) => Ok(Value::Double(*i as f64)),
            Value::Uint(u) => Ok(Value::Double(*u as f64)),
            Value::String(s) => s
                .parse::<f64>()
                .map(Value::Double)
                .map_err(|_| EvalError::conversion("string", "double")),
            other => Err(EvalError::conversion(other.type_of().to_string(), "double")),
        }
    };
    let to_string = |value: &Value| -> Result<Value> {
        Ok(Value::string(match value {
            Value::String(s) => return Ok(Value::String(s.clone())),
            Value::Int(i) => i.to_string(),
            Value::Uint(u) => u.to_string(),
            Value::Double(d) => d.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Bytes(b) => std::str::from_utf8(b)
                .map_err(|_| EvalError::conversion("bytes", "string"))?
                .to_string(),
            Value::Timestamp(ts) => ts.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            Value::Duration(d) => format_duration(*d),
            other => return Err(EvalError::conversion(other.type_of().to_string(), "string")),
        }))
    };
    let to_bool = |value: &Value| -> Result<Value> {
        match value {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::String(s) => match s.as_ref() {
                "1" | "t" | "true" | "TRUE" | "True" => Ok(Value::Bool(true)),
                "0" | "f" | "false" | "FALSE" | "False" => Ok(Value::Bool(false)),
                _ => Err(EvalError::conversion("string", "bool")),
            },
            other => Err(EvalError::conversion(other.type_of().to_string(), "bool")),
        }
    };
    let to_timestamp = |value: &Value| -> Result<Value> {
        match value {
            Value::Timestamp(ts) => Ok(Value::Timestamp(*ts)),
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|ts| Value::Timestamp(ts.with_timezone(&Utc)))
                .map_err(|e| EvalError::function("timestamp", e)),
            Value::Int(secs) => Utc
                .timestamp_opt(*secs, 0)
                .single()
                .map(Value::Timestamp)
                .ok_or(EvalError::Overflow("timestamp")),
            other => Err(EvalError::conversion(other.type_of().to_string(), "timestamp")),
        }
    };
    let to_duration = |value: &Value| -> Result<Value> {
        match value {
            Value::Duration(d) => Ok(Value::Duration(*d)),
            Value::String(s) => parse_duration(s)
                .map(Value::Duration)
                .ok_or_else(|| EvalError::function("duration", format!("invalid duration: {s}"))),
            other => Err(EvalError::conversion(other.type_of().to_string(), "duration")),
        }
    };

    decls.functions.extend([
        conversion(
            "int",
            Type::Int,
            &[
                (Type::Int, "int64"),
                (Type::Uint, "uint64"),
                (Type::Double, "double"),
                (Type::String, "string"),
                (Type::Timestamp, "timestamp"),
            ],
            to_int,
        ),
        conversion(
            "uint",
            Type::Uint,
            &[
                (Type::Uint, "uint64"),
                (Type::Int, "int64"),
                (Type::Double, "double"),
                (Type::String, "string"),
            ],
            to_uint,
        ),
        conversion(
            "double",
            Type::Double,
            &[
                (Type::Double, "double"),
                (Type::Int, "int64"),
                (Type::Uint, "uint64"),
                (Type::String, "string"),
            ],
            to_double,
        ),
        conversion(
            "string",
            Type::String,
            &[
                (Type::String, "string"),
                (Type::Int, "int64"),
                (Type::Uint, "uint64"),
                (Type::Double, "double"),
                (Type::Bool, "bool"),
                (Type::Bytes, "bytes"),
                (Type::Timestamp, "timestamp"),
                (Type::Duration, "duration"),
            ],
            to_string,
        ),
        conversion("bool", Type::Bool, &[(Type::Bool, "bool"), (Type::String, "string")], to_bool),
        conversion(
            "timestamp",
            Type::Timestamp,
            &[
                (Type::Timestamp, "timestamp"),
                (Type::String, "string"),
                (Type::Int, "int64"),
            ],
            to_timestamp,
        ),
        conversion(
            "duration",
            Type::Duration,
            &[(Type::Duration, "duration"), (Type::String, "string")],
            to_duration,
        ),
    ]);

    decls.functions.push(FunctionDecl::new(
        "bytes",
        vec![
            Overload::function("bytes_to_bytes", vec![Type::Bytes], Type::Bytes, |_, args| Ok(args[0].clone())),
            Overload::function("string_to_bytes", vec![Type::String], Type::Bytes, |_, args| {
                Ok(Value::Bytes(Arc::from(arg_str(args, 0)?.as_bytes())))
            }),
        ],
    ));
    decls.functions.push(FunctionDecl::new(
        "dyn",
        vec![Overload::function("to_dyn", vec![a()], Type::Dyn, |_, args| Ok(args[0].clone()))],
    ));
    decls.functions.push(FunctionDecl::new(
        "type",
        vec![Overload::function("type", vec![a()], Type::Type, |_, args| {
            Ok(Value::Type(args[0].type_of()))
        })],
    ));
}

fn conversion(
    name: &str,
    result: Type,
    sources: &[(Type, &str)],
    f: fn(&Value) -> Result<Value>,
) -> FunctionDecl {
    let overloads = sources
        .iter()
        .map(|(ty, source)| {
            Overload::function(
                &format!("{source}_to_{name}"),
                vec![ty.clone()],
                result.clone(),
                move |_, args| f(&args[0]),
            )
        })
        .collect();
    FunctionDecl::new(name, overloads)
}

/// Parses a fixed-offset zone such as `UTC`, `Z`, `+02:00` or `-0530`.
fn parse_offset(zone: &str) -> Option<FixedOffset> {
    if matches!(zone, "UTC" | "utc" | "Z") {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match zone.as_bytes().first()? {
        b'+' => (1, &zone[1..]),
        b'-' => (-1, &zone[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(char::is_ascii_digit).collect();
    if digits.len() != 4 || rest.len() > 5 {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn time_accessors(decls: &mut Declarations, utc_only: bool) {
    type Accessor = fn(&DateTime<FixedOffset>) -> i64;
    let accessors: [(&str, &str, Accessor); 10] = [
        ("getFullYear", "full_year", |t| i64::from(t.year())),
        ("getMonth", "month", |t| i64::from(t.month0())),
        ("getDayOfMonth", "day_of_month", |t| i64::from(t.day0())),
        ("getDate", "date", |t| i64::from(t.day())),
        ("getDayOfWeek", "day_of_week", |t| i64::from(t.weekday().num_days_from_sunday())),
        ("getDayOfYear", "day_of_year", |t| i64::from(t.ordinal0())),
        ("getHours", "hours", |t| i64::from(t.hour())),
        ("getMinutes", "minutes", |t| i64::from(t.minute())),
        ("getSeconds", "seconds", |t| i64::from(t.second())),
        ("getMilliseconds", "milliseconds", |t| i64::from(t.nanosecond() / 1_000_000)),
    ];
    let utc = FixedOffset::east_opt(0);

    for (name, suffix, accessor) in accessors {
        let mut overloads = vec![Overload::method(
            &format!("timestamp_to_{suffix}"),
            vec![Type::Timestamp],
            Type::Int,
            move |_, args| {
                let offset = utc.ok_or_else(|| EvalError::function("timestamp", "invalid offset"))?;
                Ok(Value::Int(accessor(&arg_timestamp(args, 0)?.with_timezone(&offset))))
            },
        )];
        if !utc_only {
            overloads.push(Overload::method(
                &format!("timestamp_to_{suffix}_with_tz"),
                vec![Type::Timestamp, Type::String],
                Type::Int,
                move |call: &CallContext<'_>, args: &[Value]| {
                    let zone = arg_str(args, 1)?;
                    let offset = parse_offset(zone).ok_or_else(|| {
                        EvalError::function(call.function, format!("unsupported time zone: {zone}"))
                    })?;
                    Ok(Value::Int(accessor(&arg_timestamp(args, 0)?.with_timezone(&offset))))
                },
            ));
        }
        decls.functions.push(FunctionDecl::new(name, overloads));
    }

    type DurationAccessor = fn(&Duration) -> i64;
    let duration_accessors: [(&str, &str, DurationAccessor); 4] = [
        ("getHours", "hours", Duration::num_hours),
        ("getMinutes", "minutes", Duration::num_minutes),
        ("getSeconds", "seconds", Duration::num_seconds),
        ("getMilliseconds", "milliseconds", Duration::num_milliseconds),
    ];
    for (name, suffix, accessor) in duration_accessors {
        decls.functions.push(FunctionDecl::new(
            name,
            vec![Overload::method(
                &format!("duration_to_{suffix}"),
                vec![Type::Duration],
                Type::Int,
                move |_, args| Ok(Value::Int(accessor(&arg_duration(args, 0)?))),
            )],
        ));
    }
}
