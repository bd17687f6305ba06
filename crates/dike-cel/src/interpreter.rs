//! Tree-walking evaluator.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::activation::{Activation, Frame};
use crate::ast::MacroKind;
use crate::checker::{ComprehensionNode, Node, NodeKind};
use crate::decls::CallContext;
use crate::error::EvalError;
use crate::types::Type;
use crate::value::{MapKey, Value};

pub(crate) fn evaluate(node: &Node, activation: &dyn Activation) -> Result<Value, EvalError> {
    match &node.kind {
        NodeKind::Const(value) => Ok(value.clone()),
        NodeKind::Ident(name) => activation
            .resolve(name)
            .ok_or_else(|| EvalError::NoSuchAttribute(name.to_string())),
        NodeKind::Variable { index, name } => activation.variable(*index, name),
        NodeKind::Select { operand, field } => {
            let operand = evaluate(operand, activation)?;
            select(&operand, field, &node.ty)
        }
        NodeKind::Has { operand, field } => {
            let operand = evaluate(operand, activation)?;
            match &operand {
                Value::Map(entries) => Ok(Value::Bool(entries.contains_key(&MapKey::from(&**field)))),
                Value::Object(object) => Ok(Value::Bool(object.get(field).is_some())),
                other => Err(no_overload("has", &[other])),
            }
        }
        NodeKind::Index { operand, index } => {
            let operand = evaluate(operand, activation)?;
            let index = evaluate(index, activation)?;
            self::index(&operand, &index)
        }
        NodeKind::Call {
            function,
            overloads,
            args,
        } => {
            let values = args
                .iter()
                .map(|arg| evaluate(arg, activation))
                .collect::<Result<Vec<_>, _>>()?;
            let overload = overloads
                .iter()
                .find(|o| o.matches_args(&values))
                .ok_or_else(|| no_overload(function, &values.iter().collect::<Vec<_>>()))?;
            let call = CallContext {
                function,
                context: activation.eval_context(),
            };
            (overload.binding)(&call, &values)
        }
        NodeKind::List(items) => Ok(Value::list(
            items
                .iter()
                .map(|item| evaluate(item, activation))
                .collect::<Result<Vec<_>, _>>()?,
        )),
        NodeKind::Map(entries) => {
            let mut map = BTreeMap::new();
            for (k, v) in entries {
                let key = evaluate(k, activation)?;
                let key = MapKey::from_value(&key)
                    .ok_or_else(|| EvalError::conversion(key.type_of().to_string(), "map key"))?;
                let value = evaluate(v, activation)?;
                if map.insert(key.clone(), value).is_some() {
                    return Err(EvalError::function("map", format!("repeated key: {key}")));
                }
            }
            Ok(Value::Map(Arc::new(map)))
        }
        NodeKind::And(lhs, rhs) => logical(lhs, rhs, activation, false),
        NodeKind::Or(lhs, rhs) => logical(lhs, rhs, activation, true),
        NodeKind::Conditional(cond, then, otherwise) => match evaluate(cond, activation)? {
            Value::Bool(true) => evaluate(then, activation),
            Value::Bool(false) => evaluate(otherwise, activation),
            other => Err(no_overload("_?_:_", &[&other])),
        },
        NodeKind::Comprehension(comprehension) => comprehend(comprehension, activation),
    }
}

fn no_overload(function: &str, args: &[&Value]) -> EvalError {
    EvalError::NoMatchingOverload {
        function: function.to_string(),
        args: args
            .iter()
            .map(|v| v.type_of().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    }
}

fn select(operand: &Value, field: &str, ty: &Type) -> Result<Value, EvalError> {
    match operand {
        Value::Map(entries) => entries
            .get(&MapKey::from(field))
            .cloned()
            .ok_or_else(|| EvalError::NoSuchKey(field.to_string())),
        Value::Object(object) => Ok(object.get(field).cloned().unwrap_or_else(|| zero_value(ty))),
        other => Err(no_overload(&format!("_.{field}"), &[other])),
    }
}

/// Default for an unset struct field.
fn zero_value(ty: &Type) -> Value {
    match ty {
        Type::Bool => Value::Bool(false),
        Type::Int => Value::Int(0),
        Type::Uint => Value::Uint(0),
        Type::Double => Value::Double(0.0),
        Type::String => Value::string(""),
        Type::Bytes => Value::Bytes(Arc::from(&[][..])),
        Type::List(_) => Value::list([]),
        Type::Map(..) => Value::Map(Arc::new(BTreeMap::new())),
        _ => Value::Null,
    }
}

fn index(operand: &Value, index: &Value) -> Result<Value, EvalError> {
    match operand {
        Value::List(items) => {
            let i = match index {
                Value::Int(i) => *i,
                Value::Uint(u) => i64::try_from(*u).map_err(|_| EvalError::IndexOutOfRange(i64::MAX))?,
                #[allow(clippy::cast_possible_truncation)]
                Value::Double(d) if d.fract() == 0.0 => *d as i64,
                other => return Err(no_overload("_[_]", &[operand, other])),
            };
            usize::try_from(i)
                .ok()
                .and_then(|u| items.get(u))
                .cloned()
                .ok_or(EvalError::IndexOutOfRange(i))
        }
        Value::Map(entries) => {
            Value::map_get(entries, index).ok_or_else(|| EvalError::NoSuchKey(match index {
                Value::String(s) => s.to_string(),
                other => format!("{other:?}"),
            }))
        }
        other => Err(no_overload("_[_]", &[other, index])),
    }
}

/// Evaluates `&&` (`absorbing == false`) or `||` (`absorbing == true`).
///
/// Either operand taking the absorbing value decides the result, even if
/// the other operand failed.
fn logical(
    lhs: &Node,
    rhs: &Node,
    activation: &dyn Activation,
    absorbing: bool,
) -> Result<Value, EvalError> {
    let function = if absorbing { "_||_" } else { "_&&_" };
    let as_bool = |result: Result<Value, EvalError>| match result {
        Ok(Value::Bool(b)) => Ok(b),
        Ok(other) => Err(no_overload(function, &[&other])),
        Err(e) => Err(e),
    };
    let left = as_bool(evaluate(lhs, activation));
    if left == Ok(absorbing) {
        return Ok(Value::Bool(absorbing));
    }
    let right = as_bool(evaluate(rhs, activation));
    if right == Ok(absorbing) {
        return Ok(Value::Bool(absorbing));
    }
    left?;
    right?;
    Ok(Value::Bool(!absorbing))
}

fn comprehend(c: &ComprehensionNode, activation: &dyn Activation) -> Result<Value, EvalError> {
    let range = evaluate(&c.range, activation)?;
    let items: Vec<Value> = match &range {
        Value::List(items) => items.to_vec(),
        Value::Map(entries) => entries.keys().map(MapKey::to_value).collect(),
        other => return Err(no_overload(c.kind.name(), &[other])),
    };

    let predicate = |frame: &Frame<'_>| -> Result<bool, EvalError> {
        let Some(node) = &c.predicate else {
            return Ok(true);
        };
        match evaluate(node, frame)? {
            Value::Bool(b) => Ok(b),
            other => Err(no_overload(c.kind.name(), &[&other])),
        }
    };

    let mut error = None;
    let mut count = 0_usize;
    let mut out = Vec::new();
    for item in items {
        activation.eval_context().check()?;
        let frame = Frame {
            parent: activation,
            name: &c.var,
            value: item,
        };
        match c.kind {
            MacroKind::All => match predicate(&frame) {
                Ok(false) => return Ok(Value::Bool(false)),
                Ok(true) => {}
                Err(e) => {
                    error.get_or_insert(e);
                }
            },
            MacroKind::Exists => match predicate(&frame) {
                Ok(true) => return Ok(Value::Bool(true)),
                Ok(false) => {}
                Err(e) => {
                    error.get_or_insert(e);
                }
            },
            MacroKind::ExistsOne => {
                if predicate(&frame)? {
                    count += 1;
                }
            }
            MacroKind::Map => {
                if predicate(&frame)? {
                    if let Some(transform) = &c.transform {
                        out.push(evaluate(transform, &frame)?);
                    }
                }
            }
            MacroKind::Filter => {
                if predicate(&frame)? {
                    out.push(frame.value.clone());
                }
            }
        }
    }

    if let Some(e) = error {
        return Err(e);
    }
    Ok(match c.kind {
        MacroKind::All => Value::Bool(true),
        MacroKind::Exists => Value::Bool(false),
        MacroKind::ExistsOne => Value::Bool(count == 1),
        MacroKind::Map | MacroKind::Filter => Value::list(out),
    })
}
