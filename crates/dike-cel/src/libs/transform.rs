//! `listObjToMap`: pairs two lists of objects into a map.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::decls::{Declarations, Overload};
use crate::error::EvalError;
use crate::stdlib::{arg_list, arg_str};
use crate::types::Type;
use crate::value::{MapKey, Value};

fn field(item: &Value, name: &str) -> Option<Value> {
    match item {
        Value::Map(entries) => entries.get(&MapKey::from(name)).cloned(),
        Value::Object(object) => object.get(name).cloned(),
        _ => None,
    }
}

/// Builds `{keys[i][key_field]: values[i][value_field]}`. Pairs whose key is
/// missing or not a string are skipped.
fn list_obj_to_map(keys: &[Value], values: &[Value], key_field: &str, value_field: &str) -> Result<Value, EvalError> {
    if keys.len() != values.len() {
        return Err(EvalError::function(
            "listObjToMap",
            format!("lists have different lengths: {} and {}", keys.len(), values.len()),
        ));
    }
    let mut out = BTreeMap::new();
    for (k, v) in keys.iter().zip(values) {
        let Some(Value::String(key)) = field(k, key_field) else {
            continue;
        };
        out.insert(MapKey::String(key), field(v, value_field).unwrap_or(Value::Null));
    }
    Ok(Value::Map(Arc::new(out)))
}

pub(crate) fn declarations() -> Declarations {
    Declarations::default().with_function(
        "listObjToMap",
        vec![Overload::function(
            "list_obj_to_map_list_list_string_string",
            vec![
                Type::list(Type::Dyn),
                Type::list(Type::Dyn),
                Type::String,
                Type::String,
            ],
            Type::map(Type::String, Type::Dyn),
            |_, args| list_obj_to_map(arg_list(args, 0)?, arg_list(args, 1)?, arg_str(args, 2)?, arg_str(args, 3)?),
        )],
    )
}
