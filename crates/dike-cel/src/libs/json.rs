//! `json.unmarshal`.

use crate::decls::{Declarations, Overload};
use crate::error::EvalError;
use crate::stdlib::arg_str;
use crate::types::{ObjectType, Type};
use crate::value::Value;

pub(crate) const NAMESPACE_TYPE: &str = "json.JSON";

pub(crate) fn declarations() -> Declarations {
    Declarations::default()
        .with_type(ObjectType::opaque(NAMESPACE_TYPE))
        .with_function(
            "unmarshal",
            vec![Overload::method(
                "json_unmarshal_string",
                vec![Type::object(NAMESPACE_TYPE), Type::String],
                Type::Dyn,
                |_, args| {
                    let parsed: serde_json::Value =
                        serde_json::from_str(arg_str(args, 1)?).map_err(|e| EvalError::function("json.unmarshal", e))?;
                    Ok(Value::from_json(&parsed))
                },
            )],
        )
}
