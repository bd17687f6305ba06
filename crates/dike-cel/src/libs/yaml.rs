//! `yaml.parse`.

use crate::decls::{Declarations, Overload};
use crate::error::EvalError;
use crate::stdlib::arg_str;
use crate::types::{ObjectType, Type};
use crate::value::Value;

pub(crate) const NAMESPACE_TYPE: &str = "yaml.YAML";

pub(crate) fn declarations() -> Declarations {
    Declarations::default()
        .with_type(ObjectType::opaque(NAMESPACE_TYPE))
        .with_function(
            "parse",
            vec![Overload::method(
                "yaml_parse_string",
                vec![Type::object(NAMESPACE_TYPE), Type::String],
                Type::Dyn,
                |_, args| {
                    let parsed: serde_json::Value =
                        serde_yaml::from_str(arg_str(args, 1)?).map_err(|e| EvalError::function("yaml.parse", e))?;
                    Ok(Value::from_json(&parsed))
                },
            )],
        )
}
