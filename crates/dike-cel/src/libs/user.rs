//! Service-account user name parsing.

use crate::decls::{Declarations, Overload};
use crate::stdlib::arg_str;
use crate::types::{ObjectType, Type};
use crate::value::{ObjectValue, Value};

/// Object type returned by `parseServiceAccount`.
pub const SERVICE_ACCOUNT_TYPE: &str = "user.ServiceAccount";

const PREFIX: &str = "system:serviceaccount:";

/// Splits `system:serviceaccount:<namespace>:<name>` into namespace and
/// name. Colons after the namespace belong to the name.
#[must_use]
pub fn parse_service_account(user: &str) -> Option<(&str, &str)> {
    user.strip_prefix(PREFIX)?.split_once(':')
}

pub(crate) fn declarations() -> Declarations {
    Declarations::default()
        .with_type(ObjectType::structure(
            SERVICE_ACCOUNT_TYPE,
            [("namespace", Type::String), ("name", Type::String)],
        ))
        .with_function(
            "parseServiceAccount",
            vec![Overload::function(
                "parse_service_account_string",
                vec![Type::String],
                Type::object(SERVICE_ACCOUNT_TYPE),
                |_, args| {
                    let account = ObjectValue::new(SERVICE_ACCOUNT_TYPE);
                    let account = match parse_service_account(arg_str(args, 0)?) {
                        Some((namespace, name)) => account.with_field("namespace", namespace).with_field("name", name),
                        None => account,
                    };
                    Ok(Value::from(account))
                },
            )],
        )
}
