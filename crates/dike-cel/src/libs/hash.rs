//! Hex-encoded digests: `sha1`, `sha256` and `md5`.

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::decls::{Declarations, Overload};
use crate::stdlib::arg_str;
use crate::types::Type;
use crate::value::Value;

fn digest<D: Digest>(input: &str) -> String {
    hex::encode(D::digest(input.as_bytes()))
}

fn hash_function(name: &str, hasher: fn(&str) -> String) -> Vec<Overload> {
    let free = Overload::function(&format!("{name}_string"), vec![Type::String], Type::String, move |_, args| {
        Ok(Value::string(hasher(arg_str(args, 0)?)))
    });
    let member = Overload {
        id: format!("string_{name}"),
        member: true,
        ..free.clone()
    };
    vec![free, member]
}

pub(crate) fn declarations() -> Declarations {
    Declarations::default()
        .with_function("sha1", hash_function("sha1", digest::<Sha1>))
        .with_function("sha256", hash_function("sha256", digest::<Sha256>))
        .with_function("md5", hash_function("md5", digest::<Md5>))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::activation::MapActivation;
    use crate::env::{Env, EnvExtension, EnvOptions};
    use crate::libs::Library;
    use crate::value::Value;

    const IMAGE: &str = "ghcr.io/kyverno/kyverno:latest";

    fn eval(expr: &str) -> Value {
        let env = Env::new(EnvOptions::default())
            .unwrap()
            .extend(EnvExtension::new().with_library(Library::Hash))
            .unwrap();
        env.program(&env.compile(expr).unwrap())
            .eval(&MapActivation::new())
            .unwrap()
    }

    #[test]
    fn test_sha1() {
        assert_eq!(
            eval(&format!("sha1('{IMAGE}')")),
            Value::from("98f68a84cd3ada3a25bc42bf69ed8e0297e13022")
        );
    }

    #[test]
    fn test_sha256() {
        assert_eq!(
            eval(&format!("sha256('{IMAGE}')")),
            Value::from("e98de8e3a54bcb921de9cc72741522823cb30ef9dda17cfd228416ead4ce3760")
        );
    }

    #[test]
    fn test_md5() {
        assert_eq!(
            eval(&format!("md5('{IMAGE}')")),
            Value::from("16dc16f633974d1015cad2ffe81e7365")
        );
    }

    #[test]
    fn test_member_form_shares_binding() {
        let decls = super::declarations();
        let sha1 = &decls.functions[0];
        assert!(Arc::ptr_eq(&sha1.overloads[0].binding, &sha1.overloads[1].binding));
        assert_eq!(eval(&format!("'{IMAGE}'.sha1() == sha1('{IMAGE}')")), Value::Bool(true));
    }
}
