//! Static types of the expression language.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// A static type.
///
/// `Dyn` is the gradual type: it is assignable to and from every other type,
/// deferring the check to runtime overload dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// Any type; checked at runtime.
    Dyn,
    /// The type of `null`.
    Null,
    /// Boolean.
    Bool,
    /// Signed 64-bit integer.
    Int,
    /// Unsigned 64-bit integer.
    Uint,
    /// 64-bit float.
    Double,
    /// UTF-8 string.
    String,
    /// Byte sequence.
    Bytes,
    /// Point in time, normalized to UTC.
    Timestamp,
    /// Signed span of time.
    Duration,
    /// Homogeneous list.
    List(Box<Type>),
    /// Map with homogeneous keys and values.
    Map(Box<Type>, Box<Type>),
    /// The type of type values.
    Type,
    /// A named object type, struct-like or opaque.
    Object(Arc<str>),
    /// A type parameter in a generic overload signature.
    Param(Arc<str>),
}

impl Type {
    /// Returns `list(elem)`.
    #[must_use]
    pub fn list(elem: Self) -> Self {
        Self::List(Box::new(elem))
    }

    /// Returns `map(key, value)`.
    #[must_use]
    pub fn map(key: Self, value: Self) -> Self {
        Self::Map(Box::new(key), Box::new(value))
    }

    /// Returns a named object type.
    #[must_use]
    pub fn object(name: &str) -> Self {
        Self::Object(Arc::from(name))
    }

    /// Returns a type parameter.
    #[must_use]
    pub fn param(name: &str) -> Self {
        Self::Param(Arc::from(name))
    }

    /// Returns true for [`Type::Dyn`].
    #[must_use]
    pub const fn is_dyn(&self) -> bool {
        matches!(self, Self::Dyn)
    }

    /// Returns true if a value of type `other` may flow where `self` is
    /// expected.
    ///
    /// # Examples
    ///
    /// ```
    /// use dike_cel::Type;
    ///
    /// assert!(Type::Bool.is_assignable_from(&Type::Bool));
    /// assert!(Type::Bool.is_assignable_from(&Type::Dyn));
    /// assert!(Type::list(Type::String).is_assignable_from(&Type::list(Type::Dyn)));
    /// assert!(!Type::Bool.is_assignable_from(&Type::Int));
    /// ```
    #[must_use]
    pub fn is_assignable_from(&self, other: &Self) -> bool {
        unify(self, other, &mut HashMap::new())
    }

    /// Returns the object type names referenced by this type.
    pub(crate) fn object_names(&self, out: &mut Vec<Arc<str>>) {
        match self {
            Self::Object(name) => out.push(name.clone()),
            Self::List(elem) => elem.object_names(out),
            Self::Map(key, value) => {
                key.object_names(out);
                value.object_names(out);
            }
            _ => {}
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dyn => write!(f, "dyn"),
            Self::Null => write!(f, "null_type"),
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Uint => write!(f, "uint"),
            Self::Double => write!(f, "double"),
            Self::String => write!(f, "string"),
            Self::Bytes => write!(f, "bytes"),
            Self::Timestamp => write!(f, "google.protobuf.Timestamp"),
            Self::Duration => write!(f, "google.protobuf.Duration"),
            Self::List(elem) => write!(f, "list({elem})"),
            Self::Map(key, value) => write!(f, "map({key}, {value})"),
            Self::Type => write!(f, "type"),
            Self::Object(name) | Self::Param(name) => write!(f, "{name}"),
        }
    }
}

/// Unifies a parameter type against an argument type, binding type
/// parameters in `bindings`.
pub(crate) fn unify(param: &Type, arg: &Type, bindings: &mut HashMap<Arc<str>, Type>) -> bool {
    match (param, arg) {
        (Type::Param(name), _) => match bindings.get(name).cloned() {
            Some(bound) if bound == *arg || bound.is_dyn() => true,
            Some(_) if arg.is_dyn() => {
                bindings.insert(name.clone(), Type::Dyn);
                true
            }
            Some(bound) => {
                if !unify(&bound, arg, bindings) {
                    return false;
                }
                // widen to the more general side, e.g. list(dyn) over list(string)
                if contains_dyn(arg) && !contains_dyn(&bound) {
                    bindings.insert(name.clone(), arg.clone());
                }
                true
            }
            None => {
                bindings.insert(name.clone(), arg.clone());
                true
            }
        },
        (Type::Dyn, _) | (_, Type::Dyn) => true,
        (Type::List(p), Type::List(a)) => unify(p, a, bindings),
        (Type::Map(pk, pv), Type::Map(ak, av)) => unify(pk, ak, bindings) && unify(pv, av, bindings),
        (Type::Object(_), Type::Null) | (Type::Null, Type::Object(_)) => true,
        (p, a) => p == a,
    }
}

fn contains_dyn(ty: &Type) -> bool {
    match ty {
        Type::Dyn => true,
        Type::List(elem) => contains_dyn(elem),
        Type::Map(key, value) => contains_dyn(key) || contains_dyn(value),
        _ => false,
    }
}

/// Replaces bound type parameters; unbound parameters become `dyn`.
pub(crate) fn substitute(ty: &Type, bindings: &HashMap<Arc<str>, Type>) -> Type {
    match ty {
        Type::Param(name) => bindings.get(name).map_or(Type::Dyn, |t| substitute(t, bindings)),
        Type::List(elem) => Type::list(substitute(elem, bindings)),
        Type::Map(key, value) => Type::map(substitute(key, bindings), substitute(value, bindings)),
        other => other.clone(),
    }
}

/// Declaration of a named object type.
///
/// Struct-like types declare their fields and support selection with `.`;
/// opaque types only participate in overload resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectType {
    name: Arc<str>,
    fields: Option<BTreeMap<String, Type>>,
}

impl ObjectType {
    /// Declares an opaque type.
    #[must_use]
    pub fn opaque(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            fields: None,
        }
    }

    /// Declares a struct-like type with the given fields.
    ///
    /// # Examples
    ///
    /// ```
    /// use dike_cel::{ObjectType, Type};
    ///
    /// let sa = ObjectType::structure("user.ServiceAccount", [
    ///     ("namespace", Type::String),
    ///     ("name", Type::String),
    /// ]);
    /// assert_eq!(sa.field("name"), Some(&Type::String));
    /// assert_eq!(sa.field("uid"), None);
    /// ```
    #[must_use]
    pub fn structure<'a>(name: &str, fields: impl IntoIterator<Item = (&'a str, Type)>) -> Self {
        Self {
            name: Arc::from(name),
            fields: Some(
                fields
                    .into_iter()
                    .map(|(n, t)| (n.to_string(), t))
                    .collect(),
            ),
        }
    }

    /// Returns the type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the static type of this object type.
    #[must_use]
    pub fn as_type(&self) -> Type {
        Type::Object(self.name.clone())
    }

    /// Returns true if the type declares fields.
    #[must_use]
    pub const fn is_struct(&self) -> bool {
        self.fields.is_some()
    }

    /// Returns the type of a declared field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Type> {
        self.fields.as_ref().and_then(|f| f.get(name))
    }

    pub(crate) fn field_types(&self) -> impl Iterator<Item = &Type> {
        self.fields.iter().flat_map(BTreeMap::values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Type::map(Type::String, Type::list(Type::Int)).to_string(), "map(string, list(int))");
        assert_eq!(Type::object("image.Image").to_string(), "image.Image");
        assert_eq!(Type::Null.to_string(), "null_type");
    }

    #[test]
    fn test_dyn_is_assignable_both_ways() {
        assert!(Type::Dyn.is_assignable_from(&Type::String));
        assert!(Type::String.is_assignable_from(&Type::Dyn));
    }

    #[test]
    fn test_null_assignable_to_objects() {
        let object = Type::object("user.ServiceAccount");
        assert!(object.is_assignable_from(&Type::Null));
        assert!(!Type::String.is_assignable_from(&Type::Null));
    }

    #[test]
    fn test_unify_binds_params() {
        let mut bindings = HashMap::new();
        assert!(unify(&Type::param("A"), &Type::Int, &mut bindings));
        assert!(unify(&Type::list(Type::param("A")), &Type::list(Type::Int), &mut bindings));
        assert!(!unify(&Type::param("A"), &Type::String, &mut bindings));
        assert_eq!(substitute(&Type::param("A"), &bindings), Type::Int);
    }

    #[test]
    fn test_unify_widens_to_dyn() {
        let mut bindings = HashMap::new();
        assert!(unify(&Type::param("A"), &Type::list(Type::String), &mut bindings));
        assert!(unify(&Type::param("A"), &Type::list(Type::Dyn), &mut bindings));
        assert_eq!(substitute(&Type::param("A"), &bindings), Type::list(Type::Dyn));
    }

    #[test]
    fn test_substitute_unbound_is_dyn() {
        let bindings = HashMap::new();
        assert_eq!(substitute(&Type::list(Type::param("T")), &bindings), Type::list(Type::Dyn));
    }

    #[test]
    fn test_object_names() {
        let mut names = Vec::new();
        Type::map(Type::String, Type::list(Type::object("a.B"))).object_names(&mut names);
        assert_eq!(names, vec![Arc::from("a.B")]);
    }
}
