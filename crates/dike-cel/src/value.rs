//! Runtime values.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use base64::Engine as _;
use chrono::{DateTime, Duration, SecondsFormat, Utc};

use crate::error::EvalError;
use crate::types::Type;

/// A runtime value.
///
/// Containers are reference counted, so cloning a value is cheap.
#[derive(Debug, Clone)]
pub enum Value {
    /// `null`.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    Uint(u64),
    /// Float.
    Double(f64),
    /// String.
    String(Arc<str>),
    /// Bytes.
    Bytes(Arc<[u8]>),
    /// List.
    List(Arc<Vec<Value>>),
    /// Map.
    Map(Arc<BTreeMap<MapKey, Value>>),
    /// Timestamp in UTC.
    Timestamp(DateTime<Utc>),
    /// Duration.
    Duration(Duration),
    /// A type value, e.g. the result of `type(x)`.
    Type(Type),
    /// A struct-like object with named fields.
    Object(Arc<ObjectValue>),
    /// An opaque host value such as a library context handle.
    Opaque(Arc<dyn OpaqueValue>),
}

/// A map key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MapKey {
    /// Boolean key.
    Bool(bool),
    /// Signed integer key.
    Int(i64),
    /// Unsigned integer key.
    Uint(u64),
    /// String key.
    String(Arc<str>),
}

impl MapKey {
    /// Converts a value into a key, if the value type can key a map.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Int(i) => Some(Self::Int(*i)),
            Value::Uint(u) => Some(Self::Uint(*u)),
            Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }

    /// Converts the key back into a value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(*i),
            Self::Uint(u) => Value::Uint(*u),
            Self::String(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Uint(u) => write!(f, "{u}u"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for MapKey {
    fn from(s: &str) -> Self {
        Self::String(Arc::from(s))
    }
}

/// A struct-like object value.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectValue {
    type_name: Arc<str>,
    fields: BTreeMap<String, Value>,
}

impl ObjectValue {
    /// Creates an object of the given type with no fields set.
    #[must_use]
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: Arc::from(type_name),
            fields: BTreeMap::new(),
        }
    }

    /// Sets a field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Returns the object type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Iterates over set fields.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }
}

/// A host value exposed to expressions without a field structure.
///
/// Library context handles (`http`, `resource`, ...) and parsed image
/// references are opaque values; expressions interact with them only through
/// the overloads their library declares.
pub trait OpaqueValue: fmt::Debug + Send + Sync + 'static {
    /// The declared object type name.
    fn type_name(&self) -> &str;

    /// Returns `self` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Compares with another opaque value of the same type.
    fn equals(&self, _other: &dyn OpaqueValue) -> bool {
        false
    }

    /// Converts to JSON, if the value has a JSON form.
    fn to_json(&self) -> Option<serde_json::Value> {
        None
    }
}

impl Value {
    /// Creates a string value.
    #[must_use]
    pub fn string(s: impl AsRef<str>) -> Self {
        Self::String(Arc::from(s.as_ref()))
    }

    /// Creates a list value.
    #[must_use]
    pub fn list(items: impl IntoIterator<Item = Self>) -> Self {
        Self::List(Arc::new(items.into_iter().collect()))
    }

    /// Creates a map value with string keys.
    #[must_use]
    pub fn map<K: AsRef<str>>(entries: impl IntoIterator<Item = (K, Self)>) -> Self {
        Self::Map(Arc::new(
            entries
                .into_iter()
                .map(|(k, v)| (MapKey::String(Arc::from(k.as_ref())), v))
                .collect(),
        ))
    }

    /// Wraps an opaque host value.
    #[must_use]
    pub fn opaque(value: impl OpaqueValue) -> Self {
        Self::Opaque(Arc::new(value))
    }

    /// Returns the runtime type of the value.
    #[must_use]
    pub fn type_of(&self) -> Type {
        match self {
            Self::Null => Type::Null,
            Self::Bool(_) => Type::Bool,
            Self::Int(_) => Type::Int,
            Self::Uint(_) => Type::Uint,
            Self::Double(_) => Type::Double,
            Self::String(_) => Type::String,
            Self::Bytes(_) => Type::Bytes,
            Self::List(_) => Type::list(Type::Dyn),
            Self::Map(_) => Type::map(Type::Dyn, Type::Dyn),
            Self::Timestamp(_) => Type::Timestamp,
            Self::Duration(_) => Type::Duration,
            Self::Type(_) => Type::Type,
            Self::Object(o) => Type::object(o.type_name()),
            Self::Opaque(o) => Type::object(o.type_name()),
        }
    }

    /// Returns true if the value is an instance of `ty`.
    ///
    /// Container element types are not inspected; elements are checked when
    /// they are used.
    #[must_use]
    pub fn matches(&self, ty: &Type) -> bool {
        match (ty, self) {
            (Type::Dyn | Type::Param(_), _)
            | (Type::Null, Self::Null)
            | (Type::Bool, Self::Bool(_))
            | (Type::Int, Self::Int(_))
            | (Type::Uint, Self::Uint(_))
            | (Type::Double, Self::Double(_))
            | (Type::String, Self::String(_))
            | (Type::Bytes, Self::Bytes(_))
            | (Type::List(_), Self::List(_))
            | (Type::Map(..), Self::Map(_))
            | (Type::Timestamp, Self::Timestamp(_))
            | (Type::Duration, Self::Duration(_))
            | (Type::Type, Self::Type(_)) => true,
            (Type::Object(name), Self::Object(o)) => name.as_ref() == o.type_name(),
            (Type::Object(name), Self::Opaque(o)) => name.as_ref() == o.type_name(),
            _ => false,
        }
    }

    /// Returns the boolean payload.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the string payload.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the list payload.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the map payload.
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<MapKey, Self>> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Downcasts an opaque value.
    #[must_use]
    pub fn as_opaque<T: OpaqueValue>(&self) -> Option<&T> {
        match self {
            Self::Opaque(o) => o.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Returns true for `null`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Looks up a map entry, allowing numeric keys of different types to
    /// address the same entry.
    #[must_use]
    pub fn map_get(entries: &BTreeMap<MapKey, Self>, key: &Self) -> Option<Self> {
        let direct = MapKey::from_value(key).and_then(|k| entries.get(&k));
        if let Some(value) = direct {
            return Some(value.clone());
        }
        let alternative = match key {
            Self::Int(i) => u64::try_from(*i).ok().map(MapKey::Uint),
            Self::Uint(u) => i64::try_from(*u).ok().map(MapKey::Int),
            Self::Double(d) if d.fract() == 0.0 => {
                #[allow(clippy::cast_possible_truncation)]
                let i = *d as i64;
                Some(MapKey::Int(i))
            }
            _ => None,
        };
        alternative.and_then(|k| entries.get(&k)).cloned()
    }

    /// Converts a decoded JSON document into a value.
    ///
    /// Integral numbers become `int` (or `uint` above `i64::MAX`); all other
    /// numbers become `double`.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_u64().map(Self::Uint))
                .unwrap_or_else(|| Self::Double(n.as_f64().unwrap_or(f64::NAN))),
            serde_json::Value::String(s) => Self::string(s),
            serde_json::Value::Array(items) => Self::list(items.iter().map(Self::from_json)),
            serde_json::Value::Object(entries) => Self::Map(Arc::new(
                entries
                    .iter()
                    .map(|(k, v)| (MapKey::from(k.as_str()), Self::from_json(v)))
                    .collect(),
            )),
        }
    }

    /// Converts the value into JSON.
    ///
    /// # Errors
    ///
    /// Returns a conversion error for non-finite doubles, type values and
    /// opaque values without a JSON form.
    pub fn to_json(&self) -> Result<serde_json::Value, EvalError> {
        Ok(match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Uint(u) => serde_json::Value::from(*u),
            Self::Double(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .ok_or_else(|| EvalError::conversion("double", "json"))?,
            Self::String(s) => serde_json::Value::String(s.to_string()),
            Self::Bytes(b) => {
                serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(b))
            }
            Self::List(items) => serde_json::Value::Array(
                items.iter().map(Self::to_json).collect::<Result<_, _>>()?,
            ),
            Self::Map(entries) => {
                let mut object = serde_json::Map::new();
                for (k, v) in entries.iter() {
                    object.insert(k.to_string(), v.to_json()?);
                }
                serde_json::Value::Object(object)
            }
            Self::Timestamp(ts) => {
                serde_json::Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Self::Duration(d) => serde_json::Value::String(format_duration(*d)),
            Self::Object(o) => {
                let mut object = serde_json::Map::new();
                for (k, v) in o.fields() {
                    object.insert(k.clone(), v.to_json()?);
                }
                serde_json::Value::Object(object)
            }
            Self::Opaque(o) => o
                .to_json()
                .ok_or_else(|| EvalError::conversion(o.type_name(), "json"))?,
            Self::Type(t) => return Err(EvalError::conversion(format!("type({t})"), "json")),
        })
    }
}

/// Formats a duration the way `string(duration)` renders it, e.g. `90s` or
/// `1.5s`.
#[must_use]
pub fn format_duration(d: Duration) -> String {
    let secs = d.num_seconds();
    let nanos = (d - Duration::seconds(secs)).num_nanoseconds().unwrap_or(0);
    if nanos == 0 {
        format!("{secs}s")
    } else {
        let sign = if secs == 0 && nanos < 0 { "-" } else { "" };
        let frac = format!("{:09}", nanos.unsigned_abs());
        format!("{sign}{secs}.{}s", frac.trim_end_matches('0'))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Uint(a), Self::Uint(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a == b,
            (Self::Int(i), Self::Uint(u)) | (Self::Uint(u), Self::Int(i)) => {
                u64::try_from(*i).is_ok_and(|i| i == *u)
            }
            #[allow(clippy::cast_precision_loss)]
            (Self::Int(i), Self::Double(d)) | (Self::Double(d), Self::Int(i)) => *i as f64 == *d,
            #[allow(clippy::cast_precision_loss)]
            (Self::Uint(u), Self::Double(d)) | (Self::Double(d), Self::Uint(u)) => *u as f64 == *d,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| Self::map_get(b, &k.to_value()).is_some_and(|w| *v == w))
            }
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::Duration(a), Self::Duration(b)) => a == b,
            (Self::Type(a), Self::Type(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Opaque(a), Self::Opaque(b)) => {
                a.type_name() == b.type_name() && a.equals(b.as_ref())
            }
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        Self::Uint(u)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Self::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(Arc::from(s))
    }
}

impl From<Vec<Self>> for Value {
    fn from(items: Vec<Self>) -> Self {
        Self::List(Arc::new(items))
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::Timestamp(ts)
    }
}

impl From<Duration> for Value {
    fn from(d: Duration) -> Self {
        Self::Duration(d)
    }
}

impl From<ObjectValue> for Value {
    fn from(o: ObjectValue) -> Self {
        Self::Object(Arc::new(o))
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_numbers() {
        assert_eq!(Value::from_json(&json!(3)), Value::Int(3));
        assert!(matches!(Value::from_json(&json!(3)), Value::Int(3)));
        assert!(matches!(Value::from_json(&json!(u64::MAX)), Value::Uint(u64::MAX)));
        assert!(matches!(Value::from_json(&json!(1.5)), Value::Double(d) if d == 1.5));
    }

    #[test]
    fn test_json_roundtrip_for_documents() {
        let doc = json!({"metadata": {"name": "web", "labels": {"app": "x"}}, "replicas": 2, "tags": ["a", "b"]});
        assert_eq!(Value::from_json(&doc).to_json().unwrap(), doc);
    }

    #[test]
    fn test_cross_type_numeric_equality() {
        assert_eq!(Value::Int(1), Value::Uint(1));
        assert_eq!(Value::Int(2), Value::Double(2.0));
        assert_ne!(Value::Int(-1), Value::Uint(u64::MAX));
        assert_ne!(Value::Double(f64::NAN), Value::Double(f64::NAN));
    }

    #[test]
    fn test_mixed_kinds_are_unequal() {
        assert_ne!(Value::string("1"), Value::Int(1));
        assert_ne!(Value::Null, Value::Bool(false));
    }

    #[test]
    fn test_map_equality_ignores_key_numeric_type() {
        let a = Value::Map(Arc::new([(MapKey::Int(1), Value::Bool(true))].into_iter().collect()));
        let b = Value::Map(Arc::new([(MapKey::Uint(1), Value::Bool(true))].into_iter().collect()));
        assert_eq!(a, b);
    }

    #[test]
    fn test_map_get_numeric_alias() {
        let entries: BTreeMap<MapKey, Value> = [(MapKey::Int(2), Value::string("two"))].into_iter().collect();
        assert_eq!(Value::map_get(&entries, &Value::Uint(2)), Some(Value::string("two")));
        assert_eq!(Value::map_get(&entries, &Value::Double(2.0)), Some(Value::string("two")));
        assert_eq!(Value::map_get(&entries, &Value::Int(3)), None);
    }

    #[test]
    fn test_matches_runtime_types() {
        assert!(Value::Int(1).matches(&Type::Int));
        assert!(!Value::Int(1).matches(&Type::Uint));
        assert!(Value::list([]).matches(&Type::list(Type::String)));
        let sa = Value::from(ObjectValue::new("user.ServiceAccount"));
        assert!(sa.matches(&Type::object("user.ServiceAccount")));
        assert!(!sa.matches(&Type::object("image.Image")));
    }

    #[test]
    fn test_to_json_rejects_nan() {
        assert!(Value::Double(f64::NAN).to_json().is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::seconds(90)), "90s");
        assert_eq!(format_duration(Duration::milliseconds(1500)), "1.5s");
        assert_eq!(format_duration(Duration::milliseconds(-500)), "-0.5s");
    }

    #[test]
    fn test_object_to_json() {
        let sa = ObjectValue::new("user.ServiceAccount")
            .with_field("namespace", "foo")
            .with_field("name", "bar");
        assert_eq!(
            Value::from(sa).to_json().unwrap(),
            json!({"namespace": "foo", "name": "bar"})
        );
    }
}
