//! Field paths and field-indexed errors.
//!
//! Compile diagnostics and structural validation failures are always anchored
//! to the policy field that produced them (for example
//! `spec.validations[1].messageExpression`), so they can be surfaced verbatim
//! as resource admission errors.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single step in a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Field(String),
    Index(usize),
    Key(String),
}

/// A path to a field inside a policy document.
///
/// Paths are built by chaining [`child`](Self::child), [`index`](Self::index)
/// and [`key`](Self::key). Every builder returns a new path, so a parent path
/// can be reused for each of its children.
///
/// # Examples
///
/// ```
/// use dike_core::FieldPath;
///
/// let path = FieldPath::new("spec").child("validations").index(1).child("expression");
/// assert_eq!(path.to_string(), "spec.validations[1].expression");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    /// Creates a path rooted at the given field name.
    #[must_use]
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            segments: vec![Segment::Field(root.into())],
        }
    }

    /// Returns a new path with a named child field appended.
    #[must_use]
    pub fn child(&self, name: impl Into<String>) -> Self {
        self.with(Segment::Field(name.into()))
    }

    /// Returns a new path with a list index appended.
    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        self.with(Segment::Index(index))
    }

    /// Returns a new path with a map key appended.
    #[must_use]
    pub fn key(&self, key: impl Into<String>) -> Self {
        self.with(Segment::Key(key.into()))
    }

    /// Returns the number of segments in the path.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    fn with(&self, segment: Segment) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Field(name) if i == 0 => write!(f, "{name}")?,
                Segment::Field(name) => write!(f, ".{name}")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
                Segment::Key(key) => write!(f, "[{key}]")?,
            }
        }
        Ok(())
    }
}

/// The category of a field error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldErrorKind {
    /// The value is syntactically or semantically invalid.
    Invalid,
    /// A required value was not provided.
    Required,
    /// The value duplicates another entry.
    Duplicate,
    /// The value is not one of the supported values.
    NotSupported,
    /// An internal failure prevented checking the value.
    Internal,
}

impl fmt::Display for FieldErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => write!(f, "Invalid value"),
            Self::Required => write!(f, "Required value"),
            Self::Duplicate => write!(f, "Duplicate value"),
            Self::NotSupported => write!(f, "Unsupported value"),
            Self::Internal => write!(f, "Internal error"),
        }
    }
}

/// An error anchored to a policy field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    /// The kind of failure.
    pub kind: FieldErrorKind,
    /// The rendered field path, e.g. `spec.matchConditions[0].expression`.
    pub field: String,
    /// The offending value, if one applies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_value: Option<String>,
    /// A human-readable description of the failure.
    pub detail: String,
}

impl FieldError {
    /// Creates a field error of an arbitrary kind.
    pub fn new(
        kind: FieldErrorKind,
        path: &FieldPath,
        invalid_value: Option<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            field: path.to_string(),
            invalid_value,
            detail: detail.into(),
        }
    }

    /// Creates an error for an invalid value.
    ///
    /// # Examples
    ///
    /// ```
    /// use dike_core::{FieldError, FieldPath};
    ///
    /// let path = FieldPath::new("spec").child("matchConditions").index(0).child("expression");
    /// let err = FieldError::invalid(&path, "1 + 1", "output is expected to be of type bool");
    /// assert_eq!(
    ///     err.to_string(),
    ///     "spec.matchConditions[0].expression: Invalid value: \"1 + 1\": output is expected to be of type bool",
    /// );
    /// ```
    pub fn invalid(path: &FieldPath, value: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(FieldErrorKind::Invalid, path, Some(value.into()), detail)
    }

    /// Creates an error for a missing required value.
    pub fn required(path: &FieldPath, detail: impl Into<String>) -> Self {
        Self::new(FieldErrorKind::Required, path, None, detail)
    }

    /// Creates an error for a duplicated value.
    pub fn duplicate(path: &FieldPath, value: impl Into<String>) -> Self {
        Self::new(FieldErrorKind::Duplicate, path, Some(value.into()), "")
    }

    /// Creates an error for a value outside the supported set.
    pub fn not_supported(path: &FieldPath, value: impl Into<String>, supported: &[&str]) -> Self {
        let detail = if supported.is_empty() {
            String::new()
        } else {
            let quoted: Vec<String> = supported.iter().map(|s| format!("\"{s}\"")).collect();
            format!("supported values: {}", quoted.join(", "))
        };
        Self::new(FieldErrorKind::NotSupported, path, Some(value.into()), detail)
    }

    /// Creates an internal error for a field.
    pub fn internal(path: &FieldPath, detail: impl Into<String>) -> Self {
        Self::new(FieldErrorKind::Internal, path, None, detail)
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.kind)?;
        if let Some(value) = &self.invalid_value {
            write!(f, ": \"{value}\"")?;
        }
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        Ok(())
    }
}

impl std::error::Error for FieldError {}

/// An ordered collection of field errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorList {
    errors: Vec<FieldError>,
}

impl ErrorList {
    /// Creates an empty error list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an error to the list.
    pub fn push(&mut self, error: FieldError) {
        self.errors.push(error);
    }

    /// Returns true if the list holds no errors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Returns an iterator over the errors.
    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.errors.iter()
    }

    /// Returns the first error, if any.
    #[must_use]
    pub fn first(&self) -> Option<&FieldError> {
        self.errors.first()
    }

    /// Appends every error from another list.
    pub fn merge(&mut self, other: Self) {
        self.errors.extend(other.errors);
    }

    /// Converts the list into a `Result`.
    ///
    /// # Errors
    ///
    /// Returns the list itself when it is not empty.
    pub fn into_result(self) -> Result<(), Self> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl From<FieldError> for ErrorList {
    fn from(error: FieldError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl IntoIterator for ErrorList {
    type Item = FieldError;
    type IntoIter = std::vec::IntoIter<FieldError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl<'a> IntoIterator for &'a ErrorList {
    type Item = &'a FieldError;
    type IntoIter = std::slice::Iter<'a, FieldError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.iter()
    }
}

impl FromIterator<FieldError> for ErrorList {
    fn from_iter<T: IntoIterator<Item = FieldError>>(iter: T) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

impl Extend<FieldError> for ErrorList {
    fn extend<T: IntoIterator<Item = FieldError>>(&mut self, iter: T) {
        self.errors.extend(iter);
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => write!(f, "no field errors"),
            [single] => write!(f, "{single}"),
            errors => {
                write!(f, "[")?;
                for (i, error) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{error}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl std::error::Error for ErrorList {}

/// Trait for policy documents that can be structurally validated.
///
/// Structural validation runs before any expression is compiled and catches
/// problems such as missing names or duplicated variable declarations.
///
/// # Examples
///
/// ```
/// use dike_core::{ErrorList, FieldError, FieldPath, Validate};
///
/// struct Named(String);
///
/// impl Validate for Named {
///     fn validate(&self) -> Result<(), ErrorList> {
///         let mut errors = ErrorList::new();
///         if self.0.is_empty() {
///             errors.push(FieldError::required(&FieldPath::new("name"), ""));
///         }
///         errors.into_result()
///     }
/// }
///
/// assert!(!Named(String::new()).is_valid());
/// ```
pub trait Validate {
    /// Validates this instance and returns every problem found.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorList`] holding all structural failures.
    fn validate(&self) -> Result<(), ErrorList>;

    /// Returns true if [`validate`](Self::validate) succeeds.
    fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_path_display() {
        let path = FieldPath::new("spec").child("variables").index(2).child("expression");
        assert_eq!(path.to_string(), "spec.variables[2].expression");
        assert_eq!(path.depth(), 4);
    }

    #[test]
    fn test_field_path_key() {
        let path = FieldPath::new("spec").child("images").key("containers");
        assert_eq!(path.to_string(), "spec.images[containers]");
    }

    #[test]
    fn test_field_path_children_do_not_alias_parent() {
        let parent = FieldPath::new("spec").child("validations");
        let first = parent.index(0);
        let second = parent.index(1);
        assert_eq!(parent.to_string(), "spec.validations");
        assert_eq!(first.to_string(), "spec.validations[0]");
        assert_eq!(second.to_string(), "spec.validations[1]");
    }

    #[test]
    fn test_field_error_invalid_display() {
        let path = FieldPath::new("spec").child("auditAnnotations").index(0).child("valueExpression");
        let err = FieldError::invalid(&path, "1", "output is expected to be either of type string or null");
        assert_eq!(err.kind, FieldErrorKind::Invalid);
        assert_eq!(
            err.to_string(),
            "spec.auditAnnotations[0].valueExpression: Invalid value: \"1\": output is expected to be either of type string or null"
        );
    }

    #[test]
    fn test_field_error_required_display() {
        let err = FieldError::required(&FieldPath::new("metadata").child("name"), "");
        assert_eq!(err.to_string(), "metadata.name: Required value");
    }

    #[test]
    fn test_field_error_duplicate_display() {
        let err = FieldError::duplicate(&FieldPath::new("spec").child("variables").index(1).child("name"), "x");
        assert_eq!(err.to_string(), "spec.variables[1].name: Duplicate value: \"x\"");
    }

    #[test]
    fn test_field_error_not_supported() {
        let err = FieldError::not_supported(
            &FieldPath::new("spec").child("failurePolicy"),
            "Maybe",
            &["Fail", "Ignore"],
        );
        assert_eq!(
            err.to_string(),
            "spec.failurePolicy: Unsupported value: \"Maybe\": supported values: \"Fail\", \"Ignore\""
        );
    }

    #[test]
    fn test_field_error_internal() {
        let err = FieldError::internal(&FieldPath::new("spec"), "environment unavailable");
        assert_eq!(err.kind, FieldErrorKind::Internal);
        assert!(err.invalid_value.is_none());
    }

    #[test]
    fn test_error_list_empty() {
        let errors = ErrorList::new();
        assert!(errors.is_empty());
        assert_eq!(errors.len(), 0);
        assert!(errors.first().is_none());
        assert!(errors.into_result().is_ok());
    }

    #[test]
    fn test_error_list_push_and_merge() {
        let root = FieldPath::new("spec");
        let mut a = ErrorList::new();
        a.push(FieldError::required(&root.child("a"), ""));
        let mut b = ErrorList::new();
        b.push(FieldError::required(&root.child("b"), ""));
        a.merge(b);

        let fields: Vec<_> = a.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["spec.a", "spec.b"]);
    }

    #[test]
    fn test_error_list_into_result_err() {
        let errors = ErrorList::from(FieldError::required(&FieldPath::new("spec"), ""));
        let result = errors.into_result();
        assert_eq!(result.unwrap_err().len(), 1);
    }

    #[test]
    fn test_error_list_display_multiple() {
        let root = FieldPath::new("spec");
        let errors: ErrorList = vec![
            FieldError::required(&root.child("a"), ""),
            FieldError::duplicate(&root.child("b"), "x"),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            errors.to_string(),
            "[spec.a: Required value, spec.b: Duplicate value: \"x\"]"
        );
    }

    #[test]
    fn test_error_list_serializes_as_array() {
        let errors = ErrorList::from(FieldError::invalid(&FieldPath::new("spec"), "v", "bad"));
        let json = serde_json::to_value(&errors).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["field"], "spec");
        assert_eq!(json[0]["invalidValue"], "v");
    }

    struct Positive(i64);

    impl Validate for Positive {
        fn validate(&self) -> Result<(), ErrorList> {
            let mut errors = ErrorList::new();
            if self.0 <= 0 {
                errors.push(FieldError::invalid(&FieldPath::new("value"), self.0.to_string(), "must be positive"));
            }
            errors.into_result()
        }
    }

    #[test]
    fn test_validate_trait() {
        assert!(Positive(3).is_valid());
        let errors = Positive(-1).validate().unwrap_err();
        assert_eq!(errors.first().unwrap().field, "value");
    }
}
