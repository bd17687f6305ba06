//! Container image reference parsing.
//!
//! `image('nginx')` yields an `image.Image` whose accessors report the
//! normalized reference: `registry()` is `index.docker.io`, `repository()` is
//! `library/nginx`, and `identifier()` is `latest`.

use std::any::Any;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::decls::{Declarations, Overload};
use crate::error::EvalError;
use crate::libs::receiver;
use crate::stdlib::arg_str;
use crate::types::{ObjectType, Type};
use crate::value::{OpaqueValue, Value};

/// Object type of parsed references.
pub const IMAGE_TYPE: &str = "image.Image";

const DEFAULT_REGISTRY: &str = "index.docker.io";
const DEFAULT_TAG: &str = "latest";

static PATH_COMPONENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").expect("invalid regex"));
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w][\w.-]{0,127}$").expect("invalid regex"));
static DIGEST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{32,}$").expect("invalid regex")
});

/// A parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    original: String,
    registry: String,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

/// Reasons a reference fails to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageParseError(String);

impl fmt::Display for ImageParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not parse reference: {}", self.0)
    }
}

impl std::error::Error for ImageParseError {}

impl ImageReference {
    /// Parses a reference such as `ghcr.io/acme/dike:v1.13@sha256:...`.
    ///
    /// # Errors
    ///
    /// Returns [`ImageParseError`] if the reference is malformed.
    pub fn parse(reference: &str) -> Result<Self, ImageParseError> {
        let invalid = || ImageParseError(reference.to_string());
        if reference.is_empty() || reference.trim() != reference {
            return Err(invalid());
        }

        let (name, digest) = match reference.split_once('@') {
            Some((name, digest)) => {
                if !DIGEST.is_match(digest) {
                    return Err(invalid());
                }
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        let last_slash = name.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match name[last_slash..].rfind(':') {
            Some(i) => {
                let tag = &name[last_slash + i + 1..];
                if !TAG.is_match(tag) {
                    return Err(invalid());
                }
                (&name[..last_slash + i], Some(tag.to_string()))
            }
            None => (name, None),
        };

        let (registry, path) = match name.split_once('/') {
            Some((first, rest)) if first.contains(['.', ':']) || first == "localhost" => (first.to_string(), rest),
            _ => (DEFAULT_REGISTRY.to_string(), name),
        };
        let registry = if registry == "docker.io" {
            DEFAULT_REGISTRY.to_string()
        } else {
            registry
        };

        if path.is_empty() || !path.split('/').all(|c| PATH_COMPONENT.is_match(c)) {
            return Err(invalid());
        }
        let repository = if registry == DEFAULT_REGISTRY && !path.contains('/') {
            format!("library/{path}")
        } else {
            path.to_string()
        };

        let tag = match (tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (tag, _) => tag,
        };

        Ok(Self {
            original: reference.to_string(),
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// The registry host.
    #[must_use]
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// The repository path within the registry.
    #[must_use]
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// The tag, or an empty string.
    #[must_use]
    pub fn tag(&self) -> &str {
        self.tag.as_deref().unwrap_or_default()
    }

    /// The digest, or an empty string.
    #[must_use]
    pub fn digest(&self) -> &str {
        self.digest.as_deref().unwrap_or_default()
    }

    /// The digest when present, the tag otherwise.
    #[must_use]
    pub fn identifier(&self) -> &str {
        self.digest.as_deref().or(self.tag.as_deref()).unwrap_or_default()
    }

    /// The reference as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.original
    }
}

impl OpaqueValue for ImageReference {
    fn type_name(&self) -> &str {
        IMAGE_TYPE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn equals(&self, other: &dyn OpaqueValue) -> bool {
        other.as_any().downcast_ref::<Self>().is_some_and(|o| o == self)
    }

    fn to_json(&self) -> Option<serde_json::Value> {
        Some(serde_json::Value::String(self.original.clone()))
    }
}

fn accessor(id: &str, result: Type, f: fn(&ImageReference) -> Value) -> Overload {
    Overload::method(id, vec![Type::object(IMAGE_TYPE)], result, move |_, args| {
        Ok(f(receiver::<ImageReference>(args, IMAGE_TYPE)?))
    })
}

pub(crate) fn declarations() -> Declarations {
    let image = Type::object(IMAGE_TYPE);
    Declarations::default()
        .with_type(ObjectType::opaque(IMAGE_TYPE))
        .with_function(
            "image",
            vec![Overload::function("string_to_image", vec![Type::String], image.clone(), |_, args| {
                ImageReference::parse(arg_str(args, 0)?)
                    .map(Value::opaque)
                    .map_err(|e| EvalError::function("image", e))
            })],
        )
        .with_function(
            "isImage",
            vec![Overload::function("is_image_string", vec![Type::String], Type::Bool, |_, args| {
                Ok(Value::Bool(ImageReference::parse(arg_str(args, 0)?).is_ok()))
            })],
        )
        .with_function(
            "string",
            vec![Overload::function("image_to_string", vec![image], Type::String, |_, args| {
                Ok(Value::string(receiver::<ImageReference>(args, IMAGE_TYPE)?.as_str()))
            })],
        )
        .with_function(
            "registry",
            vec![accessor("image_registry", Type::String, |i| Value::string(i.registry()))],
        )
        .with_function(
            "repository",
            vec![accessor("image_repository", Type::String, |i| Value::string(i.repository()))],
        )
        .with_function(
            "identifier",
            vec![accessor("image_identifier", Type::String, |i| Value::string(i.identifier()))],
        )
        .with_function("tag", vec![accessor("image_tag", Type::String, |i| Value::string(i.tag()))])
        .with_function(
            "digest",
            vec![accessor("image_digest", Type::String, |i| Value::string(i.digest()))],
        )
        .with_function(
            "containsDigest",
            vec![accessor("image_contains_digest", Type::Bool, |i| Value::Bool(i.digest.is_some()))],
        )
}
