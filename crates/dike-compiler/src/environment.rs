//! Per-kind policy environments.
//!
//! Every policy kind compiles against its own environment: the base
//! environment plus the free variables that kind binds at evaluation time.
//! Environments are built once per kind and shared by every policy of that
//! kind.

use dike_cel::{build_base_environment, Env, EnvExtension, EnvError, Library, ObjectType, ResourceOptions, Type, VARIABLES_TYPE};
use tracing::debug;

/// The resource under evaluation, or the raw payload in JSON mode.
pub const OBJECT_KEY: &str = "object";
/// The previous state of the resource.
pub const OLD_OBJECT_KEY: &str = "oldObject";
/// The admission request.
pub const REQUEST_KEY: &str = "request";
/// The namespace of the resource.
pub const NAMESPACE_OBJECT_KEY: &str = "namespaceObject";
/// Lazily evaluated policy variables.
pub const VARIABLES_KEY: &str = "variables";
/// Values contributed by matching policy exceptions.
pub const EXCEPTIONS_KEY: &str = "exceptions";
/// Images extracted by image-validating policies.
pub const IMAGES_KEY: &str = "images";
/// The image reference tested by a `matchImageReferences` expression.
pub const IMAGE_REF_KEY: &str = "ref";

/// Object type of `request`.
pub const REQUEST_TYPE: &str = "dike.Request";
/// Object type of `namespaceObject`.
pub const NAMESPACE_TYPE: &str = "dike.Namespace";
/// Object type of `exceptions`.
pub const EXCEPTIONS_TYPE: &str = "dike.Exceptions";

/// Declares the fields of `request`.
#[must_use]
pub fn request_type() -> ObjectType {
    ObjectType::structure(
        REQUEST_TYPE,
        [
            ("uid", Type::String),
            ("kind", Type::Dyn),
            ("resource", Type::Dyn),
            ("subResource", Type::String),
            ("requestKind", Type::Dyn),
            ("requestResource", Type::Dyn),
            ("requestSubResource", Type::String),
            ("name", Type::String),
            ("namespace", Type::String),
            ("operation", Type::String),
            ("userInfo", Type::Dyn),
            ("dryRun", Type::Bool),
            ("options", Type::Dyn),
        ],
    )
}

/// Declares the fields of `namespaceObject`.
#[must_use]
pub fn namespace_type() -> ObjectType {
    ObjectType::structure(
        NAMESPACE_TYPE,
        [("metadata", Type::Dyn), ("spec", Type::Dyn), ("status", Type::Dyn)],
    )
}

/// Declares the fields of `exceptions`.
#[must_use]
pub fn exceptions_type() -> ObjectType {
    ObjectType::structure(
        EXCEPTIONS_TYPE,
        [
            ("allowedImages", Type::list(Type::String)),
            ("allowedValues", Type::list(Type::String)),
        ],
    )
}

/// A compiled-against environment and the context-backed libraries whose
/// variables it declares.
#[derive(Debug, Clone)]
pub struct PolicyEnv {
    env: Env,
    libraries: Vec<Library>,
}

impl PolicyEnv {
    /// The expression environment.
    #[must_use]
    pub const fn env(&self) -> &Env {
        &self.env
    }

    /// Libraries that must be bound from a `Context` at evaluation time.
    #[must_use]
    pub fn libraries(&self) -> &[Library] {
        &self.libraries
    }

    fn build(base: &Env, mut extension: EnvExtension, libraries: Vec<Library>) -> Result<Self, EnvError> {
        for library in &libraries {
            if let Some((name, ty)) = library.context_variable() {
                extension = extension.with_variable(name, ty);
            }
        }
        Ok(Self {
            env: base.extend(extension)?,
            libraries,
        })
    }
}

/// Libraries structured-mode policies bind from the context.
fn kubernetes_libraries(resource: &ResourceOptions) -> Vec<Library> {
    vec![
        Library::GlobalContext,
        Library::ImageData,
        Library::Resource(resource.clone()),
    ]
}

fn kubernetes_extension() -> EnvExtension {
    EnvExtension::new()
        .with_type(request_type())
        .with_type(namespace_type())
        .with_type(exceptions_type())
        .with_variable(OBJECT_KEY, Type::Dyn)
        .with_variable(OLD_OBJECT_KEY, Type::Dyn)
        .with_variable(REQUEST_KEY, Type::object(REQUEST_TYPE))
        .with_variable(NAMESPACE_OBJECT_KEY, Type::object(NAMESPACE_TYPE))
        .with_variable(VARIABLES_KEY, Type::object(VARIABLES_TYPE))
        .with_variable(EXCEPTIONS_KEY, Type::object(EXCEPTIONS_TYPE))
}

/// The environments of every policy kind.
#[derive(Debug, Clone)]
pub struct Environments {
    /// Validating policies in structured mode.
    pub validating: PolicyEnv,
    /// Validating policies in JSON mode.
    pub json: PolicyEnv,
    /// Image-validating policies.
    pub image_validating: PolicyEnv,
    /// Deleting policies.
    pub deleting: PolicyEnv,
    /// Image reference matchers of image-validating policies.
    pub match_image: PolicyEnv,
}

impl Environments {
    /// Builds every environment with default library options.
    ///
    /// # Errors
    ///
    /// Returns an [`EnvError`] if the library wiring is broken.
    pub fn new() -> Result<Self, EnvError> {
        Self::with_resource_options(&ResourceOptions::default())
    }

    /// Builds every environment, scoping the `resource` library.
    ///
    /// # Errors
    ///
    /// Returns an [`EnvError`] if the library wiring is broken.
    pub fn with_resource_options(resource: &ResourceOptions) -> Result<Self, EnvError> {
        let base = build_base_environment()?;

        let validating = PolicyEnv::build(&base, kubernetes_extension(), kubernetes_libraries(resource))?;
        let image_validating = PolicyEnv::build(
            &base,
            kubernetes_extension().with_variable(IMAGES_KEY, Type::map(Type::String, Type::list(Type::String))),
            kubernetes_libraries(resource),
        )?;
        let json = PolicyEnv::build(
            &base,
            EnvExtension::new()
                .with_variable(OBJECT_KEY, Type::Dyn)
                .with_variable(VARIABLES_KEY, Type::object(VARIABLES_TYPE)),
            vec![Library::ImageData, Library::Resource(resource.clone())],
        )?;
        let deleting = PolicyEnv::build(
            &base,
            EnvExtension::new()
                .with_type(namespace_type())
                .with_type(exceptions_type())
                .with_variable(OBJECT_KEY, Type::Dyn)
                .with_variable(NAMESPACE_OBJECT_KEY, Type::object(NAMESPACE_TYPE))
                .with_variable(VARIABLES_KEY, Type::object(VARIABLES_TYPE))
                .with_variable(EXCEPTIONS_KEY, Type::object(EXCEPTIONS_TYPE)),
            kubernetes_libraries(resource),
        )?;

        let match_image = PolicyEnv::build(
            &base,
            EnvExtension::new().with_variable(IMAGE_REF_KEY, Type::String),
            Vec::new(),
        )?;

        debug!("Built policy environments");
        Ok(Self {
            validating,
            json,
            image_validating,
            deleting,
            match_image,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validating_declares_structured_variables() {
        let envs = Environments::new().unwrap();
        let env = envs.validating.env();
        for name in [OBJECT_KEY, OLD_OBJECT_KEY, REQUEST_KEY, NAMESPACE_OBJECT_KEY, "resource", "image", "globalContext"] {
            assert!(env.variable(name).is_some(), "missing {name}");
        }
        assert!(env.variable(IMAGES_KEY).is_none());
        assert_eq!(envs.validating.libraries().len(), 3);
    }

    #[test]
    fn test_json_declares_limited_variables() {
        let envs = Environments::new().unwrap();
        let env = envs.json.env();
        assert!(env.variable(OBJECT_KEY).is_some());
        assert!(env.variable("resource").is_some());
        assert!(env.variable(REQUEST_KEY).is_none());
        assert!(env.variable("globalContext").is_none());
        assert!(env.compile("http.Get('https://example.com').ok == true").is_ok());
    }

    #[test]
    fn test_request_fields_are_typed() {
        let envs = Environments::new().unwrap();
        let env = envs.validating.env();
        let ast = env.compile("request.operation == 'CREATE' && request.dryRun").unwrap();
        assert_eq!(ast.output_type(), &Type::Bool);
        assert!(env.compile("request.bogus").is_err());
    }

    #[test]
    fn test_image_validating_declares_images() {
        let envs = Environments::new().unwrap();
        let ast = envs
            .image_validating
            .env()
            .compile("images.containers.all(i, i.startsWith('ghcr.io/'))")
            .unwrap();
        assert_eq!(ast.output_type(), &Type::Bool);
    }

    #[test]
    fn test_match_image_declares_only_ref() {
        let envs = Environments::new().unwrap();
        let env = envs.match_image.env();
        assert_eq!(env.compile("ref.startsWith('ghcr.io/')").unwrap().output_type(), &Type::Bool);
        assert!(env.compile("object.kind == 'Pod'").is_err());
        assert!(envs.match_image.libraries().is_empty());
    }

    #[test]
    fn test_deleting_has_no_request() {
        let envs = Environments::new().unwrap();
        assert!(envs.deleting.env().variable(REQUEST_KEY).is_none());
        assert!(envs.deleting.env().compile("exceptions.allowedValues.size() > 0").is_ok());
    }
}
