//! An in-memory [`Context`] for tests.
//!
//! Resources, global-context entries and image metadata are seeded with the
//! `with_*` builders; generated resources and the deadline of every call
//! are recorded for later inspection. Calls fail once the caller's
//! [`Cancellation`] is cancelled or expired.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use dike_core::{Cancellation, Context, ContextError, GenerateContext};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};

/// Objects keyed by namespace, then name.
type Objects = BTreeMap<String, BTreeMap<String, Value>>;

/// An in-memory implementation of [`Context`].
///
/// # Examples
///
/// ```rust
/// use dike_core::{Cancellation, Context};
/// use dike_test::FakeContext;
/// use serde_json::json;
///
/// let context = FakeContext::new().with_resource(
///     "v1",
///     "configmaps",
///     json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "cfg", "namespace": "default"}}),
/// );
///
/// let cancel = Cancellation::new();
/// let object = context.get_resource(&cancel, "v1", "configmaps", "default", "cfg").unwrap();
/// assert_eq!(object["kind"], "ConfigMap");
/// assert!(context.get_resource(&cancel, "v1", "configmaps", "default", "other").is_err());
/// ```
#[derive(Debug, Default)]
pub struct FakeContext {
    resources: RwLock<HashMap<String, Objects>>,
    global_context: HashMap<String, HashMap<String, Value>>,
    images: BTreeMap<String, Map<String, Value>>,
    generated: RwLock<Vec<Value>>,
    generate_context: RwLock<Option<GenerateContext>>,
    deadlines: RwLock<Vec<Option<Instant>>>,
}

fn resource_key(api_version: &str, resource: &str) -> String {
    format!("{api_version}, Resource={resource}")
}

fn metadata_str<'a>(object: &'a Value, field: &str) -> &'a str {
    object["metadata"][field].as_str().unwrap_or_default()
}

fn set_namespace(object: &mut Value, namespace: &str) {
    if let Some(fields) = object.as_object_mut() {
        let metadata = fields.entry("metadata").or_insert_with(|| json!({}));
        if let Some(metadata) = metadata.as_object_mut() {
            metadata.insert("namespace".to_string(), Value::from(namespace));
        }
    }
}

impl FakeContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an object, keyed by its `metadata.namespace` and `metadata.name`.
    #[must_use]
    pub fn with_resource(self, api_version: &str, resource: &str, object: Value) -> Self {
        self.insert_resource(api_version, resource, object);
        self
    }

    /// Seeds a global-context entry. An empty projection is the default one.
    #[must_use]
    pub fn with_global_reference(mut self, name: &str, projection: &str, value: Value) -> Self {
        self.global_context
            .entry(name.to_string())
            .or_default()
            .insert(projection.to_string(), value);
        self
    }

    /// Seeds metadata for an image. Non-object values are stored as empty
    /// metadata.
    #[must_use]
    pub fn with_image_data(mut self, image: &str, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.images.insert(image.to_string(), data);
        self
    }

    /// Resources recorded by [`Context::generate_resources`].
    #[must_use]
    pub fn generated_resources(&self) -> Vec<Value> {
        self.generated.read().clone()
    }

    /// The last context passed to [`Context::set_generate_context`].
    #[must_use]
    pub fn generate_context(&self) -> Option<GenerateContext> {
        self.generate_context.read().clone()
    }

    /// The deadline passed to each lookup, in call order.
    #[must_use]
    pub fn observed_deadlines(&self) -> Vec<Option<Instant>> {
        self.deadlines.read().clone()
    }

    fn enter(&self, cancel: &Cancellation) -> Result<(), ContextError> {
        self.deadlines.write().push(cancel.deadline());
        cancel.check()
    }

    fn insert_resource(&self, api_version: &str, resource: &str, object: Value) {
        let namespace = metadata_str(&object, "namespace").to_string();
        let name = metadata_str(&object, "name").to_string();
        self.resources
            .write()
            .entry(resource_key(api_version, resource))
            .or_default()
            .entry(namespace)
            .or_default()
            .insert(name, object);
    }
}

impl Context for FakeContext {
    fn get_resource(
        &self,
        cancel: &Cancellation,
        api_version: &str,
        resource: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Value, ContextError> {
        self.enter(cancel)?;
        self.resources
            .read()
            .get(&resource_key(api_version, resource))
            .and_then(|objects| objects.get(namespace))
            .and_then(|objects| objects.get(name))
            .cloned()
            .ok_or_else(|| ContextError::NotFound {
                resource: resource.to_string(),
                name: name.to_string(),
            })
    }

    fn list_resources(
        &self,
        cancel: &Cancellation,
        api_version: &str,
        resource: &str,
        namespace: &str,
        label_selector: Option<&BTreeMap<String, String>>,
    ) -> Result<Value, ContextError> {
        self.enter(cancel)?;
        let resources = self.resources.read();
        let objects = resources
            .get(&resource_key(api_version, resource))
            .ok_or_else(|| ContextError::Backend(format!("{resource} resource not found")))?;
        let items: Vec<Value> = objects
            .get(namespace)
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter(|object| {
                label_selector.map_or(true, |selector| {
                    selector
                        .iter()
                        .all(|(k, v)| object["metadata"]["labels"][k].as_str() == Some(v.as_str()))
                })
            })
            .cloned()
            .collect();
        Ok(json!({"apiVersion": api_version, "items": items}))
    }

    fn post_resource(
        &self,
        cancel: &Cancellation,
        api_version: &str,
        resource: &str,
        namespace: &str,
        mut data: Value,
    ) -> Result<Value, ContextError> {
        self.enter(cancel)?;
        if !namespace.is_empty() {
            set_namespace(&mut data, namespace);
        }
        if metadata_str(&data, "name").is_empty() {
            return Err(ContextError::InvalidResource {
                reason: format!("failed to create {}: missing metadata.name", resource_key(api_version, resource)),
            });
        }
        self.insert_resource(api_version, resource, data.clone());
        Ok(data)
    }

    fn get_global_reference(
        &self,
        cancel: &Cancellation,
        name: &str,
        projection: &str,
    ) -> Result<Option<Value>, ContextError> {
        self.enter(cancel)?;
        let Some(entry) = self.global_context.get(name) else {
            return Ok(None);
        };
        if let Some(value) = entry.get(projection).or_else(|| entry.get("")) {
            return Ok(Some(value.clone()));
        }
        let mut available: Vec<&str> = entry.keys().map(String::as_str).collect();
        available.sort_unstable();
        Err(ContextError::Backend(format!(
            "global context entry {name:?} projection {projection:?} not found, available projections: {}",
            available.join(", ")
        )))
    }

    fn get_image_data(&self, cancel: &Cancellation, image: &str) -> Result<Map<String, Value>, ContextError> {
        self.enter(cancel)?;
        self.images
            .get(image)
            .cloned()
            .ok_or_else(|| ContextError::ImageDataNotFound {
                image: image.to_string(),
                available: self.images.keys().cloned().collect(),
            })
    }

    fn generate_resources(
        &self,
        cancel: &Cancellation,
        namespace: &str,
        resources: Vec<Value>,
    ) -> Result<(), ContextError> {
        self.enter(cancel)?;
        let mut generated = self.generated.write();
        for resource in resources {
            let is_list = resource["kind"].as_str().is_some_and(|k| k.ends_with("List"));
            match resource.get("items").and_then(Value::as_array) {
                Some(items) if is_list => {
                    for item in items {
                        let mut item = item.clone();
                        set_namespace(&mut item, namespace);
                        generated.push(item);
                    }
                }
                _ => {
                    let mut resource = resource;
                    set_namespace(&mut resource, namespace);
                    generated.push(resource);
                }
            }
        }
        Ok(())
    }

    fn clear_generated_resources(&self) {
        self.generated.write().clear();
    }

    fn set_generate_context(&self, context: GenerateContext) {
        *self.generate_context.write() = Some(context);
    }
}
