//! Image metadata lookups through the `image` variable.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use dike_core::Context;

use crate::decls::{Declarations, Overload};
use crate::libs::receiver;
use crate::stdlib::arg_str;
use crate::types::{ObjectType, Type};
use crate::value::{OpaqueValue, Value};

/// Object type of the `image` variable.
pub const CONTEXT_TYPE: &str = "imagedata.Context";

/// Name of the per-evaluation variable.
pub const VARIABLE: &str = "image";

/// The value behind the `image` variable.
pub struct ImageDataContext {
    context: Arc<dyn Context>,
}

impl ImageDataContext {
    /// Wraps an evaluation context.
    #[must_use]
    pub fn new(context: Arc<dyn Context>) -> Self {
        Self { context }
    }
}

impl fmt::Debug for ImageDataContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageDataContext").finish_non_exhaustive()
    }
}

impl OpaqueValue for ImageDataContext {
    fn type_name(&self) -> &str {
        CONTEXT_TYPE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn declarations() -> Declarations {
    Declarations::default()
        .with_type(ObjectType::opaque(CONTEXT_TYPE))
        .with_function(
            "GetMetadata",
            vec![Overload::method(
                "imagedata_get_metadata_string",
                vec![Type::object(CONTEXT_TYPE), Type::String],
                Type::Dyn,
                |call, args| {
                    let image = receiver::<ImageDataContext>(args, CONTEXT_TYPE)?;
                    let reference = arg_str(args, 1)?;
                    call.context.check()?;
                    let metadata = image.context.get_image_data(call.context.cancellation(), reference)?;
                    Ok(Value::from_json(&serde_json::Value::Object(metadata)))
                },
            )],
        )
}
