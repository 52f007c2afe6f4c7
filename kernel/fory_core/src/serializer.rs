//! Per-type payload codecs.
//!
//! Built-in values (scalars, strings, arrays and containers) are encoded by
//! the contexts directly. User types are encoded by the [`Serializer`] bound
//! to their [`ClassInfo`](crate::registry::ClassInfo), resolved once per
//! type and cached there.

use std::{fmt::Debug, sync::Arc};

use fory_meta::{
    field::{sort_fields, FieldHeader},
    types::{FieldDef, StructType},
};
use parking_lot::RwLock;

use crate::{
    context::{ReadContext, WriteContext},
    error::{Error, Result},
    value::{Object, ObjectRef, Value},
};

mod compatible;
mod enumeration;
mod meta_shared;
mod structure;

pub use compatible::CompatibleStructSerializer;
pub use enumeration::EnumSerializer;
pub use meta_shared::MetaSharedSerializer;
pub use structure::StructSerializer;

/// Writes and reads the payload of one user type. The ref flag and type tag
/// around the payload are handled by the caller.
pub trait Serializer: Send + Sync + Debug {
    /// Writes the payload of `value`.
    ///
    /// # Errors
    ///
    /// Fails if the value does not have the expected type or a nested value
    /// fails to write.
    fn write(&self, ctx: &mut WriteContext<'_>, value: &Value) -> Result<()>;

    /// Reads a payload.
    ///
    /// Implementations that build shared objects should pass the object to
    /// [`ReadContext::reference`] before reading anything nested in it.
    ///
    /// # Errors
    ///
    /// Fails on malformed input.
    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Value>;
}

/// The field values of `value`, which must be an instance of `struct_type`.
pub(crate) fn object_fields(
    struct_type: &StructType,
    value: &Value,
) -> Result<Vec<Value>> {
    let expected = || format!("struct {}", struct_type.name());

    let Some(object) = value.as_object() else {
        return Err(Error::mismatch(expected(), value.type_label()));
    };

    let object = object.read_recursive();
    if object.struct_type().name() != struct_type.name() {
        return Err(Error::mismatch(expected(), value.type_label()));
    }

    Ok(object.fields().to_vec())
}

/// Creates an object with default fields and makes it visible to
/// back-references before its fields are read.
pub(crate) fn read_shell(
    ctx: &mut ReadContext<'_>,
    struct_type: &Arc<StructType>,
) -> (ObjectRef, Value) {
    let shell = Arc::new(RwLock::new(Object::new(Arc::clone(struct_type))));
    let value = Value::Object(Arc::clone(&shell));
    ctx.reference(&value);
    (shell, value)
}

/// The fields of `struct_type` in wire order, as declaration indices.
pub(crate) fn wire_order(
    struct_type: &StructType,
) -> Result<Vec<(FieldHeader, usize)>> {
    Ok(sort_fields(&struct_type.name().to_string(), struct_type.fields())?
        .into_iter()
        .filter_map(|(header, field)| {
            struct_type.field_index(field.name()).map(|index| (header, index))
        })
        .collect())
}

/// Stores a value read for a field of a differing peer schema, keeping the
/// default if it does not fit the local declaration.
pub(crate) fn assign_if_compatible(
    type_name: &str,
    field: &FieldDef,
    value: Value,
    slot: &mut Value,
) {
    let fits = if value.is_null() {
        field.nullable() || !field.field_type().is_embeddable()
    } else {
        value.conforms(field.field_type())
    };

    if fits {
        *slot = value;
    } else {
        log::debug!(
            "`{type_name}`: field `{}` arrived as {}, keeping the default",
            field.name(),
            value.type_label()
        );
    }
}
