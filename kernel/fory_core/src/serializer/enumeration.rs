use std::sync::Arc;

use fory_meta::types::EnumType;

use super::Serializer;
use crate::{
    context::{ReadContext, WriteContext},
    error::{Error, Result},
    value::{EnumValue, Value},
};

/// Writes an enum variant as its ordinal, or as its name when the engine is
/// configured to write enums by name.
#[derive(Debug)]
pub struct EnumSerializer {
    enum_type: Arc<EnumType>,
}

impl EnumSerializer {
    /// Creates the serializer for `enum_type`.
    #[must_use]
    pub const fn new(enum_type: Arc<EnumType>) -> Self { Self { enum_type } }

    fn variant(&self, value: &Value) -> Result<u32> {
        let found = match value {
            Value::Enum(variant)
                if variant.enum_type().name() == self.enum_type.name() =>
            {
                return Ok(variant.ordinal());
            }
            other => other.type_label(),
        };

        Err(Error::mismatch(format!("enum {}", self.enum_type.name()), found))
    }
}

impl Serializer for EnumSerializer {
    fn write(&self, ctx: &mut WriteContext<'_>, value: &Value) -> Result<()> {
        let ordinal = self.variant(value)?;

        if !ctx.config().enum_by_name() {
            ctx.buffer().write_var_u32(ordinal);
            return Ok(());
        }

        let Some(name) = self.enum_type.variant(ordinal) else {
            return Err(Error::schema(
                self.enum_type.name(),
                format!("ordinal {ordinal} names no variant"),
            ));
        };

        ctx.write_meta_string(name)
    }

    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Value> {
        let ordinal = if ctx.config().enum_by_name() {
            let name = ctx.read_meta_string()?;

            self.enum_type.ordinal_of(&name).ok_or_else(|| {
                Error::schema(
                    self.enum_type.name(),
                    format!("no variant is named `{name}`"),
                )
            })?
        } else {
            let ordinal = ctx.buffer().read_var_u32()?;

            if self.enum_type.variant(ordinal).is_none() {
                return Err(Error::schema(
                    self.enum_type.name(),
                    format!(
                        "ordinal {ordinal} is out of range for {} variants",
                        self.enum_type.variants().len()
                    ),
                ));
            }

            ordinal
        };

        Ok(Value::Enum(EnumValue::new(Arc::clone(&self.enum_type), ordinal)))
    }
}
