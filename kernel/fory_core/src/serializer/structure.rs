use std::sync::Arc;

use fory_meta::{class_def::ClassDef, types::StructType};

use super::{object_fields, read_shell, wire_order, Serializer};
use crate::{
    context::{ReadContext, WriteContext},
    error::{Error, Result},
    value::Value,
};

/// Writes struct fields back to back in wire order. Both peers must declare
/// the same shape; an optional fingerprint lets the reader verify that.
#[derive(Debug)]
pub struct StructSerializer {
    struct_type: Arc<StructType>,
    order: Vec<usize>,
    fingerprint: Option<i32>,
}

impl StructSerializer {
    /// Prepares the serializer for `struct_type`.
    ///
    /// # Errors
    ///
    /// Fails if two fields collide on their wire header.
    pub fn new(struct_type: Arc<StructType>, check_hash: bool) -> Result<Self> {
        let order =
            wire_order(&struct_type)?.into_iter().map(|(_, index)| index).collect();

        let fingerprint = if check_hash {
            Some(ClassDef::of_struct(&struct_type)?.fingerprint())
        } else {
            None
        };

        Ok(Self { struct_type, order, fingerprint })
    }
}

impl Serializer for StructSerializer {
    fn write(&self, ctx: &mut WriteContext<'_>, value: &Value) -> Result<()> {
        let values = object_fields(&self.struct_type, value)?;

        if let Some(fingerprint) = self.fingerprint {
            ctx.buffer().write_i32(fingerprint);
        }

        for &index in &self.order {
            ctx.write_field(&self.struct_type.fields()[index], &values[index])?;
        }

        Ok(())
    }

    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Value> {
        if let Some(expected) = self.fingerprint {
            let found = ctx.buffer().read_i32()?;

            if found != expected {
                return Err(Error::schema(
                    self.struct_type.name(),
                    format!(
                        "struct fingerprint {found:#010x} differs from the \
                         local {expected:#010x}"
                    ),
                ));
            }
        }

        let (shell, value) = read_shell(ctx, &self.struct_type);
        let mut values = shell.read().fields().to_vec();

        for &index in &self.order {
            values[index] = ctx.read_field(&self.struct_type.fields()[index])?;
        }

        shell.write().set_fields(values);
        Ok(value)
    }
}
