use std::sync::Arc;

use fory_meta::{
    field::{decode_embedded_type_id, FieldHeader, ReadHeader, END_TAG},
    types::{FieldDef, StructType},
};

use super::{
    assign_if_compatible, object_fields, read_shell, wire_order, Serializer,
};
use crate::{
    context::{ReadContext, WriteContext},
    error::{Error, Result},
    value::Value,
};

/// Writes every field behind its bucketed header and ends the object with
/// [`END_TAG`], so a reader with a different shape can match, skip, or
/// default fields.
///
/// With meta sharing the headers are left out: the peer learns the field
/// order from the class definition instead.
#[derive(Debug)]
pub struct CompatibleStructSerializer {
    struct_type: Arc<StructType>,
    order: Vec<(FieldHeader, usize)>,

    // header value -> declaration index, sorted by header value
    lookup: Vec<(i64, usize)>,
}

impl CompatibleStructSerializer {
    /// Prepares the serializer for `struct_type`.
    ///
    /// # Errors
    ///
    /// Fails if two fields collide on their wire header.
    pub fn new(struct_type: Arc<StructType>) -> Result<Self> {
        let order = wire_order(&struct_type)?;

        let mut lookup = order
            .iter()
            .map(|(header, index)| (header.value(), *index))
            .collect::<Vec<_>>();
        lookup.sort_unstable();

        Ok(Self { struct_type, order, lookup })
    }

    /// The struct this serializer handles.
    #[must_use]
    pub const fn struct_type(&self) -> &Arc<StructType> { &self.struct_type }

    fn find(&self, header: i64) -> Option<usize> {
        self.lookup
            .binary_search_by_key(&header, |(value, _)| *value)
            .ok()
            .map(|position| self.lookup[position].1)
    }

    fn name(&self) -> String { self.struct_type.name().to_string() }
}

impl Serializer for CompatibleStructSerializer {
    fn write(&self, ctx: &mut WriteContext<'_>, value: &Value) -> Result<()> {
        let values = object_fields(&self.struct_type, value)?;
        let fields = self.struct_type.fields();

        if ctx.meta_share_active() {
            for (_, index) in &self.order {
                ctx.write_field(&fields[*index], &values[*index])?;
            }

            return Ok(());
        }

        for (header, index) in &self.order {
            header.write(ctx.buffer());
            ctx.write_field(&fields[*index], &values[*index])?;
        }

        ctx.buffer().write_i64(END_TAG);
        Ok(())
    }

    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Value> {
        let (shell, value) = read_shell(ctx, &self.struct_type);
        let mut values = shell.read().fields().to_vec();
        let fields = self.struct_type.fields();

        loop {
            match ReadHeader::read(ctx.buffer())? {
                ReadHeader::End => break,

                ReadHeader::Embedded { value: header, type_id } => {
                    if let Some(index) = self.find(header) {
                        values[index] = ctx.read_field(&fields[index])?;
                        continue;
                    }

                    let (field_type, nullable) =
                        decode_embedded_type_id(type_id).ok_or_else(|| {
                            Error::schema(
                                self.name(),
                                format!(
                                    "field header {header:#x} embeds unknown \
                                     type id {type_id}"
                                ),
                            )
                        })?;

                    ctx.read_field(&FieldDef::with_nullability(
                        "",
                        field_type,
                        nullable,
                    ))?;

                    log::debug!(
                        "`{}`: skipped field with header {header:#x} unknown \
                         locally",
                        self.name()
                    );
                }

                ReadHeader::Separate { value: header } => {
                    let field_value = ctx.read_value()?;

                    let Some(index) = self.find(header) else {
                        log::debug!(
                            "`{}`: skipped field with header {header:#x} \
                             unknown locally",
                            self.name()
                        );
                        continue;
                    };

                    assign_if_compatible(
                        &self.name(),
                        &fields[index],
                        field_value,
                        &mut values[index],
                    );
                }
            }
        }

        shell.write().set_fields(values);
        Ok(value)
    }
}
