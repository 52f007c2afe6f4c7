use std::sync::Arc;

use fory_meta::{class_def::ClassDef, types::StructType};

use super::{assign_if_compatible, object_fields, read_shell, Serializer};
use crate::{
    context::{ReadContext, WriteContext},
    error::{Error, Result},
    value::{default_value, Value},
};

/// Reads a compatible struct whose fields follow a class definition received
/// from the peer rather than the local declaration.
///
/// Fields are matched by name. Remote fields without a local counterpart are
/// read and dropped; local fields the peer does not send keep their
/// defaults. Registered as a custom serializer, it also writes local values in
/// the peer's layout.
#[derive(Debug)]
pub struct MetaSharedSerializer {
    class_def: Arc<ClassDef>,
    struct_type: Arc<StructType>,

    // remote field position -> local declaration index
    targets: Vec<Option<usize>>,
}

impl MetaSharedSerializer {
    /// Binds the peer's description to the local struct of the same name.
    ///
    /// # Errors
    ///
    /// Fails if the description names another type.
    pub fn new(
        class_def: Arc<ClassDef>,
        struct_type: Arc<StructType>,
    ) -> Result<Self> {
        if class_def.type_name() != struct_type.name() {
            return Err(Error::mismatch(
                format!("class definition of `{}`", struct_type.name()),
                format!("class definition of `{}`", class_def.type_name()),
            ));
        }

        let targets = class_def
            .fields()
            .iter()
            .map(|field| struct_type.field_index(field.name()))
            .collect::<Vec<_>>();

        let missing = targets.iter().filter(|target| target.is_none()).count();
        if missing != 0 {
            log::debug!(
                "`{}`: {missing} remote fields have no local counterpart",
                struct_type.name()
            );
        }

        Ok(Self { class_def, struct_type, targets })
    }

    /// The peer's description.
    #[must_use]
    pub const fn class_def(&self) -> &Arc<ClassDef> { &self.class_def }
}

impl Serializer for MetaSharedSerializer {
    fn write(&self, ctx: &mut WriteContext<'_>, value: &Value) -> Result<()> {
        let values = object_fields(&self.struct_type, value)?;

        for (field, target) in self.class_def.fields().iter().zip(&self.targets) {
            let local = target.map(|index| &values[index]).filter(|value| {
                if value.is_null() {
                    field.nullable() || !field.field_type().is_embeddable()
                } else {
                    value.conforms(field.field_type())
                }
            });

            match local {
                Some(value) => ctx.write_field(field, value)?,
                None => ctx.write_field(field, &default_value(field))?,
            }
        }

        Ok(())
    }

    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Value> {
        let (shell, value) = read_shell(ctx, &self.struct_type);
        let mut values = shell.read().fields().to_vec();
        let name = self.struct_type.name().to_string();

        for (field, target) in self.class_def.fields().iter().zip(&self.targets) {
            let field_value = ctx.read_field(field)?;

            let Some(index) = *target else {
                log::trace!("`{name}`: dropped remote field `{}`", field.name());
                continue;
            };

            assign_if_compatible(
                &name,
                &self.struct_type.fields()[index],
                field_value,
                &mut values[index],
            );
        }

        shell.write().set_fields(values);
        Ok(value)
    }
}
