//! Transmissible struct descriptions.
//!
//! A [`ClassDef`] lists the fields of a user type in wire order (see
//! [`crate::field`]) together with their declared types, so that a reader
//! whose own declaration differs can still locate, skip, or default every
//! field.
//!
//! # Binary Format
//!
//! ```text
//! i64      id            MurmurHash3 of the body, low byte = field count
//!                        (saturating at 255)
//! varuint  body length
//! body:
//!   u8       kind        0 = struct, 1 = enum, 2 = ext
//!   string   namespace
//!   string   name
//!   varuint  field count
//!   field*:
//!     u8       flags     bit 0 = nullable
//!     string   name
//!     type     u8 type id, then element/key/value types for containers
//!              or namespace + name for enums and structs
//! ```

use fory_buffer::Buffer;
use getset::{CopyGetters, Getters};

use crate::{
    field::sort_fields,
    hash::hash64,
    types::{
        FieldDef, FieldType, InternalTypeId, StructType, TypeName,
        ANY_FIELD_TYPE,
    },
    Error,
};

#[cfg(test)]
mod test;

/// Seed of the class definition id hash.
pub const CLASS_DEF_SEED: u64 = 47;

/// Deepest container nesting a decoded field type may have.
pub const MAX_FIELD_TYPE_DEPTH: usize = 32;

const NULLABLE_FLAG: u8 = 0b1;

/// What kind of user type a [`ClassDef`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DefKind {
    /// A struct; the field list is meaningful.
    Struct,

    /// An enum; only the name is meaningful.
    Enum,

    /// A type with a custom serializer; only the name is meaningful.
    Ext,
}

impl DefKind {
    const fn tag(self) -> u8 {
        match self {
            Self::Struct => 0,
            Self::Enum => 1,
            Self::Ext => 2,
        }
    }

    const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Struct),
            1 => Some(Self::Enum),
            2 => Some(Self::Ext),
            _ => None,
        }
    }
}

/// The wire description of a user type. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct ClassDef {
    /// Content hash identifying this exact description.
    #[get_copy = "pub"]
    id: i64,

    /// What the description is for.
    #[get_copy = "pub"]
    kind: DefKind,

    /// The described type.
    #[get = "pub"]
    type_name: TypeName,

    /// The fields in wire order.
    #[get = "pub"]
    fields: Vec<FieldDef>,

    encoded: Vec<u8>,
}

impl ClassDef {
    /// Describes a user type, ordering its fields into wire order.
    ///
    /// # Errors
    ///
    /// Fails if two fields collide on their header or a length overflows.
    pub fn build(
        kind: DefKind,
        type_name: &TypeName,
        fields: &[FieldDef],
    ) -> Result<Self, Error> {
        let fields = sort_fields(&type_name.to_string(), fields)?
            .into_iter()
            .map(|(_, field)| field)
            .collect::<Vec<_>>();

        let mut body = Buffer::new();
        body.write_u8(kind.tag());
        body.write_str(type_name.namespace())?;
        body.write_str(type_name.name())?;
        body.write_length(fields.len())?;

        for field in &fields {
            body.write_u8(if field.nullable() { NULLABLE_FLAG } else { 0 });
            body.write_str(field.name())?;
            write_field_type(&mut body, field.field_type())?;
        }

        let body = body.into_bytes();
        let id = (hash64(&body, CLASS_DEF_SEED) & !0xFF)
            | i64::from(u8::try_from(fields.len()).unwrap_or(u8::MAX));

        let mut encoded = Buffer::with_capacity(body.len() + 13);
        encoded.write_i64(id);
        encoded.write_length(body.len())?;
        encoded.write_bytes(&body);

        log::debug!(
            "built class definition for `{type_name}` with {} fields, id \
             {id:#x}",
            fields.len()
        );

        Ok(Self {
            id,
            kind,
            type_name: type_name.clone(),
            fields,
            encoded: encoded.into_bytes(),
        })
    }

    /// Describes a struct.
    ///
    /// # Errors
    ///
    /// See [`Self::build`].
    pub fn of_struct(struct_type: &StructType) -> Result<Self, Error> {
        Self::build(DefKind::Struct, struct_type.name(), struct_type.fields())
    }

    /// A 32-bit fingerprint of the description.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn fingerprint(&self) -> i32 { self.id as i32 }

    /// The encoded size in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize { self.encoded.len() }

    /// Appends the encoded description.
    pub fn write(&self, buffer: &mut Buffer) { buffer.write_bytes(&self.encoded); }

    /// The id of the description starting at the reader, without consuming
    /// it.
    ///
    /// # Errors
    ///
    /// Fails if fewer than 8 bytes remain.
    pub fn peek_id(buffer: &Buffer) -> Result<i64, Error> {
        Ok(buffer.get_i64(buffer.reader_index())?)
    }

    /// Skips the description starting at the reader.
    ///
    /// # Errors
    ///
    /// Fails if the description is truncated.
    pub fn skip(buffer: &mut Buffer) -> Result<(), Error> {
        buffer.read_i64()?;
        let len = buffer.read_length(1)?;
        buffer.skip(len)?;
        Ok(())
    }

    /// Decodes the description starting at the reader.
    ///
    /// # Errors
    ///
    /// Fails on truncated input, unknown type tags, invalid names, or a body
    /// that does not span exactly its declared length.
    pub fn read(buffer: &mut Buffer) -> Result<Self, Error> {
        let start = buffer.reader_index();
        let id = buffer.read_i64()?;
        let declared = buffer.read_length(1)?;
        let body_start = buffer.reader_index();

        let tag = buffer.read_u8()?;
        let kind = DefKind::from_tag(tag)
            .ok_or(Error::UnknownDefKind { tag })?;
        let namespace = buffer.read_string()?;
        let name = buffer.read_string()?;
        let type_name = TypeName::new(namespace, name)?;

        let count = buffer.read_length(3)?;
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            let flags = buffer.read_u8()?;
            let name = buffer.read_string()?;
            let field_type = read_field_type(buffer, 0)?;

            fields.push(FieldDef::with_nullability(
                name,
                field_type,
                flags & NULLABLE_FLAG != 0,
            ));
        }

        let consumed = buffer.reader_index() - body_start;
        if consumed != declared {
            return Err(Error::BodyLengthMismatch { declared, consumed });
        }

        let encoded = buffer.slice(start, buffer.reader_index() - start)?.to_vec();

        log::trace!("decoded class definition for `{type_name}`, id {id:#x}");

        Ok(Self { id, kind, type_name, fields, encoded })
    }

    /// Synthesises a local struct shape from this description, used when the
    /// reader has no type of this name.
    ///
    /// # Errors
    ///
    /// Fails if the description repeats a field name.
    pub fn to_placeholder(&self) -> Result<StructType, Error> {
        StructType::new_placeholder(self.type_name.clone(), self.fields.clone())
    }
}

fn write_field_type(
    buffer: &mut Buffer,
    field_type: &FieldType,
) -> Result<(), Error> {
    buffer.write_u8(field_type.type_id());

    match field_type {
        FieldType::List(element) | FieldType::Set(element) => {
            write_field_type(buffer, element)?;
        }
        FieldType::Map(key, value) => {
            write_field_type(buffer, key)?;
            write_field_type(buffer, value)?;
        }
        FieldType::Enum(name) | FieldType::Struct(name) => {
            buffer.write_str(name.namespace())?;
            buffer.write_str(name.name())?;
        }
        _ => {}
    }

    Ok(())
}

fn read_field_type(buffer: &mut Buffer, depth: usize) -> Result<FieldType, Error> {
    if depth > MAX_FIELD_TYPE_DEPTH {
        return Err(Error::FieldTypeTooDeep { depth });
    }

    let tag = buffer.read_u8()?;
    if tag == ANY_FIELD_TYPE {
        return Ok(FieldType::Any);
    }

    if let Some(leaf) = FieldType::from_embedded_id(tag) {
        return Ok(leaf);
    }

    let read_name = |buffer: &mut Buffer| -> Result<TypeName, Error> {
        let namespace = buffer.read_string()?;
        let name = buffer.read_string()?;
        TypeName::new(namespace, name)
    };

    match InternalTypeId::from_repr(tag) {
        Some(InternalTypeId::List) => {
            Ok(FieldType::List(Box::new(read_field_type(buffer, depth + 1)?)))
        }
        Some(InternalTypeId::Set) => {
            Ok(FieldType::Set(Box::new(read_field_type(buffer, depth + 1)?)))
        }
        Some(InternalTypeId::Map) => {
            let key = read_field_type(buffer, depth + 1)?;
            let value = read_field_type(buffer, depth + 1)?;
            Ok(FieldType::Map(Box::new(key), Box::new(value)))
        }
        Some(InternalTypeId::NamedEnum) => Ok(FieldType::Enum(read_name(buffer)?)),
        Some(InternalTypeId::NamedStruct) => {
            Ok(FieldType::Struct(read_name(buffer)?))
        }
        _ => Err(Error::UnknownFieldType { tag }),
    }
}
