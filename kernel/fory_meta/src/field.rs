//! Bucketed field headers.
//!
//! Every field is identified on the wire by a header computed purely from its
//! name, its declared type and its nullability. Headers fall into four
//! buckets by how compactly the pair can be embedded:
//!
//! | bucket                | width | low bits | layout                              |
//! |-----------------------|-------|----------|-------------------------------------|
//! | [`Bucket::EmbedTypes4`]    | 4     | `01`     | `name << 8 \| type_id << 2 \| 01`   |
//! | [`Bucket::EmbedTypes9`]    | 8     | `011`    | `name << 10 \| type_id << 3 \| 011` |
//! | [`Bucket::EmbedTypesHash`] | 8     | `111`    | `hash << 10 \| type_id << 3 \| 111` |
//! | [`Bucket::SeparateTypesHash`] | 8  | `00`     | `hash << 2`                         |
//!
//! `name` packs each character of `[0-9A-Za-z]` into 6 bits; names with any
//! other character are hashed. `hash` is the first half of MurmurHash3 x64-128
//! of the UTF-8 name with seed [`FIELD_NAME_SEED`]. The object ends with
//! [`END_TAG`], whose low bits `10` belong to no bucket.
//!
//! Writers emit the buckets in the order above, each sorted by header value,
//! so both ends derive the same field order from their own declarations.

use fory_buffer::Buffer;

use crate::{
    hash::{hash64, FIELD_NAME_SEED},
    types::{FieldDef, FieldType},
    Error,
};

/// Terminates the field stream of a compatible struct.
pub const END_TAG: i64 = (i64::MAX & !0b11) | 0b10;

/// Flag bits of [`Bucket::EmbedTypes4`].
pub const EMBED_TYPES_4_FLAG: i64 = 0b01;

/// Flag bits of [`Bucket::EmbedTypes9`].
pub const EMBED_TYPES_9_FLAG: i64 = 0b011;

/// Flag bits of [`Bucket::EmbedTypesHash`].
pub const EMBED_TYPES_HASH_FLAG: i64 = 0b111;

/// Flag bits of [`Bucket::SeparateTypesHash`].
pub const SEPARATE_TYPES_HASH_FLAG: i64 = 0b00;

/// Largest type id that fits [`Bucket::EmbedTypes4`].
pub const MAX_EMBED_4_TYPE_ID: u8 = 63;

/// Largest type id that fits the 8-byte embedded buckets.
pub const MAX_EMBED_TYPE_ID: u8 = 127;

/// Offset added to the type id of nullable fields.
pub const NULLABLE_TYPE_ID_OFFSET: u8 = 64;

/// How a field header is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bucket {
    /// Name of at most 4 characters and small type id in 4 bytes.
    EmbedTypes4,

    /// Name of at most 9 characters and type id in 8 bytes.
    EmbedTypes9,

    /// Hashed name and type id in 8 bytes.
    EmbedTypesHash,

    /// Hashed name only; the type travels with the value.
    SeparateTypesHash,
}

/// A field header computed from a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldHeader {
    bucket: Bucket,
    value: i64,
}

impl FieldHeader {
    /// Computes the header of a field.
    #[must_use]
    pub fn of(field: &FieldDef) -> Self {
        let name = field.name();

        let Some(type_id) = embedded_type_id(field) else {
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
            let value = ((hash64(name.as_bytes(), FIELD_NAME_SEED) as u64)
                << 2) as i64;
            return Self { bucket: Bucket::SeparateTypesHash, value };
        };

        let type_id = u64::from(type_id);
        let name_bytes = encoding_bytes_length(name);

        if name_bytes <= 3 && type_id <= u64::from(MAX_EMBED_4_TYPE_ID) {
            let packed = pack_name(name) << 8 | type_id << 2;
            #[allow(clippy::cast_possible_truncation)]
            let value = i64::from((packed as u32) as i32) | EMBED_TYPES_4_FLAG;
            return Self { bucket: Bucket::EmbedTypes4, value };
        }

        if name_bytes <= 7 {
            #[allow(clippy::cast_possible_wrap)]
            let value =
                (pack_name(name) << 10 | type_id << 3) as i64 | EMBED_TYPES_9_FLAG;
            return Self { bucket: Bucket::EmbedTypes9, value };
        }

        #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
        let hash = hash64(name.as_bytes(), FIELD_NAME_SEED) as u64;
        #[allow(clippy::cast_possible_wrap)]
        let value = (hash << 10 | type_id << 3) as i64 | EMBED_TYPES_HASH_FLAG;
        Self { bucket: Bucket::EmbedTypesHash, value }
    }

    /// The bucket the header belongs to.
    #[must_use]
    pub const fn bucket(&self) -> Bucket { self.bucket }

    /// The header value; 4-byte headers are sign-extended.
    #[must_use]
    pub const fn value(&self) -> i64 { self.value }

    /// Appends the header.
    pub fn write(&self, buffer: &mut Buffer) {
        if self.bucket == Bucket::EmbedTypes4 {
            #[allow(clippy::cast_possible_truncation)]
            buffer.write_i32(self.value as i32);
        } else {
            buffer.write_i64(self.value);
        }
    }
}

/// A header read back from the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadHeader {
    /// A header with an embedded type id.
    Embedded {
        /// The header value; 4-byte headers are sign-extended.
        value: i64,

        /// The embedded type id, including the nullable offset.
        type_id: u8,
    },

    /// A separate-bucket header; the value carries its own type.
    Separate {
        /// The header value.
        value: i64,
    },

    /// The end of the field stream.
    End,
}

impl ReadHeader {
    /// Reads one header.
    ///
    /// # Errors
    ///
    /// Fails if the buffer is exhausted or the header has the end-tag bits
    /// without being [`END_TAG`].
    pub fn read(buffer: &mut Buffer) -> Result<Self, Error> {
        let first = i64::from(buffer.get_u8(buffer.reader_index())?);

        if first & 0b11 == EMBED_TYPES_4_FLAG {
            let value = i64::from(buffer.read_i32()?);
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let type_id = ((value & 0xFF) >> 2) as u8;
            return Ok(Self::Embedded { value, type_id });
        }

        let offset = buffer.reader_index();
        let value = buffer.read_i64()?;

        match value & 0b11 {
            0b11 => {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let type_id = ((value & 0b11_1111_1111) >> 3) as u8;
                Ok(Self::Embedded { value, type_id })
            }
            0b00 => Ok(Self::Separate { value }),
            _ if value == END_TAG => Ok(Self::End),
            _ => Err(Error::InvalidFieldHeader { offset, value }),
        }
    }
}

/// The type id embedded in the header of `field`, or `None` if the field
/// belongs to the separate bucket.
#[must_use]
pub fn embedded_type_id(field: &FieldDef) -> Option<u8> {
    if !field.field_type().is_embeddable() {
        return None;
    }

    let id = field.field_type().type_id();
    Some(if field.nullable() { id + NULLABLE_TYPE_ID_OFFSET } else { id })
}

/// Splits an embedded type id into the field type and nullability.
#[must_use]
pub fn decode_embedded_type_id(type_id: u8) -> Option<(FieldType, bool)> {
    if type_id >= NULLABLE_TYPE_ID_OFFSET {
        FieldType::from_embedded_id(type_id - NULLABLE_TYPE_ID_OFFSET)
            .map(|ty| (ty, true))
    } else {
        FieldType::from_embedded_id(type_id).map(|ty| (ty, false))
    }
}

/// The number of bytes the 6-bit packing of `name` takes, or 8 if the name
/// has a character outside `[0-9A-Za-z]` and must be hashed.
#[must_use]
pub fn encoding_bytes_length(name: &str) -> usize {
    if name.is_empty() || !name.bytes().all(|byte| byte.is_ascii_alphanumeric())
    {
        return 8;
    }

    (name.len() * 6).div_ceil(8)
}

/// Packs an alphanumeric name 6 bits per character, first character in the
/// most significant position.
#[must_use]
pub fn pack_name(name: &str) -> u64 {
    name.bytes().fold(0, |acc, byte| {
        let code = match byte {
            b'0'..=b'9' => byte - b'0',
            b'A'..=b'Z' => byte - b'A' + 10,
            _ => byte - b'a' + 36,
        };
        acc << 6 | u64::from(code & 0b11_1111)
    })
}

/// Sorts fields into wire order: by bucket, then by header value.
///
/// # Errors
///
/// Returns [`Error::HeaderCollision`] if two fields share a header.
pub fn sort_fields(
    type_name: &str,
    fields: &[FieldDef],
) -> Result<Vec<(FieldHeader, FieldDef)>, Error> {
    let mut sorted = fields
        .iter()
        .map(|field| (FieldHeader::of(field), field.clone()))
        .collect::<Vec<_>>();

    sorted.sort_by_key(|(header, _)| (header.bucket, header.value));

    for pair in sorted.windows(2) {
        if pair[0].0 == pair[1].0 {
            return Err(Error::HeaderCollision {
                type_name: type_name.to_owned(),
                first: pair[0].1.name().clone(),
                second: pair[1].1.name().clone(),
            });
        }
    }

    Ok(sorted)
}
