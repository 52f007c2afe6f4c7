//! Type metadata shared by writers and readers.
//!
//! This crate holds everything that describes the *shape* of data rather than
//! the data itself:
//!
//! - [`types`]: declared struct and enum shapes, field types and the internal
//!   type ids used in type tags.
//! - [`field`]: the bucketed field header encoding that lets two versions of a
//!   struct agree on field order without exchanging a field list.
//! - [`class_def`]: the transmissible [`ClassDef`](class_def::ClassDef)
//!   description of a struct.
//! - [`meta_string`]: compact encodings and per-stream deduplication of
//!   namespaces and type names.
//! - [`hash`]: MurmurHash3 x64-128, the hash every other module builds on.

pub mod class_def;
pub mod field;
pub mod hash;
pub mod meta_string;
pub mod types;

/// Errors raised while building or decoding type metadata.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[allow(missing_docs)]
pub enum Error {
    /// The underlying buffer failed.
    #[error(transparent)]
    Buffer(#[from] fory_buffer::Error),

    /// A field type tag in a class definition is not known.
    #[error("unknown field type tag {tag}")]
    UnknownFieldType { tag: u8 },

    /// A class definition declares an unknown kind.
    #[error("unknown class definition kind {tag}")]
    UnknownDefKind { tag: u8 },

    /// A field type nests containers deeper than allowed.
    #[error("field type nests deeper than {depth} levels")]
    FieldTypeTooDeep { depth: usize },

    /// A namespace or type name is not acceptable.
    #[error("invalid type name `{name}`: {reason}")]
    InvalidTypeName { name: String, reason: &'static str },

    /// A struct declares a field name twice.
    #[error("field `{field}` is declared twice in `{type_name}`")]
    DuplicateField { type_name: String, field: String },

    /// A struct declares a field with an empty name.
    #[error("`{type_name}` declares a field with an empty name")]
    EmptyFieldName { type_name: String },

    /// Two fields map to the same wire header.
    #[error(
        "fields `{first}` and `{second}` of `{type_name}` encode to the same \
         field header"
    )]
    HeaderCollision { type_name: String, first: String, second: String },

    /// A class definition body did not decode to its declared length.
    #[error(
        "class definition declares {declared} bytes but its body spans \
         {consumed}"
    )]
    BodyLengthMismatch { declared: usize, consumed: usize },

    /// A field header has the end-tag bits but is not the end tag.
    #[error("invalid field header {value:#x} at offset {offset}")]
    InvalidFieldHeader { offset: usize, value: i64 },

    /// A meta string back-reference points to an id never defined.
    #[error("meta string id {id} was never defined in this stream")]
    UnknownMetaString { id: u32 },

    /// A meta string names an encoding tag that does not exist.
    #[error("unknown meta string encoding {tag}")]
    UnknownMetaStringEncoding { tag: u8 },

    /// A string holds a character its requested encoding cannot represent.
    #[error("`{value}` cannot be encoded as {encoding}")]
    UnencodableMetaString {
        value: String,
        encoding: meta_string::encoding::Encoding,
    },

    /// Packed meta string bytes do not decode under their encoding.
    #[error("meta string bytes are not valid {encoding}")]
    InvalidMetaString { encoding: meta_string::encoding::Encoding },
}
