//! Declared type shapes and the internal type ids of the wire format.

use std::{collections::HashSet, fmt::Display};

use getset::{CopyGetters, Getters};

use crate::Error;


/// The low byte of every type tag.
///
/// Registered user types pack their numeric id above this byte:
/// `tag = (user_id << 8) | internal_id`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum_macros::FromRepr,
    strum_macros::Display,
    strum_macros::EnumIter,
)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum InternalTypeId {
    Bool = 1,
    Int8 = 2,
    Int16 = 3,
    Int32 = 4,
    VarInt32 = 5,
    Int64 = 6,
    VarInt64 = 7,
    SliInt64 = 8,
    Float32 = 10,
    Float64 = 11,
    String = 12,
    Enum = 13,
    NamedEnum = 14,
    Struct = 15,
    CompatibleStruct = 16,
    NamedStruct = 17,
    NamedCompatibleStruct = 18,
    Ext = 19,
    NamedExt = 20,
    List = 21,
    Set = 22,
    Map = 23,
    Timestamp = 25,
    LocalDate = 26,
    Binary = 28,
    BoolArray = 30,
    Int32Array = 33,
    Int64Array = 34,
    Float64Array = 37,
}

impl InternalTypeId {
    /// The wire value.
    #[must_use]
    pub const fn id(self) -> u8 { self as u8 }

    /// Whether the tag is followed by a namespace and a type name (or a
    /// meta-share index).
    #[must_use]
    pub const fn is_named(self) -> bool {
        matches!(
            self,
            Self::NamedEnum
                | Self::NamedStruct
                | Self::NamedCompatibleStruct
                | Self::NamedExt
        )
    }

    /// Whether the tag denotes a user struct in either mode.
    #[must_use]
    pub const fn is_struct(self) -> bool {
        matches!(
            self,
            Self::Struct
                | Self::CompatibleStruct
                | Self::NamedStruct
                | Self::NamedCompatibleStruct
        )
    }

    /// Whether the tag denotes a user struct written in compatible mode.
    #[must_use]
    pub const fn is_compatible_struct(self) -> bool {
        matches!(self, Self::CompatibleStruct | Self::NamedCompatibleStruct)
    }

    /// Whether the tag denotes a user enum.
    #[must_use]
    pub const fn is_enum(self) -> bool {
        matches!(self, Self::Enum | Self::NamedEnum)
    }

    /// Whether the tag denotes a user type with a custom serializer.
    #[must_use]
    pub const fn is_ext(self) -> bool {
        matches!(self, Self::Ext | Self::NamedExt)
    }

    /// Whether the tag can carry a user id in its high bits.
    #[must_use]
    pub const fn is_user_type(self) -> bool {
        self.is_struct() || self.is_enum() || self.is_ext()
    }
}

/// The namespace-qualified name of a user type.
///
/// The namespace may contain dots, the name may not.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Getters)]
pub struct TypeName {
    /// The namespace, possibly empty.
    #[get = "pub"]
    namespace: String,

    /// The simple name.
    #[get = "pub"]
    name: String,
}

impl TypeName {
    /// Creates a type name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTypeName`] if `name` is empty or contains a
    /// dot.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self, Error> {
        let namespace = namespace.into();
        let name = name.into();

        if name.is_empty() {
            return Err(Error::InvalidTypeName {
                name,
                reason: "the simple name is empty",
            });
        }

        if name.contains('.') {
            return Err(Error::InvalidTypeName {
                name,
                reason: "dots belong to the namespace",
            });
        }

        Ok(Self { namespace, name })
    }

    /// Splits a fully qualified name at its last dot.
    ///
    /// # Errors
    ///
    /// See [`Self::new`].
    pub fn parse(qualified: &str) -> Result<Self, Error> {
        qualified.rsplit_once('.').map_or_else(
            || Self::new("", qualified),
            |(namespace, name)| Self::new(namespace, name),
        )
    }
}

impl Display for TypeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}.{}", self.namespace, self.name)
        }
    }
}

/// The declared type of a struct field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum FieldType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Binary,
    Timestamp,
    Date,
    BoolArray,
    Int32Array,
    Int64Array,
    Float64Array,
    List(Box<FieldType>),
    Set(Box<FieldType>),
    Map(Box<FieldType>, Box<FieldType>),
    Enum(TypeName),
    Struct(TypeName),

    /// Any value; the concrete type travels with the value.
    Any,
}

/// The class definition tag of [`FieldType::Any`].
pub const ANY_FIELD_TYPE: u8 = 0;

impl FieldType {
    /// The internal type id identifying this field type in class
    /// definitions and field headers.
    #[must_use]
    pub const fn type_id(&self) -> u8 {
        let id = match self {
            Self::Bool => InternalTypeId::Bool,
            Self::Int8 => InternalTypeId::Int8,
            Self::Int16 => InternalTypeId::Int16,
            Self::Int32 => InternalTypeId::Int32,
            Self::Int64 => InternalTypeId::Int64,
            Self::Float32 => InternalTypeId::Float32,
            Self::Float64 => InternalTypeId::Float64,
            Self::String => InternalTypeId::String,
            Self::Binary => InternalTypeId::Binary,
            Self::Timestamp => InternalTypeId::Timestamp,
            Self::Date => InternalTypeId::LocalDate,
            Self::BoolArray => InternalTypeId::BoolArray,
            Self::Int32Array => InternalTypeId::Int32Array,
            Self::Int64Array => InternalTypeId::Int64Array,
            Self::Float64Array => InternalTypeId::Float64Array,
            Self::List(_) => InternalTypeId::List,
            Self::Set(_) => InternalTypeId::Set,
            Self::Map(..) => InternalTypeId::Map,
            Self::Enum(_) => InternalTypeId::NamedEnum,
            Self::Struct(_) => InternalTypeId::NamedStruct,
            Self::Any => return ANY_FIELD_TYPE,
        };

        id.id()
    }

    /// Whether the value is a fixed-shape leaf whose type can be embedded
    /// in a field header. Such values never take part in reference tracking.
    #[must_use]
    pub const fn is_embeddable(&self) -> bool {
        !matches!(
            self,
            Self::List(_)
                | Self::Set(_)
                | Self::Map(..)
                | Self::Enum(_)
                | Self::Struct(_)
                | Self::Any
        )
    }

    /// Whether the value is a primitive written without a length.
    #[must_use]
    pub const fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Bool
                | Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::Float32
                | Self::Float64
                | Self::Timestamp
                | Self::Date
        )
    }

    /// Rebuilds an embeddable field type from its type id.
    #[must_use]
    pub fn from_embedded_id(id: u8) -> Option<Self> {
        let ty = match InternalTypeId::from_repr(id)? {
            InternalTypeId::Bool => Self::Bool,
            InternalTypeId::Int8 => Self::Int8,
            InternalTypeId::Int16 => Self::Int16,
            InternalTypeId::Int32 => Self::Int32,
            InternalTypeId::Int64 => Self::Int64,
            InternalTypeId::Float32 => Self::Float32,
            InternalTypeId::Float64 => Self::Float64,
            InternalTypeId::String => Self::String,
            InternalTypeId::Binary => Self::Binary,
            InternalTypeId::Timestamp => Self::Timestamp,
            InternalTypeId::LocalDate => Self::Date,
            InternalTypeId::BoolArray => Self::BoolArray,
            InternalTypeId::Int32Array => Self::Int32Array,
            InternalTypeId::Int64Array => Self::Int64Array,
            InternalTypeId::Float64Array => Self::Float64Array,
            _ => return None,
        };

        Some(ty)
    }
}

impl Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::List(element) => write!(f, "list<{element}>"),
            Self::Set(element) => write!(f, "set<{element}>"),
            Self::Map(key, value) => write!(f, "map<{key}, {value}>"),
            Self::Enum(name) => write!(f, "enum {name}"),
            Self::Struct(name) => write!(f, "struct {name}"),
            other => write!(f, "{}", format!("{other:?}").to_lowercase()),
        }
    }
}

/// A named, typed slot of a struct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Getters, CopyGetters)]
pub struct FieldDef {
    /// The field name.
    #[get = "pub"]
    name: String,

    /// The declared type.
    #[get = "pub"]
    field_type: FieldType,

    /// Whether the field may hold null.
    #[get_copy = "pub"]
    nullable: bool,
}

impl FieldDef {
    /// A field that never holds null.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self { name: name.into(), field_type, nullable: false }
    }

    /// A field that may hold null.
    pub fn new_nullable(
        name: impl Into<String>,
        field_type: FieldType,
    ) -> Self {
        Self { name: name.into(), field_type, nullable: true }
    }

    /// Creates a field with explicit nullability.
    pub fn with_nullability(
        name: impl Into<String>,
        field_type: FieldType,
        nullable: bool,
    ) -> Self {
        Self { name: name.into(), field_type, nullable }
    }
}

/// The declared shape of a struct: its name and fields in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Getters, CopyGetters)]
pub struct StructType {
    /// The qualified name.
    #[get = "pub"]
    name: TypeName,

    /// The fields in declaration order.
    #[get = "pub"]
    fields: Vec<FieldDef>,

    /// Whether this shape was synthesised from a peer's class definition
    /// because no local type carries its name.
    #[get_copy = "pub"]
    placeholder: bool,
}

impl StructType {
    /// Declares a struct.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyFieldName`] or [`Error::DuplicateField`] when the
    /// field names are not unique and non-empty.
    pub fn new(name: TypeName, fields: Vec<FieldDef>) -> Result<Self, Error> {
        let mut seen = HashSet::new();

        for field in &fields {
            if field.name.is_empty() {
                return Err(Error::EmptyFieldName {
                    type_name: name.to_string(),
                });
            }

            if !seen.insert(field.name.as_str()) {
                return Err(Error::DuplicateField {
                    type_name: name.to_string(),
                    field: field.name.clone(),
                });
            }
        }

        Ok(Self { name, fields, placeholder: false })
    }

    /// Declares a placeholder for a peer type unknown locally.
    ///
    /// # Errors
    ///
    /// See [`Self::new`].
    pub fn new_placeholder(
        name: TypeName,
        fields: Vec<FieldDef>,
    ) -> Result<Self, Error> {
        Ok(Self { placeholder: true, ..Self::new(name, fields)? })
    }

    /// The position of the named field in declaration order.
    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }
}

/// The declared shape of an enum: its name and variant names by ordinal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Getters)]
pub struct EnumType {
    /// The qualified name.
    #[get = "pub"]
    name: TypeName,

    /// Variant names indexed by ordinal.
    #[get = "pub"]
    variants: Vec<String>,
}

impl EnumType {
    /// Declares an enum.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateField`] if a variant name repeats.
    pub fn new<I, S>(name: TypeName, variants: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let variants = variants.into_iter().map(Into::into).collect::<Vec<_>>();
        let mut seen = HashSet::new();

        for variant in &variants {
            if !seen.insert(variant.as_str()) {
                return Err(Error::DuplicateField {
                    type_name: name.to_string(),
                    field: variant.clone(),
                });
            }
        }

        Ok(Self { name, variants })
    }

    /// The ordinal of the named variant.
    #[must_use]
    pub fn ordinal_of(&self, variant: &str) -> Option<u32> {
        self.variants
            .iter()
            .position(|candidate| candidate == variant)
            .and_then(|ordinal| u32::try_from(ordinal).ok())
    }

    /// The name of the variant at `ordinal`.
    #[must_use]
    pub fn variant(&self, ordinal: u32) -> Option<&str> {
        self.variants.get(ordinal as usize).map(String::as_str)
    }
}
