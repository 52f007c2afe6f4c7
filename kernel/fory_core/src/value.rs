//! The dynamic value model the engine reads and writes.
//!
//! Structs are shared, interior-mutable [`ObjectRef`]s so that a graph can
//! alias the same object from several places or point back at itself. Every
//! other variant is a plain value; strings are reference counted so that
//! identical strings can be tracked by identity when configured to.

use std::{collections::HashSet, fmt::Display, sync::Arc};

use enum_as_inner::EnumAsInner;
use fory_meta::types::{EnumType, FieldDef, FieldType, StructType};
use getset::{CopyGetters, Getters};
use parking_lot::RwLock;

use crate::error::{Error, Result};


/// A sequence of nullable fixed-width primitives, written with a null bitmap.
#[derive(Debug, Clone, PartialEq, EnumAsInner)]
#[allow(missing_docs)]
pub enum PrimitiveArray {
    Bool(Vec<Option<bool>>),
    Int32(Vec<Option<i32>>),
    Int64(Vec<Option<i64>>),
    Float64(Vec<Option<f64>>),
}

impl PrimitiveArray {
    /// The number of slots, present or not.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Bool(values) => values.len(),
            Self::Int32(values) => values.len(),
            Self::Int64(values) => values.len(),
            Self::Float64(values) => values.len(),
        }
    }

    /// Whether the array has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// The field type an array of this kind declares.
    #[must_use]
    pub const fn field_type(&self) -> FieldType {
        match self {
            Self::Bool(_) => FieldType::BoolArray,
            Self::Int32(_) => FieldType::Int32Array,
            Self::Int64(_) => FieldType::Int64Array,
            Self::Float64(_) => FieldType::Float64Array,
        }
    }
}

/// A variant of a user enum.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Getters, CopyGetters, derive_new::new,
)]
pub struct EnumValue {
    /// The enum the variant belongs to.
    #[get = "pub"]
    enum_type: Arc<EnumType>,

    /// The variant's ordinal.
    #[get_copy = "pub"]
    ordinal: u32,
}

impl EnumValue {
    /// The variant named `variant`, if the enum has one.
    #[must_use]
    pub fn of(enum_type: &Arc<EnumType>, variant: &str) -> Option<Self> {
        enum_type
            .ordinal_of(variant)
            .map(|ordinal| Self::new(Arc::clone(enum_type), ordinal))
    }

    /// The variant's name, if the ordinal is in range.
    #[must_use]
    pub fn name(&self) -> Option<&str> { self.enum_type.variant(self.ordinal) }
}

/// An instance of a user struct.
#[derive(Clone, Getters)]
pub struct Object {
    /// The declared shape.
    #[get = "pub"]
    struct_type: Arc<StructType>,

    fields: Vec<Value>,
}

/// A shared handle to an [`Object`]. Identity is the pointer.
///
/// Handles are reference counted; a cycle of handles is never freed unless a
/// field on the cycle is cleared.
pub type ObjectRef = Arc<RwLock<Object>>;

impl std::fmt::Debug for Object {
    // shallow so that cyclic graphs stay printable
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("type", &self.struct_type.name().to_string())
            .field("fields", &self.fields.len())
            .finish()
    }
}

impl Object {
    /// An instance with every field at its default.
    #[must_use]
    pub fn new(struct_type: Arc<StructType>) -> Self {
        let fields = struct_type.fields().iter().map(default_value).collect();
        Self { struct_type, fields }
    }

    /// An instance with the given field values in declaration order.
    ///
    /// # Errors
    ///
    /// Fails if the number of values differs from the number of fields.
    pub fn with_fields(
        struct_type: Arc<StructType>,
        fields: Vec<Value>,
    ) -> Result<Self> {
        if fields.len() != struct_type.fields().len() {
            return Err(Error::mismatch(
                format!(
                    "{} fields for `{}`",
                    struct_type.fields().len(),
                    struct_type.name()
                ),
                format!("{} values", fields.len()),
            ));
        }

        Ok(Self { struct_type, fields })
    }

    /// Field values in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[Value] { &self.fields }

    /// The value of the named field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.struct_type.field_index(name).map(|index| &self.fields[index])
    }

    /// Replaces the value of the named field, returning the old value, or
    /// `None` if the struct has no such field.
    pub fn set(&mut self, name: &str, value: Value) -> Option<Value> {
        let index = self.struct_type.field_index(name)?;
        Some(std::mem::replace(&mut self.fields[index], value))
    }

    pub(crate) fn set_fields(&mut self, fields: Vec<Value>) {
        self.fields = fields;
    }
}

/// A dynamically typed value.
#[derive(Debug, Clone, EnumAsInner)]
#[allow(missing_docs)]
pub enum Value {
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(Arc<str>),
    Binary(Vec<u8>),

    /// Microseconds since the Unix epoch.
    Timestamp(i64),

    /// Days since the Unix epoch.
    Date(i32),

    Array(PrimitiveArray),
    List(Vec<Value>),
    Set(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Enum(EnumValue),
    Object(ObjectRef),
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self { Self::$variant(value) }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
    EnumValue => Enum,
    PrimitiveArray => Array,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self { Self::String(value.into()) }
}

impl From<String> for Value {
    fn from(value: String) -> Self { Self::String(value.into()) }
}

impl From<Object> for Value {
    fn from(value: Object) -> Self { Self::Object(Arc::new(RwLock::new(value))) }
}

impl Value {
    /// A new object with the given field values in declaration order.
    ///
    /// # Errors
    ///
    /// See [`Object::with_fields`].
    pub fn object(
        struct_type: &Arc<StructType>,
        fields: Vec<Self>,
    ) -> Result<Self> {
        Object::with_fields(Arc::clone(struct_type), fields).map(Self::from)
    }

    /// The address identifying the value when tracked by reference, or `None`
    /// for values without identity.
    #[must_use]
    pub fn identity(&self) -> Option<usize> {
        match self {
            Self::String(string) => Some(Arc::as_ptr(string).cast::<u8>() as usize),
            Self::Object(object) => Some(Arc::as_ptr(object) as usize),
            _ => None,
        }
    }

    /// A short human-readable name of the value's type.
    #[must_use]
    pub fn type_label(&self) -> String {
        match self {
            Self::Null => "null".to_owned(),
            Self::Bool(_) => "bool".to_owned(),
            Self::Int8(_) => "int8".to_owned(),
            Self::Int16(_) => "int16".to_owned(),
            Self::Int32(_) => "int32".to_owned(),
            Self::Int64(_) => "int64".to_owned(),
            Self::Float32(_) => "float32".to_owned(),
            Self::Float64(_) => "float64".to_owned(),
            Self::String(_) => "string".to_owned(),
            Self::Binary(_) => "binary".to_owned(),
            Self::Timestamp(_) => "timestamp".to_owned(),
            Self::Date(_) => "date".to_owned(),
            Self::Array(array) => array.field_type().to_string(),
            Self::List(_) => "list".to_owned(),
            Self::Set(_) => "set".to_owned(),
            Self::Map(_) => "map".to_owned(),
            Self::Enum(value) => format!("enum {}", value.enum_type().name()),
            Self::Object(object) => {
                format!("struct {}", object.read_recursive().struct_type().name())
            }
        }
    }

    /// Whether a non-null value can be stored in a field of type
    /// `field_type`. Container element types are not inspected.
    #[must_use]
    pub fn conforms(&self, field_type: &FieldType) -> bool {
        match (field_type, self) {
            (FieldType::Any, _) => true,
            (FieldType::Bool, Self::Bool(_))
            | (FieldType::Int8, Self::Int8(_))
            | (FieldType::Int16, Self::Int16(_))
            | (FieldType::Int32, Self::Int32(_))
            | (FieldType::Int64, Self::Int64(_))
            | (FieldType::Float32, Self::Float32(_))
            | (FieldType::Float64, Self::Float64(_))
            | (FieldType::String, Self::String(_))
            | (FieldType::Binary, Self::Binary(_))
            | (FieldType::Timestamp, Self::Timestamp(_))
            | (FieldType::Date, Self::Date(_))
            | (FieldType::BoolArray, Self::Array(PrimitiveArray::Bool(_)))
            | (FieldType::Int32Array, Self::Array(PrimitiveArray::Int32(_)))
            | (FieldType::Int64Array, Self::Array(PrimitiveArray::Int64(_)))
            | (FieldType::Float64Array, Self::Array(PrimitiveArray::Float64(_)))
            | (FieldType::List(_), Self::List(_))
            | (FieldType::Set(_), Self::Set(_))
            | (FieldType::Map(..), Self::Map(_)) => true,
            (FieldType::Enum(name), Self::Enum(value)) => {
                value.enum_type().name() == name
            }
            (FieldType::Struct(name), Self::Object(object)) => {
                object.read_recursive().struct_type().name() == name
            }
            _ => false,
        }
    }

    /// A one-line description used in diagnostics.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::Object(object) => {
                let object = object.read_recursive();
                format!(
                    "{}{{{} fields}}",
                    object.struct_type().name(),
                    object.fields().len()
                )
            }
            Self::Enum(value) => value.name().map_or_else(
                || format!("{}::#{}", value.enum_type().name(), value.ordinal()),
                |name| format!("{}::{name}", value.enum_type().name()),
            ),
            Self::String(string) => format!("{string:?}"),
            Self::Binary(bytes) => format!("binary[{}]", bytes.len()),
            Self::Array(array) => format!("{}[{}]", array.field_type(), array.len()),
            Self::List(values) => format!("list[{}]", values.len()),
            Self::Set(values) => format!("set[{}]", values.len()),
            Self::Map(entries) => format!("map[{}]", entries.len()),
            scalar => scalar.to_string(),
        }
    }

    /// Structural equality that terminates on cyclic graphs. A pair of
    /// objects already under comparison is assumed equal.
    #[must_use]
    pub fn graph_eq(&self, other: &Self) -> bool {
        graph_eq(self, other, &mut HashSet::new())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool { self.graph_eq(other) }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int8(value) => write!(f, "{value}i8"),
            Self::Int16(value) => write!(f, "{value}i16"),
            Self::Int32(value) => write!(f, "{value}i32"),
            Self::Int64(value) => write!(f, "{value}i64"),
            Self::Float32(value) => write!(f, "{value}f32"),
            Self::Float64(value) => write!(f, "{value}f64"),
            Self::Timestamp(micros) => write!(f, "timestamp({micros})"),
            Self::Date(days) => write!(f, "date({days})"),
            other => write!(f, "{}", other.summary()),
        }
    }
}

fn graph_eq(
    lhs: &Value,
    rhs: &Value,
    visited: &mut HashSet<(usize, usize)>,
) -> bool {
    match (lhs, rhs) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int8(a), Value::Int8(b)) => a == b,
        (Value::Int16(a), Value::Int16(b)) => a == b,
        (Value::Int32(a), Value::Int32(b)) => a == b,
        (Value::Int64(a), Value::Int64(b))
        | (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
        (Value::Float32(a), Value::Float32(b)) => a.to_bits() == b.to_bits(),
        (Value::Float64(a), Value::Float64(b)) => a.to_bits() == b.to_bits(),
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Binary(a), Value::Binary(b)) => a == b,
        (Value::Date(a), Value::Date(b)) => a == b,
        (Value::Array(a), Value::Array(b)) => a == b,
        (Value::List(a), Value::List(b)) | (Value::Set(a), Value::Set(b)) => {
            a.len() == b.len()
                && a.iter().zip(b).all(|(a, b)| graph_eq(a, b, visited))
        }
        (Value::Map(a), Value::Map(b)) => {
            a.len() == b.len()
                && a.iter().zip(b).all(|((ak, av), (bk, bv))| {
                    graph_eq(ak, bk, visited) && graph_eq(av, bv, visited)
                })
        }
        (Value::Enum(a), Value::Enum(b)) => {
            a.ordinal() == b.ordinal()
                && a.enum_type().name() == b.enum_type().name()
        }
        (Value::Object(a), Value::Object(b)) => {
            let key = (Arc::as_ptr(a) as usize, Arc::as_ptr(b) as usize);
            if !visited.insert(key) {
                return true;
            }

            let (a, b) = (a.read_recursive(), b.read_recursive());

            a.struct_type().name() == b.struct_type().name()
                && a.fields().len() == b.fields().len()
                && a.fields()
                    .iter()
                    .zip(b.fields())
                    .all(|(a, b)| graph_eq(a, b, visited))
        }
        _ => false,
    }
}

/// The value a field holds before anything is assigned to it.
#[must_use]
pub fn default_value(field: &FieldDef) -> Value {
    if field.nullable() {
        return Value::Null;
    }

    match field.field_type() {
        FieldType::Bool => Value::Bool(false),
        FieldType::Int8 => Value::Int8(0),
        FieldType::Int16 => Value::Int16(0),
        FieldType::Int32 => Value::Int32(0),
        FieldType::Int64 => Value::Int64(0),
        FieldType::Float32 => Value::Float32(0.0),
        FieldType::Float64 => Value::Float64(0.0),
        FieldType::String => Value::String("".into()),
        FieldType::Binary => Value::Binary(Vec::new()),
        FieldType::Timestamp => Value::Timestamp(0),
        FieldType::Date => Value::Date(0),
        FieldType::BoolArray => Value::Array(PrimitiveArray::Bool(Vec::new())),
        FieldType::Int32Array => Value::Array(PrimitiveArray::Int32(Vec::new())),
        FieldType::Int64Array => Value::Array(PrimitiveArray::Int64(Vec::new())),
        FieldType::Float64Array => {
            Value::Array(PrimitiveArray::Float64(Vec::new()))
        }
        FieldType::List(_) => Value::List(Vec::new()),
        FieldType::Set(_) => Value::Set(Vec::new()),
        FieldType::Map(..) => Value::Map(Vec::new()),
        FieldType::Enum(_) | FieldType::Struct(_) | FieldType::Any => Value::Null,
    }
}
