//! The per-call state threaded through serializers.
//!
//! A [`WriteContext`] or [`ReadContext`] borrows everything one call needs:
//! the buffer, the type registry, the reference resolver, the meta string
//! tables and, when meta sharing is active, the session's
//! [`MetaContext`]. Serializers only see the context, never the engine.
//!
//! Every dynamically typed value is framed as
//!
//! ```text
//! ref flag | type tag | [type meta] | payload
//! ```
//!
//! where the type meta is absent for built-in and id-registered types, the
//! namespace and name as meta strings for named types, and a session index
//! for named or compatible types while meta sharing is active.
//!
//! Declared struct fields skip the parts the declaration already fixes: a
//! non-nullable primitive is written as its bare payload, any other leaf as
//! ref flag plus payload. Containers, enums, structs and dynamic fields are
//! framed in full.

use std::{collections::HashMap, sync::Arc};

use fory_buffer::{bitmap, Buffer, LongEncoding};
use fory_meta::{
    meta_string::{MetaStringReader, MetaStringWriter},
    types::{FieldDef, FieldType, InternalTypeId, TypeName},
};

use crate::{
    config::{Config, SnapshotMode},
    error::{Error, ReadSnapshot, Result},
    meta_context::MetaContext,
    ref_resolver::{RefFlag, RefResolver, Resolver},
    registry::{ClassInfo, TypeDef, TypeRegistry},
    serializer::MetaSharedSerializer,
    value::{PrimitiveArray, Value},
};

const CIRCULAR_HINT: &str =
    "; the graph may be circular, enable reference tracking";

fn depth_exceeded(config: &Config) -> Error {
    Error::DepthExceeded {
        max_depth: config.max_depth(),
        hint: if config.ref_tracking() { "" } else { CIRCULAR_HINT },
    }
}

/// Whether `value` goes through the reference resolver under `config`.
fn tracks(config: &Config, value: &Value) -> bool {
    if !config.ref_tracking() {
        return false;
    }

    match value {
        Value::Bool(_)
        | Value::Int8(_)
        | Value::Int16(_)
        | Value::Int32(_)
        | Value::Int64(_)
        | Value::Float32(_)
        | Value::Float64(_) => !config.basic_types_ref_ignored(),
        Value::String(_) => !config.string_ref_ignored(),
        Value::Timestamp(_) | Value::Date(_) => !config.time_ref_ignored(),
        _ => true,
    }
}

fn int32_id(config: &Config) -> InternalTypeId {
    if config.compress_int() {
        InternalTypeId::VarInt32
    } else {
        InternalTypeId::Int32
    }
}

fn int64_id(config: &Config) -> InternalTypeId {
    match config.long_encoding() {
        LongEncoding::Sli => InternalTypeId::SliInt64,
        LongEncoding::Pvl => InternalTypeId::VarInt64,
        LongEncoding::Raw => InternalTypeId::Int64,
    }
}

/// The internal id a declared leaf field is written with.
fn leaf_id(config: &Config, field_type: &FieldType) -> Result<InternalTypeId> {
    match field_type {
        FieldType::Int32 => Ok(int32_id(config)),
        FieldType::Int64 => Ok(int64_id(config)),
        other => InternalTypeId::from_repr(other.type_id()).ok_or(
            Error::UnknownTypeTag { tag: u32::from(other.type_id()) },
        ),
    }
}

fn check_field(field: &FieldDef, value: &Value) -> Result<()> {
    let field_type = field.field_type();

    let fits = if value.is_null() {
        field.nullable() || !field_type.is_embeddable()
    } else {
        value.conforms(field_type)
    };

    if fits {
        Ok(())
    } else {
        Err(Error::mismatch(
            format!("{field_type} for field `{}`", field.name()),
            value.type_label(),
        ))
    }
}

/// State of one serialize call.
#[derive(Debug)]
pub struct WriteContext<'a> {
    buffer: &'a mut Buffer,
    registry: &'a mut TypeRegistry,
    refs: &'a mut Resolver,
    meta_strings: &'a mut MetaStringWriter,
    meta: Option<&'a mut MetaContext>,
    scratch: HashMap<usize, Value>,
    config: Arc<Config>,
    depth: usize,
}

impl<'a> WriteContext<'a> {
    pub(crate) fn new(
        buffer: &'a mut Buffer,
        registry: &'a mut TypeRegistry,
        refs: &'a mut Resolver,
        meta_strings: &'a mut MetaStringWriter,
        meta: Option<&'a mut MetaContext>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            buffer,
            registry,
            refs,
            meta_strings,
            meta,
            scratch: HashMap::new(),
            config,
            depth: 0,
        }
    }

    /// The output buffer.
    pub fn buffer(&mut self) -> &mut Buffer { self.buffer }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &Config { &self.config }

    /// Whether class definitions are shared with the peer in this call.
    #[must_use]
    pub const fn meta_share_active(&self) -> bool { self.meta.is_some() }

    /// Storage keyed by [`Value::identity`] for serializers coordinating
    /// across the objects of one graph. Dropped at the end of the call.
    pub fn scratch(&mut self) -> &mut HashMap<usize, Value> { &mut self.scratch }

    /// Writes a namespace, type name or enum name, deduplicated within the
    /// call.
    ///
    /// # Errors
    ///
    /// Fails if the string is too long to encode.
    pub fn write_meta_string(&mut self, value: &str) -> Result<()> {
        Ok(self.meta_strings.write(self.buffer, value)?)
    }

    /// Writes a value with its ref flag and type tag.
    ///
    /// # Errors
    ///
    /// Fails if the value's type is rejected by the registry or the security
    /// gate, nesting exceeds the configured depth, or a nested value fails.
    /// Registry and security failures happen before any byte of the value is
    /// written.
    pub fn write_value(&mut self, value: &Value) -> Result<()> {
        if value.is_null() {
            RefFlag::Null.write(self.buffer);
            return Ok(());
        }

        let info = match value {
            Value::Object(_) | Value::Enum(_) => {
                Some(self.registry.class_info_for_write(value)?)
            }
            _ => None,
        };

        if tracks(&self.config, value) {
            if self.refs.write_ref_or_null(self.buffer, value) {
                return Ok(());
            }
        } else {
            RefFlag::NotNullValue.write(self.buffer);
        }

        self.enter()?;

        match info {
            Some(info) => {
                self.write_type(&info)?;
                info.serializer().write(self, value)?;
            }
            None => {
                let internal_id = self.builtin_id(value)?;
                self.buffer.write_var_u32(u32::from(internal_id.id()));
                self.write_payload(internal_id, value)?;
            }
        }

        self.depth -= 1;
        Ok(())
    }

    /// Writes a struct field according to its declaration.
    ///
    /// # Errors
    ///
    /// Fails if the value does not fit the declaration or cannot be written.
    pub fn write_field(&mut self, field: &FieldDef, value: &Value) -> Result<()> {
        check_field(field, value)?;

        let field_type = field.field_type();
        if !field_type.is_embeddable() {
            return self.write_value(value);
        }

        let internal_id = leaf_id(&self.config, field_type)?;

        if field_type.is_primitive() && !field.nullable() {
            return self.write_payload(internal_id, value);
        }

        if value.is_null() {
            RefFlag::Null.write(self.buffer);
            return Ok(());
        }

        if tracks(&self.config, value) {
            if self.refs.write_ref_or_null(self.buffer, value) {
                return Ok(());
            }
        } else {
            RefFlag::NotNullValue.write(self.buffer);
        }

        self.write_payload(internal_id, value)
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;

        if self.depth > self.config.max_depth() {
            return Err(depth_exceeded(&self.config));
        }

        Ok(())
    }

    fn write_type(&mut self, info: &ClassInfo) -> Result<()> {
        self.buffer.write_var_u32(info.tag());

        let internal_id = info.internal_id();
        let shared = internal_id.is_compatible_struct() || internal_id.is_named();

        if let (true, Some(meta)) = (shared, self.meta.as_deref_mut()) {
            let index = meta.write_index(info.type_name(), || info.class_def())?;
            self.buffer.write_var_u32(index);
        } else if internal_id.is_named() {
            let name = info.type_name();
            self.meta_strings.write(self.buffer, name.namespace())?;
            self.meta_strings.write(self.buffer, name.name())?;
        }

        Ok(())
    }

    fn builtin_id(&self, value: &Value) -> Result<InternalTypeId> {
        let internal_id = match value {
            Value::Bool(_) => InternalTypeId::Bool,
            Value::Int8(_) => InternalTypeId::Int8,
            Value::Int16(_) => InternalTypeId::Int16,
            Value::Int32(_) => int32_id(&self.config),
            Value::Int64(_) => int64_id(&self.config),
            Value::Float32(_) => InternalTypeId::Float32,
            Value::Float64(_) => InternalTypeId::Float64,
            Value::String(_) => InternalTypeId::String,
            Value::Binary(_) => InternalTypeId::Binary,
            Value::Timestamp(_) => InternalTypeId::Timestamp,
            Value::Date(_) => InternalTypeId::LocalDate,
            Value::Array(PrimitiveArray::Bool(_)) => InternalTypeId::BoolArray,
            Value::Array(PrimitiveArray::Int32(_)) => InternalTypeId::Int32Array,
            Value::Array(PrimitiveArray::Int64(_)) => InternalTypeId::Int64Array,
            Value::Array(PrimitiveArray::Float64(_)) => {
                InternalTypeId::Float64Array
            }
            Value::List(_) => InternalTypeId::List,
            Value::Set(_) => InternalTypeId::Set,
            Value::Map(_) => InternalTypeId::Map,
            Value::Null | Value::Enum(_) | Value::Object(_) => {
                return Err(Error::mismatch("a built-in value", value.type_label()));
            }
        };

        Ok(internal_id)
    }

    fn write_payload(
        &mut self,
        internal_id: InternalTypeId,
        value: &Value,
    ) -> Result<()> {
        match (internal_id, value) {
            (InternalTypeId::Bool, Value::Bool(value)) => {
                self.buffer.write_bool(*value);
            }
            (InternalTypeId::Int8, Value::Int8(value)) => {
                self.buffer.write_i8(*value);
            }
            (InternalTypeId::Int16, Value::Int16(value)) => {
                self.buffer.write_i16(*value);
            }
            (InternalTypeId::Int32, Value::Int32(value))
            | (InternalTypeId::LocalDate, Value::Date(value)) => {
                self.buffer.write_i32(*value);
            }
            (InternalTypeId::VarInt32, Value::Int32(value)) => {
                self.buffer.write_var_i32(*value);
            }
            (InternalTypeId::Int64, Value::Int64(value))
            | (InternalTypeId::Timestamp, Value::Timestamp(value)) => {
                self.buffer.write_i64(*value);
            }
            (InternalTypeId::VarInt64, Value::Int64(value)) => {
                self.buffer.write_var_i64(*value);
            }
            (InternalTypeId::SliInt64, Value::Int64(value)) => {
                self.buffer.write_sli_i64(*value);
            }
            (InternalTypeId::Float32, Value::Float32(value)) => {
                self.buffer.write_f32(*value);
            }
            (InternalTypeId::Float64, Value::Float64(value)) => {
                self.buffer.write_f64(*value);
            }
            (InternalTypeId::String, Value::String(value)) => {
                self.buffer.write_str(value)?;
            }
            (InternalTypeId::Binary, Value::Binary(bytes)) => {
                self.buffer.write_length(bytes.len())?;
                self.buffer.write_bytes(bytes);
            }
            (InternalTypeId::BoolArray, Value::Array(PrimitiveArray::Bool(values))) => {
                self.write_array(values, Buffer::write_bool)?;
            }
            (
                InternalTypeId::Int32Array,
                Value::Array(PrimitiveArray::Int32(values)),
            ) => {
                self.write_array(values, Buffer::write_i32)?;
            }
            (
                InternalTypeId::Int64Array,
                Value::Array(PrimitiveArray::Int64(values)),
            ) => {
                self.write_array(values, Buffer::write_i64)?;
            }
            (
                InternalTypeId::Float64Array,
                Value::Array(PrimitiveArray::Float64(values)),
            ) => {
                self.write_array(values, Buffer::write_f64)?;
            }
            (InternalTypeId::List, Value::List(values))
            | (InternalTypeId::Set, Value::Set(values)) => {
                self.buffer.write_length(values.len())?;
                for value in values {
                    self.write_value(value)?;
                }
            }
            (InternalTypeId::Map, Value::Map(entries)) => {
                self.buffer.write_length(entries.len())?;
                for (key, value) in entries {
                    self.write_value(key)?;
                    self.write_value(value)?;
                }
            }
            (internal_id, value) => {
                return Err(Error::mismatch(internal_id, value.type_label()));
            }
        }

        Ok(())
    }

    // length, presence bitmap, then the present values
    fn write_array<T: Copy>(
        &mut self,
        values: &[Option<T>],
        mut put: impl FnMut(&mut Buffer, T),
    ) -> Result<()> {
        self.buffer.write_length(values.len())?;

        let width = bitmap::width_in_bytes(values.len());
        let offset = self.buffer.write_zeros(width);
        let presence = self.buffer.slice_mut(offset, width)?;

        for (index, value) in values.iter().enumerate() {
            if value.is_some() {
                bitmap::set(presence, index);
            }
        }

        for value in values.iter().flatten() {
            put(&mut *self.buffer, *value);
        }

        Ok(())
    }
}

/// Collects summaries of the objects reconstructed by a read, for the
/// diagnostics of a failed call.
#[derive(Debug, Clone)]
pub(crate) struct SnapshotRecorder {
    mode: SnapshotMode,
    limit: usize,
    objects: Vec<String>,
    total: usize,
}

impl SnapshotRecorder {
    pub(crate) const fn new(mode: SnapshotMode, limit: usize) -> Self {
        Self { mode, limit, objects: Vec::new(), total: 0 }
    }

    fn record(&mut self, value: &Value) {
        self.total += 1;

        let retain = match self.mode {
            SnapshotMode::Omit => false,
            SnapshotMode::Full => true,
            SnapshotMode::Sampled(every) => self.total % every.max(1) == 0,
        };

        if retain && self.objects.len() < self.limit {
            self.objects.push(value.summary());
        }
    }

    pub(crate) fn take(&mut self) -> ReadSnapshot {
        let snapshot = ReadSnapshot::new(std::mem::take(&mut self.objects), self.total);
        self.total = 0;
        snapshot
    }
}

/// State of one deserialize call.
#[derive(Debug)]
pub struct ReadContext<'a> {
    buffer: &'a mut Buffer,
    registry: &'a mut TypeRegistry,
    refs: &'a mut Resolver,
    meta_strings: &'a mut MetaStringReader,
    meta: Option<&'a mut MetaContext>,
    snapshot: &'a mut SnapshotRecorder,
    scratch: HashMap<usize, Value>,
    config: Arc<Config>,
    depth: usize,
}

impl<'a> ReadContext<'a> {
    pub(crate) fn new(
        buffer: &'a mut Buffer,
        registry: &'a mut TypeRegistry,
        refs: &'a mut Resolver,
        meta_strings: &'a mut MetaStringReader,
        meta: Option<&'a mut MetaContext>,
        snapshot: &'a mut SnapshotRecorder,
        config: Arc<Config>,
    ) -> Self {
        Self {
            buffer,
            registry,
            refs,
            meta_strings,
            meta,
            snapshot,
            scratch: HashMap::new(),
            config,
            depth: 0,
        }
    }

    /// The input buffer.
    pub fn buffer(&mut self) -> &mut Buffer { self.buffer }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &Config { &self.config }

    /// Whether class definitions are shared with the peer in this call.
    #[must_use]
    pub const fn meta_share_active(&self) -> bool { self.meta.is_some() }

    /// Storage keyed by [`Value::identity`] for serializers coordinating
    /// across the objects of one graph. Dropped at the end of the call.
    pub fn scratch(&mut self) -> &mut HashMap<usize, Value> { &mut self.scratch }

    /// Makes a value under construction visible to back-references. A
    /// serializer building a shared object calls this before reading the
    /// object's fields.
    pub fn reference(&mut self, value: &Value) { self.refs.reference(value); }

    /// Swaps an object made visible through [`Self::reference`] for the
    /// final one, for serializers that build the result only after reading
    /// the fields. Back-references read afterwards resolve to `replacement`.
    pub fn replace_ref(&mut self, original: &Value, replacement: &Value) {
        self.refs.replace_ref(original, replacement);
    }

    /// Reads a string written by [`WriteContext::write_meta_string`].
    ///
    /// # Errors
    ///
    /// Fails on truncated input or a back-reference to an undefined string.
    pub fn read_meta_string(&mut self) -> Result<Arc<str>> {
        Ok(self.meta_strings.read(self.buffer)?)
    }

    /// Reads a value written by [`WriteContext::write_value`].
    ///
    /// # Errors
    ///
    /// Fails on malformed input, a type the registry or security gate
    /// rejects, or nesting beyond the configured depth.
    pub fn read_value(&mut self) -> Result<Value> {
        match self.refs.read_ref_or_null(self.buffer)? {
            (_, Some(value)) => Ok(value),
            (RefFlag::Null, None) => Ok(Value::Null),
            (RefFlag::RefValue, None) => {
                self.refs.preserve_ref_id();
                self.read_frame(Self::read_typed)
            }
            (RefFlag::NotNullValue, None) => {
                self.refs.push_untracked();
                self.read_frame(Self::read_typed)
            }
            (RefFlag::Ref, None) => Err(Error::UnsupportedStream {
                reason: "back-reference without a value",
            }),
        }
    }

    /// Reads a struct field written by [`WriteContext::write_field`].
    ///
    /// # Errors
    ///
    /// Fails on malformed input or a value that does not fit the
    /// declaration.
    pub fn read_field(&mut self, field: &FieldDef) -> Result<Value> {
        let field_type = field.field_type();

        if !field_type.is_embeddable() {
            let value = self.read_value()?;
            check_field(field, &value)?;
            return Ok(value);
        }

        let internal_id = leaf_id(&self.config, field_type)?;

        if field_type.is_primitive() && !field.nullable() {
            return self.read_payload(internal_id);
        }

        let value = match self.refs.read_ref_or_null(self.buffer)? {
            (_, Some(value)) => value,
            (RefFlag::Null, None) => Value::Null,
            (RefFlag::RefValue, None) => {
                self.refs.preserve_ref_id();
                self.read_frame(|ctx| ctx.read_payload(internal_id))?
            }
            (RefFlag::NotNullValue, None) => self.read_payload(internal_id)?,
            (RefFlag::Ref, None) => {
                return Err(Error::UnsupportedStream {
                    reason: "back-reference without a value",
                });
            }
        };

        check_field(field, &value)?;
        Ok(value)
    }

    fn read_frame(
        &mut self,
        read: impl FnOnce(&mut Self) -> Result<Value>,
    ) -> Result<Value> {
        self.depth += 1;
        if self.depth > self.config.max_depth() {
            return Err(depth_exceeded(&self.config));
        }

        let value = read(self)?;
        self.depth -= 1;

        self.refs.complete(&value);
        if value.is_object() {
            self.snapshot.record(&value);
        }

        Ok(value)
    }

    fn read_typed(&mut self) -> Result<Value> {
        let tag = self.buffer.read_var_u32()?;

        #[allow(clippy::cast_possible_truncation)]
        let internal_id = InternalTypeId::from_repr((tag & 0xFF) as u8)
            .ok_or(Error::UnknownTypeTag { tag })?;

        if internal_id.is_user_type() {
            let info = self.read_class_info(tag, internal_id)?;
            return info.serializer().read(self);
        }

        if tag >> 8 != 0 {
            return Err(Error::UnknownTypeTag { tag });
        }

        self.read_payload(internal_id)
    }

    fn read_class_info(
        &mut self,
        tag: u32,
        internal_id: InternalTypeId,
    ) -> Result<Arc<ClassInfo>> {
        let shared = internal_id.is_compatible_struct() || internal_id.is_named();

        if shared && self.meta.is_some() {
            return self.read_shared_class_info(tag, internal_id);
        }

        if internal_id.is_named() {
            let namespace = self.read_meta_string()?;
            let name = self.read_meta_string()?;
            let name = TypeName::new(&*namespace, &*name)?;

            return self.registry.class_info_by_name(&name, internal_id, None);
        }

        self.registry.class_info_by_id(tag)
    }

    fn read_shared_class_info(
        &mut self,
        tag: u32,
        internal_id: InternalTypeId,
    ) -> Result<Arc<ClassInfo>> {
        let index = self.buffer.read_var_u32()?;
        let Some(meta) = self.meta.as_deref_mut() else {
            return Err(Error::MissingMetaContext);
        };

        if let Some(info) = meta.read_info(index) {
            if info.tag() != tag {
                return Err(Error::mismatch(
                    format!("tag {:#x} of `{}`", info.tag(), info.type_name()),
                    format!("tag {tag:#x}"),
                ));
            }

            return Ok(Arc::clone(info));
        }

        let class_def = Arc::clone(meta.read_def(index).ok_or(
            Error::UnsupportedStream {
                reason: "class definition index out of range",
            },
        )?);

        let local = if internal_id.is_named() {
            self.registry.class_info_by_name(
                class_def.type_name(),
                internal_id,
                Some(&class_def),
            )?
        } else {
            self.registry.class_info_by_id(tag)?
        };

        let info = match local.type_def() {
            TypeDef::Struct(struct_type) if internal_id.is_compatible_struct() => {
                let serializer = MetaSharedSerializer::new(
                    Arc::clone(&class_def),
                    Arc::clone(struct_type),
                )?;
                Arc::new(local.with_serializer(Arc::new(serializer)))
            }
            _ => local,
        };

        if let Some(meta) = self.meta.as_deref_mut() {
            meta.set_read_info(index, Arc::clone(&info));
        }

        Ok(info)
    }

    fn read_payload(&mut self, internal_id: InternalTypeId) -> Result<Value> {
        let value = match internal_id {
            InternalTypeId::Bool => Value::Bool(self.buffer.read_bool()?),
            InternalTypeId::Int8 => Value::Int8(self.buffer.read_i8()?),
            InternalTypeId::Int16 => Value::Int16(self.buffer.read_i16()?),
            InternalTypeId::Int32 => Value::Int32(self.buffer.read_i32()?),
            InternalTypeId::VarInt32 => Value::Int32(self.buffer.read_var_i32()?),
            InternalTypeId::Int64 => Value::Int64(self.buffer.read_i64()?),
            InternalTypeId::VarInt64 => Value::Int64(self.buffer.read_var_i64()?),
            InternalTypeId::SliInt64 => Value::Int64(self.buffer.read_sli_i64()?),
            InternalTypeId::Float32 => Value::Float32(self.buffer.read_f32()?),
            InternalTypeId::Float64 => Value::Float64(self.buffer.read_f64()?),
            InternalTypeId::String => {
                Value::String(self.buffer.read_string()?.into())
            }
            InternalTypeId::Binary => {
                let len = self.buffer.read_length(1)?;
                Value::Binary(self.buffer.read_bytes(len)?.to_vec())
            }
            InternalTypeId::Timestamp => Value::Timestamp(self.buffer.read_i64()?),
            InternalTypeId::LocalDate => Value::Date(self.buffer.read_i32()?),
            InternalTypeId::BoolArray => Value::Array(PrimitiveArray::Bool(
                self.read_array(1, Buffer::read_bool)?,
            )),
            InternalTypeId::Int32Array => Value::Array(PrimitiveArray::Int32(
                self.read_array(4, Buffer::read_i32)?,
            )),
            InternalTypeId::Int64Array => Value::Array(PrimitiveArray::Int64(
                self.read_array(8, Buffer::read_i64)?,
            )),
            InternalTypeId::Float64Array => Value::Array(PrimitiveArray::Float64(
                self.read_array(8, Buffer::read_f64)?,
            )),
            InternalTypeId::List => Value::List(self.read_values()?),
            InternalTypeId::Set => Value::Set(self.read_values()?),
            InternalTypeId::Map => {
                let len = self.buffer.read_length(2)?;
                let mut entries = Vec::with_capacity(len);
                for _ in 0..len {
                    let key = self.read_value()?;
                    let value = self.read_value()?;
                    entries.push((key, value));
                }
                Value::Map(entries)
            }
            user => {
                return Err(Error::UnknownTypeTag { tag: u32::from(user.id()) });
            }
        };

        Ok(value)
    }

    fn read_values(&mut self) -> Result<Vec<Value>> {
        let len = self.buffer.read_length(1)?;
        let mut values = Vec::with_capacity(len);
        for _ in 0..len {
            values.push(self.read_value()?);
        }
        Ok(values)
    }

    fn read_array<T>(
        &mut self,
        item_size: usize,
        mut get: impl FnMut(&mut Buffer) -> std::result::Result<T, fory_buffer::Error>,
    ) -> Result<Vec<Option<T>>> {
        let len = self.buffer.read_length(0)?;
        let presence =
            self.buffer.read_bytes(bitmap::width_in_bytes(len))?.to_vec();

        // announced values must be readable before anything is allocated
        let present = len - bitmap::count_unset(&presence, len);
        self.buffer
            .slice(self.buffer.reader_index(), present.saturating_mul(item_size))?;

        let mut values = Vec::with_capacity(len);
        for index in 0..len {
            values.push(if bitmap::is_set(&presence, index) {
                Some(get(&mut *self.buffer)?)
            } else {
                None
            });
        }

        Ok(values)
    }
}
