//! The serialization engine.
//!
//! # Stream Format
//!
//! ```text
//! u8       header flags      see [`HeaderFlags`]
//! u8       language          [`LANGUAGE_RUST`] for streams written here
//! [i32     trailer offset]   only with meta sharing; relative to the end of
//!                            this slot, -1 when no definition follows
//! value                      the root, framed as in [`crate::context`]
//! [varuint count, ClassDef*] only with meta sharing and new definitions
//! ```
//!
//! A null root is written as the flags byte alone.

use std::sync::Arc;

use fory_buffer::Buffer;
use fory_meta::{
    meta_string::{MetaStringReader, MetaStringWriter},
    types::TypeName,
};

use crate::{
    config::{Config, MetaShareMode},
    context::{ReadContext, SnapshotRecorder, WriteContext},
    error::{Error, Result},
    meta_context::MetaContext,
    ref_resolver::{RefResolver, Resolver},
    registry::{TypeDef, TypeLoader, TypeRegistry},
    security::TypeChecker,
    serializer::Serializer,
    value::Value,
};

/// The language id of streams written by this crate.
pub const LANGUAGE_RUST: u8 = 6;

bitflags::bitflags! {
    /// The first byte of every stream.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HeaderFlags: u8 {
        /// The root is null and nothing follows.
        const NIL = 1;

        /// Fixed-width values are little-endian.
        const LITTLE_ENDIAN = 2;

        /// The stream uses the cross-language type system.
        const CROSS_LANGUAGE = 4;
    }
}

/// A serialization engine: configuration, type registry and the per-call
/// state reused between calls.
///
/// An engine serves one call at a time. Use a
/// [`ForyPool`](crate::pool::ForyPool) to share engines between threads.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
///
/// use fory_core::{config::Config, value::Value, Fory};
/// use fory_meta::types::{FieldDef, FieldType, StructType, TypeName};
///
/// let point = Arc::new(
///     StructType::new(TypeName::parse("demo.Point").unwrap(), vec![
///         FieldDef::new("x", FieldType::Int32),
///         FieldDef::new("y", FieldType::Int32),
///     ])
///     .unwrap(),
/// );
///
/// let mut fory = Fory::new(Config::default());
/// fory.register_by_id(Arc::clone(&point), 1).unwrap();
///
/// let value = Value::object(&point, vec![Value::Int32(3), Value::Int32(-4)])
///     .unwrap();
/// let bytes = fory.serialize(&value).unwrap();
///
/// assert_eq!(fory.deserialize(&bytes).unwrap(), value);
/// ```
#[derive(Debug)]
pub struct Fory {
    config: Arc<Config>,
    registry: TypeRegistry,
    refs: Resolver,
    meta_string_writer: MetaStringWriter,
    meta_string_reader: MetaStringReader,
    scoped_meta: MetaContext,
    scratch: Buffer,
}

impl Default for Fory {
    fn default() -> Self { Self::new(Config::default()) }
}

impl Fory {
    /// An engine with an empty registry.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        Self {
            registry: TypeRegistry::new(Arc::clone(&config)),
            refs: Resolver::new(config.ref_tracking()),
            meta_string_writer: MetaStringWriter::default(),
            meta_string_reader: MetaStringReader::default(),
            scoped_meta: MetaContext::new(),
            scratch: Buffer::new(),
            config,
        }
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &Config { &self.config }

    /// The type registry.
    #[must_use]
    pub const fn registry(&self) -> &TypeRegistry { &self.registry }

    /// The type registry, for registration.
    pub fn registry_mut(&mut self) -> &mut TypeRegistry { &mut self.registry }

    /// See [`TypeRegistry::register`].
    ///
    /// # Errors
    ///
    /// See [`TypeRegistry::register`].
    pub fn register(&mut self, type_def: impl Into<TypeDef>) -> Result<u32> {
        self.registry.register(type_def)
    }

    /// See [`TypeRegistry::register_by_id`].
    ///
    /// # Errors
    ///
    /// See [`TypeRegistry::register_by_id`].
    pub fn register_by_id(
        &mut self,
        type_def: impl Into<TypeDef>,
        id: u32,
    ) -> Result<()> {
        self.registry.register_by_id(type_def, id)
    }

    /// See [`TypeRegistry::register_by_name`].
    ///
    /// # Errors
    ///
    /// See [`TypeRegistry::register_by_name`].
    pub fn register_by_name(&mut self, type_def: impl Into<TypeDef>) -> Result<()> {
        self.registry.register_by_name(type_def)
    }

    /// See [`TypeRegistry::register_serializer`].
    ///
    /// # Errors
    ///
    /// See [`TypeRegistry::register_serializer`].
    pub fn register_serializer(
        &mut self,
        name: &TypeName,
        serializer: Arc<dyn Serializer>,
    ) -> Result<()> {
        self.registry.register_serializer(name, serializer)
    }

    /// Installs the checker consulted for unregistered types.
    pub fn set_type_checker(&mut self, checker: Arc<dyn TypeChecker>) {
        self.registry.set_type_checker(checker);
    }

    /// Installs the loader resolving unknown type names on read.
    pub fn set_type_loader(&mut self, loader: Arc<dyn TypeLoader>) {
        self.registry.set_type_loader(loader);
    }

    /// Serializes `value` into a new byte vector.
    ///
    /// # Errors
    ///
    /// Fails if a type is rejected, a value does not fit its declaration, or
    /// full meta sharing is configured (use
    /// [`Self::serialize_with_session`]).
    pub fn serialize(&mut self, value: &Value) -> Result<Vec<u8>> {
        let mut buffer = std::mem::take(&mut self.scratch);
        buffer.clear();

        let result = self
            .serialize_to(&mut buffer, value)
            .map(|()| buffer.as_slice().to_vec());

        self.scratch = buffer;
        result
    }

    /// Appends the serialization of `value` to `buffer`. On failure the
    /// buffer is left as it was.
    ///
    /// # Errors
    ///
    /// See [`Self::serialize`].
    pub fn serialize_to(&mut self, buffer: &mut Buffer, value: &Value) -> Result<()> {
        self.with_meta(None, |fory, meta| fory.write_stream(buffer, value, meta))
    }

    /// Serializes `value` on the channel described by `session`. With full
    /// meta sharing, each class definition is sent once per session.
    ///
    /// # Errors
    ///
    /// See [`Self::serialize`].
    pub fn serialize_with_session(
        &mut self,
        value: &Value,
        session: &mut MetaContext,
    ) -> Result<Vec<u8>> {
        let mut buffer = Buffer::new();
        self.with_meta(Some(session), |fory, meta| {
            fory.write_stream(&mut buffer, value, meta)
        })?;

        Ok(buffer.into_bytes())
    }

    /// Deserializes a stream.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::ReadFailed`] wrapping the cause, together with a
    /// snapshot of the objects reconstructed before the failure.
    pub fn deserialize(&mut self, bytes: &[u8]) -> Result<Value> {
        self.deserialize_from(&mut Buffer::from(bytes))
    }

    /// Deserializes the stream at the reader of `buffer` and leaves the
    /// reader after it.
    ///
    /// # Errors
    ///
    /// See [`Self::deserialize`].
    pub fn deserialize_from(&mut self, buffer: &mut Buffer) -> Result<Value> {
        self.with_meta(None, |fory, meta| fory.read_stream(buffer, meta))
    }

    /// Deserializes a stream received on the channel described by
    /// `session`.
    ///
    /// # Errors
    ///
    /// See [`Self::deserialize`].
    pub fn deserialize_with_session(
        &mut self,
        bytes: &[u8],
        session: &mut MetaContext,
    ) -> Result<Value> {
        let mut buffer = Buffer::from(bytes);
        self.with_meta(Some(session), |fory, meta| fory.read_stream(&mut buffer, meta))
    }

    /// Forgets all per-call state. The registry is kept.
    pub fn reset(&mut self) {
        self.refs.reset();
        self.meta_string_writer.reset();
        self.meta_string_reader.reset();
        self.scoped_meta.reset();
        self.scratch.clear();
    }

    // picks the meta context for one call from the sharing mode
    fn with_meta<R>(
        &mut self,
        session: Option<&mut MetaContext>,
        call: impl FnOnce(&mut Self, Option<&mut MetaContext>) -> Result<R>,
    ) -> Result<R> {
        if !self.config.meta_share_active() {
            return call(self, None);
        }

        match (self.config.meta_share(), session) {
            (MetaShareMode::Full, Some(session)) => call(self, Some(session)),
            (MetaShareMode::Full, None) => Err(Error::MissingMetaContext),
            (_, Some(session)) => {
                session.reset();
                let result = call(self, Some(&mut *session));
                session.reset();
                result
            }
            (_, None) => {
                let mut meta = std::mem::take(&mut self.scoped_meta);
                meta.reset();
                let result = call(self, Some(&mut meta));
                meta.reset();
                self.scoped_meta = meta;
                result
            }
        }
    }

    fn write_stream(
        &mut self,
        buffer: &mut Buffer,
        value: &Value,
        mut meta: Option<&mut MetaContext>,
    ) -> Result<()> {
        let start = buffer.writer_index();
        let checkpoint = meta.as_deref().map(MetaContext::checkpoint);

        let result = self.write_body(buffer, value, meta.as_deref_mut());

        self.refs.reset_write();
        self.meta_string_writer.reset();

        if let Err(error) = &result {
            if let (Some(meta), Some(checkpoint)) = (meta, checkpoint) {
                meta.rollback(checkpoint);
            }
            buffer.truncate(start);

            log::debug!("serialization failed: {error}");
        }

        result
    }

    fn write_body(
        &mut self,
        buffer: &mut Buffer,
        value: &Value,
        mut meta: Option<&mut MetaContext>,
    ) -> Result<()> {
        let flags = HeaderFlags::LITTLE_ENDIAN | HeaderFlags::CROSS_LANGUAGE;

        if value.is_null() {
            buffer.write_u8((flags | HeaderFlags::NIL).bits());
            return Ok(());
        }

        buffer.write_u8(flags.bits());
        buffer.write_u8(LANGUAGE_RUST);

        let slot = meta.is_some().then(|| buffer.write_zeros(4));

        WriteContext::new(
            buffer,
            &mut self.registry,
            &mut self.refs,
            &mut self.meta_string_writer,
            meta.as_deref_mut(),
            Arc::clone(&self.config),
        )
        .write_value(value)?;

        let (Some(slot), Some(meta)) = (slot, meta) else {
            return Ok(());
        };

        let pending = meta.take_pending();
        if pending.is_empty() {
            buffer.put_i32(slot, -1)?;
            return Ok(());
        }

        let offset = buffer.writer_index() - (slot + 4);
        let offset = i32::try_from(offset)
            .map_err(|_| fory_buffer::Error::LengthOverflow { length: offset })?;
        buffer.put_i32(slot, offset)?;

        buffer.write_length(pending.len())?;
        for class_def in &pending {
            class_def.write(buffer);
        }

        log::debug!("appended {} class definitions", pending.len());
        Ok(())
    }

    fn read_stream(
        &mut self,
        buffer: &mut Buffer,
        mut meta: Option<&mut MetaContext>,
    ) -> Result<Value> {
        let checkpoint = meta.as_deref().map(MetaContext::checkpoint);
        let mut recorder = SnapshotRecorder::new(
            self.config.snapshot(),
            self.config.snapshot_limit(),
        );

        let result = self.read_body(buffer, meta.as_deref_mut(), &mut recorder);

        self.refs.reset_read();
        self.meta_string_reader.reset();

        result.map_err(|error| {
            if let (Some(meta), Some(checkpoint)) = (meta, checkpoint) {
                meta.rollback(checkpoint);
            }

            log::debug!("deserialization failed: {error}");
            Error::ReadFailed { source: Box::new(error), snapshot: recorder.take() }
        })
    }

    fn read_body(
        &mut self,
        buffer: &mut Buffer,
        mut meta: Option<&mut MetaContext>,
        recorder: &mut SnapshotRecorder,
    ) -> Result<Value> {
        let flags = HeaderFlags::from_bits_retain(buffer.read_u8()?);

        if flags.contains(HeaderFlags::NIL) {
            return Ok(Value::Null);
        }

        if !flags.contains(HeaderFlags::LITTLE_ENDIAN) {
            return Err(Error::UnsupportedStream {
                reason: "big-endian streams are not supported",
            });
        }

        let language = buffer.read_u8()?;
        if language != LANGUAGE_RUST {
            log::trace!("reading a stream written by language {language}");
        }

        let trailer_end = meta
            .as_deref_mut()
            .map(|meta| self.read_trailer(buffer, meta))
            .transpose()?
            .flatten();

        let value = ReadContext::new(
            buffer,
            &mut self.registry,
            &mut self.refs,
            &mut self.meta_string_reader,
            meta,
            recorder,
            Arc::clone(&self.config),
        )
        .read_value()?;

        if let Some(end) = trailer_end {
            buffer.set_reader_index(end)?;
        }

        Ok(value)
    }

    // loads the class definitions appended after the root and returns where
    // they end
    fn read_trailer(
        &mut self,
        buffer: &mut Buffer,
        meta: &mut MetaContext,
    ) -> Result<Option<usize>> {
        let offset = buffer.read_i32()?;
        if offset == -1 {
            return Ok(None);
        }

        let Ok(offset) = usize::try_from(offset) else {
            return Err(Error::UnsupportedStream {
                reason: "negative class definition offset",
            });
        };

        let resume = buffer.reader_index();
        buffer.set_reader_index(resume + offset)?;

        let count = buffer.read_length(9)?;
        for _ in 0..count {
            meta.push_read_def(self.registry.read_class_def(buffer)?);
        }

        let end = buffer.reader_index();
        buffer.set_reader_index(resume)?;

        log::trace!("loaded {count} class definitions");
        Ok(Some(end))
    }
}
