//! Per-stream deduplication of namespaces, type names and enum variant names.
//!
//! Strings are packed with the most compact [`Encoding`] that represents
//! them. The first occurrence of a string in a stream is written as
//! `varuint(len << 1)` of the packed length, then either the encoding tag
//! byte or, for packed strings longer than [`SMALL_STRING_THRESHOLD`], an
//! 8-byte hash whose low byte is the encoding tag, then the packed bytes. It
//! receives the next stream-local id. Every later occurrence is
//! `varuint(id << 1 | 1)`.

use std::{collections::HashMap, sync::Arc};

use fory_buffer::Buffer;

use crate::{hash::hash64, Error};

pub mod encoding;

pub use encoding::{Encoding, MetaString};

/// Seed of the meta string hash.
pub const META_STRING_SEED: u64 = 47;

/// Packed strings up to this many bytes carry a tag byte instead of a hash.
pub const SMALL_STRING_THRESHOLD: usize = 16;

/// Bound on the writer's and reader's cross-stream caches.
pub const MAX_CACHED_META_STRINGS: usize = 4096;

/// The hash written ahead of a long packed string.
fn tagged_hash(meta_string: &MetaString) -> i64 {
    (hash64(meta_string.bytes(), META_STRING_SEED) & !0xFF)
        | i64::from(meta_string.encoding().tag())
}

/// Write-side state: stream-local ids plus a cache of packed strings that
/// survives across streams.
#[derive(Debug, Default)]
pub struct MetaStringWriter {
    ids: HashMap<String, u32>,
    packed: HashMap<String, Arc<MetaString>>,
}

impl MetaStringWriter {
    /// Writes `value`, as a back-reference if it already occurred.
    ///
    /// # Errors
    ///
    /// Fails if the string is too long for its length prefix.
    pub fn write(&mut self, buffer: &mut Buffer, value: &str) -> Result<(), Error> {
        if let Some(id) = self.ids.get(value) {
            buffer.write_var_u32(id << 1 | 1);
            return Ok(());
        }

        let meta_string = self.pack(value);
        let bytes = meta_string.bytes();

        let length = u32::try_from(bytes.len())
            .ok()
            .filter(|length| *length <= u32::MAX >> 1)
            .ok_or(fory_buffer::Error::LengthOverflow { length: bytes.len() })?;

        buffer.write_var_u32(length << 1);
        if bytes.len() > SMALL_STRING_THRESHOLD {
            buffer.write_i64(tagged_hash(&meta_string));
        } else {
            buffer.write_u8(meta_string.encoding().tag());
        }
        buffer.write_bytes(bytes);

        #[allow(clippy::cast_possible_truncation)]
        let id = self.ids.len() as u32;
        self.ids.insert(value.to_owned(), id);

        Ok(())
    }

    fn pack(&mut self, value: &str) -> Arc<MetaString> {
        if let Some(packed) = self.packed.get(value) {
            return Arc::clone(packed);
        }

        let packed = Arc::new(MetaString::encode(value));

        if self.packed.len() >= MAX_CACHED_META_STRINGS {
            self.packed.clear();
        }
        self.packed.insert(value.to_owned(), Arc::clone(&packed));

        packed
    }

    /// Forgets every id handed out in the current stream. Packed strings are
    /// kept.
    pub fn reset(&mut self) { self.ids.clear(); }
}

#[derive(Debug)]
struct CachedString {
    bytes: Box<[u8]>,
    value: Arc<str>,
}

/// Read-side state: stream-local ids plus a cache of decoded long strings
/// keyed by hash that survives across streams.
#[derive(Debug, Default)]
pub struct MetaStringReader {
    dynamic: Vec<Arc<str>>,
    cache: HashMap<i64, CachedString>,
}

impl MetaStringReader {
    /// Reads one meta string.
    ///
    /// # Errors
    ///
    /// Fails on truncated input, an unknown encoding, bytes invalid for their
    /// encoding, or a back-reference to an id not yet defined in this stream.
    pub fn read(&mut self, buffer: &mut Buffer) -> Result<Arc<str>, Error> {
        let header = buffer.read_var_u32()?;

        if header & 1 == 1 {
            let id = header >> 1;
            return self
                .dynamic
                .get(id as usize)
                .cloned()
                .ok_or(Error::UnknownMetaString { id });
        }

        let length = (header >> 1) as usize;
        let (tag, hash) = if length > SMALL_STRING_THRESHOLD {
            let hash = buffer.read_i64()?;
            (hash.to_le_bytes()[0], Some(hash))
        } else {
            (buffer.read_u8()?, None)
        };

        let encoding = Encoding::from_repr(tag)
            .ok_or(Error::UnknownMetaStringEncoding { tag })?;
        let bytes = buffer.read_bytes(length)?;

        let cached = hash
            .and_then(|hash| self.cache.get(&hash))
            .filter(|cached| *cached.bytes == *bytes)
            .map(|cached| Arc::clone(&cached.value));

        if let Some(value) = cached {
            self.dynamic.push(Arc::clone(&value));
            return Ok(value);
        }

        let value: Arc<str> = encoding.decode(bytes)?.into();

        if let Some(hash) = hash {
            if self.cache.len() >= MAX_CACHED_META_STRINGS {
                self.cache.clear();
            }
            self.cache.insert(hash, CachedString {
                bytes: bytes.into(),
                value: Arc::clone(&value),
            });
        }

        self.dynamic.push(Arc::clone(&value));
        Ok(value)
    }

    /// Forgets every id seen in the current stream. The decode cache is kept.
    pub fn reset(&mut self) { self.dynamic.clear(); }
}
