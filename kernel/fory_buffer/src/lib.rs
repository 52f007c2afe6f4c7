//! Growable little-endian byte buffer with the variable-length integer
//! encodings used by the wire format.
//!
//! # Examples
//!
//! ```rust
//! use fory_buffer::{Buffer, LongEncoding};
//!
//! let mut buffer = Buffer::new();
//!
//! buffer.write_var_i32(-1);
//! buffer.write_i64_with(LongEncoding::Sli, 42);
//!
//! assert_eq!(buffer.read_var_i32().unwrap(), -1);
//! assert_eq!(buffer.read_i64_with(LongEncoding::Sli).unwrap(), 42);
//! ```
//!
//! # Integer Encodings
//!
//! - **Raw**: fixed 1/2/4/8 bytes, little-endian.
//! - **PVL** (progressive variable-length): 7 value bits per byte, the high
//!   bit tells whether more bytes follow. Signed values are zig-zag mapped
//!   first. 32-bit values take at most 5 bytes. 64-bit values take at most 9
//!   bytes, the 9th byte carries the remaining 8 bits verbatim.
//! - **SLI** (small long as int): values in `[-2^30, 2^30 - 1]` are written as
//!   the 4-byte integer `value << 1`; everything else is the marker byte `0x1`
//!   followed by the raw 8-byte value.

use paste::paste;

pub mod bitmap;


/// Errors raised while reading from or writing to a [`Buffer`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, thiserror::Error,
)]
#[allow(missing_docs)]
pub enum Error {
    /// The access would go past the readable region of the buffer.
    #[error(
        "attempted to access {len} bytes at offset {offset} but the readable \
         region ends at {limit}"
    )]
    OutOfBounds { offset: usize, len: usize, limit: usize },

    /// A variable-length integer used more bytes than its width allows.
    #[error("malformed variable-length integer at offset {offset}")]
    MalformedVarint { offset: usize },

    /// A length does not fit in the 32-bit length prefix.
    #[error("length {length} does not fit in a 32-bit length prefix")]
    LengthOverflow { length: usize },

    /// A string payload is not valid UTF-8.
    #[error("invalid UTF-8 string payload at offset {offset}")]
    InvalidUtf8 { offset: usize },
}

/// The encoding used for 64-bit integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LongEncoding {
    /// Small long as int: 4 bytes for values that fit in 31 bits, 9 bytes
    /// otherwise.
    #[default]
    Sli,

    /// Zig-zag progressive variable-length, 1 to 9 bytes.
    Pvl,

    /// Fixed 8 bytes.
    Raw,
}

/// Smallest value that SLI writes in the 4-byte form.
pub const SLI_HALF_MIN: i64 = -0x4000_0000;

/// Largest value that SLI writes in the 4-byte form.
pub const SLI_HALF_MAX: i64 = 0x3FFF_FFFF;

/// Marker byte of the 9-byte SLI form.
pub const SLI_BIG_FLAG: u8 = 0b1;

/// Capacity above which the buffer grows by 1.5x instead of doubling.
pub const GROWTH_THRESHOLD: usize = 64 * 1024 * 1024;

/// A growable byte region with independent writer and reader cursors.
///
/// The invariant `reader_index <= writer_index <= capacity` always holds.
/// Writes never fail: the buffer grows as needed. Reads fail with
/// [`Error::OutOfBounds`] instead of reading past `writer_index`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Buffer {
    data: Vec<u8>,
    writer_index: usize,
    reader_index: usize,
}

impl From<Vec<u8>> for Buffer {
    fn from(bytes: Vec<u8>) -> Self {
        let writer_index = bytes.len();
        Self { data: bytes, writer_index, reader_index: 0 }
    }
}

impl From<&[u8]> for Buffer {
    fn from(bytes: &[u8]) -> Self { Self::from(bytes.to_vec()) }
}

macro_rules! fixed_width {
    ($($ty:ident),*) => {
        paste! {
            impl Buffer {
                $(
                    #[doc = concat!(
                        "Appends a little-endian `", stringify!($ty), "`."
                    )]
                    pub fn [<write_ $ty>](&mut self, value: $ty) {
                        self.write_bytes(&value.to_le_bytes());
                    }

                    #[doc = concat!(
                        "Reads a little-endian `", stringify!($ty),
                        "` and advances the reader."
                    )]
                    ///
                    /// # Errors
                    ///
                    /// Fails with [`Error::OutOfBounds`] if the bytes are not readable.
                    pub fn [<read_ $ty>](&mut self) -> Result<$ty, Error> {
                        let value = self.[<get_ $ty>](self.reader_index)?;
                        self.reader_index += std::mem::size_of::<$ty>();
                        Ok(value)
                    }

                    #[doc = concat!(
                        "Overwrites a little-endian `", stringify!($ty),
                        "` at an absolute offset inside the written region."
                    )]
                    ///
                    /// # Errors
                    ///
                    /// Fails with [`Error::OutOfBounds`] outside the written region.
                    pub fn [<put_ $ty>](
                        &mut self,
                        offset: usize,
                        value: $ty,
                    ) -> Result<(), Error> {
                        self.slice_mut(offset, std::mem::size_of::<$ty>())?
                            .copy_from_slice(&value.to_le_bytes());
                        Ok(())
                    }

                    #[doc = concat!(
                        "Reads a little-endian `", stringify!($ty),
                        "` at an absolute offset without moving the reader."
                    )]
                    ///
                    /// # Errors
                    ///
                    /// Fails with [`Error::OutOfBounds`] if the bytes are not readable.
                    pub fn [<get_ $ty>](
                        &self,
                        offset: usize,
                    ) -> Result<$ty, Error> {
                        let mut bytes = [0; std::mem::size_of::<$ty>()];
                        bytes.copy_from_slice(
                            self.slice(offset, std::mem::size_of::<$ty>())?,
                        );
                        Ok($ty::from_le_bytes(bytes))
                    }
                )*
            }
        }
    };
}

fixed_width!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

impl Buffer {
    /// Creates an empty buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self { data: Vec::new(), writer_index: 0, reader_index: 0 }
    }

    /// Creates an empty buffer with at least `capacity` bytes preallocated.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { data: vec![0; capacity], writer_index: 0, reader_index: 0 }
    }

    /// The number of bytes the buffer can hold before growing.
    #[must_use]
    pub fn capacity(&self) -> usize { self.data.len() }

    /// The position of the next write.
    #[must_use]
    pub const fn writer_index(&self) -> usize { self.writer_index }

    /// The position of the next read.
    #[must_use]
    pub const fn reader_index(&self) -> usize { self.reader_index }

    /// The number of written bytes not yet read.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.writer_index - self.reader_index
    }

    /// Moves the reader to an absolute position inside the written region.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::OutOfBounds`] if `index` is past the writer.
    pub fn set_reader_index(&mut self, index: usize) -> Result<(), Error> {
        if index > self.writer_index {
            return Err(Error::OutOfBounds {
                offset: index,
                len: 0,
                limit: self.writer_index,
            });
        }

        self.reader_index = index;
        Ok(())
    }

    /// Advances the reader by `len` bytes.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::OutOfBounds`] if the bytes are not readable.
    pub fn skip(&mut self, len: usize) -> Result<(), Error> {
        self.check_readable(self.reader_index, len)?;
        self.reader_index += len;
        Ok(())
    }

    /// Drops all content and rewinds both cursors. The allocation is kept.
    pub fn clear(&mut self) {
        self.writer_index = 0;
        self.reader_index = 0;
    }

    /// Discards everything written after `writer_index`. Larger values are
    /// ignored.
    pub fn truncate(&mut self, writer_index: usize) {
        self.writer_index = self.writer_index.min(writer_index);
        self.reader_index = self.reader_index.min(self.writer_index);
    }

    /// The written region.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] { &self.data[..self.writer_index] }

    /// Consumes the buffer and returns the written region.
    #[must_use]
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.data.truncate(self.writer_index);
        self.data
    }

    /// Makes room for `additional` more bytes after the writer.
    ///
    /// Growth doubles the required size until [`GROWTH_THRESHOLD`], then
    /// grows by half of the required size.
    pub fn reserve(&mut self, additional: usize) {
        let required = self.writer_index + additional;
        if required <= self.data.len() {
            return;
        }

        let new_capacity = if required < GROWTH_THRESHOLD {
            required * 2
        } else {
            required + required / 2
        };

        self.data.resize(new_capacity, 0);
    }

    /// Appends raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.reserve(bytes.len());
        self.data[self.writer_index..self.writer_index + bytes.len()]
            .copy_from_slice(bytes);
        self.writer_index += bytes.len();
    }

    /// Appends `len` zero bytes and returns the offset of the first one.
    pub fn write_zeros(&mut self, len: usize) -> usize {
        let offset = self.writer_index;
        self.reserve(len);
        self.data[offset..offset + len].fill(0);
        self.writer_index += len;
        offset
    }

    /// Reads `len` raw bytes and advances the reader.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::OutOfBounds`] if the bytes are not readable.
    pub fn read_bytes(&mut self, len: usize) -> Result<&[u8], Error> {
        let start = self.reader_index;
        self.check_readable(start, len)?;
        self.reader_index += len;
        Ok(&self.data[start..start + len])
    }

    /// Borrows `len` written bytes at an absolute offset.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::OutOfBounds`] if the bytes are not readable.
    pub fn slice(&self, offset: usize, len: usize) -> Result<&[u8], Error> {
        self.check_readable(offset, len)?;
        Ok(&self.data[offset..offset + len])
    }

    /// Mutably borrows `len` written bytes at an absolute offset.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::OutOfBounds`] if the bytes are not readable.
    pub fn slice_mut(
        &mut self,
        offset: usize,
        len: usize,
    ) -> Result<&mut [u8], Error> {
        self.check_readable(offset, len)?;
        Ok(&mut self.data[offset..offset + len])
    }

    /// Appends a boolean as a single byte.
    pub fn write_bool(&mut self, value: bool) { self.write_u8(u8::from(value)) }

    /// Reads a boolean written by [`Self::write_bool`].
    ///
    /// # Errors
    ///
    /// Fails with [`Error::OutOfBounds`] if the bytes are not readable.
    pub fn read_bool(&mut self) -> Result<bool, Error> {
        Ok(self.read_u8()? != 0)
    }

    /// Appends an unsigned PVL integer of at most 5 bytes.
    pub fn write_var_u32(&mut self, mut value: u32) {
        let mut bytes = [0u8; 5];
        let mut len = 0;

        loop {
            #[allow(clippy::cast_possible_truncation)]
            let byte = (value & 0x7F) as u8;
            value >>= 7;

            if value == 0 {
                bytes[len] = byte;
                len += 1;
                break;
            }

            bytes[len] = byte | 0x80;
            len += 1;
        }

        self.write_bytes(&bytes[..len]);
    }

    /// Appends a zig-zag PVL integer of at most 5 bytes.
    #[allow(clippy::cast_sign_loss)]
    pub fn write_var_i32(&mut self, value: i32) {
        self.write_var_u32(((value << 1) ^ (value >> 31)) as u32);
    }

    /// Appends an unsigned PVL integer of at most 9 bytes.
    pub fn write_var_u64(&mut self, mut value: u64) {
        let mut bytes = [0u8; 9];

        for (index, slot) in bytes.iter_mut().enumerate().take(8) {
            #[allow(clippy::cast_possible_truncation)]
            let byte = (value & 0x7F) as u8;
            value >>= 7;

            if value == 0 {
                *slot = byte;
                self.write_bytes(&bytes[..=index]);
                return;
            }

            *slot = byte | 0x80;
        }

        #[allow(clippy::cast_possible_truncation)]
        {
            bytes[8] = value as u8;
        }
        self.write_bytes(&bytes);
    }

    /// Appends a zig-zag PVL integer of at most 9 bytes.
    #[allow(clippy::cast_sign_loss)]
    pub fn write_var_i64(&mut self, value: i64) {
        self.write_var_u64(((value << 1) ^ (value >> 63)) as u64);
    }

    /// Reads an unsigned PVL integer of at most 5 bytes.
    ///
    /// # Errors
    ///
    /// Fails on truncated input or an overlong encoding.
    pub fn read_var_u32(&mut self) -> Result<u32, Error> {
        let start = self.reader_index;
        let mut result = 0u32;

        for shift in (0..35).step_by(7) {
            let byte = self.read_u8().inspect_err(|_| {
                self.reader_index = start;
            })?;

            if shift == 28 && byte > 0x0F {
                self.reader_index = start;
                return Err(Error::MalformedVarint { offset: start });
            }

            result |= u32::from(byte & 0x7F) << shift;

            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }

        self.reader_index = start;
        Err(Error::MalformedVarint { offset: start })
    }

    #[allow(clippy::cast_possible_wrap)]
    /// Reads a zig-zag PVL integer of at most 5 bytes.
    ///
    /// # Errors
    ///
    /// Fails on truncated input or an overlong encoding.
    pub fn read_var_i32(&mut self) -> Result<i32, Error> {
        let value = self.read_var_u32()?;
        Ok((value >> 1) as i32 ^ -((value & 1) as i32))
    }

    /// Reads an unsigned PVL integer of at most 9 bytes.
    ///
    /// # Errors
    ///
    /// Fails on truncated input or an overlong encoding.
    pub fn read_var_u64(&mut self) -> Result<u64, Error> {
        let start = self.reader_index;
        let mut result = 0u64;

        for shift in (0..56).step_by(7) {
            let byte = self.read_u8().inspect_err(|_| {
                self.reader_index = start;
            })?;

            result |= u64::from(byte & 0x7F) << shift;

            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }

        let last = self.read_u8().inspect_err(|_| {
            self.reader_index = start;
        })?;

        Ok(result | (u64::from(last) << 56))
    }

    #[allow(clippy::cast_possible_wrap)]
    /// Reads a zig-zag PVL integer of at most 9 bytes.
    ///
    /// # Errors
    ///
    /// Fails on truncated input or an overlong encoding.
    pub fn read_var_i64(&mut self) -> Result<i64, Error> {
        let value = self.read_var_u64()?;
        Ok((value >> 1) as i64 ^ -((value & 1) as i64))
    }

    /// Appends a 64-bit integer in the SLI encoding.
    pub fn write_sli_i64(&mut self, value: i64) {
        if (SLI_HALF_MIN..=SLI_HALF_MAX).contains(&value) {
            #[allow(clippy::cast_possible_truncation)]
            self.write_i32((value as i32) << 1);
        } else {
            self.write_u8(SLI_BIG_FLAG);
            self.write_i64(value);
        }
    }

    /// Reads a 64-bit integer in the SLI encoding.
    ///
    /// # Errors
    ///
    /// Fails on truncated input or an overlong encoding.
    pub fn read_sli_i64(&mut self) -> Result<i64, Error> {
        let first = self.get_u8(self.reader_index)?;

        if first & SLI_BIG_FLAG == 0 {
            Ok(i64::from(self.read_i32()? >> 1))
        } else {
            let start = self.reader_index;
            self.reader_index += 1;
            self.read_i64().inspect_err(|_| self.reader_index = start)
        }
    }

    /// Appends a 64-bit integer using the selected encoding.
    pub fn write_i64_with(&mut self, encoding: LongEncoding, value: i64) {
        match encoding {
            LongEncoding::Sli => self.write_sli_i64(value),
            LongEncoding::Pvl => self.write_var_i64(value),
            LongEncoding::Raw => self.write_i64(value),
        }
    }

    /// Reads a 64-bit integer written with the selected encoding.
    ///
    /// # Errors
    ///
    /// Fails on truncated input or an overlong encoding.
    pub fn read_i64_with(
        &mut self,
        encoding: LongEncoding,
    ) -> Result<i64, Error> {
        match encoding {
            LongEncoding::Sli => self.read_sli_i64(),
            LongEncoding::Pvl => self.read_var_i64(),
            LongEncoding::Raw => self.read_i64(),
        }
    }

    /// Appends a 32-bit integer as zig-zag PVL when `compressed`, raw
    /// otherwise.
    pub fn write_i32_with(&mut self, compressed: bool, value: i32) {
        if compressed {
            self.write_var_i32(value);
        } else {
            self.write_i32(value);
        }
    }

    /// Reads a 32-bit integer written by [`Self::write_i32_with`].
    ///
    /// # Errors
    ///
    /// Fails on truncated input or an overlong encoding.
    pub fn read_i32_with(&mut self, compressed: bool) -> Result<i32, Error> {
        if compressed {
            self.read_var_i32()
        } else {
            self.read_i32()
        }
    }

    /// Appends a collection length as an unsigned PVL integer.
    ///
    /// Fails with [`Error::LengthOverflow`] before writing anything if the
    /// length does not fit in 32 bits.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::LengthOverflow`] if the length needs more than 32 bits.
    pub fn write_length(&mut self, length: usize) -> Result<(), Error> {
        let length =
            u32::try_from(length).map_err(|_| Error::LengthOverflow { length })?;
        self.write_var_u32(length);
        Ok(())
    }

    /// Reads a collection length and checks that at least `min_item_size`
    /// bytes per item remain readable.
    ///
    /// # Errors
    ///
    /// Fails if the length is malformed or more items are announced than
    /// `min_item_size` bytes each could fit in the remaining input.
    pub fn read_length(&mut self, min_item_size: usize) -> Result<usize, Error> {
        let offset = self.reader_index;
        let length = self.read_var_u32()? as usize;

        if length.saturating_mul(min_item_size) > self.remaining() {
            return Err(Error::OutOfBounds {
                offset,
                len: length.saturating_mul(min_item_size),
                limit: self.writer_index,
            });
        }

        Ok(length)
    }

    /// Appends a length-prefixed UTF-8 string.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::LengthOverflow`] if the length needs more than 32 bits.
    pub fn write_str(&mut self, value: &str) -> Result<(), Error> {
        self.write_length(value.len())?;
        self.write_bytes(value.as_bytes());
        Ok(())
    }

    /// Reads a length-prefixed UTF-8 string.
    ///
    /// # Errors
    ///
    /// Fails on truncated input or invalid UTF-8.
    pub fn read_string(&mut self) -> Result<String, Error> {
        let length = self.read_length(1)?;
        let offset = self.reader_index;
        let bytes = self.read_bytes(length)?;

        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| Error::InvalidUtf8 { offset })
    }

    fn check_readable(&self, offset: usize, len: usize) -> Result<(), Error> {
        match offset.checked_add(len) {
            Some(end) if end <= self.writer_index => Ok(()),
            _ => Err(Error::OutOfBounds {
                offset,
                len,
                limit: self.writer_index,
            }),
        }
    }
}
