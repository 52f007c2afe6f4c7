//! Identity tracking of values already written or read in one call.
//!
//! Every referenceable value is preceded by one [`RefFlag`] byte. On the
//! write side the resolver remembers the address of each tracked value and
//! replaces repeats with [`RefFlag::Ref`] plus the id assigned on first
//! occurrence. On the read side it keeps the reconstructed values by id.
//!
//! Reads reserve the id of a new value *before* decoding its payload, and a
//! struct registers its empty shell through [`RefResolver::reference`] before
//! reading its fields, so a field pointing back at the enclosing object
//! resolves to the shell.
//!
//! With tracking disabled ([`NoRefResolver`]) a circular graph recurses until
//! the depth guard fails the call.

use std::collections::HashMap;

use enum_dispatch::enum_dispatch;
use fory_buffer::Buffer;

use crate::{
    error::{Error, Result},
    value::Value,
};


/// The byte preceding every referenceable value.
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
)]
#[repr(i8)]
pub enum RefFlag {
    /// The value is null; nothing follows.
    Null = -3,

    /// A varuint id of a value seen earlier follows.
    Ref = -2,

    /// A new value follows that is not tracked.
    NotNullValue = -1,

    /// A new tracked value follows; it takes the next id.
    RefValue = 0,
}

impl RefFlag {
    /// Appends the flag.
    pub fn write(self, buffer: &mut Buffer) { buffer.write_i8(self as i8); }

    /// Reads a flag.
    ///
    /// # Errors
    ///
    /// Fails on exhausted input or a byte that is no flag.
    pub fn read(buffer: &mut Buffer) -> Result<Self> {
        let byte = buffer.read_i8()?;

        Self::from_repr(byte)
            .ok_or(Error::UnsupportedStream { reason: "invalid reference flag" })
    }
}

/// The reference tracking protocol.
#[enum_dispatch]
pub trait RefResolver {
    /// Writes the flag for `value`. Returns `true` if the value is fully
    /// written (null or a back-reference) and `false` if the caller must
    /// write its payload.
    fn write_ref_or_null(&mut self, buffer: &mut Buffer, value: &Value) -> bool;

    /// Reads a flag. For [`RefFlag::Ref`] the id is consumed as well and the
    /// referenced value is returned alongside.
    ///
    /// # Errors
    ///
    /// Fails on exhausted input, an unknown flag, or an id naming no value
    /// read so far.
    fn read_ref_or_null(
        &mut self,
        buffer: &mut Buffer,
    ) -> Result<(RefFlag, Option<Value>)>;

    /// Reserves the next read id and opens a read frame for it.
    fn preserve_ref_id(&mut self) -> u32;

    /// Opens a read frame for an untracked value.
    fn push_untracked(&mut self);

    /// Binds `value` to the id of the innermost open frame, if it has one
    /// that is still unbound.
    fn reference(&mut self, value: &Value);

    /// Closes the innermost frame, binding `value` to its id unless
    /// [`Self::reference`] already did.
    fn complete(&mut self, value: &Value);

    /// Binds `value` to `id`.
    fn set_read_object(&mut self, id: u32, value: Value);

    /// The value read with `id`.
    fn get_read_object(&self, id: u32) -> Option<Value>;

    /// Swaps every occurrence of `original` for `replacement`, keeping the
    /// ids already handed out.
    fn replace_ref(&mut self, original: &Value, replacement: &Value);

    /// Values bound so far in this call, in id order.
    fn read_objects(&self) -> Vec<Value>;

    /// Forgets the write side.
    fn reset_write(&mut self);

    /// Forgets the read side.
    fn reset_read(&mut self);

    /// Forgets everything.
    fn reset(&mut self) {
        self.reset_write();
        self.reset_read();
    }
}

/// A resolver that tracks identities.
#[derive(Debug, Default)]
pub struct MapRefResolver {
    written: HashMap<usize, u32>,
    next_write_id: u32,

    // keeps written addresses from being reused within the call
    keepalive: Vec<Value>,

    read_objects: Vec<Option<Value>>,
    frames: Vec<Option<u32>>,
}

impl RefResolver for MapRefResolver {
    fn write_ref_or_null(&mut self, buffer: &mut Buffer, value: &Value) -> bool {
        if value.is_null() {
            RefFlag::Null.write(buffer);
            return true;
        }

        if let Some(address) = value.identity() {
            if let Some(id) = self.written.get(&address) {
                RefFlag::Ref.write(buffer);
                buffer.write_var_u32(*id);
                return true;
            }

            self.written.insert(address, self.next_write_id);
            self.keepalive.push(value.clone());
        }

        self.next_write_id += 1;
        RefFlag::RefValue.write(buffer);
        false
    }

    fn read_ref_or_null(
        &mut self,
        buffer: &mut Buffer,
    ) -> Result<(RefFlag, Option<Value>)> {
        let flag = RefFlag::read(buffer)?;

        if flag != RefFlag::Ref {
            return Ok((flag, None));
        }

        let id = buffer.read_var_u32()?;
        let value = self.get_read_object(id).ok_or(Error::InvalidRefId { id })?;

        Ok((flag, Some(value)))
    }

    fn preserve_ref_id(&mut self) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        let id = self.read_objects.len() as u32;
        self.read_objects.push(None);
        self.frames.push(Some(id));
        id
    }

    fn push_untracked(&mut self) { self.frames.push(None); }

    fn reference(&mut self, value: &Value) {
        if let Some(Some(id)) = self.frames.last_mut().map(Option::take) {
            self.set_read_object(id, value.clone());
        }
    }

    fn complete(&mut self, value: &Value) {
        if let Some(Some(id)) = self.frames.pop() {
            self.set_read_object(id, value.clone());
        }
    }

    fn set_read_object(&mut self, id: u32, value: Value) {
        if let Some(slot) = self.read_objects.get_mut(id as usize) {
            *slot = Some(value);
        }
    }

    fn get_read_object(&self, id: u32) -> Option<Value> {
        self.read_objects.get(id as usize).cloned().flatten()
    }

    fn replace_ref(&mut self, original: &Value, replacement: &Value) {
        let Some(address) = original.identity() else {
            return;
        };

        if let Some(id) = self.written.remove(&address) {
            if let Some(new_address) = replacement.identity() {
                self.written.insert(new_address, id);
                self.keepalive.push(replacement.clone());
            }
        }

        for slot in self.read_objects.iter_mut().flatten() {
            if slot.identity() == Some(address) {
                *slot = replacement.clone();
            }
        }
    }

    fn read_objects(&self) -> Vec<Value> {
        self.read_objects.iter().flatten().cloned().collect()
    }

    fn reset_write(&mut self) {
        self.written.clear();
        self.keepalive.clear();
        self.next_write_id = 0;
    }

    fn reset_read(&mut self) {
        self.read_objects.clear();
        self.frames.clear();
    }
}

/// A resolver for calls without reference tracking. Flags are still written
/// and read, but no identity is remembered.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRefResolver;

impl RefResolver for NoRefResolver {
    fn write_ref_or_null(&mut self, buffer: &mut Buffer, value: &Value) -> bool {
        if value.is_null() {
            RefFlag::Null.write(buffer);
            true
        } else {
            RefFlag::NotNullValue.write(buffer);
            false
        }
    }

    fn read_ref_or_null(
        &mut self,
        buffer: &mut Buffer,
    ) -> Result<(RefFlag, Option<Value>)> {
        match RefFlag::read(buffer)? {
            RefFlag::Ref => Err(Error::InvalidRefId { id: buffer.read_var_u32()? }),
            flag => Ok((flag, None)),
        }
    }

    fn preserve_ref_id(&mut self) -> u32 { 0 }

    fn push_untracked(&mut self) {}

    fn reference(&mut self, _: &Value) {}

    fn complete(&mut self, _: &Value) {}

    fn set_read_object(&mut self, _: u32, _: Value) {}

    fn get_read_object(&self, _: u32) -> Option<Value> { None }

    fn replace_ref(&mut self, _: &Value, _: &Value) {}

    fn read_objects(&self) -> Vec<Value> { Vec::new() }

    fn reset_write(&mut self) {}

    fn reset_read(&mut self) {}
}

/// The resolver an engine uses, chosen by its configuration.
#[derive(Debug)]
#[enum_dispatch(RefResolver)]
#[allow(missing_docs)]
pub enum Resolver {
    Map(MapRefResolver),
    Disabled(NoRefResolver),
}

impl Resolver {
    /// The resolver for the given tracking setting.
    #[must_use]
    pub fn new(ref_tracking: bool) -> Self {
        if ref_tracking {
            Self::Map(MapRefResolver::default())
        } else {
            Self::Disabled(NoRefResolver)
        }
    }
}
