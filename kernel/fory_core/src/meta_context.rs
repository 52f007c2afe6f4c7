//! Session state for sharing class definitions with a peer.
//!
//! The write side remembers which types were already described on this
//! channel and queues the definitions of newly described types until the end
//! of the call, when they are appended to the stream. The read side keeps the
//! definitions received so far, in the order the peer numbered them, along
//! with the entries resolved from them.
//!
//! A context lives as long as the caller keeps it. Passing the same context
//! to every call on a channel sends each definition once per channel;
//! resetting it before each call sends each definition once per call.

use std::{collections::HashMap, sync::Arc};

use fory_meta::{class_def::ClassDef, types::TypeName};

use crate::{error::Result, registry::ClassInfo};


/// The state of a [`MetaContext`] at the start of a call, to roll back to if
/// the call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaCheckpoint {
    described: usize,
    pending: usize,
    received: usize,
}

/// Class definitions exchanged with one peer.
#[derive(Debug, Default)]
pub struct MetaContext {
    class_map: HashMap<TypeName, u32>,
    writing_class_defs: Vec<Arc<ClassDef>>,
    read_class_defs: Vec<Arc<ClassDef>>,
    read_class_infos: Vec<Option<Arc<ClassInfo>>>,
}

impl MetaContext {
    /// An empty context.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// The session index of the named type. A type described for the first
    /// time gets the next index and its definition is queued.
    ///
    /// # Errors
    ///
    /// Fails if the definition cannot be built.
    pub fn write_index(
        &mut self,
        name: &TypeName,
        class_def: impl FnOnce() -> Result<Arc<ClassDef>>,
    ) -> Result<u32> {
        if let Some(index) = self.class_map.get(name) {
            return Ok(*index);
        }

        let class_def = class_def()?;

        #[allow(clippy::cast_possible_truncation)]
        let index = self.class_map.len() as u32;
        self.class_map.insert(name.clone(), index);
        self.writing_class_defs.push(class_def);

        log::debug!("described `{name}` to the peer as index {index}");
        Ok(index)
    }

    /// Takes the definitions queued during the current call.
    pub fn take_pending(&mut self) -> Vec<Arc<ClassDef>> {
        std::mem::take(&mut self.writing_class_defs)
    }

    /// Appends a definition received from the peer.
    pub fn push_read_def(&mut self, class_def: Arc<ClassDef>) {
        self.read_class_defs.push(class_def);
        self.read_class_infos.push(None);
    }

    /// The received definition with the given index.
    #[must_use]
    pub fn read_def(&self, index: u32) -> Option<&Arc<ClassDef>> {
        self.read_class_defs.get(index as usize)
    }

    /// The entry resolved earlier for the given index.
    #[must_use]
    pub fn read_info(&self, index: u32) -> Option<&Arc<ClassInfo>> {
        self.read_class_infos.get(index as usize).and_then(Option::as_ref)
    }

    /// Caches the entry resolved for the given index.
    pub fn set_read_info(&mut self, index: u32, info: Arc<ClassInfo>) {
        if let Some(slot) = self.read_class_infos.get_mut(index as usize) {
            *slot = Some(info);
        }
    }

    /// The number of types described to the peer.
    #[must_use]
    pub fn described_types(&self) -> usize { self.class_map.len() }

    /// The number of definitions received from the peer.
    #[must_use]
    pub fn received_defs(&self) -> usize { self.read_class_defs.len() }

    /// Forgets everything, as at the start of a new channel.
    pub fn reset(&mut self) {
        self.class_map.clear();
        self.writing_class_defs.clear();
        self.read_class_defs.clear();
        self.read_class_infos.clear();
    }

    /// Records the current state.
    #[must_use]
    pub fn checkpoint(&self) -> MetaCheckpoint {
        MetaCheckpoint {
            described: self.class_map.len(),
            pending: self.writing_class_defs.len(),
            received: self.read_class_defs.len(),
        }
    }

    /// Drops everything added since `checkpoint`.
    pub fn rollback(&mut self, checkpoint: MetaCheckpoint) {
        #[allow(clippy::cast_possible_truncation)]
        let described = checkpoint.described as u32;

        self.class_map.retain(|_, index| *index < described);
        self.writing_class_defs.truncate(checkpoint.pending);
        self.read_class_defs.truncate(checkpoint.received);
        self.read_class_infos.truncate(checkpoint.received);
    }
}
