//! A cross-language binary object serialization engine.
//!
//! The engine turns graphs of dynamically typed [`Value`](value::Value)s,
//! shared and circular references included, into a compact byte stream and
//! back. User structs and enums are described by
//! [`StructType`](fory_meta::types::StructType) and
//! [`EnumType`](fory_meta::types::EnumType) and made known to the engine
//! through its [`TypeRegistry`](registry::TypeRegistry).
//!
//! The main pieces:
//!
//! - [`fory`]: the engine and the stream header.
//! - [`ref_resolver`]: identity tracking for shared and circular references.
//! - [`registry`]: wire identities, serializer bindings and the entry point of
//!   the [`security`] gate.
//! - [`serializer`]: struct payloads in schema-consistent, compatible and
//!   meta-shared form, and enum payloads.
//! - [`meta_context`]: class definitions shared with a peer across calls.
//! - [`pool`]: engines handed out to concurrent callers.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use fory_core::{config::Config, value::Value, Fory};
//! use fory_meta::types::{FieldDef, FieldType, StructType, TypeName};
//!
//! let node = Arc::new(
//!     StructType::new(TypeName::parse("demo.Node").unwrap(), vec![
//!         FieldDef::new("id", FieldType::Int32),
//!         FieldDef::new_nullable(
//!             "next",
//!             FieldType::Struct(TypeName::parse("demo.Node").unwrap()),
//!         ),
//!     ])
//!     .unwrap(),
//! );
//!
//! let mut fory = Fory::new(Config::builder().ref_tracking(true).build());
//! fory.register(Arc::clone(&node)).unwrap();
//!
//! // a node pointing at itself
//! let a = Value::object(&node, vec![Value::Int32(1), Value::Null]).unwrap();
//! a.as_object().unwrap().write().set("next", a.clone());
//!
//! let bytes = fory.serialize(&a).unwrap();
//! let read = fory.deserialize(&bytes).unwrap();
//!
//! let object = read.as_object().unwrap();
//! let next = object.read().get("next").cloned().unwrap();
//! assert!(Arc::ptr_eq(object, next.as_object().unwrap()));
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod fory;
pub mod meta_context;
pub mod pool;
pub mod ref_resolver;
pub mod registry;
pub mod security;
pub mod serializer;
pub mod value;

#[cfg(test)]
mod test;

pub use error::{Error, Result};
pub use fory::Fory;
