//! Maps user types to their wire identity and serializer, and back.
//!
//! A type reaches the wire in one of three ways:
//!
//! - **By id**: registered with a numeric id, written as a single varuint tag
//!   `(user_id << 8) | internal_id`.
//! - **By name**: registered by its qualified name, written as the tag
//!   followed by the namespace and name as meta strings.
//! - **By session index**: named or compatible types written while meta
//!   sharing is active carry an index into the
//!   [`MetaContext`](crate::meta_context::MetaContext) instead of the name.
//!
//! Types that were never registered can still be written and read by name
//! when the configuration does not require registration. They go through the
//! security gate first and are then recorded as
//! [`Registration::Unregistered`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use fory_core::{config::Config, registry::TypeRegistry};
//! use fory_meta::types::{FieldDef, FieldType, StructType, TypeName};
//!
//! let point = StructType::new(TypeName::parse("demo.Point").unwrap(), vec![
//!     FieldDef::new("x", FieldType::Int32),
//!     FieldDef::new("y", FieldType::Int32),
//! ])
//! .unwrap();
//!
//! let mut registry = TypeRegistry::new(Arc::new(Config::default()));
//! registry.register_by_id(point.clone(), 7).unwrap();
//!
//! // re-registering with the same id is a no-op, another id is an error
//! assert!(registry.register_by_id(point.clone(), 7).is_ok());
//! assert!(registry.register_by_id(point, 8).is_err());
//! ```

use std::{
    collections::HashMap,
    fmt::Debug,
    sync::{Arc, OnceLock},
};

use fory_buffer::Buffer;
use fory_meta::{
    class_def::{ClassDef, DefKind},
    types::{EnumType, InternalTypeId, StructType, TypeName},
};

use crate::{
    config::{CompatibleMode, Config},
    error::{Error, RegistrationReason, Result, SecurityReason},
    security::{DisallowList, TypeChecker},
    serializer::{
        CompatibleStructSerializer, EnumSerializer, Serializer, StructSerializer,
    },
    value::Value,
};

#[cfg(test)]
mod test;

/// The largest numeric id a user type can be registered with; the id shares
/// the tag varint with an 8-bit internal id.
pub const MAX_USER_ID: u32 = (1 << 24) - 1;

/// Most decoded class definitions kept for reuse.
pub const MAX_CACHED_CLASS_DEFS: usize = 4096;

/// The declared shape of a user type.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::From)]
#[allow(missing_docs)]
pub enum TypeDef {
    Struct(Arc<StructType>),
    Enum(Arc<EnumType>),
}

impl From<StructType> for TypeDef {
    fn from(value: StructType) -> Self { Self::Struct(Arc::new(value)) }
}

impl From<EnumType> for TypeDef {
    fn from(value: EnumType) -> Self { Self::Enum(Arc::new(value)) }
}

impl TypeDef {
    /// The qualified name of the type.
    #[must_use]
    pub fn name(&self) -> &TypeName {
        match self {
            Self::Struct(struct_type) => struct_type.name(),
            Self::Enum(enum_type) => enum_type.name(),
        }
    }

    /// The shape of a struct or enum value, or `None` for built-in values.
    #[must_use]
    pub fn of_value(value: &Value) -> Option<Self> {
        match value {
            Value::Object(object) => {
                Some(Self::Struct(Arc::clone(object.read().struct_type())))
            }
            Value::Enum(value) => Some(Self::Enum(Arc::clone(value.enum_type()))),
            _ => None,
        }
    }

    fn same_shape(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Struct(a), Self::Struct(b)) => Arc::ptr_eq(a, b) || a == b,
            (Self::Enum(a), Self::Enum(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => false,
        }
    }
}

/// How a type came to be known to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Registration {
    /// Registered with a numeric id.
    Id(u32),

    /// Registered by its qualified name.
    Name,

    /// Seen without registration and admitted by the security gate.
    Unregistered,
}

/// Everything the engine needs to write and read one user type. Built once
/// per type and shared.
#[derive(Debug)]
pub struct ClassInfo {
    type_def: TypeDef,
    internal_id: InternalTypeId,
    registration: Registration,
    serializer: Arc<dyn Serializer>,
    class_def: OnceLock<Arc<ClassDef>>,
}

impl ClassInfo {
    /// The declared shape.
    #[must_use]
    pub const fn type_def(&self) -> &TypeDef { &self.type_def }

    /// The qualified name.
    #[must_use]
    pub fn type_name(&self) -> &TypeName { self.type_def.name() }

    /// The low byte of the type tag.
    #[must_use]
    pub const fn internal_id(&self) -> InternalTypeId { self.internal_id }

    /// How the type is registered.
    #[must_use]
    pub const fn registration(&self) -> Registration { self.registration }

    /// The serializer writing the type's payload.
    #[must_use]
    pub fn serializer(&self) -> &Arc<dyn Serializer> { &self.serializer }

    /// The full type tag.
    #[must_use]
    pub fn tag(&self) -> u32 {
        match self.registration {
            Registration::Id(id) => id << 8 | u32::from(self.internal_id.id()),
            Registration::Name | Registration::Unregistered => {
                u32::from(self.internal_id.id())
            }
        }
    }

    /// The class definition describing the type, built on first use.
    ///
    /// # Errors
    ///
    /// Fails if two fields of a struct collide on their wire header.
    pub fn class_def(&self) -> Result<Arc<ClassDef>> {
        if let Some(class_def) = self.class_def.get() {
            return Ok(Arc::clone(class_def));
        }

        let class_def = Arc::new(match (&self.type_def, self.internal_id) {
            (_, internal) if internal.is_ext() => {
                ClassDef::build(DefKind::Ext, self.type_name(), &[])?
            }
            (TypeDef::Struct(struct_type), _) => ClassDef::of_struct(struct_type)?,
            (TypeDef::Enum(enum_type), _) => {
                ClassDef::build(DefKind::Enum, enum_type.name(), &[])?
            }
        });

        Ok(Arc::clone(self.class_def.get_or_init(|| class_def)))
    }

    /// A copy of this entry writing and reading through `serializer`.
    #[must_use]
    pub fn with_serializer(&self, serializer: Arc<dyn Serializer>) -> Self {
        Self {
            type_def: self.type_def.clone(),
            internal_id: self.internal_id,
            registration: self.registration,
            serializer,
            class_def: self.class_def.clone(),
        }
    }
}

/// Resolves type names the registry does not know, when registration is
/// not required.
pub trait TypeLoader: Send + Sync + Debug {
    /// The shape of the named type, if it can be found.
    fn load(&self, name: &TypeName) -> Option<TypeDef>;
}

/// A [`TypeLoader`] over a fixed set of shapes.
#[derive(Debug, Clone, Default)]
pub struct TypeCatalog {
    types: HashMap<TypeName, TypeDef>,
}

impl TypeCatalog {
    /// Adds a shape, builder style.
    #[must_use]
    pub fn with(mut self, type_def: impl Into<TypeDef>) -> Self {
        self.insert(type_def);
        self
    }

    /// Adds a shape, replacing any of the same name.
    pub fn insert(&mut self, type_def: impl Into<TypeDef>) {
        let type_def = type_def.into();
        self.types.insert(type_def.name().clone(), type_def);
    }
}

impl TypeLoader for TypeCatalog {
    fn load(&self, name: &TypeName) -> Option<TypeDef> {
        self.types.get(name).cloned()
    }
}

/// The table of user types known to one engine.
///
/// Registration is expected to finish before serialization starts; the
/// registry itself does no locking.
#[derive(Debug)]
pub struct TypeRegistry {
    config: Arc<Config>,
    by_name: HashMap<TypeName, Arc<ClassInfo>>,
    by_id: HashMap<u32, Arc<ClassInfo>>,
    next_id: u32,
    class_defs: HashMap<i64, Arc<ClassDef>>,
    disallowed: DisallowList,
    checker: Option<Arc<dyn TypeChecker>>,
    loader: Option<Arc<dyn TypeLoader>>,
}

fn refuse(type_name: &TypeName, reason: RegistrationReason) -> Error {
    Error::Registration { type_name: type_name.to_string(), reason }
}

impl TypeRegistry {
    /// An empty registry for `config`.
    #[must_use]
    pub fn new(config: Arc<Config>) -> Self {
        let disallowed = DisallowList::new(config.disallowed_types());

        Self {
            config,
            by_name: HashMap::new(),
            by_id: HashMap::new(),
            next_id: 0,
            class_defs: HashMap::new(),
            disallowed,
            checker: None,
            loader: None,
        }
    }

    /// Installs the checker consulted for unregistered types.
    pub fn set_type_checker(&mut self, checker: Arc<dyn TypeChecker>) {
        self.checker = Some(checker);
    }

    /// Installs the loader resolving unknown names on read.
    pub fn set_type_loader(&mut self, loader: Arc<dyn TypeLoader>) {
        self.loader = Some(loader);
    }

    /// The entry of the named type, if it is known.
    #[must_use]
    pub fn class_info(&self, name: &TypeName) -> Option<&Arc<ClassInfo>> {
        self.by_name.get(name)
    }

    /// The number of decoded class definitions kept for reuse.
    #[must_use]
    pub fn cached_class_defs(&self) -> usize { self.class_defs.len() }

    /// Registers a type with the next free numeric id and returns it. A type
    /// already registered by id keeps its id.
    ///
    /// # Errors
    ///
    /// Fails if the type is registered by name, a different shape holds the
    /// name, or no id is left.
    pub fn register(&mut self, type_def: impl Into<TypeDef>) -> Result<u32> {
        let type_def = type_def.into();

        if let Some(Registration::Id(id)) =
            self.by_name.get(type_def.name()).map(|info| info.registration)
        {
            self.register_by_id(type_def, id)?;
            return Ok(id);
        }

        while self.by_id.contains_key(&self.next_id) {
            self.next_id += 1;
        }

        let id = self.next_id;
        self.register_by_id(type_def, id)?;
        Ok(id)
    }

    /// Registers a type with an explicit numeric id. Registering the same
    /// shape with the same id again is a no-op.
    ///
    /// # Errors
    ///
    /// Fails if the id does not fit 24 bits, the type already has another id
    /// or a name registration, the id belongs to another type, or a different
    /// shape holds the name.
    pub fn register_by_id(
        &mut self,
        type_def: impl Into<TypeDef>,
        id: u32,
    ) -> Result<()> {
        let type_def = type_def.into();
        let name = type_def.name().clone();

        if id > MAX_USER_ID {
            return Err(refuse(&name, RegistrationReason::IdOutOfRange { id }));
        }

        if let Some(existing) = self.by_name.get(&name) {
            if !existing.type_def.same_shape(&type_def) {
                return Err(refuse(&name, RegistrationReason::ShapeConflict));
            }

            match existing.registration {
                Registration::Id(existing) if existing == id => return Ok(()),
                Registration::Id(existing) => {
                    return Err(refuse(&name, RegistrationReason::IdConflict {
                        existing,
                        requested: id,
                    }));
                }
                Registration::Name => {
                    return Err(refuse(&name, RegistrationReason::RegisteredByName));
                }
                Registration::Unregistered => {}
            }
        }

        if let Some(owner) = self.by_id.get(&id) {
            return Err(refuse(&name, RegistrationReason::IdTaken {
                id,
                owner: owner.type_name().to_string(),
            }));
        }

        let info = Arc::new(self.new_class_info(type_def, Registration::Id(id))?);
        self.by_id.insert(id, Arc::clone(&info));
        self.by_name.insert(name.clone(), info);

        log::debug!("registered `{name}` with id {id}");
        Ok(())
    }

    /// Registers a type by its qualified name. Registering the same shape
    /// again is a no-op.
    ///
    /// # Errors
    ///
    /// Fails if the type already has a numeric id or a different shape holds
    /// the name.
    pub fn register_by_name(&mut self, type_def: impl Into<TypeDef>) -> Result<()> {
        let type_def = type_def.into();
        let name = type_def.name().clone();

        if let Some(existing) = self.by_name.get(&name) {
            if !existing.type_def.same_shape(&type_def) {
                return Err(refuse(&name, RegistrationReason::ShapeConflict));
            }

            match existing.registration {
                Registration::Id(id) => {
                    return Err(refuse(&name, RegistrationReason::RegisteredById {
                        id,
                    }));
                }
                Registration::Name => return Ok(()),
                Registration::Unregistered => {}
            }
        }

        let info = self.new_class_info(type_def, Registration::Name)?;
        self.by_name.insert(name.clone(), Arc::new(info));

        log::debug!("registered `{name}` by name");
        Ok(())
    }

    /// Binds a custom serializer to a registered type. The type is written
    /// with the `EXT`/`NAMED_EXT` tag from then on.
    ///
    /// # Errors
    ///
    /// Fails if the type is not registered.
    pub fn register_serializer(
        &mut self,
        name: &TypeName,
        serializer: Arc<dyn Serializer>,
    ) -> Result<()> {
        let Some(existing) = self
            .by_name
            .get(name)
            .filter(|info| info.registration != Registration::Unregistered)
        else {
            return Err(refuse(name, RegistrationReason::NotRegistered));
        };

        let internal_id = match existing.registration {
            Registration::Id(_) => InternalTypeId::Ext,
            Registration::Name | Registration::Unregistered => {
                InternalTypeId::NamedExt
            }
        };

        let info = Arc::new(ClassInfo {
            type_def: existing.type_def.clone(),
            internal_id,
            registration: existing.registration,
            serializer,
            class_def: OnceLock::new(),
        });

        if let Registration::Id(id) = info.registration {
            self.by_id.insert(id, Arc::clone(&info));
        }
        self.by_name.insert(name.clone(), info);

        log::debug!("bound a custom serializer to `{name}`");
        Ok(())
    }

    /// The entry used to write `value`, creating one for an unregistered type
    /// if the configuration and security gate allow it.
    ///
    /// # Errors
    ///
    /// Fails if the value is no struct or enum, the type is disallowed, or it
    /// is unregistered and either registration is required or the checker
    /// rejects it.
    pub fn class_info_for_write(&mut self, value: &Value) -> Result<Arc<ClassInfo>> {
        let Some(type_def) = TypeDef::of_value(value) else {
            return Err(Error::mismatch("a struct or enum", value.type_label()));
        };
        let name = type_def.name();

        self.check_disallowed(name)?;

        if let Some(info) = self.by_name.get(name) {
            if !info.type_def.same_shape(&type_def) {
                return Err(Error::mismatch(
                    format!("the registered shape of `{name}`"),
                    format!("another shape named `{name}`"),
                ));
            }

            return Ok(Arc::clone(info));
        }

        self.check_unregistered(name)?;
        self.insert_unregistered(type_def)
    }

    /// The entry registered under the numeric id packed in `tag`.
    ///
    /// # Errors
    ///
    /// Fails if no type has the id, the type is disallowed, or the internal
    /// id of the tag differs from the registered one.
    pub fn class_info_by_id(&self, tag: u32) -> Result<Arc<ClassInfo>> {
        let info = self
            .by_id
            .get(&(tag >> 8))
            .ok_or(Error::UnknownTypeTag { tag })?;

        self.check_disallowed(info.type_name())?;

        if info.tag() != tag {
            return Err(Error::mismatch(
                format!("{} tag of `{}`", info.internal_id, info.type_name()),
                format!("tag {tag:#x}"),
            ));
        }

        Ok(Arc::clone(info))
    }

    /// The entry for a type named on the wire.
    ///
    /// Unknown names are resolved through the type loader, or, with
    /// `class_def` present and nonexistent types tolerated, through a
    /// placeholder struct built from the definition.
    ///
    /// # Errors
    ///
    /// Fails if the type is disallowed, cannot be resolved, is rejected by
    /// the security gate, or is known with another internal id.
    pub fn class_info_by_name(
        &mut self,
        name: &TypeName,
        internal_id: InternalTypeId,
        class_def: Option<&ClassDef>,
    ) -> Result<Arc<ClassInfo>> {
        self.check_disallowed(name)?;

        let info = match self.by_name.get(name) {
            Some(info) => Arc::clone(info),
            None => self.resolve_unknown(name, internal_id, class_def)?,
        };

        if info.internal_id != internal_id {
            return Err(Error::mismatch(
                format!("{} for `{name}`", info.internal_id),
                internal_id,
            ));
        }

        Ok(info)
    }

    /// Reads a class definition at the reader, reusing the decoded copy if
    /// the same definition was read before.
    ///
    /// # Errors
    ///
    /// Fails if the definition is truncated or malformed.
    pub fn read_class_def(&mut self, buffer: &mut Buffer) -> Result<Arc<ClassDef>> {
        let id = ClassDef::peek_id(buffer)?;

        if let Some(class_def) = self.class_defs.get(&id) {
            ClassDef::skip(buffer)?;
            return Ok(Arc::clone(class_def));
        }

        let class_def = Arc::new(ClassDef::read(buffer)?);

        if self.class_defs.len() >= MAX_CACHED_CLASS_DEFS {
            log::debug!("class definition cache is full, clearing it");
            self.class_defs.clear();
        }
        self.class_defs.insert(id, Arc::clone(&class_def));

        Ok(class_def)
    }

    fn resolve_unknown(
        &mut self,
        name: &TypeName,
        internal_id: InternalTypeId,
        class_def: Option<&ClassDef>,
    ) -> Result<Arc<ClassInfo>> {
        self.check_unregistered(name)?;

        if let Some(type_def) =
            self.loader.as_ref().and_then(|loader| loader.load(name))
        {
            if type_def.name() != name {
                return Err(Error::mismatch(
                    format!("`{name}` from the type loader"),
                    format!("`{}`", type_def.name()),
                ));
            }

            log::debug!("loaded `{name}` through the type loader");
            return self.insert_unregistered(type_def);
        }

        match class_def {
            Some(class_def)
                if self.config.deserialize_nonexistent()
                    && internal_id.is_struct() =>
            {
                log::warn!(
                    "`{name}` is unknown; reading it into a placeholder with \
                     {} fields",
                    class_def.fields().len()
                );

                let placeholder = class_def.to_placeholder()?;
                self.insert_unregistered(TypeDef::Struct(Arc::new(placeholder)))
            }
            _ => Err(Error::UnregisteredType { type_name: name.to_string() }),
        }
    }

    fn insert_unregistered(&mut self, type_def: TypeDef) -> Result<Arc<ClassInfo>> {
        let name = type_def.name().clone();
        let info =
            Arc::new(self.new_class_info(type_def, Registration::Unregistered)?);

        self.by_name.insert(name.clone(), Arc::clone(&info));
        log::trace!("created class info for unregistered `{name}`");

        Ok(info)
    }

    fn check_disallowed(&self, name: &TypeName) -> Result<()> {
        if self.disallowed.contains(name) {
            return Err(Error::Security {
                type_name: name.to_string(),
                reason: SecurityReason::Disallowed,
            });
        }

        Ok(())
    }

    fn check_unregistered(&self, name: &TypeName) -> Result<()> {
        if self.config.require_registration() {
            return Err(Error::UnregisteredType { type_name: name.to_string() });
        }

        if let Some(checker) = &self.checker {
            if !checker.is_allowed(name) {
                return Err(Error::Security {
                    type_name: name.to_string(),
                    reason: SecurityReason::NotAllowed,
                });
            }
        }

        Ok(())
    }

    fn new_class_info(
        &self,
        type_def: TypeDef,
        registration: Registration,
    ) -> Result<ClassInfo> {
        let by_id = matches!(registration, Registration::Id(_));
        let compatible = self.config.compatible() == CompatibleMode::Compatible;

        let (internal_id, serializer): (_, Arc<dyn Serializer>) = match &type_def
        {
            TypeDef::Struct(struct_type) => {
                let internal_id = match (by_id, compatible) {
                    (true, false) => InternalTypeId::Struct,
                    (true, true) => InternalTypeId::CompatibleStruct,
                    (false, false) => InternalTypeId::NamedStruct,
                    (false, true) => InternalTypeId::NamedCompatibleStruct,
                };

                let serializer: Arc<dyn Serializer> = if compatible {
                    Arc::new(CompatibleStructSerializer::new(Arc::clone(
                        struct_type,
                    ))?)
                } else {
                    Arc::new(StructSerializer::new(
                        Arc::clone(struct_type),
                        self.config.check_struct_hash(),
                    )?)
                };

                (internal_id, serializer)
            }
            TypeDef::Enum(enum_type) => (
                if by_id { InternalTypeId::Enum } else { InternalTypeId::NamedEnum },
                Arc::new(EnumSerializer::new(Arc::clone(enum_type))),
            ),
        };

        Ok(ClassInfo {
            type_def,
            internal_id,
            registration,
            serializer,
            class_def: OnceLock::new(),
        })
    }
}
