//! Tests for registration and type resolution.

use fory_meta::types::{FieldDef, FieldType};

use super::*;
use crate::{
    config::MetaShareMode,
    context::{ReadContext, WriteContext},
    security::{AllowListChecker, CheckLevel},
};

fn name(qualified: &str) -> TypeName { TypeName::parse(qualified).unwrap() }

fn point(qualified: &str) -> Arc<StructType> {
    Arc::new(
        StructType::new(name(qualified), vec![
            FieldDef::new("x", FieldType::Int32),
            FieldDef::new("y", FieldType::Int32),
        ])
        .unwrap(),
    )
}

fn color() -> Arc<EnumType> {
    Arc::new(EnumType::new(name("demo.Color"), ["Red", "Green"]).unwrap())
}

fn registry(config: Config) -> TypeRegistry { TypeRegistry::new(Arc::new(config)) }

fn permissive() -> Config { Config::builder().require_registration(false).build() }

fn reason(error: Error) -> RegistrationReason {
    match error {
        Error::Registration { reason, .. } => reason,
        other => panic!("expected a registration error, got {other}"),
    }
}

#[derive(Debug)]
struct Opaque;

impl Serializer for Opaque {
    fn write(&self, _: &mut WriteContext<'_>, _: &Value) -> Result<()> { Ok(()) }

    fn read(&self, _: &mut ReadContext<'_>) -> Result<Value> { Ok(Value::Null) }
}

#[test]
fn same_id_twice_is_a_no_op() {
    let mut registry = registry(Config::default());

    registry.register_by_id(point("demo.Point"), 3).unwrap();
    registry.register_by_id(point("demo.Point"), 3).unwrap();

    let info = registry.class_info(&name("demo.Point")).unwrap();
    assert_eq!(info.registration(), Registration::Id(3));
    assert_eq!(info.tag(), 3 << 8 | u32::from(InternalTypeId::Struct.id()));
}

#[test]
fn another_id_is_a_conflict() {
    let mut registry = registry(Config::default());
    registry.register_by_id(point("demo.Point"), 1).unwrap();

    let error = registry.register_by_id(point("demo.Point"), 2).unwrap_err();

    assert_eq!(reason(error), RegistrationReason::IdConflict {
        existing: 1,
        requested: 2
    });
}

#[test]
fn an_id_belongs_to_one_type() {
    let mut registry = registry(Config::default());
    registry.register_by_id(point("demo.Point"), 1).unwrap();

    let error = registry.register_by_id(point("demo.Other"), 1).unwrap_err();

    assert_eq!(reason(error), RegistrationReason::IdTaken {
        id: 1,
        owner: "demo.Point".to_owned()
    });
}

#[test]
fn ids_fit_in_24_bits() {
    let mut registry = registry(Config::default());

    assert!(registry.register_by_id(point("demo.Point"), MAX_USER_ID).is_ok());

    let error =
        registry.register_by_id(point("demo.Other"), MAX_USER_ID + 1).unwrap_err();
    assert_eq!(reason(error), RegistrationReason::IdOutOfRange {
        id: MAX_USER_ID + 1
    });
}

#[test]
fn name_and_id_registrations_exclude_each_other() {
    let mut registry = registry(Config::default());
    registry.register_by_name(point("demo.Named")).unwrap();
    registry.register_by_id(point("demo.Numbered"), 4).unwrap();

    assert_eq!(
        reason(registry.register_by_id(point("demo.Named"), 5).unwrap_err()),
        RegistrationReason::RegisteredByName
    );
    assert_eq!(
        reason(registry.register_by_name(point("demo.Numbered")).unwrap_err()),
        RegistrationReason::RegisteredById { id: 4 }
    );
}

#[test]
fn a_name_holds_one_shape() {
    let mut registry = registry(Config::default());
    registry.register_by_name(point("demo.Point")).unwrap();

    let other = StructType::new(name("demo.Point"), vec![FieldDef::new(
        "z",
        FieldType::Int64,
    )])
    .unwrap();

    assert_eq!(
        reason(registry.register_by_name(other).unwrap_err()),
        RegistrationReason::ShapeConflict
    );
}

#[test]
fn automatic_ids_skip_taken_ones() {
    let mut registry = registry(Config::default());
    registry.register_by_id(point("demo.A"), 0).unwrap();

    assert_eq!(registry.register(point("demo.B")).unwrap(), 1);
    assert_eq!(registry.register(color()).unwrap(), 2);

    // a type registered before keeps its id
    assert_eq!(registry.register(point("demo.A")).unwrap(), 0);
}

#[test]
fn internal_ids_follow_mode_and_registration() {
    let mut consistent = registry(Config::default());
    consistent.register_by_id(point("demo.A"), 1).unwrap();
    consistent.register_by_name(point("demo.B")).unwrap();
    consistent.register_by_id(color(), 2).unwrap();

    let internal = |registry: &TypeRegistry, qualified: &str| {
        registry.class_info(&name(qualified)).unwrap().internal_id()
    };

    assert_eq!(internal(&consistent, "demo.A"), InternalTypeId::Struct);
    assert_eq!(internal(&consistent, "demo.B"), InternalTypeId::NamedStruct);
    assert_eq!(internal(&consistent, "demo.Color"), InternalTypeId::Enum);

    let mut compatible = registry(
        Config::builder().compatible(CompatibleMode::Compatible).build(),
    );
    compatible.register_by_id(point("demo.A"), 1).unwrap();
    compatible.register_by_name(point("demo.B")).unwrap();
    compatible.register_by_name(color()).unwrap();

    assert_eq!(internal(&compatible, "demo.A"), InternalTypeId::CompatibleStruct);
    assert_eq!(
        internal(&compatible, "demo.B"),
        InternalTypeId::NamedCompatibleStruct
    );
    assert_eq!(internal(&compatible, "demo.Color"), InternalTypeId::NamedEnum);
}

#[test]
fn custom_serializers_need_a_registration() {
    let mut registry = registry(Config::default());

    assert_eq!(
        reason(
            registry
                .register_serializer(&name("demo.Point"), Arc::new(Opaque))
                .unwrap_err()
        ),
        RegistrationReason::NotRegistered
    );

    registry.register_by_id(point("demo.Point"), 9).unwrap();
    registry.register_serializer(&name("demo.Point"), Arc::new(Opaque)).unwrap();

    let info = registry.class_info_by_id(9 << 8 | u32::from(InternalTypeId::Ext.id()));
    assert_eq!(info.unwrap().internal_id(), InternalTypeId::Ext);
}

#[test]
fn unregistered_types_fail_when_registration_is_required() {
    let mut registry = registry(Config::default());
    let value = Value::object(&point("demo.Point"), vec![Value::Int32(0), Value::Int32(0)]).unwrap();

    assert!(matches!(
        registry.class_info_for_write(&value),
        Err(Error::UnregisteredType { type_name }) if type_name == "demo.Point"
    ));
}

#[test]
fn unregistered_types_are_recorded_on_first_use() {
    let mut registry = registry(permissive());
    let value = Value::object(&point("demo.Point"), vec![Value::Int32(0), Value::Int32(0)]).unwrap();

    let info = registry.class_info_for_write(&value).unwrap();

    assert_eq!(info.registration(), Registration::Unregistered);
    assert_eq!(info.internal_id(), InternalTypeId::NamedStruct);
    assert!(registry.class_info(&name("demo.Point")).is_some());
}

#[test]
fn disallowed_types_fail_registered_or_not() {
    let config = Config::builder()
        .require_registration(false)
        .disallowed_types(vec!["demo.secret.*".to_owned()])
        .build();

    let mut registry = registry(config);
    registry.register_by_id(point("demo.secret.Key"), 1).unwrap();

    let registered =
        Value::object(&point("demo.secret.Key"), vec![Value::Int32(0), Value::Int32(0)]).unwrap();
    let unregistered =
        Value::object(&point("demo.secret.Token"), vec![Value::Int32(0), Value::Int32(0)]).unwrap();

    for value in [registered, unregistered] {
        assert!(matches!(registry.class_info_for_write(&value), Err(Error::Security {
            reason: SecurityReason::Disallowed,
            ..
        })));
    }

    assert!(matches!(
        registry.class_info_by_id(1 << 8 | u32::from(InternalTypeId::Struct.id())),
        Err(Error::Security { reason: SecurityReason::Disallowed, .. })
    ));
}

#[test]
fn checker_gates_unregistered_types_only() {
    let mut registry = registry(permissive());
    registry.set_type_checker(Arc::new(
        AllowListChecker::new(CheckLevel::Strict).allow("demo.allowed.*"),
    ));
    registry.register_by_name(point("demo.Registered")).unwrap();

    let object = |qualified: &str| {
        Value::object(&point(qualified), vec![Value::Int32(0), Value::Int32(0)]).unwrap()
    };

    assert!(registry.class_info_for_write(&object("demo.Registered")).is_ok());
    assert!(registry.class_info_for_write(&object("demo.allowed.Point")).is_ok());
    assert!(matches!(
        registry.class_info_for_write(&object("demo.Point")),
        Err(Error::Security { reason: SecurityReason::NotAllowed, .. })
    ));
}

#[test]
fn loader_resolves_unknown_names() {
    let mut registry = registry(permissive());
    registry.set_type_loader(Arc::new(TypeCatalog::default().with(color())));

    let info = registry
        .class_info_by_name(&name("demo.Color"), InternalTypeId::NamedEnum, None)
        .unwrap();
    assert_eq!(info.type_def(), &TypeDef::Enum(color()));

    assert!(matches!(
        registry.class_info_by_name(
            &name("demo.Missing"),
            InternalTypeId::NamedEnum,
            None
        ),
        Err(Error::UnregisteredType { .. })
    ));
}

#[test]
fn known_names_must_keep_their_internal_id() {
    let mut registry = registry(Config::default());
    registry.register_by_name(color()).unwrap();

    assert!(matches!(
        registry.class_info_by_name(
            &name("demo.Color"),
            InternalTypeId::NamedStruct,
            None
        ),
        Err(Error::TypeMismatch { .. })
    ));
}

#[test]
fn placeholders_need_a_definition_and_opt_in() {
    let config = Config::builder()
        .require_registration(false)
        .compatible(CompatibleMode::Compatible)
        .meta_share(MetaShareMode::Scoped)
        .deserialize_nonexistent(true)
        .build();
    let mut registry = registry(config);

    let remote = ClassDef::of_struct(&point("remote.Point")).unwrap();
    let internal = InternalTypeId::NamedCompatibleStruct;

    assert!(registry
        .class_info_by_name(&name("remote.Point"), internal, None)
        .is_err());

    let info = registry
        .class_info_by_name(&name("remote.Point"), internal, Some(&remote))
        .unwrap();

    let TypeDef::Struct(placeholder) = info.type_def() else {
        panic!("expected a struct");
    };
    assert!(placeholder.placeholder());
    assert_eq!(placeholder.fields().len(), 2);

    let mut strict = self::registry(Config::default());
    assert!(strict
        .class_info_by_name(&name("remote.Point"), internal, Some(&remote))
        .is_err());
}

#[test]
fn decoded_definitions_are_reused() {
    let mut registry = registry(Config::default());
    let class_def = ClassDef::of_struct(&point("demo.Point")).unwrap();

    let mut buffer = Buffer::new();
    class_def.write(&mut buffer);
    class_def.write(&mut buffer);

    let first = registry.read_class_def(&mut buffer).unwrap();
    let second = registry.read_class_def(&mut buffer).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(*first, class_def);
    assert_eq!(registry.cached_class_defs(), 1);
    assert_eq!(buffer.remaining(), 0);
}

#[test]
fn unknown_ids_are_unknown_tags() {
    let registry = registry(Config::default());
    let tag = 5 << 8 | u32::from(InternalTypeId::Struct.id());

    assert!(matches!(
        registry.class_info_by_id(tag),
        Err(Error::UnknownTypeTag { tag: found }) if found == tag
    ));
}
