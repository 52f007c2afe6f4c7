//! Tests for whole serialize and deserialize calls.

use std::sync::Arc;

use fory_buffer::{Buffer, LongEncoding};
use fory_meta::{
    class_def::ClassDef,
    meta_string::MetaString,
    types::{EnumType, FieldDef, FieldType, StructType, TypeName},
};
use proptest::prelude::*;

use crate::{
    config::{CompatibleMode, Config, MetaShareMode, SnapshotMode},
    context::{ReadContext, WriteContext},
    error::{Error, RegistrationReason, SecurityReason},
    meta_context::MetaContext,
    pool::ForyPool,
    registry::TypeCatalog,
    security::{AllowListChecker, CheckLevel},
    serializer::{MetaSharedSerializer, Serializer},
    value::{EnumValue, PrimitiveArray, Value},
    Fory, Result,
};

fn init_logger() { let _ = env_logger::builder().is_test(true).try_init(); }

fn name(qualified: &str) -> TypeName { TypeName::parse(qualified).unwrap() }

fn point() -> Arc<StructType> {
    Arc::new(
        StructType::new(name("demo.Point"), vec![
            FieldDef::new("x", FieldType::Int32),
            FieldDef::new("y", FieldType::Int32),
        ])
        .unwrap(),
    )
}

fn node() -> Arc<StructType> {
    Arc::new(
        StructType::new(name("demo.Node"), vec![
            FieldDef::new("id", FieldType::Int32),
            FieldDef::new_nullable("next", FieldType::Struct(name("demo.Node"))),
        ])
        .unwrap(),
    )
}

fn color() -> Arc<EnumType> {
    Arc::new(EnumType::new(name("demo.Color"), ["Red", "Green", "Blue"]).unwrap())
}

fn point_at(struct_type: &Arc<StructType>, x: i32, y: i32) -> Value {
    Value::object(struct_type, vec![Value::Int32(x), Value::Int32(y)]).unwrap()
}

fn compatible(meta_share: MetaShareMode) -> Config {
    Config::builder()
        .compatible(CompatibleMode::Compatible)
        .meta_share(meta_share)
        .build()
}

fn round_trip(fory: &mut Fory, value: &Value) -> Value {
    let bytes = fory.serialize(value).unwrap();
    fory.deserialize(&bytes).unwrap()
}

#[test]
fn built_in_values_round_trip() {
    let cases = [
        Value::Bool(true),
        Value::Int8(-7),
        Value::Int16(300),
        Value::Int32(i32::MIN),
        Value::Int64(i64::MAX),
        Value::Float32(1.5),
        Value::Float64(-2.25),
        Value::from("héllo"),
        Value::Binary(vec![0, 1, 255]),
        Value::Timestamp(1_700_000_000_000),
        Value::Date(19_000),
        Value::Array(PrimitiveArray::Bool(vec![Some(true), None, Some(false)])),
        Value::Array(PrimitiveArray::Int32(vec![Some(1), None, Some(-3)])),
        Value::Array(PrimitiveArray::Int64(vec![None, None])),
        Value::Array(PrimitiveArray::Float64(vec![Some(0.5)])),
        Value::List(vec![Value::Int32(1), Value::Null, Value::from("two")]),
        Value::Set(vec![Value::Int64(1), Value::Int64(2)]),
        Value::Map(vec![
            (Value::from("a"), Value::Int32(1)),
            (Value::from("b"), Value::List(Vec::new())),
        ]),
    ];

    let configs = [
        Config::default(),
        Config::builder()
            .compress_int(false)
            .long_encoding(LongEncoding::Raw)
            .build(),
        Config::builder().long_encoding(LongEncoding::Pvl).build(),
        Config::builder().ref_tracking(true).string_ref_ignored(false).build(),
    ];

    for config in configs {
        let mut fory = Fory::new(config);

        for value in &cases {
            assert_eq!(&round_trip(&mut fory, value), value);
        }
    }
}

proptest! {
    #[test]
    fn integers_survive_every_encoding(
        values in proptest::collection::vec((any::<i64>(), any::<i32>()), 0..32),
        compress_int in any::<bool>(),
    ) {
        let list = Value::List(
            values
                .iter()
                .flat_map(|&(long, int)| [Value::Int64(long), Value::Int32(int)])
                .collect(),
        );

        for long_encoding in [LongEncoding::Sli, LongEncoding::Pvl, LongEncoding::Raw] {
            let mut fory = Fory::new(
                Config::builder()
                    .compress_int(compress_int)
                    .long_encoding(long_encoding)
                    .build(),
            );

            prop_assert_eq!(&round_trip(&mut fory, &list), &list);
        }
    }
}

#[test]
fn null_root_is_the_flags_byte() {
    let mut fory = Fory::default();

    let bytes = fory.serialize(&Value::Null).unwrap();

    assert_eq!(bytes, [7]);
    assert_eq!(fory.deserialize(&bytes).unwrap(), Value::Null);
}

#[test]
fn big_endian_streams_are_refused() {
    let mut fory = Fory::default();

    let error = fory.deserialize(&[4, 6, 0xFF, 1, 0]).unwrap_err();

    assert!(matches!(error.root(), Error::UnsupportedStream { .. }));
}

#[test]
fn self_references_survive() {
    let node = node();
    let mut fory = Fory::new(Config::builder().ref_tracking(true).build());
    fory.register(Arc::clone(&node)).unwrap();

    let a = Value::object(&node, vec![Value::Int32(1), Value::Null]).unwrap();
    let b = Value::object(&node, vec![Value::Int32(2), a.clone()]).unwrap();
    a.as_object().unwrap().write().set("next", b.clone());

    let read = round_trip(&mut fory, &a);

    let first = read.as_object().unwrap();
    let second = first.read().get("next").cloned().unwrap();
    let third = second.as_object().unwrap().read().get("next").cloned().unwrap();

    assert!(Arc::ptr_eq(first, third.as_object().unwrap()));
    assert_eq!(second.as_object().unwrap().read().get("id"), Some(&Value::Int32(2)));
    assert_eq!(read, a);

    // break the cycles so the graphs are freed
    a.as_object().unwrap().write().set("next", Value::Null);
    first.write().set("next", Value::Null);
}

#[test]
fn shared_objects_stay_shared() {
    let point = point();
    let shared = point_at(&point, 1, 2);
    let list = Value::List(vec![shared.clone(), shared]);

    let mut tracking = Fory::new(Config::builder().ref_tracking(true).build());
    tracking.register(Arc::clone(&point)).unwrap();

    let read = round_trip(&mut tracking, &list);
    let items = read.as_list().unwrap();
    assert!(Arc::ptr_eq(
        items[0].as_object().unwrap(),
        items[1].as_object().unwrap()
    ));

    let mut plain = Fory::default();
    plain.register(Arc::clone(&point)).unwrap();

    let read = round_trip(&mut plain, &list);
    let items = read.as_list().unwrap();
    assert!(!Arc::ptr_eq(
        items[0].as_object().unwrap(),
        items[1].as_object().unwrap()
    ));
    assert_eq!(read, list);
}

#[test]
fn cycles_without_tracking_hit_the_depth_limit() {
    init_logger();

    let node = node();
    let mut fory = Fory::new(Config::builder().max_depth(16).build());
    fory.register(Arc::clone(&node)).unwrap();

    let a = Value::object(&node, vec![Value::Int32(1), Value::Null]).unwrap();
    a.as_object().unwrap().write().set("next", a.clone());

    let error = fory.serialize(&a).unwrap_err();

    assert!(matches!(error, Error::DepthExceeded { max_depth: 16, .. }));
    assert!(error.to_string().contains("enable reference tracking"));

    a.as_object().unwrap().write().set("next", Value::Null);
}

#[test]
fn deep_graphs_hit_the_depth_limit_on_read() {
    let node = node();
    let chain = (0..4).fold(Value::Null, |next, id| {
        Value::object(&node, vec![Value::Int32(id), next]).unwrap()
    });

    let mut writer = Fory::new(Config::builder().ref_tracking(true).build());
    writer.register(Arc::clone(&node)).unwrap();
    let bytes = writer.serialize(&chain).unwrap();

    let mut reader =
        Fory::new(Config::builder().ref_tracking(true).max_depth(2).build());
    reader.register(Arc::clone(&node)).unwrap();

    let error = reader.deserialize(&bytes).unwrap_err();

    assert!(matches!(error.root(), Error::DepthExceeded { max_depth: 2, hint: "" }));
}

#[test]
fn ids_are_shorter_than_names() {
    let value = point_at(&point(), 3, 4);

    let mut by_id = Fory::default();
    by_id.register_by_id(point(), 1).unwrap();

    let mut by_name = Fory::default();
    by_name.register_by_name(point()).unwrap();

    let id_bytes = by_id.serialize(&value).unwrap();
    let name_bytes = by_name.serialize(&value).unwrap();

    assert!(id_bytes.len() < name_bytes.len());
    assert_eq!(by_id.deserialize(&id_bytes).unwrap(), value);
    assert_eq!(by_name.deserialize(&name_bytes).unwrap(), value);

    let error = by_id.register_by_id(point(), 2).unwrap_err();
    assert!(matches!(error, Error::Registration {
        reason: RegistrationReason::IdConflict { existing: 1, requested: 2 },
        ..
    }));
}

#[test]
fn repeated_names_are_written_once() {
    let point = point();
    let mut fory = Fory::default();
    fory.register_by_name(Arc::clone(&point)).unwrap();

    let mut list_of = |count: usize| {
        let items = (0..count).map(|_| point_at(&point, 1, 1)).collect();
        fory.serialize(&Value::List(items)).unwrap().len()
    };

    let (empty, one, two) = (list_of(0), list_of(1), list_of(2));

    // a first occurrence is a length, an encoding tag and the packed bytes
    let written = |value: &str| 2 + MetaString::encode(value).bytes().len();
    let back_references = 2;

    // the second occurrence refers back to the strings of the first
    assert!(
        (two - one) + written("demo") + written("Point")
            <= (one - empty) + back_references
    );
}

#[test]
fn unregistered_types_need_opt_in() {
    let value = point_at(&point(), 1, 2);

    let mut strict = Fory::default();
    assert!(matches!(
        strict.serialize(&value),
        Err(Error::UnregisteredType { .. })
    ));

    let mut relaxed = Fory::new(Config::builder().require_registration(false).build());
    let bytes = relaxed.serialize(&value).unwrap();
    assert_eq!(relaxed.deserialize(&bytes).unwrap(), value);

    // the reader has never seen the type
    let mut reader = Fory::default();
    let error = reader.deserialize(&bytes).unwrap_err();
    assert!(matches!(error.root(), Error::UnregisteredType { .. }));
}

#[test]
fn disallowed_types_fail_both_ways() {
    let secret = Arc::new(
        StructType::new(name("demo.secret.Key"), vec![FieldDef::new(
            "bits",
            FieldType::Int64,
        )])
        .unwrap(),
    );
    let value = Value::object(&secret, vec![Value::Int64(42)]).unwrap();

    let guarded = || {
        Config::builder()
            .require_registration(false)
            .disallowed_types(vec!["demo.secret.*".to_owned()])
            .build()
    };

    let mut registered = Fory::new(guarded());
    registered.register_by_id(Arc::clone(&secret), 1).unwrap();
    let mut unregistered = Fory::new(guarded());

    for fory in [&mut registered, &mut unregistered] {
        assert!(matches!(fory.serialize(&value), Err(Error::Security {
            reason: SecurityReason::Disallowed,
            ..
        })));
    }

    let mut writer = Fory::default();
    writer.register_by_id(Arc::clone(&secret), 1).unwrap();
    let by_id = writer.serialize(&value).unwrap();

    let mut writer = Fory::new(Config::builder().require_registration(false).build());
    let by_name = writer.serialize(&value).unwrap();

    for (fory, bytes) in [(&mut registered, by_id), (&mut unregistered, by_name)] {
        let error = fory.deserialize(&bytes).unwrap_err();
        assert!(matches!(error.root(), Error::Security {
            reason: SecurityReason::Disallowed,
            ..
        }));
    }
}

#[test]
fn checker_and_loader_gate_unknown_names_on_read() {
    let point = point();
    let mut writer = Fory::default();
    writer.register_by_name(Arc::clone(&point)).unwrap();
    let bytes = writer.serialize(&point_at(&point, 5, 6)).unwrap();

    let relaxed = || Config::builder().require_registration(false).build();

    let mut loading = Fory::new(relaxed());
    loading.set_type_loader(Arc::new(TypeCatalog::default().with(Arc::clone(&point))));
    assert_eq!(loading.deserialize(&bytes).unwrap(), point_at(&point, 5, 6));

    let mut checked = Fory::new(relaxed());
    checked.set_type_loader(Arc::new(TypeCatalog::default().with(Arc::clone(&point))));
    checked.set_type_checker(Arc::new(
        AllowListChecker::new(CheckLevel::Strict).allow("other.*"),
    ));
    let error = checked.deserialize(&bytes).unwrap_err();
    assert!(matches!(error.root(), Error::Security {
        reason: SecurityReason::NotAllowed,
        ..
    }));
}

#[test]
fn fingerprints_catch_diverging_schemas() {
    let mut writer = Fory::default();
    writer.register_by_id(point(), 1).unwrap();
    let bytes = writer.serialize(&point_at(&point(), 1, 2)).unwrap();

    let wider = StructType::new(name("demo.Point"), vec![
        FieldDef::new("x", FieldType::Int32),
        FieldDef::new("y", FieldType::Int32),
        FieldDef::new("z", FieldType::Int32),
    ])
    .unwrap();

    let mut reader = Fory::default();
    reader.register_by_id(wider, 1).unwrap();

    let error = reader.deserialize(&bytes).unwrap_err();
    assert!(matches!(error.root(), Error::MalformedSchema { .. }));
}

fn item_v1() -> Arc<StructType> {
    Arc::new(
        StructType::new(name("demo.Item"), vec![
            FieldDef::new("a", FieldType::Int32),
            FieldDef::new("b", FieldType::String),
            FieldDef::new("c", FieldType::Int64),
        ])
        .unwrap(),
    )
}

fn item_v2() -> Arc<StructType> {
    Arc::new(
        StructType::new(name("demo.Item"), vec![
            FieldDef::new("b", FieldType::String),
            FieldDef::new("c", FieldType::Int64),
            FieldDef::new("d", FieldType::Int32),
        ])
        .unwrap(),
    )
}

#[test]
fn compatible_structs_evolve() {
    init_logger();

    for meta_share in [MetaShareMode::Disabled, MetaShareMode::Scoped] {
        let mut writer = Fory::new(compatible(meta_share));
        writer.register_by_name(item_v1()).unwrap();

        let mut reader = Fory::new(compatible(meta_share));
        reader.register_by_name(item_v2()).unwrap();

        let old = Value::object(&item_v1(), vec![
            Value::Int32(7),
            Value::from("kept"),
            Value::Int64(-9),
        ])
        .unwrap();

        let bytes = writer.serialize(&old).unwrap();
        let read = reader.deserialize(&bytes).unwrap();

        let expected = Value::object(&item_v2(), vec![
            Value::from("kept"),
            Value::Int64(-9),
            Value::Int32(0),
        ])
        .unwrap();
        assert_eq!(read, expected, "with meta sharing {meta_share:?}");

        // and back: the old reader drops `d` and defaults `a`
        let bytes = reader.serialize(&read).unwrap();
        let back = writer.deserialize(&bytes).unwrap();

        let object = back.as_object().unwrap().read();
        assert_eq!(object.get("a"), Some(&Value::Int32(0)));
        assert_eq!(object.get("b"), Some(&Value::from("kept")));
    }
}

#[test]
fn compatible_structs_evolve_nested_fields() {
    init_logger();

    let old_shape = Arc::new(
        StructType::new(name("demo.Shape"), vec![
            FieldDef::new("points", FieldType::List(Box::new(FieldType::Int32))),
            FieldDef::new_nullable("origin", FieldType::Struct(name("demo.Point"))),
            FieldDef::new("note", FieldType::Any),
            FieldDef::new("scale", FieldType::Int32),
        ])
        .unwrap(),
    );
    let new_shape = Arc::new(
        StructType::new(name("demo.Shape"), vec![
            FieldDef::new("points", FieldType::List(Box::new(FieldType::Int32))),
            FieldDef::new("scale", FieldType::Int64),
            FieldDef::new(
                "tags",
                FieldType::Map(
                    Box::new(FieldType::String),
                    Box::new(FieldType::Int32),
                ),
            ),
        ])
        .unwrap(),
    );

    let old = Value::object(&old_shape, vec![
        Value::List(vec![Value::Int32(1), Value::Int32(2)]),
        point_at(&point(), 3, 4),
        Value::from("memo"),
        Value::Int32(7),
    ])
    .unwrap();

    // `scale` changed type, so the old value is skipped like a removed field
    let expected = Value::object(&new_shape, vec![
        Value::List(vec![Value::Int32(1), Value::Int32(2)]),
        Value::Int64(0),
        Value::Map(Vec::new()),
    ])
    .unwrap();

    for meta_share in [MetaShareMode::Disabled, MetaShareMode::Scoped] {
        let mut writer = Fory::new(compatible(meta_share));
        writer.register_by_name(point()).unwrap();
        writer.register_by_name(Arc::clone(&old_shape)).unwrap();

        let mut reader = Fory::new(compatible(meta_share));
        reader.register_by_name(point()).unwrap();
        reader.register_by_name(Arc::clone(&new_shape)).unwrap();

        let bytes = writer.serialize(&old).unwrap();
        let read = reader.deserialize(&bytes).unwrap();

        assert_eq!(read, expected, "with meta sharing {meta_share:?}");
    }
}

#[test]
fn compatible_structs_keep_cycles() {
    for meta_share in [MetaShareMode::Disabled, MetaShareMode::Scoped] {
        let node = node();
        let mut fory = Fory::new(
            Config::builder()
                .compatible(CompatibleMode::Compatible)
                .meta_share(meta_share)
                .ref_tracking(true)
                .build(),
        );
        fory.register_by_name(Arc::clone(&node)).unwrap();

        let a = Value::object(&node, vec![Value::Int32(1), Value::Null]).unwrap();
        a.as_object().unwrap().write().set("next", a.clone());

        let read = round_trip(&mut fory, &a);
        let object = read.as_object().unwrap();
        let next = object.read().get("next").cloned().unwrap();

        assert!(
            Arc::ptr_eq(object, next.as_object().unwrap()),
            "with meta sharing {meta_share:?}"
        );

        a.as_object().unwrap().write().set("next", Value::Null);
        object.write().set("next", Value::Null);
    }
}

fn segment() -> Arc<StructType> {
    Arc::new(
        StructType::new(name("demo.Segment"), vec![
            FieldDef::new("start", FieldType::Struct(name("demo.Point"))),
            FieldDef::new("end", FieldType::Struct(name("demo.Point"))),
        ])
        .unwrap(),
    )
}

#[test]
fn struct_fields_share_one_object() {
    let (point, segment) = (point(), segment());
    let shared = point_at(&point, 1, 2);
    let value = Value::object(&segment, vec![shared.clone(), shared]).unwrap();

    let configs = [
        Config::builder().ref_tracking(true).build(),
        Config::builder()
            .compatible(CompatibleMode::Compatible)
            .meta_share(MetaShareMode::Scoped)
            .ref_tracking(true)
            .build(),
    ];

    for config in configs {
        let mut fory = Fory::new(config);
        fory.register_by_name(Arc::clone(&point)).unwrap();
        fory.register_by_name(Arc::clone(&segment)).unwrap();

        let read = round_trip(&mut fory, &value);
        let object = read.as_object().unwrap().read();
        let (start, end) = (object.get("start").unwrap(), object.get("end").unwrap());

        assert!(Arc::ptr_eq(start.as_object().unwrap(), end.as_object().unwrap()));
        assert_eq!(*start, point_at(&point, 1, 2));
    }
}

#[test]
fn full_meta_share_describes_types_first_seen_later() {
    let (point, segment) = (point(), segment());

    let mut writer = Fory::new(compatible(MetaShareMode::Full));
    let mut reader = Fory::new(compatible(MetaShareMode::Full));
    for fory in [&mut writer, &mut reader] {
        fory.register_by_name(Arc::clone(&point)).unwrap();
        fory.register_by_name(Arc::clone(&segment)).unwrap();
    }

    let first = point_at(&point, 1, 2);
    let second = Value::object(&segment, vec![
        point_at(&point, 3, 4),
        point_at(&point, 5, 6),
    ])
    .unwrap();

    let mut sent = MetaContext::new();
    let mut received = MetaContext::new();

    let first_bytes = writer.serialize_with_session(&first, &mut sent).unwrap();
    assert_eq!(sent.described_types(), 1);

    // only the segment is new; the nested points refer to the first call
    let second_bytes = writer.serialize_with_session(&second, &mut sent).unwrap();
    assert_eq!(sent.described_types(), 2);

    assert_eq!(
        reader.deserialize_with_session(&first_bytes, &mut received).unwrap(),
        first
    );
    assert_eq!(
        reader.deserialize_with_session(&second_bytes, &mut received).unwrap(),
        second
    );
    assert_eq!(received.received_defs(), 2);
}

#[test]
fn peer_layouts_write_and_read_by_field_name() {
    let peer = Arc::new(ClassDef::of_struct(&item_v1()).unwrap());
    let layout = MetaSharedSerializer::new(peer, item_v2()).unwrap();

    let mut fory = Fory::default();
    fory.register_by_id(item_v2(), 1).unwrap();
    fory.register_serializer(&name("demo.Item"), Arc::new(layout)).unwrap();

    let value = Value::object(&item_v2(), vec![
        Value::from("kept"),
        Value::Int64(-9),
        Value::Int32(5),
    ])
    .unwrap();

    // `d` has no slot in the peer's layout, `a` is sent as its default
    let bytes = fory.serialize(&value).unwrap();
    let read = fory.deserialize(&bytes).unwrap();
    let expected = Value::object(&item_v2(), vec![
        Value::from("kept"),
        Value::Int64(-9),
        Value::Int32(0),
    ])
    .unwrap();

    assert_eq!(read, expected);

    let other = Arc::new(
        StructType::new(name("demo.Other"), item_v2().fields().clone()).unwrap(),
    );
    let peer = Arc::new(ClassDef::of_struct(&item_v1()).unwrap());
    assert!(matches!(
        MetaSharedSerializer::new(peer, other),
        Err(Error::TypeMismatch { .. })
    ));
}

#[test]
fn full_meta_share_sends_definitions_once() {
    let point = point();
    let value = point_at(&point, 10, 20);

    let mut writer = Fory::new(compatible(MetaShareMode::Full));
    writer.register_by_name(Arc::clone(&point)).unwrap();
    let mut reader = Fory::new(compatible(MetaShareMode::Full));
    reader.register_by_name(Arc::clone(&point)).unwrap();

    let mut sent = MetaContext::new();
    let mut received = MetaContext::new();

    let first = writer.serialize_with_session(&value, &mut sent).unwrap();
    let second = writer.serialize_with_session(&value, &mut sent).unwrap();

    assert!(second.len() < first.len());
    assert_eq!(sent.described_types(), 1);

    assert_eq!(reader.deserialize_with_session(&first, &mut received).unwrap(), value);
    assert_eq!(reader.deserialize_with_session(&second, &mut received).unwrap(), value);
    assert_eq!(received.received_defs(), 1);
}

#[test]
fn scoped_meta_share_repeats_definitions() {
    let point = point();
    let value = point_at(&point, 10, 20);

    let mut fory = Fory::new(compatible(MetaShareMode::Scoped));
    fory.register_by_name(Arc::clone(&point)).unwrap();

    let first = fory.serialize(&value).unwrap();
    let second = fory.serialize(&value).unwrap();

    assert_eq!(first, second);
    assert_eq!(fory.deserialize(&second).unwrap(), value);
}

#[test]
fn full_meta_share_needs_a_session() {
    let mut fory = Fory::new(compatible(MetaShareMode::Full));

    assert!(matches!(
        fory.serialize(&Value::Int32(1)),
        Err(Error::MissingMetaContext)
    ));
}

#[test]
fn unknown_structs_read_into_placeholders() {
    let mut writer = Fory::new(compatible(MetaShareMode::Scoped));
    writer.register_by_name(point()).unwrap();
    let bytes = writer.serialize(&point_at(&point(), 3, 4)).unwrap();

    let mut reader = Fory::new(
        Config::builder()
            .compatible(CompatibleMode::Compatible)
            .meta_share(MetaShareMode::Scoped)
            .require_registration(false)
            .deserialize_nonexistent(true)
            .build(),
    );

    let read = reader.deserialize(&bytes).unwrap();
    let object = read.as_object().unwrap().read();

    assert!(object.struct_type().placeholder());
    assert_eq!(object.get("x"), Some(&Value::Int32(3)));
    assert_eq!(object.get("y"), Some(&Value::Int32(4)));
    drop(object);

    // written back under the peer's name and definition
    let bytes = reader.serialize(&read).unwrap();
    assert_eq!(writer.deserialize(&bytes).unwrap(), point_at(&point(), 3, 4));
}

#[test]
fn enums_by_ordinal_and_by_name() {
    let color = color();
    let green: Value = EnumValue::of(&color, "Green").unwrap().into();
    let packed = MetaString::encode("Green");

    for enum_by_name in [false, true] {
        let mut fory = Fory::new(Config::builder().enum_by_name(enum_by_name).build());
        fory.register_by_id(Arc::clone(&color), 3).unwrap();

        let bytes = fory.serialize(&green).unwrap();
        let named = bytes
            .windows(packed.bytes().len())
            .any(|window| window == packed.bytes().as_slice());

        assert_eq!(named, enum_by_name);
        assert_eq!(fory.deserialize(&bytes).unwrap(), green);
    }
}

#[derive(Debug)]
struct PackedPoint(Arc<StructType>);

impl Serializer for PackedPoint {
    fn write(&self, ctx: &mut WriteContext<'_>, value: &Value) -> Result<()> {
        let object = value.as_object().unwrap().read();

        for field in ["x", "y"] {
            let coordinate = *object.get(field).unwrap().as_int32().unwrap();
            ctx.buffer().write_i16(i16::try_from(coordinate).unwrap());
        }

        Ok(())
    }

    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Value> {
        let x = ctx.buffer().read_i16()?;
        let y = ctx.buffer().read_i16()?;

        Value::object(&self.0, vec![Value::Int32(x.into()), Value::Int32(y.into())])
    }
}

#[test]
fn custom_serializers_replace_the_struct_layout() {
    let point = point();
    let value = point_at(&point, -5, 600);

    let mut fory = Fory::default();
    fory.register_by_id(Arc::clone(&point), 1).unwrap();
    let plain = fory.serialize(&value).unwrap();

    fory.register_serializer(&name("demo.Point"), Arc::new(PackedPoint(Arc::clone(&point))))
        .unwrap();
    let packed = fory.serialize(&value).unwrap();

    assert_ne!(plain, packed);
    assert_eq!(fory.deserialize(&packed).unwrap(), value);

    // header, ref flag, two byte tag and two 16-bit coordinates
    assert_eq!(packed.len(), 2 + 1 + 2 + 4);
}

// writes the position at which each distinct object first appeared in the
// call, and reads it back as a plain integer
#[derive(Debug)]
struct FirstSeen;

impl Serializer for FirstSeen {
    fn write(&self, ctx: &mut WriteContext<'_>, value: &Value) -> Result<()> {
        let key = value.identity().unwrap();
        let next = Value::Int32(i32::try_from(ctx.scratch().len()).unwrap());
        let seen = ctx.scratch().entry(key).or_insert(next).clone();

        ctx.buffer().write_var_i32(*seen.as_int32().unwrap());
        Ok(())
    }

    fn read(&self, ctx: &mut ReadContext<'_>) -> Result<Value> {
        Ok(Value::Int32(ctx.buffer().read_var_i32()?))
    }
}

#[test]
fn scratch_lives_for_one_call() {
    let point = point();
    let (a, b) = (point_at(&point, 0, 0), point_at(&point, 0, 0));
    let list = Value::List(vec![a.clone(), b, a]);

    let mut fory = Fory::default();
    fory.register_by_id(Arc::clone(&point), 1).unwrap();
    fory.register_serializer(&name("demo.Point"), Arc::new(FirstSeen)).unwrap();

    let expected =
        Value::List(vec![Value::Int32(0), Value::Int32(1), Value::Int32(0)]);

    for _ in 0..2 {
        assert_eq!(round_trip(&mut fory, &list), expected);
    }
}

#[test]
fn read_failures_report_reconstructed_objects() {
    init_logger();

    let point = point();
    let list = Value::List((1..=3).map(|i| point_at(&point, i, i)).collect());

    let mut fory = Fory::new(Config::builder().snapshot(SnapshotMode::Full).build());
    fory.register_by_id(Arc::clone(&point), 1).unwrap();

    let bytes = fory.serialize(&list).unwrap();
    let error = fory.deserialize(&bytes[..bytes.len() - 1]).unwrap_err();

    let Error::ReadFailed { source, snapshot } = &error else {
        panic!("expected a read failure, got {error}");
    };

    assert!(matches!(**source, Error::Buffer(_)));
    assert_eq!(*snapshot.total(), 2);
    assert_eq!(snapshot.objects().len(), 2);
    assert!(snapshot.objects()[0].starts_with("demo.Point"));
    assert!(error.to_string().contains("2 objects reconstructed"));

    // the engine is usable after the failure
    assert_eq!(fory.deserialize(&bytes).unwrap(), list);
}

#[test]
fn failed_writes_leave_buffer_and_session_untouched() {
    let point = point();
    let item = item_v1();

    let mut fory = Fory::new(compatible(MetaShareMode::Full));
    fory.register_by_name(Arc::clone(&point)).unwrap();
    fory.register_by_name(Arc::clone(&item)).unwrap();

    let mut session = MetaContext::new();
    fory.serialize_with_session(&point_at(&point, 1, 1), &mut session).unwrap();

    let unregistered = Value::object(
        &Arc::new(StructType::new(name("demo.Stray"), Vec::new()).unwrap()),
        Vec::new(),
    )
    .unwrap();
    let failing = Value::List(vec![
        Value::object(&item, vec![Value::Int32(1), Value::from("x"), Value::Int64(2)])
            .unwrap(),
        unregistered,
    ]);

    assert!(fory.serialize_with_session(&failing, &mut session).is_err());
    assert_eq!(session.described_types(), 1);

    let mut buffer = Buffer::new();
    buffer.write_u8(9);
    buffer.write_u8(9);

    let mut scoped = Fory::new(compatible(MetaShareMode::Scoped));
    scoped.register_by_name(Arc::clone(&item)).unwrap();

    assert!(scoped.serialize_to(&mut buffer, &failing).is_err());
    assert_eq!(buffer.as_slice(), &[9, 9]);
}

#[test]
fn streams_can_be_read_back_to_back() {
    let mut fory = Fory::default();

    let mut buffer = Buffer::new();
    fory.serialize_to(&mut buffer, &Value::Int32(1)).unwrap();
    fory.serialize_to(&mut buffer, &Value::from("two")).unwrap();

    assert_eq!(fory.deserialize_from(&mut buffer).unwrap(), Value::Int32(1));
    assert_eq!(fory.deserialize_from(&mut buffer).unwrap(), Value::from("two"));
    assert_eq!(buffer.remaining(), 0);
}

#[test]
fn pooled_engines_serve_threads() {
    let point = point();
    let factory_point = Arc::clone(&point);

    let pool = ForyPool::new(move || {
        let mut fory = Fory::default();
        fory.register_by_id(Arc::clone(&factory_point), 1).unwrap();
        fory
    });

    std::thread::scope(|scope| {
        for i in 0..4 {
            let pool = &pool;
            let point = &point;

            scope.spawn(move || {
                let value = point_at(point, i, -i);
                let mut fory = pool.acquire();

                let bytes = fory.serialize(&value).unwrap();
                assert_eq!(fory.deserialize(&bytes).unwrap(), value);
            });
        }
    });

    assert!((1..=4).contains(&pool.idle()));
}
