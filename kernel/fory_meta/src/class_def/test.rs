//! Tests for class definitions.

use fory_buffer::Buffer;

use super::*;

fn node_type() -> StructType {
    let name = TypeName::new("demo.graph", "Node").unwrap();

    StructType::new(name.clone(), vec![
        FieldDef::new("id", FieldType::Int32),
        FieldDef::new_nullable("label", FieldType::String),
        FieldDef::new_nullable("next", FieldType::Struct(name)),
        FieldDef::new(
            "weights",
            FieldType::Map(
                Box::new(FieldType::String),
                Box::new(FieldType::List(Box::new(FieldType::Float64))),
            ),
        ),
    ])
    .unwrap()
}

#[test]
fn encode_decode() {
    let def = ClassDef::of_struct(&node_type()).unwrap();

    let mut buffer = Buffer::new();
    def.write(&mut buffer);
    buffer.write_u8(0xEE);

    assert_eq!(ClassDef::peek_id(&buffer).unwrap(), def.id());
    assert_eq!(def.id() & 0xFF, 4);

    let decoded = ClassDef::read(&mut buffer).unwrap();
    assert_eq!(decoded, def);
    assert_eq!(decoded.kind(), DefKind::Struct);
    assert_eq!(buffer.read_u8().unwrap(), 0xEE);
}

#[test]
fn skip_lands_after_the_definition() {
    let def = ClassDef::of_struct(&node_type()).unwrap();

    let mut buffer = Buffer::new();
    def.write(&mut buffer);
    def.write(&mut buffer);

    ClassDef::skip(&mut buffer).unwrap();
    assert_eq!(buffer.reader_index(), def.encoded_len());
    assert_eq!(ClassDef::read(&mut buffer).unwrap().id(), def.id());
}

#[test]
fn id_ignores_declaration_order() {
    let node = node_type();
    let mut reversed = node.fields().clone();
    reversed.reverse();
    let reversed = StructType::new(node.name().clone(), reversed).unwrap();

    assert_eq!(
        ClassDef::of_struct(&node).unwrap().id(),
        ClassDef::of_struct(&reversed).unwrap().id()
    );
}

#[test]
fn id_tracks_shape_changes() {
    let node = node_type();
    let mut fields = node.fields().clone();
    fields.push(FieldDef::new("extra", FieldType::Bool));
    let grown = StructType::new(node.name().clone(), fields).unwrap();

    let before = ClassDef::of_struct(&node).unwrap();
    let after = ClassDef::of_struct(&grown).unwrap();

    assert_ne!(before.id(), after.id());
    assert_ne!(before.fingerprint(), after.fingerprint());
}

#[test]
fn unknown_field_type_is_rejected() {
    let name = TypeName::new("", "T").unwrap();
    let def = ClassDef::build(DefKind::Struct, &name, &[FieldDef::new(
        "flag",
        FieldType::Bool,
    )])
    .unwrap();

    let mut bytes = Buffer::new();
    def.write(&mut bytes);
    let mut bytes = bytes.into_bytes();

    // the type tag is the last byte of the only field
    let last = bytes.len() - 1;
    bytes[last] = 99;

    let mut buffer = Buffer::from(bytes);
    assert_eq!(
        ClassDef::read(&mut buffer),
        Err(Error::UnknownFieldType { tag: 99 })
    );
}

#[test]
fn truncated_definition_fails() {
    let def = ClassDef::of_struct(&node_type()).unwrap();

    let mut bytes = Buffer::new();
    def.write(&mut bytes);
    let mut bytes = bytes.into_bytes();
    bytes.truncate(bytes.len() - 3);

    assert!(ClassDef::read(&mut Buffer::from(bytes)).is_err());
}

#[test]
fn placeholder_keeps_the_shape() {
    let def = ClassDef::of_struct(&node_type()).unwrap();
    let placeholder = def.to_placeholder().unwrap();

    assert!(placeholder.placeholder());
    assert_eq!(placeholder.name(), def.type_name());
    assert_eq!(ClassDef::of_struct(&placeholder).unwrap().id(), def.id());
}

#[test]
fn enum_definitions_carry_only_the_name() {
    let name = TypeName::new("demo", "Color").unwrap();
    let def = ClassDef::build(DefKind::Enum, &name, &[]).unwrap();

    let mut buffer = Buffer::new();
    def.write(&mut buffer);

    let decoded = ClassDef::read(&mut buffer).unwrap();
    assert_eq!(decoded.kind(), DefKind::Enum);
    assert!(decoded.fields().is_empty());
    assert_eq!(decoded.type_name().to_string(), "demo.Color");
}
