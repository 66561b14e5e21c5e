use nova_hprof::{parse_dump, IdSize, PrimitiveArray, RedactionPolicy, Value, NULL_ID};
use pretty_assertions::assert_eq;

use super::fixtures::*;

#[test]
fn redacted_dump_keeps_sizes_but_changes_bytes() {
    let heap = app_heap(IdSize::Eight);
    let policy = RedactionPolicy::resolve(
        "map",
        None,
        Some("com.example.User.pin:0\nage:-1,char[]:xxxx"),
        None,
    );
    let plain_bytes = dump_bytes(&heap, None);
    let redacted_bytes = dump_bytes(&heap, Some(&policy));
    assert_eq!(plain_bytes.len(), redacted_bytes.len());
    assert_ne!(plain_bytes, redacted_bytes);

    let plain = parse_dump(&plain_bytes).unwrap();
    let redacted = parse_dump(&redacted_bytes).unwrap();
    for (id, instance) in &plain.instances {
        assert_eq!(instance.data.len(), redacted.instances[id].data.len(), "instance {id}");
    }

    assert_eq!(redacted.instance_field(ALICE, None, "pin"), Some(Value::Long(0)));
    assert_eq!(redacted.instance_field(ALICE, None, "age"), Some(Value::Int(-1)));
    assert_eq!(redacted.instance_field(ROOT_ADMIN, None, "age"), Some(Value::Int(-1)));
    // Not named by the map.
    assert_eq!(redacted.instance_field(ROOT_ADMIN, None, "level"), Some(Value::Short(7)));
    assert_eq!(
        redacted.instance_field(ALICE, None, "name"),
        Some(Value::Object(ALICE_NAME))
    );

    let expected: Vec<u16> = "xxxx\0\0\0".encode_utf16().collect();
    assert_eq!(
        redacted.primitive_arrays[&ALICE_PASSWORD].values,
        PrimitiveArray::Char(expected)
    );
    assert_eq!(
        redacted.primitive_arrays[&ALICE_CHARS].values,
        PrimitiveArray::Char("xxxx\0".encode_utf16().collect())
    );
    assert!(redacted.dangling_references().is_empty());
}

#[test]
fn annotation_mode_zeroes_primitives_outside_the_classpath() {
    let heap = app_heap(IdSize::Eight);
    let policy = RedactionPolicy::resolve("annotation", Some("java"), None, None);
    let contents = parse_dump(&dump_bytes(&heap, Some(&policy))).unwrap();

    assert_eq!(contents.instance_field(ALICE, None, "age"), Some(Value::Int(0)));
    assert_eq!(contents.instance_field(ALICE, None, "pin"), Some(Value::Long(0)));
    assert_eq!(contents.instance_field(ALICE, None, "active"), Some(Value::Boolean(false)));
    assert_eq!(
        contents.static_field("com.example.User", "SECRET_KEY"),
        Some(Value::Long(0))
    );
    // References survive so the graph keeps its shape.
    assert_eq!(
        contents.instance_field(ALICE, None, "password"),
        Some(Value::Object(ALICE_PASSWORD))
    );
    assert_eq!(contents.object_arrays[&USERS].elements, vec![ALICE, ROOT_ADMIN, NULL_ID]);
    // java.lang.String is on the classpath.
    assert_eq!(
        contents.instance_field(ALICE_NAME, None, "hash"),
        Some(Value::Int(92_903_040))
    );
    // Primitive arrays are never on the classpath.
    assert_eq!(
        contents.primitive_arrays[&ALICE_PASSWORD].values,
        PrimitiveArray::Char(vec![0; 7])
    );
}

#[test]
fn prefixes_match_whole_package_segments() {
    let heap = app_heap(IdSize::Eight);
    let policy = RedactionPolicy::resolve("annotation", Some("com.exam, java"), None, None);
    let contents = parse_dump(&dump_bytes(&heap, Some(&policy))).unwrap();
    assert_eq!(contents.instance_field(ALICE, None, "age"), Some(Value::Int(0)));

    let policy = RedactionPolicy::resolve("annotation", Some("com/example"), None, None);
    let contents = parse_dump(&dump_bytes(&heap, Some(&policy))).unwrap();
    assert_eq!(contents.instance_field(ALICE, None, "age"), Some(Value::Int(33)));
}

#[test]
fn map_file_entries_apply_after_inline_entries() {
    let dir = tempfile::tempdir().unwrap();
    let map_file = dir.path().join("redact.map");
    std::fs::write(
        &map_file,
        "# pins stay secret\ncom.example.User.pin=77\nage = 5\nactive:true\n",
    )
    .unwrap();

    let heap = app_heap(IdSize::Four);
    let policy = RedactionPolicy::resolve("map", None, Some("age:18"), Some(&map_file));
    let contents = parse_dump(&dump_bytes(&heap, Some(&policy))).unwrap();

    assert_eq!(contents.instance_field(ALICE, None, "age"), Some(Value::Int(18)));
    assert_eq!(contents.instance_field(ALICE, None, "pin"), Some(Value::Long(77)));
    assert_eq!(contents.instance_field(ROOT_ADMIN, None, "active"), Some(Value::Boolean(true)));
}

#[test]
fn unparsable_substitute_falls_back_to_zero() {
    let heap = app_heap(IdSize::Eight);
    let policy = RedactionPolicy::resolve("map", None, Some("pin:not-a-number,name:bob"), None);
    let contents = parse_dump(&dump_bytes(&heap, Some(&policy))).unwrap();
    assert_eq!(contents.instance_field(ALICE, None, "pin"), Some(Value::Long(0)));
    assert_eq!(contents.instance_field(ALICE, None, "name"), Some(Value::Object(NULL_ID)));
    assert!(contents.dangling_references().is_empty());
}

#[test]
fn broken_configurations_dump_without_redaction() {
    let heap = app_heap(IdSize::Eight);
    let plain = dump_bytes(&heap, None);
    let dir = tempfile::tempdir().unwrap();

    for policy in [
        RedactionPolicy::resolve("annotation", None, None, None),
        RedactionPolicy::resolve("annotation", Some(" , "), None, None),
        RedactionPolicy::resolve("map", None, None, None),
        RedactionPolicy::resolve("map", None, Some("no separator"), None),
        RedactionPolicy::resolve("map", None, None, Some(&dir.path().join("absent.map"))),
    ] {
        assert_eq!(policy, RedactionPolicy::Off);
        assert_eq!(dump_bytes(&heap, Some(&policy)), plain);
    }
}
