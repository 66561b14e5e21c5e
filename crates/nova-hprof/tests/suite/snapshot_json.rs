use nova_hprof::{parse_dump, HeapSnapshot, HprofError, IdSize, Value};
use pretty_assertions::assert_eq;

use super::fixtures::*;

const DOCUMENT: &str = r#"{
  "id_size": 4,
  "timestamp_millis": 5,
  "classes": [
    { "id": 1, "name": "java.lang.Object" },
    {
      "id": 2,
      "name": "com.example.Session",
      "super_id": 1,
      "instance_fields": [
        { "name": "token", "type": "object" },
        { "name": "expires", "type": "long" }
      ]
    }
  ],
  "objects": [
    { "id": 10, "kind": "instance", "class_id": 2, "fields": [{ "object": 11 }, { "long": 99 }] },
    { "id": 11, "kind": "primitive_array", "values": { "byte": [1, 2, 3] } }
  ],
  "roots": [
    { "kind": "java_frame", "thread_serial": 1, "frame": 0, "object_id": 10 }
  ]
}"#;

#[test]
fn json_snapshot_dumps_like_a_built_snapshot() {
    let heap = HeapSnapshot::from_json_str(DOCUMENT).unwrap();
    let contents = parse_dump(&dump_bytes(&heap, None)).unwrap();
    assert_eq!(contents.id_size, IdSize::Four);
    assert_eq!(contents.timestamp_millis, 5);
    assert_eq!(contents.instance_field(10, None, "expires"), Some(Value::Long(99)));
    assert_eq!(contents.instance_field(10, None, "token"), Some(Value::Object(11)));
}

#[test]
fn snapshots_survive_a_json_round_trip() {
    let heap = app_heap(IdSize::Eight);
    let reloaded = HeapSnapshot::from_json_str(&heap.to_json_string().unwrap()).unwrap();
    assert_eq!(dump_bytes(&reloaded, None), dump_bytes(&heap, None));
}

#[test]
fn malformed_snapshot_file_names_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("heap.json");
    std::fs::write(&path, r#"{ "classes": [], "threads": [] }"#).unwrap();
    match HeapSnapshot::from_json_file(&path) {
        Err(HprofError::Json { path: reported, .. }) => assert!(reported.ends_with("heap.json")),
        other => panic!("unexpected result: {other:?}"),
    }
}
