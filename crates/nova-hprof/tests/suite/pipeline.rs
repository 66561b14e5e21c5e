use std::path::Path;

use nova_hprof::{
    dump_heap, parse_dump, ClassInfo, DumpRequest, GcRoot, HeapObject, HeapView, HprofConfig,
    HprofError, IdSize, ObjectId, PolicySource, RedactionMode, RedactionRequest, Result, Value,
};
use pretty_assertions::assert_eq;

use super::fixtures::*;

fn config_in(dir: &Path) -> HprofConfig {
    let mut config = HprofConfig::default();
    config.dump.default_path = dir.join("heap.bin");
    config.redaction.password = Some("secret".into());
    config
}

fn map_request(credential: &str) -> DumpRequest {
    DumpRequest {
        destination: None,
        credential: Some(credential.to_string()),
        redaction: Some(RedactionRequest {
            map: Some("pin:0".into()),
            ..RedactionRequest::new("map")
        }),
    }
}

#[test]
fn eight_byte_salt_authorizes_the_requested_redaction() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let heap = app_heap(IdSize::Eight);

    let summary = dump_heap(&heap, &map_request("secret,01234567"), &config).unwrap();
    assert_eq!(summary.source, PolicySource::Request);
    assert_eq!(summary.redaction, RedactionMode::Map);
    assert_eq!(summary.path, dir.path().join("heap.bin"));
    assert_eq!(summary.stats.redacted_fields, 2);

    let contents = parse_dump(&std::fs::read(&summary.path).unwrap()).unwrap();
    assert_eq!(contents.instance_field(ALICE, None, "pin"), Some(Value::Long(0)));
}

#[test]
fn seven_byte_salt_falls_back_to_the_configured_policy() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let heap = app_heap(IdSize::Eight);

    let summary = dump_heap(&heap, &map_request("secret,1234567"), &config).unwrap();
    assert_eq!(summary.source, PolicySource::Environment);
    assert_eq!(summary.redaction, RedactionMode::Off);
    assert_eq!(summary.stats.redacted_fields, 0);
    assert_eq!(std::fs::read(&summary.path).unwrap(), dump_bytes(&heap, None));
}

#[test]
fn denied_request_uses_the_configured_redaction() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.redaction.mode = "annotation".into();
    config.redaction.classpath = Some("java".into());

    let summary =
        dump_heap(&app_heap(IdSize::Eight), &map_request("wrong,01234567"), &config).unwrap();
    assert_eq!(summary.source, PolicySource::Environment);
    assert_eq!(summary.redaction, RedactionMode::Annotation);

    let contents = parse_dump(&std::fs::read(&summary.path).unwrap()).unwrap();
    assert_eq!(contents.instance_field(ALICE, None, "age"), Some(Value::Int(0)));
    assert_eq!(contents.instance_field(ALICE, None, "pin"), Some(Value::Long(0)));
}

#[test]
fn annotation_without_any_classpath_dumps_unredacted() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let heap = app_heap(IdSize::Eight);
    let request = DumpRequest {
        destination: Some(dir.path().join("annotated.hprof")),
        credential: Some("secret,01234567".into()),
        redaction: Some(RedactionRequest::new("annotation")),
    };

    let summary = dump_heap(&heap, &request, &config).unwrap();
    assert_eq!(summary.source, PolicySource::Request);
    assert_eq!(summary.redaction, RedactionMode::Off);
    assert_eq!(std::fs::read(&summary.path).unwrap(), dump_bytes(&heap, None));
}

#[test]
fn summary_serializes_for_tooling() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let summary = dump_heap(&app_heap(IdSize::Four), &DumpRequest::default(), &config).unwrap();
    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["redaction"], "off");
    assert_eq!(json["source"], "environment");
    assert_eq!(json["stats"]["instances"], 3);
}

struct DetachedHeap;

impl HeapView for DetachedHeap {
    fn id_size(&self) -> IdSize {
        IdSize::Eight
    }

    fn timestamp_millis(&self) -> u64 {
        0
    }

    fn roots(&self) -> Result<Vec<GcRoot>> {
        Err(HprofError::RuntimeUnavailable("process detached".into()))
    }

    fn class(&self, _id: ObjectId) -> Result<Option<ClassInfo>> {
        Ok(None)
    }

    fn object(&self, _id: ObjectId) -> Result<Option<HeapObject>> {
        Ok(None)
    }
}

#[test]
fn unavailable_runtime_fails_before_creating_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let err = dump_heap(&DetachedHeap, &DumpRequest::default(), &config).unwrap_err();
    assert!(matches!(err, HprofError::RuntimeUnavailable(_)), "{err}");
    assert!(!config.dump.default_path.exists());
}
