use std::io::{self, Write};

use nova_hprof::{
    parse_dump, write_dump, write_dump_to, DumpOptions, HprofError, IdSize, RedactionPolicy,
    RootKind, Value, NULL_ID,
};
use pretty_assertions::assert_eq;

use super::fixtures::*;

#[test]
fn dump_has_no_dangling_references() {
    for id_size in [IdSize::Four, IdSize::Eight] {
        let contents = parse_dump(&dump_bytes(&app_heap(id_size), None)).unwrap();
        assert_eq!(contents.dangling_references(), Vec::new(), "{id_size:?}");
        assert!(contents.complete);
    }
}

#[test]
fn unresolvable_references_become_null_and_their_roots_disappear() {
    let contents = parse_dump(&dump_bytes(&app_heap(IdSize::Eight), None)).unwrap();

    assert_eq!(
        contents.instance_field(ROOT_ADMIN, Some("com.example.User"), "name"),
        Some(Value::Object(NULL_ID))
    );
    assert_eq!(
        contents.object_arrays[&USERS].elements,
        vec![ALICE, ROOT_ADMIN, NULL_ID]
    );
    let root_targets: Vec<_> = contents.roots.iter().map(|root| root.object_id).collect();
    assert_eq!(root_targets, vec![USERS, ALICE, USER]);
    assert_eq!(contents.roots[2].kind, RootKind::StickyClass);
}

#[test]
fn every_reachable_object_is_written_once() {
    let contents = parse_dump(&dump_bytes(&app_heap(IdSize::Eight), None)).unwrap();
    let summary = contents.summary();
    assert_eq!(summary.classes, 5);
    assert_eq!(summary.instances, 3);
    assert_eq!(summary.object_arrays, 1);
    assert_eq!(summary.primitive_arrays, 2);
    assert_eq!(summary.roots, 3);
    assert_eq!(contents.loaded_classes.len(), 5);
    assert_eq!(contents.class_name(OBJECT_ARRAY), Some("[Ljava/lang/Object;"));
}

#[test]
fn instance_fields_are_laid_out_own_class_first() {
    let contents = parse_dump(&dump_bytes(&app_heap(IdSize::Eight), None)).unwrap();
    let values: Vec<_> = contents
        .instance_values(ROOT_ADMIN)
        .unwrap()
        .into_iter()
        .map(|(_, name, value)| (name, value))
        .collect();
    assert_eq!(
        values,
        vec![
            ("level".to_string(), Value::Short(7)),
            ("name".to_string(), Value::Object(NULL_ID)),
            ("age".to_string(), Value::Int(40)),
            ("password".to_string(), Value::Object(NULL_ID)),
            ("pin".to_string(), Value::Long(9)),
            ("active".to_string(), Value::Boolean(false)),
        ]
    );
    // short + id + int + id + long + boolean
    assert_eq!(contents.instances[&ROOT_ADMIN].data.len(), 2 + 8 + 4 + 8 + 8 + 1);
}

#[test]
fn off_policy_is_byte_identical_to_no_policy() {
    let heap = app_heap(IdSize::Eight);
    assert_eq!(
        dump_bytes(&heap, Some(&RedactionPolicy::Off)),
        dump_bytes(&heap, None)
    );
    let unknown = RedactionPolicy::resolve("scramble", None, None, None);
    assert_eq!(dump_bytes(&heap, Some(&unknown)), dump_bytes(&heap, None));
}

#[test]
fn dumping_the_same_heap_twice_is_deterministic() {
    let heap = app_heap(IdSize::Four);
    let policy = RedactionPolicy::resolve("annotation", Some("java"), None, None);
    assert_eq!(dump_bytes(&heap, Some(&policy)), dump_bytes(&heap, Some(&policy)));
    assert_eq!(dump_bytes(&heap, None), dump_bytes(&heap, None));
}

#[test]
fn small_segments_produce_the_same_heap() {
    let heap = app_heap(IdSize::Eight);
    let mut segmented = Vec::new();
    write_dump_to(
        &heap,
        &mut segmented,
        None,
        DumpOptions { segment_size: 64 },
    )
    .unwrap();

    let small = parse_dump(&segmented).unwrap();
    let large = parse_dump(&dump_bytes(&heap, None)).unwrap();
    assert!(small.segments > large.segments);
    assert_eq!(small.summary().instances, large.summary().instances);
    assert_eq!(small.instances, large.instances);
    assert_eq!(small.roots, large.roots);
}

/// Accepts `limit` bytes, then fails every write.
struct FailAfter {
    limit: usize,
    written: Vec<u8>,
}

impl Write for FailAfter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = self.limit - self.written.len();
        if room == 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        let n = room.min(buf.len());
        self.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn write_failure_leaves_a_prefix_of_the_full_dump() {
    let heap = app_heap(IdSize::Eight);
    let full = dump_bytes(&heap, None);
    let mut sink = FailAfter {
        limit: full.len() / 2,
        written: Vec::new(),
    };

    let err = write_dump_to(&heap, &mut sink, None, DumpOptions::default()).unwrap_err();
    assert!(matches!(err, HprofError::Write(_)), "{err}");
    assert_eq!(sink.written.len(), full.len() / 2);
    assert_eq!(sink.written[..], full[..sink.written.len()]);
}

#[test]
fn unopenable_destination_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("heap.bin");
    let err =
        write_dump(&app_heap(IdSize::Eight), &path, None, DumpOptions::default()).unwrap_err();
    match err {
        HprofError::Io { path: reported, .. } => assert!(reported.ends_with("heap.bin")),
        other => panic!("unexpected error: {other}"),
    }
}

#[cfg(target_os = "linux")]
#[test]
fn failed_file_write_reports_the_destination() {
    let path = std::path::Path::new("/dev/full");
    let options = DumpOptions { segment_size: 64 };
    let err = write_dump(&app_heap(IdSize::Eight), path, None, options).unwrap_err();
    match err {
        HprofError::Io {
            path: reported,
            source,
        } => {
            assert_eq!(reported, "/dev/full");
            assert_eq!(source.raw_os_error(), Some(28), "{source}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn file_dump_matches_in_memory_dump() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("heap.bin");
    let heap = app_heap(IdSize::Eight);
    let stats = write_dump(&heap, &path, None, DumpOptions::default()).unwrap();

    let on_disk = std::fs::read(&path).unwrap();
    assert_eq!(on_disk, dump_bytes(&heap, None));
    assert_eq!(stats.bytes_written, on_disk.len() as u64);
}
