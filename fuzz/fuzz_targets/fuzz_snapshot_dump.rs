// Run locally (from the repo root):
//   cargo +nightly fuzz run fuzz_snapshot_dump -- -runs=1000
#![no_main]

use libfuzzer_sys::fuzz_target;
use nova_hprof::{parse_dump, write_dump_to, DumpOptions, HeapSnapshot, RedactionPolicy};

mod utils;

fuzz_target!(|data: &[u8]| {
    let Some(text) = utils::truncate_utf8(data) else {
        return;
    };
    let Ok(heap) = HeapSnapshot::from_json_str(text) else {
        return;
    };

    let policy = RedactionPolicy::resolve("annotation", Some("java"), None, None);
    let mut plain = Vec::new();
    let mut redacted = Vec::new();
    let options = DumpOptions { segment_size: 256 };
    let plain_ok = write_dump_to(&heap, &mut plain, None, options).is_ok();
    let redacted_ok = write_dump_to(&heap, &mut redacted, Some(&policy), options).is_ok();
    assert_eq!(plain_ok, redacted_ok, "redaction changed whether the heap could be dumped");
    if !plain_ok {
        return;
    }

    // Oracle: a successful dump parses, never dangles, and redaction never changes its size.
    assert_eq!(plain.len(), redacted.len());
    let contents = parse_dump(&plain).expect("writer output parses");
    assert!(contents.dangling_references().is_empty());
});
