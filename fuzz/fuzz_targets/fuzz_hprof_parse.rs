// Run locally (from the repo root):
//   cargo +nightly fuzz run fuzz_hprof_parse -- -runs=1000
#![no_main]

use libfuzzer_sys::fuzz_target;

mod utils;

fuzz_target!(|data: &[u8]| {
    let cap = data.len().min(utils::MAX_INPUT_SIZE);
    // Oracle: must never panic on malformed input. Errors are expected.
    if let Ok(contents) = nova_hprof::parse_dump(&data[..cap]) {
        let _ = contents.summary();
        let _ = contents.dangling_references();
    }
});
