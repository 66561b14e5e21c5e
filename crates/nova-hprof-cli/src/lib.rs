//! Library wrapper around the `nova-hprof` CLI implementation.
//!
//! Compiling the binary crate root (`main.rs`) as a module lets `cargo test -p nova-hprof-cli
//! --lib` typecheck the CLI without building the integration test binaries.
//!
//! Note: `fn main()` inside `main.rs` is just another function when compiled as a module.

#[allow(dead_code)]
#[path = "main.rs"]
mod main_bin;
