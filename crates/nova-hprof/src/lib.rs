//! Heap dumps with policy-driven redaction for Nova.
//!
//! A paused heap, exposed through [`HeapView`], is walked breadth-first from its GC roots by
//! [`ObjectGraphWalker`] and streamed by the [`writer`] into an HPROF 1.0.2 file. On the way
//! out every field and array passes through a [`RedactionPolicy`]. Redaction keeps types and
//! widths, so a redacted dump has the same layout as an unredacted one.
//!
//! An explicit redaction request is only honored when the [`auth`] gate accepts the supplied
//! `password,salt` credential; otherwise [`dump_heap`] falls back to the configured policy.
//! [`inspect`] reads dumps back for verification.

pub mod auth;
pub mod codec;
pub mod config;
mod dump;
mod error;
pub mod heap;
pub mod inspect;
pub mod policy;
mod types;
pub mod walker;
pub mod writer;

pub use auth::{authorize, is_authorized, Authorization, Credential, MIN_SALT_LEN};
pub use config::{init_tracing, HprofConfig, LoggingConfig};
pub use dump::{dump_heap, select_policy, DumpRequest, DumpSummary, PolicySource, RedactionRequest};
pub use error::{AuthorizationError, ConfigError, HprofError, Result};
pub use heap::{ClassInfo, FieldInfo, GcRoot, HeapObject, HeapSnapshot, HeapView, StaticValue};
pub use inspect::{parse_dump, DanglingReference, DumpContents, InspectSummary};
pub use policy::{Redaction, RedactionMap, RedactionMode, RedactionPolicy};
pub use types::*;
pub use walker::ObjectGraphWalker;
pub use writer::{write_dump, write_dump_to, DumpOptions, DumpStats, DumpWriter};
