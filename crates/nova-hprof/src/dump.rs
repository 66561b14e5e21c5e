//! End-to-end dump entry point: authorization, policy selection, walk and write.

use std::path::PathBuf;

use serde::Serialize;

use crate::auth::{authorize, Authorization};
use crate::config::{HprofConfig, RedactionConfig};
use crate::error::Result;
use crate::heap::HeapView;
use crate::policy::{RedactionMode, RedactionPolicy};
use crate::writer::{write_dump, DumpStats};

/// Redaction explicitly requested by the caller of a dump.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RedactionRequest {
    pub mode: String,
    /// Falls back to the configured classpath when unset.
    pub classpath: Option<String>,
    pub map: Option<String>,
    pub map_file: Option<PathBuf>,
}

impl RedactionRequest {
    pub fn new(mode: impl Into<String>) -> Self {
        Self {
            mode: mode.into(),
            ..Self::default()
        }
    }

    fn policy(&self, configured: &RedactionConfig) -> RedactionPolicy {
        let classpath = self
            .classpath
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(configured.classpath.as_deref());
        RedactionPolicy::resolve(
            &self.mode,
            classpath,
            self.map.as_deref(),
            self.map_file.as_deref(),
        )
    }
}

#[derive(Clone, Debug, Default)]
pub struct DumpRequest {
    /// Output path; the configured default when `None`.
    pub destination: Option<PathBuf>,
    /// `password,salt`, required for `redaction` to take effect.
    pub credential: Option<String>,
    pub redaction: Option<RedactionRequest>,
}

/// Where the policy of a finished dump came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicySource {
    Environment,
    Request,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DumpSummary {
    pub path: PathBuf,
    pub redaction: RedactionMode,
    pub source: PolicySource,
    pub stats: DumpStats,
}

/// Selects the policy for `request`.
///
/// An explicit redaction only applies once the authorization gate grants it; otherwise the
/// configured redaction is used.
pub fn select_policy(
    request: &DumpRequest,
    config: &HprofConfig,
) -> (RedactionPolicy, PolicySource) {
    let authorization = authorize(
        request.redaction.is_some(),
        request.credential.as_deref(),
        config.redaction.password.as_deref(),
    );
    match (authorization, request.redaction.as_ref()) {
        (Ok(Authorization::Granted), Some(redaction)) => {
            (redaction.policy(&config.redaction), PolicySource::Request)
        }
        (Ok(_), _) => (config.redaction.policy(), PolicySource::Environment),
        (Err(err), _) => {
            tracing::warn!(
                target: "nova.hprof",
                error = %err,
                "redaction request not authorized; using configured redaction"
            );
            (config.redaction.policy(), PolicySource::Environment)
        }
    }
}

/// Dumps `heap` as described by `request`.
///
/// Only runtime and I/O failures are errors; configuration and authorization problems are
/// logged and resolved to a fallback policy.
pub fn dump_heap(
    heap: &dyn HeapView,
    request: &DumpRequest,
    config: &HprofConfig,
) -> Result<DumpSummary> {
    let (policy, source) = select_policy(request, config);
    let path = request
        .destination
        .clone()
        .unwrap_or_else(|| config.dump.default_path.clone());

    tracing::debug!(
        target: "nova.hprof",
        path = %path.display(),
        redaction = %policy,
        source = ?source,
        "starting heap dump"
    );
    let stats = write_dump(heap, &path, Some(&policy), config.dump.options())?;

    Ok(DumpSummary {
        path,
        redaction: policy.mode(),
        source,
        stats,
    })
}
