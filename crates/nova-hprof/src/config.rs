//! Tool configuration: TOML file, environment overrides and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Layer;

use crate::error::ConfigError;
use crate::policy::RedactionPolicy;
use crate::writer::{DumpOptions, DEFAULT_SEGMENT_SIZE};

pub const ENV_REDACT: &str = "NOVA_HPROF_REDACT";
pub const ENV_REDACT_CLASSPATH: &str = "NOVA_HPROF_REDACT_CLASSPATH";
pub const ENV_REDACT_MAP: &str = "NOVA_HPROF_REDACT_MAP";
pub const ENV_REDACT_MAP_FILE: &str = "NOVA_HPROF_REDACT_MAP_FILE";
pub const ENV_REDACT_PASSWORD: &str = "NOVA_HPROF_REDACT_PASSWORD";
pub const ENV_LOG: &str = "NOVA_HPROF_LOG";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HprofConfig {
    #[serde(default)]
    pub dump: DumpConfig,
    /// Redaction applied when a dump request does not carry an authorized redaction of its own.
    #[serde(default)]
    pub redaction: RedactionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl HprofConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Overlays `NOVA_HPROF_*` values returned by `lookup`. Empty values clear optional settings.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let optional = |key: &str| {
            lookup(key).map(|v| Some(v.trim().to_owned()).filter(|v| !v.is_empty()))
        };

        if let Some(mode) = lookup(ENV_REDACT) {
            self.redaction.mode = mode.trim().to_owned();
        }
        if let Some(classpath) = optional(ENV_REDACT_CLASSPATH) {
            self.redaction.classpath = classpath;
        }
        if let Some(map) = optional(ENV_REDACT_MAP) {
            self.redaction.map = map;
        }
        if let Some(map_file) = optional(ENV_REDACT_MAP_FILE) {
            self.redaction.map_file = map_file.map(PathBuf::from);
        }
        // The secret is compared byte for byte, so it is never trimmed.
        if let Some(password) = lookup(ENV_REDACT_PASSWORD) {
            self.redaction.password = Some(password).filter(|v| !v.trim().is_empty());
        }
        if let Some(level) = lookup(ENV_LOG) {
            self.logging.level = level;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DumpConfig {
    /// Destination used when a request names none.
    #[serde(default = "DumpConfig::default_path")]
    pub default_path: PathBuf,
    #[serde(default = "DumpConfig::default_segment_size")]
    pub segment_size: usize,
}

impl DumpConfig {
    fn default_path() -> PathBuf {
        PathBuf::from("heap.bin")
    }

    fn default_segment_size() -> usize {
        DEFAULT_SEGMENT_SIZE
    }

    pub fn options(&self) -> DumpOptions {
        DumpOptions {
            segment_size: self.segment_size.max(1),
        }
    }
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            default_path: Self::default_path(),
            segment_size: Self::default_segment_size(),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedactionConfig {
    #[serde(default = "RedactionConfig::default_mode")]
    pub mode: String,
    /// Package prefixes exempt from annotation redaction.
    #[serde(default)]
    pub classpath: Option<String>,
    /// Inline `key:value` map.
    #[serde(default)]
    pub map: Option<String>,
    #[serde(default)]
    pub map_file: Option<PathBuf>,
    /// Secret that explicit redaction requests must present.
    #[serde(default)]
    pub password: Option<String>,
}

impl RedactionConfig {
    fn default_mode() -> String {
        "off".to_owned()
    }

    pub fn policy(&self) -> RedactionPolicy {
        RedactionPolicy::resolve(
            &self.mode,
            self.classpath.as_deref(),
            self.map.as_deref(),
            self.map_file.as_deref(),
        )
    }
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            mode: Self::default_mode(),
            classpath: None,
            map: None,
            map_file: None,
            password: None,
        }
    }
}

impl std::fmt::Debug for RedactionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedactionConfig")
            .field("mode", &self.mode)
            .field("classpath", &self.classpath)
            .field("map", &self.map)
            .field("map_file", &self.map_file)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// A level (`info`, `debug`, ...) or a full `EnvFilter` directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs in JSON format.
    #[serde(default)]
    pub json: bool,

    /// Append logs to this file in addition to stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// Effective filter: the configured level with `RUST_LOG` merged on top.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let config_directives = Self::normalize_level_directives(&self.level);

        match env_directives {
            Some(env_directives) => {
                let combined = format!("{config_directives},{env_directives}");
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            file: None,
        }
    }
}

static TRACING_INIT: Once = Once::new();

/// Installs the global tracing subscriber.
///
/// Only the first call has an effect. A log file that cannot be opened is skipped and
/// reported once the subscriber is up.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = config.env_filter();

        let file = config.file.as_ref().and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
        let file_failed = config.file.is_some() && file.is_none();

        let make_writer = match file {
            Some(file) => BoxMakeWriter::new(std::io::stderr.and(Arc::new(file))),
            None => BoxMakeWriter::new(std::io::stderr),
        };

        let layer: Box<dyn Layer<_> + Send + Sync> = if config.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(filter).with(layer);
        if tracing::subscriber::set_global_default(subscriber).is_ok() && file_failed {
            if let Some(path) = config.file.as_ref() {
                tracing::warn!(
                    target: "nova.hprof",
                    path = %path.display(),
                    "failed to open log file; logging to stderr only"
                );
            }
        }
    });
}
