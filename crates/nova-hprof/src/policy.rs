//! Redaction policy: which values of a dump get replaced, and with what.
//!
//! Policies are resolved once from configuration before a walk starts and are immutable while
//! it runs. Resolution never fails: malformed input degrades to [`RedactionPolicy::Off`] and is
//! reported through `tracing`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{BasicType, ObjectId, PrimitiveArray, Value, NULL_ID};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedactionMode {
    Off,
    Annotation,
    Map,
    Unknown,
}

impl RedactionMode {
    /// Parses an operator-supplied mode name. Unrecognized names map to `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "off" | "none" => RedactionMode::Off,
            "annotation" => RedactionMode::Annotation,
            "map" => RedactionMode::Map,
            _ => RedactionMode::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RedactionMode::Off => "off",
            RedactionMode::Annotation => "annotation",
            RedactionMode::Map => "map",
            RedactionMode::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RedactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision for a single field or array.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Redaction {
    PassThrough,
    /// Replace with the zero value of the declared type.
    Sentinel,
    /// Replace with an operator-configured value.
    Substitute(String),
}

impl Redaction {
    pub fn is_pass_through(&self) -> bool {
        matches!(self, Redaction::PassThrough)
    }

    /// Applies the decision to a scalar, keeping its type (and therefore its width).
    pub fn redact_value(&self, value: Value) -> Value {
        let ty = value.basic_type();
        match self {
            Redaction::PassThrough => value,
            Redaction::Sentinel => Value::zero(ty),
            Redaction::Substitute(raw) => {
                Value::parse_as(ty, raw).unwrap_or_else(|| Value::zero(ty))
            }
        }
    }

    /// Applies the decision to primitive array contents. The length never changes.
    pub fn redact_primitive_array(&self, values: &PrimitiveArray) -> PrimitiveArray {
        let len = values.len();
        let ty = values.element_type();
        let raw = match self {
            Redaction::PassThrough => return values.clone(),
            Redaction::Sentinel => return zeroed(ty, len),
            Redaction::Substitute(raw) => raw,
        };

        match values {
            PrimitiveArray::Byte(_) => {
                let mut out = vec![0i8; len];
                for (slot, byte) in out.iter_mut().zip(raw.bytes()) {
                    *slot = byte as i8;
                }
                PrimitiveArray::Byte(out)
            }
            PrimitiveArray::Char(_) => {
                let mut out = vec![0u16; len];
                for (slot, unit) in out.iter_mut().zip(raw.encode_utf16()) {
                    *slot = unit;
                }
                PrimitiveArray::Char(out)
            }
            _ => match Value::parse_as(ty, raw) {
                Some(scalar) => repeated(scalar, len),
                None => zeroed(ty, len),
            },
        }
    }

    /// Applies the decision to object array elements; any redaction nulls every element.
    pub fn redact_object_elements(&self, elements: &[ObjectId]) -> Vec<ObjectId> {
        match self {
            Redaction::PassThrough => elements.to_vec(),
            Redaction::Sentinel | Redaction::Substitute(_) => vec![NULL_ID; elements.len()],
        }
    }
}

fn zeroed(ty: BasicType, len: usize) -> PrimitiveArray {
    // Primitive arrays never carry `BasicType::Object`.
    PrimitiveArray::zeroed(ty, len).unwrap_or_else(|| PrimitiveArray::Byte(vec![0; len]))
}

fn repeated(scalar: Value, len: usize) -> PrimitiveArray {
    match scalar {
        Value::Boolean(v) => PrimitiveArray::Boolean(vec![v; len]),
        Value::Char(v) => PrimitiveArray::Char(vec![v; len]),
        Value::Float(v) => PrimitiveArray::Float(vec![v; len]),
        Value::Double(v) => PrimitiveArray::Double(vec![v; len]),
        Value::Byte(v) => PrimitiveArray::Byte(vec![v; len]),
        Value::Short(v) => PrimitiveArray::Short(vec![v; len]),
        Value::Int(v) => PrimitiveArray::Int(vec![v; len]),
        Value::Long(v) => PrimitiveArray::Long(vec![v; len]),
        Value::Object(_) => PrimitiveArray::Byte(vec![0; len]),
    }
}

/// `key -> replacement` entries for map-based redaction.
///
/// Keys are `fully.qualified.Class.field`, a bare `field` name, or an array class name such as
/// `char[]`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RedactionMap {
    entries: BTreeMap<String, String>,
}

impl RedactionMap {
    /// Parses the inline form: `key:value` entries separated by `,` or newlines.
    pub fn parse_inline(text: &str) -> Result<Self, ConfigError> {
        Self::parse_entries(text.split([',', '\n']), &[':'])
    }

    /// Parses the file form: one `key:value` or `key=value` entry per line, `#` comments.
    pub fn parse_file_contents(text: &str) -> Result<Self, ConfigError> {
        let lines = text
            .lines()
            .filter(|line| !line.trim_start().starts_with('#'));
        Self::parse_entries(lines, &[':', '='])
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse_file_contents(&text)
    }

    fn parse_entries<'a>(
        entries: impl Iterator<Item = &'a str>,
        separators: &[char],
    ) -> Result<Self, ConfigError> {
        let mut out = BTreeMap::new();
        for entry in entries {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let Some((key, value)) = entry.split_once(separators) else {
                return Err(ConfigError::MalformedMapEntry {
                    entry: entry.to_string(),
                });
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(ConfigError::MalformedMapEntry {
                    entry: entry.to_string(),
                });
            }
            out.insert(key.to_string(), value.trim().to_string());
        }
        Ok(Self { entries: out })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    fn lookup_field(&self, class: &str, field: &str) -> Option<&str> {
        self.get(&format!("{class}.{field}")).or_else(|| self.get(field))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A resolved redaction policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RedactionPolicy {
    Off,
    /// Values owned by classes outside `allowed_prefixes` are replaced.
    Annotation { allowed_prefixes: Vec<String> },
    /// Values named in the inline map (consulted first) or the map file are replaced.
    Map {
        inline: RedactionMap,
        file: RedactionMap,
    },
    /// The operator asked for a mode this tool does not know. Never redacts.
    Unknown { requested: String },
}

impl RedactionPolicy {
    pub fn off() -> Self {
        RedactionPolicy::Off
    }

    /// Resolves a policy from raw configuration, degrading to OFF on any configuration error.
    ///
    /// The map file, if any, is read here and cached in the returned policy.
    pub fn resolve(
        raw_mode: &str,
        classpath: Option<&str>,
        inline_map: Option<&str>,
        map_file: Option<&Path>,
    ) -> Self {
        match Self::try_resolve(raw_mode, classpath, inline_map, map_file) {
            Ok(policy) => policy,
            Err(err) => {
                tracing::warn!(
                    target: "nova.hprof",
                    mode = raw_mode,
                    error = %err,
                    "invalid redaction configuration; dumping without redaction"
                );
                RedactionPolicy::Off
            }
        }
    }

    /// Like [`RedactionPolicy::resolve`] but reports the configuration error instead of
    /// degrading.
    pub fn try_resolve(
        raw_mode: &str,
        classpath: Option<&str>,
        inline_map: Option<&str>,
        map_file: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        match RedactionMode::parse(raw_mode) {
            RedactionMode::Off => Ok(RedactionPolicy::Off),
            RedactionMode::Unknown => {
                tracing::warn!(
                    target: "nova.hprof",
                    error = %ConfigError::UnknownMode(raw_mode.trim().to_string()),
                    "redaction mode not recognized; no values will be redacted"
                );
                Ok(RedactionPolicy::Unknown {
                    requested: raw_mode.trim().to_string(),
                })
            }
            RedactionMode::Annotation => {
                let allowed_prefixes = parse_classpath(classpath.unwrap_or_default());
                if allowed_prefixes.is_empty() {
                    return Err(ConfigError::EmptyClasspath);
                }
                Ok(RedactionPolicy::Annotation { allowed_prefixes })
            }
            RedactionMode::Map => {
                let inline_map = inline_map.map(str::trim).filter(|s| !s.is_empty());
                if inline_map.is_none() && map_file.is_none() {
                    return Err(ConfigError::MissingMapSource);
                }
                let inline = match inline_map {
                    Some(text) => RedactionMap::parse_inline(text)?,
                    None => RedactionMap::default(),
                };
                let file = match map_file {
                    Some(path) => RedactionMap::load(path)?,
                    None => RedactionMap::default(),
                };
                if inline.is_empty() && file.is_empty() {
                    return Err(ConfigError::EmptyMap);
                }
                Ok(RedactionPolicy::Map { inline, file })
            }
        }
    }

    pub fn mode(&self) -> RedactionMode {
        match self {
            RedactionPolicy::Off => RedactionMode::Off,
            RedactionPolicy::Annotation { .. } => RedactionMode::Annotation,
            RedactionPolicy::Map { .. } => RedactionMode::Map,
            RedactionPolicy::Unknown { .. } => RedactionMode::Unknown,
        }
    }

    /// Whether this policy can redact anything at all.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RedactionPolicy::Annotation { .. } | RedactionPolicy::Map { .. }
        )
    }

    /// Decision for a field (instance or static) of type `ty` declared by `class`.
    pub fn should_redact(&self, class: &str, field: &str, ty: BasicType) -> Redaction {
        match self {
            RedactionPolicy::Off | RedactionPolicy::Unknown { .. } => Redaction::PassThrough,
            RedactionPolicy::Annotation { allowed_prefixes } => {
                // References stay intact so the dump keeps its graph shape.
                if ty.is_primitive() && !is_allowed(allowed_prefixes, class) {
                    Redaction::Sentinel
                } else {
                    Redaction::PassThrough
                }
            }
            RedactionPolicy::Map { inline, file } => inline
                .lookup_field(class, field)
                .or_else(|| file.lookup_field(class, field))
                .map_or(Redaction::PassThrough, |v| Redaction::Substitute(v.to_string())),
        }
    }

    /// Decision for the contents of an array whose class is `array_class` (e.g. `char[]`).
    pub fn should_redact_array(&self, array_class: &str, element: BasicType) -> Redaction {
        match self {
            RedactionPolicy::Off | RedactionPolicy::Unknown { .. } => Redaction::PassThrough,
            RedactionPolicy::Annotation { .. } => {
                // Primitive arrays belong to no package.
                if element.is_primitive() {
                    Redaction::Sentinel
                } else {
                    Redaction::PassThrough
                }
            }
            RedactionPolicy::Map { inline, file } => inline
                .get(array_class)
                .or_else(|| file.get(array_class))
                .map_or(Redaction::PassThrough, |v| Redaction::Substitute(v.to_string())),
        }
    }
}

impl fmt::Display for RedactionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mode().as_str())
    }
}

fn parse_classpath(raw: &str) -> Vec<String> {
    raw.split([',', ';', ':'])
        .map(|prefix| prefix.trim().replace('/', "."))
        .map(|prefix| prefix.trim_end_matches('.').to_string())
        .filter(|prefix| !prefix.is_empty())
        .collect()
}

fn is_allowed(prefixes: &[String], class: &str) -> bool {
    prefixes.iter().any(|prefix| {
        class
            .strip_prefix(prefix.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
    })
}
