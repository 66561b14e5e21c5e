//! The host-runtime side of a dump.
//!
//! A [`HeapView`] is a consistent, paused view of a process heap. Producing one (attaching to a
//! live process, reading a core file) is the host's job; the walker only consumes it.
//! [`HeapSnapshot`] is an owned in-memory implementation that can be loaded from JSON.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HprofError, Result};
use crate::types::{BasicType, IdSize, ObjectId, PrimitiveArray, RootKind, Value};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: BasicType,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StaticValue {
    pub name: String,
    pub value: Value,
}

/// Class metadata as reported by the runtime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub id: ObjectId,
    pub name: String,
    #[serde(default)]
    pub super_id: Option<ObjectId>,
    #[serde(default)]
    pub loader_id: ObjectId,
    /// Declared instance fields, in declaration order (superclass fields excluded).
    #[serde(default)]
    pub instance_fields: Vec<FieldInfo>,
    #[serde(default)]
    pub static_fields: Vec<StaticValue>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HeapObject {
    Instance {
        class_id: ObjectId,
        /// Own class fields first, then each superclass up to the root.
        #[serde(default)]
        fields: Vec<Value>,
    },
    ObjectArray {
        class_id: ObjectId,
        #[serde(default)]
        elements: Vec<ObjectId>,
    },
    PrimitiveArray {
        values: PrimitiveArray,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcRoot {
    #[serde(flatten)]
    pub kind: RootKind,
    pub object_id: ObjectId,
}

/// Read access to a frozen heap.
///
/// Implementations must keep the view consistent for the lifetime of a walk; the walker does
/// no synchronization of its own.
pub trait HeapView {
    fn id_size(&self) -> IdSize;

    /// Capture time written into the dump header.
    fn timestamp_millis(&self) -> u64;

    /// Root set in the runtime's enumeration order.
    fn roots(&self) -> Result<Vec<GcRoot>>;

    /// Class metadata for a class object id.
    fn class(&self, id: ObjectId) -> Result<Option<ClassInfo>>;

    /// A non-class heap object.
    fn object(&self, id: ObjectId) -> Result<Option<HeapObject>>;

    fn contains(&self, id: ObjectId) -> Result<bool> {
        Ok(self.class(id)?.is_some() || self.object(id)?.is_some())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct SnapshotObject {
    id: ObjectId,
    #[serde(flatten)]
    object: HeapObject,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct SnapshotFile {
    #[serde(default)]
    id_size: IdSize,
    #[serde(default)]
    timestamp_millis: u64,
    #[serde(default)]
    classes: Vec<ClassInfo>,
    #[serde(default)]
    objects: Vec<SnapshotObject>,
    #[serde(default)]
    roots: Vec<GcRoot>,
}

/// Owned heap image.
#[derive(Clone, Debug, Default)]
pub struct HeapSnapshot {
    id_size: IdSize,
    timestamp_millis: u64,
    classes: BTreeMap<ObjectId, ClassInfo>,
    objects: BTreeMap<ObjectId, HeapObject>,
    roots: Vec<GcRoot>,
}

impl HeapSnapshot {
    pub fn new(id_size: IdSize) -> Self {
        Self {
            id_size,
            ..Self::default()
        }
    }

    pub fn with_timestamp(mut self, timestamp_millis: u64) -> Self {
        self.timestamp_millis = timestamp_millis;
        self
    }

    pub fn add_class(&mut self, class: ClassInfo) -> &mut Self {
        self.classes.insert(class.id, class);
        self
    }

    pub fn add_object(&mut self, id: ObjectId, object: HeapObject) -> &mut Self {
        self.objects.insert(id, object);
        self
    }

    pub fn add_root(&mut self, kind: RootKind, object_id: ObjectId) -> &mut Self {
        self.roots.push(GcRoot { kind, object_id });
        self
    }

    pub fn from_json_str(text: &str) -> std::result::Result<Self, serde_json::Error> {
        let file: SnapshotFile = serde_json::from_str(text)?;
        Ok(Self::from_file(file))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| HprofError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text).map_err(|source| HprofError::Json {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn to_json_string(&self) -> std::result::Result<String, serde_json::Error> {
        let file = SnapshotFile {
            id_size: self.id_size,
            timestamp_millis: self.timestamp_millis,
            classes: self.classes.values().cloned().collect(),
            objects: self
                .objects
                .iter()
                .map(|(&id, object)| SnapshotObject {
                    id,
                    object: object.clone(),
                })
                .collect(),
            roots: self.roots.clone(),
        };
        serde_json::to_string_pretty(&file)
    }

    fn from_file(file: SnapshotFile) -> Self {
        Self {
            id_size: file.id_size,
            timestamp_millis: file.timestamp_millis,
            classes: file.classes.into_iter().map(|c| (c.id, c)).collect(),
            objects: file.objects.into_iter().map(|o| (o.id, o.object)).collect(),
            roots: file.roots,
        }
    }
}

impl HeapView for HeapSnapshot {
    fn id_size(&self) -> IdSize {
        self.id_size
    }

    fn timestamp_millis(&self) -> u64 {
        self.timestamp_millis
    }

    fn roots(&self) -> Result<Vec<GcRoot>> {
        Ok(self.roots.clone())
    }

    fn class(&self, id: ObjectId) -> Result<Option<ClassInfo>> {
        Ok(self.classes.get(&id).cloned())
    }

    fn object(&self, id: ObjectId) -> Result<Option<HeapObject>> {
        Ok(self.objects.get(&id).cloned())
    }

    fn contains(&self, id: ObjectId) -> Result<bool> {
        Ok(self.classes.contains_key(&id) || self.objects.contains_key(&id))
    }
}
