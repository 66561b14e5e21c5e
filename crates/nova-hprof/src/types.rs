use std::fmt;

use serde::{Deserialize, Serialize};

/// Heap object identifier. `0` is the null reference.
pub type ObjectId = u64;

pub const NULL_ID: ObjectId = 0;

/// Width of object identifiers in the dump file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum IdSize {
    Four,
    Eight,
}

impl IdSize {
    pub fn bytes(self) -> usize {
        match self {
            IdSize::Four => 4,
            IdSize::Eight => 8,
        }
    }
}

impl Default for IdSize {
    fn default() -> Self {
        IdSize::Eight
    }
}

impl TryFrom<u32> for IdSize {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            4 => Ok(IdSize::Four),
            8 => Ok(IdSize::Eight),
            other => Err(format!("unsupported identifier size: {other}")),
        }
    }
}

impl From<IdSize> for u32 {
    fn from(value: IdSize) -> Self {
        value.bytes() as u32
    }
}

/// HPROF basic type tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BasicType {
    Object,
    Boolean,
    Char,
    Float,
    Double,
    Byte,
    Short,
    Int,
    Long,
}

impl BasicType {
    pub fn tag(self) -> u8 {
        match self {
            BasicType::Object => 2,
            BasicType::Boolean => 4,
            BasicType::Char => 5,
            BasicType::Float => 6,
            BasicType::Double => 7,
            BasicType::Byte => 8,
            BasicType::Short => 9,
            BasicType::Int => 10,
            BasicType::Long => 11,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        let ty = match tag {
            2 => BasicType::Object,
            4 => BasicType::Boolean,
            5 => BasicType::Char,
            6 => BasicType::Float,
            7 => BasicType::Double,
            8 => BasicType::Byte,
            9 => BasicType::Short,
            10 => BasicType::Int,
            11 => BasicType::Long,
            _ => return None,
        };
        Some(ty)
    }

    /// Serialized width in bytes.
    pub fn width(self, id_size: IdSize) -> usize {
        match self {
            BasicType::Object => id_size.bytes(),
            BasicType::Boolean | BasicType::Byte => 1,
            BasicType::Char | BasicType::Short => 2,
            BasicType::Float | BasicType::Int => 4,
            BasicType::Double | BasicType::Long => 8,
        }
    }

    pub fn is_primitive(self) -> bool {
        self != BasicType::Object
    }

    /// Java source spelling, used for array class names such as `char[]`.
    pub fn java_name(self) -> &'static str {
        match self {
            BasicType::Object => "java.lang.Object",
            BasicType::Boolean => "boolean",
            BasicType::Char => "char",
            BasicType::Float => "float",
            BasicType::Double => "double",
            BasicType::Byte => "byte",
            BasicType::Short => "short",
            BasicType::Int => "int",
            BasicType::Long => "long",
        }
    }
}

impl fmt::Display for BasicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.java_name())
    }
}

/// A single field or static value.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Value {
    Object(ObjectId),
    Boolean(bool),
    Char(u16),
    Float(f32),
    Double(f64),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
}

impl Value {
    pub fn basic_type(&self) -> BasicType {
        match self {
            Value::Object(_) => BasicType::Object,
            Value::Boolean(_) => BasicType::Boolean,
            Value::Char(_) => BasicType::Char,
            Value::Float(_) => BasicType::Float,
            Value::Double(_) => BasicType::Double,
            Value::Byte(_) => BasicType::Byte,
            Value::Short(_) => BasicType::Short,
            Value::Int(_) => BasicType::Int,
            Value::Long(_) => BasicType::Long,
        }
    }

    pub fn object_id(&self) -> Option<ObjectId> {
        match *self {
            Value::Object(id) => Some(id),
            _ => None,
        }
    }

    /// The all-zero value of `ty` (null for references).
    pub fn zero(ty: BasicType) -> Self {
        match ty {
            BasicType::Object => Value::Object(NULL_ID),
            BasicType::Boolean => Value::Boolean(false),
            BasicType::Char => Value::Char(0),
            BasicType::Float => Value::Float(0.0),
            BasicType::Double => Value::Double(0.0),
            BasicType::Byte => Value::Byte(0),
            BasicType::Short => Value::Short(0),
            BasicType::Int => Value::Int(0),
            BasicType::Long => Value::Long(0),
        }
    }

    /// Parses `raw` as a value of type `ty`.
    ///
    /// References never parse: a textual substitute cannot name a heap object.
    pub fn parse_as(ty: BasicType, raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let value = match ty {
            BasicType::Object => return None,
            BasicType::Boolean => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" => Value::Boolean(true),
                "false" | "0" => Value::Boolean(false),
                _ => return None,
            },
            BasicType::Char => Value::Char(raw.encode_utf16().next()?),
            BasicType::Float => Value::Float(raw.parse().ok()?),
            BasicType::Double => Value::Double(raw.parse().ok()?),
            BasicType::Byte => Value::Byte(raw.parse().ok()?),
            BasicType::Short => Value::Short(raw.parse().ok()?),
            BasicType::Int => Value::Int(raw.parse().ok()?),
            BasicType::Long => Value::Long(raw.parse().ok()?),
        };
        Some(value)
    }
}

/// Elements of a primitive array, one vector per element type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveArray {
    Boolean(Vec<bool>),
    Char(Vec<u16>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Byte(Vec<i8>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Long(Vec<i64>),
}

impl PrimitiveArray {
    pub fn element_type(&self) -> BasicType {
        match self {
            PrimitiveArray::Boolean(_) => BasicType::Boolean,
            PrimitiveArray::Char(_) => BasicType::Char,
            PrimitiveArray::Float(_) => BasicType::Float,
            PrimitiveArray::Double(_) => BasicType::Double,
            PrimitiveArray::Byte(_) => BasicType::Byte,
            PrimitiveArray::Short(_) => BasicType::Short,
            PrimitiveArray::Int(_) => BasicType::Int,
            PrimitiveArray::Long(_) => BasicType::Long,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PrimitiveArray::Boolean(v) => v.len(),
            PrimitiveArray::Char(v) => v.len(),
            PrimitiveArray::Float(v) => v.len(),
            PrimitiveArray::Double(v) => v.len(),
            PrimitiveArray::Byte(v) => v.len(),
            PrimitiveArray::Short(v) => v.len(),
            PrimitiveArray::Int(v) => v.len(),
            PrimitiveArray::Long(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// An all-zero array of the given type and length.
    pub fn zeroed(ty: BasicType, len: usize) -> Option<Self> {
        let array = match ty {
            BasicType::Object => return None,
            BasicType::Boolean => PrimitiveArray::Boolean(vec![false; len]),
            BasicType::Char => PrimitiveArray::Char(vec![0; len]),
            BasicType::Float => PrimitiveArray::Float(vec![0.0; len]),
            BasicType::Double => PrimitiveArray::Double(vec![0.0; len]),
            BasicType::Byte => PrimitiveArray::Byte(vec![0; len]),
            BasicType::Short => PrimitiveArray::Short(vec![0; len]),
            BasicType::Int => PrimitiveArray::Int(vec![0; len]),
            BasicType::Long => PrimitiveArray::Long(vec![0; len]),
        };
        Some(array)
    }
}

/// Instance field as laid out inside its declaring class.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub ty: BasicType,
    /// Byte offset inside the declaring class's slice of an instance dump.
    pub offset: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StaticField {
    pub name: String,
    pub value: Value,
}

/// How an object is anchored by the host runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RootKind {
    Unknown,
    JniGlobal,
    JniLocal { thread_serial: u32, frame: u32 },
    JavaFrame { thread_serial: u32, frame: u32 },
    StickyClass,
    MonitorUsed,
    ThreadObject { thread_serial: u32, stack_serial: u32 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassRecord {
    pub id: ObjectId,
    /// Binary name, e.g. `java.lang.String` or `java.lang.Object[]`.
    pub name: String,
    /// `None` only for the root of the hierarchy.
    pub super_id: Option<ObjectId>,
    pub loader_id: ObjectId,
    pub instance_size: u32,
    pub instance_fields: Vec<FieldDescriptor>,
    pub static_fields: Vec<StaticField>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InstanceRecord {
    pub id: ObjectId,
    pub class_id: ObjectId,
    /// Own class fields first, then each superclass up to the root.
    pub values: Vec<Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ObjectArrayRecord {
    pub id: ObjectId,
    pub class_id: ObjectId,
    pub elements: Vec<ObjectId>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PrimitiveArrayRecord {
    pub id: ObjectId,
    pub values: PrimitiveArray,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RootRecord {
    pub kind: RootKind,
    pub object_id: ObjectId,
}

/// One unit of a heap snapshot, produced by the walker and consumed by the writer.
#[derive(Clone, Debug, PartialEq)]
pub enum HeapSnapshotRecord {
    Class(ClassRecord),
    Instance(InstanceRecord),
    ObjectArray(ObjectArrayRecord),
    PrimitiveArray(PrimitiveArrayRecord),
    Root(RootRecord),
}

impl HeapSnapshotRecord {
    pub fn id(&self) -> ObjectId {
        match self {
            HeapSnapshotRecord::Class(r) => r.id,
            HeapSnapshotRecord::Instance(r) => r.id,
            HeapSnapshotRecord::ObjectArray(r) => r.id,
            HeapSnapshotRecord::PrimitiveArray(r) => r.id,
            HeapSnapshotRecord::Root(r) => r.object_id,
        }
    }
}

/// Converts a binary class name (`com.example.Foo`, `int[]`, `java.lang.Object[][]`) into the
/// internal form written to HPROF name records (`com/example/Foo`, `[I`, `[[Ljava/lang/Object;`).
pub fn binary_name_to_internal(name: &str) -> String {
    let mut base = name;
    let mut dims = 0;
    while let Some(stripped) = base.strip_suffix("[]") {
        base = stripped;
        dims += 1;
    }
    if dims == 0 {
        return name.replace('.', "/");
    }

    let element = match base {
        "boolean" => "Z".to_string(),
        "char" => "C".to_string(),
        "float" => "F".to_string(),
        "double" => "D".to_string(),
        "byte" => "B".to_string(),
        "short" => "S".to_string(),
        "int" => "I".to_string(),
        "long" => "J".to_string(),
        other => format!("L{};", other.replace('.', "/")),
    };
    format!("{}{element}", "[".repeat(dims))
}
