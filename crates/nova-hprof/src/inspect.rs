//! Reader for dumps produced by [`crate::writer`].
//!
//! Decodes a complete HPROF byte stream into owned tables so a dump can be checked after the
//! fact: counts, field values, and the no-dangling-reference property.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::codec::{tag, HprofCursor, MAGIC};
use crate::error::{HprofError, Result};
use crate::types::{
    binary_name_to_internal, BasicType, IdSize, ObjectId, PrimitiveArray, RootKind, RootRecord,
    Value, NULL_ID,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadedClass {
    pub serial: u32,
    pub class_id: ObjectId,
    pub name_id: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassDump {
    pub id: ObjectId,
    pub super_id: ObjectId,
    pub loader_id: ObjectId,
    pub instance_size: u32,
    /// `(name string id, value)`
    pub static_fields: Vec<(u64, Value)>,
    /// `(name string id, type)`, declaration order.
    pub instance_fields: Vec<(u64, BasicType)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceDump {
    pub id: ObjectId,
    pub class_id: ObjectId,
    /// Raw field block; decode with [`DumpContents::instance_values`].
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectArrayDump {
    pub id: ObjectId,
    pub class_id: ObjectId,
    pub elements: Vec<ObjectId>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PrimitiveArrayDump {
    pub id: ObjectId,
    pub values: PrimitiveArray,
}

/// A reference to an identifier with no record in the dump.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DanglingReference {
    pub from: ObjectId,
    pub to: ObjectId,
    pub context: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct InspectSummary {
    pub id_size: u32,
    pub timestamp_millis: u64,
    pub strings: usize,
    pub classes: usize,
    pub instances: usize,
    pub object_arrays: usize,
    pub primitive_arrays: usize,
    pub roots: usize,
    pub segments: usize,
    pub complete: bool,
}

#[derive(Clone, Debug, Default)]
pub struct DumpContents {
    pub id_size: IdSize,
    pub timestamp_millis: u64,
    pub strings: BTreeMap<u64, String>,
    pub loaded_classes: Vec<LoadedClass>,
    pub classes: BTreeMap<ObjectId, ClassDump>,
    pub instances: BTreeMap<ObjectId, InstanceDump>,
    pub object_arrays: BTreeMap<ObjectId, ObjectArrayDump>,
    pub primitive_arrays: BTreeMap<ObjectId, PrimitiveArrayDump>,
    /// Root sub-records in file order.
    pub roots: Vec<RootRecord>,
    pub segments: usize,
    /// Whether a `HEAP DUMP END` record was seen.
    pub complete: bool,
}

pub fn parse_dump(bytes: &[u8]) -> Result<DumpContents> {
    let mut cur = HprofCursor::new(bytes, IdSize::Eight);
    let magic = cur.read_until(0)?;
    if magic != &MAGIC[..MAGIC.len() - 1] {
        return Err(HprofError::Format(format!(
            "unsupported header `{}`",
            String::from_utf8_lossy(magic)
        )));
    }
    let raw_id_size = cur.read_u32()?;
    let id_size = IdSize::try_from(raw_id_size)
        .map_err(|_| HprofError::Format(format!("unsupported identifier size {raw_id_size}")))?;
    cur.set_id_size(id_size);

    let mut contents = DumpContents {
        id_size,
        timestamp_millis: cur.read_u64()?,
        ..DumpContents::default()
    };

    while !cur.is_at_end() {
        let record_tag = cur.read_u8()?;
        let _time = cur.read_u32()?;
        let len = cur.read_u32()? as usize;
        let body = cur.read_bytes(len)?;
        let mut body = HprofCursor::new(body, id_size);
        match record_tag {
            tag::UTF8 => {
                let id = body.read_id()?;
                let text = body.read_bytes(body.remaining())?;
                contents
                    .strings
                    .insert(id, String::from_utf8_lossy(text).into_owned());
            }
            tag::LOAD_CLASS => {
                let serial = body.read_u32()?;
                let class_id = body.read_id()?;
                let _stack_serial = body.read_u32()?;
                let name_id = body.read_id()?;
                contents.loaded_classes.push(LoadedClass {
                    serial,
                    class_id,
                    name_id,
                });
            }
            tag::HEAP_DUMP | tag::HEAP_DUMP_SEGMENT => {
                contents.segments += 1;
                while !body.is_at_end() {
                    contents.read_sub_record(&mut body)?;
                }
            }
            tag::HEAP_DUMP_END => {
                contents.complete = true;
            }
            // Other top-level records (stack traces, thread starts) carry nothing we check.
            _ => {}
        }
    }

    contents.check_instance_sizes()?;
    Ok(contents)
}

impl DumpContents {
    fn read_sub_record(&mut self, cur: &mut HprofCursor<'_>) -> Result<()> {
        let sub_tag = cur.read_u8()?;
        match sub_tag {
            tag::ROOT_UNKNOWN => self.push_root(RootKind::Unknown, cur.read_id()?),
            tag::ROOT_JNI_GLOBAL => {
                let object_id = cur.read_id()?;
                let _jni_ref = cur.read_id()?;
                self.push_root(RootKind::JniGlobal, object_id);
            }
            tag::ROOT_JNI_LOCAL | tag::ROOT_JAVA_FRAME => {
                let object_id = cur.read_id()?;
                let thread_serial = cur.read_u32()?;
                let frame = cur.read_u32()?;
                let kind = if sub_tag == tag::ROOT_JNI_LOCAL {
                    RootKind::JniLocal {
                        thread_serial,
                        frame,
                    }
                } else {
                    RootKind::JavaFrame {
                        thread_serial,
                        frame,
                    }
                };
                self.push_root(kind, object_id);
            }
            tag::ROOT_STICKY_CLASS => self.push_root(RootKind::StickyClass, cur.read_id()?),
            tag::ROOT_MONITOR_USED => self.push_root(RootKind::MonitorUsed, cur.read_id()?),
            tag::ROOT_THREAD_OBJECT => {
                let object_id = cur.read_id()?;
                let thread_serial = cur.read_u32()?;
                let stack_serial = cur.read_u32()?;
                self.push_root(
                    RootKind::ThreadObject {
                        thread_serial,
                        stack_serial,
                    },
                    object_id,
                );
            }
            tag::CLASS_DUMP => {
                let class = read_class_dump(cur)?;
                self.classes.insert(class.id, class);
            }
            tag::INSTANCE_DUMP => {
                let id = cur.read_id()?;
                let _stack_serial = cur.read_u32()?;
                let class_id = cur.read_id()?;
                let len = cur.read_u32()? as usize;
                let data = cur.read_bytes(len)?.to_vec();
                self.instances.insert(id, InstanceDump { id, class_id, data });
            }
            tag::OBJ_ARRAY_DUMP => {
                let id = cur.read_id()?;
                let _stack_serial = cur.read_u32()?;
                let len = cur.read_u32()? as usize;
                let class_id = cur.read_id()?;
                if len.saturating_mul(self.id_size.bytes()) > cur.remaining() {
                    return Err(HprofError::Format(format!(
                        "object array 0x{id:x} of {len} elements exceeds remaining input"
                    )));
                }
                let elements = (0..len).map(|_| cur.read_id()).collect::<Result<_>>()?;
                self.object_arrays.insert(
                    id,
                    ObjectArrayDump {
                        id,
                        class_id,
                        elements,
                    },
                );
            }
            tag::PRIM_ARRAY_DUMP => {
                let id = cur.read_id()?;
                let _stack_serial = cur.read_u32()?;
                let len = cur.read_u32()? as usize;
                let ty = cur.read_basic_type()?;
                let values = cur.read_primitive_array(ty, len)?;
                self.primitive_arrays
                    .insert(id, PrimitiveArrayDump { id, values });
            }
            other => {
                return Err(HprofError::Format(format!(
                    "unknown heap sub-record tag 0x{other:02x} at offset {}",
                    cur.position() - 1
                )))
            }
        }
        Ok(())
    }

    fn push_root(&mut self, kind: RootKind, object_id: ObjectId) {
        self.roots.push(RootRecord { kind, object_id });
    }

    /// Superclass chain starting at `class_id`, own class first. Stops at a missing class or a
    /// cycle.
    fn class_chain(&self, class_id: ObjectId) -> Vec<&ClassDump> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = class_id;
        while next != NULL_ID && seen.insert(next) {
            let Some(class) = self.classes.get(&next) else {
                break;
            };
            chain.push(class);
            next = class.super_id;
        }
        chain
    }

    fn chain_is_complete(&self, chain: &[&ClassDump]) -> bool {
        chain.last().is_some_and(|root| root.super_id == NULL_ID)
    }

    fn check_instance_sizes(&self) -> Result<()> {
        for instance in self.instances.values() {
            let chain = self.class_chain(instance.class_id);
            if !self.chain_is_complete(&chain) {
                continue;
            }
            let expected: usize = chain
                .iter()
                .flat_map(|class| class.instance_fields.iter())
                .map(|(_, ty)| ty.width(self.id_size))
                .sum();
            if expected != instance.data.len() {
                return Err(HprofError::Format(format!(
                    "instance 0x{:x} has {} bytes of field data, its class layout needs {expected}",
                    instance.id,
                    instance.data.len()
                )));
            }
        }
        Ok(())
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.classes.contains_key(&id)
            || self.instances.contains_key(&id)
            || self.object_arrays.contains_key(&id)
            || self.primitive_arrays.contains_key(&id)
    }

    /// Internal-form name (`java/lang/String`) of a loaded class.
    pub fn class_name(&self, class_id: ObjectId) -> Option<&str> {
        self.loaded_classes
            .iter()
            .find(|loaded| loaded.class_id == class_id)
            .and_then(|loaded| self.strings.get(&loaded.name_id))
            .map(String::as_str)
    }

    pub fn class_by_name(&self, name: &str) -> Option<&ClassDump> {
        let internal = binary_name_to_internal(name);
        self.loaded_classes
            .iter()
            .find(|loaded| self.strings.get(&loaded.name_id) == Some(&internal))
            .and_then(|loaded| self.classes.get(&loaded.class_id))
    }

    /// Decodes an instance's field block as `(declaring class, field name, value)`, own class
    /// first. `None` when the instance or part of its class chain is missing.
    pub fn instance_values(&self, id: ObjectId) -> Option<Vec<(ObjectId, String, Value)>> {
        let instance = self.instances.get(&id)?;
        let chain = self.class_chain(instance.class_id);
        if !self.chain_is_complete(&chain) {
            return None;
        }
        let mut cur = HprofCursor::new(&instance.data, self.id_size);
        let mut out = Vec::new();
        for class in chain {
            for &(name_id, ty) in &class.instance_fields {
                let value = cur.read_value(ty).ok()?;
                let name = self.strings.get(&name_id).cloned().unwrap_or_default();
                out.push((class.id, name, value));
            }
        }
        Some(out)
    }

    /// Value of `field` on instance `id`. With `class` set, only fields declared by that class
    /// (binary name) match; otherwise the most derived declaration wins.
    pub fn instance_field(&self, id: ObjectId, class: Option<&str>, field: &str) -> Option<Value> {
        let declaring = match class {
            Some(name) => Some(self.class_by_name(name)?.id),
            None => None,
        };
        self.instance_values(id)?
            .into_iter()
            .find(|(owner, name, _)| name == field && declaring.map_or(true, |d| d == *owner))
            .map(|(_, _, value)| value)
    }

    pub fn static_field(&self, class: &str, field: &str) -> Option<Value> {
        self.class_by_name(class)?
            .static_fields
            .iter()
            .find(|(name_id, _)| self.strings.get(name_id).map(String::as_str) == Some(field))
            .map(|(_, value)| *value)
    }

    /// Every reference in the dump whose target has no record, in a stable order.
    pub fn dangling_references(&self) -> Vec<DanglingReference> {
        let mut out = Vec::new();
        let mut check = |from: ObjectId, to: ObjectId, context: &dyn Fn() -> String| {
            if to != NULL_ID && !self.contains(to) {
                out.push(DanglingReference {
                    from,
                    to,
                    context: context(),
                });
            }
        };

        for class in self.classes.values() {
            check(class.id, class.super_id, &|| "superclass".to_string());
            check(class.id, class.loader_id, &|| "class loader".to_string());
            for (name_id, value) in &class.static_fields {
                if let Some(to) = value.object_id() {
                    check(class.id, to, &|| format!("static field #{name_id}"));
                }
            }
        }
        for instance in self.instances.values() {
            check(instance.id, instance.class_id, &|| "instance class".to_string());
            for (_, name, value) in self.instance_values(instance.id).unwrap_or_default() {
                if let Some(to) = value.object_id() {
                    check(instance.id, to, &|| format!("field {name}"));
                }
            }
        }
        for array in self.object_arrays.values() {
            check(array.id, array.class_id, &|| "array class".to_string());
            for (index, &to) in array.elements.iter().enumerate() {
                check(array.id, to, &|| format!("element {index}"));
            }
        }
        for root in &self.roots {
            check(NULL_ID, root.object_id, &|| format!("{:?} root", root.kind));
        }
        out
    }

    pub fn summary(&self) -> InspectSummary {
        InspectSummary {
            id_size: self.id_size.bytes() as u32,
            timestamp_millis: self.timestamp_millis,
            strings: self.strings.len(),
            classes: self.classes.len(),
            instances: self.instances.len(),
            object_arrays: self.object_arrays.len(),
            primitive_arrays: self.primitive_arrays.len(),
            roots: self.roots.len(),
            segments: self.segments,
            complete: self.complete,
        }
    }
}

fn read_class_dump(cur: &mut HprofCursor<'_>) -> Result<ClassDump> {
    let id = cur.read_id()?;
    let _stack_serial = cur.read_u32()?;
    let super_id = cur.read_id()?;
    let loader_id = cur.read_id()?;
    // signers, protection domain, two reserved ids
    for _ in 0..4 {
        cur.read_id()?;
    }
    let instance_size = cur.read_u32()?;

    let constant_pool = cur.read_u16()?;
    for _ in 0..constant_pool {
        let _index = cur.read_u16()?;
        let ty = cur.read_basic_type()?;
        cur.read_value(ty)?;
    }

    let static_count = cur.read_u16()?;
    let mut static_fields = Vec::with_capacity(static_count as usize);
    for _ in 0..static_count {
        let name_id = cur.read_id()?;
        let ty = cur.read_basic_type()?;
        static_fields.push((name_id, cur.read_value(ty)?));
    }

    let field_count = cur.read_u16()?;
    let mut instance_fields = Vec::with_capacity(field_count as usize);
    for _ in 0..field_count {
        let name_id = cur.read_id()?;
        instance_fields.push((name_id, cur.read_basic_type()?));
    }

    Ok(ClassDump {
        id,
        super_id,
        loader_id,
        instance_size,
        static_fields,
        instance_fields,
    })
}
