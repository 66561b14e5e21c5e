//! Breadth-first enumeration of everything reachable from the root set.

use std::collections::{HashSet, VecDeque};

use crate::error::{HprofError, Result};
use crate::heap::{ClassInfo, GcRoot, HeapObject, HeapView};
use crate::types::{
    ClassRecord, FieldDescriptor, HeapSnapshotRecord, IdSize, InstanceRecord, ObjectArrayRecord,
    ObjectId, PrimitiveArrayRecord, RootRecord, StaticField, Value, NULL_ID,
};

/// Lazily produces one [`HeapSnapshotRecord`] per reachable object, then the roots.
///
/// Order is deterministic for a frozen heap: seeds are the distinct root targets sorted by
/// identifier, children are visited in field order, and a class (with its superclass chain,
/// top-down) is always yielded before the first record that needs it. References to objects the
/// heap cannot resolve are rewritten to null so the output never dangles.
pub struct ObjectGraphWalker<'h> {
    heap: &'h dyn HeapView,
    id_size: IdSize,
    roots: Vec<GcRoot>,
    queue: VecDeque<ObjectId>,
    enqueued: HashSet<ObjectId>,
    emitted_classes: HashSet<ObjectId>,
    emitted: HashSet<ObjectId>,
    pending: VecDeque<HeapSnapshotRecord>,
    roots_done: bool,
    failed: bool,
}

impl<'h> ObjectGraphWalker<'h> {
    pub fn new(heap: &'h dyn HeapView) -> Result<Self> {
        let roots = heap.roots()?;

        let mut seeds: Vec<ObjectId> = roots
            .iter()
            .map(|root| root.object_id)
            .filter(|&id| id != NULL_ID)
            .collect();
        seeds.sort_unstable();
        seeds.dedup();

        Ok(Self {
            heap,
            id_size: heap.id_size(),
            roots,
            enqueued: seeds.iter().copied().collect(),
            queue: seeds.into(),
            emitted_classes: HashSet::new(),
            emitted: HashSet::new(),
            pending: VecDeque::new(),
            roots_done: false,
            failed: false,
        })
    }

    fn enqueue(&mut self, id: ObjectId) {
        if id != NULL_ID && self.enqueued.insert(id) {
            self.queue.push_back(id);
        }
    }

    fn check_width(&self, id: ObjectId) -> Result<()> {
        if self.id_size == IdSize::Four && id > u64::from(u32::MAX) {
            return Err(HprofError::RuntimeUnavailable(format!(
                "object id 0x{id:x} does not fit the heap's 4-byte identifiers"
            )));
        }
        Ok(())
    }

    /// Returns `id` if the heap can resolve it, the null id otherwise.
    fn resolve_ref(&mut self, owner: ObjectId, id: ObjectId) -> Result<ObjectId> {
        if id == NULL_ID {
            return Ok(NULL_ID);
        }
        if self.emitted.contains(&id) || self.heap.contains(id)? {
            self.check_width(id)?;
            self.enqueue(id);
            return Ok(id);
        }
        tracing::debug!(
            target: "nova.hprof",
            owner,
            target_id = id,
            "rewriting unresolvable reference to null"
        );
        Ok(NULL_ID)
    }

    fn lookup_class(&self, id: ObjectId, needed_by: ObjectId) -> Result<ClassInfo> {
        if id == NULL_ID {
            return Err(HprofError::RuntimeUnavailable(format!(
                "object 0x{needed_by:x} names the null id as its class"
            )));
        }
        self.check_width(id)?;
        self.heap.class(id)?.ok_or_else(|| {
            HprofError::RuntimeUnavailable(format!(
                "class 0x{id:x} required by 0x{needed_by:x} is not present in the heap"
            ))
        })
    }

    /// Queues class records for `class_id` and any superclasses not yet emitted, root first.
    fn ensure_class(&mut self, class_id: ObjectId, needed_by: ObjectId) -> Result<()> {
        let mut chain = Vec::new();
        let mut next = Some((class_id, needed_by));
        while let Some((id, user)) = next {
            if self.emitted_classes.contains(&id) || chain.iter().any(|c: &ClassInfo| c.id == id) {
                break;
            }
            let class = self.lookup_class(id, user)?;
            next = class.super_id.filter(|&s| s != NULL_ID).map(|s| (s, id));
            chain.push(class);
        }

        while let Some(class) = chain.pop() {
            let record = self.class_record(class)?;
            self.emitted_classes.insert(record.id);
            self.emitted.insert(record.id);
            self.enqueued.insert(record.id);
            self.pending.push_back(HeapSnapshotRecord::Class(record));
        }
        Ok(())
    }

    fn class_record(&mut self, class: ClassInfo) -> Result<ClassRecord> {
        let mut offset = 0u32;
        let instance_fields: Vec<FieldDescriptor> = class
            .instance_fields
            .iter()
            .map(|field| {
                let descriptor = FieldDescriptor {
                    name: field.name.clone(),
                    ty: field.ty,
                    offset,
                };
                offset += field.ty.width(self.id_size) as u32;
                descriptor
            })
            .collect();

        let mut static_fields = Vec::with_capacity(class.static_fields.len());
        for field in class.static_fields {
            let value = match field.value {
                Value::Object(id) => Value::Object(self.resolve_ref(class.id, id)?),
                other => other,
            };
            static_fields.push(StaticField {
                name: field.name,
                value,
            });
        }

        let super_id = class.super_id.filter(|&s| s != NULL_ID);
        let loader_id = self.resolve_ref(class.id, class.loader_id)?;
        let instance_size = offset + self.super_instance_size(super_id)?;

        Ok(ClassRecord {
            id: class.id,
            name: class.name,
            super_id,
            loader_id,
            instance_size,
            instance_fields,
            static_fields,
        })
    }

    fn super_instance_size(&self, mut super_id: Option<ObjectId>) -> Result<u32> {
        let mut size = 0u32;
        let mut seen = HashSet::new();
        while let Some(id) = super_id {
            if !seen.insert(id) {
                return Err(HprofError::RuntimeUnavailable(format!(
                    "class hierarchy cycle through 0x{id:x}"
                )));
            }
            let class = self.heap.class(id)?.ok_or_else(|| {
                HprofError::RuntimeUnavailable(format!("superclass 0x{id:x} is not present"))
            })?;
            size += class
                .instance_fields
                .iter()
                .map(|f| f.ty.width(self.id_size) as u32)
                .sum::<u32>();
            super_id = class.super_id.filter(|&s| s != NULL_ID);
        }
        Ok(size)
    }

    /// Field types for an instance of `class_id`, own class first.
    fn instance_layout(&self, class_id: ObjectId) -> Result<Vec<crate::types::BasicType>> {
        let mut types = Vec::new();
        let mut next = Some(class_id);
        let mut seen = HashSet::new();
        while let Some(id) = next {
            if !seen.insert(id) {
                return Err(HprofError::RuntimeUnavailable(format!(
                    "class hierarchy cycle through 0x{id:x}"
                )));
            }
            let class = self.lookup_class(id, class_id)?;
            types.extend(class.instance_fields.iter().map(|f| f.ty));
            next = class.super_id.filter(|&s| s != NULL_ID);
        }
        Ok(types)
    }

    fn visit(&mut self, id: ObjectId) -> Result<()> {
        if self.emitted.contains(&id) {
            return Ok(());
        }
        if self.heap.class(id)?.is_some() {
            return self.ensure_class(id, id);
        }
        let Some(object) = self.heap.object(id)? else {
            // Only reachable for roots whose target vanished; the root itself is dropped later.
            return Ok(());
        };
        self.check_width(id)?;

        let record = match object {
            HeapObject::Instance { class_id, fields } => {
                self.ensure_class(class_id, id)?;
                let layout = self.instance_layout(class_id)?;
                if layout.len() != fields.len() {
                    return Err(HprofError::RuntimeUnavailable(format!(
                        "object 0x{id:x} has {} field values but its class declares {}",
                        fields.len(),
                        layout.len()
                    )));
                }
                let mut values = Vec::with_capacity(fields.len());
                for (ty, value) in layout.into_iter().zip(fields) {
                    if value.basic_type() != ty {
                        return Err(HprofError::RuntimeUnavailable(format!(
                            "object 0x{id:x} holds a {} where its class declares {ty}",
                            value.basic_type()
                        )));
                    }
                    values.push(match value {
                        Value::Object(target) => Value::Object(self.resolve_ref(id, target)?),
                        other => other,
                    });
                }
                HeapSnapshotRecord::Instance(InstanceRecord {
                    id,
                    class_id,
                    values,
                })
            }
            HeapObject::ObjectArray { class_id, elements } => {
                self.ensure_class(class_id, id)?;
                let mut resolved = Vec::with_capacity(elements.len());
                for element in elements {
                    resolved.push(self.resolve_ref(id, element)?);
                }
                HeapSnapshotRecord::ObjectArray(ObjectArrayRecord {
                    id,
                    class_id,
                    elements: resolved,
                })
            }
            HeapObject::PrimitiveArray { values } => {
                HeapSnapshotRecord::PrimitiveArray(PrimitiveArrayRecord { id, values })
            }
        };

        self.emitted.insert(id);
        self.pending.push_back(record);
        Ok(())
    }

    fn emit_roots(&mut self) {
        for root in std::mem::take(&mut self.roots) {
            if self.emitted.contains(&root.object_id) {
                self.pending.push_back(HeapSnapshotRecord::Root(RootRecord {
                    kind: root.kind,
                    object_id: root.object_id,
                }));
            } else {
                tracing::debug!(
                    target: "nova.hprof",
                    object_id = root.object_id,
                    "dropping root whose target is not in the heap"
                );
            }
        }
        self.roots_done = true;
    }
}

impl Iterator for ObjectGraphWalker<'_> {
    type Item = Result<HeapSnapshotRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Some(Ok(record));
            }
            if let Some(id) = self.queue.pop_front() {
                if let Err(err) = self.visit(id) {
                    self.failed = true;
                    return Some(Err(err));
                }
                continue;
            }
            if self.roots_done {
                return None;
            }
            self.emit_roots();
        }
    }
}
