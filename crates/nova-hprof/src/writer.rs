//! Streaming HPROF serializer.
//!
//! Output is append-only and single-pass: each walker record is redacted, encoded and handed to
//! the sink before the next one is requested. Only class layouts and the string table are kept
//! around, because later records refer back to them.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::codec::{tag, HprofBuf, MAGIC, RECORD_HEADER_LEN};
use crate::error::{HprofError, Result};
use crate::heap::HeapView;
use crate::policy::{Redaction, RedactionPolicy};
use crate::types::{
    binary_name_to_internal, BasicType, ClassRecord, FieldDescriptor, HeapSnapshotRecord, IdSize,
    InstanceRecord, ObjectArrayRecord, ObjectId, PrimitiveArrayRecord, RootKind, RootRecord,
    NULL_ID,
};
use crate::walker::ObjectGraphWalker;

pub const DEFAULT_SEGMENT_SIZE: usize = 1 << 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DumpOptions {
    /// Soft upper bound for a `HEAP DUMP SEGMENT` body, in bytes.
    pub segment_size: usize,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_SEGMENT_SIZE,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DumpStats {
    pub classes: u64,
    pub instances: u64,
    pub object_arrays: u64,
    pub primitive_arrays: u64,
    pub roots: u64,
    pub redacted_fields: u64,
    pub redacted_arrays: u64,
    pub bytes_written: u64,
}

struct ClassLayout {
    name: String,
    super_id: Option<ObjectId>,
    fields: Vec<FieldDescriptor>,
}

/// Encodes [`HeapSnapshotRecord`]s into an HPROF byte stream.
pub struct DumpWriter<'p, W: Write> {
    out: W,
    id_size: IdSize,
    policy: Option<&'p RedactionPolicy>,
    options: DumpOptions,
    strings: HashMap<String, u64>,
    next_string_id: u64,
    next_class_serial: u32,
    layouts: HashMap<ObjectId, ClassLayout>,
    segment: HprofBuf,
    record: HprofBuf,
    stats: DumpStats,
}

impl<'p, W: Write> DumpWriter<'p, W> {
    pub fn new(
        out: W,
        id_size: IdSize,
        policy: Option<&'p RedactionPolicy>,
        options: DumpOptions,
    ) -> Self {
        Self {
            out,
            id_size,
            policy,
            options,
            strings: HashMap::new(),
            next_string_id: 1,
            next_class_serial: 1,
            layouts: HashMap::new(),
            segment: HprofBuf::new(id_size),
            record: HprofBuf::new(id_size),
            stats: DumpStats::default(),
        }
    }

    pub fn stats(&self) -> &DumpStats {
        &self.stats
    }

    fn emit(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.out.write_all(bytes)?;
        self.stats.bytes_written += bytes.len() as u64;
        Ok(())
    }

    pub fn write_header(&mut self, timestamp_millis: u64) -> Result<()> {
        let mut header = HprofBuf::new(self.id_size);
        header.write_bytes(MAGIC);
        header.write_u32(self.id_size.bytes() as u32);
        header.write_u64(timestamp_millis);
        self.emit(header.as_slice())?;
        Ok(())
    }

    fn write_top_level(&mut self, record_tag: u8, body: &[u8]) -> io::Result<()> {
        let len = u32::try_from(body.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("record of {} bytes does not fit an HPROF length field", body.len()),
            )
        })?;
        let mut header = [0u8; RECORD_HEADER_LEN];
        header[0] = record_tag;
        header[5..9].copy_from_slice(&len.to_be_bytes());
        self.emit(&header)?;
        self.emit(body)
    }

    fn flush_segment(&mut self) -> io::Result<()> {
        if self.segment.is_empty() {
            return Ok(());
        }
        let segment = std::mem::replace(&mut self.segment, HprofBuf::new(self.id_size));
        self.write_top_level(tag::HEAP_DUMP_SEGMENT, segment.as_slice())
    }

    /// Moves the scratch sub-record into the current segment.
    fn push_sub_record(&mut self) -> io::Result<()> {
        if !self.segment.is_empty()
            && self.segment.len() + self.record.len() > self.options.segment_size
        {
            self.flush_segment()?;
        }
        self.segment.write_bytes(self.record.as_slice());
        self.record.clear();
        Ok(())
    }

    fn intern(&mut self, name: &str) -> io::Result<u64> {
        if let Some(&id) = self.strings.get(name) {
            return Ok(id);
        }
        // Top-level records may not interleave with an open segment.
        self.flush_segment()?;

        let id = self.next_string_id;
        self.next_string_id += 1;
        let mut body = HprofBuf::new(self.id_size);
        body.write_id(id);
        body.write_bytes(name.as_bytes());
        self.write_top_level(tag::UTF8, body.as_slice())?;
        self.strings.insert(name.to_string(), id);
        Ok(id)
    }

    fn field_redaction(&self, class: &str, field: &str, ty: BasicType) -> Redaction {
        self.policy
            .map_or(Redaction::PassThrough, |p| p.should_redact(class, field, ty))
    }

    fn array_redaction(&self, array_class: &str, element: BasicType) -> Redaction {
        self.policy
            .map_or(Redaction::PassThrough, |p| p.should_redact_array(array_class, element))
    }

    pub fn write_record(&mut self, record: &HeapSnapshotRecord) -> Result<()> {
        match record {
            HeapSnapshotRecord::Class(class) => self.write_class(class),
            HeapSnapshotRecord::Instance(instance) => self.write_instance(instance),
            HeapSnapshotRecord::ObjectArray(array) => self.write_object_array(array),
            HeapSnapshotRecord::PrimitiveArray(array) => self.write_primitive_array(array),
            HeapSnapshotRecord::Root(root) => self.write_root(root),
        }
    }

    fn write_class(&mut self, class: &ClassRecord) -> Result<()> {
        let name_id = self.intern(&binary_name_to_internal(&class.name))?;
        let mut static_names = Vec::with_capacity(class.static_fields.len());
        for field in &class.static_fields {
            static_names.push(self.intern(&field.name)?);
        }
        let mut field_names = Vec::with_capacity(class.instance_fields.len());
        for field in &class.instance_fields {
            field_names.push(self.intern(&field.name)?);
        }

        let serial = self.next_class_serial;
        self.next_class_serial += 1;
        let mut load = HprofBuf::new(self.id_size);
        load.write_u32(serial);
        load.write_id(class.id);
        load.write_u32(0);
        load.write_id(name_id);
        self.flush_segment()?;
        self.write_top_level(tag::LOAD_CLASS, load.as_slice())?;

        let static_count = u16::try_from(class.static_fields.len())
            .map_err(|_| HprofError::Format(format!("class {} has too many statics", class.name)))?;
        let field_count = u16::try_from(class.instance_fields.len())
            .map_err(|_| HprofError::Format(format!("class {} has too many fields", class.name)))?;

        let mut redacted = 0;
        let mut rec = std::mem::replace(&mut self.record, HprofBuf::new(self.id_size));
        rec.write_u8(tag::CLASS_DUMP);
        rec.write_id(class.id);
        rec.write_u32(0);
        rec.write_id(class.super_id.unwrap_or(NULL_ID));
        rec.write_id(class.loader_id);
        // signers, protection domain, two reserved ids
        for _ in 0..4 {
            rec.write_id(NULL_ID);
        }
        rec.write_u32(class.instance_size);
        rec.write_u16(0);
        rec.write_u16(static_count);
        for (field, &name_id) in class.static_fields.iter().zip(&static_names) {
            let ty = field.value.basic_type();
            let decision = self.field_redaction(&class.name, &field.name, ty);
            if !decision.is_pass_through() {
                redacted += 1;
            }
            rec.write_id(name_id);
            rec.write_u8(ty.tag());
            rec.write_value(&decision.redact_value(field.value));
        }
        rec.write_u16(field_count);
        for (field, &name_id) in class.instance_fields.iter().zip(&field_names) {
            rec.write_id(name_id);
            rec.write_u8(field.ty.tag());
        }
        self.record = rec;
        self.push_sub_record()?;

        self.layouts.insert(
            class.id,
            ClassLayout {
                name: class.name.clone(),
                super_id: class.super_id,
                fields: class.instance_fields.clone(),
            },
        );
        self.stats.classes += 1;
        self.stats.redacted_fields += redacted;
        Ok(())
    }

    fn write_instance(&mut self, instance: &InstanceRecord) -> Result<()> {
        let mut values_buf = HprofBuf::new(self.id_size);
        let mut values = instance.values.iter();
        let mut redacted = 0;
        let mut next = Some(instance.class_id);
        let mut depth = 0;
        while let Some(class_id) = next {
            depth += 1;
            if depth > self.layouts.len() {
                return Err(HprofError::Format(format!(
                    "class hierarchy of instance 0x{:x} has a cycle",
                    instance.id
                )));
            }
            let layout = self.layouts.get(&class_id).ok_or_else(|| {
                HprofError::Format(format!(
                    "instance 0x{:x} refers to class 0x{class_id:x} before its definition",
                    instance.id
                ))
            })?;
            for field in &layout.fields {
                let value = values.next().ok_or_else(|| {
                    HprofError::Format(format!(
                        "instance 0x{:x} is missing field values",
                        instance.id
                    ))
                })?;
                let decision = self.field_redaction(&layout.name, &field.name, field.ty);
                if !decision.is_pass_through() {
                    redacted += 1;
                }
                values_buf.write_value(&decision.redact_value(*value));
            }
            next = layout.super_id;
        }
        if values.next().is_some() {
            return Err(HprofError::Format(format!(
                "instance 0x{:x} has more values than its class layout",
                instance.id
            )));
        }
        let values_len = u32::try_from(values_buf.len()).map_err(|_| {
            HprofError::Format(format!("instance 0x{:x} is too large", instance.id))
        })?;

        self.record.write_u8(tag::INSTANCE_DUMP);
        self.record.write_id(instance.id);
        self.record.write_u32(0);
        self.record.write_id(instance.class_id);
        self.record.write_u32(values_len);
        self.record.write_bytes(values_buf.as_slice());
        self.push_sub_record()?;

        self.stats.instances += 1;
        self.stats.redacted_fields += redacted;
        Ok(())
    }

    fn write_object_array(&mut self, array: &ObjectArrayRecord) -> Result<()> {
        let class_name = self
            .layouts
            .get(&array.class_id)
            .map(|layout| layout.name.clone())
            .ok_or_else(|| {
                HprofError::Format(format!(
                    "array 0x{:x} refers to class 0x{:x} before its definition",
                    array.id, array.class_id
                ))
            })?;
        let decision = self.array_redaction(&class_name, BasicType::Object);
        let elements = decision.redact_object_elements(&array.elements);
        let len = array_len(array.id, elements.len())?;

        self.record.write_u8(tag::OBJ_ARRAY_DUMP);
        self.record.write_id(array.id);
        self.record.write_u32(0);
        self.record.write_u32(len);
        self.record.write_id(array.class_id);
        for &element in &elements {
            self.record.write_id(element);
        }
        self.push_sub_record()?;

        self.stats.object_arrays += 1;
        if !decision.is_pass_through() {
            self.stats.redacted_arrays += 1;
        }
        Ok(())
    }

    fn write_primitive_array(&mut self, array: &PrimitiveArrayRecord) -> Result<()> {
        let ty = array.values.element_type();
        let decision = self.array_redaction(&format!("{}[]", ty.java_name()), ty);
        let values = decision.redact_primitive_array(&array.values);
        let len = array_len(array.id, values.len())?;

        self.record.write_u8(tag::PRIM_ARRAY_DUMP);
        self.record.write_id(array.id);
        self.record.write_u32(0);
        self.record.write_u32(len);
        self.record.write_u8(ty.tag());
        self.record.write_primitive_array(&values);
        self.push_sub_record()?;

        self.stats.primitive_arrays += 1;
        if !decision.is_pass_through() {
            self.stats.redacted_arrays += 1;
        }
        Ok(())
    }

    fn write_root(&mut self, root: &RootRecord) -> Result<()> {
        let rec = &mut self.record;
        match root.kind {
            RootKind::Unknown => {
                rec.write_u8(tag::ROOT_UNKNOWN);
                rec.write_id(root.object_id);
            }
            RootKind::JniGlobal => {
                rec.write_u8(tag::ROOT_JNI_GLOBAL);
                rec.write_id(root.object_id);
                rec.write_id(NULL_ID);
            }
            RootKind::JniLocal {
                thread_serial,
                frame,
            } => {
                rec.write_u8(tag::ROOT_JNI_LOCAL);
                rec.write_id(root.object_id);
                rec.write_u32(thread_serial);
                rec.write_u32(frame);
            }
            RootKind::JavaFrame {
                thread_serial,
                frame,
            } => {
                rec.write_u8(tag::ROOT_JAVA_FRAME);
                rec.write_id(root.object_id);
                rec.write_u32(thread_serial);
                rec.write_u32(frame);
            }
            RootKind::StickyClass => {
                rec.write_u8(tag::ROOT_STICKY_CLASS);
                rec.write_id(root.object_id);
            }
            RootKind::MonitorUsed => {
                rec.write_u8(tag::ROOT_MONITOR_USED);
                rec.write_id(root.object_id);
            }
            RootKind::ThreadObject {
                thread_serial,
                stack_serial,
            } => {
                rec.write_u8(tag::ROOT_THREAD_OBJECT);
                rec.write_id(root.object_id);
                rec.write_u32(thread_serial);
                rec.write_u32(stack_serial);
            }
        }
        self.push_sub_record()?;
        self.stats.roots += 1;
        Ok(())
    }

    /// Closes the heap dump and flushes the sink.
    pub fn finish(mut self) -> Result<(W, DumpStats)> {
        self.flush_segment()?;
        self.write_top_level(tag::HEAP_DUMP_END, &[])?;
        self.out.flush()?;
        Ok((self.out, self.stats))
    }
}

fn array_len(id: ObjectId, len: usize) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| HprofError::Format(format!("array 0x{id:x} has too many elements ({len})")))
}

fn drive<W: Write>(
    walker: ObjectGraphWalker<'_>,
    timestamp_millis: u64,
    id_size: IdSize,
    out: W,
    policy: Option<&RedactionPolicy>,
    options: DumpOptions,
) -> Result<DumpStats> {
    let mut writer = DumpWriter::new(out, id_size, policy, options);
    writer.write_header(timestamp_millis)?;
    for record in walker {
        writer.write_record(&record?)?;
    }
    let (_, stats) = writer.finish()?;
    Ok(stats)
}

fn log_summary(path: Option<&Path>, policy: Option<&RedactionPolicy>, stats: &DumpStats) {
    let redaction = policy.map_or_else(|| "none".to_string(), |p| p.mode().to_string());
    tracing::info!(
        target: "nova.hprof",
        path = ?path,
        redaction = %redaction,
        classes = stats.classes,
        instances = stats.instances,
        arrays = stats.object_arrays + stats.primitive_arrays,
        roots = stats.roots,
        redacted_fields = stats.redacted_fields,
        redacted_arrays = stats.redacted_arrays,
        bytes = stats.bytes_written,
        "heap dump written (redaction: {redaction})"
    );
}

/// Walks `heap` and streams the dump into `out`.
pub fn write_dump_to<W: Write>(
    heap: &dyn HeapView,
    out: W,
    policy: Option<&RedactionPolicy>,
    options: DumpOptions,
) -> Result<DumpStats> {
    let walker = ObjectGraphWalker::new(heap)?;
    let stats = drive(walker, heap.timestamp_millis(), heap.id_size(), out, policy, options)?;
    log_summary(None, policy, &stats);
    Ok(stats)
}

/// Walks `heap` and writes the dump to `path`, creating or truncating it.
///
/// Write failures are reported as [`HprofError::Io`] for `path`; the partially written file is
/// left in place.
pub fn write_dump(
    heap: &dyn HeapView,
    path: &Path,
    policy: Option<&RedactionPolicy>,
    options: DumpOptions,
) -> Result<DumpStats> {
    let walker = ObjectGraphWalker::new(heap)?;
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|source| HprofError::Io {
            path: path.display().to_string(),
            source,
        })?;
    let stats = drive(
        walker,
        heap.timestamp_millis(),
        heap.id_size(),
        BufWriter::new(file),
        policy,
        options,
    )
    .map_err(|err| match err {
        HprofError::Write(source) => HprofError::Io {
            path: path.display().to_string(),
            source,
        },
        other => other,
    })?;
    log_summary(Some(path), policy, &stats);
    Ok(stats)
}
