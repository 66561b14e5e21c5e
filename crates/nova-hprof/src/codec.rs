use crate::error::{HprofError, Result};
use crate::types::{BasicType, IdSize, ObjectId, PrimitiveArray, Value};

pub const MAGIC: &[u8] = b"JAVA PROFILE 1.0.2\0";
/// Top-level record header: tag u1, time u4, length u4.
pub const RECORD_HEADER_LEN: usize = 9;

pub mod tag {
    pub const UTF8: u8 = 0x01;
    pub const LOAD_CLASS: u8 = 0x02;
    pub const HEAP_DUMP: u8 = 0x0C;
    pub const HEAP_DUMP_SEGMENT: u8 = 0x1C;
    pub const HEAP_DUMP_END: u8 = 0x2C;

    pub const ROOT_UNKNOWN: u8 = 0xFF;
    pub const ROOT_JNI_GLOBAL: u8 = 0x01;
    pub const ROOT_JNI_LOCAL: u8 = 0x02;
    pub const ROOT_JAVA_FRAME: u8 = 0x03;
    pub const ROOT_STICKY_CLASS: u8 = 0x05;
    pub const ROOT_MONITOR_USED: u8 = 0x07;
    pub const ROOT_THREAD_OBJECT: u8 = 0x08;
    pub const CLASS_DUMP: u8 = 0x20;
    pub const INSTANCE_DUMP: u8 = 0x21;
    pub const OBJ_ARRAY_DUMP: u8 = 0x22;
    pub const PRIM_ARRAY_DUMP: u8 = 0x23;
}

/// Big-endian byte buffer for building HPROF records.
pub struct HprofBuf {
    buf: Vec<u8>,
    id_size: IdSize,
}

impl HprofBuf {
    pub fn new(id_size: IdSize) -> Self {
        Self {
            buf: Vec::new(),
            id_size,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_id(&mut self, id: ObjectId) {
        let be = id.to_be_bytes();
        self.buf.extend_from_slice(&be[8 - self.id_size.bytes()..]);
    }

    /// Writes a value without its type tag, using exactly `ty.width()` bytes.
    pub fn write_value(&mut self, v: &Value) {
        match *v {
            Value::Object(id) => self.write_id(id),
            Value::Boolean(v) => self.write_bool(v),
            Value::Char(v) => self.write_u16(v),
            Value::Float(v) => self.write_u32(v.to_bits()),
            Value::Double(v) => self.write_u64(v.to_bits()),
            Value::Byte(v) => self.write_u8(v as u8),
            Value::Short(v) => self.write_u16(v as u16),
            Value::Int(v) => self.write_u32(v as u32),
            Value::Long(v) => self.write_u64(v as u64),
        }
    }

    pub fn write_primitive_array(&mut self, values: &PrimitiveArray) {
        match values {
            PrimitiveArray::Boolean(v) => v.iter().for_each(|&x| self.write_bool(x)),
            PrimitiveArray::Char(v) => v.iter().for_each(|&x| self.write_u16(x)),
            PrimitiveArray::Float(v) => v.iter().for_each(|&x| self.write_u32(x.to_bits())),
            PrimitiveArray::Double(v) => v.iter().for_each(|&x| self.write_u64(x.to_bits())),
            PrimitiveArray::Byte(v) => v.iter().for_each(|&x| self.write_u8(x as u8)),
            PrimitiveArray::Short(v) => v.iter().for_each(|&x| self.write_u16(x as u16)),
            PrimitiveArray::Int(v) => v.iter().for_each(|&x| self.write_u32(x as u32)),
            PrimitiveArray::Long(v) => v.iter().for_each(|&x| self.write_u64(x as u64)),
        }
    }
}

/// Bounds-checked big-endian reader over an HPROF byte slice.
pub struct HprofCursor<'a> {
    buf: &'a [u8],
    pos: usize,
    id_size: IdSize,
}

impl<'a> HprofCursor<'a> {
    pub fn new(buf: &'a [u8], id_size: IdSize) -> Self {
        Self {
            buf,
            pos: 0,
            id_size,
        }
    }

    pub fn set_id_size(&mut self, id_size: IdSize) {
        self.id_size = id_size;
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn is_at_end(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                HprofError::Format(format!(
                    "unexpected end of input: need {n} bytes at {}, have {}",
                    self.pos,
                    self.buf.len()
                ))
            })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.take(len)
    }

    pub fn read_id(&mut self) -> Result<ObjectId> {
        let size = self.id_size.bytes();
        let mut be = [0u8; 8];
        be[8 - size..].copy_from_slice(self.take(size)?);
        Ok(u64::from_be_bytes(be))
    }

    /// Consumes bytes until `needle`, returning everything before it.
    pub fn read_until(&mut self, needle: u8) -> Result<&'a [u8]> {
        let rest = &self.buf[self.pos.min(self.buf.len())..];
        let idx = rest.iter().position(|&b| b == needle).ok_or_else(|| {
            HprofError::Format(format!("missing terminator 0x{needle:02x} after {}", self.pos))
        })?;
        let out = self.take(idx)?;
        self.pos += 1;
        Ok(out)
    }

    pub fn read_value(&mut self, ty: BasicType) -> Result<Value> {
        let v = match ty {
            BasicType::Object => Value::Object(self.read_id()?),
            BasicType::Boolean => Value::Boolean(self.read_u8()? != 0),
            BasicType::Char => Value::Char(self.read_u16()?),
            BasicType::Float => Value::Float(f32::from_bits(self.read_u32()?)),
            BasicType::Double => Value::Double(f64::from_bits(self.read_u64()?)),
            BasicType::Byte => Value::Byte(self.read_u8()? as i8),
            BasicType::Short => Value::Short(self.read_u16()? as i16),
            BasicType::Int => Value::Int(self.read_u32()? as i32),
            BasicType::Long => Value::Long(self.read_u64()? as i64),
        };
        Ok(v)
    }

    pub fn read_basic_type(&mut self) -> Result<BasicType> {
        let tag = self.read_u8()?;
        BasicType::from_tag(tag)
            .ok_or_else(|| HprofError::Format(format!("invalid basic type tag: {tag}")))
    }

    pub fn read_primitive_array(&mut self, ty: BasicType, len: usize) -> Result<PrimitiveArray> {
        // Reject lengths the remaining input cannot possibly hold before allocating.
        let width = ty.width(self.id_size);
        if len.checked_mul(width).map_or(true, |bytes| bytes > self.remaining()) {
            return Err(HprofError::Format(format!(
                "primitive array of {len} elements exceeds remaining input"
            )));
        }

        let array = match ty {
            BasicType::Object => {
                return Err(HprofError::Format(
                    "primitive array with object element type".to_string(),
                ))
            }
            BasicType::Boolean => PrimitiveArray::Boolean(
                (0..len)
                    .map(|_| -> Result<bool> { Ok(self.read_u8()? != 0) })
                    .collect::<Result<_>>()?,
            ),
            BasicType::Char => {
                PrimitiveArray::Char((0..len).map(|_| self.read_u16()).collect::<Result<_>>()?)
            }
            BasicType::Float => PrimitiveArray::Float(
                (0..len)
                    .map(|_| -> Result<f32> { Ok(f32::from_bits(self.read_u32()?)) })
                    .collect::<Result<_>>()?,
            ),
            BasicType::Double => PrimitiveArray::Double(
                (0..len)
                    .map(|_| -> Result<f64> { Ok(f64::from_bits(self.read_u64()?)) })
                    .collect::<Result<_>>()?,
            ),
            BasicType::Byte => PrimitiveArray::Byte(
                (0..len)
                    .map(|_| -> Result<i8> { Ok(self.read_u8()? as i8) })
                    .collect::<Result<_>>()?,
            ),
            BasicType::Short => PrimitiveArray::Short(
                (0..len)
                    .map(|_| -> Result<i16> { Ok(self.read_u16()? as i16) })
                    .collect::<Result<_>>()?,
            ),
            BasicType::Int => PrimitiveArray::Int(
                (0..len)
                    .map(|_| -> Result<i32> { Ok(self.read_u32()? as i32) })
                    .collect::<Result<_>>()?,
            ),
            BasicType::Long => PrimitiveArray::Long(
                (0..len)
                    .map(|_| -> Result<i64> { Ok(self.read_u64()? as i64) })
                    .collect::<Result<_>>()?,
            ),
        };
        Ok(array)
    }
}
