//! Helpers for building and reading record payloads.
//!
//! Every field is prefixed with a one-byte format descriptor followed by the
//! value in little-endian order, so host tools can walk a payload without
//! knowing the record layout in advance.

/// Format identifier for `u8` fields.
pub const FMT_U8: u8 = 0x1;
/// Format identifier for `u32` fields.
pub const FMT_U32: u8 = 0x5;
/// Format identifier for `i32` fields.
pub const FMT_I32: u8 = 0x4;
/// Format identifier for `i64` fields.
pub const FMT_I64: u8 = 0xD;
/// Format identifier for `f64` fields.
pub const FMT_F64: u8 = 0x7;
/// Format identifier for tags (`i64` timestamp ticks followed by `u32` microstep).
pub const FMT_TAG: u8 = 0x10;

/// Incremental builder for record payloads.
#[derive(Debug, Default)]
pub struct RecordBuilder {
    bytes: Vec<u8>,
}

impl RecordBuilder {
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    pub fn u8(mut self, value: u8) -> Self {
        self.bytes.push(FMT_U8);
        self.bytes.push(value);
        self
    }

    pub fn u32(mut self, value: u32) -> Self {
        self.bytes.push(FMT_U32);
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn i32(mut self, value: i32) -> Self {
        self.bytes.push(FMT_I32);
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn i64(mut self, value: i64) -> Self {
        self.bytes.push(FMT_I64);
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn f64(mut self, value: f64) -> Self {
        self.bytes.push(FMT_F64);
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Appends a tag as its raw timestamp ticks and microstep.
    pub fn tag(mut self, ticks: i64, microstep: u32) -> Self {
        self.bytes.push(FMT_TAG);
        self.bytes.extend_from_slice(&ticks.to_le_bytes());
        self.bytes.extend_from_slice(&microstep.to_le_bytes());
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// A decoded payload field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Field {
    U8(u8),
    U32(u32),
    I32(i32),
    I64(i64),
    F64(f64),
    Tag(i64, u32),
}

/// Walks the fields of a payload produced by [`RecordBuilder`].
pub struct RecordReader<'a> {
    bytes: &'a [u8],
}

impl<'a> RecordReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn split(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.bytes.len() < len {
            return None;
        }
        let (head, tail) = self.bytes.split_at(len);
        self.bytes = tail;
        Some(head)
    }
}

impl Iterator for RecordReader<'_> {
    type Item = Field;

    fn next(&mut self) -> Option<Field> {
        let fmt = *self.split(1)?.first()?;
        match fmt {
            FMT_U8 => Some(Field::U8(self.split(1)?[0])),
            FMT_U32 => {
                let raw = self.split(4)?;
                Some(Field::U32(u32::from_le_bytes(raw.try_into().ok()?)))
            }
            FMT_I32 => {
                let raw = self.split(4)?;
                Some(Field::I32(i32::from_le_bytes(raw.try_into().ok()?)))
            }
            FMT_I64 => {
                let raw = self.split(8)?;
                Some(Field::I64(i64::from_le_bytes(raw.try_into().ok()?)))
            }
            FMT_F64 => {
                let raw = self.split(8)?;
                Some(Field::F64(f64::from_le_bytes(raw.try_into().ok()?)))
            }
            FMT_TAG => {
                let ticks = self.split(8)?;
                let micro = self.split(4)?;
                Some(Field::Tag(
                    i64::from_le_bytes(ticks.try_into().ok()?),
                    u32::from_le_bytes(micro.try_into().ok()?),
                ))
            }
            _ => None,
        }
    }
}
