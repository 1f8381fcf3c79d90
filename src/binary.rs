//! Little-endian cursors over byte buffers.
//!
//! Sector contents, allocation tables and directory records are built and
//! decoded through these two cursors: a borrowing reader with a movable
//! offset, and a writer whose appends grow the underlying vector.

use zerocopy::{FromBytes, I32, LE, U16, U32, U64};

/// Cursor error type
#[derive(Debug, Clone)]
pub enum BinaryError {
    /// Not enough data to read the requested type
    InsufficientData { expected: usize, available: usize },
}

impl std::fmt::Display for BinaryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinaryError::InsufficientData {
                expected,
                available,
            } => {
                write!(
                    f,
                    "insufficient data: expected {} bytes, got {}",
                    expected, available
                )
            },
        }
    }
}

impl std::error::Error for BinaryError {}

/// Result type for cursor operations
pub type BinaryResult<T> = Result<T, BinaryError>;

/// Reading cursor over a borrowed byte slice.
///
/// Reads past the end yield [`BinaryError::InsufficientData`]; callers
/// surface that as a structural error.
#[derive(Debug)]
pub struct BinaryReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> BinaryReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Current read offset in bytes
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Move the read offset to an absolute position
    #[inline]
    pub fn set_offset(&mut self, offset: usize) {
        self.offset = offset;
    }

    /// Bytes remaining past the current offset
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }

    fn take(&mut self, count: usize) -> BinaryResult<&'a [u8]> {
        if self.offset + count > self.data.len() {
            return Err(BinaryError::InsufficientData {
                expected: self.offset + count,
                available: self.data.len(),
            });
        }
        let span = &self.data[self.offset..self.offset + count];
        self.offset += count;
        Ok(span)
    }

    #[inline]
    pub fn read_u8(&mut self) -> BinaryResult<u8> {
        Ok(self.take(1)?[0])
    }

    #[inline]
    pub fn read_u16(&mut self) -> BinaryResult<u16> {
        let span = self.take(2)?;
        Ok(U16::<LE>::read_from_bytes(span).map(|v| v.get()).unwrap_or(0))
    }

    #[inline]
    pub fn read_u32(&mut self) -> BinaryResult<u32> {
        let span = self.take(4)?;
        Ok(U32::<LE>::read_from_bytes(span).map(|v| v.get()).unwrap_or(0))
    }

    #[inline]
    pub fn read_i32(&mut self) -> BinaryResult<i32> {
        let span = self.take(4)?;
        Ok(I32::<LE>::read_from_bytes(span).map(|v| v.get()).unwrap_or(0))
    }

    #[inline]
    pub fn read_u64(&mut self) -> BinaryResult<u64> {
        let span = self.take(8)?;
        Ok(U64::<LE>::read_from_bytes(span).map(|v| v.get()).unwrap_or(0))
    }

    /// Read a contiguous span of `count` bytes
    #[inline]
    pub fn read_bytes(&mut self, count: usize) -> BinaryResult<&'a [u8]> {
        self.take(count)
    }
}

/// Writing cursor over a borrowed growable vector.
///
/// Writes at the current offset overwrite existing bytes and extend the
/// vector when they run past its end.
#[derive(Debug)]
pub struct BinaryWriter<'a> {
    buf: &'a mut Vec<u8>,
    offset: usize,
}

impl<'a> BinaryWriter<'a> {
    pub fn new(buf: &'a mut Vec<u8>) -> Self {
        let offset = buf.len();
        Self { buf, offset }
    }

    /// Current write offset in bytes
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Move the write offset to an absolute position
    #[inline]
    pub fn set_offset(&mut self, offset: usize) {
        self.offset = offset;
    }

    fn put(&mut self, bytes: &[u8]) {
        let end = self.offset + bytes.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[self.offset..end].copy_from_slice(bytes);
        self.offset = end;
    }

    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.put(&[value]);
    }

    #[inline]
    pub fn write_u16(&mut self, value: u16) {
        self.put(&value.to_le_bytes());
    }

    #[inline]
    pub fn write_u32(&mut self, value: u32) {
        self.put(&value.to_le_bytes());
    }

    #[inline]
    pub fn write_i32(&mut self, value: i32) {
        self.put(&value.to_le_bytes());
    }

    #[inline]
    pub fn write_u64(&mut self, value: u64) {
        self.put(&value.to_le_bytes());
    }

    /// Append a contiguous byte span
    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.put(bytes);
    }
}
