//! Byte stream abstraction used by the codestream reader and writer.
//!
//! `J2kStream` is the seam between the marker state machines and the
//! storage backend. All multi-byte values are big-endian. `MemoryStream`
//! is the in-memory backend: a shared read-only buffer that can hand out
//! tile data without copying, or an owned growable buffer for writing.

use crate::error::J2kError;
use std::io::SeekFrom;
use std::ops::Range;
use std::sync::Arc;

/// A run of coded bytes taken from a stream.
///
/// `Shared` chunks alias the stream's buffer and are produced only by
/// backends that support zero-copy reads.
#[derive(Debug, Clone)]
pub enum DataChunk {
    Owned(Vec<u8>),
    Shared {
        source: Arc<[u8]>,
        range: Range<usize>,
    },
}

impl DataChunk {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Self::Owned(data) => data,
            Self::Shared { source, range } => &source[range.clone()],
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Owned(data) => data.len(),
            Self::Shared { range, .. } => range.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Shared { .. })
    }
}

pub trait J2kStream {
    /// Reads up to `buffer.len()` bytes and returns how many were read.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, J2kError>;

    /// Writes `data` and returns how many bytes were written.
    fn write(&mut self, data: &[u8]) -> Result<usize, J2kError>;

    fn seek(&mut self, position: SeekFrom) -> Result<u64, J2kError>;

    fn tell(&self) -> u64;

    fn bytes_left(&self) -> u64;

    fn flush(&mut self) -> Result<(), J2kError> {
        Ok(())
    }

    fn supports_zero_copy(&self) -> bool {
        false
    }

    /// Returns a chunk aliasing the next `len` bytes (or fewer at end of
    /// stream) and advances past them. `None` if zero-copy is unsupported.
    fn read_shared(&mut self, _len: usize) -> Option<DataChunk> {
        None
    }

    fn skip(&mut self, count: i64) -> Result<(), J2kError> {
        self.seek(SeekFrom::Current(count)).map(|_| ())
    }

    fn read_exact(&mut self, buffer: &mut [u8]) -> Result<(), J2kError> {
        if self.read(buffer)? != buffer.len() {
            return Err(J2kError::StreamTooShort);
        }
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8, J2kError> {
        let mut bytes = [0u8; 1];
        self.read_exact(&mut bytes)?;
        Ok(bytes[0])
    }

    fn read_u16(&mut self) -> Result<u16, J2kError> {
        let mut bytes = [0u8; 2];
        self.read_exact(&mut bytes)?;
        Ok(u16::from_be_bytes(bytes))
    }

    fn read_u32(&mut self) -> Result<u32, J2kError> {
        let mut bytes = [0u8; 4];
        self.read_exact(&mut bytes)?;
        Ok(u32::from_be_bytes(bytes))
    }

    /// Reads up to `len` bytes of tile data, aliasing the buffer when possible.
    fn read_chunk(&mut self, len: usize) -> Result<DataChunk, J2kError> {
        if let Some(chunk) = self.read_shared(len) {
            return Ok(chunk);
        }
        let mut data = vec![0u8; len];
        let read = self.read(&mut data)?;
        data.truncate(read);
        Ok(DataChunk::Owned(data))
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), J2kError> {
        if self.write(data)? != data.len() {
            return Err(J2kError::StreamTooShort);
        }
        Ok(())
    }

    fn write_u8(&mut self, value: u8) -> Result<(), J2kError> {
        self.write_all(&[value])
    }

    fn write_u16(&mut self, value: u16) -> Result<(), J2kError> {
        self.write_all(&value.to_be_bytes())
    }

    fn write_u24(&mut self, value: u32) -> Result<(), J2kError> {
        self.write_all(&value.to_be_bytes()[1..])
    }

    fn write_u32(&mut self, value: u32) -> Result<(), J2kError> {
        self.write_all(&value.to_be_bytes())
    }

    fn write_f32(&mut self, value: f32) -> Result<(), J2kError> {
        self.write_all(&value.to_be_bytes())
    }

    fn write_f64(&mut self, value: f64) -> Result<(), J2kError> {
        self.write_all(&value.to_be_bytes())
    }
}

enum Storage {
    Shared(Arc<[u8]>),
    Owned(Vec<u8>),
}

/// In-memory `J2kStream`.
pub struct MemoryStream {
    storage: Storage,
    position: usize,
}

impl MemoryStream {
    /// Creates an empty writable stream.
    pub fn new() -> Self {
        Self {
            storage: Storage::Owned(Vec::new()),
            position: 0,
        }
    }

    /// Creates a read-only stream over `data` supporting zero-copy reads.
    pub fn from_bytes(data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            storage: Storage::Shared(data.into()),
            position: 0,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.storage {
            Storage::Shared(data) => data,
            Storage::Owned(data) => data,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_inner(self) -> Vec<u8> {
        match self.storage {
            Storage::Shared(data) => data.to_vec(),
            Storage::Owned(data) => data,
        }
    }
}

impl Default for MemoryStream {
    fn default() -> Self {
        Self::new()
    }
}

impl J2kStream for MemoryStream {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, J2kError> {
        let source = self.as_slice();
        let count = buffer.len().min(source.len().saturating_sub(self.position));
        buffer[..count].copy_from_slice(&source[self.position..self.position + count]);
        self.position += count;
        Ok(count)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, J2kError> {
        let Storage::Owned(destination) = &mut self.storage else {
            return Err(J2kError::StreamNotWritable);
        };
        let end = self.position + data.len();
        if end > destination.len() {
            destination.resize(end, 0);
        }
        destination[self.position..end].copy_from_slice(data);
        self.position = end;
        Ok(data.len())
    }

    fn seek(&mut self, position: SeekFrom) -> Result<u64, J2kError> {
        let len = self.len() as i64;
        let target = match position {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(offset) => self.position as i64 + offset,
            SeekFrom::End(offset) => len + offset,
        };
        if target < 0 || target > len {
            return Err(J2kError::SeekFailed);
        }
        self.position = target as usize;
        Ok(self.position as u64)
    }

    fn tell(&self) -> u64 {
        self.position as u64
    }

    fn bytes_left(&self) -> u64 {
        self.len().saturating_sub(self.position) as u64
    }

    fn supports_zero_copy(&self) -> bool {
        matches!(self.storage, Storage::Shared(_))
    }

    fn read_shared(&mut self, len: usize) -> Option<DataChunk> {
        let Storage::Shared(source) = &self.storage else {
            return None;
        };
        let count = len.min(source.len().saturating_sub(self.position));
        let range = self.position..self.position + count;
        self.position += count;
        Some(DataChunk::Shared {
            source: Arc::clone(source),
            range,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_patch() {
        let mut stream = MemoryStream::new();
        stream.write_u16(0xFF90).unwrap();
        stream.write_u32(0).unwrap();
        stream.write_u24(0x010203).unwrap();
        stream.seek(SeekFrom::Start(2)).unwrap();
        stream.write_u32(0xAABBCCDD).unwrap();
        stream.seek(SeekFrom::End(0)).unwrap();
        assert_eq!(
            stream.into_inner(),
            vec![0xFF, 0x90, 0xAA, 0xBB, 0xCC, 0xDD, 0x01, 0x02, 0x03]
        );
    }

    #[test]
    fn test_shared_stream_is_read_only() {
        let mut stream = MemoryStream::from_bytes(vec![1u8, 2, 3]);
        assert_eq!(stream.write_u8(0), Err(J2kError::StreamNotWritable));
        assert!(stream.supports_zero_copy());
    }

    #[test]
    fn test_zero_copy_chunk() {
        let mut stream = MemoryStream::from_bytes(vec![0xFFu8, 0x93, 0x10, 0x20, 0x30]);
        assert_eq!(stream.read_u16().unwrap(), 0xFF93);
        let chunk = stream.read_chunk(8).unwrap();
        assert!(chunk.is_shared());
        assert_eq!(chunk.as_slice(), &[0x10, 0x20, 0x30]);
        assert_eq!(stream.bytes_left(), 0);
    }

    #[test]
    fn test_short_read() {
        let mut stream = MemoryStream::from_bytes(vec![0x12u8]);
        assert_eq!(stream.read_u16(), Err(J2kError::StreamTooShort));
        assert_eq!(stream.seek(SeekFrom::Current(5)), Err(J2kError::SeekFailed));
    }
}
