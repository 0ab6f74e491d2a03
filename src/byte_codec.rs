//! Big-endian decoding of marker segment payloads.

use crate::error::J2kError;

/// Cursor over the payload of one marker segment.
///
/// Every read is bounds checked; running past the end of the payload is
/// reported as a malformed segment of the marker named at construction.
pub struct PayloadReader<'a> {
    source: &'a [u8],
    position: usize,
    name: &'static str,
}

impl<'a> PayloadReader<'a> {
    pub fn new(source: &'a [u8], name: &'static str) -> Self {
        Self {
            source,
            position: 0,
            name,
        }
    }

    pub fn error(&self) -> J2kError {
        J2kError::InvalidMarkerContent { name: self.name }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.source.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn remaining_data(&self) -> &'a [u8] {
        &self.source[self.position..]
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], J2kError> {
        if count > self.remaining() {
            return Err(self.error());
        }
        let bytes = &self.source[self.position..self.position + count];
        self.position += count;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8, J2kError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, J2kError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u24(&mut self) -> Result<u32, J2kError> {
        let bytes = self.read_bytes(3)?;
        Ok(((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32)
    }

    pub fn read_u32(&mut self) -> Result<u32, J2kError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads an unsigned value stored on `width` bytes (1, 2 or 4).
    pub fn read_uint(&mut self, width: usize) -> Result<u32, J2kError> {
        match width {
            1 => self.read_u8().map(u32::from),
            2 => self.read_u16().map(u32::from),
            3 => self.read_u24(),
            4 => self.read_u32(),
            _ => Err(self.error()),
        }
    }

    /// Reads a component index, one byte for up to 256 components and two otherwise.
    pub fn read_component_index(&mut self, component_count: u32) -> Result<u32, J2kError> {
        self.read_uint(component_index_width(component_count))
    }
}

/// Width in bytes of a component index for an image with `component_count` components.
pub fn component_index_width(component_count: u32) -> usize {
    if component_count <= 256 { 1 } else { 2 }
}

pub fn read_f32(bytes: &[u8]) -> f32 {
    f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

pub fn read_f64(bytes: &[u8]) -> f64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    f64::from_be_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_reads() {
        let data = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0, 0x01];
        let mut reader = PayloadReader::new(&data, "COD");
        assert_eq!(reader.read_u16().unwrap(), 0x1234);
        assert_eq!(reader.read_u24().unwrap(), 0x56789A);
        assert_eq!(reader.read_u32().unwrap(), 0xBCDEF001);
        assert!(reader.is_empty());
        assert_eq!(
            reader.read_u8(),
            Err(J2kError::InvalidMarkerContent { name: "COD" })
        );
    }

    #[test]
    fn test_component_index_width() {
        let data = [0x01, 0x02];
        assert_eq!(PayloadReader::new(&data, "QCC").read_component_index(3).unwrap(), 1);
        assert_eq!(PayloadReader::new(&data, "QCC").read_component_index(300).unwrap(), 0x0102);
    }
}
