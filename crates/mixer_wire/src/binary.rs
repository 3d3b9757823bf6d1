//! Fixed field-order binary encoding
//!
//! All multi-byte values are little-endian:
//!
//! | kind    | layout                      |
//! |---------|-----------------------------|
//! | string  | `u32` byte length + UTF-8   |
//! | int     | `i32`                       |
//! | float   | `f32`                       |
//! | bool    | 1 byte, non-zero is true    |
//! | color   | 3 floats                    |
//! | vector3 | 3 floats                    |
//! | uuid    | string, hyphenated          |

use thiserror::Error;
use uuid::Uuid;

/// Malformed binary payload
#[derive(Debug, Error)]
pub enum WireError {
    #[error("Unexpected end of payload: needed {needed} bytes, {remaining} left")]
    UnexpectedEnd { needed: usize, remaining: usize },

    #[error("Invalid UTF-8 string: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("Invalid uuid: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("Unknown message type {0}")]
    UnknownMessageType(i32),

    #[error("Invalid {field}: {value}")]
    InvalidField { field: &'static str, value: i32 },

    #[error("Negative count {0}")]
    NegativeCount(i32),
}

pub type WireResult<T> = Result<T, WireError>;

/// Appends values to a byte buffer
#[derive(Debug, Clone, Default)]
pub struct BinaryWriter {
    buf: Vec<u8>,
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_string(&mut self, s: &str) -> &mut Self {
        self.buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    pub fn write_int(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn write_float(&mut self, v: f32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn write_bool(&mut self, v: bool) -> &mut Self {
        self.buf.push(u8::from(v));
        self
    }

    pub fn write_color(&mut self, rgb: [f32; 3]) -> &mut Self {
        for c in rgb {
            self.write_float(c);
        }
        self
    }

    pub fn write_vector3(&mut self, v: [f32; 3]) -> &mut Self {
        self.write_color(v)
    }

    pub fn write_uuid(&mut self, uuid: &Uuid) -> &mut Self {
        self.write_string(&uuid.hyphenated().to_string())
    }

    /// Raw bytes, no length prefix
    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads values from a byte slice in the order they were written
#[derive(Debug, Clone)]
pub struct BinaryReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BinaryReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> WireResult<&'a [u8]> {
        let remaining = self.remaining();
        if n > remaining {
            return Err(WireError::UnexpectedEnd { needed: n, remaining });
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> WireResult<[u8; N]> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.take(N)?);
        Ok(array)
    }

    pub fn read_string(&mut self) -> WireResult<String> {
        let len = u32::from_le_bytes(self.take_array()?) as usize;
        let bytes = self.take(len)?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    pub fn read_int(&mut self) -> WireResult<i32> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_float(&mut self) -> WireResult<f32> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    pub fn read_bool(&mut self) -> WireResult<bool> {
        Ok(self.take(1)?[0] != 0)
    }

    pub fn read_color(&mut self) -> WireResult<[f32; 3]> {
        Ok([self.read_float()?, self.read_float()?, self.read_float()?])
    }

    pub fn read_vector3(&mut self) -> WireResult<[f32; 3]> {
        self.read_color()
    }

    pub fn read_uuid(&mut self) -> WireResult<Uuid> {
        Ok(Uuid::parse_str(&self.read_string()?)?)
    }

    /// A count prefix, rejecting negative values
    pub fn read_count(&mut self) -> WireResult<usize> {
        let count = self.read_int()?;
        usize::try_from(count).map_err(|_| WireError::NegativeCount(count))
    }

    /// Everything not read yet
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_little_endian() {
        let mut writer = BinaryWriter::new();
        writer.write_string("ab").write_int(-2).write_bool(true);
        assert_eq!(
            writer.into_bytes(),
            vec![2, 0, 0, 0, b'a', b'b', 0xfe, 0xff, 0xff, 0xff, 1]
        );
    }

    #[test]
    fn test_fields_read_back_in_order() {
        let uuid = Uuid::new_v4();
        let mut writer = BinaryWriter::new();
        writer
            .write_string("Caméra")
            .write_float(1.5)
            .write_color([0.1, 0.2, 0.3])
            .write_uuid(&uuid)
            .write_bytes(b"tail");
        let bytes = writer.into_bytes();

        let mut reader = BinaryReader::new(&bytes);
        assert_eq!(reader.read_string().unwrap(), "Caméra");
        assert_eq!(reader.read_float().unwrap(), 1.5);
        assert_eq!(reader.read_color().unwrap(), [0.1, 0.2, 0.3]);
        assert_eq!(reader.read_uuid().unwrap(), uuid);
        assert_eq!(reader.read_rest(), b"tail");
        assert!(reader.is_empty());
    }

    #[test]
    fn test_truncated_payload() {
        let mut writer = BinaryWriter::new();
        writer.write_string("long name");
        let bytes = writer.into_bytes();

        let mut reader = BinaryReader::new(&bytes[..6]);
        assert!(matches!(
            reader.read_string(),
            Err(WireError::UnexpectedEnd { needed: 9, remaining: 2 })
        ));
        assert!(matches!(BinaryReader::new(&[1, 0]).read_int(), Err(WireError::UnexpectedEnd { .. })));
    }

    #[test]
    fn test_invalid_utf8() {
        let bytes = [2, 0, 0, 0, 0xc3, 0x28];
        assert!(matches!(BinaryReader::new(&bytes).read_string(), Err(WireError::InvalidUtf8(_))));
    }

    #[test]
    fn test_negative_count() {
        let mut writer = BinaryWriter::new();
        writer.write_int(-1);
        let bytes = writer.into_bytes();
        assert!(matches!(BinaryReader::new(&bytes).read_count(), Err(WireError::NegativeCount(-1))));
    }
}
