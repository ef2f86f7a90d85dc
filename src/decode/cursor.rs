//! Offset-tracking byte cursor over the module image.

use super::{DecodeError, Result};

#[derive(Clone, Copy)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Absolute offset within the slice this cursor was created over.
    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or(DecodeError::UnexpectedEof { offset: self.pos })?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::Malformed {
            offset: self.pos,
            msg: "length overflows the address space",
        })?;
        if end > self.data.len() {
            return Err(DecodeError::UnexpectedEof { offset: self.pos });
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_f32_bits(&mut self) -> Result<u32> {
        self.read_u32_le()
    }

    pub fn read_f64_bits(&mut self) -> Result<u64> {
        let b = self.read_bytes(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Read a ULEB-prefixed byte vector.
    pub fn read_byte_vec(&mut self) -> Result<Vec<u8>> {
        let len = super::leb128::read_u32(self)? as usize;
        Ok(self.read_bytes(len)?.to_vec())
    }

    /// Read a ULEB-prefixed UTF-8 name.
    pub fn read_name(&mut self) -> Result<String> {
        let start = self.pos;
        let bytes = self.read_byte_vec()?;
        String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8 { offset: start })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_and_le_reads() {
        let bytes = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let mut c = Cursor::new(&bytes);
        assert_eq!(c.read_u8().unwrap(), 1);
        assert_eq!(c.offset(), 1);
        assert_eq!(c.read_bytes(3).unwrap(), &[2, 3, 4]);
        assert_eq!(c.read_u32_le().unwrap(), 0x0807_0605);
        assert!(c.is_eof());
        assert!(matches!(
            c.read_u8(),
            Err(DecodeError::UnexpectedEof { offset: 8 })
        ));
    }

    #[test]
    fn name_reads() {
        let data = [0x03, b'e', b'n', b'v'];
        let mut c = Cursor::new(&data);
        assert_eq!(c.read_name().unwrap(), "env");

        let bad = [0x02, 0xFF, 0xFE];
        let mut c = Cursor::new(&bad);
        assert!(matches!(c.read_name(), Err(DecodeError::InvalidUtf8 { .. })));
    }
}
