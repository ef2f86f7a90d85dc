//! ULEB128/SLEB128 decoding at the integer widths the format uses, with
//! strict length and excess-bit policing.

use super::{cursor::Cursor, DecodeError, Result};

/// Decode an unsigned LEB128 u32 (at most 5 bytes).
pub fn read_u32(cur: &mut Cursor) -> Result<u32> {
    read_unsigned(cur, 32).map(|v| v as u32)
}

/// Decode an unsigned LEB128 u64 (at most 10 bytes).
pub fn read_u64(cur: &mut Cursor) -> Result<u64> {
    read_unsigned(cur, 64)
}

/// Decode a signed LEB128 i32 (at most 5 bytes).
pub fn read_i32(cur: &mut Cursor) -> Result<i32> {
    read_signed(cur, 32).map(|v| v as i32)
}

/// Decode a signed LEB128 i64 (at most 10 bytes).
pub fn read_i64(cur: &mut Cursor) -> Result<i64> {
    read_signed(cur, 64)
}

fn read_unsigned(cur: &mut Cursor, bits: u8) -> Result<u64> {
    let max_bytes = (bits as u32 + 6) / 7;
    let mut result: u64 = 0;
    let mut shift: u32 = 0;

    for i in 0..max_bytes {
        let byte = cur.read_u8()?;
        let low = (byte & 0x7F) as u64;

        // The final byte may only carry the bits that still fit.
        if shift + 7 > bits as u32 {
            let spare = bits as u32 - shift;
            if low >> spare != 0 {
                return Err(DecodeError::Leb128Overflow {
                    bits,
                    offset: cur.offset(),
                });
            }
        }
        result |= low << shift;

        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if i + 1 == max_bytes {
            break;
        }
    }

    Err(DecodeError::Leb128TooLong {
        limit: max_bytes as u8,
        offset: cur.offset(),
    })
}

fn read_signed(cur: &mut Cursor, bits: u8) -> Result<i64> {
    let max_bytes = (bits as u32 + 6) / 7;
    let mut result: i64 = 0;
    let mut shift: u32 = 0;

    for i in 0..max_bytes {
        let byte = cur.read_u8()?;

        // On the final possible byte, everything from the sign bit up must
        // be uniform sign fill.
        if shift + 7 > bits as u32 {
            let spare = bits as u32 - shift;
            let top = (byte & 0x7F) >> (spare - 1);
            if top != 0 && top != 0x7F >> (spare - 1) {
                return Err(DecodeError::Leb128Overflow {
                    bits,
                    offset: cur.offset(),
                });
            }
        }
        result |= ((byte & 0x7F) as i64) << shift;
        shift += 7;

        if byte & 0x80 == 0 {
            if shift < 64 && byte & 0x40 != 0 {
                result |= !0i64 << shift;
            }
            return Ok(result);
        }
        if i + 1 == max_bytes {
            break;
        }
    }

    Err(DecodeError::Leb128TooLong {
        limit: max_bytes as u8,
        offset: cur.offset(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_of(bytes: &[u8]) -> Result<u32> {
        read_u32(&mut Cursor::new(bytes))
    }

    fn i32_of(bytes: &[u8]) -> Result<i32> {
        read_i32(&mut Cursor::new(bytes))
    }

    #[test]
    fn unsigned_basics() {
        assert_eq!(u32_of(&[0x00]).unwrap(), 0);
        assert_eq!(u32_of(&[0x7F]).unwrap(), 127);
        assert_eq!(u32_of(&[0xE5, 0x8E, 0x26]).unwrap(), 624_485);
        assert_eq!(u32_of(&[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]).unwrap(), u32::MAX);
    }

    #[test]
    fn signed_basics() {
        assert_eq!(i32_of(&[0x00]).unwrap(), 0);
        assert_eq!(i32_of(&[0x7F]).unwrap(), -1);
        assert_eq!(i32_of(&[0x9B, 0xF1, 0x59]).unwrap(), -624_485);
        assert_eq!(
            i32_of(&[0x80, 0x80, 0x80, 0x80, 0x78]).unwrap(),
            i32::MIN
        );
    }

    #[test]
    fn too_long_rejected() {
        let err = u32_of(&[0xFF; 6]).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Leb128TooLong { .. } | DecodeError::Leb128Overflow { .. }
        ));
    }

    #[test]
    fn excess_bits_rejected() {
        // 5-byte u32 with bits set past bit 31.
        assert!(u32_of(&[0xFF, 0xFF, 0xFF, 0xFF, 0x7F]).is_err());
    }

    #[test]
    fn truncated_input() {
        assert!(matches!(
            u32_of(&[0x80]),
            Err(DecodeError::UnexpectedEof { .. })
        ));
    }
}
