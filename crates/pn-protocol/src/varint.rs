//! Varint and scalar codec
//!
//! Leaf encoders used by both the message frame and the schema serializer:
//!
//! - unsigned varints: base-128, least-significant group first, high bit set
//!   on every byte except the last
//! - zigzag varints for signed integers
//! - IEEE-754 floats and doubles, little-endian
//! - UTF-8 strings (no length prefix; callers write their own)
//! - the message-id varint, which stores groups most-significant first

use bytes::BufMut;

use crate::error::ProtocolError;

/// Longest possible encoding of a `u64` as a varint
pub const MAX_VARINT_BYTES: usize = 10;

/// Longest possible encoding of a message id
pub const MAX_MESSAGE_ID_BYTES: usize = 5;

const CONTINUATION: u8 = 0x80;
const PAYLOAD_MASK: u8 = 0x7f;

/// Number of bytes `value` occupies as a varint (minimum 1)
pub fn uvarint_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    std::cmp::max(1, bits.div_ceil(7))
}

/// Append `value` as an unsigned varint
pub fn encode_uvarint(mut value: u64, dst: &mut impl BufMut) {
    loop {
        let group = (value & PAYLOAD_MASK as u64) as u8;
        value >>= 7;
        if value == 0 {
            dst.put_u8(group);
            return;
        }
        dst.put_u8(group | CONTINUATION);
    }
}

/// Read an unsigned varint from the front of `src`
///
/// Returns the value and the number of bytes consumed.
pub fn decode_uvarint(src: &[u8]) -> Result<(u64, usize), ProtocolError> {
    let mut value = 0u64;
    for (i, &byte) in src.iter().enumerate() {
        if i >= MAX_VARINT_BYTES {
            return Err(ProtocolError::VarintOverflow);
        }
        let group = (byte & PAYLOAD_MASK) as u64;
        let shift = 7 * i as u32;
        if shift == 63 && group > 1 {
            return Err(ProtocolError::VarintOverflow);
        }
        value |= group << shift;
        if byte & CONTINUATION == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(ProtocolError::Truncated { needed: 1 })
}

/// Map a signed integer onto the unsigned range: `n >= 0 -> 2n`, `n < 0 -> 2|n| - 1`
pub fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag`]
pub fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Append `value` as a zigzag varint
pub fn encode_zigzag(value: i64, dst: &mut impl BufMut) {
    encode_uvarint(zigzag(value), dst);
}

/// Read a zigzag varint from the front of `src`
pub fn decode_zigzag(src: &[u8]) -> Result<(i64, usize), ProtocolError> {
    let (raw, used) = decode_uvarint(src)?;
    Ok((unzigzag(raw), used))
}

/// Append a single-precision float (4 bytes)
pub fn encode_float(value: f32, dst: &mut impl BufMut) {
    dst.put_f32_le(value);
}

/// Read a single-precision float from the front of `src`
pub fn decode_float(src: &[u8]) -> Result<f32, ProtocolError> {
    let bytes: [u8; 4] = fixed(src)?;
    Ok(f32::from_le_bytes(bytes))
}

/// Append a double-precision float (8 bytes)
pub fn encode_double(value: f64, dst: &mut impl BufMut) {
    dst.put_f64_le(value);
}

/// Read a double-precision float from the front of `src`
pub fn decode_double(src: &[u8]) -> Result<f64, ProtocolError> {
    let bytes: [u8; 8] = fixed(src)?;
    Ok(f64::from_le_bytes(bytes))
}

fn fixed<const N: usize>(src: &[u8]) -> Result<[u8; N], ProtocolError> {
    src.get(..N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(ProtocolError::Truncated {
            needed: N - src.len().min(N),
        })
}

/// Append the UTF-8 bytes of `value` without any length prefix
pub fn encode_str(value: &str, dst: &mut impl BufMut) {
    dst.put_slice(value.as_bytes());
}

/// Interpret all of `src` as a UTF-8 string
pub fn decode_str(src: &[u8]) -> Result<&str, ProtocolError> {
    Ok(std::str::from_utf8(src)?)
}

/// Number of bytes `id` occupies as a message-id varint (minimum 1)
pub fn message_id_len(id: u32) -> usize {
    uvarint_len(id as u64)
}

/// Append a message id, most-significant group first
///
/// Every byte but the final (low-order) one carries the continuation bit.
pub fn encode_message_id(id: u32, dst: &mut impl BufMut) {
    let len = message_id_len(id);
    for i in (0..len).rev() {
        let group = ((id >> (7 * i)) & PAYLOAD_MASK as u32) as u8;
        if i == 0 {
            dst.put_u8(group);
        } else {
            dst.put_u8(group | CONTINUATION);
        }
    }
}

/// Read a message id from the front of `src`, one byte at a time until the
/// continuation bit is clear
pub fn decode_message_id(src: &[u8]) -> Result<(u32, usize), ProtocolError> {
    let mut id = 0u64;
    for (i, &byte) in src.iter().enumerate() {
        if i >= MAX_MESSAGE_ID_BYTES {
            return Err(ProtocolError::InvalidMessageId);
        }
        id = (id << 7) | (byte & PAYLOAD_MASK) as u64;
        if byte & CONTINUATION == 0 {
            let id = u32::try_from(id).map_err(|_| ProtocolError::InvalidMessageId)?;
            return Ok((id, i + 1));
        }
    }
    Err(ProtocolError::Truncated { needed: 1 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn uvarint(value: u64) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_uvarint(value, &mut buf);
        buf.to_vec()
    }

    #[test]
    fn test_uvarint_known_encodings() {
        assert_eq!(uvarint(0), vec![0x00]);
        assert_eq!(uvarint(1), vec![0x01]);
        assert_eq!(uvarint(127), vec![0x7f]);
        assert_eq!(uvarint(128), vec![0x80, 0x01]);
        assert_eq!(uvarint(300), vec![0xac, 0x02]);
    }

    #[test]
    fn test_uvarint_length_matches_bit_length() {
        for (value, len) in [(0u64, 1), (127, 1), (128, 2), (16383, 2), (16384, 3), (1 << 35, 6)] {
            assert_eq!(uvarint(value).len(), len, "value {}", value);
            assert_eq!(uvarint_len(value), len);
        }
    }

    #[test]
    fn test_uvarint_max() {
        let bytes = uvarint(u64::MAX);
        assert_eq!(bytes.len(), MAX_VARINT_BYTES);
        assert_eq!(decode_uvarint(&bytes).unwrap(), (u64::MAX, MAX_VARINT_BYTES));
    }

    #[test]
    fn test_uvarint_truncated() {
        let result = decode_uvarint(&[0x80, 0x80]);
        assert!(matches!(result, Err(ProtocolError::Truncated { .. })));
        assert!(decode_uvarint(&[]).is_err());
    }

    #[test]
    fn test_uvarint_overflow() {
        let bytes = [0xffu8; 11];
        assert!(matches!(
            decode_uvarint(&bytes),
            Err(ProtocolError::VarintOverflow)
        ));
    }

    #[test]
    fn test_zigzag_mapping() {
        assert_eq!(zigzag(0), 0);
        assert_eq!(zigzag(-1), 1);
        assert_eq!(zigzag(1), 2);
        assert_eq!(zigzag(-2), 3);
        assert_eq!(zigzag(2147483647), 4294967294);
        assert_eq!(zigzag(-2147483648), 4294967295);

        for value in [i64::MIN, -300, -1, 0, 1, 300, i64::MAX] {
            let mut buf = BytesMut::new();
            encode_zigzag(value, &mut buf);
            assert_eq!(decode_zigzag(&buf).unwrap().0, value);
        }
    }

    #[test]
    fn test_float_and_double() {
        let mut buf = BytesMut::new();
        encode_float(1.5, &mut buf);
        encode_double(-2.25, &mut buf);
        assert_eq!(buf.len(), 12);
        assert_eq!(&buf[..4], &1.5f32.to_le_bytes());

        assert_eq!(decode_float(&buf).unwrap(), 1.5);
        assert_eq!(decode_double(&buf[4..]).unwrap(), -2.25);
        assert!(matches!(
            decode_double(&buf[8..]),
            Err(ProtocolError::Truncated { needed: 4 })
        ));
    }

    #[test]
    fn test_str_encoding() {
        let mut buf = BytesMut::new();
        encode_str("héllo 世界", &mut buf);
        assert_eq!(buf.len(), "héllo 世界".len());
        assert_eq!(decode_str(&buf).unwrap(), "héllo 世界");
        assert!(decode_str(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_message_id_is_msb_first() {
        let mut buf = BytesMut::new();
        encode_message_id(300, &mut buf);
        // 300 = 0b10_0101100 -> groups [0b10, 0b0101100]
        assert_eq!(buf.to_vec(), vec![0x82, 0x2c]);
        assert_eq!(decode_message_id(&buf).unwrap(), (300, 2));

        let mut buf = BytesMut::new();
        encode_message_id(0, &mut buf);
        assert_eq!(buf.to_vec(), vec![0x00]);
    }

    #[test]
    fn test_message_id_extremes() {
        let mut buf = BytesMut::new();
        encode_message_id(u32::MAX, &mut buf);
        assert_eq!(buf.len(), MAX_MESSAGE_ID_BYTES);
        assert_eq!(decode_message_id(&buf).unwrap(), (u32::MAX, 5));

        assert!(matches!(
            decode_message_id(&[0xff, 0xff, 0xff, 0xff, 0xff, 0x01]),
            Err(ProtocolError::InvalidMessageId)
        ));
        assert!(matches!(
            decode_message_id(&[0x81]),
            Err(ProtocolError::Truncated { .. })
        ));
    }
}
