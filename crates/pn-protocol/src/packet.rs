//! Packet framing
//!
//! Every packet on the transport starts with a 4-byte header:
//! - packet_type: 1 byte (u8)
//! - body_length: 3 bytes (u24, big-endian, max 16MB - 1)

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Size of the packet header in bytes
pub const HEADER_SIZE: usize = 4;

/// Maximum body size (16MB - 1, limited by 24-bit length field)
pub const MAX_BODY_SIZE: usize = 0x00FF_FFFF;

/// Packet type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Handshake request (client) or response (server), JSON body
    Handshake = 0x01,
    /// Client acknowledgment of a successful handshake, empty body
    HandshakeAck = 0x02,
    /// Liveness probe, empty body
    Heartbeat = 0x03,
    /// Carries one encoded message
    Data = 0x04,
    /// Server is dropping this client
    Kick = 0x05,
}

impl PacketType {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Handshake),
            0x02 => Some(Self::HandshakeAck),
            0x03 => Some(Self::Heartbeat),
            0x04 => Some(Self::Data),
            0x05 => Some(Self::Kick),
            _ => None,
        }
    }
}

/// Packet header containing type and length information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Type of packet
    pub packet_type: PacketType,
    /// Length of the body in bytes
    pub body_length: u32,
}

impl PacketHeader {
    /// Create a new packet header
    pub fn new(packet_type: PacketType, body_length: u32) -> Self {
        Self {
            packet_type,
            body_length,
        }
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.packet_type.as_u8());
        // body_length: 3 bytes big-endian (24-bit)
        dst.put_u8((self.body_length >> 16) as u8);
        dst.put_u16(self.body_length as u16);
    }

    /// Decode a header from a byte buffer
    ///
    /// Returns None if there aren't enough bytes in the buffer.
    /// Returns Err if the packet type is unknown.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = Self::peek(src)?;
        src.advance(HEADER_SIZE);
        Ok(Some(header))
    }

    /// Parse a header from the first four bytes of `src` without consuming them
    pub fn peek(src: &[u8]) -> Result<Self, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                needed: HEADER_SIZE - src.len(),
            });
        }

        let packet_type =
            PacketType::from_u8(src[0]).ok_or(ProtocolError::InvalidPacketType(src[0]))?;
        let body_length = (src[1] as u32) << 16 | (src[2] as u32) << 8 | src[3] as u32;

        Ok(Self {
            packet_type,
            body_length,
        })
    }
}

/// A complete packet: type plus (possibly empty) body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet type
    pub packet_type: PacketType,
    /// Raw body bytes
    pub body: Bytes,
}

impl Packet {
    /// Create a new packet
    pub fn new(packet_type: PacketType, body: impl Into<Bytes>) -> Self {
        Self {
            packet_type,
            body: body.into(),
        }
    }

    /// Create a packet with an empty body
    pub fn empty(packet_type: PacketType) -> Self {
        Self::new(packet_type, Bytes::new())
    }

    /// Append header and body to `dst`
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let body_len = self.body.len();
        if body_len > MAX_BODY_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: body_len,
                max: MAX_BODY_SIZE,
            });
        }

        dst.reserve(HEADER_SIZE + body_len);
        PacketHeader::new(self.packet_type, body_len as u32).encode(dst);
        dst.extend_from_slice(&self.body);
        Ok(())
    }

    /// Encode into a fresh buffer
    pub fn to_bytes(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.body.len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode exactly one packet from `src`
    ///
    /// Bytes beyond the declared body length are ignored.
    pub fn decode(src: &[u8]) -> Result<Self, ProtocolError> {
        let header = PacketHeader::peek(src)?;
        let body_len = header.body_length as usize;
        let available = src.len() - HEADER_SIZE;
        if available < body_len {
            return Err(ProtocolError::Truncated {
                needed: body_len - available,
            });
        }

        Ok(Self {
            packet_type: header.packet_type,
            body: Bytes::copy_from_slice(&src[HEADER_SIZE..HEADER_SIZE + body_len]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = PacketHeader::new(PacketType::Data, 12345);

        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        header.encode(&mut buf);

        assert_eq!(buf.len(), HEADER_SIZE);

        let decoded = PacketHeader::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, header);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_header_layout() {
        let mut buf = BytesMut::new();
        PacketHeader::new(PacketType::Kick, 0x010203).encode(&mut buf);
        assert_eq!(&buf[..], &[0x05, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_max_body_length() {
        let header = PacketHeader::new(PacketType::Data, MAX_BODY_SIZE as u32);

        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        header.encode(&mut buf);

        let decoded = PacketHeader::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.body_length, MAX_BODY_SIZE as u32);
    }

    #[test]
    fn test_insufficient_bytes() {
        let mut buf = BytesMut::from(&[0x04u8, 0][..]);
        let result = PacketHeader::decode(&mut buf).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_unknown_packet_type() {
        let mut buf = BytesMut::from(&[0xFE, 0, 0, 10][..]);
        let result = PacketHeader::decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::InvalidPacketType(0xFE))));
    }

    #[test]
    fn test_packet_roundtrip_with_empty_body() {
        let packet = Packet::empty(PacketType::HandshakeAck);
        let bytes = packet.to_bytes().unwrap();
        assert_eq!(&bytes[..], &[0x02, 0, 0, 0]);
        assert_eq!(Packet::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_packet_truncated_body() {
        let bytes = Packet::new(PacketType::Data, &b"hello"[..]).to_bytes().unwrap();
        let result = Packet::decode(&bytes[..bytes.len() - 2]);
        assert!(matches!(result, Err(ProtocolError::Truncated { needed: 2 })));
    }

    #[test]
    fn test_packet_body_too_large() {
        let packet = Packet::new(PacketType::Data, vec![0u8; MAX_BODY_SIZE + 1]);
        let mut buf = BytesMut::new();
        assert!(matches!(
            packet.encode(&mut buf),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
        assert!(buf.is_empty());
    }
}
