//! Tokio codec for packets on a byte stream

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::packet::{Packet, PacketHeader, MAX_BODY_SIZE};

/// Codec for encoding/decoding packets
#[derive(Debug, Default)]
pub struct PacketCodec {
    /// Current header being decoded (if any)
    pending_header: Option<PacketHeader>,
}

impl PacketCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self {
            pending_header: None,
        }
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Try to decode header if we don't have one
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => match PacketHeader::decode(src)? {
                Some(h) => h,
                None => return Ok(None), // Need more data
            },
        };

        let body_len = header.body_length as usize;

        // Check if we have enough data for the body
        if src.len() < body_len {
            // Save header and wait for more data
            src.reserve(body_len - src.len());
            self.pending_header = Some(header);
            return Ok(None);
        }

        let body = src.split_to(body_len).freeze();

        Ok(Some(Packet {
            packet_type: header.packet_type,
            body,
        }))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if packet.body.len() > MAX_BODY_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: packet.body.len(),
                max: MAX_BODY_SIZE,
            });
        }

        packet.encode(dst)
    }
}
