//! Property-based tests for the wire codecs.
//!
//! These verify that every valid packet, message and varint survives an
//! encode/decode cycle unchanged.

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

use pn_protocol::varint::{
    decode_message_id, decode_uvarint, decode_zigzag, encode_message_id, encode_uvarint,
    encode_zigzag,
};
use pn_protocol::{Message, MessageKind, Packet, PacketCodec, PacketType, Route};

fn packet_type_strategy() -> impl Strategy<Value = PacketType> {
    prop_oneof![
        Just(PacketType::Handshake),
        Just(PacketType::HandshakeAck),
        Just(PacketType::Heartbeat),
        Just(PacketType::Data),
        Just(PacketType::Kick),
    ]
}

fn route_strategy() -> impl Strategy<Value = Route> {
    prop_oneof![
        (0u32..=0xFFFF).prop_map(Route::Code),
        "[a-zA-Z0-9._]{0,64}".prop_map(Route::Name),
    ]
}

// Messages that respect the per-kind field rules: ids only on
// REQUEST/RESPONSE, routes only on REQUEST/NOTIFY/PUSH.
fn message_strategy() -> impl Strategy<Value = Message> {
    let body = prop::collection::vec(any::<u8>(), 0..256).prop_map(Bytes::from);
    prop_oneof![
        (any::<u32>(), route_strategy(), body.clone())
            .prop_map(|(id, route, body)| Message::request(id, route, body)),
        (route_strategy(), body.clone()).prop_map(|(route, body)| Message::notify(route, body)),
        (any::<u32>(), body.clone()).prop_map(|(id, body)| Message::response(id, body)),
        (route_strategy(), body).prop_map(|(route, body)| Message::push(route, body)),
    ]
}

proptest! {
    #[test]
    fn prop_packet_roundtrip(
        packet_type in packet_type_strategy(),
        body in prop::collection::vec(any::<u8>(), 0..4096),
    ) {
        let packet = Packet::new(packet_type, body);
        let bytes = packet.to_bytes().unwrap();
        prop_assert_eq!(Packet::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn prop_codec_reassembles_split_stream(
        packet_type in packet_type_strategy(),
        body in prop::collection::vec(any::<u8>(), 0..512),
        split in 0usize..600,
    ) {
        let packet = Packet::new(packet_type, body);
        let mut codec = PacketCodec::new();
        let mut wire = BytesMut::new();
        codec.encode(packet.clone(), &mut wire).unwrap();

        let split = split.min(wire.len());
        let mut buf = wire.split_to(split);
        let mut decoded = codec.decode(&mut buf).unwrap();
        if decoded.is_none() {
            buf.extend_from_slice(&wire);
            decoded = codec.decode(&mut buf).unwrap();
        }
        prop_assert_eq!(decoded, Some(packet));
    }

    #[test]
    fn prop_message_roundtrip(message in message_strategy()) {
        let bytes = message.to_bytes().unwrap();
        prop_assert_eq!(bytes.len(), message.encoded_len());

        let decoded = Message::decode(&bytes).unwrap();
        prop_assert_eq!(decoded.kind, message.kind);
        prop_assert_eq!(decoded.id, message.id);
        prop_assert_eq!(decoded.route_compressed(), message.route_compressed());
        prop_assert_eq!(&decoded.route, &message.route);
        prop_assert_eq!(decoded.body, message.body);
    }

    #[test]
    fn prop_message_kind_field_rules(message in message_strategy()) {
        let decoded = Message::decode(&message.to_bytes().unwrap()).unwrap();
        if decoded.kind == MessageKind::Response {
            prop_assert_eq!(decoded.route, Route::None);
        }
        if !decoded.kind.has_id() {
            prop_assert_eq!(decoded.id, 0);
        }
    }

    #[test]
    fn prop_uvarint_roundtrip_and_length(value in 0u64..(1u64 << 40)) {
        let mut buf = BytesMut::new();
        encode_uvarint(value, &mut buf);

        let bits = 64 - value.leading_zeros() as usize;
        let expected_len = std::cmp::max(1, (bits + 6) / 7);
        prop_assert_eq!(buf.len(), expected_len);
        prop_assert_eq!(decode_uvarint(&buf).unwrap(), (value, expected_len));
    }

    #[test]
    fn prop_zigzag_roundtrip(value in any::<i64>()) {
        let mut buf = BytesMut::new();
        encode_zigzag(value, &mut buf);
        prop_assert_eq!(decode_zigzag(&buf).unwrap().0, value);
    }

    #[test]
    fn prop_message_id_roundtrip(id in any::<u32>()) {
        let mut buf = BytesMut::new();
        encode_message_id(id, &mut buf);
        prop_assert_eq!(decode_message_id(&buf).unwrap(), (id, buf.len()));
    }

    #[test]
    fn prop_decoders_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
        let _ = Packet::decode(&bytes);
        let _ = Message::decode(&bytes);
        let _ = decode_uvarint(&bytes);
        let _ = decode_message_id(&bytes);
    }
}
