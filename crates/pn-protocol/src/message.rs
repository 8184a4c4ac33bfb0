//! Message framing
//!
//! A message travels inside the body of a DATA packet:
//!
//! ```text
//! +------+----------------+-----------------------------+------+
//! | flag | id (varint)    | route                       | body |
//! +------+----------------+-----------------------------+------+
//!   1B     REQUEST/RESPONSE  REQUEST/NOTIFY/PUSH only
//!          MSB-first groups  compressed: u16 big-endian
//!                            literal: u8 length + UTF-8
//! ```
//!
//! `flag = (kind << 1) | compress_route`. Everything after the route is the
//! body, already serialized by the schema encoder or as JSON.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::varint;

/// Size of the flag byte
pub const FLAG_SIZE: usize = 1;

/// Largest route code that fits the compressed form
pub const MAX_ROUTE_CODE: u32 = 0xFFFF;

/// Longest literal route in bytes
pub const MAX_ROUTE_LEN: usize = 0xFF;

const COMPRESS_ROUTE_MASK: u8 = 0x1;
const KIND_MASK: u8 = 0x7;

/// Message kind carried in the flag byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Correlated call expecting a response
    Request = 0,
    /// Fire-and-forget call
    Notify = 1,
    /// Reply to a request, carries no route
    Response = 2,
    /// Server-initiated event
    Push = 3,
}

impl MessageKind {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(Self::Request),
            1 => Ok(Self::Notify),
            2 => Ok(Self::Response),
            3 => Ok(Self::Push),
            other => Err(ProtocolError::InvalidKind(other)),
        }
    }

    /// Whether this kind carries a message id
    pub fn has_id(&self) -> bool {
        matches!(self, Self::Request | Self::Response)
    }

    /// Whether this kind carries a route
    pub fn has_route(&self) -> bool {
        matches!(self, Self::Request | Self::Notify | Self::Push)
    }
}

/// Route of a message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    /// No route (responses)
    None,
    /// Dictionary-compressed route code
    Code(u32),
    /// Literal route name
    Name(String),
}

impl Route {
    /// Whether the route uses the compressed form
    pub fn is_compressed(&self) -> bool {
        matches!(self, Route::Code(_))
    }

    /// Literal route name, if any
    pub fn name(&self) -> Option<&str> {
        match self {
            Route::Name(name) => Some(name),
            _ => None,
        }
    }
}

impl From<&str> for Route {
    fn from(name: &str) -> Self {
        Route::Name(name.to_string())
    }
}

/// A decoded or to-be-encoded message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Correlation id, 0 for messages without one
    pub id: u32,
    /// Message kind
    pub kind: MessageKind,
    /// Route (ignored for responses)
    pub route: Route,
    /// Serialized payload
    pub body: Bytes,
}

impl Message {
    /// Create a new message
    pub fn new(id: u32, kind: MessageKind, route: Route, body: impl Into<Bytes>) -> Self {
        Self {
            id,
            kind,
            route,
            body: body.into(),
        }
    }

    /// Correlated request
    pub fn request(id: u32, route: Route, body: impl Into<Bytes>) -> Self {
        Self::new(id, MessageKind::Request, route, body)
    }

    /// Fire-and-forget notification
    pub fn notify(route: Route, body: impl Into<Bytes>) -> Self {
        Self::new(0, MessageKind::Notify, route, body)
    }

    /// Response to request `id`
    pub fn response(id: u32, body: impl Into<Bytes>) -> Self {
        Self::new(id, MessageKind::Response, Route::None, body)
    }

    /// Server push
    pub fn push(route: Route, body: impl Into<Bytes>) -> Self {
        Self::new(0, MessageKind::Push, route, body)
    }

    /// Whether the route is dictionary-compressed
    pub fn route_compressed(&self) -> bool {
        self.kind.has_route() && self.route.is_compressed()
    }

    /// Append the encoded message to `dst`
    ///
    /// Nothing is written if the route is invalid.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        if self.kind.has_route() {
            match &self.route {
                Route::Code(code) if *code > MAX_ROUTE_CODE => {
                    return Err(ProtocolError::RouteOverflow(*code));
                }
                Route::Name(name) if name.len() > MAX_ROUTE_LEN => {
                    return Err(ProtocolError::RouteTooLong(name.len()));
                }
                _ => {}
            }
        }

        dst.reserve(self.encoded_len());

        let compressed = self.route_compressed();
        dst.put_u8((self.kind.as_u8() << 1) | compressed as u8);

        if self.kind.has_id() {
            varint::encode_message_id(self.id, dst);
        }

        if self.kind.has_route() {
            match &self.route {
                Route::Code(code) => dst.put_u16(*code as u16),
                Route::Name(name) => {
                    dst.put_u8(name.len() as u8);
                    varint::encode_str(name, dst);
                }
                Route::None => dst.put_u8(0),
            }
        }

        dst.extend_from_slice(&self.body);
        Ok(())
    }

    /// Encode into a fresh buffer
    pub fn to_bytes(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Exact number of bytes [`Message::encode`] writes
    pub fn encoded_len(&self) -> usize {
        let mut len = FLAG_SIZE + self.body.len();
        if self.kind.has_id() {
            len += varint::message_id_len(self.id);
        }
        if self.kind.has_route() {
            len += match &self.route {
                Route::Code(_) => 2,
                Route::Name(name) => 1 + name.len(),
                Route::None => 1,
            };
        }
        len
    }

    /// Decode a message occupying all of `src`
    pub fn decode(src: &[u8]) -> Result<Self, ProtocolError> {
        let flag = *src.first().ok_or(ProtocolError::Truncated { needed: 1 })?;
        let compressed = flag & COMPRESS_ROUTE_MASK != 0;
        let kind = MessageKind::from_u8((flag >> 1) & KIND_MASK)?;
        let mut offset = FLAG_SIZE;

        let mut id = 0;
        if kind.has_id() {
            let (decoded, used) = varint::decode_message_id(&src[offset..])?;
            id = decoded;
            offset += used;
        }

        let mut route = Route::None;
        if kind.has_route() {
            if compressed {
                let bytes = take(src, offset, 2)?;
                route = Route::Code(u16::from_be_bytes([bytes[0], bytes[1]]) as u32);
                offset += 2;
            } else {
                let len = take(src, offset, 1)?[0] as usize;
                offset += 1;
                let name = varint::decode_str(take(src, offset, len)?)?;
                route = Route::Name(name.to_string());
                offset += len;
            }
        }

        Ok(Self {
            id,
            kind,
            route,
            body: Bytes::copy_from_slice(&src[offset..]),
        })
    }
}

fn take(src: &[u8], offset: usize, len: usize) -> Result<&[u8], ProtocolError> {
    src.get(offset..offset + len)
        .ok_or_else(|| ProtocolError::Truncated {
            needed: offset + len - src.len(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            MessageKind::Request,
            MessageKind::Notify,
            MessageKind::Response,
            MessageKind::Push,
        ] {
            assert_eq!(MessageKind::from_u8(kind.as_u8()).unwrap(), kind);
        }
        assert!(matches!(
            MessageKind::from_u8(4),
            Err(ProtocolError::InvalidKind(4))
        ));
    }

    #[test]
    fn test_request_layout() {
        let msg = Message::request(1, Route::from("chat.say"), &b"{}"[..]);
        let bytes = msg.to_bytes().unwrap();

        let mut expected = vec![0x00, 0x01, 8];
        expected.extend_from_slice(b"chat.say");
        expected.extend_from_slice(b"{}");
        assert_eq!(bytes.to_vec(), expected);
        assert_eq!(bytes.len(), msg.encoded_len());

        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_compressed_notify_layout() {
        let msg = Message::notify(Route::Code(0x0102), &b"x"[..]);
        let bytes = msg.to_bytes().unwrap();
        // flag = (1 << 1) | 1, no id, 2-byte route code
        assert_eq!(bytes.to_vec(), vec![0x03, 0x01, 0x02, b'x']);
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_response_has_no_route() {
        let msg = Message::response(300, &b"{\"ok\":true}"[..]);
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(&bytes[..3], &[0x04, 0x82, 0x2c]);

        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded.id, 300);
        assert_eq!(decoded.route, Route::None);
        assert_eq!(decoded.body.as_ref(), b"{\"ok\":true}");
    }

    #[test]
    fn test_empty_route_writes_zero_length() {
        let msg = Message::push(Route::None, Bytes::new());
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(bytes.to_vec(), vec![0x06, 0x00]);
        assert_eq!(Message::decode(&bytes).unwrap().route, Route::Name(String::new()));
    }

    #[test]
    fn test_route_overflow() {
        let msg = Message::notify(Route::Code(70000), Bytes::new());
        let mut buf = BytesMut::new();
        assert!(matches!(
            msg.encode(&mut buf),
            Err(ProtocolError::RouteOverflow(70000))
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_route_too_long() {
        let msg = Message::notify(Route::Name("r".repeat(256)), Bytes::new());
        assert!(matches!(
            msg.to_bytes(),
            Err(ProtocolError::RouteTooLong(256))
        ));
        let msg = Message::notify(Route::Name("r".repeat(255)), Bytes::new());
        assert!(msg.to_bytes().is_ok());
    }

    #[test]
    fn test_decode_truncated_route() {
        // REQUEST, id 1, literal route claiming 10 bytes but carrying 3
        let bytes = [0x00, 0x01, 10, b'a', b'b', b'c'];
        assert!(matches!(
            Message::decode(&bytes),
            Err(ProtocolError::Truncated { needed: 7 })
        ));
        assert!(Message::decode(&[]).is_err());
    }

    #[test]
    fn test_decode_invalid_kind() {
        assert!(matches!(
            Message::decode(&[0x0a]),
            Err(ProtocolError::InvalidKind(5))
        ));
    }
}
