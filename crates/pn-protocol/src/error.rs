//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding wire frames and payloads
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Input ended before a complete value could be read
    #[error("Truncated input: needed {needed} more bytes")]
    Truncated { needed: usize },

    /// Varint runs past the width of its target integer
    #[error("Varint overflows 64 bits")]
    VarintOverflow,

    /// Unknown packet type byte
    #[error("Unknown packet type: {0}")]
    InvalidPacketType(u8),

    /// Packet body exceeds the 24-bit length field
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Message kind outside REQUEST/NOTIFY/RESPONSE/PUSH
    #[error("Invalid message kind: {0}")]
    InvalidKind(u8),

    /// Message id varint is longer than the id space allows
    #[error("Invalid message id encoding")]
    InvalidMessageId,

    /// Compressed route code does not fit in two bytes
    #[error("Route code {0} exceeds 65535")]
    RouteOverflow(u32),

    /// Literal route does not fit behind a one-byte length
    #[error("Route is {0} bytes long, maximum is 255")]
    RouteTooLong(usize),

    /// A required schema field is absent from the value being encoded
    #[error("Missing required field: {0}")]
    MissingRequiredField(String),

    /// Decoded field tag has no descriptor in the schema
    #[error("Unknown field tag {tag} in message")]
    UnknownTag { tag: u64 },

    /// Field references a message type that is not in scope
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// Value does not match the field's declared type
    #[error("Invalid value for field '{field}': expected {expected}")]
    InvalidFieldValue {
        field: String,
        expected: &'static str,
    },

    /// Nested messages go deeper than the codec allows
    #[error("Message nesting exceeds {max} levels")]
    NestingTooDeep { max: usize },

    /// Schema tree received from the server is malformed
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// Bytes are not valid UTF-8
    #[error("Invalid UTF-8 string")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// JSON payload error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
