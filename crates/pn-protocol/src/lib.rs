//! pn-protocol: Wire protocol for the pinus client
//!
//! This crate defines the two framing layers spoken with a pinus server
//! (outer packets carrying inner messages), the varint and scalar primitives
//! they share, and the schema-driven binary payload serializer.

pub mod codec;
pub mod error;
pub mod message;
pub mod packet;
pub mod schema;
pub mod varint;

pub use codec::PacketCodec;
pub use error::ProtocolError;
pub use message::{Message, MessageKind, Route};
pub use packet::{Packet, PacketHeader, PacketType, HEADER_SIZE, MAX_BODY_SIZE};
pub use schema::{MessageSchema, SchemaRegistry, SchemaSet};
