//! pn-client: Client for the pinus binary protocol
//!
//! [`Session`] is the connection state machine. It performs no I/O: it is fed
//! packets and timestamps and queues packets to send. [`Client`] drives one
//! session over a tokio byte stream and exposes request, notify and events.

pub mod client;
pub mod dictionary;
pub mod handshake;
pub mod heartbeat;
pub mod pending;
pub mod reconnect;
pub mod session;

pub use client::Client;
pub use dictionary::RouteDictionary;
pub use heartbeat::Heartbeat;
pub use reconnect::ExponentialBackoff;
pub use session::{Session, SessionAction};
