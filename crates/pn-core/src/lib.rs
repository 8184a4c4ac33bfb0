//! pn-core: Core configuration, errors and events for the pinus client
//!
//! This crate provides the configuration structures, the client error
//! taxonomy, and the named-event notifier shared by the session and the
//! command-line client.

pub mod config;
pub mod emitter;
pub mod error;
pub mod types;

pub use emitter::{EventEmitter, ListenerId};
pub use error::{ClientError, ConfigError};
pub use types::{HandshakeCode, SessionState};
