//! Core error types for the pinus client

use pn_protocol::ProtocolError;
use std::path::PathBuf;
use thiserror::Error;

use crate::types::{HandshakeCode, SessionState};

/// Top-level error type for client operations
#[derive(Error, Debug)]
pub enum ClientError {
    /// Malformed wire data or payload
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server rejected the handshake
    #[error("Handshake rejected with code {code}: {message}")]
    Handshake { code: HandshakeCode, message: String },

    /// Operation not allowed in the current session state
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        state: SessionState,
        operation: &'static str,
    },

    /// The session task is gone
    #[error("Not connected")]
    NotConnected,

    /// The connection closed before the operation completed
    #[error("Connection closed")]
    ConnectionClosed,

    /// No response arrived within the configured timeout
    #[error("Request {id} to '{route}' timed out")]
    RequestTimeout { id: u32, route: String },

    /// The server stopped answering heartbeats
    #[error("Server heartbeat timeout")]
    HeartbeatTimeout,

    /// Connecting did not finish within the configured timeout
    #[error("Connect timed out")]
    ConnectTimeout,

    /// Typed payload conversion failed
    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
