//! Session state machine
//!
//! The session owns everything negotiated for one connection: heartbeat
//! timers, the route dictionary, payload schemas and outstanding requests.
//! It performs no I/O. Inputs arrive as method calls carrying the current
//! time; outputs are queued as [`SessionAction`]s for the driver to execute.
//!
//! ```text
//! ┌──────┐ connect ┌────────────┐ open ┌──────────────────────┐ code 200 ┌───────┐
//! │ Idle │────────>│ Connecting │─────>│ AwaitingHandshakeAck │─────────>│ Ready │
//! └──────┘         └────────────┘      └──────────────────────┘          └───────┘
//!                        │                        │ rejected                 │
//!                        │ close                  ↓                          │ close, heartbeat
//!                        └───────────────────>┌────────┐<────────────────────┘ timeout, bad frame
//!                                             │ Closed │
//!                                             └────────┘
//! ```
//!
//! `Closed` is terminal. Reconnecting means building a new session.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::time::Instant;

use pn_core::config::ClientConfig;
use pn_core::emitter::{EVENT_CLOSE, EVENT_ERROR, EVENT_HEARTBEAT_TIMEOUT, EVENT_IO_ERROR, EVENT_KICK};
use pn_core::{ClientError, EventEmitter, HandshakeCode, SessionState};
use pn_protocol::{Message, Packet, PacketType, ProtocolError, Route, SchemaRegistry, MAX_BODY_SIZE};

use crate::dictionary::RouteDictionary;
use crate::handshake::{HandshakeRequest, HandshakeResponse};
use crate::heartbeat::{Heartbeat, HeartbeatEvent};
use crate::pending::{PendingRequest, PendingRequests, ResponseCallback};

/// Invoked once when the handshake completes, with the server's `user`
/// payload, or with the reason it never will
pub type ReadyCallback = Box<dyn FnOnce(Result<Value, ClientError>) + Send>;

/// Work the driver must perform on behalf of the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Write this packet to the transport
    Send(Packet),
    /// Shut the transport down
    Close,
}

/// One client session over one transport connection
pub struct Session {
    state: SessionState,
    handshake: HandshakeRequest,
    request_timeout: Option<Duration>,
    heartbeat: Heartbeat,
    dictionary: RouteDictionary,
    registry: SchemaRegistry,
    pending: PendingRequests,
    last_id: u32,
    handshake_user: Value,
    on_ready: Option<ReadyCallback>,
    events: Arc<EventEmitter>,
    outbox: VecDeque<SessionAction>,
}

impl Session {
    /// Create an idle session publishing events through `events`
    pub fn new(config: &ClientConfig, events: Arc<EventEmitter>) -> Self {
        Self {
            state: SessionState::Idle,
            handshake: HandshakeRequest::from_config(config),
            request_timeout: config.request_timeout,
            heartbeat: Heartbeat::default(),
            dictionary: RouteDictionary::default(),
            registry: SchemaRegistry::default(),
            pending: PendingRequests::new(),
            last_id: 0,
            handshake_user: Value::Null,
            on_ready: None,
            events,
            outbox: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn events(&self) -> &Arc<EventEmitter> {
        &self.events
    }

    pub fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }

    pub fn dictionary(&self) -> &RouteDictionary {
        &self.dictionary
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Server's handshake `user` payload, null until ready
    pub fn handshake_user(&self) -> &Value {
        &self.handshake_user
    }

    /// Whether request `id` still awaits its response
    pub fn is_pending(&self, id: u32) -> bool {
        self.pending.contains(id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Next queued action for the driver
    pub fn poll_action(&mut self) -> Option<SessionAction> {
        self.outbox.pop_front()
    }

    /// Start connecting; the driver should now open the transport
    pub fn begin_connect(&mut self, on_ready: ReadyCallback) -> Result<(), ClientError> {
        self.expect_state(SessionState::Idle, "connect")?;
        self.state = SessionState::Connecting;
        self.on_ready = Some(on_ready);
        Ok(())
    }

    /// The transport is open: send the handshake
    pub fn on_transport_open(&mut self) -> Result<(), ClientError> {
        self.expect_state(SessionState::Connecting, "open transport")?;
        let body = serde_json::to_vec(&self.handshake)?;
        self.send(Packet::new(PacketType::Handshake, body));
        self.state = SessionState::AwaitingHandshakeAck;
        tracing::debug!("Handshake sent");
        Ok(())
    }

    /// Process one packet received from the server
    ///
    /// An `Err` means the packet was fatal and the session is now closed.
    pub fn on_packet(&mut self, packet: Packet, now: Instant) -> Result<(), ClientError> {
        if self.state.is_closed() {
            tracing::debug!("Ignoring {:?} packet on closed session", packet.packet_type);
            return Ok(());
        }

        let result = match packet.packet_type {
            PacketType::Handshake => self.on_handshake(&packet.body),
            PacketType::Heartbeat => {
                tracing::trace!("Heartbeat received");
                self.heartbeat.on_heartbeat(now);
                Ok(())
            }
            PacketType::Data => self.on_data(&packet.body),
            PacketType::Kick => {
                self.on_kick(&packet.body);
                Ok(())
            }
            PacketType::HandshakeAck => {
                tracing::warn!("Unexpected HANDSHAKE_ACK from server, dropping");
                Ok(())
            }
        };

        if let Err(e) = result {
            return Err(self.fail(e));
        }
        if !self.state.is_closed() {
            self.heartbeat.on_packet(now);
        }
        Ok(())
    }

    /// The inbound byte stream could not be framed
    pub fn on_decode_error(&mut self, error: ProtocolError) -> ClientError {
        self.fail(error.into())
    }

    /// The transport failed
    pub fn on_transport_error(&mut self, error: &std::io::Error) {
        if self.state.is_closed() {
            return;
        }
        tracing::warn!("Transport error: {}", error);
        self.events
            .emit(EVENT_IO_ERROR, &Value::String(error.to_string()));
        self.close();
    }

    /// The transport closed
    pub fn on_transport_closed(&mut self) {
        if !self.state.is_closed() {
            tracing::info!("Connection closed by peer");
            self.close();
        }
    }

    /// Close the session at the application's request
    pub fn disconnect(&mut self) {
        if !self.state.is_closed() {
            tracing::info!("Disconnecting");
            self.close();
        }
    }

    /// Send a correlated request
    ///
    /// `callback` receives the decoded response, or the error that prevents
    /// one: a payload that fails to serialize is reported before anything
    /// reaches the wire. Returns the request id if the request was sent.
    pub fn request(
        &mut self,
        route: &str,
        payload: &Value,
        callback: ResponseCallback,
        now: Instant,
    ) -> Option<u32> {
        if let Err(e) = self.expect_state(SessionState::Ready, "request") {
            callback(Err(e));
            return None;
        }

        let id = self.next_id();
        let message = Message::request(id, self.route(route), Bytes::new());
        let packet = match self.data_packet(message, route, payload) {
            Ok(packet) => packet,
            Err(e) => {
                callback(Err(e));
                return None;
            }
        };

        tracing::debug!("Request {} to '{}'", id, route);
        self.pending.insert(
            id,
            PendingRequest {
                route: route.to_string(),
                callback,
                deadline: self.request_timeout.map(|t| now + t),
            },
        );
        self.send(packet);
        Some(id)
    }

    /// Send a fire-and-forget notification
    pub fn notify(&mut self, route: &str, payload: &Value) -> Result<(), ClientError> {
        self.expect_state(SessionState::Ready, "notify")?;
        let message = Message::notify(self.route(route), Bytes::new());
        let packet = self.data_packet(message, route, payload)?;
        tracing::debug!("Notify to '{}'", route);
        self.send(packet);
        Ok(())
    }

    /// Fire the timers due at `now`
    ///
    /// An `Err` means the server missed its heartbeat and the session is
    /// now closed.
    pub fn poll_timers(&mut self, now: Instant) -> Result<(), ClientError> {
        if self.state.is_closed() {
            return Ok(());
        }

        for (id, request) in self.pending.take_expired(now) {
            tracing::warn!("Request {} to '{}' timed out", id, request.route);
            let route = request.route.clone();
            request.complete(Err(ClientError::RequestTimeout { id, route }));
        }

        while let Some(event) = self.heartbeat.poll(now) {
            match event {
                HeartbeatEvent::Send => {
                    tracing::trace!("Sending heartbeat");
                    self.send(Packet::empty(PacketType::Heartbeat));
                }
                HeartbeatEvent::TimedOut => {
                    tracing::error!("Server heartbeat timeout");
                    self.events.emit(EVENT_HEARTBEAT_TIMEOUT, &Value::Null);
                    self.close();
                    return Err(ClientError::HeartbeatTimeout);
                }
            }
        }
        Ok(())
    }

    /// When [`Session::poll_timers`] next has work
    pub fn next_timer(&self) -> Option<Instant> {
        if self.state.is_closed() {
            return None;
        }
        match (self.heartbeat.next_wakeup(), self.pending.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn on_handshake(&mut self, body: &[u8]) -> Result<(), ClientError> {
        if self.state != SessionState::AwaitingHandshakeAck {
            tracing::warn!("Unexpected handshake while {}, dropping", self.state);
            return Ok(());
        }

        let response: HandshakeResponse = serde_json::from_slice(body)?;
        let code = HandshakeCode::from_code(response.code);
        if code != HandshakeCode::Ok {
            tracing::warn!("Handshake rejected with code {}: {}", code, code.reason());
            if let Some(on_ready) = self.on_ready.take() {
                on_ready(Err(ClientError::Handshake {
                    code,
                    message: code.reason().to_string(),
                }));
            }
            return Err(ClientError::Handshake {
                code,
                message: code.reason().to_string(),
            });
        }

        let sys = response.sys.unwrap_or_default();
        let heartbeat = Heartbeat::from_secs(sys.heartbeat.unwrap_or(0.0));
        let dictionary = match sys.dict {
            Some(dict) => RouteDictionary::from_map(dict)?,
            None => RouteDictionary::default(),
        };
        let registry = match sys.protos {
            Some(protos) => SchemaRegistry::from_handshake(&protos)?,
            None => SchemaRegistry::default(),
        };

        self.heartbeat = heartbeat;
        self.dictionary = dictionary;
        self.registry = registry;
        self.handshake_user = response.user;

        self.send(Packet::empty(PacketType::HandshakeAck));
        self.state = SessionState::Ready;
        tracing::info!(
            "Handshake complete (heartbeat {:?}, {} compressed routes)",
            self.heartbeat.interval(),
            self.dictionary.len()
        );

        if let Some(on_ready) = self.on_ready.take() {
            on_ready(Ok(self.handshake_user.clone()));
        }
        Ok(())
    }

    fn on_data(&mut self, body: &[u8]) -> Result<(), ClientError> {
        if self.state != SessionState::Ready {
            tracing::warn!("Data before handshake completed, dropping");
            return Ok(());
        }

        let message = Message::decode(body)?;

        if message.id > 0 {
            let Some(request) = self.pending.take(message.id) else {
                tracing::debug!("Dropping response to unknown request {}", message.id);
                return Ok(());
            };
            tracing::debug!("Response to request {}", message.id);
            let result = self
                .registry
                .decode(&request.route, &message.body)
                .map_err(ClientError::from);
            request.complete(result);
            return Ok(());
        }

        let route = match message.route {
            Route::Name(name) => name,
            Route::Code(code) => {
                match u16::try_from(code).ok().and_then(|c| self.dictionary.route(c)) {
                    Some(route) => route.to_string(),
                    None => {
                        tracing::debug!("Dropping push with unknown route code {}", code);
                        return Ok(());
                    }
                }
            }
            Route::None => {
                tracing::debug!("Dropping push without route");
                return Ok(());
            }
        };

        match self.registry.decode(&route, &message.body) {
            Ok(payload) => {
                tracing::debug!("Push on '{}'", route);
                self.events.emit(&route, &payload);
            }
            Err(e) => {
                tracing::warn!("Failed to decode push on '{}': {}", route, e);
                self.events.emit(
                    EVENT_ERROR,
                    &Value::String(format!("Failed to decode push on '{}': {}", route, e)),
                );
            }
        }
        Ok(())
    }

    fn on_kick(&mut self, body: &[u8]) {
        let reason = serde_json::from_slice(body).unwrap_or(Value::Null);
        tracing::warn!("Kicked by server: {}", reason);
        self.events.emit(EVENT_KICK, &reason);
    }

    /// Encode `payload` for `route` into `message` and wrap it in a DATA packet
    fn data_packet(&self, mut message: Message, route: &str, payload: &Value) -> Result<Packet, ClientError> {
        message.body = self.registry.encode(route, payload)?;
        let bytes = message.to_bytes()?;
        if bytes.len() > MAX_BODY_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: MAX_BODY_SIZE,
            }
            .into());
        }
        Ok(Packet::new(PacketType::Data, bytes))
    }

    fn route(&self, route: &str) -> Route {
        match self.dictionary.code(route) {
            Some(code) => Route::Code(u32::from(code)),
            None => Route::from(route),
        }
    }

    fn next_id(&mut self) -> u32 {
        self.last_id = self.last_id.wrapping_add(1).max(1);
        self.last_id
    }

    fn expect_state(&self, expected: SessionState, operation: &'static str) -> Result<(), ClientError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ClientError::InvalidState {
                state: self.state,
                operation,
            })
        }
    }

    fn send(&mut self, packet: Packet) {
        self.outbox.push_back(SessionAction::Send(packet));
    }

    /// Report a fatal error and close
    fn fail(&mut self, error: ClientError) -> ClientError {
        if self.state.is_closed() {
            return error;
        }
        tracing::error!("Closing session: {}", error);
        self.events.emit(EVENT_ERROR, &Value::String(error.to_string()));
        self.close();
        error
    }

    fn close(&mut self) {
        self.state = SessionState::Closed;
        self.heartbeat.cancel();

        for (_, request) in self.pending.drain() {
            request.complete(Err(ClientError::ConnectionClosed));
        }
        if let Some(on_ready) = self.on_ready.take() {
            on_ready(Err(ClientError::ConnectionClosed));
        }

        self.outbox.push_back(SessionAction::Close);
        self.events.emit(EVENT_CLOSE, &Value::Null);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("heartbeat", &self.heartbeat)
            .field("routes", &self.dictionary.len())
            .field("pending", &self.pending.len())
            .field("last_id", &self.last_id)
            .finish_non_exhaustive()
    }
}
