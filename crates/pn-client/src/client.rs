//! Async client driving a [`Session`] over a byte stream
//!
//! The session lives in one spawned task together with the framed transport.
//! A [`Client`] handle talks to that task over a command channel; replies come
//! back on oneshot channels. Packets, commands and timer deadlines are
//! handled one at a time in arrival order.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::codec::Framed;

use pn_core::config::ClientConfig;
use pn_core::emitter::ListenerId;
use pn_core::{ClientError, EventEmitter, SessionState};
use pn_protocol::{PacketCodec, ProtocolError};

use crate::session::{Session, SessionAction};

/// Capacity of the command channel between handles and the session task
const COMMAND_CHANNEL_CAPACITY: usize = 64;

enum Command {
    Request {
        route: String,
        payload: Value,
        reply: oneshot::Sender<Result<Value, ClientError>>,
    },
    Notify {
        route: String,
        payload: Value,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    State {
        reply: oneshot::Sender<SessionState>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a connected session
#[derive(Debug, Clone)]
pub struct Client {
    commands: mpsc::Sender<Command>,
    events: Arc<EventEmitter>,
    handshake_user: Value,
}

impl Client {
    /// Connect over TCP to `config.address` and complete the handshake
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        Self::connect_with_events(config, Arc::new(EventEmitter::new())).await
    }

    /// Like [`Client::connect`], publishing events through `events`
    ///
    /// Handlers registered beforehand see pushes sent right after the
    /// handshake.
    pub async fn connect_with_events(
        config: &ClientConfig,
        events: Arc<EventEmitter>,
    ) -> Result<Self, ClientError> {
        tracing::debug!("Connecting to {}", config.address);
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&config.address))
            .await
            .map_err(|_| ClientError::ConnectTimeout)??;
        stream.set_nodelay(true)?;
        Self::connect_with_io(stream, config, events).await
    }

    /// Complete the handshake over an already open stream
    pub async fn connect_with<T>(io: T, config: &ClientConfig) -> Result<Self, ClientError>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::connect_with_io(io, config, Arc::new(EventEmitter::new())).await
    }

    /// Complete the handshake over an open stream, publishing through `events`
    pub async fn connect_with_io<T>(
        io: T,
        config: &ClientConfig,
        events: Arc<EventEmitter>,
    ) -> Result<Self, ClientError>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let mut session = Session::new(config, Arc::clone(&events));
        let (ready_tx, ready_rx) = oneshot::channel();
        session.begin_connect(Box::new(move |result| {
            let _ = ready_tx.send(result);
        }))?;
        session.on_transport_open()?;

        let (commands, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let framed = Framed::new(io, PacketCodec::new());
        tokio::spawn(run_session(session, framed, command_rx));

        let handshake_user = match tokio::time::timeout(config.connect_timeout, ready_rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(ClientError::ConnectionClosed),
            Err(_) => {
                tracing::warn!("Handshake timed out");
                // dropping the last sender closes the session
                return Err(ClientError::ConnectTimeout);
            }
        };

        tracing::info!("Connected");
        Ok(Self {
            commands,
            events,
            handshake_user,
        })
    }

    /// Server's handshake `user` payload
    pub fn handshake_user(&self) -> &Value {
        &self.handshake_user
    }

    /// Event notifier for pushes and lifecycle events
    pub fn events(&self) -> &Arc<EventEmitter> {
        &self.events
    }

    /// Register a handler for `event` (a push route or a lifecycle event)
    pub fn on<F>(&self, event: &str, handler: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.events.on(event, handler)
    }

    /// Send a request and wait for its response
    pub async fn request(&self, route: &str, payload: Value) -> Result<Value, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Request {
            route: route.to_string(),
            payload,
            reply,
        })
        .await?;
        rx.await.map_err(|_| ClientError::ConnectionClosed)?
    }

    /// [`Client::request`] with typed payloads
    pub async fn request_as<Req, Resp>(&self, route: &str, payload: &Req) -> Result<Resp, ClientError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let response = self.request(route, serde_json::to_value(payload)?).await?;
        Ok(serde_json::from_value(response)?)
    }

    /// Send a notification
    pub async fn notify(&self, route: &str, payload: Value) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Notify {
            route: route.to_string(),
            payload,
            reply,
        })
        .await?;
        rx.await.map_err(|_| ClientError::ConnectionClosed)?
    }

    /// [`Client::notify`] with a typed payload
    pub async fn notify_as<T>(&self, route: &str, payload: &T) -> Result<(), ClientError>
    where
        T: Serialize + ?Sized,
    {
        self.notify(route, serde_json::to_value(payload)?).await
    }

    /// Current session state
    pub async fn state(&self) -> SessionState {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::State { reply }).await.is_err() {
            return SessionState::Closed;
        }
        rx.await.unwrap_or(SessionState::Closed)
    }

    /// Close the session and wait for the transport to shut down
    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Disconnect { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Wait until the session task has exited
    pub async fn closed(&self) {
        self.commands.closed().await
    }

    async fn send(&self, command: Command) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::NotConnected)
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Request { route, .. } => write!(f, "Request({})", route),
            Command::Notify { route, .. } => write!(f, "Notify({})", route),
            Command::State { .. } => write!(f, "State"),
            Command::Disconnect { .. } => write!(f, "Disconnect"),
        }
    }
}

/// Session task: runs until the session closes
async fn run_session<T>(
    mut session: Session,
    mut framed: Framed<T, PacketCodec>,
    mut commands: mpsc::Receiver<Command>,
) where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let mut disconnect_waiters = Vec::new();

    loop {
        if let Err(e) = flush(&mut session, &mut framed).await {
            transport_failed(&mut session, e);
        }
        if session.state().is_closed() {
            break;
        }

        let wakeup = session.next_timer();

        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Disconnect { reply }) => {
                    disconnect_waiters.push(reply);
                    session.disconnect();
                }
                Some(command) => handle_command(&mut session, command),
                None => {
                    tracing::debug!("All client handles dropped");
                    session.disconnect();
                }
            },

            frame = framed.next() => match frame {
                Some(Ok(packet)) => {
                    tracing::trace!("Received {:?} ({} bytes)", packet.packet_type, packet.body.len());
                    if let Err(e) = session.on_packet(packet, Instant::now()) {
                        tracing::warn!("Session closed: {}", e);
                    }
                }
                Some(Err(ProtocolError::Io(e))) => session.on_transport_error(&e),
                Some(Err(e)) => {
                    session.on_decode_error(e);
                }
                None => session.on_transport_closed(),
            },

            _ = tokio::time::sleep_until(wakeup.unwrap_or_else(Instant::now)), if wakeup.is_some() => {
                if let Err(e) = session.poll_timers(Instant::now()) {
                    tracing::warn!("Session closed: {}", e);
                }
            }
        }
    }

    // drain the final Close action and release the transport
    while session.poll_action().is_some() {}
    if let Err(e) = framed.close().await {
        tracing::debug!("Error closing transport: {}", e);
    }

    for waiter in disconnect_waiters {
        let _ = waiter.send(());
    }
    tracing::debug!("Session task finished");
}

fn handle_command(session: &mut Session, command: Command) {
    match command {
        Command::Request {
            route,
            payload,
            reply,
        } => {
            session.request(
                &route,
                &payload,
                Box::new(move |result| {
                    let _ = reply.send(result);
                }),
                Instant::now(),
            );
        }
        Command::Notify {
            route,
            payload,
            reply,
        } => {
            let _ = reply.send(session.notify(&route, &payload));
        }
        Command::State { reply } => {
            let _ = reply.send(session.state());
        }
        Command::Disconnect { reply } => {
            session.disconnect();
            let _ = reply.send(());
        }
    }
}

/// Write queued packets until the outbox is empty or the session asks to close
async fn flush<T>(session: &mut Session, framed: &mut Framed<T, PacketCodec>) -> Result<(), ProtocolError>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let mut wrote = false;
    while let Some(action) = session.poll_action() {
        match action {
            SessionAction::Send(packet) => {
                tracing::trace!("Sending {:?} ({} bytes)", packet.packet_type, packet.body.len());
                framed.feed(packet).await?;
                wrote = true;
            }
            SessionAction::Close => break,
        }
    }
    if wrote {
        framed.flush().await?;
    }
    Ok(())
}

fn transport_failed(session: &mut Session, error: ProtocolError) {
    match error {
        ProtocolError::Io(e) => session.on_transport_error(&e),
        other => {
            session.on_decode_error(other);
        }
    }
}
