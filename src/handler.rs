//! WebSocket connection handler
//!
//! Handles one socket: WebSocket handshake, registration, relaying the
//! endpoint's messages through the registry, and writing whatever the
//! room delivers back to the socket.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, warn};

use crate::connection::{self, Connection, Inbox, Outbox};
use crate::dashboard::Dashboard;
use crate::error::AppError;
use crate::message::{ClientMessage, ServerMessage};
use crate::registry::RoomRegistry;
use crate::types::{ClientId, ConnectionId, RoomId};

/// Messages buffered per socket before delivery waits on the writer
pub const OUTBOX_CAPACITY: usize = 32;

/// How long the writer gets to flush after the session ended
const WRITER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state every session needs
#[derive(Clone)]
pub struct SessionContext {
    pub registry: Arc<RoomRegistry>,
    pub dashboard: Arc<Dashboard>,
    /// Deadline for the register command, counted from the handshake
    pub register_timeout: Duration,
}

/// Handle a new TCP connection
///
/// Performs the WebSocket handshake, runs the session until either side
/// closes, then deregisters the client so it may reconnect.
pub async fn handle_connection(stream: TcpStream, ctx: SessionContext) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (ws_sender, mut ws_receiver) = ws_stream.split();

    let (connection, inbox) = connection::channel(OUTBOX_CAPACITY);
    let conn_id = connection.id();
    ctx.dashboard.ws_opened();
    info!("Connection {} opened from {}", conn_id, peer_addr);

    let mut write_task = tokio::spawn(write_loop(
        conn_id,
        ws_sender,
        inbox,
        ctx.dashboard.clone(),
    ));

    let mut session = Session::new(connection, ctx.clone());
    let mut write_done = false;

    // Wait for either side to finish
    let result = tokio::select! {
        result = session.run(&mut ws_receiver) => result,
        _ = &mut write_task => {
            debug!("Write task completed for {}", conn_id);
            write_done = true;
            Ok(())
        }
    };

    session.finish();
    drop(session);

    if !write_done {
        let flushed = tokio::time::timeout(WRITER_SHUTDOWN_TIMEOUT, &mut write_task).await;
        if flushed.is_err() {
            debug!("Write task for {} did not finish, aborting", conn_id);
            write_task.abort();
        }
    }

    ctx.dashboard.ws_closed();
    if let Err(e) = &result {
        ctx.dashboard.record_error(e);
    }
    info!("Connection {} closed", conn_id);

    result
}

/// Write relayed messages to the socket until the connection closes
async fn write_loop<S>(
    conn_id: ConnectionId,
    mut ws_sender: S,
    mut inbox: Inbox,
    dashboard: Arc<Dashboard>,
)
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let mut close_pending = true;

    loop {
        tokio::select! {
            // Flush queued messages before honoring a close
            biased;

            msg = inbox.messages.recv() => {
                let Some(msg) = msg else {
                    break;
                };
                match serde_json::to_string(&msg) {
                    Ok(json) => {
                        if let Err(e) = ws_sender.send(Message::Text(json.into())).await {
                            debug!("WebSocket send failed for {}: {}", conn_id, e);
                            break;
                        }
                        dashboard.message_sent();
                    }
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        // Continue - don't break on serialization errors
                    }
                }
            }
            closed = &mut inbox.closed, if close_pending => {
                match closed {
                    Ok(()) => {
                        debug!("Connection {} closed by relay", conn_id);
                        break;
                    }
                    // Dropped without closing, e.g. a refused registration
                    Err(_) => close_pending = false,
                }
            }
        }
    }
    debug!("Write task ended for {}", conn_id);

    // Send close frame when done
    let _ = ws_sender.close().await;
}

/// Per-socket protocol state
struct Session {
    conn_id: ConnectionId,
    ctx: SessionContext,
    outbox: Outbox,
    /// Handed to the registry on register
    pending: Option<Connection>,
    registration: Option<(RoomId, ClientId)>,
}

impl Session {
    fn new(connection: Connection, ctx: SessionContext) -> Self {
        Self {
            conn_id: connection.id(),
            outbox: connection.outbox(),
            pending: Some(connection),
            registration: None,
            ctx,
        }
    }

    /// Read from the socket until it closes or the session must end
    async fn run<S>(&mut self, ws_receiver: &mut S) -> Result<(), AppError>
    where
        S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        let register_deadline = Instant::now() + self.ctx.register_timeout;

        loop {
            let next = if self.registration.is_some() {
                ws_receiver.next().await
            } else {
                match tokio::time::timeout_at(register_deadline, ws_receiver.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!("Connection {} did not register in time", self.conn_id);
                        self.reply(AppError::RegistrationTimeout).await;
                        return Ok(());
                    }
                }
            };

            let Some(msg_result) = next else {
                break;
            };

            match msg_result {
                Ok(Message::Text(text)) => {
                    self.ctx.dashboard.message_received();
                    if !self.handle_text(&text).await {
                        break;
                    }
                }
                Ok(Message::Close(_)) => {
                    debug!("Connection {} sent close frame", self.conn_id);
                    break;
                }
                Ok(Message::Ping(_)) => {
                    // Pong is handled automatically by tungstenite
                    debug!("Ping from {}", self.conn_id);
                }
                Ok(_) => {
                    // Binary or other message types - ignore
                }
                Err(e) => {
                    error!("WebSocket error for {}: {}", self.conn_id, e);
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// Handle one text frame; returns false when the session must end
    async fn handle_text(&mut self, text: &str) -> bool {
        let msg = match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Invalid JSON from {}: {}", self.conn_id, e);
                self.reply(AppError::Json(e)).await;
                return true;
            }
        };

        match msg {
            ClientMessage::Register { room_id, client_id } => {
                match self.register(room_id, client_id) {
                    Ok((room_id, client_id)) => {
                        self.reply(ServerMessage::Registered {
                            room_id: room_id.to_string(),
                            client_id: client_id.to_string(),
                        })
                        .await;
                        true
                    }
                    Err(e) => {
                        self.reply(e).await;
                        false
                    }
                }
            }
            ClientMessage::Send { msg, to } => match self.relay(&msg, &to).await {
                Ok(()) => true,
                Err(AppError::NotRegistered) => {
                    self.reply(AppError::NotRegistered).await;
                    false
                }
                Err(e) => {
                    self.reply(e).await;
                    true
                }
            },
        }
    }

    fn register(
        &mut self,
        room_id: String,
        client_id: String,
    ) -> Result<(RoomId, ClientId), AppError> {
        if self.registration.is_some() {
            return Err(AppError::AlreadyRegistered);
        }
        if room_id.is_empty() || client_id.is_empty() {
            return Err(AppError::InvalidRegister);
        }
        let Some(connection) = self.pending.take() else {
            return Err(AppError::AlreadyRegistered);
        };

        let room_id = RoomId::from(room_id);
        let client_id = ClientId::from(client_id);
        self.ctx.registry.register(&room_id, &client_id, connection)?;

        info!(
            "Connection {} registered as client {} in room {}",
            self.conn_id, client_id, room_id
        );
        self.registration = Some((room_id.clone(), client_id.clone()));
        Ok((room_id, client_id))
    }

    async fn relay(&self, msg: &str, to: &str) -> Result<(), AppError> {
        let Some((room_id, client_id)) = &self.registration else {
            return Err(AppError::NotRegistered);
        };
        self.ctx
            .registry
            .send(room_id, client_id, &ClientId::from(to), msg)
            .await?;
        Ok(())
    }

    /// Send a message to this socket
    async fn reply(&self, msg: impl Into<ServerMessage>) {
        if self.outbox.deliver(msg.into()).await.is_err() {
            debug!("Reply to {} dropped, writer gone", self.conn_id);
        }
    }

    /// Release the client so it can reconnect before eviction
    fn finish(&mut self) {
        if let Some((room_id, client_id)) = self.registration.take() {
            self.ctx.registry.deregister(&room_id, &client_id);
        }
    }
}
