//! Connection handle bound to a registered client
//!
//! The socket's writer task owns the [`Inbox`]; the room core only ever
//! sees the [`Connection`] end. Delivery goes through a cloneable
//! [`Outbox`] so it can happen after the room lock is released.

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::SendError;
use crate::message::ServerMessage;
use crate::types::ConnectionId;

/// Create a connected pair of [`Connection`] and [`Inbox`]
///
/// `capacity` bounds the number of messages buffered for the writer.
pub fn channel(capacity: usize) -> (Connection, Inbox) {
    let (sender, messages) = mpsc::channel(capacity);
    let (close, closed) = oneshot::channel();
    let connection = Connection {
        id: ConnectionId::new(),
        outbox: Outbox { sender },
        close,
    };
    (connection, Inbox { messages, closed })
}

/// Server side of one live socket
///
/// Closing consumes the handle, so a connection can be closed at most once.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    outbox: Outbox,
    close: oneshot::Sender<()>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get a cloneable sender for this connection
    pub fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }

    /// Ask the writer to close the socket
    ///
    /// Closing a connection whose writer is already gone is not an error.
    pub fn close(self) {
        if self.close.send(()).is_err() {
            debug!("Connection {} already closed", self.id);
        }
    }
}

/// Cloneable sending half of a connection
#[derive(Debug, Clone)]
pub struct Outbox {
    sender: mpsc::Sender<ServerMessage>,
}

impl Outbox {
    /// Queue one message for the writer
    ///
    /// Each message is written as a single frame. Returns an error if the
    /// writer has gone away.
    pub async fn deliver(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| SendError::ChannelClosed)
    }
}

/// Receiving half consumed by the socket writer
#[derive(Debug)]
pub struct Inbox {
    /// Messages to write, in order
    pub messages: mpsc::Receiver<ServerMessage>,
    /// Fires once when the connection is closed by the core.
    /// Resolves with an error if the `Connection` was dropped unclosed.
    pub closed: oneshot::Receiver<()>,
}
