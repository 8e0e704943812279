//! Client struct definition
//!
//! Represents one endpoint in a room: its id, the connection bound to it
//! once it registers, and the timer that evicts it if it never does.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::connection::{Connection, Outbox};
use crate::error::RelayError;
use crate::message::ServerMessage;
use crate::timer::EvictionTimer;
use crate::types::ClientId;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Identity of one client entry
///
/// A client removed and then re-created under the same id gets a new
/// instance, so a timer armed for the old entry can tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientInstance(u64);

impl ClientInstance {
    fn next() -> Self {
        Self(NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed))
    }
}

/// A message ready to be written to a registered peer
///
/// Produced under the room lock, delivered after it is released.
#[derive(Debug)]
pub struct Delivery {
    target: ClientId,
    outbox: Outbox,
    message: ServerMessage,
}

impl Delivery {
    pub async fn deliver(self) -> Result<(), RelayError> {
        self.outbox.deliver(self.message).await.map_err(|e| {
            warn!("Delivery to client {} failed: {}", self.target, e);
            RelayError::from(e)
        })
    }
}

/// Per-endpoint state inside a room
#[derive(Debug)]
pub struct Client {
    id: ClientId,
    instance: ClientInstance,
    /// Present iff the client is registered
    connection: Option<Connection>,
    /// Removes the client if it stays unregistered
    eviction_timer: Option<EvictionTimer>,
}

impl Client {
    /// Create an unregistered client with an optional eviction timer
    pub fn new(id: ClientId, timer: Option<EvictionTimer>) -> Self {
        Self {
            id,
            instance: ClientInstance::next(),
            connection: None,
            eviction_timer: timer,
        }
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub fn instance(&self) -> ClientInstance {
        self.instance
    }

    /// Replace the eviction timer, cancelling the current one
    pub fn set_timer(&mut self, timer: Option<EvictionTimer>) {
        if let Some(old) = std::mem::replace(&mut self.eviction_timer, timer) {
            old.cancel();
        }
    }

    /// Check if an eviction is currently scheduled
    pub fn has_timer(&self) -> bool {
        self.eviction_timer
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    /// Bind a connection to this client
    ///
    /// Fails if one is already bound; the existing connection is kept.
    pub fn register(&mut self, connection: Connection) -> Result<(), RelayError> {
        if self.connection.is_some() {
            warn!(
                "Not registering because client {} already has a connection",
                self.id
            );
            return Err(RelayError::DuplicateRegistration(self.id.clone()));
        }
        self.set_timer(None);
        self.connection = Some(connection);
        Ok(())
    }

    /// Close and unbind the connection, if any
    pub fn deregister(&mut self) {
        if let Some(connection) = self.connection.take() {
            debug!("Closing connection {} of client {}", connection.id(), self.id);
            connection.close();
        }
    }

    /// Check if a connection is bound
    pub fn registered(&self) -> bool {
        self.connection.is_some()
    }

    /// Prepare a message to `target`
    ///
    /// Returns `Ok(None)` when the target has not registered: the message
    /// is dropped, not queued.
    pub fn prepare_send(
        &self,
        target: &Client,
        receiver_id: &ClientId,
        payload: &str,
    ) -> Result<Option<Delivery>, RelayError> {
        if self.id == target.id {
            return Err(RelayError::InvalidTarget(self.id.clone()));
        }

        let Some(connection) = &target.connection else {
            debug!(
                "Dropping message from {} to unregistered client {}",
                self.id, target.id
            );
            return Ok(None);
        };

        Ok(Some(Delivery {
            target: target.id.clone(),
            outbox: connection.outbox(),
            message: ServerMessage::Message {
                to: receiver_id.to_string(),
                msg: payload.to_string(),
            },
        }))
    }

    /// Send a message to `target` if it is registered
    pub async fn send(
        &self,
        target: &Client,
        receiver_id: &ClientId,
        payload: &str,
    ) -> Result<(), RelayError> {
        match self.prepare_send(target, receiver_id, payload)? {
            Some(delivery) => delivery.deliver().await,
            None => Ok(()),
        }
    }
}
