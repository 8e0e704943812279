//! Room registry
//!
//! Owns every room, creating one on first reference and dropping it once
//! its last client is gone. Lock order is always registry map, then room.
//!
//! Every operation keeps the map locked while it touches the room, so a
//! room cannot be dropped between lookup and use. Room operations going
//! through the registry are therefore serialized across all rooms; only
//! message writes happen outside the locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::client::ClientInstance;
use crate::connection::Connection;
use crate::error::RelayError;
use crate::notify::ByeNotifier;
use crate::room::{deliver_all, EvictionHandler, Room};
use crate::types::{ClientId, RoomId};

/// Default time a client gets to register before eviction
pub const DEFAULT_REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Registry settings
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub registration_timeout: Duration,
    /// Room server base URL, notified when clients are evicted
    pub notify_url: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            registration_timeout: DEFAULT_REGISTRATION_TIMEOUT,
            notify_url: None,
        }
    }
}

/// Diagnostic snapshot of one room
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomStatus {
    pub room_id: String,
    pub clients: usize,
    pub ws_count: usize,
}

/// All active rooms: RoomId -> Room
pub struct RoomRegistry {
    rooms: Mutex<HashMap<RoomId, Arc<Room>>>,
    config: RegistryConfig,
    notifier: Option<ByeNotifier>,
    /// Handed to rooms as their eviction handler
    self_ref: Weak<RoomRegistry>,
}

impl RoomRegistry {
    pub fn new(config: RegistryConfig) -> Arc<Self> {
        let notifier = match config.notify_url {
            Some(_) => match ByeNotifier::new() {
                Ok(notifier) => Some(notifier),
                Err(e) => {
                    warn!("Bye notifications disabled: {}", e);
                    None
                }
            },
            None => None,
        };

        Arc::new_cyclic(|self_ref| Self {
            rooms: Mutex::new(HashMap::new()),
            config,
            notifier,
            self_ref: self_ref.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RoomId, Arc<Room>>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the room, creating it if it does not exist
    fn room_locked(&self, rooms: &mut HashMap<RoomId, Arc<Room>>, room_id: &RoomId) -> Arc<Room> {
        rooms
            .entry(room_id.clone())
            .or_insert_with(|| {
                info!("Created room {}", room_id);
                let handler: Weak<dyn EvictionHandler> = self.self_ref.clone();
                Room::new(
                    room_id.clone(),
                    self.config.registration_timeout,
                    self.config.notify_url.clone(),
                    Some(handler),
                )
            })
            .clone()
    }

    /// Drop the room from the table if it has no clients left
    fn drop_if_empty(&self, rooms: &mut HashMap<RoomId, Arc<Room>>, room_id: &RoomId) {
        if rooms.get(room_id).is_some_and(|room| room.empty()) {
            rooms.remove(room_id);
            debug!("Room {} deleted (empty)", room_id);
        }
    }

    /// Bind a connection to a client, creating room and client as needed
    pub fn register(
        &self,
        room_id: &RoomId,
        client_id: &ClientId,
        connection: Connection,
    ) -> Result<(), RelayError> {
        let mut rooms = self.lock();
        self.room_locked(&mut rooms, room_id)
            .register(client_id, connection)
    }

    /// Relay a message within a room
    ///
    /// Deliveries are prepared under the locks and written after both are
    /// released.
    pub async fn send(
        &self,
        room_id: &RoomId,
        src_id: &ClientId,
        dst_id: &ClientId,
        payload: &str,
    ) -> Result<(), RelayError> {
        let deliveries = {
            let mut rooms = self.lock();
            self.room_locked(&mut rooms, room_id)
                .prepare_send(src_id, dst_id, payload)?
        };
        deliver_all(deliveries).await
    }

    /// Close a client's connection, keeping it in the room until evicted
    pub fn deregister(&self, room_id: &RoomId, client_id: &ClientId) {
        let rooms = self.lock();
        if let Some(room) = rooms.get(room_id) {
            room.deregister(client_id);
        }
    }

    /// Remove a client and drop its room once empty
    pub fn remove(&self, room_id: &RoomId, client_id: &ClientId) {
        let mut rooms = self.lock();
        if let Some(room) = rooms.get(room_id) {
            room.remove(client_id);
        }
        self.drop_if_empty(&mut rooms, room_id);
    }

    /// Number of active rooms
    pub fn room_count(&self) -> usize {
        self.lock().len()
    }

    /// Look up a room without creating it
    pub fn room(&self, room_id: &RoomId) -> Option<Arc<Room>> {
        self.lock().get(room_id).cloned()
    }

    /// Number of registered clients across all rooms
    pub fn ws_count(&self) -> usize {
        self.lock().values().map(|room| room.ws_count()).sum()
    }

    /// Per-room diagnostics, sorted by room id
    pub fn rooms_status(&self) -> Vec<RoomStatus> {
        let mut status: Vec<RoomStatus> = self
            .lock()
            .values()
            .map(|room| RoomStatus {
                room_id: room.id().to_string(),
                clients: room.client_count(),
                ws_count: room.ws_count(),
            })
            .collect();
        status.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        status
    }
}

impl EvictionHandler for RoomRegistry {
    fn on_eviction_timeout(
        &self,
        room_id: &RoomId,
        client_id: &ClientId,
        instance: ClientInstance,
    ) {
        let (evicted, room) = {
            let mut rooms = self.lock();
            let Some(room) = rooms.get(room_id).cloned() else {
                return;
            };
            let evicted = room.remove_if_unregistered(client_id, instance);
            self.drop_if_empty(&mut rooms, room_id);
            (evicted, room)
        };

        if evicted {
            info!(
                "Removed client {} from room {} due to registration timeout",
                client_id, room_id
            );
            if let (Some(notifier), Some(url)) = (&self.notifier, room.notify_url()) {
                notifier.notify(url, room_id, client_id);
            }
        }
    }
}
