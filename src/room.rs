//! Room struct definition
//!
//! A room holds up to [`MAX_ROOM_CAPACITY`] clients keyed by id and relays
//! messages between them. All access to the client map goes through the
//! room's mutex; the lock is released before any message is written.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tracing::{debug, info};

use crate::client::{Client, ClientInstance, Delivery};
use crate::connection::Connection;
use crate::error::RelayError;
use crate::timer::EvictionTimer;
use crate::types::{ClientId, RoomId};

/// Maximum number of distinct clients in one room
pub const MAX_ROOM_CAPACITY: usize = 4;

/// Receiver of eviction timeouts
///
/// Implemented by the owner of the rooms. Called without any room lock
/// held, once a client's registration timeout expired while it was still
/// unregistered. The implementation decides whether to remove it and must
/// tolerate being called for a client that is already gone.
pub trait EvictionHandler: Send + Sync {
    fn on_eviction_timeout(&self, room_id: &RoomId, client_id: &ClientId, instance: ClientInstance);
}

/// Signaling room
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    registration_timeout: Duration,
    notify_url: Option<String>,
    /// Non-owning; eviction timers are only armed when this is set
    registry: Option<Weak<dyn EvictionHandler>>,
    clients: Mutex<HashMap<ClientId, Client>>,
}

impl Room {
    /// Create an empty room
    pub fn new(
        id: RoomId,
        registration_timeout: Duration,
        notify_url: Option<String>,
        registry: Option<Weak<dyn EvictionHandler>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            registration_timeout,
            notify_url,
            registry,
            clients: Mutex::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub fn notify_url(&self) -> Option<&str> {
        self.notify_url.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ClientId, Client>> {
        // A panic while holding the lock never leaves the map half-updated
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the client, creating it if the room is not full
    ///
    /// Returns the instance of the existing or new client entry.
    pub fn lookup_or_create_client(
        self: &Arc<Self>,
        client_id: &ClientId,
    ) -> Result<ClientInstance, RelayError> {
        let mut clients = self.lock();
        Ok(self.client_locked(&mut clients, client_id)?.instance())
    }

    /// Lookup-or-create on an already locked map
    ///
    /// The capacity check and the insert happen under the same guard.
    fn client_locked<'a>(
        self: &Arc<Self>,
        clients: &'a mut HashMap<ClientId, Client>,
        client_id: &ClientId,
    ) -> Result<&'a mut Client, RelayError> {
        let len = clients.len();
        match clients.entry(client_id.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                if len >= MAX_ROOM_CAPACITY {
                    info!("Room {} is full, not adding client {}", self.id, client_id);
                    return Err(RelayError::RoomFull(self.id.clone()));
                }

                let mut client = Client::new(client_id.clone(), None);
                client.set_timer(self.arm_eviction(client_id, client.instance()));
                info!("Added client {} to room {}", client_id, self.id);
                Ok(entry.insert(client))
            }
        }
    }

    /// Schedule the eviction check for one client entry
    fn arm_eviction(
        self: &Arc<Self>,
        client_id: &ClientId,
        instance: ClientInstance,
    ) -> Option<EvictionTimer> {
        self.registry.as_ref()?;

        let room = Arc::downgrade(self);
        let client_id = client_id.clone();
        EvictionTimer::arm(self.registration_timeout, move || {
            if let Some(room) = room.upgrade() {
                room.eviction_due(&client_id, instance);
            }
        })
    }

    /// Timer callback: hand the client to the registry if still unregistered
    fn eviction_due(&self, client_id: &ClientId, instance: ClientInstance) {
        let still_pending = {
            let clients = self.lock();
            clients
                .get(client_id)
                .is_some_and(|c| c.instance() == instance && !c.registered())
        };
        if !still_pending {
            return;
        }

        if let Some(registry) = self.registry.as_ref().and_then(Weak::upgrade) {
            debug!(
                "Registration timeout for client {} in room {}",
                client_id, self.id
            );
            registry.on_eviction_timeout(&self.id, client_id, instance);
        }
    }

    /// Bind a connection to a client, creating the client if needed
    pub fn register(
        self: &Arc<Self>,
        client_id: &ClientId,
        connection: Connection,
    ) -> Result<(), RelayError> {
        let mut clients = self.lock();
        self.client_locked(&mut clients, client_id)?
            .register(connection)?;

        info!("Client {} registered in room {}", client_id, self.id);
        Ok(())
    }

    /// Collect the deliveries of one relayed message
    ///
    /// Resolves (or creates) the source, then prepares one delivery per
    /// registered client other than the source. Runs entirely under the
    /// room lock; nothing is written yet.
    pub fn prepare_send(
        self: &Arc<Self>,
        src_id: &ClientId,
        dst_id: &ClientId,
        payload: &str,
    ) -> Result<Vec<Delivery>, RelayError> {
        let mut clients = self.lock();
        self.client_locked(&mut clients, src_id)?;
        let src = &clients[src_id];

        let mut deliveries = Vec::new();
        for (id, other) in clients.iter() {
            if id == src_id {
                continue;
            }
            if let Some(delivery) = src.prepare_send(other, dst_id, payload)? {
                deliveries.push(delivery);
            }
        }
        Ok(deliveries)
    }

    /// Relay a message from `src_id` to every other client
    ///
    /// Attempts every delivery and returns the first failure, if any.
    pub async fn send(
        self: &Arc<Self>,
        src_id: &ClientId,
        dst_id: &ClientId,
        payload: &str,
    ) -> Result<(), RelayError> {
        let deliveries = self.prepare_send(src_id, dst_id, payload)?;
        deliver_all(deliveries).await
    }

    /// Close the client's connection and drop it from the room
    ///
    /// Returns true if the client was present.
    pub fn remove(&self, client_id: &ClientId) -> bool {
        let mut clients = self.lock();
        self.remove_locked(&mut clients, client_id)
    }

    fn remove_locked(&self, clients: &mut HashMap<ClientId, Client>, client_id: &ClientId) -> bool {
        match clients.remove(client_id) {
            Some(mut client) => {
                client.deregister();
                info!("Removed client {} from room {}", client_id, self.id);
                true
            }
            None => false,
        }
    }

    /// Remove the client only if it is the given entry and still unregistered
    pub fn remove_if_unregistered(&self, client_id: &ClientId, instance: ClientInstance) -> bool {
        let mut clients = self.lock();
        let evictable = clients
            .get(client_id)
            .is_some_and(|c| c.instance() == instance && !c.registered());
        evictable && self.remove_locked(&mut clients, client_id)
    }

    /// Close a registered client's connection but keep its entry
    ///
    /// The eviction timer is re-armed, so the client is removed unless it
    /// registers again within the timeout. Returns true if a connection
    /// was closed.
    pub fn deregister(self: &Arc<Self>, client_id: &ClientId) -> bool {
        let mut clients = self.lock();
        let Some(client) = clients.get_mut(client_id) else {
            return false;
        };
        if !client.registered() {
            return false;
        }

        client.deregister();
        client.set_timer(self.arm_eviction(client_id, client.instance()));
        info!("Deregistered client {} from room {}", client_id, self.id);
        true
    }

    /// Check if the room holds no clients
    pub fn empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of clients, registered or not
    pub fn client_count(&self) -> usize {
        self.lock().len()
    }

    /// Number of registered clients
    pub fn ws_count(&self) -> usize {
        self.lock().values().filter(|c| c.registered()).count()
    }

    /// Registration state of a client, `None` if absent
    pub fn is_registered(&self, client_id: &ClientId) -> Option<bool> {
        self.lock().get(client_id).map(Client::registered)
    }
}

/// Attempt every delivery, returning the first failure
pub async fn deliver_all(deliveries: Vec<Delivery>) -> Result<(), RelayError> {
    let mut first_error = None;
    for delivery in deliveries {
        if let Err(e) = delivery.deliver().await {
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{self, Inbox};
    use crate::message::ServerMessage;
    use std::sync::Mutex as StdMutex;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn room() -> Arc<Room> {
        Room::new(RoomId::from("r1"), TIMEOUT, None, None)
    }

    fn id(s: &str) -> ClientId {
        ClientId::from(s)
    }

    fn register(room: &Arc<Room>, client: &str) -> Inbox {
        let (conn, inbox) = connection::channel(8);
        room.register(&id(client), conn).unwrap();
        inbox
    }

    #[derive(Default)]
    struct RecordingHandler {
        calls: StdMutex<Vec<(RoomId, ClientId, ClientInstance)>>,
    }

    impl EvictionHandler for RecordingHandler {
        fn on_eviction_timeout(
            &self,
            room_id: &RoomId,
            client_id: &ClientId,
            instance: ClientInstance,
        ) {
            self.calls
                .lock()
                .unwrap()
                .push((room_id.clone(), client_id.clone(), instance));
        }
    }

    fn room_with_handler(handler: &Arc<RecordingHandler>) -> Arc<Room> {
        let weak: Weak<dyn EvictionHandler> = Arc::downgrade(handler) as Weak<dyn EvictionHandler>;
        Room::new(RoomId::from("r1"), TIMEOUT, None, Some(weak))
    }

    #[test]
    fn test_room_creation() {
        let room = room();
        assert_eq!(room.id().as_str(), "r1");
        assert!(room.empty());
        assert_eq!(room.ws_count(), 0);
        assert!(room.notify_url().is_none());
    }

    #[test]
    fn test_lookup_returns_existing() {
        let room = room();
        let first = room.lookup_or_create_client(&id("a")).unwrap();
        let again = room.lookup_or_create_client(&id("a")).unwrap();
        assert_eq!(first, again);
        assert_eq!(room.client_count(), 1);
    }

    #[test]
    fn test_capacity() {
        let room = room();
        let _a = register(&room, "a");
        for c in ["b", "c", "d"] {
            room.lookup_or_create_client(&id(c)).unwrap();
        }

        let result = room.lookup_or_create_client(&id("e"));
        assert!(matches!(result, Err(RelayError::RoomFull(_))));

        assert_eq!(room.client_count(), MAX_ROOM_CAPACITY);
        assert_eq!(room.is_registered(&id("a")), Some(true));
        assert_eq!(room.is_registered(&id("b")), Some(false));
        assert_eq!(room.is_registered(&id("e")), None);

        // Existing ids are still reachable when full
        assert!(room.lookup_or_create_client(&id("d")).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creation_respects_capacity() {
        let room = room();
        let barrier = Arc::new(tokio::sync::Barrier::new(16));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let room = room.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    room.lookup_or_create_client(&id(&format!("c{}", i)))
                        .is_ok()
                })
            })
            .collect();

        let mut created = 0;
        for task in tasks {
            if task.await.unwrap() {
                created += 1;
            }
        }

        assert_eq!(created, MAX_ROOM_CAPACITY);
        assert_eq!(room.client_count(), MAX_ROOM_CAPACITY);
    }

    #[test]
    fn test_register_twice() {
        let room = room();
        let _inbox = register(&room, "a");
        let (conn, _other) = connection::channel(8);
        let result = room.register(&id("a"), conn);
        assert!(matches!(result, Err(RelayError::DuplicateRegistration(_))));
        assert_eq!(room.ws_count(), 1);
    }

    #[test]
    fn test_register_in_full_room() {
        let room = room();
        for c in ["a", "b", "c", "d"] {
            room.lookup_or_create_client(&id(c)).unwrap();
        }
        let (conn, _inbox) = connection::channel(8);
        let result = room.register(&id("e"), conn);
        assert!(matches!(result, Err(RelayError::RoomFull(_))));
        assert_eq!(room.ws_count(), 0);
    }

    #[tokio::test]
    async fn test_send_skips_source() {
        let room = room();
        let mut a = register(&room, "a");
        let mut b = register(&room, "b");
        let mut c = register(&room, "c");

        room.send(&id("a"), &id("b"), "offer").await.unwrap();

        assert!(a.messages.try_recv().is_err());
        let expected = ServerMessage::Message {
            to: "b".to_string(),
            msg: "offer".to_string(),
        };
        assert_eq!(b.messages.try_recv().ok(), Some(expected.clone()));
        assert_eq!(c.messages.try_recv().ok(), Some(expected));
    }

    #[tokio::test]
    async fn test_send_creates_source() {
        let room = room();
        room.send(&id("a"), &id("b"), "hi").await.unwrap();
        assert_eq!(room.is_registered(&id("a")), Some(false));
        assert_eq!(room.client_count(), 1);
    }

    #[tokio::test]
    async fn test_send_from_new_source_in_full_room() {
        let room = room();
        let mut inboxes = Vec::new();
        for c in ["a", "b", "c", "d"] {
            inboxes.push(register(&room, c));
        }

        let result = room.send(&id("e"), &id("a"), "hi").await;

        assert!(matches!(result, Err(RelayError::RoomFull(_))));
        for inbox in &mut inboxes {
            assert!(inbox.messages.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_send_reports_failure_and_keeps_going() {
        let room = room();
        let _a = register(&room, "a");
        let broken = register(&room, "b");
        let mut c = register(&room, "c");
        drop(broken);

        let result = room.send(&id("a"), &id("c"), "hi").await;

        assert!(matches!(result, Err(RelayError::Delivery(_))));
        assert!(c.messages.try_recv().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stalled_peer_does_not_block_room() {
        let room = room();
        let _a = register(&room, "a");
        let (conn, mut slow) = connection::channel(1);
        room.register(&id("b"), conn).unwrap();
        room.send(&id("a"), &id("b"), "first").await.unwrap();

        // b's outbox is full, this send waits on it
        let stalled = tokio::spawn({
            let room = room.clone();
            async move { room.send(&id("a"), &id("b"), "second").await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!stalled.is_finished());

        let other = tokio::task::spawn_blocking({
            let room = room.clone();
            move || {
                let (conn, _inbox) = connection::channel(1);
                room.register(&id("c"), conn).unwrap();
                room.remove(&id("c"))
            }
        });
        let removed = tokio::time::timeout(Duration::from_secs(1), other)
            .await
            .expect("room stayed locked during delivery")
            .unwrap();
        assert!(removed);

        assert!(slow.messages.recv().await.is_some());
        assert!(stalled.await.unwrap().is_ok());
        assert_eq!(
            slow.messages.recv().await,
            Some(ServerMessage::Message {
                to: "b".to_string(),
                msg: "second".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_dropped_then_delivered() {
        let room = room();
        let _a = register(&room, "a");
        room.lookup_or_create_client(&id("b")).unwrap();

        room.send(&id("a"), &id("b"), "hi").await.unwrap();
        assert_eq!(room.is_registered(&id("b")), Some(false));

        let mut b = register(&room, "b");
        room.send(&id("a"), &id("b"), "hi2").await.unwrap();

        assert_eq!(
            b.messages.try_recv().ok(),
            Some(ServerMessage::Message {
                to: "b".to_string(),
                msg: "hi2".to_string(),
            })
        );
        assert!(b.messages.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remove() {
        let room = room();
        let a = register(&room, "a");
        room.lookup_or_create_client(&id("b")).unwrap();

        assert!(!room.remove(&id("zzz")));
        assert_eq!(room.client_count(), 2);

        assert!(room.remove(&id("a")));
        assert_eq!(room.client_count(), 1);
        assert!(a.closed.await.is_ok());

        assert!(room.remove(&id("b")));
        assert!(room.empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregistered_client_reported() {
        let handler = Arc::new(RecordingHandler::default());
        let room = room_with_handler(&handler);
        let instance = room.lookup_or_create_client(&id("a")).unwrap();

        tokio::time::sleep(TIMEOUT + Duration::from_millis(1)).await;

        let calls = handler.calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &[(RoomId::from("r1"), id("a"), instance)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registered_client_not_reported() {
        let handler = Arc::new(RecordingHandler::default());
        let room = room_with_handler(&handler);
        room.lookup_or_create_client(&id("a")).unwrap();
        let _inbox = register(&room, "a");

        tokio::time::sleep(TIMEOUT + Duration::from_millis(1)).await;

        assert!(handler.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_client_not_reported() {
        let handler = Arc::new(RecordingHandler::default());
        let room = room_with_handler(&handler);
        room.lookup_or_create_client(&id("a")).unwrap();
        room.remove(&id("a"));

        tokio::time::sleep(TIMEOUT + Duration::from_millis(1)).await;

        assert!(handler.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_timer_without_registry() {
        let room = room();
        room.lookup_or_create_client(&id("a")).unwrap();

        tokio::time::sleep(TIMEOUT * 2).await;

        assert_eq!(room.client_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deregister_rearms_eviction() {
        let handler = Arc::new(RecordingHandler::default());
        let room = room_with_handler(&handler);
        let a = register(&room, "a");

        assert!(room.deregister(&id("a")));
        assert!(!room.deregister(&id("a")));
        assert!(a.closed.await.is_ok());
        assert_eq!(room.is_registered(&id("a")), Some(false));

        tokio::time::sleep(TIMEOUT + Duration::from_millis(1)).await;

        assert_eq!(handler.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_if_unregistered() {
        let room = room();
        let instance = room.lookup_or_create_client(&id("a")).unwrap();
        let _b = register(&room, "b");
        let b_instance = room.lookup_or_create_client(&id("b")).unwrap();

        assert!(!room.remove_if_unregistered(&id("b"), b_instance));
        assert!(room.remove_if_unregistered(&id("a"), instance));
        // Second firing is harmless
        assert!(!room.remove_if_unregistered(&id("a"), instance));

        // A re-created entry is not the one the timer was armed for
        room.lookup_or_create_client(&id("a")).unwrap();
        assert!(!room.remove_if_unregistered(&id("a"), instance));
        assert_eq!(room.client_count(), 2);
    }
}
