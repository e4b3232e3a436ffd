use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use parley_types::events::ServerEvent;
use parley_types::rooms::RoomKey;

/// Outbound queue depth per connection. A client that cannot drain this
/// many events misses deliveries instead of stalling the broadcaster;
/// it recovers by refetching conversation state.
pub const OUTBOUND_BUFFER: usize = 256;

/// Local room-membership index: which of THIS process's connections are
/// joined to which rooms. Other processes keep their own; the cross-process
/// channel re-delivers to every process, so no shared membership table
/// exists anywhere.
#[derive(Clone, Default)]
pub struct Rooms {
    inner: Arc<RwLock<HashMap<RoomKey, HashMap<Uuid, mpsc::Sender<ServerEvent>>>>>,
}

impl Rooms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: re-registering replaces the existing sender.
    pub async fn register(
        &self,
        room: RoomKey,
        connection_id: Uuid,
        sender: mpsc::Sender<ServerEvent>,
    ) {
        self.inner
            .write()
            .await
            .entry(room)
            .or_default()
            .insert(connection_id, sender);
    }

    /// Idempotent: no-op if the connection never joined.
    pub async fn unregister(&self, room: &RoomKey, connection_id: Uuid) {
        let mut rooms = self.inner.write().await;
        if let Some(members) = rooms.get_mut(room) {
            members.remove(&connection_id);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
    }

    pub async fn occupancy(&self, room: &RoomKey) -> usize {
        self.inner.read().await.get(room).map_or(0, HashMap::len)
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Deliver to every local connection joined to `room`; a no-op at zero
    /// occupancy. Gone connections are pruned on contact; a connection with
    /// a full queue misses this event but stays registered. Returns the
    /// delivered count.
    pub async fn deliver(&self, room: &RoomKey, event: &ServerEvent) -> usize {
        let mut rooms = self.inner.write().await;
        let Some(members) = rooms.get_mut(room) else {
            return 0;
        };

        let mut delivered = 0;
        members.retain(|connection_id, sender| match sender.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(connection = %connection_id, room = %room, "pruning closed connection");
                false
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(connection = %connection_id, room = %room, "outbound queue full, event dropped");
                true
            }
        });

        if members.is_empty() {
            rooms.remove(room);
        }
        delivered
    }
}
