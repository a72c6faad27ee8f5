use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use tokio::sync::{broadcast, mpsc};
use tracing::trace;

use crate::{events::ServerEvent, session::ConnectionId};

/// Delivery of outbound events. Both calls are fire-and-forget.
pub trait Fabric: Send + Sync + 'static {
    /// Delivers `event` to `conn` only. Unknown or closed connections drop it.
    fn send_to(&self, conn: ConnectionId, event: ServerEvent);

    /// Delivers `event` to every attached connection.
    fn broadcast(&self, event: ServerEvent);
}

/// In-process fabric: one broadcast channel shared by everyone plus an
/// unbounded queue per connection for addressed events.
pub struct Hub {
    all: broadcast::Sender<ServerEvent>,
    direct: Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<ServerEvent>>>,
}

/// Receiving ends handed to a connection's writer task.
pub struct Subscription {
    pub all: broadcast::Receiver<ServerEvent>,
    pub direct: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Hub {
    pub fn new(capacity: usize) -> Self {
        Self {
            all: broadcast::channel(capacity.max(1)).0,
            direct: Mutex::new(HashMap::new()),
        }
    }

    /// Registers `conn`. It receives every broadcast made after this call.
    pub fn attach(&self, conn: ConnectionId) -> Subscription {
        let (tx, direct) = mpsc::unbounded_channel();
        self.direct
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(conn, tx);

        Subscription {
            all: self.all.subscribe(),
            direct,
        }
    }

    pub fn detach(&self, conn: ConnectionId) {
        self.direct
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&conn);
    }
}

impl Fabric for Hub {
    fn send_to(&self, conn: ConnectionId, event: ServerEvent) {
        let direct = self.direct.lock().unwrap_or_else(PoisonError::into_inner);
        match direct.get(&conn) {
            Some(tx) => {
                let _ = tx.send(event);
            }
            None => trace!(%conn, "dropping event for detached connection"),
        }
    }

    fn broadcast(&self, event: ServerEvent) {
        // no receivers is not an error
        let _ = self.all.send(event);
    }
}
