//! Connection Handles
//!
//! A [`ConnectionHandle`] is the shareable face of one live WebSocket
//! connection. The connection itself (socket halves, writer task) is owned
//! by exactly one supervisor task; everyone else holds a handle and can
//! only queue frames or ask for the connection to be closed.

use std::fmt;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, warn};

use crate::game::battle::{Battle, PushError, StateSink};
use crate::network::protocol::ServerResponse;

/// Process-unique connection identifier.
pub type ConnectionId = u64;

/// Capacity of each connection's outbound frame queue.
pub const OUTBOUND_CAPACITY: usize = 64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Player identity established by the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlayerIdentity {
    /// Player identifier.
    pub id: String,
    /// Trophy count.
    pub trophies: i32,
}

impl PlayerIdentity {
    /// Create a new identity.
    pub fn new(id: impl Into<String>, trophies: i32) -> Self {
        Self {
            id: id.into(),
            trophies,
        }
    }
}

struct ConnectionInner {
    id: ConnectionId,
    outbound: mpsc::Sender<Vec<u8>>,
    closed: watch::Sender<bool>,
    battle: Mutex<Option<Weak<Battle>>>,
}

/// Cloneable handle to one live connection.
///
/// Equality is connection identity: two handles are equal only if they
/// refer to the same underlying connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<ConnectionInner>,
}

impl ConnectionHandle {
    /// Create a handle that queues frames on `outbound`.
    pub fn new(outbound: mpsc::Sender<Vec<u8>>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(ConnectionInner {
                id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                outbound,
                closed,
                battle: Mutex::new(None),
            }),
        }
    }

    /// Create a handle together with the receiving end of its frame queue.
    pub fn channel() -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        (Self::new(tx), rx)
    }

    /// Connection identifier.
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Queue an already-encoded frame without waiting.
    pub fn send_frame(&self, frame: Vec<u8>) -> Result<(), PushError> {
        if self.is_closed() {
            return Err(PushError::Disconnected);
        }
        self.inner.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PushError::Backlogged,
            mpsc::error::TrySendError::Closed(_) => PushError::Disconnected,
        })
    }

    /// Encode and queue a response.
    pub fn send(&self, response: &ServerResponse) -> Result<(), PushError> {
        let frame = response.encode()?;
        self.send_frame(frame)
    }

    /// Ask the owning supervisor to tear the connection down. Idempotent.
    pub fn close(&self) {
        let was_closed = self.inner.closed.send_replace(true);
        if !was_closed {
            debug!(connection = self.id(), "Connection close requested");
        }
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Resolve once `close` has been called.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        // The sender lives inside `self`, so `wait_for` cannot fail here
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Record the battle this connection's player is in.
    ///
    /// Only a weak reference is kept: the battle already holds this handle
    /// as its sink.
    pub async fn attach_battle(&self, battle: &Arc<Battle>) {
        *self.inner.battle.lock().await = Some(Arc::downgrade(battle));
    }

    /// Take the recorded battle, if it is still alive.
    pub async fn take_battle(&self) -> Option<Arc<Battle>> {
        self.inner.battle.lock().await.take().and_then(|battle| battle.upgrade())
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ConnectionHandle {}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl StateSink for ConnectionHandle {
    fn push(&self, response: &ServerResponse) -> Result<(), PushError> {
        let result = self.send(response);
        if let Err(PushError::Backlogged) = result {
            warn!(connection = self.id(), kind = response.kind(), "Outbound queue full, dropping frame");
        }
        result
    }

    fn is_connected(&self) -> bool {
        !self.is_closed() && !self.inner.outbound.is_closed()
    }
}
