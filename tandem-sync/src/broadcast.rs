//! Connection registry and fan-out to N-1 peers with backpressure.
//!
//! Each connection owns a bounded outbound channel drained by its socket
//! task. Frames are encoded once and shared as `Arc<str>`; delivery uses
//! `try_send`, so a slow reader can never stall the hub.
//!
//! ```text
//!                    ┌──────────────► conn A outbound (origin, skipped)
//! broadcast_except ──┼──────────────► conn B outbound ─► socket task B
//!                    └──────────────► conn C outbound ─► socket task C
//! ```
//!
//! A peer whose channel is full or closed is treated as gone: it is removed
//! after the iteration and its socket task ends when the sender drops.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use tandem_core::Change;

use crate::auth::AuthVerdict;
use crate::sync_engine::SyncCursor;

/// Unique identifier of a live connection.
pub type ConnectionId = Uuid;

/// Pre-encoded text frame.
pub type Outbound = Arc<str>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("outbound queue of {0} is full")]
    Saturated(ConnectionId),

    #[error("connection {0} is closed")]
    Closed(ConnectionId),

    #[error("connection {0} is not registered")]
    Unknown(ConnectionId),
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_connections: usize,
}

#[derive(Debug, Default)]
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

/// Server-side state of one live socket.
#[derive(Debug)]
pub struct ConnectionRecord {
    pub id: ConnectionId,
    pub remote_addr: Option<SocketAddr>,
    pub authenticated: bool,
    pub username: Option<String>,
    pub role: Option<String>,
    pub last_activity: DateTime<Utc>,
    pub cursor: SyncCursor,
    outbound: mpsc::Sender<Outbound>,
}

impl ConnectionRecord {
    /// Record for a freshly accepted socket; unauthenticated and unsynced.
    pub fn new(
        remote_addr: Option<SocketAddr>,
        outbound: mpsc::Sender<Outbound>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            remote_addr,
            authenticated: false,
            username: None,
            role: None,
            last_activity: now,
            cursor: SyncCursor::new(),
            outbound,
        }
    }

    /// Adopt the outcome of an `authenticate` request.
    pub fn apply_verdict(&mut self, verdict: &AuthVerdict) {
        self.authenticated = verdict.authenticated;
        self.username = verdict.username.clone();
        self.role = verdict.role.clone();
    }

    /// Mark the connection as active at `now`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }

    fn try_deliver(&self, frame: Outbound) -> Result<(), TransportError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Saturated(self.id),
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed(self.id),
        })
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, ConnectionRecord>,
    stats: AtomicBroadcastStats,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection and return its id.
    pub fn register(&mut self, record: ConnectionRecord) -> ConnectionId {
        let id = record.id;
        self.connections.insert(id, record);
        id
    }

    /// Dropping the returned record closes the outbound channel.
    pub fn remove(&mut self, id: &ConnectionId) -> Option<ConnectionRecord> {
        self.connections.remove(id)
    }

    /// Look up a connection.
    pub fn get(&self, id: &ConnectionId) -> Option<&ConnectionRecord> {
        self.connections.get(id)
    }

    /// Look up a connection for update (auth, cursor, activity).
    pub fn get_mut(&mut self, id: &ConnectionId) -> Option<&mut ConnectionRecord> {
        self.connections.get_mut(id)
    }

    /// Whether the connection is still registered.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connection is open.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Connections idle since before `cutoff`.
    pub fn inactive_since(&self, cutoff: DateTime<Utc>) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| c.last_activity < cutoff)
            .map(|c| c.id)
            .collect()
    }

    /// Deliver one frame to one connection. The caller decides whether a
    /// failure drops the connection.
    pub fn send_to(&self, id: &ConnectionId, frame: Outbound) -> Result<(), TransportError> {
        let record = self
            .connections
            .get(id)
            .ok_or(TransportError::Unknown(*id))?;
        match record.try_deliver(frame) {
            Ok(()) => {
                self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Fan `frame` out to every connection except `origin`, updating each
    /// recipient's sync cursor with `change`. Returns how many peers got it.
    pub fn broadcast_except(
        &mut self,
        origin: Option<&ConnectionId>,
        frame: &Outbound,
        change: &Change,
    ) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();

        for (id, record) in self.connections.iter_mut() {
            if Some(id) == origin {
                continue;
            }
            match record.try_deliver(Arc::clone(frame)) {
                Ok(()) => {
                    record.cursor.observe_change(change);
                    delivered += 1;
                }
                Err(e) => {
                    log::warn!("Dropping peer during broadcast: {e}");
                    failed.push(*id);
                }
            }
        }

        self.stats
            .messages_sent
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.stats
            .messages_dropped
            .fetch_add(failed.len() as u64, Ordering::Relaxed);
        for id in failed {
            self.connections.remove(&id);
        }
        delivered
    }

    /// Snapshot of the fan-out counters.
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.stats.messages_dropped.load(Ordering::Relaxed),
            active_connections: self.connections.len(),
        }
    }
}
