//! Per-connection delta computation.
//!
//! ```text
//!             request_sync                 request_sync
//! Unsynced ─────────────────► Synced ─────────────────► Synced
//!          sync_projects (all)        sync_updates {updated, deleted}
//!                                     or sync_unchanged
//! ```
//!
//! A [`SyncCursor`] remembers the fingerprint of every project the client
//! was last told about. Broadcasts keep it current through
//! [`SyncCursor::observe_change`], so the next delta only carries what
//! the client has not already seen.

use std::collections::HashMap;

use tandem_core::{fingerprint, Change, Fingerprint, ProjectMap, ProjectStore};

use crate::protocol::{ServerMessage, SyncDelta};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Unsynced,
    Synced,
}

#[derive(Debug, Clone, Default)]
pub struct SyncCursor {
    state: SyncState,
    known: HashMap<String, Fingerprint>,
}

impl SyncCursor {
    /// Cursor for a new connection; the first sync sends everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of the cursor.
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Whether a full sync or snapshot has been sent.
    pub fn is_synced(&self) -> bool {
        self.state == SyncState::Synced
    }

    /// Number of projects the client is known to hold.
    pub fn known_len(&self) -> usize {
        self.known.len()
    }

    /// Whether the client is known to hold `project_id`.
    pub fn knows(&self, project_id: &str) -> bool {
        self.known.contains_key(project_id)
    }

    /// Answer a `request_sync`: the full collection on first contact,
    /// a delta afterwards.
    pub fn sync(&mut self, store: &ProjectStore) -> ServerMessage {
        if self.state == SyncState::Unsynced {
            let all = store.get_all();
            self.reset_to(&all);
            return ServerMessage::SyncProjects(all);
        }

        let mut delta = SyncDelta::default();
        for (id, project) in store.iter() {
            let current = fingerprint(project);
            if self.known.get(id) != Some(&current) {
                delta.updated.insert(id.clone(), project.clone());
                self.known.insert(id.clone(), current);
            }
        }
        let gone: Vec<String> = self
            .known
            .keys()
            .filter(|id| !store.contains(id))
            .cloned()
            .collect();
        for id in gone {
            self.known.remove(&id);
            delta.deleted.push(id);
        }
        delta.deleted.sort();

        if delta.is_empty() {
            ServerMessage::SyncUnchanged
        } else {
            log::debug!(
                "Sync delta: {} updated, {} deleted",
                delta.updated.len(),
                delta.deleted.len()
            );
            ServerMessage::SyncUpdates(delta)
        }
    }

    /// Answer a snapshot request: the whole collection, and the known set
    /// becomes exactly that collection.
    pub fn snapshot(&mut self, store: &ProjectStore) -> ServerMessage {
        let all = store.get_all();
        self.reset_to(&all);
        ServerMessage::SyncResponse(all)
    }

    /// Record that the client was sent `change`. Unsynced cursors ignore
    /// it; their first sync sends everything anyway.
    pub fn observe_change(&mut self, change: &Change) {
        if self.state != SyncState::Synced {
            return;
        }
        match change.project() {
            Some(project) => {
                self.known.insert(project.id.clone(), fingerprint(project));
            }
            None => {
                self.known.remove(change.project_id());
            }
        }
    }

    fn reset_to(&mut self, projects: &ProjectMap) {
        self.known = projects
            .iter()
            .map(|(id, p)| (id.clone(), fingerprint(p)))
            .collect();
        self.state = SyncState::Synced;
    }
}
