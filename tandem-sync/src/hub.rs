//! The server context: store, connections, auth and persistence in one place.
//!
//! ```text
//!  socket task ──text──► Hub::handle_text ──► decode ──► dispatch
//!                              │                            │
//!                              │                 ┌──────────┴───────────┐
//!                              │           control msg              mutation
//!                              │        (auth, sync, ping)     auth gate → MutationProcessor
//!                              │                 │                      │
//!                              ▼                 ▼                      ▼
//!                        reply to origin ◄── ack / error      persist job + broadcast_except
//! ```
//!
//! All methods are synchronous. The server wraps the hub in a
//! `tokio::sync::Mutex` and each message is handled to completion while the
//! lock is held; nothing in here awaits.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};

use tandem_core::{Clock, Mutation, MutationError, MutationProcessor, ProjectMap, ProjectStore};

use crate::auth::{AuthPolicy, Authenticator, TokenAuthenticator};
use crate::broadcast::{BroadcastStats, ConnectionId, ConnectionRecord, ConnectionRegistry, Outbound};
use crate::protocol::{
    epoch_ms, Ack, AuthStatus, ClientMessage, ErrorCode, Frame, ProtocolError, ServerMessage,
};
use crate::storage::PersistHandle;

/// The hub as shared by socket tasks, housekeeping and the health route.
pub type SharedHub = Arc<Mutex<Hub>>;

/// Why a client request was refused. Sent back to the origin only.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    #[error("authentication required to modify projects")]
    AuthRequired,

    #[error(transparent)]
    Mutation(#[from] MutationError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl RequestError {
    /// Wire error code reported to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::AuthRequired => ErrorCode::AuthRequired,
            Self::Mutation(MutationError::Validation(_)) => ErrorCode::ValidationError,
            Self::Mutation(MutationError::NotFound { .. }) => ErrorCode::NotFound,
            Self::Protocol(e) => e.code(),
        }
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: String,
    pub uptime_secs: u64,
    pub timestamp: i64,
    pub connections: usize,
    pub projects: usize,
}

#[derive(Debug)]
pub struct Hub {
    store: ProjectStore,
    connections: ConnectionRegistry,
    authenticator: Arc<dyn Authenticator>,
    policy: AuthPolicy,
    clock: Arc<dyn Clock>,
    persist: PersistHandle,
    started_at: DateTime<Utc>,
}

impl Hub {
    /// A hub with an empty token table and the default (strict) policy.
    pub fn new(store: ProjectStore, persist: PersistHandle, clock: Arc<dyn Clock>) -> Self {
        let started_at = clock.now();
        Self {
            store,
            connections: ConnectionRegistry::new(),
            authenticator: Arc::new(TokenAuthenticator::new()),
            policy: AuthPolicy::default(),
            clock,
            persist,
            started_at,
        }
    }

    /// Use `authenticator` for `authenticate` requests.
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Replace the write policy.
    pub fn with_policy(mut self, policy: AuthPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Wrap the hub for use across tasks.
    pub fn into_shared(self) -> SharedHub {
        Arc::new(Mutex::new(self))
    }

    // ─── Connections ────────────────────────────────────────────────

    /// Register a connection whose frames are delivered through `outbound`.
    pub fn open_connection(
        &mut self,
        remote_addr: Option<SocketAddr>,
        outbound: mpsc::Sender<Outbound>,
    ) -> ConnectionId {
        let record = ConnectionRecord::new(remote_addr, outbound, self.clock.now());
        let id = self.connections.register(record);
        log::info!(
            "Connection {id} opened from {} ({} live)",
            remote_addr.map_or_else(|| "unknown".to_string(), |a| a.to_string()),
            self.connections.len()
        );
        id
    }

    /// Returns `false` if the connection was already gone.
    pub fn close_connection(&mut self, id: &ConnectionId) -> bool {
        let closed = self.connections.remove(id).is_some();
        if closed {
            log::info!("Connection {id} closed ({} live)", self.connections.len());
        }
        closed
    }

    /// Drop every connection idle for longer than `timeout`.
    pub fn sweep_inactive(&mut self, now: DateTime<Utc>, timeout: Duration) -> Vec<ConnectionId> {
        let stale = self.connections.inactive_since(now - timeout);
        for id in &stale {
            self.connections.remove(id);
            log::info!("Connection {id} dropped after {} minutes idle", timeout.num_minutes());
        }
        stale
    }

    /// Look up a connection record.
    pub fn connection(&self, id: &ConnectionId) -> Option<&ConnectionRecord> {
        self.connections.get(id)
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Fan-out counters of the connection registry.
    pub fn broadcast_stats(&self) -> BroadcastStats {
        self.connections.stats()
    }

    // ─── Store views ────────────────────────────────────────────────

    /// Read-only view of the authoritative store.
    pub fn store(&self) -> &ProjectStore {
        &self.store
    }

    /// Owned copy of the whole collection.
    pub fn snapshot(&self) -> ProjectMap {
        self.store.get_all()
    }

    /// Queue a backup of the current collection, tagged with `reason`.
    pub fn request_backup(&self, reason: &str) {
        log::info!("Backing up {} projects ({reason})", self.store.len());
        self.persist.backup(self.store.get_all(), reason);
    }

    /// Body of `GET /health`.
    pub fn health(&self) -> HealthReport {
        let now = self.clock.now();
        HealthReport {
            status: "ok".to_string(),
            uptime_secs: (now - self.started_at).num_seconds().max(0) as u64,
            timestamp: epoch_ms(now),
            connections: self.connections.len(),
            projects: self.store.len(),
        }
    }

    // ─── Message handling ───────────────────────────────────────────

    /// Process one text frame from `conn` to completion.
    pub fn handle_text(&mut self, conn: &ConnectionId, text: &str) {
        let now = self.clock.now();
        match self.connections.get_mut(conn) {
            Some(record) => record.touch(now),
            None => {
                log::debug!("Frame from unregistered connection {conn} ignored");
                return;
            }
        }

        let frame = match Frame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                log::debug!("Connection {conn} sent an undecodable frame: {e}");
                self.reply_error(conn, &e.into(), None);
                return;
            }
        };
        let request_id = frame.request_id.clone();

        let result = ClientMessage::from_frame(&frame)
            .map_err(RequestError::from)
            .and_then(|message| self.dispatch(conn, message, request_id.clone()));
        if let Err(e) = result {
            log::debug!("Request `{}` from {conn} refused: {e}", frame.kind);
            self.reply_error(conn, &e, request_id);
        }
    }

    fn dispatch(
        &mut self,
        conn: &ConnectionId,
        message: ClientMessage,
        request_id: Option<String>,
    ) -> Result<(), RequestError> {
        match message {
            ClientMessage::Ping => self.reply(conn, &ServerMessage::Pong),
            ClientMessage::Authenticate { token } => {
                let verdict = self.authenticator.authenticate(&token);
                if let Some(record) = self.connections.get_mut(conn) {
                    record.apply_verdict(&verdict);
                }
                if verdict.authenticated {
                    log::info!(
                        "Connection {conn} authenticated as {}",
                        verdict.username.as_deref().unwrap_or("?")
                    );
                } else {
                    log::warn!("Connection {conn} failed authentication");
                }
                self.reply(
                    conn,
                    &ServerMessage::AuthStatus(AuthStatus {
                        authenticated: verdict.authenticated,
                        username: verdict.username,
                        role: verdict.role,
                    }),
                );
            }
            ClientMessage::RequestSync { snapshot } => {
                let Some(record) = self.connections.get_mut(conn) else {
                    return Ok(());
                };
                let message = if snapshot {
                    record.cursor.snapshot(&self.store)
                } else {
                    record.cursor.sync(&self.store)
                };
                self.reply(conn, &message);
            }
            other => {
                let kind = other.kind();
                if let Some(mutation) = other.mutation() {
                    self.apply_mutation(conn, kind, mutation, request_id)?;
                }
            }
        }
        Ok(())
    }

    fn apply_mutation(
        &mut self,
        origin: &ConnectionId,
        kind: &'static str,
        mutation: Mutation,
        request_id: Option<String>,
    ) -> Result<(), RequestError> {
        let authenticated = self
            .connections
            .get(origin)
            .is_some_and(|c| c.authenticated);
        if !self.policy.allows_changes(authenticated) {
            return Err(RequestError::AuthRequired);
        }

        let target = target_id(&mutation);
        let commit = MutationProcessor::new(&mut self.store, self.clock.as_ref()).apply(mutation)?;

        let (id, applied) = match &commit.change {
            None => {
                log::debug!("`{kind}` from {origin} changed nothing");
                (target, false)
            }
            Some(change) => {
                if let Some(pre_image) = commit.pre_image.clone() {
                    self.persist.backup(pre_image, kind);
                }
                self.persist.save(self.store.get_all());

                match self.encode(&ServerMessage::from_change(change)) {
                    Ok(frame) => {
                        let delivered = self.connections.broadcast_except(Some(origin), &frame, change);
                        log::debug!("`{kind}` on {} broadcast to {delivered} peers", change.entity_id());
                    }
                    Err(e) => log::error!("Cannot encode `{kind}` broadcast: {e}"),
                }
                (Some(change.entity_id().to_string()), true)
            }
        };

        if let Some(request_id) = request_id {
            self.reply(
                origin,
                &ServerMessage::Ack(Ack {
                    request_id,
                    kind: kind.to_string(),
                    id,
                    applied,
                }),
            );
        }
        Ok(())
    }

    fn reply_error(&mut self, conn: &ConnectionId, error: &RequestError, request_id: Option<String>) {
        self.reply(conn, &ServerMessage::error(error.code(), error.to_string(), request_id));
    }

    /// Send to one connection; a connection that cannot take it is dropped.
    fn reply(&mut self, conn: &ConnectionId, message: &ServerMessage) {
        let frame = match self.encode(message) {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("Cannot encode `{}` reply: {e}", message.kind());
                return;
            }
        };
        if let Err(e) = self.connections.send_to(conn, frame) {
            log::warn!("Reply failed, dropping connection: {e}");
            self.connections.remove(conn);
        }
    }

    fn encode(&self, message: &ServerMessage) -> Result<Outbound, ProtocolError> {
        message
            .encode(epoch_ms(self.clock.now()))
            .map(Outbound::from)
    }
}

/// Id a mutation names before it is applied, echoed in no-op acks.
fn target_id(mutation: &Mutation) -> Option<String> {
    match mutation {
        Mutation::DeleteProject { id } => Some(id.clone()),
        Mutation::DeleteStep { step_id, .. } => Some(step_id.clone()),
        Mutation::AddProject(data) | Mutation::UpdateProject(data) | Mutation::UpsertStep(data) => {
            data.get("id").and_then(|v| v.as_str()).map(str::to_string)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::kind;
    use crate::storage::PersistJob;
    use chrono::TimeZone;
    use serde_json::{json, Value};
    use tandem_core::{ManualClock, ProjectStatus};

    struct Fixture {
        hub: Hub,
        clock: ManualClock,
        jobs: mpsc::UnboundedReceiver<PersistJob>,
    }

    fn fixture(policy: AuthPolicy) -> Fixture {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap());
        let (persist, jobs) = PersistHandle::channel();
        let auth = TokenAuthenticator::new().with_token("secret", "alice", "editor");
        let hub = Hub::new(ProjectStore::new(), persist, Arc::new(clock.clone()))
            .with_authenticator(Arc::new(auth))
            .with_policy(policy);
        Fixture { hub, clock, jobs }
    }

    fn connect(hub: &mut Hub) -> (ConnectionId, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(32);
        (hub.open_connection(None, tx), rx)
    }

    fn send(hub: &mut Hub, conn: &ConnectionId, kind: &str, data: Value, request_id: Option<&str>) {
        let mut frame = Frame::new(kind, data, 0);
        frame.request_id = request_id.map(str::to_string);
        hub.handle_text(conn, &frame.encode().unwrap());
    }

    fn next(rx: &mut mpsc::Receiver<Outbound>) -> ServerMessage {
        let text = rx.try_recv().expect("expected an outbound frame");
        ServerMessage::decode(&text).unwrap()
    }

    #[test]
    fn test_sync_convergence() {
        let mut f = fixture(AuthPolicy::open());
        let (a, mut rx_a) = connect(&mut f.hub);
        let (b, mut rx_b) = connect(&mut f.hub);
        send(&mut f.hub, &b, kind::ADD_PROJECT, json!({ "id": "p1", "title": "One" }), None);
        send(&mut f.hub, &b, kind::ADD_PROJECT, json!({ "id": "p2", "title": "Two" }), None);
        while rx_a.try_recv().is_ok() {}

        send(&mut f.hub, &a, kind::REQUEST_SYNC, json!({}), None);
        assert!(matches!(next(&mut rx_a), ServerMessage::SyncProjects(all) if all.len() == 2));
        send(&mut f.hub, &a, kind::REQUEST_SYNC, json!({}), None);
        assert_eq!(next(&mut rx_a), ServerMessage::SyncUnchanged);

        // A is synced, so the broadcast advances its cursor.
        send(&mut f.hub, &b, kind::UPDATE_PROJECT, json!({ "id": "p2", "title": "Deux" }), None);
        assert!(matches!(next(&mut rx_a), ServerMessage::ProjectUpdated(p) if p.title == "Deux"));
        send(&mut f.hub, &a, kind::REQUEST_SYNC, json!({}), None);
        assert_eq!(next(&mut rx_a), ServerMessage::SyncUnchanged);

        // B never saw its own update echoed; its first sync is full.
        assert!(rx_b.try_recv().is_err());
        send(&mut f.hub, &b, kind::REQUEST_SYNC, json!({}), None);
        assert!(matches!(next(&mut rx_b), ServerMessage::SyncProjects(_)));
    }

    #[test]
    fn test_delta_after_missed_broadcast() {
        let mut f = fixture(AuthPolicy::open());
        let (a, mut rx_a) = connect(&mut f.hub);
        let (b, _rx_b) = connect(&mut f.hub);
        send(&mut f.hub, &b, kind::ADD_PROJECT, json!({ "id": "p1", "title": "One" }), None);
        send(&mut f.hub, &b, kind::ADD_PROJECT, json!({ "id": "p2", "title": "Two" }), None);
        while rx_a.try_recv().is_ok() {}
        send(&mut f.hub, &a, kind::REQUEST_SYNC, json!({}), None);
        next(&mut rx_a);

        // Simulate a dropped broadcast by mutating the store directly.
        let mut p2 = f.hub.store.get("p2").cloned().unwrap();
        p2.progress = 10;
        f.hub.store.put(p2);
        f.hub.store.remove("p1");

        send(&mut f.hub, &a, kind::REQUEST_SYNC, json!({}), None);
        match next(&mut rx_a) {
            ServerMessage::SyncUpdates(delta) => {
                assert_eq!(delta.updated.keys().collect::<Vec<_>>(), vec!["p2"]);
                assert_eq!(delta.deleted, vec!["p1".to_string()]);
            }
            other => panic!("expected sync_updates, got {other:?}"),
        }
    }

    #[test]
    fn test_auth_gating() {
        let mut f = fixture(AuthPolicy::default());
        let (a, mut rx_a) = connect(&mut f.hub);
        let (_b, mut rx_b) = connect(&mut f.hub);

        send(&mut f.hub, &a, kind::ADD_PROJECT, json!({ "title": "Nope" }), Some("r1"));
        match next(&mut rx_a) {
            ServerMessage::Error(e) => {
                assert_eq!(e.code, ErrorCode::AuthRequired);
                assert_eq!(e.request_id.as_deref(), Some("r1"));
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert!(f.hub.store().is_empty());
        assert!(f.jobs.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());

        send(&mut f.hub, &a, kind::AUTHENTICATE, json!({ "token": "secret" }), None);
        match next(&mut rx_a) {
            ServerMessage::AuthStatus(s) => {
                assert!(s.authenticated);
                assert_eq!(s.role.as_deref(), Some("editor"));
            }
            other => panic!("expected auth_status, got {other:?}"),
        }

        send(&mut f.hub, &a, kind::ADD_PROJECT, json!({ "title": "Yes" }), Some("r2"));
        assert!(matches!(next(&mut rx_a), ServerMessage::Ack(ack) if ack.applied && ack.request_id == "r2"));
        assert_eq!(f.hub.store().len(), 1);
        assert!(matches!(next(&mut rx_b), ServerMessage::ProjectAdded(_)));
    }

    #[test]
    fn test_bad_token_leaves_connection_unauthenticated() {
        let mut f = fixture(AuthPolicy::default());
        let (a, mut rx_a) = connect(&mut f.hub);
        send(&mut f.hub, &a, kind::AUTHENTICATE, json!({ "token": "wrong" }), None);
        assert!(matches!(next(&mut rx_a), ServerMessage::AuthStatus(s) if !s.authenticated));
        assert!(!f.hub.connection(&a).unwrap().authenticated);
    }

    #[test]
    fn test_protocol_errors() {
        let mut f = fixture(AuthPolicy::open());
        let (a, mut rx_a) = connect(&mut f.hub);

        f.hub.handle_text(&a, "not json at all");
        assert!(matches!(next(&mut rx_a), ServerMessage::Error(e) if e.code == ErrorCode::BadMessage));

        send(&mut f.hub, &a, "rename_everything", json!({}), Some("r9"));
        match next(&mut rx_a) {
            ServerMessage::Error(e) => {
                assert_eq!(e.code, ErrorCode::UnknownMessageType);
                assert_eq!(e.request_id.as_deref(), Some("r9"));
            }
            other => panic!("expected error, got {other:?}"),
        }

        send(&mut f.hub, &a, kind::PING, json!({}), None);
        assert_eq!(next(&mut rx_a), ServerMessage::Pong);
    }

    #[test]
    fn test_validation_errors_reach_origin_only() {
        let mut f = fixture(AuthPolicy::open());
        let (a, mut rx_a) = connect(&mut f.hub);
        let (_b, mut rx_b) = connect(&mut f.hub);

        send(&mut f.hub, &a, kind::ADD_PROJECT, json!({ "title": "X", "status": "bogus" }), None);
        assert!(matches!(next(&mut rx_a), ServerMessage::Error(e) if e.code == ErrorCode::ValidationError));
        send(&mut f.hub, &a, kind::ADD_PROJECT, json!({ "title": "X", "progress": 150 }), None);
        assert!(matches!(next(&mut rx_a), ServerMessage::Error(e) if e.code == ErrorCode::ValidationError));
        send(&mut f.hub, &a, kind::UPDATE_PROJECT, json!({ "id": "ghost", "title": "X" }), None);
        assert!(matches!(next(&mut rx_a), ServerMessage::Error(e) if e.code == ErrorCode::NotFound));

        assert!(rx_b.try_recv().is_err());
        assert!(f.hub.store().is_empty());
    }

    #[test]
    fn test_delete_missing_project_is_quiet() {
        let mut f = fixture(AuthPolicy::open());
        let (a, mut rx_a) = connect(&mut f.hub);
        let (_b, mut rx_b) = connect(&mut f.hub);

        send(&mut f.hub, &a, kind::DELETE_PROJECT, json!({ "id": "ghost" }), Some("r1"));

        match next(&mut rx_a) {
            ServerMessage::Ack(ack) => {
                assert!(!ack.applied);
                assert_eq!(ack.id.as_deref(), Some("ghost"));
            }
            other => panic!("expected ack, got {other:?}"),
        }
        assert!(rx_b.try_recv().is_err());
        assert!(f.jobs.try_recv().is_err());
    }

    #[test]
    fn test_delete_backs_up_before_save() {
        let mut f = fixture(AuthPolicy::open());
        let (a, _rx_a) = connect(&mut f.hub);
        let (_b, mut rx_b) = connect(&mut f.hub);
        send(&mut f.hub, &a, kind::ADD_PROJECT, json!({ "id": "p1", "title": "One" }), None);
        while f.jobs.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}

        send(&mut f.hub, &a, kind::DELETE_PROJECT, json!({ "id": "p1" }), None);

        match f.jobs.try_recv().unwrap() {
            PersistJob::Backup { snapshot, reason } => {
                assert!(snapshot.contains_key("p1"));
                assert_eq!(reason, "delete_project");
            }
            other => panic!("expected backup first, got {other:?}"),
        }
        assert!(matches!(f.jobs.try_recv().unwrap(), PersistJob::Save(s) if s.is_empty()));
        assert_eq!(next(&mut rx_b), ServerMessage::ProjectDeleted { id: "p1".into() });
    }

    #[test]
    fn test_step_broadcast_carries_derived_fields() {
        let mut f = fixture(AuthPolicy::open());
        let (a, _rx_a) = connect(&mut f.hub);
        let (_b, mut rx_b) = connect(&mut f.hub);
        send(
            &mut f.hub,
            &a,
            kind::ADD_PROJECT,
            json!({
                "id": "p1",
                "title": "Launch",
                "steps": [
                    { "id": "s1", "title": "Draft", "completed": true },
                    { "id": "s2", "title": "Review", "completed": false }
                ]
            }),
            None,
        );
        while rx_b.try_recv().is_ok() {}

        send(
            &mut f.hub,
            &a,
            kind::UPDATE_STEP,
            json!({ "id": "s2", "projectId": "p1", "title": "Review", "completed": true }),
            None,
        );

        match next(&mut rx_b) {
            ServerMessage::StepUpdated(n) => {
                assert_eq!(n.step.id, "s2");
                assert_eq!(n.progress, 100);
                assert_eq!(n.status, ProjectStatus::Completed);
                assert_eq!(n.next_step, "All steps completed");
            }
            other => panic!("expected update_step, got {other:?}"),
        }

        send(
            &mut f.hub,
            &a,
            kind::ADD_STEP,
            json!({ "id": "s3", "projectId": "p1", "title": "Ship", "completed": false }),
            None,
        );
        assert!(matches!(next(&mut rx_b), ServerMessage::StepAdded(n) if n.progress == 67));
    }

    #[test]
    fn test_sweep_inactive() {
        let mut f = fixture(AuthPolicy::open());
        let (idle, mut rx_idle) = connect(&mut f.hub);
        f.clock.advance(Duration::minutes(20));
        let (busy, _rx_busy) = connect(&mut f.hub);
        f.clock.advance(Duration::minutes(15));
        send(&mut f.hub, &busy, kind::PING, json!({}), None);

        let dropped = f.hub.sweep_inactive(f.clock.now(), Duration::minutes(30));

        assert_eq!(dropped, vec![idle]);
        assert_eq!(f.hub.connection_count(), 1);
        assert!(matches!(
            rx_idle.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_health_and_backup() {
        let mut f = fixture(AuthPolicy::open());
        let (a, _rx) = connect(&mut f.hub);
        send(&mut f.hub, &a, kind::ADD_PROJECT, json!({ "title": "One" }), None);
        f.clock.advance(Duration::seconds(90));

        let health = f.hub.health();
        assert_eq!(health.status, "ok");
        assert_eq!(health.uptime_secs, 90);
        assert_eq!(health.connections, 1);
        assert_eq!(health.projects, 1);

        while f.jobs.try_recv().is_ok() {}
        f.hub.request_backup("daily");
        assert!(matches!(f.jobs.try_recv().unwrap(), PersistJob::Backup { reason, .. } if reason == "daily"));
    }

    #[test]
    fn test_request_error_codes() {
        assert_eq!(RequestError::AuthRequired.code(), ErrorCode::AuthRequired);
        let not_found = RequestError::from(MutationError::NotFound {
            kind: "project",
            id: "x".into(),
        });
        assert_eq!(not_found.code(), ErrorCode::NotFound);
    }
}
