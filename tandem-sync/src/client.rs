//! WebSocket sync client for the project dashboard server.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect, reconnect by connecting again)
//! - Optional token authentication on connect
//! - Request/ack correlation by `requestId`
//! - Offline queue drained automatically after every connect
//!
//! ```text
//!  submit ──► connected & queue empty? ── yes ──► send, await ack
//!                   │ no                               │ transport failure
//!                   ▼                                  ▼
//!             OfflineQueue::enqueue  ◄─────────────────┘
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;

use tandem_core::ProjectMap;

use crate::offline::{
    ChangeKind, DrainReport, OfflineChange, OfflineQueue, QueueError, QueueStorage, ReplayError,
    ReplayTransport,
};
use crate::protocol::{
    epoch_ms, Ack, AuthStatus, ClientMessage, ErrorCode, ErrorPayload, ProtocolError,
    ServerMessage, SyncDelta,
};

const EVENT_CAPACITY: usize = 256;
const OUTGOING_CAPACITY: usize = 256;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Connected,
    Disconnected,
    Authenticated(AuthStatus),
    /// Full collection (`sync_projects` or `sync_response`).
    Synced(ProjectMap),
    Delta(SyncDelta),
    Unchanged,
    /// A change made by another client.
    Remote(ServerMessage),
    Drained(DrainReport),
    /// Queued changes are waiting for valid credentials.
    AuthRequired(String),
    /// An error not tied to one of our requests.
    ServerError(ErrorPayload),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("cannot connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Replay(#[from] ReplayError),
}

/// What happened to a submitted change.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Sent(Ack),
    Queued(OfflineChange),
}

type AckSender = oneshot::Sender<Result<Ack, ReplayError>>;

/// State shared with the reader task.
#[derive(Debug)]
struct Shared {
    state: RwLock<ConnectionState>,
    outgoing: Mutex<Option<mpsc::Sender<String>>>,
    pending: Mutex<HashMap<String, AckSender>>,
    snapshot_waiters: Mutex<VecDeque<oneshot::Sender<ProjectMap>>>,
    auth_waiter: Mutex<Option<oneshot::Sender<AuthStatus>>>,
    events: mpsc::Sender<SyncEvent>,
    next_request: AtomicU64,
    /// Bumped on every connect and disconnect; a reader task only tears
    /// down the session it was started for.
    session: Mutex<u64>,
}

impl Shared {
    fn emit(&self, event: SyncEvent) {
        if self.events.try_send(event).is_err() {
            log::trace!("Sync event dropped; receiver full or gone");
        }
    }

    async fn send(&self, message: &ClientMessage, request_id: Option<String>) -> Result<(), ReplayError> {
        let mut frame = message
            .to_frame(epoch_ms(Utc::now()))
            .map_err(|e| ReplayError::Encode(e.to_string()))?;
        frame.request_id = request_id;
        let text = frame
            .encode()
            .map_err(|e| ReplayError::Encode(e.to_string()))?;

        let tx = self
            .outgoing
            .lock()
            .await
            .clone()
            .ok_or(ReplayError::Disconnected)?;
        tx.send(text).await.map_err(|_| ReplayError::Disconnected)
    }

    /// Incoming frame from the reader task.
    async fn dispatch(&self, message: ServerMessage) {
        match message {
            ServerMessage::Ack(ack) => match self.pending.lock().await.remove(&ack.request_id) {
                Some(waiter) => {
                    let _ = waiter.send(Ok(ack));
                }
                None => log::debug!("Ack for unknown request {}", ack.request_id),
            },
            ServerMessage::Error(error) => {
                let waiter = match &error.request_id {
                    Some(id) => self.pending.lock().await.remove(id),
                    None => None,
                };
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(Err(ReplayError::Rejected {
                            code: error.code,
                            message: error.message,
                        }));
                    }
                    None => {
                        log::warn!("Server error {:?}: {}", error.code, error.message);
                        self.emit(SyncEvent::ServerError(error));
                    }
                }
            }
            ServerMessage::SyncResponse(projects) => {
                // Waiters that timed out are skipped.
                let mut waiters = self.snapshot_waiters.lock().await;
                while let Some(waiter) = waiters.pop_front() {
                    if waiter.send(projects.clone()).is_ok() {
                        break;
                    }
                }
                drop(waiters);
                self.emit(SyncEvent::Synced(projects));
            }
            ServerMessage::SyncProjects(projects) => self.emit(SyncEvent::Synced(projects)),
            ServerMessage::SyncUpdates(delta) => self.emit(SyncEvent::Delta(delta)),
            ServerMessage::SyncUnchanged => self.emit(SyncEvent::Unchanged),
            ServerMessage::AuthStatus(status) => {
                if let Some(waiter) = self.auth_waiter.lock().await.take() {
                    let _ = waiter.send(status.clone());
                }
                self.emit(SyncEvent::Authenticated(status));
            }
            ServerMessage::Pong => log::trace!("pong"),
            remote => self.emit(SyncEvent::Remote(remote)),
        }
    }

    /// Tear down session `generation`. Stale calls are ignored.
    async fn mark_disconnected(&self, generation: u64) {
        let mut session = self.session.lock().await;
        if *session != generation {
            log::debug!("Ignoring close of stale session {generation}");
            return;
        }
        *session += 1;
        *self.state.write().await = ConnectionState::Disconnected;
        *self.outgoing.lock().await = None;
        // Dropping the senders fails every in-flight request.
        self.pending.lock().await.clear();
        self.snapshot_waiters.lock().await.clear();
        self.auth_waiter.lock().await.take();
        self.emit(SyncEvent::Disconnected);
    }
}

/// The sync client.
#[derive(Debug)]
pub struct SyncClient<S: QueueStorage> {
    url: String,
    token: Option<String>,
    request_timeout: Duration,
    shared: Arc<Shared>,
    queue: Mutex<OfflineQueue<S>>,
    event_rx: Option<mpsc::Receiver<SyncEvent>>,
}

impl<S: QueueStorage> SyncClient<S> {
    /// Create a client; queued changes in `storage` are restored.
    pub fn new(url: impl Into<String>, storage: S) -> Result<Self, ClientError> {
        let (events, event_rx) = mpsc::channel(EVENT_CAPACITY);
        Ok(Self {
            url: url.into(),
            token: None,
            request_timeout: Duration::from_secs(10),
            shared: Arc::new(Shared {
                state: RwLock::new(ConnectionState::Disconnected),
                outgoing: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                snapshot_waiters: Mutex::new(VecDeque::new()),
                auth_waiter: Mutex::new(None),
                events,
                next_request: AtomicU64::new(1),
                session: Mutex::new(0),
            }),
            queue: Mutex::new(OfflineQueue::open(storage)?),
            event_rx: Some(event_rx),
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Bound on waiting for acks, snapshots and auth replies.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.shared.state.read().await
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Connect, authenticate if a token is set, drain the offline queue,
    /// then ask for a sync.
    pub async fn connect(&self) -> Result<DrainReport, ClientError> {
        *self.shared.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(self.url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                *self.shared.state.write().await = ConnectionState::Disconnected;
                return Err(ClientError::Connect {
                    url: self.url.clone(),
                    reason: e.to_string(),
                });
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Install the new session before any task can observe it.
        let mut session = self.shared.session.lock().await;
        *session += 1;
        let generation = *session;

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTGOING_CAPACITY);
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });
        *self.shared.outgoing.lock().await = Some(out_tx);
        *self.shared.state.write().await = ConnectionState::Connected;
        drop(session);

        // Reader task: process incoming WebSocket messages
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerMessage::decode(text.as_str()) {
                        Ok(message) => shared.dispatch(message).await,
                        Err(e) => log::warn!("Undecodable server frame: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            shared.mark_disconnected(generation).await;
        });

        self.shared.emit(SyncEvent::Connected);
        log::info!("Connected to {}", self.url);

        if let Some(token) = &self.token {
            self.authenticate(token).await?;
        }

        // Reads need no credentials, so sync even when the drain was refused.
        let drained = self.drain_queue().await;
        self.request_sync().await?;
        match drained {
            Ok(report) => Ok(report),
            Err(ClientError::Queue(QueueError::AuthRequired(message))) => Ok(DrainReport {
                remaining: self.queue_len().await,
                stopped: Some(ReplayError::Rejected {
                    code: ErrorCode::AuthRequired,
                    message,
                }),
                ..DrainReport::default()
            }),
            Err(e) => Err(e),
        }
    }

    /// Close the connection. Queued changes stay queued.
    pub async fn disconnect(&self) {
        // The writer task closes the socket once its channel is dropped.
        let generation = *self.shared.session.lock().await;
        self.shared.mark_disconnected(generation).await;
    }

    pub async fn authenticate(&self, token: &str) -> Result<AuthStatus, ClientError> {
        let (tx, rx) = oneshot::channel();
        *self.shared.auth_waiter.lock().await = Some(tx);
        self.shared
            .send(
                &ClientMessage::Authenticate {
                    token: token.to_string(),
                },
                None,
            )
            .await?;
        let status = self.wait(rx).await?;
        if !status.authenticated {
            log::warn!("Server did not accept our token");
        }
        Ok(status)
    }

    /// Ask for a delta (or the full collection on first contact).
    pub async fn request_sync(&self) -> Result<(), ClientError> {
        self.shared
            .send(&ClientMessage::RequestSync { snapshot: false }, None)
            .await?;
        Ok(())
    }

    /// Apply a change now if possible, otherwise queue it.
    ///
    /// Server rejections are returned as [`ReplayError::Rejected`]; transport
    /// failures fall back to the queue.
    pub async fn submit(&self, kind: ChangeKind, payload: Value) -> Result<Submission, ClientError> {
        let connected = self.connection_state().await == ConnectionState::Connected;
        let mut queue = self.queue.lock().await;
        if connected && queue.is_empty() {
            let probe = OfflineChange {
                id: String::new(),
                kind,
                payload: payload.clone(),
                enqueued_at: Utc::now(),
            };
            match self.request(probe.to_message()?).await {
                Ok(ack) => return Ok(Submission::Sent(ack)),
                Err(e) if e.is_transport() => {
                    log::info!("Send failed ({e}); queueing {}", kind.as_str());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Submission::Queued(queue.enqueue(kind, payload)?))
    }

    /// Replay queued changes now.
    pub async fn drain_queue(&self) -> Result<DrainReport, ClientError> {
        let mut queue = self.queue.lock().await;
        match queue.drain(self).await {
            Ok(report) => {
                self.shared.emit(SyncEvent::Drained(report.clone()));
                Ok(report)
            }
            Err(QueueError::AuthRequired(message)) => {
                self.shared.emit(SyncEvent::AuthRequired(message.clone()));
                Err(QueueError::AuthRequired(message).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Send a mutation and wait for its ack.
    async fn request(&self, message: ClientMessage) -> Result<Ack, ReplayError> {
        let n = self.shared.next_request.fetch_add(1, Ordering::Relaxed);
        let request_id = format!("req-{n}");
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(request_id.clone(), tx);

        if let Err(e) = self.shared.send(&message, Some(request_id.clone())).await {
            self.shared.pending.lock().await.remove(&request_id);
            return Err(e);
        }
        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ReplayError::Disconnected),
            Err(_) => {
                self.shared.pending.lock().await.remove(&request_id);
                Err(ReplayError::Timeout)
            }
        }
    }

    async fn wait<T>(&self, rx: oneshot::Receiver<T>) -> Result<T, ReplayError> {
        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(ReplayError::Disconnected),
            Err(_) => Err(ReplayError::Timeout),
        }
    }
}

#[async_trait]
impl<S: QueueStorage> ReplayTransport for SyncClient<S> {
    async fn fetch_snapshot(&self) -> Result<ProjectMap, ReplayError> {
        let (tx, rx) = oneshot::channel();
        self.shared.snapshot_waiters.lock().await.push_back(tx);
        if let Err(e) = self
            .shared
            .send(&ClientMessage::RequestSync { snapshot: true }, None)
            .await
        {
            self.shared.snapshot_waiters.lock().await.pop_back();
            return Err(e);
        }
        self.wait(rx).await
    }

    async fn replay(&self, message: ClientMessage) -> Result<Ack, ReplayError> {
        self.request(message).await
    }
}
