//! Client-side queue for changes made while disconnected.
//!
//! On reconnect the queue is drained against the server's current state:
//!
//! ```text
//! fetch snapshot ──► known entities ──► for each queued change, oldest first:
//!   (timeout)                              conflict?  ── yes ──► discard, log
//!                                              │ no
//!                                              ▼
//!                                        replay, await ack ──► apply to known view
//!                                              │ transport failure
//!                                              ▼
//!                                        stop, keep the rest for next time
//! ```
//!
//! Every removal is written through to [`QueueStorage`] so a crash
//! mid-drain never replays an entry twice from disk.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use tandem_core::ProjectMap;

use crate::protocol::{kind, Ack, ClientMessage, ErrorCode, Frame, ProtocolError};

/// Default bound on waiting for the server's snapshot.
pub const DEFAULT_SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default bound on waiting for one replayed change to be acknowledged.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    AddProject,
    UpdateProject,
    DeleteProject,
    AddStep,
    UpdateStep,
    DeleteStep,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddProject => kind::ADD_PROJECT,
            Self::UpdateProject => kind::UPDATE_PROJECT,
            Self::DeleteProject => kind::DELETE_PROJECT,
            Self::AddStep => kind::ADD_STEP,
            Self::UpdateStep => kind::UPDATE_STEP,
            Self::DeleteStep => kind::DELETE_STEP,
        }
    }

    fn targets_project(&self) -> bool {
        matches!(self, Self::AddProject | Self::UpdateProject | Self::DeleteProject)
    }
}

/// One buffered mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineChange {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
}

impl OfflineChange {
    /// Project the change touches.
    pub fn project_id(&self) -> Option<&str> {
        let key = if self.kind.targets_project() { "id" } else { "projectId" };
        non_empty_str(&self.payload, key)
    }

    /// Step the change touches, for step changes.
    pub fn step_id(&self) -> Option<&str> {
        match self.kind {
            ChangeKind::AddStep | ChangeKind::UpdateStep => non_empty_str(&self.payload, "id"),
            ChangeKind::DeleteStep => non_empty_str(&self.payload, "stepId"),
            _ => None,
        }
    }

    pub fn to_message(&self) -> Result<ClientMessage, ProtocolError> {
        let frame = Frame::new(self.kind.as_str(), self.payload.clone(), 0);
        ClientMessage::from_frame(&frame)
    }
}

fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Projects and their step ids as the server last reported them, advanced
/// locally as replayed changes are acknowledged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnownEntities {
    projects: HashMap<String, HashSet<String>>,
}

impl KnownEntities {
    pub fn from_projects(projects: &ProjectMap) -> Self {
        Self {
            projects: projects
                .iter()
                .map(|(id, p)| (id.clone(), p.steps.iter().map(|s| s.id.clone()).collect()))
                .collect(),
        }
    }

    pub fn has_project(&self, project_id: &str) -> bool {
        self.projects.contains_key(project_id)
    }

    pub fn has_step(&self, project_id: &str, step_id: &str) -> bool {
        self.projects
            .get(project_id)
            .is_some_and(|steps| steps.contains(step_id))
    }

    /// Fold an acknowledged change in. `assigned_id` is the id the server
    /// reported, used when the payload carried none.
    pub fn apply(&mut self, change: &OfflineChange, assigned_id: Option<&str>) {
        let project_id = change.project_id().map(str::to_string);
        match change.kind {
            ChangeKind::AddProject => {
                let Some(id) = project_id.or_else(|| assigned_id.map(str::to_string)) else {
                    return;
                };
                self.projects.insert(id, step_ids(&change.payload));
            }
            ChangeKind::UpdateProject => {
                if let (Some(id), Some(_)) = (project_id, change.payload.get("steps")) {
                    self.projects.insert(id, step_ids(&change.payload));
                }
            }
            ChangeKind::DeleteProject => {
                if let Some(id) = project_id {
                    self.projects.remove(&id);
                }
            }
            ChangeKind::AddStep | ChangeKind::UpdateStep => {
                let step_id = change.step_id().or(assigned_id);
                if let (Some(pid), Some(sid)) = (project_id, step_id) {
                    self.projects.entry(pid).or_default().insert(sid.to_string());
                }
            }
            ChangeKind::DeleteStep => {
                if let (Some(pid), Some(sid)) = (project_id, change.step_id()) {
                    if let Some(steps) = self.projects.get_mut(&pid) {
                        steps.remove(sid);
                    }
                }
            }
        }
    }
}

fn step_ids(payload: &Value) -> HashSet<String> {
    payload
        .get("steps")
        .and_then(Value::as_array)
        .map(|steps| {
            steps
                .iter()
                .filter_map(|s| non_empty_str(s, "id"))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Would replaying `change` act on state the server no longer has (or,
/// for an add, already has)?
pub fn has_conflict(change: &OfflineChange, known: &KnownEntities) -> bool {
    let project = change.project_id();
    match change.kind {
        ChangeKind::AddProject => project.is_some_and(|id| known.has_project(id)),
        ChangeKind::UpdateProject | ChangeKind::DeleteProject | ChangeKind::AddStep => {
            !project.is_some_and(|id| known.has_project(id))
        }
        ChangeKind::UpdateStep | ChangeKind::DeleteStep => match (project, change.step_id()) {
            (Some(pid), Some(sid)) => !known.has_step(pid, sid),
            _ => true,
        },
    }
}

// ─── Errors ─────────────────────────────────────────────────────────

/// Failure of one round trip through a [`ReplayTransport`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReplayError {
    #[error("timed out waiting for the server")]
    Timeout,

    #[error("not connected to the server")]
    Disconnected,

    #[error("server rejected the change ({code:?}): {message}")]
    Rejected { code: ErrorCode, message: String },

    /// The change could not be turned into a frame. Retrying cannot help.
    #[error("cannot encode the change: {0}")]
    Encode(String),
}

impl ReplayError {
    /// Transport failures keep the entry for the next attempt.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Timeout | Self::Disconnected)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("queue file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode queue: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("server requires authentication: {0}")]
    AuthRequired(String),
}

// ─── Transport seam ─────────────────────────────────────────────────

/// What the drain needs from a connection.
#[async_trait]
pub trait ReplayTransport: Send + Sync {
    /// Current authoritative collection.
    async fn fetch_snapshot(&self) -> Result<ProjectMap, ReplayError>;

    /// Send one change and wait for its acknowledgement.
    async fn replay(&self, message: ClientMessage) -> Result<Ack, ReplayError>;
}

// ─── Durable storage ────────────────────────────────────────────────

pub trait QueueStorage: Send + Sync + Debug {
    fn load(&self) -> Result<Vec<OfflineChange>, QueueError>;
    fn store(&self, changes: &[OfflineChange]) -> Result<(), QueueError>;
}

/// JSON file, replaced atomically on every write.
#[derive(Debug, Clone)]
pub struct FileQueueStorage {
    path: PathBuf,
}

impl FileQueueStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl QueueStorage for FileQueueStorage {
    fn load(&self) -> Result<Vec<OfflineChange>, QueueError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(QueueError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_slice(&bytes).map_err(|source| QueueError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn store(&self, changes: &[OfflineChange]) -> Result<(), QueueError> {
        let io = |path: &Path, source| QueueError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| io(parent, e))?;
        }
        let json = serde_json::to_vec(changes).map_err(QueueError::Encode)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).map_err(|e| io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| io(&self.path, e))
    }
}

/// In-memory storage. Clones share contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueueStorage {
    changes: Arc<Mutex<Vec<OfflineChange>>>,
}

impl MemoryQueueStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored(&self) -> Vec<OfflineChange> {
        self.changes.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl QueueStorage for MemoryQueueStorage {
    fn load(&self) -> Result<Vec<OfflineChange>, QueueError> {
        Ok(self.stored())
    }

    fn store(&self, changes: &[OfflineChange]) -> Result<(), QueueError> {
        *self.changes.lock().unwrap_or_else(|p| p.into_inner()) = changes.to_vec();
        Ok(())
    }
}

// ─── Queue ──────────────────────────────────────────────────────────

/// Outcome of one drain attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    pub replayed: usize,
    pub conflicts: usize,
    pub rejected: usize,
    pub remaining: usize,
    /// Set when a transport failure ended the attempt early.
    pub stopped: Option<ReplayError>,
}

impl DrainReport {
    pub fn is_complete(&self) -> bool {
        self.stopped.is_none() && self.remaining == 0
    }
}

#[derive(Debug)]
pub struct OfflineQueue<S: QueueStorage> {
    entries: VecDeque<OfflineChange>,
    storage: S,
    snapshot_timeout: Duration,
    ack_timeout: Duration,
}

impl<S: QueueStorage> OfflineQueue<S> {
    /// Open the queue, restoring whatever `storage` holds.
    pub fn open(storage: S) -> Result<Self, QueueError> {
        let entries: VecDeque<_> = storage.load()?.into();
        if !entries.is_empty() {
            log::info!("Restored {} queued offline changes", entries.len());
        }
        Ok(Self {
            entries,
            storage,
            snapshot_timeout: DEFAULT_SNAPSHOT_TIMEOUT,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        })
    }

    pub fn with_timeouts(mut self, snapshot: Duration, ack: Duration) -> Self {
        self.snapshot_timeout = snapshot;
        self.ack_timeout = ack;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &OfflineChange> {
        self.entries.iter()
    }

    /// Buffer a change. Adds without an id get one here so later queued
    /// edits can refer to them.
    pub fn enqueue(&mut self, kind: ChangeKind, mut payload: Value) -> Result<OfflineChange, QueueError> {
        if matches!(kind, ChangeKind::AddProject | ChangeKind::AddStep) {
            if let Some(obj) = payload.as_object_mut() {
                let missing = obj
                    .get("id")
                    .and_then(Value::as_str)
                    .map_or(true, str::is_empty);
                if missing {
                    obj.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
                }
            }
        }

        let change = OfflineChange {
            id: Uuid::new_v4().to_string(),
            kind,
            payload,
            enqueued_at: Utc::now(),
        };
        self.entries.push_back(change.clone());
        self.persist()?;
        log::debug!("Queued offline {} ({} pending)", kind.as_str(), self.entries.len());
        Ok(change)
    }

    /// Replay queued changes against the server, oldest first, one at a time.
    ///
    /// Transport failures end the attempt and keep the remaining entries.
    /// An auth rejection also keeps them and is returned as
    /// [`QueueError::AuthRequired`].
    pub async fn drain<T>(&mut self, transport: &T) -> Result<DrainReport, QueueError>
    where
        T: ReplayTransport + ?Sized,
    {
        let mut report = DrainReport::default();
        if self.entries.is_empty() {
            return Ok(report);
        }

        let snapshot = tokio::time::timeout(self.snapshot_timeout, transport.fetch_snapshot())
            .await
            .unwrap_or(Err(ReplayError::Timeout));
        let mut known = match snapshot {
            Ok(projects) => KnownEntities::from_projects(&projects),
            Err(e) => {
                log::warn!("Offline drain postponed, no snapshot: {e}");
                report.remaining = self.entries.len();
                report.stopped = Some(e);
                return Ok(report);
            }
        };

        log::info!("Draining {} offline changes", self.entries.len());
        while let Some(change) = self.entries.front().cloned() {
            if has_conflict(&change, &known) {
                log::info!(
                    "Discarding queued {} for {}: conflicts with server state",
                    change.kind.as_str(),
                    change.project_id().unwrap_or("?")
                );
                self.pop_front()?;
                report.conflicts += 1;
                continue;
            }

            let message = match change.to_message() {
                Ok(message) => message,
                Err(e) => {
                    log::warn!("Discarding malformed queued {}: {e}", change.kind.as_str());
                    self.pop_front()?;
                    report.rejected += 1;
                    continue;
                }
            };

            let outcome = tokio::time::timeout(self.ack_timeout, transport.replay(message))
                .await
                .unwrap_or(Err(ReplayError::Timeout));
            match outcome {
                Ok(ack) => {
                    known.apply(&change, ack.id.as_deref());
                    self.pop_front()?;
                    report.replayed += 1;
                }
                Err(ReplayError::Rejected {
                    code: ErrorCode::AuthRequired,
                    message,
                }) => {
                    log::warn!("Offline drain needs authentication: {message}");
                    return Err(QueueError::AuthRequired(message));
                }
                Err(ReplayError::Rejected { code, message }) => {
                    log::warn!(
                        "Server rejected queued {} ({code:?}): {message}",
                        change.kind.as_str()
                    );
                    self.pop_front()?;
                    report.rejected += 1;
                }
                Err(ReplayError::Encode(reason)) => {
                    log::warn!("Discarding unencodable queued {}: {reason}", change.kind.as_str());
                    self.pop_front()?;
                    report.rejected += 1;
                }
                Err(e) => {
                    log::warn!("Offline drain interrupted: {e}");
                    report.stopped = Some(e);
                    break;
                }
            }
        }

        report.remaining = self.entries.len();
        if self.entries.is_empty() {
            self.storage.store(&[])?;
        }
        log::info!(
            "Offline drain: {} replayed, {} conflicts, {} rejected, {} remaining",
            report.replayed,
            report.conflicts,
            report.rejected,
            report.remaining
        );
        Ok(report)
    }

    fn pop_front(&mut self) -> Result<(), QueueError> {
        self.entries.pop_front();
        self.persist()
    }

    fn persist(&self) -> Result<(), QueueError> {
        let snapshot: Vec<OfflineChange> = self.entries.iter().cloned().collect();
        self.storage.store(&snapshot)
    }
}
