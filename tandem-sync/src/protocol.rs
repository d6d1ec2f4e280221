//! JSON wire protocol for project synchronization.
//!
//! Every WebSocket text frame is one envelope:
//! ```text
//! { "type": "update_step", "data": { ... }, "timestamp": 1715342400000, "requestId": "r-17" }
//!    │                        │                 │                          │
//!    message kind             payload           epoch-ms                   optional, echoed in ack/error
//! ```
//!
//! [`ClientMessage`] and [`ServerMessage`] are the typed views of an
//! envelope. Decoding is total: an unknown `type` is an explicit
//! [`ProtocolError::UnknownType`], never silently ignored.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tandem_core::{Change, Mutation, Project, ProjectMap, ProjectStatus, Step};

/// Message kind names, shared by both directions where they overlap.
pub mod kind {
    pub const ADD_PROJECT: &str = "add_project";
    pub const UPDATE_PROJECT: &str = "update_project";
    pub const DELETE_PROJECT: &str = "delete_project";
    pub const ADD_STEP: &str = "add_step";
    pub const UPDATE_STEP: &str = "update_step";
    pub const DELETE_STEP: &str = "delete_step";
    pub const REQUEST_SYNC: &str = "request_sync";
    pub const AUTHENTICATE: &str = "authenticate";
    pub const PING: &str = "ping";

    pub const SYNC_PROJECTS: &str = "sync_projects";
    pub const SYNC_UPDATES: &str = "sync_updates";
    pub const SYNC_UNCHANGED: &str = "sync_unchanged";
    pub const SYNC_RESPONSE: &str = "sync_response";
    pub const AUTH_STATUS: &str = "auth_status";
    pub const ACK: &str = "ack";
    pub const ERROR: &str = "error";
    pub const PONG: &str = "pong";
}

/// Epoch milliseconds, the envelope's timestamp unit.
pub fn epoch_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// The envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl Frame {
    pub fn new(kind: impl Into<String>, data: Value, timestamp: i64) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    fn parse_data<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(self.data.clone()).map_err(|e| ProtocolError::InvalidPayload {
            kind: self.kind.clone(),
            reason: e.to_string(),
        })
    }
}

/// Machine-readable error codes carried in `error` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    AuthRequired,
    NotFound,
    BadMessage,
    UnknownMessageType,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("unknown message type `{0}`")]
    UnknownType(String),

    #[error("invalid `{kind}` payload: {reason}")]
    InvalidPayload { kind: String, reason: String },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timed out waiting for the server")]
    Timeout,
}

impl ProtocolError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownType(_) => ErrorCode::UnknownMessageType,
            _ => ErrorCode::BadMessage,
        }
    }
}

// ─── Payload shapes ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IdData {
    id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepRefData {
    project_id: String,
    step_id: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
struct SyncRequestData {
    #[serde(default)]
    snapshot: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct AuthenticateData {
    token: String,
}

/// `sync_updates` payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SyncDelta {
    pub updated: ProjectMap,
    pub deleted: Vec<String>,
}

impl SyncDelta {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// `add_step` / `update_step` broadcast: the step plus its project's
/// freshly derived fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepNotice {
    pub project_id: String,
    pub step: Step,
    pub progress: u8,
    pub status: ProjectStatus,
    pub next_step: String,
}

/// `delete_step` broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRemoval {
    pub project_id: String,
    pub step_id: String,
    pub progress: u8,
    pub status: ProjectStatus,
    pub next_step: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AuthStatus {
    pub authenticated: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Acknowledgement of a mutation that carried a `requestId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub request_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub id: Option<String>,
    /// `false` for accepted no-ops such as deleting a missing project.
    pub applied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
    pub code: ErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorPayload {
    pub fn new(code: ErrorCode, message: impl Into<String>, request_id: Option<String>) -> Self {
        Self {
            message: message.into(),
            code,
            request_id,
        }
    }
}

// ─── Client → Server ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    AddProject(Value),
    UpdateProject(Value),
    DeleteProject { id: String },
    AddStep(Value),
    UpdateStep(Value),
    DeleteStep { project_id: String, step_id: String },
    /// `snapshot: true` asks for a full `sync_response` instead of a delta.
    RequestSync { snapshot: bool },
    Authenticate { token: String },
    Ping,
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AddProject(_) => kind::ADD_PROJECT,
            Self::UpdateProject(_) => kind::UPDATE_PROJECT,
            Self::DeleteProject { .. } => kind::DELETE_PROJECT,
            Self::AddStep(_) => kind::ADD_STEP,
            Self::UpdateStep(_) => kind::UPDATE_STEP,
            Self::DeleteStep { .. } => kind::DELETE_STEP,
            Self::RequestSync { .. } => kind::REQUEST_SYNC,
            Self::Authenticate { .. } => kind::AUTHENTICATE,
            Self::Ping => kind::PING,
        }
    }

    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        Ok(match frame.kind.as_str() {
            kind::ADD_PROJECT => Self::AddProject(frame.data.clone()),
            kind::UPDATE_PROJECT => Self::UpdateProject(frame.data.clone()),
            kind::DELETE_PROJECT => {
                let IdData { id } = frame.parse_data()?;
                Self::DeleteProject { id }
            }
            kind::ADD_STEP => Self::AddStep(frame.data.clone()),
            kind::UPDATE_STEP => Self::UpdateStep(frame.data.clone()),
            kind::DELETE_STEP => {
                let StepRefData {
                    project_id,
                    step_id,
                } = frame.parse_data()?;
                Self::DeleteStep {
                    project_id,
                    step_id,
                }
            }
            kind::REQUEST_SYNC => {
                let data: SyncRequestData = if frame.data.is_null() {
                    SyncRequestData::default()
                } else {
                    frame.parse_data()?
                };
                Self::RequestSync {
                    snapshot: data.snapshot,
                }
            }
            kind::AUTHENTICATE => {
                let AuthenticateData { token } = frame.parse_data()?;
                Self::Authenticate { token }
            }
            kind::PING => Self::Ping,
            other => return Err(ProtocolError::UnknownType(other.to_string())),
        })
    }

    pub fn to_frame(&self, timestamp: i64) -> Result<Frame, ProtocolError> {
        let data = match self {
            Self::AddProject(v) | Self::UpdateProject(v) | Self::AddStep(v) | Self::UpdateStep(v) => {
                v.clone()
            }
            Self::DeleteProject { id } => to_data(&IdData { id: id.clone() })?,
            Self::DeleteStep {
                project_id,
                step_id,
            } => to_data(&StepRefData {
                project_id: project_id.clone(),
                step_id: step_id.clone(),
            })?,
            Self::RequestSync { snapshot } => to_data(&SyncRequestData {
                snapshot: *snapshot,
            })?,
            Self::Authenticate { token } => to_data(&AuthenticateData {
                token: token.clone(),
            })?,
            Self::Ping => Value::Object(Default::default()),
        };
        Ok(Frame::new(self.kind(), data, timestamp))
    }

    /// The store write this message requests, or `None` for control messages.
    pub fn mutation(&self) -> Option<Mutation> {
        Some(match self {
            Self::AddProject(v) => Mutation::AddProject(v.clone()),
            Self::UpdateProject(v) => Mutation::UpdateProject(v.clone()),
            Self::DeleteProject { id } => Mutation::DeleteProject { id: id.clone() },
            Self::AddStep(v) | Self::UpdateStep(v) => Mutation::UpsertStep(v.clone()),
            Self::DeleteStep {
                project_id,
                step_id,
            } => Mutation::DeleteStep {
                project_id: project_id.clone(),
                step_id: step_id.clone(),
            },
            Self::RequestSync { .. } | Self::Authenticate { .. } | Self::Ping => return None,
        })
    }
}

// ─── Server → Client ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    SyncProjects(ProjectMap),
    SyncUpdates(SyncDelta),
    SyncUnchanged,
    SyncResponse(ProjectMap),
    ProjectAdded(Project),
    ProjectUpdated(Project),
    ProjectDeleted { id: String },
    StepAdded(StepNotice),
    StepUpdated(StepNotice),
    StepDeleted(StepRemoval),
    AuthStatus(AuthStatus),
    Ack(Ack),
    Error(ErrorPayload),
    Pong,
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SyncProjects(_) => kind::SYNC_PROJECTS,
            Self::SyncUpdates(_) => kind::SYNC_UPDATES,
            Self::SyncUnchanged => kind::SYNC_UNCHANGED,
            Self::SyncResponse(_) => kind::SYNC_RESPONSE,
            Self::ProjectAdded(_) => kind::ADD_PROJECT,
            Self::ProjectUpdated(_) => kind::UPDATE_PROJECT,
            Self::ProjectDeleted { .. } => kind::DELETE_PROJECT,
            Self::StepAdded(_) => kind::ADD_STEP,
            Self::StepUpdated(_) => kind::UPDATE_STEP,
            Self::StepDeleted(_) => kind::DELETE_STEP,
            Self::AuthStatus(_) => kind::AUTH_STATUS,
            Self::Ack(_) => kind::ACK,
            Self::Error(_) => kind::ERROR,
            Self::Pong => kind::PONG,
        }
    }

    /// Broadcast form of a committed change.
    pub fn from_change(change: &Change) -> Self {
        match change {
            Change::ProjectAdded(p) => Self::ProjectAdded(p.clone()),
            Change::ProjectUpdated(p) => Self::ProjectUpdated(p.clone()),
            Change::ProjectDeleted { id } => Self::ProjectDeleted { id: id.clone() },
            Change::StepAdded { project, step_id } => match step_notice(project, step_id) {
                Some(notice) => Self::StepAdded(notice),
                None => Self::ProjectUpdated(project.clone()),
            },
            Change::StepUpdated { project, step_id } => match step_notice(project, step_id) {
                Some(notice) => Self::StepUpdated(notice),
                None => Self::ProjectUpdated(project.clone()),
            },
            Change::StepDeleted { project, step_id } => Self::StepDeleted(StepRemoval {
                project_id: project.id.clone(),
                step_id: step_id.clone(),
                progress: project.progress,
                status: project.status,
                next_step: project.next_step.clone(),
            }),
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>, request_id: Option<String>) -> Self {
        Self::Error(ErrorPayload::new(code, message, request_id))
    }

    pub fn to_frame(&self, timestamp: i64) -> Result<Frame, ProtocolError> {
        let data = match self {
            Self::SyncProjects(map) | Self::SyncResponse(map) => to_data(map)?,
            Self::SyncUpdates(delta) => to_data(delta)?,
            Self::ProjectAdded(p) | Self::ProjectUpdated(p) => to_data(p)?,
            Self::ProjectDeleted { id } => to_data(&IdData { id: id.clone() })?,
            Self::StepAdded(n) | Self::StepUpdated(n) => to_data(n)?,
            Self::StepDeleted(r) => to_data(r)?,
            Self::AuthStatus(s) => to_data(s)?,
            Self::Ack(a) => to_data(a)?,
            Self::Error(e) => to_data(e)?,
            Self::SyncUnchanged | Self::Pong => Value::Object(Default::default()),
        };
        Ok(Frame::new(self.kind(), data, timestamp))
    }

    pub fn encode(&self, timestamp: i64) -> Result<String, ProtocolError> {
        self.to_frame(timestamp)?.encode()
    }

    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        Ok(match frame.kind.as_str() {
            kind::SYNC_PROJECTS => Self::SyncProjects(frame.parse_data()?),
            kind::SYNC_UPDATES => Self::SyncUpdates(frame.parse_data()?),
            kind::SYNC_UNCHANGED => Self::SyncUnchanged,
            kind::SYNC_RESPONSE => Self::SyncResponse(frame.parse_data()?),
            kind::ADD_PROJECT => Self::ProjectAdded(frame.parse_data()?),
            kind::UPDATE_PROJECT => Self::ProjectUpdated(frame.parse_data()?),
            kind::DELETE_PROJECT => {
                let IdData { id } = frame.parse_data()?;
                Self::ProjectDeleted { id }
            }
            kind::ADD_STEP => Self::StepAdded(frame.parse_data()?),
            kind::UPDATE_STEP => Self::StepUpdated(frame.parse_data()?),
            kind::DELETE_STEP => Self::StepDeleted(frame.parse_data()?),
            kind::AUTH_STATUS => Self::AuthStatus(frame.parse_data()?),
            kind::ACK => Self::Ack(frame.parse_data()?),
            kind::ERROR => Self::Error(frame.parse_data()?),
            kind::PONG => Self::Pong,
            other => return Err(ProtocolError::UnknownType(other.to_string())),
        })
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Self::from_frame(&Frame::decode(text)?)
    }
}

fn step_notice(project: &Project, step_id: &str) -> Option<StepNotice> {
    project.step(step_id).map(|step| StepNotice {
        project_id: project.id.clone(),
        step: step.clone(),
        progress: project.progress,
        status: project.status,
        next_step: project.next_step.clone(),
    })
}

fn to_data<T: Serialize>(value: &T) -> Result<Value, ProtocolError> {
    serde_json::to_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
}
