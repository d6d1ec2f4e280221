//! # tandem-sync: Real-time project synchronization for Tandem
//!
//! WebSocket server and client that keep many dashboards in step with one
//! authoritative project store, plus the client's offline queue.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ SyncClient  │ ◄─────────────────► │ SyncServer  │
//! │ (per user)  │    JSON frames      │ (central)   │
//! └──────┬──────┘                     └──────┬──────┘
//!        │                                   │
//!        ▼                                   ▼
//! ┌─────────────┐                     ┌─────────────┐     ┌──────────────┐
//! │OfflineQueue │                     │     Hub     │ ──► │  persister   │
//! │ (durable)   │                     │ store+conns │     │ (JSON + LZ4) │
//! └─────────────┘                     └──────┬──────┘     └──────────────┘
//!                                            │
//!                                    ┌───────┴────────────┐
//!                                    │ ConnectionRegistry │
//!                                    │ (fan-out, cursors) │
//!                                    └────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON frame envelope and typed client/server messages
//! - [`auth`]: token authenticator and write policy
//! - [`sync_engine`]: per-connection full/delta sync cursor
//! - [`broadcast`]: connection registry with backpressured fan-out
//! - [`hub`]: server context: dispatch, auth gating, mutation, broadcast
//! - [`housekeeping`]: clock-driven periodic tasks
//! - [`storage`]: repository trait, JSON file store, backups, persister
//! - [`server`]: WebSocket sync server and health endpoint
//! - [`offline`]: client offline queue with replay-time conflict checks
//! - [`client`]: WebSocket sync client

pub mod auth;
pub mod broadcast;
pub mod client;
pub mod housekeeping;
pub mod hub;
pub mod offline;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod sync_engine;

// Re-exports for convenience
pub use auth::{AuthPolicy, AuthVerdict, Authenticator, TokenAuthenticator, TokenUser};
pub use broadcast::{BroadcastStats, ConnectionId, ConnectionRecord, ConnectionRegistry, TransportError};
pub use client::{ClientError, ConnectionState, Submission, SyncClient, SyncEvent};
pub use housekeeping::{HousekeepingTask, Scheduler};
pub use hub::{HealthReport, Hub, RequestError, SharedHub};
pub use offline::{
    has_conflict, ChangeKind, DrainReport, FileQueueStorage, KnownEntities, MemoryQueueStorage,
    OfflineChange, OfflineQueue, QueueError, QueueStorage, ReplayError, ReplayTransport,
};
pub use protocol::{ClientMessage, ErrorCode, Frame, ProtocolError, ServerMessage};
pub use server::{ServerConfig, ServerError, SyncServer};
pub use storage::{
    JsonFileRepository, MemoryRepository, PersistHandle, PersistJob, PersistenceError,
    ProjectRepository,
};
pub use sync_engine::{SyncCursor, SyncState};
