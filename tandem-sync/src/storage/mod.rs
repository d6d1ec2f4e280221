//! Persistent storage for the project collection.
//!
//! Architecture:
//! ```text
//! ┌─────────────┐  PersistJob   ┌───────────┐  spawn_blocking  ┌────────────────────┐
//! │     Hub     │ ────────────► │ persister │ ───────────────► │ ProjectRepository  │
//! │ (in-memory) │  (unbounded)  │   task    │                  │ (JsonFileRepository│
//! └─────────────┘               └───────────┘                  │  or in-memory)     │
//!                                                              └─────────┬──────────┘
//!                                                                        │
//!                              data_dir/projects.json  ◄─────────────────┤ atomic save
//!                              data_dir/backups/*.json.lz4  ◄────────────┘ rotating backups
//! ```
//!
//! The in-memory store is authoritative. The hub queues a job after every
//! committed change and never waits for it; a crash between commit and
//! save loses at most the queued jobs, and backups bound the damage.

pub mod backup;
pub mod json_file;
pub mod persister;

use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tandem_core::ProjectMap;

pub use json_file::JsonFileRepository;
pub use persister::{run_persister, PersistJob, PersistHandle, PersisterStats};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode projects: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("{path} does not hold a valid project collection: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("backup {path} cannot be decompressed: {reason}")]
    Decompress { path: PathBuf, reason: String },

    #[error("storage task failed: {0}")]
    Task(String),
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Load/save of the whole collection. Calls block; the persister runs
/// them on the blocking pool.
pub trait ProjectRepository: Send + Sync + Debug {
    fn load(&self) -> Result<ProjectMap, PersistenceError>;

    fn save(&self, projects: &ProjectMap) -> Result<(), PersistenceError>;

    /// Keep a copy of `projects` aside, e.g. before a destructive change.
    fn backup(&self, projects: &ProjectMap, reason: &str) -> Result<(), PersistenceError>;
}

/// Repository that keeps everything in memory. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    saved: ProjectMap,
    saves: usize,
    backups: Vec<(String, ProjectMap)>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projects(projects: ProjectMap) -> Self {
        let repo = Self::default();
        repo.state().saved = projects;
        repo
    }

    pub fn saved(&self) -> ProjectMap {
        self.state().saved.clone()
    }

    pub fn save_count(&self) -> usize {
        self.state().saves
    }

    /// Reasons of every backup taken, oldest first.
    pub fn backup_reasons(&self) -> Vec<String> {
        self.state().backups.iter().map(|(r, _)| r.clone()).collect()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl ProjectRepository for MemoryRepository {
    fn load(&self) -> Result<ProjectMap, PersistenceError> {
        Ok(self.saved())
    }

    fn save(&self, projects: &ProjectMap) -> Result<(), PersistenceError> {
        let mut state = self.state();
        state.saved = projects.clone();
        state.saves += 1;
        Ok(())
    }

    fn backup(&self, projects: &ProjectMap, reason: &str) -> Result<(), PersistenceError> {
        self.state()
            .backups
            .push((reason.to_string(), projects.clone()));
        Ok(())
    }
}
