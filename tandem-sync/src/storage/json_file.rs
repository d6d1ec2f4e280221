//! File-backed repository: one JSON document plus rotating backups.
//!
//! ```text
//! data_dir/
//! ├── projects.json          authoritative copy
//! ├── projects.json.tmp      in-flight save, renamed over projects.json
//! └── backups/
//!     └── projects-<utc>-<reason>.json.lz4
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use tandem_core::ProjectMap;

use super::backup;
use super::{PersistenceError, ProjectRepository};

const DATA_FILE: &str = "projects.json";
const TMP_FILE: &str = "projects.json.tmp";
const BACKUP_DIR: &str = "backups";

/// Default number of backups retained.
pub const DEFAULT_MAX_BACKUPS: usize = 10;

#[derive(Debug, Clone)]
pub struct JsonFileRepository {
    data_dir: PathBuf,
    max_backups: usize,
}

impl JsonFileRepository {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            max_backups: DEFAULT_MAX_BACKUPS,
        }
    }

    pub fn with_max_backups(mut self, max_backups: usize) -> Self {
        self.max_backups = max_backups;
        self
    }

    pub fn data_path(&self) -> PathBuf {
        self.data_dir.join(DATA_FILE)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.data_dir.join(BACKUP_DIR)
    }

    pub fn max_backups(&self) -> usize {
        self.max_backups
    }

    fn read_main(&self, path: &Path) -> Result<ProjectMap, PersistenceError> {
        let bytes = fs::read(path).map_err(|e| PersistenceError::io(path, e))?;
        serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    fn rotate(&self, projects: &ProjectMap, reason: &str) -> Result<(), PersistenceError> {
        let dir = self.backup_dir();
        backup::write_backup(&dir, projects, reason, Utc::now())?;
        backup::prune(&dir, self.max_backups)?;
        Ok(())
    }
}

impl ProjectRepository for JsonFileRepository {
    /// Missing or corrupt main file falls back to the newest readable
    /// backup, then to an empty collection.
    fn load(&self) -> Result<ProjectMap, PersistenceError> {
        let path = self.data_path();
        if path.exists() {
            match self.read_main(&path) {
                Ok(projects) => {
                    log::info!("Loaded {} projects from {}", projects.len(), path.display());
                    return Ok(projects);
                }
                Err(e) => log::warn!("Main data file unusable, trying backups: {e}"),
            }
        }

        match backup::newest_readable(&self.backup_dir())? {
            Some((from, projects)) => {
                log::warn!(
                    "Recovered {} projects from backup {}",
                    projects.len(),
                    from.display()
                );
                Ok(projects)
            }
            None => {
                log::info!("No stored projects in {}, starting empty", self.data_dir.display());
                Ok(ProjectMap::new())
            }
        }
    }

    fn save(&self, projects: &ProjectMap) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.data_dir).map_err(|e| PersistenceError::io(&self.data_dir, e))?;

        let json = serde_json::to_vec_pretty(projects).map_err(PersistenceError::Encode)?;
        let tmp = self.data_dir.join(TMP_FILE);
        fs::write(&tmp, &json).map_err(|e| PersistenceError::io(&tmp, e))?;

        // Never rename a file we cannot read back.
        self.read_main(&tmp)?;

        let target = self.data_path();
        fs::rename(&tmp, &target).map_err(|e| PersistenceError::io(&target, e))?;
        log::debug!("Saved {} projects to {}", projects.len(), target.display());

        self.rotate(projects, "save")
    }

    fn backup(&self, projects: &ProjectMap, reason: &str) -> Result<(), PersistenceError> {
        self.rotate(projects, reason)
    }
}
