//! Rotating LZ4-compressed backups.
//!
//! File names sort chronologically:
//! `projects-20240510T120000.123456Z-save.json.lz4`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use tandem_core::ProjectMap;

use super::PersistenceError;

const PREFIX: &str = "projects-";
const SUFFIX: &str = ".json.lz4";

/// Write a compressed copy of `projects` into `dir`. Returns its path.
pub fn write_backup(
    dir: &Path,
    projects: &ProjectMap,
    reason: &str,
    at: DateTime<Utc>,
) -> Result<PathBuf, PersistenceError> {
    fs::create_dir_all(dir).map_err(|e| PersistenceError::io(dir, e))?;

    let json = serde_json::to_vec(projects).map_err(PersistenceError::Encode)?;
    let compressed = lz4_flex::compress_prepend_size(&json);

    let stem = format!("{PREFIX}{}-{}", at.format("%Y%m%dT%H%M%S%.6fZ"), sanitize(reason));
    let mut path = dir.join(format!("{stem}{SUFFIX}"));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{stem}-{n}{SUFFIX}"));
        n += 1;
    }

    fs::write(&path, compressed).map_err(|e| PersistenceError::io(&path, e))?;
    log::debug!(
        "Backup written: {} ({} bytes raw, {} projects)",
        path.display(),
        json.len(),
        projects.len()
    );
    Ok(path)
}

pub fn read_backup(path: &Path) -> Result<ProjectMap, PersistenceError> {
    let bytes = fs::read(path).map_err(|e| PersistenceError::io(path, e))?;
    let json = lz4_flex::decompress_size_prepended(&bytes).map_err(|e| {
        PersistenceError::Decompress {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    })?;
    serde_json::from_slice(&json).map_err(|source| PersistenceError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// Backups in `dir`, oldest first. A missing directory has none.
pub fn list_backups(dir: &Path) -> Result<Vec<PathBuf>, PersistenceError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PersistenceError::io(dir, e)),
    };

    let mut backups = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PersistenceError::io(dir, e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(PREFIX) && name.ends_with(SUFFIX) {
            backups.push(entry.path());
        }
    }
    backups.sort();
    Ok(backups)
}

/// Delete all but the newest `keep` backups. Returns how many were removed.
pub fn prune(dir: &Path, keep: usize) -> Result<usize, PersistenceError> {
    let backups = list_backups(dir)?;
    let excess = backups.len().saturating_sub(keep);
    for path in &backups[..excess] {
        fs::remove_file(path).map_err(|e| PersistenceError::io(path, e))?;
    }
    if excess > 0 {
        log::debug!("Pruned {excess} old backups from {}", dir.display());
    }
    Ok(excess)
}

/// Newest backup that still decodes, with its path.
pub fn newest_readable(dir: &Path) -> Result<Option<(PathBuf, ProjectMap)>, PersistenceError> {
    for path in list_backups(dir)?.into_iter().rev() {
        match read_backup(&path) {
            Ok(projects) => return Ok(Some((path, projects))),
            Err(e) => log::warn!("Skipping unreadable backup: {e}"),
        }
    }
    Ok(None)
}

fn sanitize(reason: &str) -> String {
    let cleaned: String = reason
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        "backup".to_string()
    } else {
        trimmed.to_string()
    }
}
