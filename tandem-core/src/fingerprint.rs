//! Content fingerprints for change detection.
//!
//! A fingerprint is the BLAKE3 digest of a project's JSON serialization.
//! Field order is fixed by the struct definition and sequences keep their
//! order, so structurally identical projects always hash the same and any
//! field change moves the digest. It is a cache key, not an integrity check.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::Project;

/// Hex-encoded project digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint a project.
pub fn fingerprint(project: &Project) -> Fingerprint {
    let mut hasher = blake3::Hasher::new();
    if let Err(e) = serde_json::to_writer(&mut hasher, project) {
        // Plain data with string keys; serde_json cannot fail here in practice.
        log::warn!("Fingerprinting project {} via debug form: {e}", project.id);
        hasher = blake3::Hasher::new();
        hasher.update(format!("{project:?}").as_bytes());
    }
    Fingerprint(hasher.finalize().to_hex().to_string())
}
