//! File configuration for the server binary.
//!
//! ```toml
//! [server]
//! bind_addr = "0.0.0.0:9090"
//! health_addr = "0.0.0.0:9091"
//! require_auth = true
//!
//! [housekeeping]
//! inactivity_timeout_secs = 1800
//!
//! [storage]
//! data_dir = "data"
//!
//! [tokens.s3cret]
//! username = "alice"
//! role = "editor"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tandem_sync::{ServerConfig, TokenAuthenticator, TokenUser};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub housekeeping: HousekeepingSection,
    pub storage: StorageSection,
    /// Token → user table for `authenticate`
    pub tokens: HashMap<String, TokenUser>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind_addr: String,
    pub health_addr: Option<String>,
    pub require_auth: bool,
    pub outbound_capacity: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            bind_addr: defaults.bind_addr,
            health_addr: defaults.health_addr,
            require_auth: defaults.require_auth,
            outbound_capacity: defaults.outbound_capacity,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HousekeepingSection {
    pub inactivity_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub backup_interval_secs: u64,
}

impl Default for HousekeepingSection {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            inactivity_timeout_secs: defaults.inactivity_timeout_secs,
            sweep_interval_secs: defaults.sweep_interval_secs,
            backup_interval_secs: defaults.backup_interval_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// None keeps projects in memory only
    pub data_dir: Option<PathBuf>,
    pub max_backups: usize,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_dir: None,
            max_backups: ServerConfig::default().max_backups,
        }
    }
}

impl Config {
    /// Read `path`, or fall back to defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            log::info!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.server.bind_addr.clone(),
            health_addr: self.server.health_addr.clone(),
            outbound_capacity: self.server.outbound_capacity,
            inactivity_timeout_secs: self.housekeeping.inactivity_timeout_secs,
            sweep_interval_secs: self.housekeeping.sweep_interval_secs,
            backup_interval_secs: self.housekeeping.backup_interval_secs,
            require_auth: self.server.require_auth,
            data_dir: self.storage.data_dir.clone(),
            max_backups: self.storage.max_backups,
            ..ServerConfig::default()
        }
    }

    pub fn authenticator(&self) -> TokenAuthenticator {
        self.tokens
            .iter()
            .map(|(token, user)| (token.clone(), user.clone()))
            .collect()
    }
}
