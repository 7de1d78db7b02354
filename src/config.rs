//! # Configuration Module
//!
//! Data directory setup and runtime settings for playchart.
//!
//! ## Data Storage
//!
//! Everything lives in the platform-standard data directory:
//! - Linux: `~/.local/share/playchart/`
//! - macOS: `~/Library/Application Support/playchart/`
//! - Windows: `%APPDATA%\playchart\`
//!
//! That directory holds the catalog (`playchart.db`), the daemon PID file and
//! an optional `config.json`. Any field missing from `config.json` falls back
//! to its default, so a file containing only `{"notifier": "log"}` is valid.

use crate::importer::DEFAULT_IMPORT_BATCH_SIZE;
use crate::mpd_client::DEFAULT_COUNTER_STICKER;
use crate::notification::NotifierKind;
use crate::ranking::{RankingOptions, DEFAULT_CHART_LIMIT, DEFAULT_RANK_BATCH_SIZE};
use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "playchart";
const DB_FILE: &str = "playchart.db";
const CONFIG_FILE: &str = "config.json";

/// Returns the playchart data directory, creating it if needed.
///
/// # Errors
///
/// Fails when the platform data directory cannot be determined or the
/// `playchart` subdirectory cannot be created.
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "Could not determine system data directory. Please ensure your platform supports standard data directories."
        )
    })?;

    let app_dir = data_dir.join(APP_DIR);
    fs::create_dir_all(&app_dir).with_context(|| {
        format!(
            "Failed to create playchart data directory at {}. Please check file permissions.",
            app_dir.display()
        )
    })?;

    Ok(app_dir)
}

/// Returns the default catalog database path.
pub fn get_db_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(DB_FILE))
}

/// Returns where `config.json` is looked up.
pub fn config_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(CONFIG_FILE))
}

/// Configuration for runtime behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Path to the catalog database
    pub db_path: PathBuf,
    /// `MPD_HOST` override, e.g. `secret@localhost`
    pub mpd_host: Option<String>,
    /// Sticker holding the cumulative play counter
    pub counter_sticker: String,
    pub import_batch_size: usize,
    pub rank_batch_size: usize,
    /// Entries shown per chart
    pub chart_limit: usize,
    pub notifier: NotifierKind,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            db_path: get_db_path().unwrap_or_else(|_| PathBuf::from(DB_FILE)),
            mpd_host: None,
            counter_sticker: DEFAULT_COUNTER_STICKER.to_string(),
            import_batch_size: DEFAULT_IMPORT_BATCH_SIZE,
            rank_batch_size: DEFAULT_RANK_BATCH_SIZE,
            chart_limit: DEFAULT_CHART_LIMIT,
            notifier: NotifierKind::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load `config.json` from the data directory, or defaults if absent.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Load settings from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Override the database location, e.g. from `--db`.
    #[must_use]
    pub fn with_db_path(mut self, db_path: PathBuf) -> Self {
        self.db_path = db_path;
        self
    }

    #[must_use]
    pub fn ranking_options(&self) -> RankingOptions {
        RankingOptions {
            chart_limit: self.chart_limit,
            batch_size: self.rank_batch_size,
        }
    }
}
