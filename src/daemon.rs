//! # Play Tracking Daemon
//!
//! A background process that watches the playback source and turns counter
//! increases into logged plays, chart updates and notifications.
//!
//! ## Architecture
//!
//! The daemon blocks on [`PlaybackSource::wait_for_change`] (`mpc idle player`
//! for MPD) instead of polling. On every player event it reads the current
//! item and its cumulative play counter and feeds them to the
//! [`PlayCountDetector`]:
//!
//! - **First sighting**: the counter is remembered, nothing is logged
//! - **Counter went up**: one play is sent to the [`Coordinator`], which logs
//!   it, re-ranks the all-time chart and notifies if the song moved
//! - **Counter unchanged or lower**: remembered, nothing is logged
//!
//! ## Startup
//!
//! Before entering the loop the daemon seeds an empty catalog from the
//! source's full listing and records the counter of whatever is loaded right
//! now, so a song already playing at launch is not counted twice.
//!
//! Revoked access ends the loop with an error, so `watch` and the daemon
//! exit unsuccessfully and the user knows to re-authorize. Any other failure
//! is logged and retried after a short pause. [`ChartDaemon::stop_token`]
//! ends the loop cleanly at the next player event.

use crate::config;
use crate::coordinator::{wait, Coordinator};
use crate::detector::PlayCountDetector;
use crate::error::ChartError;
use crate::ingestion::{IngestOutcome, PlayReport};
use crate::mpd_client::PlaybackSource;
use crate::ranking::CancelToken;
use anyhow::{bail, Context, Result};
use log::{debug, error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

const PID_FILE: &str = "playchart-daemon.pid";

/// Pause before retrying after a failed player event.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Play tracking daemon that monitors playback events
pub struct ChartDaemon<P> {
    source: Arc<P>,
    detector: PlayCountDetector,
    coordinator: Coordinator,
    import_batch_size: usize,
    /// Path to PID file for daemon management
    pid_file: PathBuf,
    stop: CancelToken,
}

impl<P> ChartDaemon<P>
where
    P: PlaybackSource + Send + Sync + 'static,
{
    /// Create a daemon using the standard PID file location.
    pub fn new(source: Arc<P>, coordinator: Coordinator, import_batch_size: usize) -> Result<Self> {
        Ok(Self::with_pid_file(
            source,
            coordinator,
            import_batch_size,
            pid_file_path()?,
        ))
    }

    pub fn with_pid_file(
        source: Arc<P>,
        coordinator: Coordinator,
        import_batch_size: usize,
        pid_file: PathBuf,
    ) -> Self {
        Self {
            source,
            detector: PlayCountDetector::new(),
            coordinator,
            import_batch_size,
            pid_file,
            stop: CancelToken::new(),
        }
    }

    #[must_use]
    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Token that stops monitoring after the player event in progress.
    #[must_use]
    pub fn stop_token(&self) -> CancelToken {
        self.stop.clone()
    }

    /// Start monitoring playback events
    ///
    /// Runs until stopped through [`ChartDaemon::stop_token`] or until the
    /// source refuses access, which is returned as an error.
    pub fn start_monitoring(&mut self) -> Result<()> {
        info!("Starting play tracking daemon");

        let pid = std::process::id();
        fs::write(&self.pid_file, pid.to_string())
            .with_context(|| format!("Failed to write PID file {}", self.pid_file.display()))?;
        info!("Daemon started with PID {pid}");

        let result = self.run();

        let _ = fs::remove_file(&self.pid_file);
        result
    }

    fn run(&mut self) -> Result<()> {
        self.import_if_empty()?;
        self.sync_current_state()?;

        while !self.stop.is_cancelled() {
            let event = match self.source.wait_for_change() {
                Ok(()) => self.handle_player_event(),
                Err(e) => Err(e),
            };

            match event {
                Ok(_) => continue,
                Err(ChartError::NotAuthorized(reason)) => {
                    error!("Playback source revoked access, exiting daemon: {reason}");
                    bail!("Playback source revoked access: {reason}");
                }
                Err(e) => {
                    error!("Error in daemon event loop: {e}");
                    std::thread::sleep(RETRY_DELAY);
                }
            }
        }

        info!("Play tracking stopped");
        Ok(())
    }

    /// Seed the catalog on first launch.
    fn import_if_empty(&self) -> Result<()> {
        let source: Arc<dyn PlaybackSource + Send + Sync> = self.source.clone();
        let (_, reply) = self.coordinator.import(source, self.import_batch_size);

        match wait(&reply) {
            Ok(report) if report.already_populated => debug!("Catalog already seeded"),
            Ok(report) => info!(
                "Seeded catalog with {} songs ({} skipped)",
                report.imported, report.skipped
            ),
            Err(ChartError::NotAuthorized(reason)) => {
                bail!("Playback source refused access: {reason}")
            }
            // Songs can still be created one by one as they are played.
            Err(e) => warn!("Initial import failed, continuing without it: {e}"),
        }
        Ok(())
    }

    /// Remember the counter of whatever is loaded at startup.
    fn sync_current_state(&mut self) -> Result<()> {
        if let Some(item) = self.source.current_item()? {
            self.detector.observe(&item.external_id, item.play_count);
            info!(
                "Synced with current song `{}' (counter {})",
                item.external_id, item.play_count
            );
        }
        Ok(())
    }

    /// Handle a player event (song change, play, stop, ...)
    fn handle_player_event(&mut self) -> crate::error::Result<Option<PlayReport>> {
        let Some(item) = self.source.current_item()? else {
            debug!("Player event with nothing loaded");
            return Ok(None);
        };

        let Some(detection) = self.detector.observe(&item.external_id, item.play_count) else {
            return Ok(None);
        };
        debug!(
            "Counter for `{}' rose to {}",
            detection.external_id, detection.counter
        );

        let report = wait(&self.coordinator.record_play(item.clone()))?;
        if let IngestOutcome::Recorded { created, .. } = report.outcome {
            println!(
                "✓ PLAYED: {} - {}{}",
                item.artist.as_deref().unwrap_or("?"),
                item.title.as_deref().unwrap_or("?"),
                if created { " (new)" } else { "" }
            );
        }
        Ok(Some(report))
    }
}

fn pid_file_path() -> Result<PathBuf> {
    Ok(config::get_data_dir()?.join(PID_FILE))
}

fn read_pid(pid_file: &Path) -> Result<u32> {
    let pid_str = fs::read_to_string(pid_file)?;
    pid_str.trim().parse().context("Invalid PID in daemon file")
}

/// Check if the daemon is running
pub fn is_daemon_running() -> Result<bool> {
    is_running_at(&pid_file_path()?)
}

fn is_running_at(pid_file: &Path) -> Result<bool> {
    if !pid_file.exists() {
        return Ok(false);
    }
    let pid = read_pid(pid_file)?;

    // Signal 0 only checks that the process exists.
    match Command::new("kill").args(["-0", &pid.to_string()]).status() {
        Ok(status) => Ok(status.success()),
        Err(_) => Ok(false),
    }
}

/// Stop the running daemon
pub fn stop_daemon() -> Result<()> {
    let pid_file = pid_file_path()?;
    if !pid_file.exists() {
        bail!("Daemon is not running");
    }
    let pid = read_pid(&pid_file)?;

    Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status()
        .context("Failed to stop daemon")?;

    fs::remove_file(&pid_file)?;

    info!("Daemon stopped (PID: {pid})");
    Ok(())
}
