//! # Rank-change notifications
//!
//! After a play is logged, the song that was just played is checked for an
//! all-time rank change. Only that song is considered: other songs shuffled by
//! the same pass are not announced.
//!
//! Delivery goes through the [`Notifier`] trait and is fire-and-forget.

use crate::song::Song;
use clap::ValueEnum;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::io;
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

/// Something that can put a message in front of the user.
pub trait Notifier {
    fn deliver(&self, message: &str);
}

/// Which [`Notifier`] the daemon uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierKind {
    /// Desktop notification through `notify-send`.
    #[default]
    Desktop,
    /// Log line and console output only.
    Log,
}

impl NotifierKind {
    #[must_use]
    pub fn build(self) -> Box<dyn Notifier + Send> {
        match self {
            Self::Desktop => Box::new(DesktopNotifier::default()),
            Self::Log => Box::new(LogNotifier),
        }
    }
}

/// Spawns `notify-send` without waiting for it. A detached thread reaps
/// each child so the daemon does not collect zombies.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    program: String,
    app_name: String,
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self {
            program: "notify-send".to_string(),
            app_name: "playchart".to_string(),
        }
    }
}

impl DesktopNotifier {
    fn spawn_reaped(&self, message: &str) -> io::Result<JoinHandle<io::Result<ExitStatus>>> {
        let mut child = Command::new(&self.program)
            .args(["--app-name", &self.app_name, "Chart update", message])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        thread::Builder::new()
            .name("notify-reaper".to_string())
            .spawn(move || {
                let status = child.wait();
                if let Ok(status) = &status {
                    if !status.success() {
                        warn!("notify-send exited with {status}");
                    }
                }
                status
            })
    }
}

impl Notifier for DesktopNotifier {
    fn deliver(&self, message: &str) {
        if let Err(e) = self.spawn_reaped(message) {
            warn!("Could not run {} ({e}), message was: {message}", self.program);
        }
    }
}

/// Prints to the daemon's console and the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn deliver(&self, message: &str) {
        info!("{message}");
        println!("♫ {message}");
    }
}

/// Message for a song whose all-time rank moved in the last pass.
///
/// `None` when either rank is missing or the rank did not change.
#[must_use]
pub fn rank_change_message(song: &Song) -> Option<String> {
    let (new, old) = (song.last_known_rank?, song.previous_rank?);
    if new == old {
        return None;
    }

    let direction = if new < old { "moved up" } else { "moved down" };
    Some(format!(
        "{} by {} {direction} from #{old} to #{new}",
        song.title, song.artist
    ))
}

/// Deliver a rank-change message for `song` if it has one. Returns the
/// delivered message.
pub fn notify_rank_change<N: Notifier + ?Sized>(song: &Song, notifier: &N) -> Option<String> {
    let message = rank_change_message(song)?;
    notifier.deliver(&message);
    Some(message)
}
