//! Catalog entities: [`Song`], [`PlayEvent`] and the derived [`RankChange`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// How a song, and its play statistics, are stored in the catalog.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Song {
    /// Store-local row id.
    pub id: i64,
    /// Stable identifier from the playback source (the MPD song URI).
    pub external_id: String,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    /// Plays that happened before tracking began. Undated.
    pub baseline_play_count: u32,
    /// Plays detected and logged since baseline capture.
    pub local_play_count: u32,
    /// Position in the most recent all-time pass.
    pub last_known_rank: Option<u32>,
    /// `last_known_rank` as it was before the most recent all-time pass.
    pub previous_rank: Option<u32>,
    /// Cached thumbnail, if the source ever handed one over.
    #[serde(skip)]
    pub artwork: Option<Vec<u8>>,
}

impl Song {
    /// Baseline plus locally logged plays. Never stored.
    #[must_use]
    pub fn total_play_count(&self) -> u64 {
        u64::from(self.baseline_play_count) + u64::from(self.local_play_count)
    }

    /// Movement between the last two all-time passes.
    #[must_use]
    pub fn rank_change(&self) -> RankChange {
        RankChange::between(self.last_known_rank, self.previous_rank)
    }
}

/// A single detected play. Append-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayEvent {
    pub id: i64,
    /// Owning song.
    pub song_id: i64,
    pub timestamp: DateTime<Utc>,
}

/// Direction and distance a song moved between two ranking passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "places", rename_all = "snake_case")]
pub enum RankChange {
    /// No previous rank to compare against.
    New,
    Up(u32),
    Down(u32),
    Same,
}

impl RankChange {
    /// Compare a current rank with the one held before the last pass.
    /// A smaller rank number is a better position.
    #[must_use]
    pub fn between(current: Option<u32>, previous: Option<u32>) -> Self {
        match (current, previous) {
            (Some(now), Some(before)) if now < before => Self::Up(before - now),
            (Some(now), Some(before)) if now > before => Self::Down(now - before),
            (Some(_), Some(_)) => Self::Same,
            _ => Self::New,
        }
    }
}

impl fmt::Display for RankChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Up(n) => write!(f, "▲{n}"),
            Self::Down(n) => write!(f, "▼{n}"),
            Self::Same => write!(f, "="),
        }
    }
}
