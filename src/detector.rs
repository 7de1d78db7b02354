//! # Play-Count Diff Detector
//!
//! MPD only exposes a cumulative `playCount` per song, never a stream of play
//! events. [`PlayCountDetector`] turns "the counter went up" into discrete
//! [`PlayDetection`]s.
//!
//! The detector remembers the last counter it saw per song for the current
//! session only. The first observation of a song is recorded silently: the
//! song may already have been playing before the watcher started, and its
//! counter says nothing about a new play.

use std::collections::HashMap;

/// What the detector knows about one song this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CounterState {
    #[default]
    Unseen,
    Known(u32),
}

/// A single inferred play, however large the counter jump was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayDetection {
    pub external_id: String,
    /// Counter value reported alongside the increase.
    pub counter: u32,
}

/// Edge detector over reported play counters.
#[derive(Debug, Default)]
pub struct PlayCountDetector {
    last_seen: HashMap<String, u32>,
}

impl PlayCountDetector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one observation. Returns a detection only when a known song's
    /// counter strictly increased.
    ///
    /// Decreases and repeats are recorded without emitting, so an
    /// out-of-order report or a counter reset re-bases the song.
    pub fn observe(&mut self, external_id: &str, counter: u32) -> Option<PlayDetection> {
        let previous = self.last_seen.insert(external_id.to_string(), counter);

        match previous {
            None => {
                log::debug!("First sighting of `{external_id}' at counter {counter}");
                None
            }
            Some(before) if counter > before => {
                if counter - before > 1 {
                    log::debug!(
                        "Counter for `{external_id}' jumped {before} -> {counter}, logging one play"
                    );
                }
                Some(PlayDetection {
                    external_id: external_id.to_string(),
                    counter,
                })
            }
            Some(before) => {
                if counter < before {
                    log::warn!("Counter for `{external_id}' went backwards ({before} -> {counter})");
                }
                None
            }
        }
    }

    #[must_use]
    pub fn state(&self, external_id: &str) -> CounterState {
        self.last_seen
            .get(external_id)
            .map_or(CounterState::Unseen, |&counter| CounterState::Known(counter))
    }

    /// Songs observed this session.
    #[must_use]
    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }

    /// Forget everything, as on a fresh launch.
    pub fn reset(&mut self) {
        self.last_seen.clear();
    }
}
