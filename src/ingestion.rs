//! # Event Ingestion
//!
//! Turns a detected play into a persisted [`PlayEvent`](crate::song::PlayEvent)
//! and bumps the song's local play count, then re-ranks the all-time chart and
//! checks the played song for a notification-worthy move.
//!
//! A song seen for the first time during playback gets a baseline of
//! `reported counter - 1`: the play that triggered the detection is about to
//! be logged locally and must not be counted twice.

use crate::aggregation::TimeFilter;
use crate::db::{CatalogStore, NewSong};
use crate::error::{ChartError, Result};
use crate::mpd_client::SourceItem;
use crate::notification::{notify_rank_change, Notifier};
use crate::ranking::{rank_pass, RankingOptions};
use chrono::{DateTime, Utc};
use log::{debug, info};

/// What happened to one detected play.
#[derive(Debug)]
pub enum IngestOutcome {
    Recorded { song_id: i64, created: bool },
    /// The item lacked required metadata; holds the
    /// [`ChartError::DataQualitySkip`] describing why.
    Skipped(ChartError),
}

/// Result of the full detection -> ranking -> notification sequence.
#[derive(Debug)]
pub struct PlayReport {
    pub outcome: IngestOutcome,
    /// Message delivered for the played song, if its rank moved.
    pub notification: Option<String>,
}

/// Title and artist, or a data-quality skip naming what is missing.
pub fn require_metadata(item: &SourceItem) -> Result<(String, String)> {
    let missing = |what| ChartError::DataQualitySkip {
        external_id: item.external_id.clone(),
        missing: what,
    };
    let title = item.title.clone().ok_or_else(|| missing("title"))?;
    let artist = item.artist.clone().ok_or_else(|| missing("artist"))?;
    Ok((title, artist))
}

/// Persist one detected play of `item` at `now`.
pub fn ingest<S: CatalogStore + ?Sized>(
    store: &mut S,
    item: &SourceItem,
    now: DateTime<Utc>,
) -> Result<IngestOutcome> {
    if let Some(song) = store.find_song(&item.external_id)? {
        store.append_play(song.id, now)?;
        debug!(
            "Logged play of `{}' ({} total)",
            item.external_id,
            song.total_play_count() + 1
        );
        return Ok(IngestOutcome::Recorded {
            song_id: song.id,
            created: false,
        });
    }

    let (title, artist) = match require_metadata(item) {
        Ok(metadata) => metadata,
        Err(e) if e.is_skip() => {
            info!("{e}");
            return Ok(IngestOutcome::Skipped(e));
        }
        Err(e) => return Err(e),
    };

    let song = NewSong {
        external_id: item.external_id.clone(),
        title,
        artist,
        album: item.album.clone(),
        baseline_play_count: item.play_count.saturating_sub(1),
        local_play_count: 1,
        artwork: item.artwork.clone(),
    };
    let song_id = store.insert_song_with_play(&song, now)?;
    info!(
        "New song `{}' (baseline {}) logged on first play",
        song.external_id, song.baseline_play_count
    );

    Ok(IngestOutcome::Recorded {
        song_id,
        created: true,
    })
}

/// Ingest a play, re-rank all-time and notify if the played song moved.
///
/// The ranking pass here is never cancellable: rank history depends on every
/// ingestion being followed by a completed pass.
pub fn ingest_and_rank<S: CatalogStore + ?Sized, N: Notifier + ?Sized>(
    store: &mut S,
    item: &SourceItem,
    notifier: &N,
    options: &RankingOptions,
    now: DateTime<Utc>,
) -> Result<PlayReport> {
    let outcome = ingest(store, item, now)?;
    let IngestOutcome::Recorded { song_id, .. } = outcome else {
        return Ok(PlayReport {
            outcome,
            notification: None,
        });
    };

    let chart = rank_pass(store, TimeFilter::AllTime, now, options, None)?;
    let played = match chart.entry(song_id) {
        Some(entry) => Some(entry.song.clone()),
        // Outside the visible chart, its fields were still persisted.
        None => store.find_song(&item.external_id)?,
    };
    let notification = played.and_then(|song| notify_rank_change(&song, notifier));

    Ok(PlayReport {
        outcome,
        notification,
    })
}
