//! # Ranking Engine
//!
//! A ranking pass sorts the catalog by windowed play count, hands out dense
//! 1-based ranks and persists them together with the rank each song held
//! before the pass:
//!
//! ```text
//! fetch songs -> windowed counts -> drop unplayed (windowed only)
//!   -> stable sort desc -> rank = position + 1
//!   -> previous := last_known, last_known := rank   (batched, yields)
//!   -> one transaction -> top `chart_limit` returned
//! ```
//!
//! Ties keep catalog insertion order, so two passes over unchanged data give
//! identical ranks. Ranks are persisted for every included song, not only the
//! visible top of the chart, so later comparisons stay correct.
//!
//! Songs that drop out of a windowed chart have that window's rank fields
//! cleared. When they come back they show up as new entries instead of
//! reporting a jump from a stale position.
//!
//! The whole pass runs between [`CatalogStore::begin_pass`] and
//! [`CatalogStore::end_pass`]. Two processes ranking the same catalog take
//! turns, so neither overwrites the other's previous ranks.

use crate::aggregation::{windowed_counts, TimeFilter};
use crate::db::{CatalogStore, RankUpdate};
use crate::error::{ChartError, Result};
use crate::song::{RankChange, Song};
use chrono::{DateTime, Utc};
use log::{debug, trace};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Entries returned to chart viewers.
pub const DEFAULT_CHART_LIMIT: usize = 100;

/// Rank mutations computed between two cooperative yields.
pub const DEFAULT_RANK_BATCH_SIZE: usize = 32;

/// Tuning knobs for a ranking pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankingOptions {
    pub chart_limit: usize,
    pub batch_size: usize,
}

impl Default for RankingOptions {
    fn default() -> Self {
        Self {
            chart_limit: DEFAULT_CHART_LIMIT,
            batch_size: DEFAULT_RANK_BATCH_SIZE,
        }
    }
}

/// Shared flag used to abandon a chart pass that nobody is waiting for.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// One row of a chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartEntry {
    pub rank: u32,
    pub song: Song,
    pub windowed_count: u64,
    /// Movement since the previous pass for the same filter.
    pub change: RankChange,
}

/// Outcome of a ranking pass.
#[derive(Debug, Clone, Serialize)]
pub struct RankedChart {
    pub filter: TimeFilter,
    pub computed_at: DateTime<Utc>,
    /// Songs ranked and persisted, possibly more than `entries.len()`.
    pub ranked_total: usize,
    pub entries: Vec<ChartEntry>,
}

impl RankedChart {
    /// Entry for a song, if it made the visible part of the chart.
    #[must_use]
    pub fn entry(&self, song_id: i64) -> Option<&ChartEntry> {
        self.entries.iter().find(|entry| entry.song.id == song_id)
    }
}

impl fmt::Display for RankedChart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Most played, {} ({} ranked)", self.filter, self.ranked_total)?;
        if self.entries.is_empty() {
            return writeln!(f, "  nothing played yet");
        }
        for entry in &self.entries {
            writeln!(
                f,
                "{:>4}  {:<5} {:>6}  {} - {}",
                entry.rank,
                entry.change.to_string(),
                entry.windowed_count,
                entry.song.artist,
                entry.song.title
            )?;
        }
        Ok(())
    }
}

fn check_cancelled(cancel: Option<&CancelToken>) -> Result<()> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(ChartError::Cancelled),
        _ => Ok(()),
    }
}

/// Run one ranking pass for `filter` as of `now` and persist its ranks.
///
/// With a `cancel` token the pass checks for cancellation at every batch
/// boundary and right before committing; a cancelled pass writes nothing.
pub fn rank_pass<S: CatalogStore + ?Sized>(
    store: &mut S,
    filter: TimeFilter,
    now: DateTime<Utc>,
    options: &RankingOptions,
    cancel: Option<&CancelToken>,
) -> Result<RankedChart> {
    store.begin_pass()?;
    let result = locked_pass(store, filter, now, options, cancel);
    let released = store.end_pass(result.is_ok());
    let chart = result?;
    released?;
    Ok(chart)
}

fn locked_pass<S: CatalogStore + ?Sized>(
    store: &mut S,
    filter: TimeFilter,
    now: DateTime<Utc>,
    options: &RankingOptions,
    cancel: Option<&CancelToken>,
) -> Result<RankedChart> {
    let songs = store.all_songs()?;
    let counts = windowed_counts(store, &songs, filter, now)?;
    let stored = store.ranks(filter)?;
    check_cancelled(cancel)?;

    let mut excluded = Vec::new();
    let mut included: Vec<(Song, u64)> = Vec::with_capacity(songs.len());
    for (song, count) in songs.into_iter().zip(counts) {
        if filter.excludes_unplayed() && count == 0 {
            if stored.contains_key(&song.id) {
                excluded.push(song.id);
            }
            continue;
        }
        included.push((song, count));
    }

    // `sort_by` is stable: equal counts keep insertion order.
    included.sort_by(|(_, a), (_, b)| b.cmp(a));

    let batch_size = options.batch_size.max(1);
    let mut updates = Vec::with_capacity(included.len());
    for (batch_index, batch) in included.chunks(batch_size).enumerate() {
        if batch_index > 0 {
            std::thread::yield_now();
        }
        check_cancelled(cancel)?;

        for (offset, (song, _)) in batch.iter().enumerate() {
            let position = batch_index * batch_size + offset;
            updates.push(RankUpdate {
                song_id: song.id,
                last_known_rank: u32::try_from(position + 1).unwrap_or(u32::MAX),
                previous_rank: stored.get(&song.id).and_then(|rank| rank.last_known_rank),
            });
        }
        trace!("Ranked batch {batch_index} ({} songs) for {filter}", batch.len());
    }

    check_cancelled(cancel)?;
    store.save_ranks(filter, &updates, &excluded)?;

    let ranked_total = included.len();
    let entries = included
        .into_iter()
        .zip(&updates)
        .take(options.chart_limit)
        .map(|((mut song, windowed_count), update)| {
            if filter == TimeFilter::AllTime {
                song.last_known_rank = Some(update.last_known_rank);
                song.previous_rank = update.previous_rank;
            }
            ChartEntry {
                rank: update.last_known_rank,
                song,
                windowed_count,
                change: RankChange::between(Some(update.last_known_rank), update.previous_rank),
            }
        })
        .collect();

    debug!(
        "Ranking pass for {filter}: {ranked_total} ranked, {} cleared",
        excluded.len()
    );

    Ok(RankedChart {
        filter,
        computed_at: now,
        ranked_total,
        entries,
    })
}
