//! Windowed play counts.
//!
//! All-time counts include the undated baseline. The other windows only see
//! dated [`PlayEvent`](crate::song::PlayEvent)s in `[now - window, now]`,
//! measured back from the evaluation instant rather than aligned to calendar
//! boundaries.

use crate::db::CatalogStore;
use crate::error::Result;
use crate::song::Song;
use chrono::{DateTime, Duration, Months, Utc};
use clap::ValueEnum;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Time window a chart is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeFilter {
    #[default]
    AllTime,
    ThisWeek,
    ThisMonth,
    ThisYear,
}

impl TimeFilter {
    pub const ALL: [TimeFilter; 4] = [
        TimeFilter::AllTime,
        TimeFilter::ThisWeek,
        TimeFilter::ThisMonth,
        TimeFilter::ThisYear,
    ];

    /// Key used when persisting per-window rank history.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AllTime => "all_time",
            Self::ThisWeek => "this_week",
            Self::ThisMonth => "this_month",
            Self::ThisYear => "this_year",
        }
    }

    /// Oldest instant still inside the window, `None` for all-time.
    ///
    /// Month and year use calendar arithmetic, so "one month before March 31"
    /// clamps to the last day of February.
    #[must_use]
    pub fn window_start(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::AllTime => None,
            Self::ThisWeek => Some(now - Duration::days(7)),
            Self::ThisMonth => Some(now.checked_sub_months(Months::new(1)).unwrap_or(now)),
            Self::ThisYear => Some(now.checked_sub_months(Months::new(12)).unwrap_or(now)),
        }
    }

    /// Windowed passes drop songs that were not played inside the window.
    #[must_use]
    pub const fn excludes_unplayed(self) -> bool {
        !matches!(self, Self::AllTime)
    }
}

impl fmt::Display for TimeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::AllTime => "all time",
            Self::ThisWeek => "this week",
            Self::ThisMonth => "this month",
            Self::ThisYear => "this year",
        };
        f.write_str(label)
    }
}

/// Play count of a single song under `filter`.
pub fn windowed_count<S: CatalogStore + ?Sized>(
    store: &S,
    song: &Song,
    filter: TimeFilter,
    now: DateTime<Utc>,
) -> Result<u64> {
    match filter.window_start(now) {
        None => Ok(song.total_play_count()),
        Some(since) => Ok(u64::from(store.play_count_between(song.id, since, now)?)),
    }
}

/// Play counts for many songs under `filter`, in the same order as `songs`.
///
/// Event counts come from a single grouped query, the per-song mapping is
/// spread over the rayon pool.
pub fn windowed_counts<S: CatalogStore + ?Sized>(
    store: &S,
    songs: &[Song],
    filter: TimeFilter,
    now: DateTime<Utc>,
) -> Result<Vec<u64>> {
    let Some(since) = filter.window_start(now) else {
        return Ok(songs.par_iter().map(Song::total_play_count).collect());
    };

    let counts = store.event_counts_between(since, now)?;
    log::trace!(
        "{} songs played {} between {since} and {now}",
        counts.len(),
        filter
    );

    Ok(songs
        .par_iter()
        .map(|song| counts.get(&song.id).copied().map_or(0, u64::from))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NewSong, SqliteCatalog};
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn new_song(external_id: &str, baseline: u32) -> NewSong {
        NewSong {
            external_id: external_id.to_string(),
            title: format!("Title {external_id}"),
            artist: "Artist".to_string(),
            album: None,
            baseline_play_count: baseline,
            local_play_count: 0,
            artwork: None,
        }
    }

    #[test]
    fn test_window_starts() {
        let now = at(2024, 3, 31);
        assert_eq!(TimeFilter::AllTime.window_start(now), None);
        assert_eq!(TimeFilter::ThisWeek.window_start(now), Some(at(2024, 3, 24)));
        // Calendar month back from March 31st clamps to leap-day.
        assert_eq!(TimeFilter::ThisMonth.window_start(now), Some(at(2024, 2, 29)));
        assert_eq!(TimeFilter::ThisYear.window_start(now), Some(at(2023, 3, 31)));
    }

    #[test]
    fn test_only_all_time_keeps_unplayed() {
        assert!(!TimeFilter::AllTime.excludes_unplayed());
        assert!(TimeFilter::ThisWeek.excludes_unplayed());
        assert!(TimeFilter::ThisMonth.excludes_unplayed());
        assert!(TimeFilter::ThisYear.excludes_unplayed());
    }

    #[test]
    fn test_baseline_only_counts_for_all_time() {
        let mut store = SqliteCatalog::open_in_memory().unwrap();
        store.save_imported(&[new_song("x", 10)]).unwrap();
        let song = store.find_song("x").unwrap().unwrap();
        let now = at(2024, 6, 1);

        assert_eq!(windowed_count(&store, &song, TimeFilter::AllTime, now).unwrap(), 10);
        for filter in [TimeFilter::ThisWeek, TimeFilter::ThisMonth, TimeFilter::ThisYear] {
            assert_eq!(windowed_count(&store, &song, filter, now).unwrap(), 0);
        }
    }

    #[test]
    fn test_events_fall_into_nested_windows() {
        let mut store = SqliteCatalog::open_in_memory().unwrap();
        store.save_imported(&[new_song("a", 2)]).unwrap();
        let id = store.find_song("a").unwrap().unwrap().id;
        let now = at(2024, 6, 15);

        store.append_play(id, at(2023, 1, 1)).unwrap(); // outside every window
        store.append_play(id, at(2023, 9, 1)).unwrap(); // year
        store.append_play(id, at(2024, 5, 20)).unwrap(); // month
        store.append_play(id, at(2024, 6, 10)).unwrap(); // week
        store.append_play(id, now).unwrap(); // boundary is inclusive

        let song = store.find_song("a").unwrap().unwrap();
        let count = |f| windowed_count(&store, &song, f, now).unwrap();
        assert_eq!(count(TimeFilter::AllTime), 7);
        assert_eq!(count(TimeFilter::ThisYear), 4);
        assert_eq!(count(TimeFilter::ThisMonth), 3);
        assert_eq!(count(TimeFilter::ThisWeek), 2);
    }

    #[test]
    fn test_bulk_counts_match_single_counts() {
        let mut store = SqliteCatalog::open_in_memory().unwrap();
        store
            .save_imported(&[new_song("a", 5), new_song("b", 1), new_song("c", 0)])
            .unwrap();
        let now = at(2024, 6, 15);
        let b = store.find_song("b").unwrap().unwrap().id;
        store.append_play(b, at(2024, 6, 14)).unwrap();
        store.append_play(b, at(2024, 6, 14)).unwrap();

        let songs = store.all_songs().unwrap();
        for filter in TimeFilter::ALL {
            let bulk = windowed_counts(&store, &songs, filter, now).unwrap();
            for (song, bulk_count) in songs.iter().zip(bulk) {
                let single = windowed_count(&store, song, filter, now).unwrap();
                assert_eq!(single, bulk_count, "{filter} for {}", song.external_id);
                let all_time = windowed_count(&store, song, TimeFilter::AllTime, now).unwrap();
                assert!(bulk_count <= all_time);
            }
        }
    }

    #[test]
    fn test_empty_catalog_is_not_an_error() {
        let store = SqliteCatalog::open_in_memory().unwrap();
        let counts = windowed_counts(&store, &[], TimeFilter::ThisWeek, Utc::now()).unwrap();
        assert!(counts.is_empty());
    }
}
