//! # Catalog Store
//!
//! SQLite persistence for songs, their play events and per-window rank
//! history. The rest of the crate talks to storage through the
//! [`CatalogStore`] trait so the engines can be exercised against any backend;
//! [`SqliteCatalog`] is the production implementation.
//!
//! ## Schema
//!
//! ```text
//! songs        id, external_id UNIQUE, title, artist, album,
//!              baseline_play_count, local_play_count,
//!              last_known_rank, previous_rank, artwork
//! play_events  id, song_id -> songs(id) ON DELETE CASCADE, played_at (unix ms)
//! chart_ranks  (song_id, time_filter) -> last_known_rank, previous_rank
//! ```
//!
//! All-time ranks live on the `songs` row. The windowed filters keep their own
//! rows in `chart_ranks` so that browsing "this week" never disturbs the
//! all-time history notifications are based on.
//!
//! Every mutating method runs inside one transaction: it either fully commits
//! or leaves the database untouched.
//!
//! ## Ranking passes across processes
//!
//! The daemon and a `playchart chart` run may rank the same file at once. A
//! pass reads the stored ranks, computes new ones and writes them back, so
//! [`CatalogStore::begin_pass`] takes SQLite's write lock (`BEGIN IMMEDIATE`)
//! for the whole read-compute-write cycle. A second pass waits for the first
//! to finish and then sees its ranks as the previous ones.

use crate::aggregation::TimeFilter;
use crate::error::Result;
use crate::song::{PlayEvent, Song};
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info, trace};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Bumped whenever the table layout changes.
const SCHEMA_VERSION: i64 = 1;

/// How long a connection waits for another one's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const SONG_COLUMNS: &str = "id, external_id, title, artist, album, baseline_play_count, \
     local_play_count, last_known_rank, previous_rank, artwork";

/// A song that has not been written yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSong {
    pub external_id: String,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub baseline_play_count: u32,
    pub local_play_count: u32,
    pub artwork: Option<Vec<u8>>,
}

/// Rank fields as persisted for one song and one filter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoredRank {
    pub last_known_rank: Option<u32>,
    pub previous_rank: Option<u32>,
}

/// New rank fields computed by a ranking pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankUpdate {
    pub song_id: i64,
    pub last_known_rank: u32,
    pub previous_rank: Option<u32>,
}

/// Storage primitives the engines rely on.
pub trait CatalogStore {
    /// Number of songs in the catalog.
    fn song_count(&self) -> Result<u64>;

    /// Look a song up by its playback-source identifier.
    fn find_song(&self, external_id: &str) -> Result<Option<Song>>;

    /// Every song, in insertion order.
    fn all_songs(&self) -> Result<Vec<Song>>;

    /// Atomically upsert a batch of songs. Existing rows keep their local
    /// count and never lose baseline plays. Returns the number of rows written.
    fn save_imported(&mut self, songs: &[NewSong]) -> Result<usize>;

    /// Atomically insert a song together with one play event at `at`.
    fn insert_song_with_play(&mut self, song: &NewSong, at: DateTime<Utc>) -> Result<i64>;

    /// Atomically append a play event and bump the song's local count.
    fn append_play(&mut self, song_id: i64, at: DateTime<Utc>) -> Result<()>;

    /// Play events of one song, oldest first.
    fn play_events(&self, song_id: i64) -> Result<Vec<PlayEvent>>;

    /// Events of one song in `[since, until]`.
    fn play_count_between(&self, song_id: i64, since: DateTime<Utc>, until: DateTime<Utc>)
        -> Result<u32>;

    /// Events per song in `[since, until]`. Songs without events are absent.
    fn event_counts_between(&self, since: DateTime<Utc>, until: DateTime<Utc>)
        -> Result<HashMap<i64, u32>>;

    /// Persisted rank fields for `filter`, keyed by song id.
    fn ranks(&self, filter: TimeFilter) -> Result<HashMap<i64, StoredRank>>;

    /// Atomically write the outcome of a ranking pass. `excluded` songs have
    /// their rank fields for `filter` cleared.
    fn save_ranks(&mut self, filter: TimeFilter, updates: &[RankUpdate], excluded: &[i64])
        -> Result<()>;

    /// Delete every song; play events and rank history cascade.
    fn reset(&mut self) -> Result<u64>;

    /// Hold the catalog exclusively until [`CatalogStore::end_pass`], so the
    /// ranks a pass reads are still current when it saves.
    fn begin_pass(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release the hold taken by `begin_pass`, keeping the pass's writes
    /// only when `commit` is true.
    fn end_pass(&mut self, commit: bool) -> Result<()> {
        let _ = commit;
        Ok(())
    }
}

/// [`CatalogStore`] backed by a rusqlite connection.
#[derive(Debug)]
pub struct SqliteCatalog {
    conn: Connection,
}

impl SqliteCatalog {
    /// Open (creating if needed) the catalog at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        debug!("Opening catalog at {}", path.display());
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Self::with_connection(conn)
    }

    /// Private in-memory catalog, used by tests and benchmarks.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let catalog = Self { conn };
        catalog.migrate()?;
        Ok(catalog)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self.conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version >= SCHEMA_VERSION {
            trace!("Catalog schema at version {version}");
            return Ok(());
        }

        info!("Creating catalog schema version {SCHEMA_VERSION}");
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS songs (
                id                  INTEGER PRIMARY KEY,
                external_id         TEXT    NOT NULL UNIQUE,
                title               TEXT    NOT NULL,
                artist              TEXT    NOT NULL,
                album               TEXT,
                baseline_play_count INTEGER NOT NULL DEFAULT 0,
                local_play_count    INTEGER NOT NULL DEFAULT 0,
                last_known_rank     INTEGER,
                previous_rank       INTEGER,
                artwork             BLOB
            );
            CREATE TABLE IF NOT EXISTS play_events (
                id        INTEGER PRIMARY KEY,
                song_id   INTEGER NOT NULL REFERENCES songs(id) ON DELETE CASCADE,
                played_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_play_events_song ON play_events(song_id, played_at);
            CREATE INDEX IF NOT EXISTS idx_play_events_time ON play_events(played_at);
            CREATE TABLE IF NOT EXISTS chart_ranks (
                song_id         INTEGER NOT NULL REFERENCES songs(id) ON DELETE CASCADE,
                time_filter     TEXT    NOT NULL,
                last_known_rank INTEGER,
                previous_rank   INTEGER,
                PRIMARY KEY (song_id, time_filter)
            );
            PRAGMA user_version = 1;
            COMMIT;",
        )?;
        Ok(())
    }
}

fn song_from_row(row: &Row<'_>) -> rusqlite::Result<Song> {
    Ok(Song {
        id: row.get(0)?,
        external_id: row.get(1)?,
        title: row.get(2)?,
        artist: row.get(3)?,
        album: row.get(4)?,
        baseline_play_count: row.get(5)?,
        local_play_count: row.get(6)?,
        last_known_rank: row.get(7)?,
        previous_rank: row.get(8)?,
        artwork: row.get(9)?,
    })
}

fn millis_to_utc(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Insert an event no earlier than the song's newest one.
const INSERT_EVENT: &str = "INSERT INTO play_events (song_id, played_at)
     VALUES (?1, MAX(?2, COALESCE((SELECT MAX(played_at) FROM play_events WHERE song_id = ?1), ?2)))";

impl CatalogStore for SqliteCatalog {
    fn song_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM songs", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn find_song(&self, external_id: &str) -> Result<Option<Song>> {
        let sql = format!("SELECT {SONG_COLUMNS} FROM songs WHERE external_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, [external_id], song_from_row)
            .optional()?)
    }

    fn all_songs(&self) -> Result<Vec<Song>> {
        let sql = format!("SELECT {SONG_COLUMNS} FROM songs ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let songs = stmt
            .query_map([], song_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(songs)
    }

    fn save_imported(&mut self, songs: &[NewSong]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO songs (external_id, title, artist, album, baseline_play_count, local_play_count, artwork)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(external_id) DO UPDATE SET
                    title = excluded.title,
                    artist = excluded.artist,
                    album = excluded.album,
                    baseline_play_count = MAX(baseline_play_count, excluded.baseline_play_count),
                    artwork = COALESCE(excluded.artwork, artwork)",
            )?;

            for song in songs {
                stmt.execute(params![
                    song.external_id,
                    song.title,
                    song.artist,
                    song.album,
                    song.baseline_play_count,
                    song.local_play_count,
                    song.artwork,
                ])?;
            }
        }
        tx.commit()?;

        trace!("Saved batch of {} songs", songs.len());
        Ok(songs.len())
    }

    fn insert_song_with_play(&mut self, song: &NewSong, at: DateTime<Utc>) -> Result<i64> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO songs (external_id, title, artist, album, baseline_play_count, local_play_count, artwork)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                song.external_id,
                song.title,
                song.artist,
                song.album,
                song.baseline_play_count,
                song.local_play_count,
                song.artwork,
            ],
        )?;
        let song_id = tx.last_insert_rowid();
        tx.execute(INSERT_EVENT, params![song_id, at.timestamp_millis()])?;
        tx.commit()?;
        Ok(song_id)
    }

    fn append_play(&mut self, song_id: i64, at: DateTime<Utc>) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(INSERT_EVENT, params![song_id, at.timestamp_millis()])?;
        let updated = tx.execute(
            "UPDATE songs SET local_play_count = local_play_count + 1 WHERE id = ?1",
            [song_id],
        )?;
        if updated == 0 {
            // Foreign keys already reject the event; keep the error explicit.
            return Err(rusqlite::Error::QueryReturnedNoRows.into());
        }
        tx.commit()?;
        Ok(())
    }

    fn play_events(&self, song_id: i64) -> Result<Vec<PlayEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, song_id, played_at FROM play_events WHERE song_id = ?1 ORDER BY played_at, id",
        )?;
        let events = stmt
            .query_map([song_id], |row| {
                Ok(PlayEvent {
                    id: row.get(0)?,
                    song_id: row.get(1)?,
                    timestamp: millis_to_utc(row.get(2)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    fn play_count_between(
        &self,
        song_id: i64,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<u32> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM play_events WHERE song_id = ?1 AND played_at BETWEEN ?2 AND ?3",
            params![song_id, since.timestamp_millis(), until.timestamp_millis()],
            |row| row.get(0),
        )?)
    }

    fn event_counts_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<HashMap<i64, u32>> {
        let mut stmt = self.conn.prepare(
            "SELECT song_id, COUNT(*) FROM play_events
             WHERE played_at BETWEEN ?1 AND ?2
             GROUP BY song_id",
        )?;
        let counts = stmt
            .query_map(
                params![since.timestamp_millis(), until.timestamp_millis()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(counts)
    }

    fn ranks(&self, filter: TimeFilter) -> Result<HashMap<i64, StoredRank>> {
        let map_row = |row: &Row<'_>| -> rusqlite::Result<(i64, StoredRank)> {
            Ok((
                row.get(0)?,
                StoredRank {
                    last_known_rank: row.get(1)?,
                    previous_rank: row.get(2)?,
                },
            ))
        };

        let ranks = if filter == TimeFilter::AllTime {
            let mut stmt = self
                .conn
                .prepare("SELECT id, last_known_rank, previous_rank FROM songs")?;
            let rows = stmt.query_map([], map_row)?;
            rows.collect::<rusqlite::Result<HashMap<_, _>>>()?
        } else {
            let mut stmt = self.conn.prepare(
                "SELECT song_id, last_known_rank, previous_rank FROM chart_ranks WHERE time_filter = ?1",
            )?;
            let rows = stmt.query_map([filter.as_str()], map_row)?;
            rows.collect::<rusqlite::Result<HashMap<_, _>>>()?
        };
        Ok(ranks)
    }

    fn save_ranks(
        &mut self,
        filter: TimeFilter,
        updates: &[RankUpdate],
        excluded: &[i64],
    ) -> Result<()> {
        // A savepoint nests inside the transaction opened by `begin_pass`.
        let tx = self.conn.savepoint()?;
        {
            if filter == TimeFilter::AllTime {
                let mut update = tx.prepare(
                    "UPDATE songs SET last_known_rank = ?1, previous_rank = ?2 WHERE id = ?3",
                )?;
                for rank in updates {
                    update.execute(params![rank.last_known_rank, rank.previous_rank, rank.song_id])?;
                }

                let mut clear = tx.prepare(
                    "UPDATE songs SET last_known_rank = NULL, previous_rank = NULL WHERE id = ?1",
                )?;
                for song_id in excluded {
                    clear.execute([song_id])?;
                }
            } else {
                let mut upsert = tx.prepare(
                    "INSERT INTO chart_ranks (song_id, time_filter, last_known_rank, previous_rank)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(song_id, time_filter) DO UPDATE SET
                        last_known_rank = excluded.last_known_rank,
                        previous_rank = excluded.previous_rank",
                )?;
                for rank in updates {
                    upsert.execute(params![
                        rank.song_id,
                        filter.as_str(),
                        rank.last_known_rank,
                        rank.previous_rank,
                    ])?;
                }

                let mut clear = tx
                    .prepare("DELETE FROM chart_ranks WHERE song_id = ?1 AND time_filter = ?2")?;
                for song_id in excluded {
                    clear.execute(params![song_id, filter.as_str()])?;
                }
            }
        }
        tx.commit()?;

        debug!(
            "Saved {} {filter} ranks, cleared {}",
            updates.len(),
            excluded.len()
        );
        Ok(())
    }

    fn reset(&mut self) -> Result<u64> {
        let deleted = self.conn.execute("DELETE FROM songs", [])?;
        info!("Catalog reset, {deleted} songs removed");
        Ok(deleted as u64)
    }

    fn begin_pass(&mut self) -> Result<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        trace!("Catalog locked for a ranking pass");
        Ok(())
    }

    fn end_pass(&mut self, commit: bool) -> Result<()> {
        self.conn
            .execute_batch(if commit { "COMMIT" } else { "ROLLBACK" })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_song(external_id: &str, baseline: u32) -> NewSong {
        NewSong {
            external_id: external_id.to_string(),
            title: format!("Title {external_id}"),
            artist: "Artist".to_string(),
            album: Some("Album".to_string()),
            baseline_play_count: baseline,
            local_play_count: 0,
            artwork: None,
        }
    }

    #[test]
    fn test_save_imported_upserts_by_external_id() {
        let mut store = SqliteCatalog::open_in_memory().unwrap();
        store.save_imported(&[new_song("a", 3), new_song("b", 1)]).unwrap();
        store.save_imported(&[new_song("a", 7)]).unwrap();

        assert_eq!(store.song_count().unwrap(), 2);
        let a = store.find_song("a").unwrap().unwrap();
        assert_eq!(a.baseline_play_count, 7);
    }

    #[test]
    fn test_reimport_never_lowers_baseline_or_local_count() {
        let mut store = SqliteCatalog::open_in_memory().unwrap();
        store.save_imported(&[new_song("a", 9)]).unwrap();
        let id = store.find_song("a").unwrap().unwrap().id;
        store.append_play(id, Utc::now()).unwrap();

        store.save_imported(&[new_song("a", 2)]).unwrap();
        let a = store.find_song("a").unwrap().unwrap();
        assert_eq!(a.baseline_play_count, 9);
        assert_eq!(a.local_play_count, 1);
    }

    #[test]
    fn test_insert_song_with_play_is_one_unit() {
        let mut store = SqliteCatalog::open_in_memory().unwrap();
        let song = NewSong {
            local_play_count: 1,
            ..new_song("fresh", 4)
        };
        let id = store.insert_song_with_play(&song, Utc::now()).unwrap();

        assert_eq!(store.play_events(id).unwrap().len(), 1);
        // Duplicate external id fails and leaves no stray event behind.
        assert!(store.insert_song_with_play(&song, Utc::now()).is_err());
        assert_eq!(store.play_events(id).unwrap().len(), 1);
        assert_eq!(store.song_count().unwrap(), 1);
    }

    #[test]
    fn test_append_play_to_missing_song_fails() {
        let mut store = SqliteCatalog::open_in_memory().unwrap();
        assert!(store.append_play(42, Utc::now()).is_err());
    }

    #[test]
    fn test_event_timestamps_are_monotonic_per_song() {
        let mut store = SqliteCatalog::open_in_memory().unwrap();
        store.save_imported(&[new_song("a", 0)]).unwrap();
        let id = store.find_song("a").unwrap().unwrap().id;

        let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        store.append_play(id, now).unwrap();
        // Clock stepped backwards.
        store.append_play(id, now - Duration::hours(1)).unwrap();

        let events = store.play_events(id).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].timestamp, now);
        assert_eq!(events[1].timestamp, now);
    }

    #[test]
    fn test_rank_storage_is_per_filter() {
        let mut store = SqliteCatalog::open_in_memory().unwrap();
        store.save_imported(&[new_song("a", 1), new_song("b", 2)]).unwrap();
        let a = store.find_song("a").unwrap().unwrap().id;
        let b = store.find_song("b").unwrap().unwrap().id;

        let update = |song_id, rank| RankUpdate {
            song_id,
            last_known_rank: rank,
            previous_rank: None,
        };
        store
            .save_ranks(TimeFilter::AllTime, &[update(b, 1), update(a, 2)], &[])
            .unwrap();
        store.save_ranks(TimeFilter::ThisWeek, &[update(a, 1)], &[b]).unwrap();

        let all_time = store.ranks(TimeFilter::AllTime).unwrap();
        assert_eq!(all_time[&a].last_known_rank, Some(2));
        assert_eq!(all_time[&b].last_known_rank, Some(1));

        let week = store.ranks(TimeFilter::ThisWeek).unwrap();
        assert_eq!(week[&a].last_known_rank, Some(1));
        assert!(!week.contains_key(&b));
        assert!(store.ranks(TimeFilter::ThisYear).unwrap().is_empty());

        store.save_ranks(TimeFilter::ThisWeek, &[], &[a]).unwrap();
        assert!(store.ranks(TimeFilter::ThisWeek).unwrap().is_empty());
    }

    #[test]
    fn test_reset_cascades_to_events_and_ranks() {
        let mut store = SqliteCatalog::open_in_memory().unwrap();
        store.save_imported(&[new_song("a", 1)]).unwrap();
        let id = store.find_song("a").unwrap().unwrap().id;
        store.append_play(id, Utc::now()).unwrap();
        store
            .save_ranks(
                TimeFilter::ThisMonth,
                &[RankUpdate { song_id: id, last_known_rank: 1, previous_rank: None }],
                &[],
            )
            .unwrap();

        assert_eq!(store.reset().unwrap(), 1);
        assert_eq!(store.song_count().unwrap(), 0);
        assert!(store.play_events(id).unwrap().is_empty());
        assert!(store.ranks(TimeFilter::ThisMonth).unwrap().is_empty());
    }

    #[test]
    fn test_pass_holds_the_catalog_against_other_connections() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("catalog.db");
        let mut daemon = SqliteCatalog::open(&path).unwrap();
        daemon.save_imported(&[new_song("a", 1)]).unwrap();
        let id = daemon.find_song("a").unwrap().unwrap().id;

        let mut viewer = SqliteCatalog::open(&path).unwrap();
        viewer.conn.busy_timeout(std::time::Duration::from_millis(50)).unwrap();

        daemon.begin_pass().unwrap();
        assert!(viewer.begin_pass().is_err());
        let update = RankUpdate {
            song_id: id,
            last_known_rank: 1,
            previous_rank: None,
        };
        daemon.save_ranks(TimeFilter::AllTime, &[update], &[]).unwrap();
        daemon.end_pass(true).unwrap();

        viewer.begin_pass().unwrap();
        assert_eq!(viewer.ranks(TimeFilter::AllTime).unwrap()[&id].last_known_rank, Some(1));
        viewer.end_pass(false).unwrap();
    }

    #[test]
    fn test_rolled_back_pass_discards_saved_ranks() {
        let mut store = SqliteCatalog::open_in_memory().unwrap();
        store.save_imported(&[new_song("a", 1)]).unwrap();
        let id = store.find_song("a").unwrap().unwrap().id;

        store.begin_pass().unwrap();
        store
            .save_ranks(
                TimeFilter::ThisYear,
                &[RankUpdate { song_id: id, last_known_rank: 1, previous_rank: None }],
                &[],
            )
            .unwrap();
        store.end_pass(false).unwrap();
        assert!(store.ranks(TimeFilter::ThisYear).unwrap().is_empty());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("catalog.db");
        {
            let mut store = SqliteCatalog::open(&path).unwrap();
            store.save_imported(&[new_song("kept", 5)]).unwrap();
        }
        let store = SqliteCatalog::open(&path).unwrap();
        assert_eq!(store.song_count().unwrap(), 1);
        assert_eq!(store.find_song("kept").unwrap().unwrap().baseline_play_count, 5);
    }
}
