//! # Bulk Importer
//!
//! Seeds an empty catalog from the playback source's full listing. Each
//! item's counter becomes the song's baseline; local counts start at zero.
//!
//! Items are saved in batches of [`DEFAULT_IMPORT_BATCH_SIZE`] so a huge
//! library does not sit in one giant transaction, and the worker yields
//! between batches. Items missing a title or artist are skipped and counted.

use crate::db::{CatalogStore, NewSong};
use crate::error::{ChartError, Result};
use crate::ingestion::require_metadata;
use crate::mpd_client::{PlaybackSource, SourceItem};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Items persisted per transaction.
pub const DEFAULT_IMPORT_BATCH_SIZE: usize = 50;

/// Progress counters shared with whoever started the import.
#[derive(Debug, Clone, Default)]
pub struct ImportProgress {
    processed: Arc<AtomicUsize>,
    total: Arc<AtomicUsize>,
}

impl ImportProgress {
    #[must_use]
    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    /// Completed fraction in `[0, 1]`. Zero until the listing is known.
    #[must_use]
    pub fn fraction(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => (self.processed() as f64 / total as f64).min(1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub batches_saved: usize,
    /// The catalog already had songs, nothing was done.
    pub already_populated: bool,
}

#[derive(Debug)]
pub struct BulkImporter {
    batch_size: usize,
    progress: ImportProgress,
}

impl Default for BulkImporter {
    fn default() -> Self {
        Self::new(DEFAULT_IMPORT_BATCH_SIZE)
    }
}

impl BulkImporter {
    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            progress: ImportProgress::default(),
        }
    }

    /// Handle for observing this importer's progress from another thread.
    #[must_use]
    pub fn progress(&self) -> ImportProgress {
        self.progress.clone()
    }

    /// Import every item from `source` into `store` if the store is empty.
    pub fn run<P, S>(&self, source: &P, store: &mut S) -> Result<ImportReport>
    where
        P: PlaybackSource + ?Sized,
        S: CatalogStore + ?Sized,
    {
        if store.song_count()? > 0 {
            debug!("Catalog already populated, skipping import");
            return Ok(ImportReport {
                already_populated: true,
                ..Default::default()
            });
        }

        if !source.is_authorized() {
            return Err(ChartError::NotAuthorized(
                "the playback source refused access to its library".to_string(),
            ));
        }

        let items = source.list_items()?;
        if items.is_empty() {
            return Err(ChartError::SourceUnavailable(
                "the playback source returned an empty library".to_string(),
            ));
        }
        self.progress.total.store(items.len(), Ordering::Relaxed);
        info!("Importing {} items in batches of {}", items.len(), self.batch_size);

        let mut report = ImportReport::default();
        let mut pending = Vec::with_capacity(self.batch_size);
        for item in &items {
            match to_new_song(item) {
                Ok(song) => pending.push(song),
                Err(e) => {
                    debug!("{e}");
                    report.skipped += 1;
                }
            }
            self.progress.processed.fetch_add(1, Ordering::Relaxed);

            if pending.len() >= self.batch_size {
                report.imported += store.save_imported(&pending)?;
                report.batches_saved += 1;
                pending.clear();
                std::thread::yield_now();
            }
        }

        // Always flush, even an empty tail, so the last batch boundary is a save.
        report.imported += store.save_imported(&pending)?;
        report.batches_saved += 1;

        if report.skipped > 0 {
            warn!("Skipped {} items without a title or artist", report.skipped);
        }
        info!(
            "Imported {} songs in {} batches",
            report.imported, report.batches_saved
        );
        Ok(report)
    }
}

fn to_new_song(item: &SourceItem) -> Result<NewSong> {
    let (title, artist) = require_metadata(item)?;
    Ok(NewSong {
        external_id: item.external_id.clone(),
        title,
        artist,
        album: item.album.clone(),
        baseline_play_count: item.play_count,
        local_play_count: 0,
        artwork: item.artwork.clone(),
    })
}
