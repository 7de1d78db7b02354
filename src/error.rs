//! # Error Types
//!
//! Every library operation returns [`Result<T>`](Result) with a [`ChartError`].
//! The kinds map onto how callers are expected to react:
//!
//! - [`ChartError::NotAuthorized`] - MPD refused access; prompt for credentials
//! - [`ChartError::Persistence`] - SQLite failed; the operation was aborted
//! - [`ChartError::DataQualitySkip`] - an item lacked metadata; counted, not fatal
//! - [`ChartError::SourceUnavailable`] - MPD is unreachable or listed nothing
//! - [`ChartError::Cancelled`] - a chart pass was superseded by a newer request
//! - [`ChartError::CoordinatorStopped`] - the worker owning the catalog is gone
//!
//! Empty catalogs and empty time windows are never errors.

use thiserror::Error;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, ChartError>;

#[derive(Debug, Error)]
pub enum ChartError {
    /// Access to the playback source was denied.
    #[error("playback source refused access: {0}")]
    NotAuthorized(String),

    /// A catalog insert, fetch or save failed.
    #[error("catalog store failure: {0}")]
    Persistence(#[from] rusqlite::Error),

    /// An item is missing metadata required to become a `Song`.
    #[error("skipping `{external_id}': missing {missing}")]
    DataQualitySkip {
        external_id: String,
        missing: &'static str,
    },

    /// The playback source could not be reached or returned no items.
    #[error("playback source unavailable: {0}")]
    SourceUnavailable(String),

    /// A chart pass was cancelled before it committed.
    #[error("ranking pass cancelled")]
    Cancelled,

    /// The coordinator worker exited before answering.
    #[error("catalog worker is no longer running")]
    CoordinatorStopped,
}

impl ChartError {
    /// Per-item skips are expected noise, everything else aborts an operation.
    #[must_use]
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::DataQualitySkip { .. })
    }
}
