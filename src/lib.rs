//! Personal most-played charts built from MPD play counts.
//!
//! MPD only keeps a cumulative play counter per song (the `playCount`
//! sticker). Playchart watches that counter, turns every increase into a
//! timestamped play, and ranks the catalog for four windows: all time, this
//! week, this month and this year. When the song that was just played moves
//! in the all-time chart, a notification says so.
//!
//! Core modules:
//! - [`detector`] - Edge detection over the cumulative counter
//! - [`ingestion`] - Persisting detected plays
//! - [`aggregation`] - Windowed play counts
//! - [`ranking`] - Dense ranks with one-step history
//! - [`notification`] - Rank-change messages and delivery
//! - [`importer`] - One-time catalog seeding
//! - [`coordinator`] - The single thread that owns the catalog
//! - [`daemon`] - Background play tracking
//!
//! ### Supporting Modules
//!
//! - [`db`] - SQLite catalog store
//! - [`mpd_client`] - MPD access through `mpc`
//! - [`song`] - Song, play event and rank change types
//! - [`error`] - Library error kinds
//! - [`config`] - Data directory and `config.json`
//! - [`cli`] - Command-line interface definitions with clap integration
//! - [`completion`] - Shell completion generation
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use playchart::aggregation::TimeFilter;
//! use playchart::coordinator::Coordinator;
//! use playchart::db::SqliteCatalog;
//! use playchart::mpd_client::MpcSource;
//! use playchart::notification::LogNotifier;
//! use playchart::ranking::RankingOptions;
//! use std::sync::Arc;
//!
//! let store = SqliteCatalog::open(&playchart::config::get_db_path()?)?;
//! let coordinator = Coordinator::spawn(store, Box::new(LogNotifier), RankingOptions::default());
//!
//! // Seed the catalog from MPD, then rank this week's plays
//! let (_progress, imported) = coordinator.import(Arc::new(MpcSource::default()), 50);
//! playchart::coordinator::wait(&imported)?;
//! print!("{}", coordinator.get_ranked(TimeFilter::ThisWeek)?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Counting Rules
//!
//! - **Baseline**: plays that happened before tracking began; counted for
//!   all time only, since they have no date
//! - **Local**: plays detected by playchart, each stored as a timestamped event
//! - **All time** ranks by baseline + local; the other windows rank by events
//!   inside the window and leave out songs with none
//!
//! ## Error Handling
//!
//! Library functions return [`error::Result`]; the binary wraps them in
//! `anyhow` with context.

pub mod aggregation;
pub mod cli;
pub mod completion;
pub mod config;
pub mod coordinator;
pub mod daemon;
pub mod db;
pub mod detector;
pub mod error;
pub mod importer;
pub mod ingestion;
pub mod mpd_client;
pub mod notification;
pub mod ranking;
pub mod song;
