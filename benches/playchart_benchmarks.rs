//! # Playchart Performance Benchmarks
//!
//! Benchmarks for the hot paths of a play: windowed aggregation and the
//! full ranking pass that follows every ingestion.
//!
//! ## Benchmark Categories
//!
//! - **Aggregation**: Bulk windowed counts over catalogs of growing size
//! - **Ranking**: Complete all-time and windowed passes, including the save
//! - **Ingestion**: One detected play end to end (log, rank, notify check)
//!
//! ## Running Benchmarks
//!
//! ```bash
//! cargo bench
//! cargo bench ranking
//! ```

use chrono::{DateTime, Duration, Utc};
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use playchart::aggregation::{windowed_counts, TimeFilter};
use playchart::db::{CatalogStore, NewSong, SqliteCatalog};
use playchart::ingestion::ingest_and_rank;
use playchart::mpd_client::SourceItem;
use playchart::notification::Notifier;
use playchart::ranking::{rank_pass, RankingOptions};
use std::hint::black_box;

struct Silent;

impl Notifier for Silent {
    fn deliver(&self, _message: &str) {}
}

/// Catalog of `size` songs with varied baselines and a spread of recent plays.
fn create_benchmark_catalog(size: usize, now: DateTime<Utc>) -> SqliteCatalog {
    let mut store = SqliteCatalog::open_in_memory().expect("Failed to open catalog");
    let songs: Vec<NewSong> = (0..size)
        .map(|i| NewSong {
            external_id: format!("artist{}/album{}/track{i:05}.flac", i % 97, i % 13),
            title: format!("Track {i}"),
            artist: format!("Artist {}", i % 97),
            album: Some(format!("Album {}", i % 13)),
            baseline_play_count: ((i * 7919) % 500) as u32,
            local_play_count: 0,
            artwork: None,
        })
        .collect();
    store.save_imported(&songs).expect("Failed to seed catalog");

    let ids: Vec<i64> = store
        .all_songs()
        .expect("Failed to list songs")
        .iter()
        .map(|s| s.id)
        .collect();
    for (i, id) in ids.iter().enumerate().step_by(3) {
        for day in 0..(i % 5) {
            let at = now - Duration::days((day * 20) as i64);
            store.append_play(*id, at).expect("Failed to log play");
        }
    }
    store
}

/// Benchmark windowed aggregation
fn benchmark_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregation");
    let now = Utc::now();

    for size in [100, 1000, 5000] {
        let store = create_benchmark_catalog(size, now);
        let songs = store.all_songs().expect("Failed to list songs");

        for filter in [TimeFilter::AllTime, TimeFilter::ThisMonth] {
            group.bench_with_input(
                BenchmarkId::new(filter.as_str(), size),
                &songs,
                |b, songs| {
                    b.iter(|| windowed_counts(&store, black_box(songs), filter, now))
                },
            );
        }
    }

    group.finish();
}

/// Benchmark full ranking passes
fn benchmark_ranking(c: &mut Criterion) {
    let mut group = c.benchmark_group("ranking");
    group.sample_size(20);
    let now = Utc::now();
    let options = RankingOptions::default();

    for size in [100, 1000, 5000] {
        for filter in [TimeFilter::AllTime, TimeFilter::ThisYear] {
            group.bench_function(BenchmarkId::new(filter.as_str(), size), |b| {
                b.iter_batched(
                    || create_benchmark_catalog(size, now),
                    |mut store| rank_pass(&mut store, black_box(filter), now, &options, None),
                    BatchSize::LargeInput,
                )
            });
        }
    }

    group.finish();
}

/// Benchmark a single detected play end to end
fn benchmark_ingestion(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingestion");
    let now = Utc::now();
    let options = RankingOptions::default();
    let item = SourceItem {
        external_id: "artist0/album0/track00000.flac".to_string(),
        title: Some("Track 0".to_string()),
        artist: Some("Artist 0".to_string()),
        ..Default::default()
    };

    let mut store = create_benchmark_catalog(1000, now);
    group.bench_function("play_1000_song_catalog", |b| {
        b.iter(|| ingest_and_rank(&mut store, black_box(&item), &Silent, &options, Utc::now()))
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_aggregation,
    benchmark_ranking,
    benchmark_ingestion
);

criterion_main!(benches);
