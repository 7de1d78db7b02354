//! # Coordinator
//!
//! One worker thread owns the catalog store. Everything that touches it, from
//! play ingestion and chart passes to imports and resets, is sent to that
//! thread as a [`Job`] and answered on a one-shot reply channel.
//!
//! ```text
//!  daemon ──record_play──┐
//!  chart  ──on_filter────┼──> mpsc ──> worker (owns store) ──> reply channels
//!  import ──import───────┘
//! ```
//!
//! Jobs run strictly in submission order, which makes ingestion sequential:
//! every play is logged, ranked and checked for a notification before the
//! next one starts. Chart passes started through
//! [`Coordinator::on_filter_changed`] are the exception: a newer request
//! cancels the pending one, whether it is still queued or already running.

use crate::aggregation::TimeFilter;
use crate::db::CatalogStore;
use crate::error::{ChartError, Result};
use crate::importer::{BulkImporter, ImportProgress, ImportReport};
use crate::ingestion::{ingest_and_rank, PlayReport};
use crate::mpd_client::{PlaybackSource, SourceItem};
use crate::notification::Notifier;
use crate::ranking::{rank_pass, CancelToken, RankedChart, RankingOptions};
use chrono::Utc;
use log::{debug, error, warn};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// Work item for the store-owning thread.
pub enum Job {
    Play {
        item: SourceItem,
        reply: Sender<Result<PlayReport>>,
    },
    Chart {
        filter: TimeFilter,
        cancel: Option<CancelToken>,
        reply: Sender<Result<RankedChart>>,
    },
    Import {
        source: Arc<dyn PlaybackSource + Send + Sync>,
        importer: BulkImporter,
        reply: Sender<Result<ImportReport>>,
    },
    Reset {
        reply: Sender<Result<u64>>,
    },
    Shutdown,
}

pub struct Coordinator {
    jobs: Sender<Job>,
    pending_chart: Mutex<Option<CancelToken>>,
    worker: Option<JoinHandle<()>>,
}

impl Coordinator {
    /// Move `store` onto a new worker thread and start serving jobs.
    pub fn spawn<S>(store: S, notifier: Box<dyn Notifier + Send>, options: RankingOptions) -> Self
    where
        S: CatalogStore + Send + 'static,
    {
        let (jobs, queue) = mpsc::channel();
        let worker = thread::spawn(move || run_worker(store, notifier.as_ref(), options, queue));

        Self {
            jobs,
            pending_chart: Mutex::new(None),
            worker: Some(worker),
        }
    }

    fn submit(&self, job: Job) {
        // A dead worker drops the reply sender with the job, so the caller's
        // receive fails and surfaces `CoordinatorStopped`.
        if self.jobs.send(job).is_err() {
            warn!("Catalog worker has exited, job dropped");
        }
    }

    /// Queue a detected play. Runs ingestion, an all-time pass and the
    /// notification check for the played song.
    pub fn record_play(&self, item: SourceItem) -> Receiver<Result<PlayReport>> {
        let (reply, answer) = mpsc::channel();
        self.submit(Job::Play { item, reply });
        answer
    }

    /// Start a chart pass for `filter`, cancelling any pass started by a
    /// previous call that has not finished yet.
    pub fn on_filter_changed(&self, filter: TimeFilter) -> Receiver<Result<RankedChart>> {
        let token = CancelToken::new();
        let superseded = self
            .pending_chart
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone());
        if let Some(previous) = superseded {
            debug!("Cancelling superseded chart pass");
            previous.cancel();
        }

        let (reply, answer) = mpsc::channel();
        self.submit(Job::Chart {
            filter,
            cancel: Some(token),
            reply,
        });
        answer
    }

    /// Compute the chart for `filter` and wait for it. Not cancellable.
    pub fn get_ranked(&self, filter: TimeFilter) -> Result<RankedChart> {
        let (reply, answer) = mpsc::channel();
        self.submit(Job::Chart {
            filter,
            cancel: None,
            reply,
        });
        wait(&answer)
    }

    /// Start a bulk import on the worker. Progress can be polled while the
    /// receiver is pending.
    pub fn import(
        &self,
        source: Arc<dyn PlaybackSource + Send + Sync>,
        batch_size: usize,
    ) -> (ImportProgress, Receiver<Result<ImportReport>>) {
        let importer = BulkImporter::new(batch_size);
        let progress = importer.progress();
        let (reply, answer) = mpsc::channel();
        self.submit(Job::Import {
            source,
            importer,
            reply,
        });
        (progress, answer)
    }

    /// Delete every song and its history. Returns the number of songs removed.
    pub fn reset(&self) -> Result<u64> {
        let (reply, answer) = mpsc::channel();
        self.submit(Job::Reset { reply });
        wait(&answer)
    }

    /// Finish queued jobs and stop the worker.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.submit(Job::Shutdown);
        if worker.join().is_err() {
            error!("Catalog worker panicked");
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Block on a reply channel.
pub fn wait<T>(answer: &Receiver<Result<T>>) -> Result<T> {
    answer.recv().map_err(|_| ChartError::CoordinatorStopped)?
}

fn run_worker<S, N>(mut store: S, notifier: &N, options: RankingOptions, queue: Receiver<Job>)
where
    S: CatalogStore,
    N: Notifier + ?Sized,
{
    debug!("Catalog worker started");
    for job in queue {
        match job {
            Job::Play { item, reply } => {
                let result = ingest_and_rank(&mut store, &item, notifier, &options, Utc::now());
                if let Err(e) = &result {
                    error!("Failed to record play of `{}': {e}", item.external_id);
                }
                let _ = reply.send(result);
            }
            Job::Chart {
                filter,
                cancel,
                reply,
            } => {
                let result = rank_pass(&mut store, filter, Utc::now(), &options, cancel.as_ref());
                match &result {
                    Err(ChartError::Cancelled) => debug!("Chart pass for {filter} cancelled"),
                    Err(e) => error!("Chart pass for {filter} failed: {e}"),
                    Ok(chart) => debug!("Chart for {filter}: {} entries", chart.entries.len()),
                }
                let _ = reply.send(result);
            }
            Job::Import {
                source,
                importer,
                reply,
            } => {
                let _ = reply.send(importer.run(source.as_ref(), &mut store));
            }
            Job::Reset { reply } => {
                let _ = reply.send(store.reset());
            }
            Job::Shutdown => break,
        }
    }
    debug!("Catalog worker stopped");
}
