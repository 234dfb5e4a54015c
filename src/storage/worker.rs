//! Asynchronous persistence worker.
//!
//! A single writer task owns the store's write handle and drains a bounded
//! task queue. Producers on the tick path never block: a full queue drops
//! the write with a warning, which is safe because every write is an
//! upsert keyed by datetime and the next tick in the same bucket re-emits
//! the document.
//!
//! Shutdown is cooperative: a sentinel task is enqueued behind any
//! in-flight writes, and the worker exits after processing it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, warn};

use crate::storage::docs::{KlineDocument, TickDocument};
use crate::storage::DocumentStore;

/// Default bound of the write queue.
pub const DEFAULT_QUEUE_SIZE: usize = 10_000;

/// A unit of work for the writer.
pub enum Task {
    UpsertTick {
        database: &'static str,
        collection: String,
        tick: TickDocument,
    },
    UpsertKline {
        database: &'static str,
        collection: String,
        kline: KlineDocument,
    },
    /// Drains the queue up to this point, then stops the worker.
    Shutdown,
}

/// Write-pipeline counters.
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub ticks_written: AtomicU64,
    pub klines_written: AtomicU64,
    pub tasks_dropped: AtomicU64,
    pub write_failures: AtomicU64,
}

/// Cloneable producer side of the write pipeline.
#[derive(Clone)]
pub struct PersistHandle {
    tx: mpsc::Sender<Task>,
    stats: Arc<WorkerStats>,
}

impl PersistHandle {
    /// Enqueue a tick upsert (non-blocking).
    pub fn upsert_tick(&self, database: &'static str, collection: &str, tick: TickDocument) {
        self.post(Task::UpsertTick {
            database,
            collection: collection.to_string(),
            tick,
        });
    }

    /// Enqueue a bar upsert (non-blocking).
    pub fn upsert_kline(&self, database: &'static str, collection: &str, kline: KlineDocument) {
        self.post(Task::UpsertKline {
            database,
            collection: collection.to_string(),
            kline,
        });
    }

    fn post(&self, task: Task) {
        match self.tx.try_send(task) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.stats.tasks_dropped.fetch_add(1, Ordering::Relaxed);
                warn!("persistence queue full, dropping write");
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.tasks_dropped.fetch_add(1, Ordering::Relaxed);
                warn!("persistence worker gone, dropping write");
            }
        }
    }
}

/// The background writer and its lifecycle.
pub struct PersistWorker {
    tx: mpsc::Sender<Task>,
    stats: Arc<WorkerStats>,
    join: tokio::task::JoinHandle<()>,
}

impl PersistWorker {
    /// Spawn the writer task. The store handle passed here must be the
    /// writer's own; hydration reads go through a separate handle.
    pub fn spawn(store: Arc<dyn DocumentStore>, queue_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_size);
        let stats = Arc::new(WorkerStats::default());
        let join = tokio::spawn(run_writer(store, rx, Arc::clone(&stats)));
        PersistWorker { tx, stats, join }
    }

    pub fn handle(&self) -> PersistHandle {
        PersistHandle {
            tx: self.tx.clone(),
            stats: Arc::clone(&self.stats),
        }
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Stop the worker: everything enqueued before the sentinel is
    /// written, then the task exits.
    pub async fn shutdown(self) {
        let _ = self.tx.send(Task::Shutdown).await;
        let _ = self.join.await;
    }
}

async fn run_writer(
    store: Arc<dyn DocumentStore>,
    mut rx: mpsc::Receiver<Task>,
    stats: Arc<WorkerStats>,
) {
    while let Some(task) = rx.recv().await {
        match task {
            Task::UpsertTick {
                database,
                collection,
                tick,
            } => match store.upsert_tick(database, &collection, &tick) {
                Ok(()) => {
                    stats.ticks_written.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    stats.write_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, collection, "tick upsert failed, task discarded");
                }
            },
            Task::UpsertKline {
                database,
                collection,
                kline,
            } => match store.upsert_kline(database, &collection, &kline) {
                Ok(()) => {
                    stats.klines_written.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    stats.write_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, collection, "kline upsert failed, task discarded");
                }
            },
            Task::Shutdown => break,
        }
    }
    info!("persistence worker shut down");
}
