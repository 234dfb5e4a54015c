//! Persistence: the document-store contract, its implementations and the
//! asynchronous write pipeline.
//!
//! The engine only relies on the upsert contract: documents are keyed by
//! their datetime within a (database, collection) pair, writes replace
//! the whole document, and reads return the newest documents before a
//! cutoff. The SQLite implementation is the one this crate ships; any
//! document store honoring the trait can be swapped in.

pub mod docs;
pub mod memory;
pub mod sqlite;
pub mod worker;

use anyhow::Result;
use chrono::NaiveDateTime;

pub use docs::{KlineDocument, TickDocument};
pub use memory::MemoryDocumentStore;
pub use sqlite::SqliteDocumentStore;
pub use worker::{PersistHandle, PersistWorker, WorkerStats};

/// The upsert contract every store backend implements.
///
/// Writes are idempotent per `(database, collection, datetime)` key, so a
/// dropped or failed write is repaired by the next write targeting the
/// same bar or tick.
pub trait DocumentStore: Send + Sync {
    /// Insert or replace a tick document, keyed by its datetime.
    fn upsert_tick(&self, database: &str, collection: &str, tick: &TickDocument) -> Result<()>;

    /// Insert or replace a bar document, keyed by its datetime.
    fn upsert_kline(&self, database: &str, collection: &str, kline: &KlineDocument) -> Result<()>;

    /// The newest `count` bar documents strictly before `before`, newest
    /// first. May return fewer than requested.
    fn find_last_klines(
        &self,
        database: &str,
        collection: &str,
        count: usize,
        before: NaiveDateTime,
    ) -> Result<Vec<KlineDocument>>;
}
