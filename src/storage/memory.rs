//! In-memory document store, used by tests and as a null store for runs
//! that do not persist.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use chrono::NaiveDateTime;
use parking_lot::Mutex;

use crate::storage::docs::{KlineDocument, TickDocument};
use crate::storage::DocumentStore;

type CollectionKey = (String, String);

#[derive(Default)]
struct Collections {
    ticks: HashMap<CollectionKey, BTreeMap<NaiveDateTime, TickDocument>>,
    klines: HashMap<CollectionKey, BTreeMap<NaiveDateTime, KlineDocument>>,
}

#[derive(Default)]
pub struct MemoryDocumentStore {
    inner: Mutex<Collections>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kline_count(&self, database: &str, collection: &str) -> usize {
        self.inner
            .lock()
            .klines
            .get(&key(database, collection))
            .map_or(0, |m| m.len())
    }

    pub fn tick_count(&self, database: &str, collection: &str) -> usize {
        self.inner
            .lock()
            .ticks
            .get(&key(database, collection))
            .map_or(0, |m| m.len())
    }

    pub fn get_kline(
        &self,
        database: &str,
        collection: &str,
        datetime: NaiveDateTime,
    ) -> Option<KlineDocument> {
        self.inner
            .lock()
            .klines
            .get(&key(database, collection))
            .and_then(|m| m.get(&datetime))
            .cloned()
    }
}

fn key(database: &str, collection: &str) -> CollectionKey {
    (database.to_string(), collection.to_string())
}

impl DocumentStore for MemoryDocumentStore {
    fn upsert_tick(&self, database: &str, collection: &str, tick: &TickDocument) -> Result<()> {
        self.inner
            .lock()
            .ticks
            .entry(key(database, collection))
            .or_default()
            .insert(tick.datetime, tick.clone());
        Ok(())
    }

    fn upsert_kline(&self, database: &str, collection: &str, kline: &KlineDocument) -> Result<()> {
        self.inner
            .lock()
            .klines
            .entry(key(database, collection))
            .or_default()
            .insert(kline.datetime, kline.clone());
        Ok(())
    }

    fn find_last_klines(
        &self,
        database: &str,
        collection: &str,
        count: usize,
        before: NaiveDateTime,
    ) -> Result<Vec<KlineDocument>> {
        let inner = self.inner.lock();
        let Some(collection) = inner.klines.get(&key(database, collection)) else {
            return Ok(Vec::new());
        };
        Ok(collection
            .range(..before)
            .rev()
            .take(count)
            .map(|(_, doc)| doc.clone())
            .collect())
    }
}
