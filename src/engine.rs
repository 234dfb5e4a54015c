//! The recorder engine: the single owner of the aggregation state.
//!
//! One engine instance wires the timeline registry, the multi-period
//! generator, the persistence worker and the completion-subscription
//! registry together. Ticks enter through `on_tick` on one thread; the
//! only other thread involved is the persistence writer behind its
//! bounded queue.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{debug, warn};

use crate::config::RecorderConfig;
use crate::kline::generator::KlineUpdate;
use crate::kline::multi::MultiKlineGenerator;
use crate::kline::period::Period;
use crate::kline::KLine;
use crate::market::session::TimelineRegistry;
use crate::market::tick::Tick;
use crate::storage::worker::DEFAULT_QUEUE_SIZE;
use crate::storage::{DocumentStore, PersistWorker, WorkerStats};
use crate::subscriptions::{KlineCallback, SubscriptionHandle, SubscriptionRegistry};

/// Tunables outside the configuration file.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Discard ticks older than engine construction time.
    pub ignore_past: bool,
    /// Bound of the persistence queue.
    pub queue_size: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            ignore_past: true,
            queue_size: DEFAULT_QUEUE_SIZE,
        }
    }
}

pub struct RecorderEngine {
    generator: MultiKlineGenerator,
    worker: PersistWorker,
    subscriptions: SubscriptionRegistry,
    /// contract symbol -> active continuous-contract alias.
    active_symbols: HashMap<String, String>,
}

impl RecorderEngine {
    /// Build an engine. `writer_store` is handed to the persistence
    /// worker and must not be shared with readers; `reader_store` serves
    /// hydration queries on the tick thread.
    ///
    /// Must run inside a tokio runtime (the worker task is spawned here).
    pub fn new(
        config: RecorderConfig,
        writer_store: Arc<dyn DocumentStore>,
        reader_store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self::with_options(config, writer_store, reader_store, EngineOptions::default())
    }

    pub fn with_options(
        config: RecorderConfig,
        writer_store: Arc<dyn DocumentStore>,
        reader_store: Arc<dyn DocumentStore>,
        options: EngineOptions,
    ) -> Self {
        let registry = Arc::new(TimelineRegistry::new());
        let worker = PersistWorker::spawn(writer_store, options.queue_size);
        let generator = MultiKlineGenerator::new(
            &config.recording_kline_periods,
            registry,
            reader_store,
            Some(worker.handle()),
            config.recording_tick,
            options.ignore_past,
        );
        RecorderEngine {
            generator,
            worker,
            subscriptions: SubscriptionRegistry::new(),
            active_symbols: HashMap::new(),
        }
    }

    /// Declare `alias` the active continuous contract for `symbol`; ticks
    /// and bars of `symbol` are persisted under both collections.
    pub fn set_active_symbol(&mut self, symbol: &str, alias: &str) {
        self.active_symbols
            .insert(symbol.trim().to_uppercase(), alias.trim().to_uppercase());
    }

    pub fn clear_active_symbol(&mut self, symbol: &str) {
        self.active_symbols.remove(&symbol.trim().to_uppercase());
    }

    /// Feed one tick through aggregation, persistence and completion
    /// dispatch.
    ///
    /// Returns the per-period updates for accepted ticks, `None` for
    /// ticks that were filtered or failed. No failure propagates: a bad
    /// tick is logged and the stream continues.
    pub fn on_tick(&mut self, tick: &mut Tick) -> Option<BTreeMap<Period, KlineUpdate>> {
        let updates = match self.generator.update(tick, &self.active_symbols) {
            Ok(Some(updates)) => updates,
            Ok(None) => {
                debug!(symbol = %tick.symbol, "tick filtered");
                return None;
            }
            Err(e) => {
                warn!(error = %e, symbol = %tick.symbol, "tick dropped");
                return None;
            }
        };

        for (period, update) in &updates {
            if update.is_completed {
                self.subscriptions.dispatch(*period, &update.kline);
            }
        }
        Some(updates)
    }

    /// Register completion callbacks for a symbol, one per period.
    /// Returns one handle per registration, for later removal.
    pub fn register_kline_completed(
        &mut self,
        symbol: &str,
        callbacks: Vec<(Period, KlineCallback)>,
    ) -> Vec<SubscriptionHandle> {
        callbacks
            .into_iter()
            .map(|(period, callback)| self.subscriptions.subscribe(symbol, period, callback))
            .collect()
    }

    pub fn remove_kline_completed(&mut self, handles: &[SubscriptionHandle]) {
        for handle in handles {
            if !self.subscriptions.unsubscribe(handle) {
                warn!(
                    symbol = handle.symbol(),
                    period = %handle.period(),
                    "no such kline completion registration"
                );
            }
        }
    }

    /// The most recent `count` bars of `period` for a symbol; see
    /// `KlineGenerator::last_klines` for the completion semantics.
    pub fn last_klines(
        &mut self,
        symbol: &str,
        count: usize,
        period: Period,
        only_completed: bool,
        newest_tick_datetime: Option<NaiveDateTime>,
    ) -> Vec<KLine> {
        self.generator
            .last_klines(symbol, count, period, only_completed, newest_tick_datetime)
    }

    pub fn worker_stats(&self) -> &WorkerStats {
        self.worker.stats()
    }

    /// Stop the persistence worker after draining queued writes.
    pub async fn shutdown(self) {
        self.worker.shutdown().await;
    }
}
