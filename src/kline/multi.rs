//! Multi-period K-line generation.
//!
//! One instance fans each accepted tick out to a set of single-period
//! generators, derives the tick's own volume from the cumulative daily
//! counter, and feeds the write pipeline with tick and bar documents,
//! including duplicates under the product's active continuous-contract
//! alias.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use chrono::{Local, NaiveDateTime};
use tracing::warn;

use crate::kline::generator::{KlineGenerator, KlineUpdate};
use crate::kline::period::{Period, TICK_DATABASE};
use crate::kline::KLine;
use crate::market::session::TimelineRegistry;
use crate::market::tick::Tick;
use crate::storage::docs::{KlineDocument, TickDocument};
use crate::storage::{DocumentStore, PersistHandle};

/// Generates bars at every configured period from one tick stream.
pub struct MultiKlineGenerator {
    generators: BTreeMap<Period, KlineGenerator>,
    registry: Arc<TimelineRegistry>,
    recording_tick: bool,
    /// Ticks older than this are discarded outright.
    datetime_guard: NaiveDateTime,
    /// symbol -> last seen cumulative daily volume.
    last_daily_volumes: HashMap<String, i64>,
    persist: Option<PersistHandle>,
}

impl MultiKlineGenerator {
    /// `ignore_past` pins the guard to construction time so that stale
    /// ticks replayed by the feed on connect are not aggregated twice.
    pub fn new(
        periods: &[Period],
        registry: Arc<TimelineRegistry>,
        reader_store: Arc<dyn DocumentStore>,
        persist: Option<PersistHandle>,
        recording_tick: bool,
        ignore_past: bool,
    ) -> Self {
        let generators = periods
            .iter()
            .map(|&p| {
                (
                    p,
                    KlineGenerator::new(p, Arc::clone(&registry), Arc::clone(&reader_store)),
                )
            })
            .collect();
        MultiKlineGenerator {
            generators,
            registry,
            recording_tick,
            datetime_guard: if ignore_past {
                Local::now().naive_local()
            } else {
                NaiveDateTime::MIN
            },
            last_daily_volumes: HashMap::new(),
            persist,
        }
    }

    /// The periods this generator produces, ascending.
    pub fn periods(&self) -> impl Iterator<Item = Period> + '_ {
        self.generators.keys().copied()
    }

    /// Process one tick.
    ///
    /// Returns `None` for ticks that are stale, outside the product's
    /// trading session, or unparseable; otherwise the per-period updates.
    /// `active_symbols` maps a contract to its continuous-contract alias;
    /// matching ticks and bars are persisted under both collections.
    ///
    /// The first tick of a symbol seeds the daily-volume map and reports
    /// `last_volume = 0`; that tick's true volume share is unknowable
    /// from the cumulative counter alone.
    pub fn update(
        &mut self,
        tick: &mut Tick,
        active_symbols: &HashMap<String, String>,
    ) -> Result<Option<BTreeMap<Period, KlineUpdate>>> {
        let at = tick.normalize()?;
        if at < self.datetime_guard {
            return Ok(None);
        }
        if !self.registry.is_tradable(tick)? {
            return Ok(None);
        }

        // Daily cumulative volume resets across trading days; clamping the
        // difference at zero absorbs the reset.
        let previous = self
            .last_daily_volumes
            .get(&tick.symbol)
            .copied()
            .unwrap_or(tick.volume);
        tick.last_volume = (tick.volume - previous).max(0);
        self.last_daily_volumes.insert(tick.symbol.clone(), tick.volume);

        let alias = active_symbols.get(&tick.symbol).cloned();

        if self.recording_tick {
            if let Some(persist) = &self.persist {
                match TickDocument::from_tick(tick) {
                    Ok(doc) => {
                        if let Some(alias) = &alias {
                            persist.upsert_tick(TICK_DATABASE, alias, doc.clone());
                        }
                        persist.upsert_tick(TICK_DATABASE, &tick.symbol, doc);
                    }
                    Err(e) => warn!(error = %e, symbol = %tick.symbol, "tick not recorded"),
                }
            }
        }

        let mut updates = BTreeMap::new();
        for (&period, generator) in &mut self.generators {
            let update = match generator.update(tick) {
                Ok(update) => update,
                Err(e) => {
                    warn!(error = %e, symbol = %tick.symbol, period = %period, "kline update failed");
                    continue;
                }
            };
            if let Some(persist) = &self.persist {
                let doc = KlineDocument::from_kline(&update.kline);
                if let Some(alias) = &alias {
                    persist.upsert_kline(period.database(), alias, doc.clone());
                }
                persist.upsert_kline(period.database(), &tick.symbol, doc);
            }
            updates.insert(period, update);
        }
        Ok(Some(updates))
    }

    /// The most recent `count` bars of `period` for a symbol; see
    /// `KlineGenerator::last_klines`.
    pub fn last_klines(
        &mut self,
        symbol: &str,
        count: usize,
        period: Period,
        only_completed: bool,
        newest_tick_datetime: Option<NaiveDateTime>,
    ) -> Vec<KLine> {
        match self.generators.get_mut(&period) {
            Some(generator) => {
                generator.last_klines(symbol, count, only_completed, newest_tick_datetime)
            }
            None => {
                warn!(period = %period, "no generator configured for period");
                Vec::new()
            }
        }
    }
}
