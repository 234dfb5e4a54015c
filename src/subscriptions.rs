//! Bar-completion subscriptions.
//!
//! Callbacks register per (symbol, period) and fire synchronously on the
//! tick-processing thread, in registration order, whenever a bar of that
//! period seals. A panicking callback is logged and isolated; its
//! siblings still run and tick processing continues.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::error;

use crate::kline::bar::KLine;
use crate::kline::period::Period;

/// Callback invoked with the completed bar.
pub type KlineCallback = Box<dyn Fn(&KLine) + Send>;

/// Identity of one registration; removal is by handle, not by comparing
/// callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    symbol: String,
    period: Period,
    slot: u64,
}

impl SubscriptionHandle {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn period(&self) -> Period {
        self.period
    }
}

/// symbol -> period -> ordered callback list.
#[derive(Default)]
pub struct SubscriptionRegistry {
    listeners: HashMap<String, HashMap<Period, Vec<(u64, KlineCallback)>>>,
    next_slot: u64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &mut self,
        symbol: &str,
        period: Period,
        callback: KlineCallback,
    ) -> SubscriptionHandle {
        let symbol = symbol.trim().to_uppercase();
        let slot = self.next_slot;
        self.next_slot += 1;
        self.listeners
            .entry(symbol.clone())
            .or_default()
            .entry(period)
            .or_default()
            .push((slot, callback));
        SubscriptionHandle { symbol, period, slot }
    }

    /// Remove one registration. Returns false when the handle no longer
    /// resolves.
    pub fn unsubscribe(&mut self, handle: &SubscriptionHandle) -> bool {
        let Some(by_period) = self.listeners.get_mut(&handle.symbol) else {
            return false;
        };
        let Some(callbacks) = by_period.get_mut(&handle.period) else {
            return false;
        };
        let before = callbacks.len();
        callbacks.retain(|(slot, _)| *slot != handle.slot);
        before != callbacks.len()
    }

    /// Invoke every callback registered for the bar's symbol and period.
    pub fn dispatch(&self, period: Period, kline: &KLine) {
        let Some(callbacks) = self
            .listeners
            .get(&kline.symbol)
            .and_then(|by_period| by_period.get(&period))
        else {
            return;
        };
        for (slot, callback) in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(kline))).is_err() {
                error!(
                    symbol = %kline.symbol,
                    period = %period,
                    slot,
                    "kline completion callback panicked"
                );
            }
        }
    }

    pub fn listener_count(&self, symbol: &str, period: Period) -> usize {
        self.listeners
            .get(&symbol.trim().to_uppercase())
            .and_then(|by_period| by_period.get(&period))
            .map_or(0, |callbacks| callbacks.len())
    }
}
