//! Tick-to-K-line aggregation core for Chinese futures market data.
//!
//! The engine consumes a stream of ticks, filters each against its
//! product's exchange trading sessions, aggregates the survivors into
//! OHLCV bars at every configured period (1 minute up to daily), notifies
//! completion subscribers when a bar seals, and persists ticks and bars
//! through an asynchronous, bounded write pipeline.
//!
//! Entry point: [`RecorderEngine`]. Feed it ticks, subscribe to bar
//! completions, query recent bars, shut it down when the feed stops.

pub mod config;
pub mod engine;
pub mod kline;
pub mod market;
pub mod storage;
pub mod subscriptions;

pub use config::RecorderConfig;
pub use engine::{EngineOptions, RecorderEngine};
pub use kline::{KLine, KlineUpdate, MultiKlineGenerator, Period};
pub use market::{Exchange, Tick, TimelineRegistry};
pub use storage::{DocumentStore, MemoryDocumentStore, SqliteDocumentStore};
pub use subscriptions::{KlineCallback, SubscriptionHandle, SubscriptionRegistry};
