//! K-line (candlestick) aggregation.
//!
//! Ticks that survive session filtering are bucketed into OHLCV bars at
//! every configured period. Short periods snap to the wall-clock minute
//! grid; mid periods follow a per-product bar timeline derived from the
//! trading sessions; daily bars key on the owning trading date.

pub mod bar;
pub mod bar_timeline;
pub mod generator;
pub mod multi;
pub mod period;


pub use bar::KLine;
pub use generator::{KlineGenerator, KlineUpdate, INIT_KLINE_COUNT, MAX_KLINE_COUNT};
pub use multi::MultiKlineGenerator;
pub use period::{Period, TICK_DATABASE};
