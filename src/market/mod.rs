//! Market-data primitives: the tick input contract, exchange identifiers,
//! trading-session timelines and the working-day calendar.

pub mod calendar;
pub mod session;
pub mod tick;

pub use calendar::{next_working_day, trading_date};
pub use session::{
    biased_minute, CffexClass, PointKind, SessionPoint, Timeline, TimelineError, TimelineRegistry,
    HOUR_BIAS,
};
pub use tick::{Exchange, Tick};
