//! Recorder configuration.
//!
//! Loaded from a small JSON file:
//!
//! ```json
//! { "recording_kline_periods": [1, 15, 30, 60], "recording_tick": false }
//! ```
//!
//! Periods are given in minutes (1440 selects daily bars). Any failure to
//! read or parse the file falls back to the defaults, with a warning; a
//! recorder that cannot read its configuration still records.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::kline::period::Period;

/// Periods recorded when no configuration file is usable.
pub const DEFAULT_PERIODS: [Period; 4] =
    [Period::Min1, Period::Min15, Period::Min30, Period::Min60];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecorderConfig {
    pub recording_kline_periods: Vec<Period>,
    pub recording_tick: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        RecorderConfig {
            recording_kline_periods: DEFAULT_PERIODS.to_vec(),
            recording_tick: false,
        }
    }
}

impl RecorderConfig {
    /// Read a configuration file, falling back to defaults on any error.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let parsed = std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|raw| serde_json::from_str::<RecorderConfig>(&raw).map_err(Into::into));
        match parsed {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    error = %e,
                    path = %path.display(),
                    "recorder config unusable, using defaults"
                );
                RecorderConfig::default()
            }
        }
    }
}
