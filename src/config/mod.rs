use std::path::PathBuf;
use std::time::Duration;

use chrono::{NaiveDate, TimeZone, Utc};

use crate::error::{AppError, Result};
use crate::fetch::client::DEFAULT_BASE_URL;
use crate::fetch::task::DEFAULT_REQUEST_TIMEOUT;
use crate::fetch::TimeWindow;

pub mod loader;
pub mod validator;

pub use loader::load_instruments;

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const DEFAULT_TIMEFRAME: &str = "1h";
pub const DEFAULT_PAIRS_FILE: &str = "pairs.csv";
pub const DEFAULT_CACHE_DIR: &str = "cached-data";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Kline intervals accepted by the futures endpoint.
pub const SUPPORTED_TIMEFRAMES: &[&str] = &[
    "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w", "1M",
];

/// Effective settings for one run, after file values and command-line overrides are merged.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub timeframe: String,
    pub pairs_file: PathBuf,
    /// `None` lets the discovered rate-limit policy pick the pool size.
    pub threads: Option<usize>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub cache_dir: PathBuf,
    pub base_url: String,
    pub request_timeout: Duration,
    pub probe_rate_limits: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeframe: DEFAULT_TIMEFRAME.to_string(),
            pairs_file: PathBuf::from(DEFAULT_PAIRS_FILE),
            threads: None,
            start_date: None,
            end_date: None,
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            probe_rate_limits: true,
        }
    }
}

/// Values supplied on the command line; each one replaces the file value when present.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub timeframe: Option<String>,
    pub pairs_file: Option<PathBuf>,
    pub threads: Option<usize>,
}

impl Config {
    pub fn apply(mut self, overrides: Overrides) -> Self {
        if let Some(timeframe) = overrides.timeframe {
            self.timeframe = timeframe;
        }
        if let Some(pairs_file) = overrides.pairs_file {
            self.pairs_file = pairs_file;
        }
        if overrides.threads.is_some() {
            self.threads = overrides.threads;
        }
        self
    }

    pub fn end_date(&self) -> Result<NaiveDate> {
        self.end_date
            .ok_or_else(|| AppError::invalid_input("`end_date` is not configured"))
    }

    /// Window from midnight UTC of `start_date` to midnight UTC of `end_date`.
    pub fn time_window(&self) -> Result<TimeWindow> {
        let start = self
            .start_date
            .ok_or_else(|| AppError::invalid_input("`start_date` is not configured"))?;
        let end = self.end_date()?;
        TimeWindow::new(midnight_utc(start)?, midnight_utc(end)?)
    }
}

fn midnight_utc(date: NaiveDate) -> Result<chrono::DateTime<Utc>> {
    let naive = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| AppError::message("Unable to construct timestamp from date"))?;
    Ok(Utc.from_utc_datetime(&naive))
}
