use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};

/// Exchange symbol identifying one series to fetch, e.g. `BTCUSDT`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instrument(String);

impl Instrument {
    pub fn new(symbol: impl AsRef<str>) -> Result<Self> {
        let trimmed = symbol.as_ref().trim();
        if trimmed.is_empty() {
            return Err(AppError::invalid_input("instrument symbol must not be empty"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Closed batch window shared by every task: candles opening at `end` are included.
/// `start < end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(AppError::invalid_input(format!(
                "time window start {} must be before end {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn start_ms(&self) -> i64 {
        self.start.timestamp_millis()
    }

    pub fn end_ms(&self) -> i64 {
        self.end.timestamp_millis()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleColor {
    Up,
    Down,
}

impl CandleColor {
    /// Ties resolve to `Down`.
    pub fn from_prices(open: f64, close: f64) -> Self {
        if close > open {
            CandleColor::Up
        } else {
            CandleColor::Down
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CandleColor::Up => "up",
            CandleColor::Down => "down",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label.trim() {
            "up" => Some(CandleColor::Up),
            "down" => Some(CandleColor::Down),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub color: CandleColor,
}

impl Candle {
    pub fn new(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            color: CandleColor::from_prices(open, close),
        }
    }
}

/// Candles for one instrument in strictly increasing timestamp order. May be empty.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleSeries {
    pub instrument: Instrument,
    pub candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new(instrument: Instrument, candles: Vec<Candle>) -> Result<Self> {
        if let Some(pair) = candles
            .windows(2)
            .find(|pair| pair[0].timestamp >= pair[1].timestamp)
        {
            return Err(AppError::message(format!(
                "candle timestamps for {} are not strictly increasing at {}",
                instrument,
                pair[1].timestamp.to_rfc3339()
            )));
        }
        Ok(Self {
            instrument,
            candles,
        })
    }

    pub fn empty(instrument: Instrument) -> Self {
        Self {
            instrument,
            candles: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Network,
    Timeout,
    Status,
    MalformedPayload,
    InvalidNumber,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::Network => "network",
            FailureKind::Timeout => "timeout",
            FailureKind::Status => "status",
            FailureKind::MalformedPayload => "malformed payload",
            FailureKind::InvalidNumber => "invalid number",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Captured per-instrument failure. No retries are attempted once one of these exists.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchFailure {
    pub instrument: Instrument,
    pub kind: FailureKind,
    pub reason: String,
}

impl FetchFailure {
    pub fn new(instrument: Instrument, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            instrument,
            kind,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.instrument, self.kind, self.reason)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success(CandleSeries),
    Failure(FetchFailure),
}

impl FetchOutcome {
    pub fn instrument(&self) -> &Instrument {
        match self {
            FetchOutcome::Success(series) => &series.instrument,
            FetchOutcome::Failure(failure) => &failure.instrument,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success(_))
    }

    pub fn series(&self) -> Option<&CandleSeries> {
        match self {
            FetchOutcome::Success(series) => Some(series),
            FetchOutcome::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&FetchFailure> {
        match self {
            FetchOutcome::Success(_) => None,
            FetchOutcome::Failure(failure) => Some(failure),
        }
    }
}

/// Final keyed result of one batch. Keys are ordered so equality and iteration do not depend
/// on completion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResult {
    outcomes: BTreeMap<Instrument, FetchOutcome>,
}

impl BatchResult {
    pub(crate) fn from_map(outcomes: BTreeMap<Instrument, FetchOutcome>) -> Self {
        Self { outcomes }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn get(&self, instrument: &Instrument) -> Option<&FetchOutcome> {
        self.outcomes.get(instrument)
    }

    pub fn instruments(&self) -> impl Iterator<Item = &Instrument> {
        self.outcomes.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Instrument, &FetchOutcome)> {
        self.outcomes.iter()
    }

    pub fn successes(&self) -> impl Iterator<Item = &CandleSeries> {
        self.outcomes.values().filter_map(FetchOutcome::series)
    }

    pub fn failures(&self) -> impl Iterator<Item = &FetchFailure> {
        self.outcomes.values().filter_map(FetchOutcome::failure)
    }

    pub fn success_count(&self) -> usize {
        self.successes().count()
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }
}
