use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{AppError, Context, Result};
use crate::fetch::{Candle, CandleColor, CandleSeries, Instrument};

pub const CANDLE_HEADERS: [&str; 6] = ["time", "open", "high", "low", "close", "candle_color"];

/// Write one series as CSV, header first, one row per candle in time order. An empty series
/// still produces the header row.
pub fn save_series<P: AsRef<Path>>(series: &CandleSeries, file_path: P) -> Result<()> {
    let path = file_path.as_ref();
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create CSV writer for {}", path.display()))?;

    writer.write_record(CANDLE_HEADERS)?;
    for candle in &series.candles {
        writer.write_record(&[
            candle
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            candle.open.to_string(),
            candle.high.to_string(),
            candle.low.to_string(),
            candle.close.to_string(),
            candle.color.as_str().to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Load a series written by [`save_series`]. The color column is checked against the prices.
pub fn load_series<P: AsRef<Path>>(instrument: Instrument, file_path: P) -> Result<CandleSeries> {
    let path = file_path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let headers = reader.headers()?.clone();
    if headers.iter().map(str::trim).ne(CANDLE_HEADERS) {
        return Err(AppError::message(format!(
            "{} does not have the expected candle columns",
            path.display()
        )));
    }

    let mut candles = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let record = result.context("Failed to read CSV record")?;
        let row = index + 1;

        let timestamp = parse_time(field(&record, 0, row)?, row)?;
        let open = parse_price(field(&record, 1, row)?, "open", row)?;
        let high = parse_price(field(&record, 2, row)?, "high", row)?;
        let low = parse_price(field(&record, 3, row)?, "low", row)?;
        let close = parse_price(field(&record, 4, row)?, "close", row)?;

        let candle = Candle::new(timestamp, open, high, low, close);
        let label = field(&record, 5, row)?;
        if CandleColor::parse(label) != Some(candle.color) {
            return Err(AppError::message(format!(
                "row {row}: candle_color `{label}` does not match open {open} and close {close}"
            )));
        }
        candles.push(candle);
    }

    CandleSeries::new(instrument, candles)
}

fn field<'r>(record: &'r csv::StringRecord, index: usize, row: usize) -> Result<&'r str> {
    record
        .get(index)
        .map(str::trim)
        .ok_or_else(|| AppError::message(format!("row {row}: missing column {index}")))
}

fn parse_time(raw: &str, row: usize) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|err| AppError::message(format!("row {row}: bad time `{raw}`: {err}")))
}

fn parse_price(raw: &str, column: &str, row: usize) -> Result<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| AppError::message(format!("row {row}: `{column}` value `{raw}` is not a number")))
}
