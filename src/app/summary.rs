use std::fmt;

use unicode_width::UnicodeWidthStr;

use crate::fetch::{BatchResult, FetchOutcome};

/// One line of the end-of-run table.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub instrument: String,
    pub status: &'static str,
    pub candles: Option<usize>,
    pub detail: String,
}

/// Per-instrument view of a finished batch, rendered as a bordered table.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    rows: Vec<SummaryRow>,
}

impl BatchSummary {
    pub fn from_result(result: &BatchResult) -> Self {
        let rows = result
            .iter()
            .map(|(instrument, outcome)| match outcome {
                FetchOutcome::Success(series) => SummaryRow {
                    instrument: instrument.to_string(),
                    status: "ok",
                    candles: Some(series.len()),
                    detail: series
                        .candles
                        .last()
                        .map(|candle| format!("last close {}", candle.close))
                        .unwrap_or_else(|| "no candles in window".to_string()),
                },
                FetchOutcome::Failure(failure) => SummaryRow {
                    instrument: instrument.to_string(),
                    status: "failed",
                    candles: None,
                    detail: format!("{}: {}", failure.kind, failure.reason),
                },
            })
            .collect();
        Self { rows }
    }

    pub fn rows(&self) -> &[SummaryRow] {
        &self.rows
    }

    pub fn succeeded(&self) -> usize {
        self.rows.iter().filter(|row| row.candles.is_some()).count()
    }

    pub fn failed(&self) -> usize {
        self.rows.len() - self.succeeded()
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers = ["Instrument", "Status", "Candles", "Detail"];
        let all_rows: Vec<Vec<String>> =
            std::iter::once(headers.iter().map(|h| h.to_string()).collect())
                .chain(self.rows.iter().map(|row| {
                    vec![
                        row.instrument.clone(),
                        row.status.to_string(),
                        row.candles.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string()),
                        row.detail.clone(),
                    ]
                }))
                .collect();

        let mut col_widths = vec![0; headers.len()];
        for row in &all_rows {
            for (i, cell) in row.iter().enumerate() {
                col_widths[i] = col_widths[i].max(cell.width());
            }
        }

        let border = format!(
            "+{}+",
            col_widths
                .iter()
                .map(|w| "-".repeat(w + 2))
                .collect::<Vec<_>>()
                .join("+")
        );

        writeln!(f, "{}", border)?;
        for (row_idx, row) in all_rows.iter().enumerate() {
            let line = row
                .iter()
                .zip(&col_widths)
                .map(|(cell, width)| format!(" {}{} ", cell, " ".repeat(width - cell.width())))
                .collect::<Vec<_>>()
                .join("|");
            writeln!(f, "|{}|", line)?;
            if row_idx == 0 {
                writeln!(f, "{}", border)?;
            }
        }
        writeln!(f, "{}", border)?;
        write!(
            f,
            "{} succeeded, {} failed",
            self.succeeded(),
            self.failed()
        )
    }
}
