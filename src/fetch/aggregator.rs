use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use log::warn;

use crate::error::{AppError, Result};

use super::models::{BatchResult, FetchOutcome, Instrument};

/// Thread-safe collector of per-instrument outcomes for one batch.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    outcomes: Mutex<BTreeMap<Instrument, FetchOutcome>>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<Instrument, FetchOutcome>> {
        self.outcomes.lock().unwrap_or_else(|poisoned| {
            warn!("Result aggregator mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Insert an outcome; recording the same instrument twice is a programming error.
    pub fn record(&self, outcome: FetchOutcome) -> Result<()> {
        let mut outcomes = self.lock();
        match outcomes.entry(outcome.instrument().clone()) {
            Entry::Occupied(entry) => Err(AppError::DuplicateResult(entry.key().to_string())),
            Entry::Vacant(entry) => {
                entry.insert(outcome);
                Ok(())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_complete(&self, expected: usize) -> bool {
        self.len() == expected
    }

    pub fn snapshot(&self) -> BatchResult {
        BatchResult::from_map(self.lock().clone())
    }

    pub fn into_result(self) -> BatchResult {
        let outcomes = self
            .outcomes
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        BatchResult::from_map(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::models::{Candle, CandleSeries, FailureKind, FetchFailure};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn success(symbol: &str, closes: &[f64]) -> FetchOutcome {
        let instrument = Instrument::new(symbol).unwrap();
        let candles = closes
            .iter()
            .enumerate()
            .map(|(hour, close)| {
                let ts = Utc.with_ymd_and_hms(2024, 3, 1, hour as u32, 0, 0).unwrap();
                Candle::new(ts, 1.0, 2.0, 0.5, *close)
            })
            .collect();
        FetchOutcome::Success(CandleSeries::new(instrument, candles).unwrap())
    }

    fn failure(symbol: &str) -> FetchOutcome {
        FetchOutcome::Failure(FetchFailure::new(
            Instrument::new(symbol).unwrap(),
            FailureKind::Network,
            "connection reset",
        ))
    }

    fn fixture() -> Vec<FetchOutcome> {
        vec![
            success("BTCUSDT", &[1.5, 0.5]),
            failure("DOGEUSDT"),
            success("ETHUSDT", &[]),
            success("SOLUSDT", &[2.0]),
        ]
    }

    // Heap's algorithm, enough for four elements.
    fn permutations(items: Vec<FetchOutcome>) -> Vec<Vec<FetchOutcome>> {
        fn heap(k: usize, items: &mut Vec<FetchOutcome>, out: &mut Vec<Vec<FetchOutcome>>) {
            if k <= 1 {
                out.push(items.clone());
                return;
            }
            heap(k - 1, items, out);
            for i in 0..k - 1 {
                let swap_with = if k % 2 == 0 { i } else { 0 };
                items.swap(swap_with, k - 1);
                heap(k - 1, items, out);
            }
        }
        let mut items = items;
        let mut out = Vec::new();
        let len = items.len();
        heap(len, &mut items, &mut out);
        out
    }

    #[test]
    fn rejects_duplicate_instrument() {
        let aggregator = ResultAggregator::new();
        aggregator.record(success("BTCUSDT", &[1.0])).unwrap();

        let err = aggregator.record(failure("BTCUSDT")).unwrap_err();

        assert!(matches!(err, AppError::DuplicateResult(ref symbol) if symbol == "BTCUSDT"));
        assert!(aggregator.snapshot().get(&Instrument::new("BTCUSDT").unwrap()).unwrap().is_success());
    }

    #[test]
    fn completion_tracks_expected_count() {
        let aggregator = ResultAggregator::new();
        assert!(!aggregator.is_complete(2));
        aggregator.record(success("A", &[])).unwrap();
        aggregator.record(failure("B")).unwrap();
        assert!(aggregator.is_complete(2));
        assert_eq!(aggregator.snapshot().failure_count(), 1);
    }

    #[test]
    fn any_completion_order_yields_identical_result() {
        let expected = {
            let aggregator = ResultAggregator::new();
            for outcome in fixture() {
                aggregator.record(outcome).unwrap();
            }
            aggregator.into_result()
        };

        let orders = permutations(fixture());
        assert_eq!(orders.len(), 24);
        for order in orders {
            let aggregator = ResultAggregator::new();
            for outcome in order {
                aggregator.record(outcome).unwrap();
            }
            assert_eq!(aggregator.into_result(), expected);
        }
    }

    #[test]
    fn concurrent_records_are_all_kept() {
        let aggregator = Arc::new(ResultAggregator::new());
        let handles: Vec<_> = (0..16)
            .map(|idx| {
                let aggregator = Arc::clone(&aggregator);
                std::thread::spawn(move || {
                    aggregator
                        .record(success(&format!("SYM{idx}"), &[1.0]))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(aggregator.is_complete(16));
    }
}
