use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use log::{info, warn};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};

use super::aggregator::ResultAggregator;
use super::models::{
    BatchResult, FailureKind, FetchFailure, FetchOutcome, Instrument, TimeWindow,
};
use super::task::{FetchTask, TaskContext};
use super::ensure_concurrency_limit;

/// One completed task as seen by progress observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub completed: usize,
    pub total: usize,
    pub instrument: Instrument,
    pub succeeded: bool,
}

pub trait ProgressObserver: Send + Sync {
    fn on_complete(&self, event: &ProgressEvent);
}

/// Default observer: one log line per completed instrument.
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_complete(&self, event: &ProgressEvent) {
        if event.succeeded {
            info!(
                "Fetched {}/{} {}",
                event.completed, event.total, event.instrument
            );
        } else {
            warn!(
                "Fetched {}/{} {} (failed)",
                event.completed, event.total, event.instrument
            );
        }
    }
}

/// Runs one batch of fetch tasks on a bounded pool and gathers their outcomes.
pub struct FetchCoordinator {
    context: TaskContext,
    observer: Arc<dyn ProgressObserver>,
    progress_counter: Arc<AtomicUsize>,
}

impl FetchCoordinator {
    pub fn new(context: TaskContext) -> Self {
        Self {
            context,
            observer: Arc::new(LogProgress),
            progress_counter: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Live count of completed tasks for the current run.
    pub fn progress_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.progress_counter)
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.context.cancel.clone()
    }

    pub async fn run(
        &self,
        instruments: Vec<Instrument>,
        window: TimeWindow,
        max_workers: usize,
    ) -> Result<BatchResult> {
        validate_batch(&instruments, max_workers)?;

        let total = instruments.len();
        let workers = ensure_concurrency_limit(max_workers);
        let semaphore = Arc::new(Semaphore::new(workers));
        let aggregator = ResultAggregator::new();
        let progress_counter = Arc::clone(&self.progress_counter);
        let cancel = self.context.cancel.clone();

        progress_counter.store(0, Ordering::SeqCst);
        info!(
            "Fetching {} instruments with {} worker(s) from {} to {}",
            total,
            workers,
            window.start().to_rfc3339(),
            window.end().to_rfc3339()
        );

        let mut completions = stream::iter(instruments)
            .map(|instrument| {
                let semaphore = Arc::clone(&semaphore);
                let cancel = cancel.clone();
                let task = FetchTask::new(self.context.clone());
                async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return cancelled_outcome(instrument, "worker pool closed");
                    };
                    if cancel.is_cancelled() {
                        return cancelled_outcome(instrument, "batch cancelled before start");
                    }
                    task.run(instrument, window).await
                }
            })
            .buffer_unordered(workers);

        while let Some(outcome) = completions.next().await {
            let completed = progress_counter.fetch_add(1, Ordering::SeqCst) + 1;
            let event = ProgressEvent {
                completed,
                total,
                instrument: outcome.instrument().clone(),
                succeeded: outcome.is_success(),
            };
            aggregator.record(outcome)?;
            self.observer.on_complete(&event);
        }

        if cancel.is_cancelled() {
            warn!(
                "Batch cancelled after {} of {} instruments",
                aggregator.len(),
                total
            );
            return Err(AppError::Cancelled);
        }

        if !aggregator.is_complete(total) {
            return Err(AppError::message(format!(
                "batch finished with {} of {} outcomes recorded",
                aggregator.len(),
                total
            )));
        }

        let result = aggregator.into_result();
        if result.success_count() == 0 {
            return Err(AppError::BatchFailed { total });
        }

        Ok(result)
    }
}

fn cancelled_outcome(instrument: Instrument, reason: &str) -> FetchOutcome {
    FetchOutcome::Failure(FetchFailure::new(instrument, FailureKind::Cancelled, reason))
}

fn validate_batch(instruments: &[Instrument], max_workers: usize) -> Result<()> {
    if max_workers == 0 {
        return Err(AppError::invalid_input("worker count must be at least 1"));
    }
    if instruments.is_empty() {
        return Err(AppError::invalid_input("instrument list is empty"));
    }

    let mut seen = HashSet::with_capacity(instruments.len());
    for instrument in instruments {
        if !seen.insert(instrument) {
            return Err(AppError::DuplicateInstrument(instrument.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::client::{ClientError, ExchangeClient, KlineRequest};
    use crate::fetch::task::tests::{window_hours, ScriptedClient};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use std::time::Duration;

    fn instruments(symbols: &[&str]) -> Vec<Instrument> {
        symbols
            .iter()
            .map(|symbol| Instrument::new(symbol).unwrap())
            .collect()
    }

    fn coordinator(client: Arc<dyn ExchangeClient>) -> FetchCoordinator {
        FetchCoordinator::new(TaskContext::new(client, "1h"))
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ProgressEvent>>);

    impl ProgressObserver for Recorder {
        fn on_complete(&self, event: &ProgressEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    /// Tracks how many kline calls are in flight at once.
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    impl Gauge {
        fn new(delay: Duration) -> Self {
            Self {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                delay,
            }
        }
    }

    #[async_trait]
    impl ExchangeClient for Gauge {
        async fn exchange_info(&self) -> std::result::Result<Value, ClientError> {
            Ok(json!({}))
        }

        async fn klines(&self, request: &KlineRequest<'_>) -> std::result::Result<Value, ClientError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            // Stagger completions so they arrive out of submission order.
            let jitter = (request.instrument.as_str().len() % 3) as u64;
            tokio::time::sleep(self.delay + Duration::from_millis(jitter * 3)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(json!([[request.start_ms, "1", "2", "0.5", "1.5"]]))
        }
    }

    #[tokio::test]
    async fn result_keys_match_instruments_for_any_worker_count() {
        let symbols = ["A", "BB", "CCC", "DDDD", "EEEEE", "FFFFFF", "G"];
        let mut results = Vec::new();
        for workers in 1..=symbols.len() + 1 {
            let client = Arc::new(Gauge::new(Duration::from_millis(2)));
            let result = coordinator(client)
                .run(instruments(&symbols), window_hours(24), workers)
                .await
                .unwrap();

            let keys: Vec<&str> = result.instruments().map(Instrument::as_str).collect();
            let mut expected = symbols.to_vec();
            expected.sort();
            assert_eq!(keys, expected, "workers = {workers}");
            results.push(result);
        }
        assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[tokio::test]
    async fn never_exceeds_worker_count() {
        for workers in [1, 2, 3, 5] {
            let client = Arc::new(Gauge::new(Duration::from_millis(10)));
            let symbols: Vec<String> = (0..12).map(|idx| format!("SYM{idx}")).collect();
            let list = symbols
                .iter()
                .map(|symbol| Instrument::new(symbol).unwrap())
                .collect();

            coordinator(client.clone())
                .run(list, window_hours(24), workers)
                .await
                .unwrap();

            let peak = client.peak.load(Ordering::SeqCst);
            assert!(peak <= workers, "peak {peak} > workers {workers}");
            assert!(peak >= 1);
        }
    }

    #[tokio::test]
    async fn isolates_partial_failures() {
        let client = Arc::new(
            ScriptedClient::new()
                .with_series("A", 3)
                .with_failure("B", ClientError::Transport("simulated outage".into()))
                .with_series("C", 0),
        );
        let recorder = Arc::new(Recorder::default());
        let coordinator = coordinator(client).with_observer(recorder.clone());

        let result = coordinator
            .run(instruments(&["A", "B", "C"]), window_hours(24), 2)
            .await
            .unwrap();

        let get = |symbol: &str| result.get(&Instrument::new(symbol).unwrap()).unwrap();
        assert_eq!(get("A").series().unwrap().len(), 3);
        assert_eq!(get("B").failure().unwrap().kind, FailureKind::Network);
        assert!(get("C").series().unwrap().is_empty());

        let events = recorder.0.lock().unwrap();
        assert_eq!(events.len(), 3);
        let mut counts: Vec<usize> = events.iter().map(|event| event.completed).collect();
        counts.sort();
        assert_eq!(counts, vec![1, 2, 3]);
        assert!(events.iter().all(|event| event.total == 3));
        assert_eq!(coordinator.progress_counter().load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn escalates_when_every_task_fails() {
        let client = Arc::new(
            ScriptedClient::new()
                .with_failure("A", ClientError::Transport("down".into()))
                .with_failure("B", ClientError::Status {
                    status: 503,
                    body: "maintenance".into(),
                }),
        );

        let err = coordinator(client)
            .run(instruments(&["A", "B"]), window_hours(24), 2)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::BatchFailed { total: 2 }));
    }

    #[tokio::test]
    async fn rejects_invalid_batches_before_fetching() {
        let client = Arc::new(ScriptedClient::new().with_series("A", 1));
        let coordinator = coordinator(client.clone());

        let zero_workers = coordinator
            .run(instruments(&["A"]), window_hours(24), 0)
            .await;
        assert!(matches!(zero_workers, Err(AppError::InvalidInput(_))));

        let empty = coordinator.run(Vec::new(), window_hours(24), 1).await;
        assert!(matches!(empty, Err(AppError::InvalidInput(_))));

        let duplicated = coordinator
            .run(instruments(&["A", "B", "A"]), window_hours(24), 1)
            .await;
        assert!(matches!(duplicated, Err(AppError::DuplicateInstrument(ref s)) if s == "A"));

        assert!(client.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_batch_stops_submitting() {
        let client = Arc::new(Gauge::new(Duration::from_millis(30)));
        let coordinator = coordinator(client.clone());
        let cancel = coordinator.cancellation();
        let symbols: Vec<String> = (0..20).map(|idx| format!("SYM{idx}")).collect();
        let list: Vec<Instrument> = symbols
            .iter()
            .map(|symbol| Instrument::new(symbol).unwrap())
            .collect();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(45)).await;
            cancel.cancel();
        });

        let err = coordinator.run(list, window_hours(24), 1).await.unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, AppError::Cancelled));
        assert!(coordinator.progress_counter().load(Ordering::SeqCst) == 20);
        assert!(client.peak.load(Ordering::SeqCst) <= 1);
    }
}
