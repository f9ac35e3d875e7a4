use std::path::PathBuf;
use std::sync::Arc;

use log::info;
use tokio_util::sync::CancellationToken;

use crate::app::summary::BatchSummary;
use crate::config::{load_instruments, Config};
use crate::error::Result;
use crate::fetch::{
    discover, BinanceFuturesClient, ExchangeClient, FetchCoordinator, RateLimitPolicy,
    RequestLimiter, TaskContext, DEFAULT_WORKERS, KLINE_REQUEST_WEIGHT,
};
use crate::records::{PersistReport, Records};

/// Everything a finished fetch run produced.
#[derive(Debug)]
pub struct FetchReport {
    pub summary: BatchSummary,
    pub persisted: PersistReport,
    pub batch_dir: PathBuf,
    pub archive: Option<PathBuf>,
    pub workers: usize,
}

/// Wires configuration, the exchange client, the fetch engine, and persistence together.
pub struct AppController {
    config: Config,
    client: Arc<dyn ExchangeClient>,
}

impl AppController {
    pub fn new(config: Config) -> Result<Self> {
        let client = BinanceFuturesClient::new(config.base_url.clone(), config.request_timeout)?;
        Ok(Self::with_client(config, Arc::new(client)))
    }

    pub fn with_client(config: Config, client: Arc<dyn ExchangeClient>) -> Self {
        Self { config, client }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn records(&self) -> Result<Records> {
        Ok(Records::for_batch(
            &self.config.cache_dir,
            &self.config.timeframe,
            self.config.end_date()?,
        ))
    }

    pub async fn probe(&self) -> Result<RateLimitPolicy> {
        let policy = discover(self.client.as_ref()).await?;
        info!(
            "Exchange allows {} request weight per {}s",
            policy.request_weight_limit,
            policy.interval_secs()
        );
        Ok(policy)
    }

    /// Fetch every listed instrument, persist the successes, and optionally archive them.
    pub async fn fetch(&self, archive: bool, cancel: CancellationToken) -> Result<FetchReport> {
        let window = self.config.time_window()?;
        let instruments = load_instruments(&self.config.pairs_file)?;
        let records = self.records()?;

        let mut context = TaskContext::new(Arc::clone(&self.client), self.config.timeframe.clone())
            .with_request_timeout(self.config.request_timeout)
            .with_cancellation(cancel);

        let workers = if self.config.probe_rate_limits {
            let policy = self.probe().await?;
            context = context.with_limiter(Arc::new(RequestLimiter::new(policy)));
            self.config
                .threads
                .unwrap_or_else(|| policy.recommended_workers(KLINE_REQUEST_WEIGHT))
        } else {
            self.config.threads.unwrap_or(DEFAULT_WORKERS)
        };

        let coordinator = FetchCoordinator::new(context);
        let result = coordinator.run(instruments, window, workers).await?;

        let persisted = records.persist(&result)?;
        let archive = if archive {
            Some(records.archive()?)
        } else {
            None
        };

        Ok(FetchReport {
            summary: BatchSummary::from_result(&result),
            persisted,
            batch_dir: records.batch_dir().to_path_buf(),
            archive,
            workers,
        })
    }

    /// Re-pack an existing batch directory without fetching anything.
    pub fn archive(&self) -> Result<PathBuf> {
        self.records()?.archive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::fetch::client::{ClientError, KlineRequest};
    use crate::fetch::task::tests::ScriptedClient;
    use crate::fetch::Instrument;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::{json, Value};
    use std::fs;
    use std::path::Path;

    /// Scripted klines plus a published weight budget of 2400 per minute.
    struct Budgeted(ScriptedClient);

    #[async_trait]
    impl ExchangeClient for Budgeted {
        async fn exchange_info(&self) -> std::result::Result<Value, ClientError> {
            Ok(json!({
                "rateLimits": [
                    {"rateLimitType": "REQUEST_WEIGHT", "interval": "MINUTE", "intervalNum": 1, "limit": 2400},
                    {"rateLimitType": "ORDERS", "interval": "MINUTE", "intervalNum": 1, "limit": 1200}
                ]
            }))
        }

        async fn klines(&self, request: &KlineRequest<'_>) -> std::result::Result<Value, ClientError> {
            self.0.klines(request).await
        }
    }

    fn config(dir: &Path, probe: bool) -> Config {
        let pairs = dir.join("pairs.csv");
        fs::write(&pairs, "BTCUSDT\nETHUSDT\nDOGEUSDT\n").unwrap();
        Config {
            pairs_file: pairs,
            cache_dir: dir.join("cached-data"),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 2),
            probe_rate_limits: probe,
            ..Config::default()
        }
    }

    fn scripted() -> ScriptedClient {
        ScriptedClient::new()
            .with_series("BTCUSDT", 24)
            .with_series("ETHUSDT", 5)
            .with_failure("DOGEUSDT", ClientError::Transport("connection reset".into()))
    }

    #[tokio::test]
    async fn fetches_persists_and_archives() {
        let dir = tempfile::tempdir().unwrap();
        let controller =
            AppController::with_client(config(dir.path(), false), Arc::new(scripted()));

        let report = controller
            .fetch(true, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.workers, DEFAULT_WORKERS);
        assert_eq!(report.summary.succeeded(), 2);
        assert_eq!(report.summary.failed(), 1);
        assert_eq!(report.persisted.written_count(), 2);
        assert_eq!(
            report.batch_dir,
            dir.path().join("cached-data").join("1h-02 January 2024")
        );
        assert_eq!(
            report.archive.as_deref(),
            Some(dir.path().join("cached-data").join("1h-02 January 2024.zip").as_path())
        );

        let records = controller.records().unwrap();
        let btc = records
            .load_series(&Instrument::new("BTCUSDT").unwrap())
            .unwrap();
        assert_eq!(btc.len(), 24);
        assert!(!report.batch_dir.join("DOGEUSDT.csv").exists());
    }

    #[tokio::test]
    async fn probe_sizes_the_pool_when_threads_unset() {
        let dir = tempfile::tempdir().unwrap();
        let controller =
            AppController::with_client(config(dir.path(), true), Arc::new(Budgeted(scripted())));

        let report = controller
            .fetch(false, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.workers, 16);
        assert!(report.archive.is_none());
        assert_eq!(report.persisted.written_count(), 2);
    }

    #[tokio::test]
    async fn configured_threads_win_over_probe() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = config(dir.path(), true);
        settings.threads = Some(3);
        let controller = AppController::with_client(settings, Arc::new(Budgeted(scripted())));

        let report = controller
            .fetch(false, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.workers, 3);
    }

    #[tokio::test]
    async fn failed_probe_aborts_before_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(scripted());
        let controller = AppController::with_client(config(dir.path(), true), client.clone());

        let err = controller
            .fetch(false, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::ServiceUnavailable(_)));
        assert!(client.calls.lock().unwrap().is_empty());
        assert!(!dir.path().join("cached-data").exists());
    }

    #[tokio::test]
    async fn archive_requires_existing_batch() {
        let dir = tempfile::tempdir().unwrap();
        let controller =
            AppController::with_client(config(dir.path(), false), Arc::new(scripted()));

        assert!(controller.archive().is_err());

        controller
            .fetch(false, CancellationToken::new())
            .await
            .unwrap();
        let path = controller.archive().unwrap();
        assert!(path.is_file());
    }
}
