use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use super::client::{is_rate_limited, ClientError, ExchangeClient, KlineRequest};
use super::decode::decode_kline_page;
use super::models::{
    Candle, CandleSeries, FailureKind, FetchFailure, FetchOutcome, Instrument, TimeWindow,
};
use super::rate_limit::RequestLimiter;

/// Largest page the futures kline endpoint serves.
pub const KLINE_PAGE_LIMIT: usize = 1500;

/// Weight the exchange charges for a kline call at `KLINE_PAGE_LIMIT` rows.
pub const KLINE_REQUEST_WEIGHT: u32 = 10;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared, read-only settings for every task of one batch.
#[derive(Clone)]
pub struct TaskContext {
    pub client: Arc<dyn ExchangeClient>,
    pub limiter: Option<Arc<RequestLimiter>>,
    pub interval: String,
    pub page_limit: usize,
    pub request_timeout: Duration,
    pub cancel: CancellationToken,
}

impl TaskContext {
    pub fn new(client: Arc<dyn ExchangeClient>, interval: impl Into<String>) -> Self {
        Self {
            client,
            limiter: None,
            interval: interval.into(),
            page_limit: KLINE_PAGE_LIMIT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_limiter(mut self, limiter: Arc<RequestLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_page_limit(mut self, page_limit: usize) -> Self {
        self.page_limit = page_limit.max(1);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// One instrument's retrieval. Every failure is captured in the returned outcome.
pub struct FetchTask {
    context: TaskContext,
}

impl FetchTask {
    pub fn new(context: TaskContext) -> Self {
        Self { context }
    }

    pub async fn run(&self, instrument: Instrument, window: TimeWindow) -> FetchOutcome {
        match self.fetch_series(&instrument, window).await {
            Ok(candles) => match CandleSeries::new(instrument.clone(), candles) {
                Ok(series) => FetchOutcome::Success(series),
                Err(err) => FetchOutcome::Failure(FetchFailure::new(
                    instrument,
                    FailureKind::MalformedPayload,
                    err.to_string(),
                )),
            },
            Err(failure) => FetchOutcome::Failure(failure),
        }
    }

    async fn fetch_series(
        &self,
        instrument: &Instrument,
        window: TimeWindow,
    ) -> Result<Vec<Candle>, FetchFailure> {
        let end_ms = window.end_ms();
        let mut cursor = window.start_ms();
        let mut candles: Vec<Candle> = Vec::new();

        // Pages are requested sequentially; the cursor moves past the last open time returned.
        while cursor <= end_ms {
            let request = KlineRequest {
                instrument,
                interval: &self.context.interval,
                start_ms: cursor,
                end_ms,
                limit: self.context.page_limit,
            };
            let payload = self.call(instrument, &request).await?;
            let page = decode_kline_page(&payload)
                .map_err(|err| FetchFailure::new(instrument.clone(), err.kind(), err.to_string()))?;

            let page_len = page.len();
            let Some(last) = page.last() else {
                break;
            };
            let last_open_ms = last.timestamp.timestamp_millis();
            if last_open_ms < cursor {
                return Err(FetchFailure::new(
                    instrument.clone(),
                    FailureKind::MalformedPayload,
                    format!("page starting at {cursor} ended before its start ({last_open_ms})"),
                ));
            }

            debug!("{}: received {} candles from {}", instrument, page_len, cursor);
            candles.extend(page);

            if page_len < self.context.page_limit {
                break;
            }
            cursor = last_open_ms + 1;
        }

        Ok(candles)
    }

    async fn call(
        &self,
        instrument: &Instrument,
        request: &KlineRequest<'_>,
    ) -> Result<serde_json::Value, FetchFailure> {
        let cancelled = || {
            FetchFailure::new(
                instrument.clone(),
                FailureKind::Cancelled,
                "batch cancelled before the request completed",
            )
        };

        if let Some(limiter) = &self.context.limiter {
            tokio::select! {
                _ = self.context.cancel.cancelled() => return Err(cancelled()),
                _ = limiter.acquire(KLINE_REQUEST_WEIGHT) => {}
            }
        }

        let timeout = self.context.request_timeout;
        let response = tokio::select! {
            _ = self.context.cancel.cancelled() => return Err(cancelled()),
            result = tokio::time::timeout(timeout, self.context.client.klines(request)) => result,
        };

        match response {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(err)) => Err(self.client_failure(instrument, err)),
            Err(_) => Err(self.client_failure(instrument, ClientError::Timeout(timeout))),
        }
    }

    fn client_failure(&self, instrument: &Instrument, err: ClientError) -> FetchFailure {
        if is_rate_limited(&err) {
            warn!(
                "{}: exchange rejected the request for exceeding its weight budget",
                instrument
            );
        }
        FetchFailure::new(instrument.clone(), err.kind(), err.to_string())
    }
}
