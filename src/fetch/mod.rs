pub mod aggregator;
pub mod client;
pub mod coordinator;
pub mod decode;
pub mod models;
pub mod rate_limit;
pub mod task;

pub use aggregator::ResultAggregator;
pub use client::{BinanceFuturesClient, ClientError, ExchangeClient, KlineRequest};
pub use coordinator::{FetchCoordinator, LogProgress, ProgressEvent, ProgressObserver};
pub use models::{
    BatchResult, Candle, CandleColor, CandleSeries, FailureKind, FetchFailure, FetchOutcome,
    Instrument, TimeWindow,
};
pub use rate_limit::{discover, RateLimitPolicy, RequestLimiter};
pub use task::{FetchTask, TaskContext, KLINE_PAGE_LIMIT, KLINE_REQUEST_WEIGHT};

/// Worker count used when neither the configuration nor the command line pins one.
pub const DEFAULT_WORKERS: usize = 1;

#[inline]
pub fn ensure_concurrency_limit(limit: usize) -> usize {
    limit.max(1)
}
