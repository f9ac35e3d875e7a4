use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::ACCEPT, Client, StatusCode};
use serde_json::Value;
use thiserror::Error;

use crate::error::{Context, Result};

use super::models::{FailureKind, Instrument};

pub const DEFAULT_BASE_URL: &str = "https://fapi.binance.com";
const EXCHANGE_INFO_PATH: &str = "/fapi/v1/exchangeInfo";
const KLINES_PATH: &str = "/fapi/v1/klines";

/// Parameters of one kline range call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KlineRequest<'a> {
    pub instrument: &'a Instrument,
    pub interval: &'a str,
    pub start_ms: i64,
    pub end_ms: i64,
    pub limit: usize,
}

/// Transport-level failure of a single remote call.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("remote returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("response body is not valid JSON: {0}")]
    Body(String),
}

impl ClientError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ClientError::Transport(_) => FailureKind::Network,
            ClientError::Timeout(_) => FailureKind::Timeout,
            ClientError::Status { .. } => FailureKind::Status,
            ClientError::Body(_) => FailureKind::MalformedPayload,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Body(err.to_string())
        } else {
            ClientError::Transport(err.to_string())
        }
    }
}

/// Remote exchange seam. Both calls return raw JSON; interpretation happens in the probe and
/// the fetch task so fakes only need to script payloads.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn exchange_info(&self) -> std::result::Result<Value, ClientError>;

    async fn klines(&self, request: &KlineRequest<'_>) -> std::result::Result<Value, ClientError>;
}

/// Binance USD-M futures REST client.
pub struct BinanceFuturesClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl BinanceFuturesClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to construct exchange HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> std::result::Result<Value, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .query(query)
            .send()
            .await
            .map_err(|err| self.classify(err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: truncate(&body, 200),
            });
        }

        response.json::<Value>().await.map_err(|err| self.classify(err))
    }

    fn classify(&self, err: reqwest::Error) -> ClientError {
        if err.is_timeout() {
            ClientError::Timeout(self.timeout)
        } else {
            ClientError::from(err)
        }
    }
}

#[async_trait]
impl ExchangeClient for BinanceFuturesClient {
    async fn exchange_info(&self) -> std::result::Result<Value, ClientError> {
        self.get_json(EXCHANGE_INFO_PATH, &[]).await
    }

    async fn klines(&self, request: &KlineRequest<'_>) -> std::result::Result<Value, ClientError> {
        let query = [
            ("symbol", request.instrument.as_str().to_string()),
            ("interval", request.interval.to_string()),
            ("startTime", request.start_ms.to_string()),
            ("endTime", request.end_ms.to_string()),
            ("limit", request.limit.to_string()),
        ];
        self.get_json(KLINES_PATH, &query).await
    }
}

/// Binance signals an exhausted weight budget with 429 and an IP ban with 418.
pub fn is_rate_limited(err: &ClientError) -> bool {
    matches!(
        err,
        ClientError::Status { status, .. }
            if *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status == 418
    )
}

fn truncate(body: &str, max_chars: usize) -> String {
    if body.chars().count() <= max_chars {
        body.to_string()
    } else {
        let mut cut: String = body.chars().take(max_chars).collect();
        cut.push_str("...");
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_client_errors_to_failure_kinds() {
        assert_eq!(
            ClientError::Transport("refused".into()).kind(),
            FailureKind::Network
        );
        assert_eq!(
            ClientError::Timeout(Duration::from_secs(1)).kind(),
            FailureKind::Timeout
        );
        assert_eq!(
            ClientError::Status {
                status: 400,
                body: String::new()
            }
            .kind(),
            FailureKind::Status
        );
    }

    #[test]
    fn detects_rate_limit_statuses() {
        let throttled = ClientError::Status {
            status: 429,
            body: String::new(),
        };
        let banned = ClientError::Status {
            status: 418,
            body: String::new(),
        };
        let bad_symbol = ClientError::Status {
            status: 400,
            body: String::new(),
        };
        assert!(is_rate_limited(&throttled));
        assert!(is_rate_limited(&banned));
        assert!(!is_rate_limited(&bad_symbol));
    }

    #[test]
    fn strips_trailing_slash_from_base_url() {
        let client =
            BinanceFuturesClient::new("https://example.test/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url(), "https://example.test");
    }

    #[test]
    fn truncates_long_bodies() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("abc", 3), "abc");
    }
}
