//! Request-weight budget discovery and enforcement.
//!
//! The exchange publishes its budget once via `exchangeInfo`; [`RequestLimiter`] turns that
//! snapshot into a token bucket shared by every fetch task of a batch.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};
use serde_json::Value;

use crate::error::{AppError, Result};

use super::client::ExchangeClient;

const REQUEST_WEIGHT_TYPE: &str = "REQUEST_WEIGHT";

/// Share of the published budget available as an up-front burst. Default pool sizing plans
/// for the same share.
pub const SAFE_BUDGET_FRACTION: f64 = 0.5;

/// Upper bound on the worker count derived from the policy when none was configured.
pub const MAX_DEFAULT_WORKERS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub request_weight_limit: u32,
    pub interval: Duration,
}

impl RateLimitPolicy {
    pub fn new(request_weight_limit: u32, interval: Duration) -> Self {
        Self {
            request_weight_limit,
            interval,
        }
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval.as_secs()
    }

    /// Worker count that keeps a full pool of `request_weight` calls within the safe fraction
    /// of one interval's budget.
    pub fn recommended_workers(&self, request_weight: u32) -> usize {
        let weight = f64::from(request_weight.max(1));
        let budget = f64::from(self.request_weight_limit) * SAFE_BUDGET_FRACTION;
        ((budget / weight).floor() as usize).clamp(1, MAX_DEFAULT_WORKERS)
    }
}

/// Query the capacity endpoint once and extract the single request-weight entry.
pub async fn discover(client: &dyn ExchangeClient) -> Result<RateLimitPolicy> {
    let info = client.exchange_info().await.map_err(|err| {
        AppError::service_unavailable(format!("capacity discovery failed: {err}"))
    })?;
    parse_policy(&info)
}

pub fn parse_policy(info: &Value) -> Result<RateLimitPolicy> {
    let limits = info
        .get("rateLimits")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::service_unavailable("response has no `rateLimits` array"))?;

    let mut weights = limits.iter().filter(|entry| {
        entry.get("rateLimitType").and_then(Value::as_str) == Some(REQUEST_WEIGHT_TYPE)
    });

    let entry = weights.next().ok_or_else(|| {
        AppError::service_unavailable(format!("no `{REQUEST_WEIGHT_TYPE}` rate limit published"))
    })?;
    if weights.next().is_some() {
        return Err(AppError::service_unavailable(format!(
            "more than one `{REQUEST_WEIGHT_TYPE}` rate limit published"
        )));
    }

    let limit = entry
        .get("limit")
        .and_then(Value::as_u64)
        .and_then(|value| u32::try_from(value).ok())
        .filter(|value| *value > 0)
        .ok_or_else(|| AppError::service_unavailable("request weight limit missing or invalid"))?;

    let interval_num = entry
        .get("intervalNum")
        .and_then(Value::as_u64)
        .filter(|value| *value > 0)
        .ok_or_else(|| AppError::service_unavailable("rate limit `intervalNum` missing or invalid"))?;

    let unit = entry
        .get("interval")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::service_unavailable("rate limit `interval` missing"))?;

    let unit_secs = match unit {
        "SECOND" => 1,
        "MINUTE" => 60,
        "HOUR" => 3_600,
        "DAY" => 86_400,
        other => {
            return Err(AppError::service_unavailable(format!(
                "unsupported rate limit interval `{other}`"
            )))
        }
    };

    Ok(RateLimitPolicy::new(
        limit,
        Duration::from_secs(interval_num * unit_secs),
    ))
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
    /// Tokens per second.
    rate: f64,
    capacity: f64,
}

impl TokenBucket {
    /// A full bucket holds `SAFE_BUDGET_FRACTION` of the limit and one interval refills the
    /// rest, so no interval-long span can grant more than `request_weight_limit`.
    fn for_policy(policy: &RateLimitPolicy) -> Self {
        let limit = f64::from(policy.request_weight_limit.max(1));
        let capacity = limit * SAFE_BUDGET_FRACTION;
        let interval = policy.interval.as_secs_f64().max(f64::EPSILON);
        Self {
            tokens: capacity,
            last_update: Instant::now(),
            rate: (limit - capacity) / interval,
            capacity,
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_update = now;
    }

    fn try_take(&mut self, weight: f64) -> bool {
        self.refill();
        if self.tokens >= weight {
            self.tokens -= weight;
            true
        } else {
            false
        }
    }

    fn time_until(&mut self, weight: f64) -> Duration {
        self.refill();
        if self.tokens >= weight {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((weight - self.tokens) / self.rate)
        }
    }
}

/// Token bucket shared by all tasks of a batch so the combined outbound weight never exceeds
/// `request_weight_limit` per interval.
#[derive(Debug)]
pub struct RequestLimiter {
    policy: RateLimitPolicy,
    bucket: Mutex<TokenBucket>,
}

impl RequestLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::for_policy(&policy)),
            policy,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Largest weight a single call may draw at once.
    pub fn capacity(&self) -> f64 {
        self.lock_bucket().capacity
    }

    fn lock_bucket(&self) -> MutexGuard<'_, TokenBucket> {
        self.bucket.lock().unwrap_or_else(|poisoned| {
            warn!("Request limiter mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn clamp(&self, weight: u32) -> f64 {
        let capacity = self.capacity();
        let weight = f64::from(weight.max(1));
        if weight > capacity {
            warn!(
                "Request weight {} exceeds limiter capacity {}, clamping",
                weight, capacity
            );
            capacity
        } else {
            weight
        }
    }

    /// Wait until `weight` tokens are available and take them.
    pub async fn acquire(&self, weight: u32) {
        let weight = self.clamp(weight);
        loop {
            let wait_time = {
                let mut bucket = self.lock_bucket();
                if bucket.try_take(weight) {
                    return;
                }
                bucket.time_until(weight)
            };

            if wait_time > Duration::ZERO {
                debug!("Request limiter: waiting {:?} for weight {}", wait_time, weight);
                tokio::time::sleep(wait_time).await;
            }
        }
    }

    pub fn try_acquire(&self, weight: u32) -> bool {
        let weight = self.clamp(weight);
        self.lock_bucket().try_take(weight)
    }

    pub fn available(&self) -> f64 {
        let mut bucket = self.lock_bucket();
        bucket.refill();
        bucket.tokens
    }
}
