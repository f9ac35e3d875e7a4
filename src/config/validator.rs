use crate::error::{AppError, Result};

use super::{Config, SUPPORTED_TIMEFRAMES};

/// Validate the merged configuration and surface every problem at once.
pub fn validate_config(config: &Config) -> Result<()> {
    let mut issues = Vec::new();

    validate_timeframe(config, &mut issues);
    validate_threads(config, &mut issues);
    validate_dates(config, &mut issues);
    validate_paths(config, &mut issues);
    validate_remote(config, &mut issues);

    if issues.is_empty() {
        Ok(())
    } else {
        Err(AppError::invalid_input(format!(
            "configuration invalid:\n  - {}",
            issues.join("\n  - ")
        )))
    }
}

fn validate_timeframe(config: &Config, issues: &mut Vec<String>) {
    if !SUPPORTED_TIMEFRAMES.contains(&config.timeframe.as_str()) {
        issues.push(format!(
            "timeframe `{}` is not one of {}",
            config.timeframe,
            SUPPORTED_TIMEFRAMES.join(", ")
        ));
    }
}

fn validate_threads(config: &Config, issues: &mut Vec<String>) {
    if config.threads == Some(0) {
        issues.push("threads must be at least 1".to_string());
    }
}

fn validate_dates(config: &Config, issues: &mut Vec<String>) {
    if let (Some(start), Some(end)) = (config.start_date, config.end_date) {
        if start >= end {
            issues.push(format!(
                "start_date {start} must be earlier than end_date {end}"
            ));
        }
    }
}

fn validate_paths(config: &Config, issues: &mut Vec<String>) {
    if config.pairs_file.as_os_str().is_empty() {
        issues.push("pairs_file must not be empty".to_string());
    }
    if config.cache_dir.as_os_str().is_empty() {
        issues.push("cache_dir must not be empty".to_string());
    }
}

fn validate_remote(config: &Config, issues: &mut Vec<String>) {
    let base_url = config.base_url.trim();
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        issues.push(format!("base_url `{}` must be an http(s) URL", config.base_url));
    }
    if config.request_timeout.is_zero() {
        issues.push("request_timeout_secs must be greater than zero".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn accepts_defaults() {
        validate_config(&Config::default()).expect("defaults should be valid");
    }

    #[test]
    fn reports_every_issue() {
        let config = Config {
            timeframe: "7m".to_string(),
            threads: Some(0),
            start_date: NaiveDate::from_ymd_opt(2024, 5, 1),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            pairs_file: PathBuf::new(),
            base_url: "fapi.binance.com".to_string(),
            request_timeout: Duration::ZERO,
            ..Config::default()
        };

        let err = validate_config(&config).expect_err("validation should fail");
        let message = err.to_string();
        for needle in [
            "timeframe `7m`",
            "threads must be at least 1",
            "must be earlier than",
            "pairs_file",
            "base_url",
            "request_timeout_secs",
        ] {
            assert!(message.contains(needle), "missing `{needle}` in: {message}");
        }
    }

    #[test]
    fn equal_dates_are_rejected() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 1);
        let config = Config {
            start_date: day,
            end_date: day,
            ..Config::default()
        };
        assert!(validate_config(&config).is_err());
    }
}
