use thiserror::Error;

pub use anyhow::Context;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    Calamine(#[from] calamine::Error),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    /// Capacity discovery failed; nothing has been fetched yet.
    #[error("exchange service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Every submitted instrument failed, which points at a systemic outage.
    #[error("all {total} instrument fetches failed")]
    BatchFailed { total: usize },
    #[error("result for `{0}` was recorded twice")]
    DuplicateResult(String),
    #[error("instrument `{0}` appears more than once in the batch")]
    DuplicateInstrument(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("operation cancelled by user")]
    Cancelled,
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn message<T: Into<String>>(msg: T) -> Self {
        AppError::Message(msg.into())
    }

    pub fn invalid_input<T: Into<String>>(msg: T) -> Self {
        AppError::InvalidInput(msg.into())
    }

    pub fn service_unavailable<T: Into<String>>(msg: T) -> Self {
        AppError::ServiceUnavailable(msg.into())
    }

    /// Systemic failures are everything except a clean run; partial per-instrument loss never
    /// reaches this type.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Cancelled => 130,
            AppError::BatchFailed { .. } | AppError::ServiceUnavailable(_) => 2,
            _ => 1,
        }
    }
}
