use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use log::{info, warn};

use crate::error::{AppError, Context, Result};
use crate::fetch::{BatchResult, CandleSeries, FetchFailure, Instrument};
use crate::utils::{batch_date_label, sanitize_file_stem};

pub mod archive;
pub mod candle_store;

pub use candle_store::CANDLE_HEADERS;

/// What a persist pass wrote and what it skipped.
#[derive(Debug, Default)]
pub struct PersistReport {
    pub written: Vec<PathBuf>,
    pub skipped: Vec<FetchFailure>,
}

impl PersistReport {
    pub fn written_count(&self) -> usize {
        self.written.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Facade over one batch's artifact directory and its archive.
pub struct Records {
    batch_dir: PathBuf,
    archive_path: PathBuf,
}

impl Records {
    /// `{root}/{timeframe}-{end date}` plus a sibling `.zip` of the same name.
    pub fn for_batch(root: impl AsRef<Path>, timeframe: &str, end_date: NaiveDate) -> Self {
        let label = format!("{}-{}", timeframe, batch_date_label(end_date));
        let root = root.as_ref();
        Self::with_paths(root.join(&label), root.join(format!("{label}.zip")))
    }

    pub fn with_paths<D, A>(batch_dir: D, archive_path: A) -> Self
    where
        D: Into<PathBuf>,
        A: Into<PathBuf>,
    {
        Self {
            batch_dir: batch_dir.into(),
            archive_path: archive_path.into(),
        }
    }

    pub fn batch_dir(&self) -> &Path {
        &self.batch_dir
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Ensure the batch directory exists before any artifact is written.
    pub fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.batch_dir).with_context(|| {
            format!(
                "Failed to create batch directory {}",
                self.batch_dir.display()
            )
        })?;
        Ok(())
    }

    pub fn artifact_path(&self, instrument: &Instrument) -> Result<PathBuf> {
        let stem = sanitize_file_stem(instrument.as_str()).ok_or_else(|| {
            AppError::invalid_input(format!(
                "instrument `{instrument}` cannot be used as a file name"
            ))
        })?;
        Ok(self.batch_dir.join(format!("{stem}.csv")))
    }

    /// Write one artifact per successful instrument. Failures are logged and reported back,
    /// never written.
    /// Two instruments that resolve to the same file are rejected before anything is written.
    pub fn persist(&self, result: &BatchResult) -> Result<PersistReport> {
        let mut targets: HashMap<PathBuf, &Instrument> = HashMap::new();
        let mut planned = Vec::new();
        for series in result.successes() {
            let path = self.artifact_path(&series.instrument)?;
            if let Some(previous) = targets.insert(path.clone(), &series.instrument) {
                return Err(AppError::invalid_input(format!(
                    "instruments `{}` and `{}` both map to {}",
                    previous,
                    series.instrument,
                    path.display()
                )));
            }
            planned.push((series, path));
        }

        self.prepare()?;

        let mut report = PersistReport::default();
        for failure in result.failures() {
            warn!(
                "Skipping {}: {} ({})",
                failure.instrument, failure.kind, failure.reason
            );
            report.skipped.push(failure.clone());
        }

        for (series, path) in planned {
            candle_store::save_series(series, &path)?;
            report.written.push(path);
        }

        info!(
            "Saved {} artifact(s) to {}",
            report.written_count(),
            self.batch_dir.display()
        );
        Ok(report)
    }

    pub fn load_series(&self, instrument: &Instrument) -> Result<CandleSeries> {
        let path = self.artifact_path(instrument)?;
        candle_store::load_series(instrument.clone(), path)
    }

    /// Compress the batch directory into the archive path, replacing any earlier archive.
    pub fn archive(&self) -> Result<PathBuf> {
        let count = archive::zip_artifacts(&self.batch_dir, &self.archive_path)?;
        info!(
            "Archived {} file(s) into {}",
            count,
            self.archive_path.display()
        );
        Ok(self.archive_path.clone())
    }
}
