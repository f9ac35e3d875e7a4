use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use calamine::{open_workbook_auto, Data, Reader};
use chrono::NaiveDate;
use log::debug;
use serde::Deserialize;

use crate::error::{AppError, Context, Result};
use crate::fetch::Instrument;

use super::{validator, Config, DATE_FORMAT};

const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xls", "ods"];

impl Config {
    /// Load the JSON configuration, trying the path as given, beside the executable, and in the
    /// working directory. A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        for candidate in search_paths(path) {
            match fs::read_to_string(&candidate) {
                Ok(content) => {
                    debug!("Loading configuration from {}", candidate.display());
                    return Config::from_json(&content).map_err(|err| {
                        AppError::message(format!(
                            "failed to parse configuration at {}: {}",
                            candidate.display(),
                            err
                        ))
                    });
                }
                Err(err) => {
                    debug!("No configuration at {}: {}", candidate.display(), err);
                }
            }
        }

        debug!("No configuration file found for {}, using defaults", path.display());
        Ok(Config::default())
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(content)?;
        raw.into_config()
    }

    /// Validate after overrides are applied so command-line values are checked too.
    pub fn validated(self) -> Result<Self> {
        validator::validate_config(&self)?;
        Ok(self)
    }
}

fn search_paths(path: &Path) -> Vec<PathBuf> {
    let mut paths = vec![path.to_path_buf()];
    if path.is_relative() {
        if let Some(dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            paths.push(dir.join(path));
        }
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd.join(path));
        }
    }
    paths.dedup();
    paths
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    timeframe: Option<String>,
    #[serde(default, alias = "pairs_file_name")]
    pairs_file: Option<PathBuf>,
    #[serde(default)]
    threads: Option<usize>,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    end_date: Option<String>,
    #[serde(default)]
    cache_dir: Option<PathBuf>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    request_timeout_secs: Option<u64>,
    #[serde(default)]
    probe_rate_limits: Option<bool>,
}

impl RawConfig {
    fn into_config(self) -> Result<Config> {
        let defaults = Config::default();
        Ok(Config {
            timeframe: self.timeframe.unwrap_or(defaults.timeframe),
            pairs_file: self.pairs_file.unwrap_or(defaults.pairs_file),
            threads: self.threads,
            start_date: parse_optional_date("start_date", self.start_date.as_deref())?,
            end_date: parse_optional_date("end_date", self.end_date.as_deref())?,
            cache_dir: self.cache_dir.unwrap_or(defaults.cache_dir),
            base_url: self.base_url.unwrap_or(defaults.base_url),
            request_timeout: self
                .request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            probe_rate_limits: self.probe_rate_limits.unwrap_or(defaults.probe_rate_limits),
        })
    }
}

fn parse_optional_date(field: &str, value: Option<&str>) -> Result<Option<NaiveDate>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(raw, DATE_FORMAT)
            .with_context(|| format!("`{field}` must use YYYY-MM-DD, found `{raw}`"))
            .map(Some)
            .map_err(AppError::from),
    }
}

/// Read the instrument list: spreadsheets use the first column of the first sheet, anything
/// else is read as one symbol per line (first comma-separated field). Blank lines and `#`
/// comments are skipped; repeated symbols are rejected.
pub fn load_instruments(path: &Path) -> Result<Vec<Instrument>> {
    let symbols = if is_spreadsheet(path) {
        read_spreadsheet_symbols(path)?
    } else {
        read_text_symbols(path)?
    };

    let mut seen = HashSet::new();
    let mut instruments = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let instrument = Instrument::new(&symbol)?;
        if !seen.insert(instrument.clone()) {
            return Err(AppError::DuplicateInstrument(instrument.to_string()));
        }
        instruments.push(instrument);
    }

    if instruments.is_empty() {
        return Err(AppError::invalid_input(format!(
            "instrument list {} yielded no symbols",
            path.display()
        )));
    }

    Ok(instruments)
}

fn is_spreadsheet(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SPREADSHEET_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn read_text_symbols(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_path(path)
        .with_context(|| format!("failed to open instrument list {}", path.display()))?;

    let mut symbols = Vec::new();
    for record in reader.records() {
        let record = record.context("Failed to read instrument list record")?;
        if let Some(symbol) = record.get(0).map(str::trim).filter(|s| !s.is_empty()) {
            symbols.push(symbol.to_string());
        }
    }
    Ok(symbols)
}

fn read_spreadsheet_symbols(path: &Path) -> Result<Vec<String>> {
    let mut workbook = open_workbook_auto(path)?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| AppError::message(format!("{} has no worksheets", path.display())))?;
    let range = workbook.worksheet_range(&sheet)?;

    Ok(range
        .rows()
        .filter_map(|row| row.first().and_then(cell_to_string))
        .filter(|symbol| !symbol.starts_with('#'))
        .collect())
}

fn cell_to_string(cell: &Data) -> Option<String> {
    match cell {
        Data::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) if f.is_finite() => Some(f.to_string()),
        _ => None,
    }
}
