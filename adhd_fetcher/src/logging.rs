/// Structured logging for the ADHD medication fetcher
///
/// Implements the `log` facade with a console + file sink. Console lines
/// are short (the cron wrapper mails stdout/stderr as-is); file lines carry
/// a UTC timestamp, level and pipeline stage so a failed run can be traced
/// after the fact.

use chrono::Utc;
use log::{LevelFilter, Log, Metadata, Record, debug, error, info, warn};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::model::FetchError;

// ---------------------------------------------------------------------------
// Pipeline stages (log targets)
// ---------------------------------------------------------------------------

pub const FETCH: &str = "fetch";
pub const FLATTEN: &str = "flatten";
pub const OUTPUT: &str = "output";
pub const CONFIG: &str = "config";
pub const SYSTEM: &str = "system";

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Likely to succeed on the next scheduled run (timeouts, 429, 5xx)
    Transient,
    /// Needs a human: bad request, unknown code, API format change
    Permanent,
    /// Cannot tell from the error alone
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Transient => write!(f, "TRANSIENT"),
            FailureType::Permanent => write!(f, "PERMANENT"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Classify an HTTP status code
pub fn classify_status(status: u16) -> FailureType {
    match status {
        408 | 429 => FailureType::Transient,
        500..=599 => FailureType::Transient,
        400..=499 => FailureType::Permanent,
        _ => FailureType::Unknown,
    }
}

/// Classify a fetch failure based on the error variant
pub fn classify_fetch_failure(err: &FetchError) -> FailureType {
    match err {
        FetchError::Http { status, .. } => classify_status(*status),
        FetchError::Transport(e) => {
            if e.is_timeout() || e.is_connect() {
                FailureType::Transient
            } else if let Some(status) = e.status() {
                classify_status(status.as_u16())
            } else {
                FailureType::Unknown
            }
        }
        // Parse errors suggest API changes
        FetchError::Parse(_) | FetchError::PaginationLoop(_) => FailureType::Permanent,
    }
}

// ---------------------------------------------------------------------------
// Logger
// ---------------------------------------------------------------------------

pub struct Logger {
    /// Minimum log level to emit
    min_level: LevelFilter,
    /// Optional file path for logging
    log_file: Option<PathBuf>,
    /// Whether to include timestamps in console output
    console_timestamps: bool,
}

impl Logger {
    pub fn new(min_level: LevelFilter, log_file: Option<PathBuf>, console_timestamps: bool) -> Self {
        Self {
            min_level,
            log_file,
            console_timestamps,
        }
    }

    fn append_to_file(path: &Path, entry: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

/// Format a file log line: `2024-05-01 12:00:00 UTC INFO fetch: message`
pub fn format_entry(timestamp: &str, level: log::Level, target: &str, message: &str) -> String {
    format!("{} {} {}: {}", timestamp, level, target, message)
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.min_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
        let message = record.args().to_string();
        let entry = format_entry(&timestamp, record.level(), record.target(), &message);

        if self.console_timestamps {
            match record.level() {
                log::Level::Error | log::Level::Warn => eprintln!("{}", entry),
                _ => println!("{}", entry),
            }
        } else {
            match record.level() {
                log::Level::Error => eprintln!("   ✗ {}: {}", record.target(), message),
                log::Level::Warn => eprintln!("   ⚠ {}: {}", record.target(), message),
                log::Level::Info => println!("   {}", message),
                log::Level::Debug | log::Level::Trace => println!("   [DEBUG] {}", message),
            }
        }

        if let Some(ref path) = self.log_file {
            if let Err(e) = Self::append_to_file(path, &entry) {
                eprintln!("Failed to write to log file {}: {}", path.display(), e);
            }
        }
    }

    fn flush(&self) {}
}

/// Install the process-wide logger. Fails if a logger is already set.
pub fn init_logger(
    min_level: LevelFilter,
    log_file: Option<PathBuf>,
    console_timestamps: bool,
) -> Result<(), log::SetLoggerError> {
    log::set_boxed_logger(Box::new(Logger::new(min_level, log_file, console_timestamps)))?;
    log::set_max_level(min_level);
    Ok(())
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a fetch failure with automatic classification
pub fn log_fetch_failure(atc_code: &str, operation: &str, err: &FetchError) {
    let failure_type = classify_fetch_failure(err);
    error!(target: FETCH, "[{}] {} failed [{}]: {}", atc_code, operation, failure_type, err);
}

/// Log a summary of a fetch run
pub fn log_fetch_summary(total: usize, successful: usize, records: usize) {
    let message = format!(
        "Fetch complete: {}/{} medications, {} total records",
        successful, total, records
    );

    if successful == total && records > 0 {
        info!(target: FETCH, "{}", message);
    } else if successful == 0 || records == 0 {
        error!(target: FETCH, "{}", message);
    } else {
        warn!(target: FETCH, "{}", message);
    }
}

/// Log the effective run parameters at debug level
pub fn log_run_parameters(medications: usize, first_year: i32, last_year: i32, regions: usize) {
    debug!(
        target: CONFIG,
        "{} medications, years {}-{}, {} regions",
        medications, first_year, last_year, regions
    );
}
