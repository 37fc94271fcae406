//! Fetch → validate → flatten → write.
//!
//! Nothing is written until both the fetch and the transform have
//! succeeded. The snapshot and the CSV are then staged together and only
//! renamed into place once both are written, so a failed run never leaves
//! one fresh file next to a stale one.

use std::path::PathBuf;

use log::{error, info};

use crate::config::{Config, ConfigError};
use crate::flatten::flatten;
use crate::ingest::socialstyrelsen;
use crate::logging::{self, FLATTEN, SYSTEM};
use crate::model::{FetchError, FlattenError, OutputError, RawResult};
use crate::output;
use crate::validate::validate_raw;

/// Any failure of a run. Each variant maps to its own exit code.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("the API returned no records for any medication")]
    EmptyResult,
    #[error(transparent)]
    Flatten(#[from] FlattenError),
    #[error(transparent)]
    Output(#[from] OutputError),
}

impl Error {
    /// Process exit code for the scheduling wrapper. Always non-zero.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Config(_) => 2,
            Error::Fetch(_) => 3,
            Error::EmptyResult => 4,
            Error::Flatten(_) => 5,
            Error::Output(_) => 6,
        }
    }
}

/// What a run starts from.
#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    /// Query the API, then write the snapshot and the CSV.
    Fetch,
    /// Re-flatten a saved snapshot; only the CSV is written.
    Convert { snapshot: PathBuf },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub records: usize,
    pub rows: usize,
    pub suppressed: usize,
    pub json_path: Option<PathBuf>,
    pub csv_path: PathBuf,
}

/// Run the pipeline with the live API client.
pub fn run(config: &Config, mode: &Mode) -> Result<RunSummary, Error> {
    run_with(config, mode, || {
        let client = socialstyrelsen::build_client(&config.api)?;
        socialstyrelsen::fetch_medications(
            &client,
            &config.api,
            &config.query(),
            &config.medications,
        )
    })
}

/// Run the pipeline with the fetch stage injected.
pub fn run_with<F>(config: &Config, mode: &Mode, fetch: F) -> Result<RunSummary, Error>
where
    F: FnOnce() -> Result<RawResult, FetchError>,
{
    config.validate()?;
    let csv_settings = config.csv_settings()?;
    let dims = config.dimensions();

    let (raw, json_path) = match mode {
        Mode::Fetch => {
            logging::log_run_parameters(
                config.medications.len(),
                config.query.first_year,
                config.query.last_year,
                config.query().regions.len(),
            );
            info!(target: SYSTEM, "Starting full data fetch...");
            let raw = fetch()?;
            let report = validate_raw(&raw);
            if !report.has_data() {
                error!(target: SYSTEM, "Data validation failed: no records fetched");
                return Err(Error::EmptyResult);
            }
            (raw, Some(config.output.json_path.clone()))
        }
        Mode::Convert { snapshot } => (output::read_json_snapshot(snapshot)?, None),
    };

    info!(
        target: FLATTEN,
        "Converting {} records from {} medications",
        raw.leaf_count(),
        raw.medications.len()
    );
    let rows = flatten(&raw, &dims)?;
    let suppressed = rows.iter().filter(|r| r.measurement.is_suppressed()).count();
    if let (Some(first), Some(last)) = (rows.first(), rows.last()) {
        info!(
            target: FLATTEN,
            "Data spans {}-{}, {} rows ({} suppressed)",
            first.year,
            last.year,
            rows.len(),
            suppressed
        );
    }

    output::write_outputs(
        json_path.as_deref().map(|path| (&raw, path)),
        &rows,
        &config.output.csv_path,
        &csv_settings,
    )?;

    info!(target: SYSTEM, "Process completed successfully");
    Ok(RunSummary {
        records: raw.leaf_count(),
        rows: rows.len(),
        suppressed,
        json_path,
        csv_path: config.output.csv_path.clone(),
    })
}
