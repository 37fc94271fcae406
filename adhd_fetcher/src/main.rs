use std::path::PathBuf;
use std::process::ExitCode;

use adhd_fetcher::config::Config;
use adhd_fetcher::logging::{self, SYSTEM};
use adhd_fetcher::pipeline::{self, Mode};
use clap::Parser;
use log::{error, info};

#[derive(Parser, Debug)]
#[command(version, about = "Fetch ADHD medication statistics from Socialstyrelsen", long_about = None)]
struct Args {
    /// TOML config file (default: ./adhd_fetcher.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Skip the API and re-flatten a saved JSON snapshot
    #[arg(long, value_name = "SNAPSHOT")]
    from_json: Option<PathBuf>,

    /// Where to write the raw JSON snapshot
    #[arg(long)]
    json_out: Option<PathBuf>,

    /// Where to write the flattened CSV
    #[arg(long)]
    csv_out: Option<PathBuf>,

    /// Log level: error, warn, info, debug, trace
    #[arg(long)]
    log_level: Option<String>,

    /// Append log lines to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Do not write a log file
    #[arg(long, conflicts_with = "log_file")]
    no_log_file: bool,
}

fn load_config(args: &Args) -> Result<Config, pipeline::Error> {
    let mut config = Config::load(args.config.as_deref())?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;

    if let Some(path) = &args.json_out {
        config.output.json_path = path.clone();
    }
    if let Some(path) = &args.csv_out {
        config.output.csv_path = path.clone();
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if let Some(path) = &args.log_file {
        config.logging.file = Some(path.clone());
    }
    if args.no_log_file {
        config.logging.file = None;
    }
    Ok(config)
}

/// Run this job from cron; a non-zero exit code means the run failed.
fn main() -> ExitCode {
    let args = Args::parse();
    dotenv::dotenv().ok();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(e.exit_code());
        }
    };

    let level = match config.logging.level_filter() {
        Ok(level) => level,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(pipeline::Error::from(e).exit_code());
        }
    };
    if let Err(e) = logging::init_logger(level, config.logging.file.clone(), config.logging.timestamps) {
        eprintln!("Failed to initialise logging: {}", e);
    }

    info!(target: SYSTEM, "ADHD Medication Data Fetcher Started");

    let mode = match args.from_json {
        Some(snapshot) => Mode::Convert { snapshot },
        None => Mode::Fetch,
    };

    match pipeline::run(&config, &mode) {
        Ok(summary) => {
            info!(
                target: SYSTEM,
                "{} records -> {} rows written to {}",
                summary.records,
                summary.rows,
                summary.csv_path.display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(target: SYSTEM, "Process failed: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
