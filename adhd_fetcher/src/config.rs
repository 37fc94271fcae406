//! Runtime configuration.
//!
//! Layering, lowest to highest precedence: built-in defaults, an optional
//! TOML file, environment variables (a `.env` file is honoured through
//! `dotenv`), then command-line flags applied by `main`.
//!
//! ```toml
//! [api]
//! base_url = "https://sdb.socialstyrelsen.se/api/v1/sv/lakemedel/resultat/matt/2"
//! timeout_secs = 60
//!
//! [query]
//! first_year = 2006
//! last_year = 2024
//! regions = [0, 1, 12, 14]   # omit for every labelled region
//!
//! [output]
//! json_path = "adhd_medication_2006-2024.json"
//! csv_path = "adhd_medication_flat.csv"
//! delimiter = ";"
//! missing_marker = "NA"
//!
//! [logging]
//! level = "info"
//! file = "adhd_fetcher.log"
//!
//! [[medications]]
//! atc_code = "N06BA04"
//! name = "Metylfenidat"
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::LevelFilter;
use serde::Deserialize;

use crate::model::{DEFAULT_BASE_URL, Query};
use crate::registry::{
    DEFAULT_FIRST_YEAR, DEFAULT_LAST_YEAR, Dimensions, Medication, default_medications,
    is_valid_atc_code,
};

/// Config file picked up from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "adhd_fetcher.toml";

pub const ENV_BASE_URL: &str = "ADHD_FETCHER_BASE_URL";
pub const ENV_TIMEOUT_SECS: &str = "ADHD_FETCHER_TIMEOUT_SECS";
pub const ENV_LOG_LEVEL: &str = "ADHD_FETCHER_LOG_LEVEL";
pub const ENV_LOG_FILE: &str = "ADHD_FETCHER_LOG_FILE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 60,
            user_agent: concat!("adhd_fetcher/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Query filters. Code lists left out mean "every labelled code".
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuerySettings {
    pub first_year: i32,
    pub last_year: i32,
    pub regions: Option<Vec<u32>>,
    pub sexes: Option<Vec<u32>>,
    pub age_groups: Option<Vec<u32>>,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            first_year: DEFAULT_FIRST_YEAR,
            last_year: DEFAULT_LAST_YEAR,
            regions: None,
            sexes: None,
            age_groups: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSettings {
    pub json_path: PathBuf,
    pub csv_path: PathBuf,
    pub delimiter: String,
    pub missing_marker: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            json_path: PathBuf::from(format!(
                "adhd_medication_{}-{}.json",
                DEFAULT_FIRST_YEAR, DEFAULT_LAST_YEAR
            )),
            csv_path: PathBuf::from("adhd_medication_flat.csv"),
            delimiter: ";".to_string(),
            missing_marker: "NA".to_string(),
        }
    }
}

/// Delimited-output settings in the form the CSV writer needs.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvSettings {
    pub delimiter: u8,
    pub missing_marker: String,
}

impl Default for CsvSettings {
    fn default() -> Self {
        Self {
            delimiter: b';',
            missing_marker: "NA".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    pub level: String,
    pub file: Option<PathBuf>,
    /// Full timestamped lines on the console instead of the short form
    pub timestamps: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some(PathBuf::from("adhd_fetcher.log")),
            timestamps: false,
        }
    }
}

impl LoggingSettings {
    pub fn level_filter(&self) -> Result<LevelFilter, ConfigError> {
        LevelFilter::from_str(self.level.trim())
            .map_err(|_| ConfigError::Invalid(format!("unknown log level '{}'", self.level)))
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub api: ApiSettings,
    pub query: QuerySettings,
    pub output: OutputSettings,
    pub logging: LoggingSettings,
    pub medications: Vec<Medication>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiSettings::default(),
            query: QuerySettings::default(),
            output: OutputSettings::default(),
            logging: LoggingSettings::default(),
            medications: default_medications(),
        }
    }
}

impl Config {
    pub fn from_toml_str(text: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    /// Read a config file. A missing explicit path is an error; with no
    /// path, `DEFAULT_CONFIG_FILE` is used if present, else the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !fallback.exists() {
                    return Ok(Self::default());
                }
                fallback
            }
        };

        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text, &path.display().to_string())
    }

    /// Apply environment overrides. `lookup` is `std::env::var` in
    /// production and a map in tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BASE_URL) {
            self.api.base_url = url;
        }
        if let Some(secs) = lookup(ENV_TIMEOUT_SECS) {
            self.api.timeout_secs = secs.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{} must be a whole number, got '{}'", ENV_TIMEOUT_SECS, secs))
            })?;
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        if let Some(file) = lookup(ENV_LOG_FILE) {
            self.logging.file = if file.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(file))
            };
        }
        Ok(())
    }

    /// The label lookup for this run.
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::with_medications(self.medications.clone())
    }

    /// The request filters for this run.
    pub fn query(&self) -> Query {
        let dims = self.dimensions();
        Query {
            regions: self.query.regions.clone().unwrap_or_else(|| dims.region_codes()),
            age_groups: self
                .query
                .age_groups
                .clone()
                .unwrap_or_else(|| dims.age_group_codes()),
            sexes: self.query.sexes.clone().unwrap_or_else(|| dims.sex_codes()),
            years: (self.query.first_year..=self.query.last_year).collect(),
        }
    }

    pub fn csv_settings(&self) -> Result<CsvSettings, ConfigError> {
        let delimiter = match self.output.delimiter.as_bytes() {
            [b] if b.is_ascii() && *b != b'"' && *b != b'\n' && *b != b'\r' => *b,
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "delimiter must be a single ASCII character, got '{}'",
                    self.output.delimiter
                )));
            }
        };
        if self.output.missing_marker.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "missing_marker must not be blank".to_string(),
            ));
        }
        Ok(CsvSettings {
            delimiter,
            missing_marker: self.output.missing_marker.clone(),
        })
    }

    /// Reject configurations that would only fail later, mid-run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("api.base_url is empty".to_string()));
        }
        if self.api.timeout_secs == 0 {
            return Err(ConfigError::Invalid("api.timeout_secs must be positive".to_string()));
        }
        if self.query.first_year > self.query.last_year {
            return Err(ConfigError::Invalid(format!(
                "query.first_year {} is after query.last_year {}",
                self.query.first_year, self.query.last_year
            )));
        }

        if self.medications.is_empty() {
            return Err(ConfigError::Invalid("no medications configured".to_string()));
        }
        let mut seen = HashSet::new();
        for medication in &self.medications {
            if !is_valid_atc_code(&medication.atc_code) {
                return Err(ConfigError::Invalid(format!(
                    "'{}' is not a valid ATC code",
                    medication.atc_code
                )));
            }
            if !seen.insert(medication.atc_code.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "medication {} listed twice",
                    medication.atc_code
                )));
            }
        }

        // Every requested code needs a label, otherwise flattening the
        // response is bound to fail.
        let dims = self.dimensions();
        let query = self.query();
        check_codes("region", &query.regions, |c| dims.region_label(c).is_some())?;
        check_codes("sex", &query.sexes, |c| dims.sex_label(c).is_some())?;
        check_codes("age group", &query.age_groups, |c| dims.age_group_label(c).is_some())?;

        self.csv_settings()?;
        self.logging.level_filter()?;
        Ok(())
    }
}

fn check_codes<F>(dimension: &str, codes: &[u32], known: F) -> Result<(), ConfigError>
where
    F: Fn(u32) -> bool,
{
    if codes.is_empty() {
        return Err(ConfigError::Invalid(format!("no {} codes selected", dimension)));
    }
    match codes.iter().find(|c| !known(**c)) {
        Some(code) => Err(ConfigError::Invalid(format!(
            "{} code {} has no label",
            dimension, code
        ))),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();

        let query = config.query();
        assert_eq!(query.years.first(), Some(&2006));
        assert_eq!(query.years.last(), Some(&2024));
        assert_eq!(query.years.len(), 19);
        assert_eq!(query.sexes, vec![1, 2, 3]);
        assert_eq!(query.age_groups, vec![1, 2, 3, 4]);
        assert_eq!(query.regions.len(), 22);
        assert_eq!(config.medications.len(), 5);
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [query]
            first_year = 2020
            last_year = 2023
            regions = [0, 1]

            [output]
            delimiter = ","

            [[medications]]
            atc_code = "N06BA04"
            name = "Metylfenidat"
            "#,
            "test.toml",
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(config.api, ApiSettings::default());
        assert_eq!(config.query().years, vec![2020, 2021, 2022, 2023]);
        assert_eq!(config.query().regions, vec![0, 1]);
        assert_eq!(config.medications, vec![Medication::new("N06BA04", "Metylfenidat")]);
        assert_eq!(config.csv_settings().unwrap().delimiter, b',');
        assert_eq!(config.output.missing_marker, "NA");
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let err = Config::from_toml_str("[api]\nbase_ulr = \"x\"\n", "test.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_reads_file_and_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fetcher.toml");
        fs::write(&path, "[api]\ntimeout_secs = 5\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.api.timeout_secs, 5);

        let missing = dir.path().join("nope.toml");
        assert!(matches!(Config::load(Some(&missing)), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_BASE_URL, "http://localhost:8080/matt/2"),
            (ENV_TIMEOUT_SECS, "15"),
            (ENV_LOG_LEVEL, "debug"),
            (ENV_LOG_FILE, ""),
        ]);
        let mut config = Config::default();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.api.base_url, "http://localhost:8080/matt/2");
        assert_eq!(config.api.timeout_secs, 15);
        assert_eq!(config.logging.level_filter().unwrap(), LevelFilter::Debug);
        assert_eq!(config.logging.file, None);
    }

    #[test]
    fn test_bad_timeout_override_is_an_error() {
        let mut config = Config::default();
        let result = config.apply_env_overrides(|k| {
            (k == ENV_TIMEOUT_SECS).then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_unlabelled_codes() {
        let mut config = Config::default();
        config.query.regions = Some(vec![0, 2]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("region code 2"), "got: {}", err);

        let mut config = Config::default();
        config.query.age_groups = Some(vec![5]);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.query.sexes = Some(vec![]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_medications_and_years() {
        let mut config = Config::default();
        config.medications.push(Medication::new("N06BA04", "Metylfenidat igen"));
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.medications = vec![Medication::new("N06B", "Kort")];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.medications.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.query.first_year = 2025;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_delimiter_and_level() {
        let mut config = Config::default();
        config.output.delimiter = ";;".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.output.delimiter = "\t".to_string();
        assert_eq!(config.csv_settings().unwrap().delimiter, b'\t');

        let mut config = Config::default();
        config.output.missing_marker = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }
}
