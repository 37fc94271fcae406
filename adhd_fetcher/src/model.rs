/// Core data types for the ADHD medication statistics fetcher.
///
/// This module defines the shared domain model imported by all other modules:
/// the raw API snapshot, the flattened row, the measurement value and the
/// error types for each pipeline stage. It performs no I/O.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// API constants
// ---------------------------------------------------------------------------

/// Results endpoint for measure 2 (patients per 1000 inhabitants) of the
/// Socialstyrelsen medicines database.
pub const DEFAULT_BASE_URL: &str =
    "https://sdb.socialstyrelsen.se/api/v1/sv/lakemedel/resultat/matt/2";

/// Record fields every leaf is expected to carry.
pub const FIELD_YEAR: &str = "ar";
pub const FIELD_REGION: &str = "regionId";
pub const FIELD_SEX: &str = "konId";
pub const FIELD_AGE_GROUP: &str = "alderId";
pub const FIELD_VALUE: &str = "varde";
/// ATC code carried on each record; not required by the transform.
pub const FIELD_ATC: &str = "atcId";

pub const REQUIRED_FIELDS: &[&str] = &[
    FIELD_YEAR,
    FIELD_REGION,
    FIELD_SEX,
    FIELD_AGE_GROUP,
    FIELD_VALUE,
];

/// CSV header, in column order.
pub const CSV_HEADER: [&str; 6] = [
    "År",
    "Läkemedel",
    "Region",
    "Kön",
    "Ålder",
    "Patienter/1000 invånare",
];

// ---------------------------------------------------------------------------
// Raw result
// ---------------------------------------------------------------------------

/// The verbatim API response for one fetch invocation, keyed by ATC code.
///
/// Each record is kept as the untouched JSON object the API returned so the
/// snapshot on disk stays the durable source of truth. A `BTreeMap` keeps
/// serialization order independent of fetch order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawResult {
    pub medications: BTreeMap<String, Vec<Value>>,
}

impl RawResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of leaf records across all medications.
    pub fn leaf_count(&self) -> usize {
        self.medications.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_count() == 0
    }
}

// ---------------------------------------------------------------------------
// Query parameters
// ---------------------------------------------------------------------------

/// Dimension filters sent with every request.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub regions: Vec<u32>,
    pub age_groups: Vec<u32>,
    pub sexes: Vec<u32>,
    pub years: Vec<i32>,
}

// ---------------------------------------------------------------------------
// Flat rows
// ---------------------------------------------------------------------------

/// A single data point: either a number or an explicit suppression marker.
///
/// Small counts are redacted by the publisher; `Suppressed` keeps that fact
/// visible instead of collapsing it into zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measurement {
    Value(f64),
    Suppressed,
}

impl Measurement {
    pub fn is_suppressed(&self) -> bool {
        matches!(self, Measurement::Suppressed)
    }

    /// Renders the value with at most three decimals, trailing zeros trimmed.
    /// `missing` is written for suppressed values.
    pub fn render(&self, missing: &str) -> String {
        match self {
            Measurement::Value(v) => format_value(*v),
            Measurement::Suppressed => missing.to_string(),
        }
    }
}

fn format_value(v: f64) -> String {
    let fixed = format!("{:.3}", v);
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        // "-0.000" trims to "-0"
        "-0" | "" => "0".to_string(),
        other => other.to_string(),
    }
}

/// One output row. Labels are display names, never raw codes.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatRow {
    pub year: i32,
    pub medication: String,
    pub region: String,
    pub sex: String,
    pub age_group: String,
    pub measurement: Measurement,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Dimensions a leaf is positioned by, used to name the failing lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Medication,
    Region,
    Sex,
    AgeGroup,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Medication => write!(f, "medication"),
            Dimension::Region => write!(f, "region"),
            Dimension::Sex => write!(f, "sex"),
            Dimension::AgeGroup => write!(f, "age group"),
        }
    }
}

/// Errors that can arise when fetching data from the statistics API.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Non-2xx HTTP response.
    #[error("HTTP error {status} for {url}")]
    Http { status: u16, url: String },
    /// The request never produced a response (DNS, connect, timeout, body read).
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The response body was not the expected page document.
    #[error("Parse error: {0}")]
    Parse(String),
    /// A `nasta_sida` link pointed back at a page already fetched.
    #[error("Pagination loop detected at {0}")]
    PaginationLoop(String),
}

/// Errors raised by the flattening transform.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FlattenError {
    /// A leaf referenced a code with no display label.
    #[error("unknown {dimension} code '{code}' in records for {medication}")]
    UnknownCode {
        dimension: Dimension,
        code: String,
        medication: String,
    },
    /// A record lacked a dimension field or carried a non-integer code.
    #[error("malformed record #{index} for {medication}: {reason}")]
    MalformedRecord {
        medication: String,
        index: usize,
        reason: String,
    },
}

/// Errors raised while reading or writing output files.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error on {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
