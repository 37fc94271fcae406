//! Raw Result Validation
//!
//! Sanity checks on a freshly fetched raw result before anything is
//! written: which medications came back empty and which records lack the
//! fields the flattening step relies on. Findings are warnings; only a
//! completely empty fetch is treated as a failure by the pipeline.

use log::{info, warn};

use crate::logging::FETCH;
use crate::model::{REQUIRED_FIELDS, RawResult};

// ============================================================================
// Validation Results
// ============================================================================

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub medications: Vec<MedicationValidation>,
    pub summary: ValidationSummary,
}

#[derive(Debug, Clone)]
pub struct MedicationValidation {
    pub atc_code: String,
    pub status: ValidationStatus,
    pub record_count: usize,
    /// Indices of records missing at least one required field
    pub incomplete_records: Vec<usize>,
    /// Required fields missing from at least one record
    pub missing_fields: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ValidationSummary {
    pub medications_total: usize,
    pub medications_with_data: usize,
    pub medications_empty: usize,
    pub records_total: usize,
    pub records_incomplete: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationStatus {
    Complete,
    Incomplete,
    Empty,
}

impl ValidationReport {
    /// True when at least one record was fetched.
    pub fn has_data(&self) -> bool {
        self.summary.records_total > 0
    }
}

// ============================================================================
// Validation
// ============================================================================

fn validate_medication(atc_code: &str, records: &[serde_json::Value]) -> MedicationValidation {
    let mut incomplete_records = Vec::new();
    let mut missing_fields: Vec<String> = Vec::new();

    for (index, record) in records.iter().enumerate() {
        let missing: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|field| record.get(field).is_none())
            .collect();
        if missing.is_empty() {
            continue;
        }
        incomplete_records.push(index);
        for field in missing {
            if !missing_fields.iter().any(|f| f == field) {
                missing_fields.push(field.to_string());
            }
        }
    }

    let status = if records.is_empty() {
        ValidationStatus::Empty
    } else if incomplete_records.is_empty() {
        ValidationStatus::Complete
    } else {
        ValidationStatus::Incomplete
    };

    MedicationValidation {
        atc_code: atc_code.to_string(),
        status,
        record_count: records.len(),
        incomplete_records,
        missing_fields,
    }
}

/// Check every medication of a raw result and log the findings.
pub fn validate_raw(raw: &RawResult) -> ValidationReport {
    let medications: Vec<MedicationValidation> = raw
        .medications
        .iter()
        .map(|(code, records)| validate_medication(code, records))
        .collect();

    for m in &medications {
        match m.status {
            ValidationStatus::Empty => warn!(target: FETCH, "[{}] No records", m.atc_code),
            ValidationStatus::Incomplete => warn!(
                target: FETCH,
                "[{}] {} of {} records missing fields: {}",
                m.atc_code,
                m.incomplete_records.len(),
                m.record_count,
                m.missing_fields.join(", ")
            ),
            ValidationStatus::Complete => {
                info!(target: FETCH, "[{}] {} records", m.atc_code, m.record_count)
            }
        }
    }

    let summary = ValidationSummary {
        medications_total: medications.len(),
        medications_with_data: medications.iter().filter(|m| m.record_count > 0).count(),
        medications_empty: medications
            .iter()
            .filter(|m| m.status == ValidationStatus::Empty)
            .count(),
        records_total: medications.iter().map(|m| m.record_count).sum(),
        records_incomplete: medications.iter().map(|m| m.incomplete_records.len()).sum(),
    };

    info!(
        target: FETCH,
        "Validation completed: {} total records",
        summary.records_total
    );

    ValidationReport {
        medications,
        summary,
    }
}
