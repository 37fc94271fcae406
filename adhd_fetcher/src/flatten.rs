//! Flattening of the raw API snapshot into tabular rows.
//!
//! Every record in the raw result is one leaf and becomes exactly one row.
//! Rows are ordered by `(year, medication position, region code, sex code,
//! age-group code)`; the sort is stable so duplicate keys keep input order.
//! Any code without a label aborts the whole transform.

use log::warn;
use serde_json::Value;

use crate::logging::FLATTEN;
use crate::model::{
    Dimension, FlatRow, FlattenError, Measurement, RawResult, FIELD_AGE_GROUP, FIELD_ATC,
    FIELD_REGION, FIELD_SEX, FIELD_VALUE, FIELD_YEAR,
};
use crate::registry::{Dimensions, Medication};

/// Strings the publisher uses for withheld values.
const SUPPRESSION_MARKERS: &[&str] = &["", "na", "n/a", "-", "null"];

// ---------------------------------------------------------------------------
// Measurement parsing
// ---------------------------------------------------------------------------

/// Converts a `varde` field into a measurement.
///
/// Numbers pass through. Strings may use a decimal comma and contain
/// (no-break) spaces as thousands separators. Suppression markers, `null`
/// and anything unparseable become `Suppressed`; the unparseable case is
/// logged since it usually means the publisher changed its format.
pub fn parse_measurement(raw: &Value) -> Measurement {
    match raw {
        Value::Number(n) => n
            .as_f64()
            .map(Measurement::Value)
            .unwrap_or(Measurement::Suppressed),
        Value::String(s) => parse_measurement_str(s),
        Value::Null => Measurement::Suppressed,
        other => {
            warn!(target: FLATTEN, "Could not parse value: {}", other);
            Measurement::Suppressed
        }
    }
}

fn parse_measurement_str(s: &str) -> Measurement {
    let cleaned: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{00A0}')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    if SUPPRESSION_MARKERS.contains(&cleaned.to_lowercase().as_str()) {
        return Measurement::Suppressed;
    }

    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() => Measurement::Value(v),
        _ => {
            warn!(target: FLATTEN, "Could not parse number: '{}'", s);
            Measurement::Suppressed
        }
    }
}

// ---------------------------------------------------------------------------
// Leaf extraction
// ---------------------------------------------------------------------------

/// Dimension codes and value of a single record.
#[derive(Debug, Clone, PartialEq)]
struct Leaf {
    year: i32,
    region: u32,
    sex: u32,
    age_group: u32,
    measurement: Measurement,
}

/// Reads an integer code that may be sent as a JSON number or a numeric
/// string ("01").
fn code_field(record: &Value, field: &str) -> Result<i64, String> {
    match record.get(field) {
        None | Some(Value::Null) => Err(format!("missing field '{}'", field)),
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| format!("field '{}' is not an integer: {}", field, n)),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("field '{}' is not an integer: '{}'", field, s)),
        Some(other) => Err(format!("field '{}' has unexpected type: {}", field, other)),
    }
}

fn unsigned_code_field(record: &Value, field: &str) -> Result<u32, String> {
    let code = code_field(record, field)?;
    u32::try_from(code).map_err(|_| format!("field '{}' is out of range: {}", field, code))
}

fn parse_leaf(record: &Value) -> Result<Leaf, String> {
    if !record.is_object() {
        return Err(format!("expected a JSON object, got {}", record));
    }

    let year = code_field(record, FIELD_YEAR)?;
    let year = i32::try_from(year).map_err(|_| format!("year out of range: {}", year))?;

    // An absent value is a withheld value, not a malformed record.
    let measurement = record
        .get(FIELD_VALUE)
        .map(parse_measurement)
        .unwrap_or(Measurement::Suppressed);

    Ok(Leaf {
        year,
        region: unsigned_code_field(record, FIELD_REGION)?,
        sex: unsigned_code_field(record, FIELD_SEX)?,
        age_group: unsigned_code_field(record, FIELD_AGE_GROUP)?,
        measurement,
    })
}

fn lookup<'a>(
    label: Option<&'a str>,
    dimension: Dimension,
    code: u32,
    medication: &str,
) -> Result<&'a str, FlattenError> {
    label.ok_or_else(|| FlattenError::UnknownCode {
        dimension,
        code: code.to_string(),
        medication: medication.to_string(),
    })
}

/// Resolves a snapshot key to a configured medication.
///
/// Keys are normally ATC codes. Snapshots keyed by medication name are
/// matched by name, then by the `atcId` carried on their records.
fn resolve_medication<'a>(
    dims: &'a Dimensions,
    key: &str,
    records: &[Value],
) -> Result<(usize, &'a Medication), FlattenError> {
    if let Some(found) = dims.medication(key).or_else(|| dims.medication_by_name(key)) {
        return Ok(found);
    }

    let record_code = records
        .iter()
        .find_map(|r| r.get(FIELD_ATC).and_then(Value::as_str));
    if let Some(found) = record_code.and_then(|code| dims.medication(code)) {
        return Ok(found);
    }

    Err(FlattenError::UnknownCode {
        dimension: Dimension::Medication,
        code: key.to_string(),
        medication: key.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Flatten
// ---------------------------------------------------------------------------

type SortKey = (i32, usize, u32, u32, u32);

/// Flattens the raw result into labelled rows, one per leaf.
pub fn flatten(raw: &RawResult, dims: &Dimensions) -> Result<Vec<FlatRow>, FlattenError> {
    let mut keyed: Vec<(SortKey, FlatRow)> = Vec::with_capacity(raw.leaf_count());

    for (key, records) in &raw.medications {
        let (rank, medication) = resolve_medication(dims, key, records)?;
        let medication_label = medication.label();

        for (index, record) in records.iter().enumerate() {
            let leaf = parse_leaf(record).map_err(|reason| FlattenError::MalformedRecord {
                medication: medication_label.clone(),
                index,
                reason,
            })?;

            let region = lookup(
                dims.region_label(leaf.region),
                Dimension::Region,
                leaf.region,
                &medication_label,
            )?;
            let sex = lookup(
                dims.sex_label(leaf.sex),
                Dimension::Sex,
                leaf.sex,
                &medication_label,
            )?;
            let age_group = lookup(
                dims.age_group_label(leaf.age_group),
                Dimension::AgeGroup,
                leaf.age_group,
                &medication_label,
            )?;

            keyed.push((
                (leaf.year, rank, leaf.region, leaf.sex, leaf.age_group),
                FlatRow {
                    year: leaf.year,
                    medication: medication_label.clone(),
                    region: region.to_string(),
                    sex: sex.to_string(),
                    age_group: age_group.to_string(),
                    measurement: leaf.measurement,
                },
            ));
        }
    }

    keyed.sort_by_key(|(key, _)| *key);
    Ok(keyed.into_iter().map(|(_, row)| row).collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
