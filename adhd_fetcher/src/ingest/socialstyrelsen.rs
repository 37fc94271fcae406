/// Socialstyrelsen Statistics Database API Client
///
/// Retrieves prescription statistics from the medicines register
/// ("Läkemedel") of the Swedish National Board of Health and Welfare.
/// Results are paginated: each page carries a `data` array and a
/// `nasta_sida` ("next page") URL that is null on the last page.
///
/// API Documentation: https://sdb.socialstyrelsen.se/sdbapi.aspx

use std::collections::HashSet;
use std::time::Duration;

use log::{debug, info};
use serde::Deserialize;
use serde_json::Value;

use crate::config::ApiSettings;
use crate::logging::{self, FETCH};
use crate::model::{FetchError, Query, RawResult};
use crate::registry::Medication;

// ============================================================================
// API Response Structures
// ============================================================================

/// One page of a results query
#[derive(Debug, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub data: Vec<Value>,
    /// URL of the next page, absent or null on the last page
    #[serde(default)]
    pub nasta_sida: Option<String>,
}

// ============================================================================
// URL Construction
// ============================================================================

fn join_codes<T: ToString>(codes: &[T]) -> String {
    codes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Build the results URL for one medication and the query filters
///
/// Shape: `{base}/atc/{code}/region/{..}/alder/{..}/kon/{..}/ar/{..}`
pub fn build_result_url(base_url: &str, atc_code: &str, query: &Query) -> String {
    let url = format!(
        "{}/atc/{}/region/{}/alder/{}/kon/{}/ar/{}",
        base_url.trim_end_matches('/'),
        atc_code,
        join_codes(&query.regions),
        join_codes(&query.age_groups),
        join_codes(&query.sexes),
        join_codes(&query.years),
    );
    debug!(target: FETCH, "Built URL: {}", url);
    url
}

// ============================================================================
// Page Handling
// ============================================================================

/// Parse a page body
pub fn parse_page(body: &str) -> Result<Page, FetchError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| FetchError::Parse(format!("invalid JSON: {}", e)))?;

    if !value.is_object() {
        return Err(FetchError::Parse(format!(
            "expected a JSON object, got {}",
            type_name(&value)
        )));
    }
    if let Some(data) = value.get("data") {
        if !data.is_array() && !data.is_null() {
            return Err(FetchError::Parse(format!(
                "expected `data` to be an array, got {}",
                type_name(data)
            )));
        }
    }

    serde_json::from_value(value).map_err(|e| FetchError::Parse(e.to_string()))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Follow `nasta_sida` links from `first_url`, concatenating every page's
/// records. `fetch_page` performs the actual request.
pub fn collect_pages<F>(first_url: &str, mut fetch_page: F) -> Result<Vec<Value>, FetchError>
where
    F: FnMut(&str) -> Result<Page, FetchError>,
{
    let mut records = Vec::new();
    let mut visited = HashSet::new();
    let mut next = Some(first_url.to_string());
    let mut page_no = 0usize;

    while let Some(url) = next.take() {
        if !visited.insert(url.clone()) {
            return Err(FetchError::PaginationLoop(url));
        }
        page_no += 1;
        debug!(target: FETCH, "Fetching page {}", page_no);

        let page = fetch_page(&url)?;
        debug!(target: FETCH, "Page {}: {} records", page_no, page.data.len());
        records.extend(page.data);

        next = page.nasta_sida.filter(|u| !u.trim().is_empty());
    }

    debug!(target: FETCH, "Fetched {} records across {} pages", records.len(), page_no);
    Ok(records)
}

// ============================================================================
// API Client Functions
// ============================================================================

/// Build the blocking HTTP client used for all requests
pub fn build_client(settings: &ApiSettings) -> Result<reqwest::blocking::Client, FetchError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(settings.timeout_secs))
        .user_agent(settings.user_agent.as_str())
        .build()?;
    Ok(client)
}

/// Fetch a single page
pub fn fetch_page(client: &reqwest::blocking::Client, url: &str) -> Result<Page, FetchError> {
    let response = client
        .get(url)
        .header("Accept", "application/json")
        .send()?;

    if !response.status().is_success() {
        return Err(FetchError::Http {
            status: response.status().as_u16(),
            url: url.to_string(),
        });
    }

    let body = response.text()?;
    parse_page(&body)
}

/// Fetch every page of a paginated results query
pub fn fetch_paginated(
    client: &reqwest::blocking::Client,
    url: &str,
) -> Result<Vec<Value>, FetchError> {
    collect_pages(url, |page_url| fetch_page(client, page_url))
}

/// Fetch all medications, one request chain each, in order.
///
/// The first failure aborts the run; a partial result is never returned.
pub fn fetch_medications(
    client: &reqwest::blocking::Client,
    settings: &ApiSettings,
    query: &Query,
    medications: &[Medication],
) -> Result<RawResult, FetchError> {
    fetch_medications_with(settings, query, medications, |url| {
        fetch_paginated(client, url)
    })
}

/// Same as `fetch_medications` with the paginated fetch injected.
pub fn fetch_medications_with<F>(
    settings: &ApiSettings,
    query: &Query,
    medications: &[Medication],
    mut fetch: F,
) -> Result<RawResult, FetchError>
where
    F: FnMut(&str) -> Result<Vec<Value>, FetchError>,
{
    let mut raw = RawResult::new();
    let mut successful = 0;

    for medication in medications {
        info!(target: FETCH, "Fetching data for {} ({})...", medication.name, medication.atc_code);

        let url = build_result_url(&settings.base_url, &medication.atc_code, query);
        let records = match fetch(&url) {
            Ok(records) => records,
            Err(e) => {
                logging::log_fetch_failure(&medication.atc_code, "fetch", &e);
                logging::log_fetch_summary(medications.len(), successful, raw.leaf_count());
                return Err(e);
            }
        };

        info!(
            target: FETCH,
            "Successfully fetched {} records for {}",
            records.len(),
            medication.name
        );
        raw.medications.insert(medication.atc_code.clone(), records);
        successful += 1;
    }

    logging::log_fetch_summary(medications.len(), successful, raw.leaf_count());
    Ok(raw)
}

// ============================================================================
// Tests
// ============================================================================
