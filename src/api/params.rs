//! Query-string parsing
//!
//! Turns raw query parameters into typed filter objects: comma lists are
//! deduplicated, boolean-like strings become real tri-state booleans,
//! status codes accept the non-numeric `ERR` sentinel, and limits clamp to
//! the server bounds. Malformed input is a validation error.

use crate::entry::EntryKind;
use crate::error::CoreError;
use crate::store::{Direction, EntryFilter, StatusCodeFilter, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct EntryQueryParams {
    pub kind: Option<String>,
    pub tag: Option<String>,
    pub name: Option<String>,
    pub method: Option<String>,
    pub status: Option<String>,
    pub status_code: Option<String>,
    pub slower_than: Option<i64>,
    pub resolved: Option<String>,
    pub cursor: Option<u64>,
    pub direction: Option<String>,
    pub limit: Option<usize>,
    pub since: Option<u64>,
}

pub fn parse_filter(params: &EntryQueryParams) -> Result<EntryFilter, CoreError> {
    let mut filter = EntryFilter::default();

    if let Some(raw) = &params.kind {
        for value in csv_list(raw) {
            let kind = EntryKind::parse(&value)
                .ok_or_else(|| CoreError::Validation(format!("unknown entry kind '{}'", value)))?;
            filter.kinds.push(kind);
        }
    }

    if let Some(raw) = &params.tag {
        filter.tags = csv_list(raw);
    }
    if let Some(raw) = &params.name {
        filter.names = csv_list(raw);
    }
    if let Some(raw) = &params.method {
        filter.methods = csv_list(raw);
    }
    if let Some(raw) = &params.status {
        filter.statuses = csv_list(raw);
    }

    if let Some(raw) = &params.status_code {
        for value in csv_list(raw) {
            let code = StatusCodeFilter::parse(&value).ok_or_else(|| {
                CoreError::Validation(format!("invalid status code '{}'", value))
            })?;
            if !filter.status_codes.contains(&code) {
                filter.status_codes.push(code);
            }
        }
    }

    filter.slower_than_ms = params.slower_than;
    filter.resolved = match &params.resolved {
        Some(raw) => Some(parse_bool(raw)?),
        None => None,
    };

    Ok(filter)
}

pub fn parse_direction(params: &EntryQueryParams) -> Result<Direction, CoreError> {
    match &params.direction {
        None => Ok(Direction::Backward),
        Some(raw) => Direction::parse(raw)
            .ok_or_else(|| CoreError::Validation(format!("invalid direction '{}'", raw))),
    }
}

/// Clamp a requested page size to the server bounds.
pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

/// Split a comma-separated list, trimming whitespace, dropping empties,
/// and deduplicating while preserving first-seen order.
pub fn csv_list(raw: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .filter(|value| seen.insert(value.clone()))
        .collect()
}

pub fn parse_bool(raw: &str) -> Result<bool, CoreError> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(CoreError::Validation(format!(
            "invalid boolean value '{}'",
            other
        ))),
    }
}
