//! Typed read-side filters
//!
//! A filter is a conjunction of optional per-field predicates; within one
//! multi-valued field, membership is OR. The same predicate set compiles
//! onto every store query (list, count, delete, stats) through
//! `sqlx::QueryBuilder`.

use crate::entry::EntryKind;
use sqlx::{QueryBuilder, Sqlite};

/// Numeric status-code predicate. `Error` is the sentinel for "failed
/// outcome with no numeric code" (e.g. a transport error before any
/// response arrived).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCodeFilter {
    Code(i64),
    Error,
}

impl StatusCodeFilter {
    pub fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("err") {
            return Some(Self::Error);
        }
        value.parse::<i64>().ok().map(Self::Code)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub kinds: Vec<EntryKind>,
    /// Entry matches if it carries any of the listed tags.
    pub tags: Vec<String>,
    pub names: Vec<String>,
    pub methods: Vec<String>,
    pub statuses: Vec<String>,
    pub status_codes: Vec<StatusCodeFilter>,
    pub slower_than_ms: Option<i64>,
    /// Tri-state: `None` means no constraint.
    pub resolved: Option<bool>,
}

impl EntryFilter {
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
            && self.tags.is_empty()
            && self.names.is_empty()
            && self.methods.is_empty()
            && self.statuses.is_empty()
            && self.status_codes.is_empty()
            && self.slower_than_ms.is_none()
            && self.resolved.is_none()
    }

    pub fn with_kind(mut self, kind: EntryKind) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Append the filter's predicates to a query that already has a WHERE
/// clause open (`... WHERE 1=1` or a cursor bound).
///
/// String fields match case-normalized exact values: methods are compared
/// upper-cased, names and statuses lower-cased.
pub fn push_predicates(filter: &EntryFilter, qb: &mut QueryBuilder<'_, Sqlite>) {
    if !filter.kinds.is_empty() {
        qb.push(" AND kind IN (");
        let mut separated = qb.separated(", ");
        for kind in &filter.kinds {
            separated.push_bind(kind.as_str());
        }
        qb.push(")");
    }

    if !filter.names.is_empty() {
        qb.push(" AND LOWER(name) IN (");
        let mut separated = qb.separated(", ");
        for name in &filter.names {
            separated.push_bind(name.to_lowercase());
        }
        qb.push(")");
    }

    if !filter.methods.is_empty() {
        qb.push(" AND UPPER(method) IN (");
        let mut separated = qb.separated(", ");
        for method in &filter.methods {
            separated.push_bind(method.to_uppercase());
        }
        qb.push(")");
    }

    if !filter.statuses.is_empty() {
        qb.push(" AND LOWER(status) IN (");
        let mut separated = qb.separated(", ");
        for status in &filter.statuses {
            separated.push_bind(status.to_lowercase());
        }
        qb.push(")");
    }

    if !filter.status_codes.is_empty() {
        let codes: Vec<i64> = filter
            .status_codes
            .iter()
            .filter_map(|c| match c {
                StatusCodeFilter::Code(code) => Some(*code),
                StatusCodeFilter::Error => None,
            })
            .collect();
        let wants_error = filter
            .status_codes
            .iter()
            .any(|c| matches!(c, StatusCodeFilter::Error));

        qb.push(" AND (");
        if !codes.is_empty() {
            qb.push("status_code IN (");
            let mut separated = qb.separated(", ");
            for code in codes {
                separated.push_bind(code);
            }
            qb.push(")");
            if wants_error {
                qb.push(" OR ");
            }
        }
        if wants_error {
            qb.push("(status_code IS NULL AND status = 'failed')");
        }
        qb.push(")");
    }

    if let Some(threshold) = filter.slower_than_ms {
        qb.push(" AND duration_ms >= ");
        qb.push_bind(threshold);
    }

    if let Some(resolved) = filter.resolved {
        qb.push(" AND COALESCE(resolved, 0) = ");
        qb.push_bind(if resolved { 1i64 } else { 0i64 });
    }

    if !filter.tags.is_empty() {
        qb.push(
            " AND EXISTS (SELECT 1 FROM telemetry_tags t \
             WHERE t.sequence = telemetry_entries.sequence AND t.tag IN (",
        );
        let mut separated = qb.separated(", ");
        for tag in &filter.tags {
            separated.push_bind(tag.clone());
        }
        qb.push("))");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(filter: &EntryFilter) -> String {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT sequence FROM telemetry_entries WHERE 1=1");
        push_predicates(filter, &mut qb);
        qb.into_sql()
    }

    #[test]
    fn test_empty_filter_adds_nothing() {
        let sql = render(&EntryFilter::default());
        assert_eq!(sql, "SELECT sequence FROM telemetry_entries WHERE 1=1");
    }

    #[test]
    fn test_conjunction_of_fields() {
        let filter = EntryFilter {
            kinds: vec![EntryKind::Request],
            methods: vec!["get".to_string()],
            status_codes: vec![StatusCodeFilter::Code(200)],
            ..Default::default()
        };
        let sql = render(&filter);
        assert!(sql.contains("kind IN"));
        assert!(sql.contains("UPPER(method) IN"));
        assert!(sql.contains("status_code IN"));
    }

    #[test]
    fn test_error_sentinel_alone() {
        let filter = EntryFilter {
            status_codes: vec![StatusCodeFilter::Error],
            ..Default::default()
        };
        let sql = render(&filter);
        assert!(sql.contains("(status_code IS NULL AND status = 'failed')"));
        assert!(!sql.contains("status_code IN"));
    }

    #[test]
    fn test_codes_and_sentinel_are_or_joined() {
        let filter = EntryFilter {
            status_codes: vec![StatusCodeFilter::Code(500), StatusCodeFilter::Error],
            ..Default::default()
        };
        let sql = render(&filter);
        assert!(sql.contains("status_code IN"));
        assert!(sql.contains(" OR (status_code IS NULL"));
    }

    #[test]
    fn test_status_code_parse() {
        assert_eq!(StatusCodeFilter::parse("200"), Some(StatusCodeFilter::Code(200)));
        assert_eq!(StatusCodeFilter::parse("ERR"), Some(StatusCodeFilter::Error));
        assert_eq!(StatusCodeFilter::parse("err"), Some(StatusCodeFilter::Error));
        assert_eq!(StatusCodeFilter::parse("abc"), None);
    }

    #[test]
    fn test_tags_use_exists_subquery() {
        let filter = EntryFilter::default().with_tag("slow");
        let sql = render(&filter);
        assert!(sql.contains("EXISTS (SELECT 1 FROM telemetry_tags"));
    }
}
