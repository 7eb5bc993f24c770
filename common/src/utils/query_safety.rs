//! Read/write classification of queries.
//!
//! Purely lexical for SQL: a keyword inside a string literal or comment still
//! counts as a write. Document and search payloads are classified by their
//! `method` field. A payload that does not parse is reported as a read; it will
//! fail later in the adapter with a proper error.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::models::{BackendKind, Classification, DocumentMethod, SearchMethod};

static SQL_WRITE_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(INSERT|UPDATE|DELETE|DROP|ALTER|CREATE|TRUNCATE|REPLACE|GRANT|REVOKE)\b",
    )
    .expect("valid regex")
});

/// Classifies query text for a backend kind.
pub struct QuerySafety;

impl QuerySafety {
    pub fn classify(text: &str, kind: BackendKind) -> Classification {
        let is_write = match kind {
            BackendKind::Relational => Self::is_sql_write(text),
            BackendKind::Document => Self::payload_method(text)
                .map(|m| m.unwrap_or(DocumentMethod::DEFAULT.to_string()))
                .and_then(|m| m.parse::<DocumentMethod>().ok())
                .is_some_and(|m| m.is_write()),
            BackendKind::Search => Self::payload_method(text)
                .map(|m| m.unwrap_or(SearchMethod::DEFAULT.to_string()))
                .and_then(|m| m.parse::<SearchMethod>().ok())
                .is_some_and(|m| m.is_write()),
        };
        Classification { is_write }
    }

    pub fn is_sql_write(sql: &str) -> bool {
        SQL_WRITE_KEYWORDS.is_match(sql)
    }

    /// `None` when the text is not a JSON object; `Some(None)` when it is an
    /// object without a string `method`.
    fn payload_method(text: &str) -> Option<Option<String>> {
        match serde_json::from_str::<Value>(text).ok()? {
            Value::Object(map) => Some(
                map.get("method")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            ),
            _ => None,
        }
    }
}
