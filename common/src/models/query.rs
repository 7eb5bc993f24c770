//! Query payloads, result envelopes and introspection shapes.
//!
//! Relational queries are plain SQL text. Document and search queries are JSON
//! objects; their method names are closed sets shared by the adapters and the
//! safety classifier.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;
use validator::Validate;

use crate::errors::AppError;

/// One result row keyed by column name.
pub type Row = Map<String, Value>;

/// Request body for executing a query.
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct ExecuteRequest {
    /// ID of the connection to use.
    #[validate(length(min = 1, message = "conn_id is required"))]
    pub conn_id: String,

    /// Query text: SQL, or a JSON payload for document/search backends.
    #[validate(length(min = 1, message = "query is required"))]
    pub query: String,

    /// Database to run against, when the backend has that notion.
    #[serde(default)]
    pub database: Option<String>,

    /// Must be true for classified writes to execute.
    #[serde(default)]
    pub confirmed: bool,
}

/// Request body for classifying a query without running it.
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct ClassifyRequest {
    #[validate(length(min = 1, message = "conn_id is required"))]
    pub conn_id: String,
    pub query: String,
}

/// Read/write verdict of the safety classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Classification {
    pub is_write: bool,
}

/// Normalized output of any query execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum ResultEnvelope {
    /// Tabular read.
    Rows {
        columns: Vec<String>,
        #[schema(value_type = Vec<Object>)]
        rows: Vec<Row>,
        rowcount: usize,
        /// Total matches reported by the backend, when it differs from
        /// the number of rows returned.
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
    },
    /// Mutation.
    Write {
        affected_rows: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        inserted_id: Option<String>,
        /// Backend specific outcome, e.g. `created` or `updated`.
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
}

impl ResultEnvelope {
    /// Read result; column names are taken from the first row when the
    /// backend has no column metadata.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let columns = rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();
        Self::Rows {
            columns,
            rowcount: rows.len(),
            rows,
            total: None,
        }
    }

    pub fn with_columns(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self::Rows {
            columns,
            rowcount: rows.len(),
            rows,
            total: None,
        }
    }

    pub fn affected(affected_rows: u64) -> Self {
        Self::Write {
            affected_rows,
            inserted_id: None,
            result: None,
        }
    }
}

/// Pending confirmation for a classified write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ConfirmationRequest {
    pub needs_confirmation: bool,
    pub message: String,
    /// The original query text, echoed back for the confirm round trip.
    pub query: String,
}

impl ConfirmationRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            needs_confirmation: true,
            message: "This is a write operation. Please confirm execution.".to_string(),
            query: query.into(),
        }
    }
}

/// What the dispatcher hands back for an execute call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum ExecuteOutcome {
    Completed(ResultEnvelope),
    NeedsConfirmation(ConfirmationRequest),
}

/// 1-indexed page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PageRequest {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
}

fn default_page() -> u64 {
    1
}

fn default_page_size() -> u64 {
    50
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

impl PageRequest {
    pub fn new(page: u64, page_size: u64) -> Self {
        Self { page, page_size }
    }

    /// Number of rows to skip. Page 0 is treated as page 1.
    pub fn offset(&self) -> u64 {
        self.page.max(1).saturating_sub(1).saturating_mul(self.page_size)
    }
}

/// One page of rows from a table, collection or index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BrowsePage {
    #[schema(value_type = Vec<Object>)]
    pub rows: Vec<Row>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

/// One field of a table, collection or index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ColumnDescriptor {
    pub field: String,
    #[serde(rename = "type")]
    pub data_type: String,
    /// `PRI`, `UNI`, `MUL` or empty.
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
}

impl ColumnDescriptor {
    pub fn new(field: impl Into<String>, data_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            data_type: data_type.into(),
            key: key.into(),
            nullable: None,
            default: None,
            extra: None,
        }
    }
}

/// Full schema of one table; consumed by schema caches and prompt builders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnDescriptor>,
}

/// Operations accepted by the document backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentMethod {
    Find,
    Count,
    Aggregate,
    InsertOne,
    InsertMany,
    UpdateOne,
    UpdateMany,
    DeleteOne,
    DeleteMany,
}

impl DocumentMethod {
    /// Used when a payload names no method.
    pub const DEFAULT: &'static str = "find";

    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            DocumentMethod::Find | DocumentMethod::Count | DocumentMethod::Aggregate
        )
    }
}

impl std::str::FromStr for DocumentMethod {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "find" => DocumentMethod::Find,
            "count" => DocumentMethod::Count,
            "aggregate" => DocumentMethod::Aggregate,
            "insertOne" => DocumentMethod::InsertOne,
            "insertMany" => DocumentMethod::InsertMany,
            "updateOne" => DocumentMethod::UpdateOne,
            "updateMany" => DocumentMethod::UpdateMany,
            "deleteOne" => DocumentMethod::DeleteOne,
            "deleteMany" => DocumentMethod::DeleteMany,
            other => return Err(AppError::UnsupportedMethod(other.to_string())),
        })
    }
}

/// Operations accepted by the search backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMethod {
    Search,
    Index,
    Delete,
    Update,
}

impl SearchMethod {
    /// Used when a payload names no method.
    pub const DEFAULT: &'static str = "search";

    pub fn is_write(&self) -> bool {
        !matches!(self, SearchMethod::Search)
    }
}

impl std::str::FromStr for SearchMethod {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "search" => SearchMethod::Search,
            "index" => SearchMethod::Index,
            "delete" => SearchMethod::Delete,
            "update" => SearchMethod::Update,
            other => return Err(AppError::UnsupportedMethod(other.to_string())),
        })
    }
}
