//! Query dispatch.
//!
//! Resolves a connection id to its live session and routes execution and
//! introspection calls to it. Writes are held back until the caller confirms.

use std::sync::Arc;

use common::errors::AppResult;
use common::models::{
    BrowsePage, Classification, ColumnDescriptor, ConfirmationRequest, ExecuteOutcome, PageRequest,
    Row, TableSchema,
};
use common::utils::QuerySafety;

use crate::registry::ConnectionRegistry;

/// Stateless router over a shared registry.
#[derive(Clone)]
pub struct QueryDispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl QueryDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Classifies `query` using the backend of `conn_id`.
    pub async fn classify(&self, conn_id: &str, query: &str) -> AppResult<Classification> {
        let kind = self.registry.backend_kind(conn_id).await?;
        Ok(QuerySafety::classify(query, kind))
    }

    /// Runs `query`, unless it is a write and `confirmed` is false, in which
    /// case no session is touched and a confirmation request comes back.
    pub async fn execute(
        &self,
        conn_id: &str,
        query: &str,
        database: Option<&str>,
        confirmed: bool,
    ) -> AppResult<ExecuteOutcome> {
        let kind = self.registry.backend_kind(conn_id).await?;
        let classification = QuerySafety::classify(query, kind);

        if classification.is_write && !confirmed {
            tracing::info!(conn_id, %kind, "Write held for confirmation");
            return Ok(ExecuteOutcome::NeedsConfirmation(ConfirmationRequest::new(query)));
        }

        let session = self.registry.session(conn_id).await?;
        let started = std::time::Instant::now();
        let envelope = session.execute(query, database).await?;
        tracing::info!(
            conn_id,
            %kind,
            is_write = classification.is_write,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Query executed"
        );
        Ok(ExecuteOutcome::Completed(envelope))
    }

    pub async fn list_databases(&self, conn_id: &str) -> AppResult<Vec<String>> {
        self.registry.session(conn_id).await?.list_databases().await
    }

    pub async fn list_tables(&self, conn_id: &str, database: &str) -> AppResult<Vec<String>> {
        self.registry
            .session(conn_id)
            .await?
            .list_tables(database)
            .await
    }

    pub async fn get_structure(
        &self,
        conn_id: &str,
        database: &str,
        table: &str,
    ) -> AppResult<Vec<ColumnDescriptor>> {
        self.registry
            .session(conn_id)
            .await?
            .get_structure(database, table)
            .await
    }

    pub async fn get_indexes(&self, conn_id: &str, database: &str, table: &str) -> AppResult<Vec<Row>> {
        self.registry
            .session(conn_id)
            .await?
            .get_indexes(database, table)
            .await
    }

    pub async fn browse(
        &self,
        conn_id: &str,
        database: &str,
        table: &str,
        page: PageRequest,
    ) -> AppResult<BrowsePage> {
        self.registry
            .session(conn_id)
            .await?
            .browse(database, table, page)
            .await
    }

    /// Every table's structure; feeds schema caches.
    pub async fn get_all_schemas(&self, conn_id: &str, database: &str) -> AppResult<Vec<TableSchema>> {
        self.registry
            .session(conn_id)
            .await?
            .get_all_schemas(database)
            .await
    }
}
