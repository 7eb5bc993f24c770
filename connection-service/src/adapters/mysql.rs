//! MySQL adapter over a one-connection `MySqlPool`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;
use sqlx::mysql::{MySqlConnectOptions, MySqlDatabaseError, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use common::errors::{AppError, AppResult};
use common::models::{
    BackendKind, BrowsePage, ColumnDescriptor, ConnectionConfig, PageRequest, ResultEnvelope, Row as JsonRow,
};

use super::{until_closed, BackendSession, Endpoint};

/// `ER_UNSUPPORTED_PS`: statement cannot be run through the prepared protocol.
const ER_UNSUPPORTED_PS: u16 = 1295;

/// One MySQL connection, held by a pool capped at one so it is never
/// reaped or swapped while idle.
///
/// Introspection qualifies names with the database. `execute` switches the
/// default database with `USE`, so it holds `statement_lock` until its
/// statement has run.
pub struct MySqlSession {
    pool: MySqlPool,
    statement_lock: Mutex<()>,
    closed: CancellationToken,
}

impl MySqlSession {
    pub async fn connect(
        config: &ConnectionConfig,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> AppResult<Self> {
        let mut options = MySqlConnectOptions::new()
            .host(&endpoint.host)
            .port(endpoint.port)
            .username(config.user.as_deref().unwrap_or("root"))
            .charset("utf8mb4");
        if let Some(password) = config.password.as_deref() {
            options = options.password(password);
        }
        if let Some(database) = config.database.as_deref().filter(|d| !d.is_empty()) {
            options = options.database(database);
        }

        let pool = tokio::time::timeout(timeout, pool_options(timeout).connect_with(options))
            .await
            .map_err(|_| {
                AppError::DatabaseConnection(format!(
                    "timed out connecting to {}:{} after {}s",
                    endpoint.host,
                    endpoint.port,
                    timeout.as_secs()
                ))
            })?
            .map_err(|e| AppError::DatabaseConnection(e.to_string()))?;

        tracing::info!(id = %config.id, host = %endpoint.host, port = endpoint.port, "MySQL connected");
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self {
            pool,
            statement_lock: Mutex::new(()),
            closed: CancellationToken::new(),
        }
    }
}

fn pool_options(timeout: Duration) -> MySqlPoolOptions {
    MySqlPoolOptions::new()
        .max_connections(1)
        .min_connections(0)
        .acquire_timeout(timeout)
        .idle_timeout(None)
        .max_lifetime(None)
        .test_before_acquire(false)
}

/// Backtick-quotes an identifier, doubling embedded backticks.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// `` `database`.`table` ``
pub fn qualified(database: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(database), quote_ident(table))
}

/// Count and page statements for browsing `database.table`.
pub fn browse_sql(database: &str, table: &str, page: PageRequest) -> (String, String) {
    let table = qualified(database, table);
    (
        format!("SELECT COUNT(*) FROM {}", table),
        format!(
            "SELECT * FROM {} LIMIT {} OFFSET {}",
            table,
            page.page_size,
            page.offset()
        ),
    )
}

fn query_error(e: sqlx::Error) -> AppError {
    AppError::DatabaseQuery(e.to_string())
}

fn is_unsupported_by_prepare(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db
            .try_downcast_ref::<MySqlDatabaseError>()
            .is_some_and(|e| e.number() == ER_UNSUPPORTED_PS),
        _ => false,
    }
}

async fn use_database(pool: &MySqlPool, database: &str) -> AppResult<()> {
    let sql = format!("USE {}", quote_ident(database));
    pool.execute(sqlx::raw_sql(&sql))
        .await
        .map_err(query_error)?;
    Ok(())
}

/// Column value as text. Metadata statements report some columns as binary
/// strings, so bytes are decoded lossily.
fn text_at(row: &MySqlRow, index: usize) -> Option<String> {
    if row.try_get_raw(index).map(|raw| raw.is_null()).unwrap_or(true) {
        return None;
    }
    row.try_get_unchecked::<String, _>(index).ok().or_else(|| {
        row.try_get_unchecked::<Vec<u8>, _>(index)
            .ok()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    })
}

fn text_by_name(row: &MySqlRow, name: &str) -> Option<String> {
    row.columns()
        .iter()
        .position(|c| c.name().eq_ignore_ascii_case(name))
        .and_then(|index| text_at(row, index))
}

/// Converts one column to JSON by its declared type, falling back to text.
fn column_value(row: &MySqlRow, index: usize) -> Value {
    if row.try_get_raw(index).map(|raw| raw.is_null()).unwrap_or(true) {
        return Value::Null;
    }
    let type_name = row.columns()[index].type_info().name();
    let typed = match type_name {
        "BOOLEAN" => row.try_get_unchecked::<bool, _>(index).ok().map(Value::Bool),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            row.try_get_unchecked::<i64, _>(index).ok().map(Value::from)
        }
        name if name.ends_with(" UNSIGNED") => {
            row.try_get_unchecked::<u64, _>(index).ok().map(Value::from)
        }
        "FLOAT" | "DOUBLE" => row
            .try_get_unchecked::<f64, _>(index)
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        "DATETIME" => row
            .try_get_unchecked::<NaiveDateTime, _>(index)
            .ok()
            .map(|v| Value::String(v.to_string())),
        "TIMESTAMP" => row
            .try_get_unchecked::<DateTime<Utc>, _>(index)
            .ok()
            .map(|v| Value::String(v.naive_utc().to_string())),
        "DATE" => row
            .try_get_unchecked::<NaiveDate, _>(index)
            .ok()
            .map(|v| Value::String(v.to_string())),
        "TIME" => row
            .try_get_unchecked::<NaiveTime, _>(index)
            .ok()
            .map(|v| Value::String(v.to_string())),
        "JSON" => row.try_get_unchecked::<Value, _>(index).ok(),
        _ => None,
    };
    typed
        .or_else(|| text_at(row, index).map(Value::String))
        .unwrap_or(Value::Null)
}

fn row_to_json(row: &MySqlRow) -> JsonRow {
    row.columns()
        .iter()
        .enumerate()
        .map(|(index, column)| (column.name().to_string(), column_value(row, index)))
        .collect()
}

#[async_trait]
impl BackendSession for MySqlSession {
    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    async fn list_databases(&self) -> AppResult<Vec<String>> {
        until_closed(&self.closed, async {
            let rows = self
                .pool
                .fetch_all(sqlx::raw_sql("SHOW DATABASES"))
                .await
                .map_err(query_error)?;
            Ok(rows.iter().filter_map(|row| text_at(row, 0)).collect())
        })
        .await
    }

    async fn list_tables(&self, database: &str) -> AppResult<Vec<String>> {
        until_closed(&self.closed, async {
            let sql = format!("SHOW TABLES FROM {}", quote_ident(database));
            let rows = self
                .pool
                .fetch_all(sqlx::raw_sql(&sql))
                .await
                .map_err(query_error)?;
            Ok(rows.iter().filter_map(|row| text_at(row, 0)).collect())
        })
        .await
    }

    async fn get_structure(&self, database: &str, table: &str) -> AppResult<Vec<ColumnDescriptor>> {
        until_closed(&self.closed, async {
            let sql = format!("DESCRIBE {}", qualified(database, table));
            let rows = self
                .pool
                .fetch_all(sqlx::raw_sql(&sql))
                .await
                .map_err(query_error)?;

            Ok(rows
                .iter()
                .map(|row| {
                    let mut column = ColumnDescriptor::new(
                        text_by_name(row, "Field").unwrap_or_default(),
                        text_by_name(row, "Type").unwrap_or_default(),
                        text_by_name(row, "Key").unwrap_or_default(),
                    );
                    column.nullable = text_by_name(row, "Null").map(|v| v.eq_ignore_ascii_case("YES"));
                    column.default = text_by_name(row, "Default");
                    column.extra = text_by_name(row, "Extra").filter(|v| !v.is_empty());
                    column
                })
                .collect())
        })
        .await
    }

    async fn get_indexes(&self, database: &str, table: &str) -> AppResult<Vec<JsonRow>> {
        until_closed(&self.closed, async {
            let sql = format!("SHOW INDEX FROM {}", qualified(database, table));
            let rows = self
                .pool
                .fetch_all(sqlx::raw_sql(&sql))
                .await
                .map_err(query_error)?;
            Ok(rows.iter().map(row_to_json).collect())
        })
        .await
    }

    async fn browse(&self, database: &str, table: &str, page: PageRequest) -> AppResult<BrowsePage> {
        until_closed(&self.closed, async {
            let (count_sql, page_sql) = browse_sql(database, table, page);
            let total_row = self
                .pool
                .fetch_one(sqlx::raw_sql(&count_sql))
                .await
                .map_err(query_error)?;
            let total: i64 = total_row.try_get(0).map_err(query_error)?;
            let rows = self
                .pool
                .fetch_all(sqlx::raw_sql(&page_sql))
                .await
                .map_err(query_error)?;

            Ok(BrowsePage {
                rows: rows.iter().map(row_to_json).collect(),
                total: u64::try_from(total).unwrap_or_default(),
                page: page.page,
                page_size: page.page_size,
            })
        })
        .await
    }

    async fn execute(&self, query: &str, database: Option<&str>) -> AppResult<ResultEnvelope> {
        until_closed(&self.closed, async {
            let _statement = self.statement_lock.lock().await;
            if let Some(database) = database.filter(|d| !d.is_empty()) {
                use_database(&self.pool, database).await?;
            }

            let columns = match self.pool.prepare(query).await {
                Ok(statement) => statement
                    .columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect::<Vec<_>>(),
                Err(e) if is_unsupported_by_prepare(&e) => {
                    tracing::debug!(error = %e, "Falling back to text protocol");
                    let result = self
                        .pool
                        .execute(sqlx::raw_sql(query))
                        .await
                        .map_err(query_error)?;
                    return Ok(ResultEnvelope::affected(result.rows_affected()));
                }
                Err(e) => return Err(query_error(e)),
            };

            if columns.is_empty() {
                let result = self
                    .pool
                    .execute(sqlx::query(query))
                    .await
                    .map_err(query_error)?;
                return Ok(ResultEnvelope::Write {
                    affected_rows: result.rows_affected(),
                    inserted_id: (result.last_insert_id() > 0)
                        .then(|| result.last_insert_id().to_string()),
                    result: None,
                });
            }

            let rows = self
                .pool
                .fetch_all(sqlx::query(query))
                .await
                .map_err(query_error)?;
            Ok(ResultEnvelope::with_columns(
                columns,
                rows.iter().map(row_to_json).collect(),
            ))
        })
        .await
    }

    /// Interrupts any statement in flight, then closes the pool.
    async fn close(&self) -> AppResult<()> {
        self.closed.cancel();
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_doubles_backticks() {
        assert_eq!(quote_ident("users"), "`users`");
        assert_eq!(quote_ident("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_browse_sql_uses_zero_based_offset() {
        let (count, page) = browse_sql("shop", "orders", PageRequest::new(2, 10));
        assert_eq!(count, "SELECT COUNT(*) FROM `shop`.`orders`");
        assert_eq!(page, "SELECT * FROM `shop`.`orders` LIMIT 10 OFFSET 10");
    }

    #[test]
    fn test_browse_sql_page_zero_is_first_page() {
        let (_, page) = browse_sql("db", "t", PageRequest::new(0, 25));
        assert!(page.ends_with("LIMIT 25 OFFSET 0"));
    }

    #[test]
    fn test_qualified_quotes_both_parts() {
        assert_eq!(qualified("a`b", "c"), "`a``b`.`c`");
    }

    fn lazy_session(port: u16) -> MySqlSession {
        let options = MySqlConnectOptions::new().host("127.0.0.1").port(port);
        MySqlSession::from_pool(pool_options(Duration::from_secs(30)).connect_lazy_with(options))
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_session_futures_are_send() {
        let session = lazy_session(1);
        assert_send(&session.execute("SELECT 1", Some("db")));
        assert_send(&session.list_databases());
        assert_send(&session.list_tables("db"));
        assert_send(&session.get_structure("db", "t"));
        assert_send(&session.get_indexes("db", "t"));
        assert_send(&session.browse("db", "t", PageRequest::default()));
        assert_send(&session.close());
    }

    #[tokio::test]
    async fn test_close_interrupts_statement_in_flight() {
        // Accepts the TCP connection but never sends a handshake.
        let silent = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = silent.local_addr().unwrap().port();
        let session = std::sync::Arc::new(lazy_session(port));
        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.execute("SELECT SLEEP(60)", None).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        session.close().await.unwrap();
        let result = pending.await.unwrap();

        assert!(matches!(result, Err(AppError::DatabaseConnection(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_closed_session_rejects_new_statements() {
        let session = lazy_session(1);
        session.close().await.unwrap();
        let result = session.execute("SELECT 1", None).await;
        assert!(matches!(result, Err(AppError::DatabaseConnection(_))));
    }

    #[test]
    fn test_non_database_errors_do_not_trigger_fallback() {
        assert!(!is_unsupported_by_prepare(&sqlx::Error::RowNotFound));
    }
}
