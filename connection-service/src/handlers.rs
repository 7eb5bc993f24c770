//! HTTP handlers.
//!
//! Thin wrappers: extract, call the service or dispatcher, wrap in
//! `ApiResponse`. Failures render through `AppError`.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use validator::Validate;

use common::errors::AppError;
use common::models::{
    BrowsePage, Classification, ClassifyRequest, ColumnDescriptor, ConnectStatus, ConnectionItem,
    ConnectionRequest, ConnectionTestResult, ExecuteOutcome, ExecuteRequest, PageRequest, Row,
    TableSchema,
};
use common::response::ApiResponse;

use crate::service::{ConnectionService, ConnectionServiceTrait};
use crate::state::AppState;
use crate::SERVICE_NAME;

type ApiResult<T> = Result<Json<ApiResponse<T>>, AppError>;

fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE_NAME)))
}

/// List all saved connections
#[utoipa::path(
    get,
    path = "/api/connections",
    tag = "connections",
    responses(
        (status = 200, description = "Saved connections, secrets masked", body = ApiResponse<Vec<ConnectionItem>>)
    )
)]
pub async fn list_connections(State(state): State<AppState>) -> ApiResult<Vec<ConnectionItem>> {
    let service = ConnectionService::new(state.registry);
    ok(service.list().await)
}

/// Create a connection, or update one when the body carries a known id
#[utoipa::path(
    post,
    path = "/api/connections",
    tag = "connections",
    request_body = ConnectionRequest,
    responses(
        (status = 200, description = "Connection saved", body = ApiResponse<ConnectionItem>),
        (status = 400, description = "Missing or unsupported type")
    )
)]
pub async fn save_connection(
    State(state): State<AppState>,
    Json(req): Json<ConnectionRequest>,
) -> ApiResult<ConnectionItem> {
    let service = ConnectionService::new(state.registry);
    ok(service.save(req).await?)
}

/// Get a connection by id
#[utoipa::path(
    get,
    path = "/api/connections/{id}",
    tag = "connections",
    params(
        ("id" = String, Path, description = "Connection id")
    ),
    responses(
        (status = 200, description = "Connection details", body = ApiResponse<ConnectionItem>),
        (status = 404, description = "Connection not found")
    )
)]
pub async fn get_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ConnectionItem> {
    let service = ConnectionService::new(state.registry);
    ok(service.get(&id).await?)
}

/// Update a connection; absent fields keep their stored values
#[utoipa::path(
    put,
    path = "/api/connections/{id}",
    tag = "connections",
    params(
        ("id" = String, Path, description = "Connection id")
    ),
    request_body = ConnectionRequest,
    responses(
        (status = 200, description = "Connection saved", body = ApiResponse<ConnectionItem>)
    )
)]
pub async fn update_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut req): Json<ConnectionRequest>,
) -> ApiResult<ConnectionItem> {
    req.id = Some(id);
    let service = ConnectionService::new(state.registry);
    ok(service.save(req).await?)
}

/// Delete a connection, disconnecting it first
#[utoipa::path(
    delete,
    path = "/api/connections/{id}",
    tag = "connections",
    params(
        ("id" = String, Path, description = "Connection id")
    ),
    responses(
        (status = 200, description = "Connection deleted", body = ApiResponse<bool>),
        (status = 404, description = "Connection not found")
    )
)]
pub async fn delete_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<bool> {
    let service = ConnectionService::new(state.registry);
    service.delete(&id).await?;
    ok(true)
}

/// Open a live session
#[utoipa::path(
    post,
    path = "/api/connections/{id}/connect",
    tag = "connections",
    params(
        ("id" = String, Path, description = "Connection id")
    ),
    responses(
        (status = 200, description = "Connected", body = ApiResponse<ConnectResponse>),
        (status = 404, description = "Connection not found"),
        (status = 502, description = "Tunnel or backend unreachable")
    )
)]
pub async fn connect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ConnectResponse> {
    let service = ConnectionService::new(state.registry);
    let status = service.connect(&id).await?;
    ok(ConnectResponse { status })
}

/// Close the live session, if any
#[utoipa::path(
    post,
    path = "/api/connections/{id}/disconnect",
    tag = "connections",
    params(
        ("id" = String, Path, description = "Connection id")
    ),
    responses(
        (status = 200, description = "Disconnected", body = ApiResponse<bool>)
    )
)]
pub async fn disconnect(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<bool> {
    let service = ConnectionService::new(state.registry);
    service.disconnect(&id).await;
    ok(true)
}

/// Try a connection config without saving it
#[utoipa::path(
    post,
    path = "/api/connections/test",
    tag = "connections",
    request_body = ConnectionRequest,
    responses(
        (status = 200, description = "Test outcome", body = ApiResponse<ConnectionTestResult>)
    )
)]
pub async fn test_connection(
    State(state): State<AppState>,
    Json(req): Json<ConnectionRequest>,
) -> ApiResult<ConnectionTestResult> {
    let service = ConnectionService::new(state.registry);
    ok(service.test(req).await)
}

/// List databases
#[utoipa::path(
    get,
    path = "/api/db/{id}/databases",
    tag = "introspection",
    params(
        ("id" = String, Path, description = "Connection id")
    ),
    responses(
        (status = 200, description = "Database names", body = ApiResponse<Vec<String>>),
        (status = 409, description = "Connection is not active")
    )
)]
pub async fn list_databases(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<String>> {
    ok(state.dispatcher.list_databases(&id).await?)
}

/// List tables, collections or indices
#[utoipa::path(
    get,
    path = "/api/db/{id}/{database}/tables",
    tag = "introspection",
    params(
        ("id" = String, Path, description = "Connection id"),
        ("database" = String, Path, description = "Database name")
    ),
    responses(
        (status = 200, description = "Table names", body = ApiResponse<Vec<String>>)
    )
)]
pub async fn list_tables(
    State(state): State<AppState>,
    Path((id, database)): Path<(String, String)>,
) -> ApiResult<Vec<String>> {
    ok(state.dispatcher.list_tables(&id, &database).await?)
}

/// Structure of every table in a database
#[utoipa::path(
    get,
    path = "/api/db/{id}/{database}/schemas",
    tag = "introspection",
    params(
        ("id" = String, Path, description = "Connection id"),
        ("database" = String, Path, description = "Database name")
    ),
    responses(
        (status = 200, description = "Table schemas", body = ApiResponse<Vec<TableSchema>>)
    )
)]
pub async fn get_all_schemas(
    State(state): State<AppState>,
    Path((id, database)): Path<(String, String)>,
) -> ApiResult<Vec<TableSchema>> {
    ok(state.dispatcher.get_all_schemas(&id, &database).await?)
}

/// Column structure of one table
#[utoipa::path(
    get,
    path = "/api/db/{id}/{database}/{table}/structure",
    tag = "introspection",
    params(
        ("id" = String, Path, description = "Connection id"),
        ("database" = String, Path, description = "Database name"),
        ("table" = String, Path, description = "Table, collection or index")
    ),
    responses(
        (status = 200, description = "Columns", body = ApiResponse<Vec<ColumnDescriptor>>)
    )
)]
pub async fn get_structure(
    State(state): State<AppState>,
    Path((id, database, table)): Path<(String, String, String)>,
) -> ApiResult<Vec<ColumnDescriptor>> {
    ok(state.dispatcher.get_structure(&id, &database, &table).await?)
}

/// Index definitions of one table
#[utoipa::path(
    get,
    path = "/api/db/{id}/{database}/{table}/indexes",
    tag = "introspection",
    params(
        ("id" = String, Path, description = "Connection id"),
        ("database" = String, Path, description = "Database name"),
        ("table" = String, Path, description = "Table, collection or index")
    ),
    responses(
        (status = 200, description = "Index rows in backend shape")
    )
)]
pub async fn get_indexes(
    State(state): State<AppState>,
    Path((id, database, table)): Path<(String, String, String)>,
) -> ApiResult<Vec<Row>> {
    ok(state.dispatcher.get_indexes(&id, &database, &table).await?)
}

/// One page of table data
#[utoipa::path(
    get,
    path = "/api/db/{id}/{database}/{table}/data",
    tag = "introspection",
    params(
        ("id" = String, Path, description = "Connection id"),
        ("database" = String, Path, description = "Database name"),
        ("table" = String, Path, description = "Table, collection or index"),
        ("page" = Option<u64>, Query, description = "1-indexed page, default 1"),
        ("page_size" = Option<u64>, Query, description = "Rows per page, default 50")
    ),
    responses(
        (status = 200, description = "Rows and total", body = ApiResponse<BrowsePage>)
    )
)]
pub async fn browse_data(
    State(state): State<AppState>,
    Path((id, database, table)): Path<(String, String, String)>,
    Query(page): Query<PageRequest>,
) -> ApiResult<BrowsePage> {
    ok(state.dispatcher.browse(&id, &database, &table, page).await?)
}

/// Execute a query; writes need `confirmed: true`
#[utoipa::path(
    post,
    path = "/api/query/execute",
    tag = "query",
    request_body = ExecuteRequest,
    responses(
        (status = 200, description = "Result envelope or confirmation request", body = ApiResponse<ExecuteOutcome>),
        (status = 400, description = "Invalid request or payload"),
        (status = 409, description = "Connection is not active")
    )
)]
pub async fn execute_query(
    State(state): State<AppState>,
    Json(req): Json<ExecuteRequest>,
) -> ApiResult<ExecuteOutcome> {
    req.validate()?;
    let outcome = state
        .dispatcher
        .execute(&req.conn_id, &req.query, req.database.as_deref(), req.confirmed)
        .await?;
    ok(outcome)
}

/// Classify a query as read or write without running it
#[utoipa::path(
    post,
    path = "/api/query/classify",
    tag = "query",
    request_body = ClassifyRequest,
    responses(
        (status = 200, description = "Classification", body = ApiResponse<Classification>)
    )
)]
pub async fn classify_query(
    State(state): State<AppState>,
    Json(req): Json<ClassifyRequest>,
) -> ApiResult<Classification> {
    req.validate()?;
    ok(state.dispatcher.classify(&req.conn_id, &req.query).await?)
}

/// Health check
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is running", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        connections: state.registry.active_count().await,
        teardown_failures: state.registry.teardown_failures(),
    })
}

/// Result of a connect call.
#[derive(Debug, Serialize, ToSchema)]
pub struct ConnectResponse {
    pub status: ConnectStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    /// Live sessions.
    pub connections: usize,
    /// Close/stop failures swallowed since start.
    pub teardown_failures: u64,
}
