//! Route table and application router.

use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use common::middleware::request_id::request_id_middleware;

use crate::handlers;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Connection Service API",
        version = "0.1.0",
        description = "Connection lifecycle and query dispatch for MySQL, MongoDB and Elasticsearch"
    ),
    paths(
        handlers::list_connections,
        handlers::save_connection,
        handlers::get_connection,
        handlers::update_connection,
        handlers::delete_connection,
        handlers::connect,
        handlers::disconnect,
        handlers::test_connection,
        handlers::list_databases,
        handlers::list_tables,
        handlers::get_all_schemas,
        handlers::get_structure,
        handlers::get_indexes,
        handlers::browse_data,
        handlers::execute_query,
        handlers::classify_query,
        handlers::health_check,
    ),
    components(schemas(
        common::models::BackendKind,
        common::models::SshConfig,
        common::models::ConnectionItem,
        common::models::ConnectionRequest,
        common::models::ConnectStatus,
        common::models::ConnectionTestResult,
        common::models::ExecuteRequest,
        common::models::ClassifyRequest,
        common::models::Classification,
        common::models::ResultEnvelope,
        common::models::ConfirmationRequest,
        common::models::ExecuteOutcome,
        common::models::BrowsePage,
        common::models::ColumnDescriptor,
        common::models::TableSchema,
        handlers::ConnectResponse,
        handlers::HealthResponse,
    )),
    tags(
        (name = "connections", description = "Saved connections and their sessions"),
        (name = "introspection", description = "Databases, tables, structure and data"),
        (name = "query", description = "Query execution and classification"),
        (name = "health", description = "Health check")
    )
)]
pub struct ApiDoc;

/// Connection, introspection and query routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/connections",
            get(handlers::list_connections).post(handlers::save_connection),
        )
        .route("/api/connections/test", post(handlers::test_connection))
        .route(
            "/api/connections/{id}",
            get(handlers::get_connection)
                .put(handlers::update_connection)
                .delete(handlers::delete_connection),
        )
        .route("/api/connections/{id}/connect", post(handlers::connect))
        .route("/api/connections/{id}/disconnect", post(handlers::disconnect))
        .route("/api/db/{id}/databases", get(handlers::list_databases))
        .route("/api/db/{id}/{database}/tables", get(handlers::list_tables))
        .route("/api/db/{id}/{database}/schemas", get(handlers::get_all_schemas))
        .route(
            "/api/db/{id}/{database}/{table}/structure",
            get(handlers::get_structure),
        )
        .route(
            "/api/db/{id}/{database}/{table}/indexes",
            get(handlers::get_indexes),
        )
        .route("/api/db/{id}/{database}/{table}/data", get(handlers::browse_data))
        .route("/api/query/execute", post(handlers::execute_query))
        .route("/api/query/classify", post(handlers::classify_query))
        .route("/api/health", get(handlers::health_check))
}

/// Full application: routes, OpenAPI document and middleware stack.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(router())
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
