//! Backend adapters.
//!
//! Each backend implements [`BackendSession`] over one live client. The
//! registry creates sessions through a [`Connector`] so tests can swap the
//! real drivers out.

pub mod elastic;
pub mod mongo;
pub mod mysql;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::errors::{AppError, AppResult};
use common::models::{
    BackendKind, BrowsePage, ColumnDescriptor, ConnectionConfig, PageRequest, ResultEnvelope, Row,
    TableSchema,
};
use tokio_util::sync::CancellationToken;

pub use elastic::ElasticSession;
pub use mongo::MongoSession;
pub use mysql::MySqlSession;

/// Runs `op` unless the session is closed first. A close while `op` is in
/// flight drops it, which abandons the request on the wire.
pub(crate) async fn until_closed<T>(
    closed: &CancellationToken,
    op: impl Future<Output = AppResult<T>>,
) -> AppResult<T> {
    tokio::select! {
        biased;
        _ = closed.cancelled() => Err(AppError::DatabaseConnection("session is closed".into())),
        result = op => result,
    }
}

/// Address a session should dial: either the configured target or the local
/// end of a tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tunneled: bool,
}

impl Endpoint {
    pub fn direct(config: &ConnectionConfig) -> Self {
        Self {
            host: config.target_host().to_string(),
            port: config.target_port(),
            tunneled: false,
        }
    }

    pub fn tunneled(local_port: u16) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: local_port,
            tunneled: true,
        }
    }
}

/// Uniform capability set of a live backend session.
#[async_trait]
pub trait BackendSession: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn list_databases(&self) -> AppResult<Vec<String>>;

    async fn list_tables(&self, database: &str) -> AppResult<Vec<String>>;

    async fn get_structure(&self, database: &str, table: &str) -> AppResult<Vec<ColumnDescriptor>>;

    /// Index rows for a table. Only the relational backend has any.
    async fn get_indexes(&self, _database: &str, _table: &str) -> AppResult<Vec<Row>> {
        Ok(Vec::new())
    }

    async fn browse(&self, database: &str, table: &str, page: PageRequest) -> AppResult<BrowsePage>;

    async fn execute(&self, query: &str, database: Option<&str>) -> AppResult<ResultEnvelope>;

    /// Structure of every table in `database`.
    async fn get_all_schemas(&self, database: &str) -> AppResult<Vec<TableSchema>> {
        let mut schemas = Vec::new();
        for table in self.list_tables(database).await? {
            let columns = self.get_structure(database, &table).await?;
            schemas.push(TableSchema { table, columns });
        }
        Ok(schemas)
    }

    /// Releases the client. Called once, by the registry.
    async fn close(&self) -> AppResult<()>;
}

/// Opens sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        config: &ConnectionConfig,
        endpoint: &Endpoint,
    ) -> AppResult<Arc<dyn BackendSession>>;
}

/// Connector backed by the real drivers.
pub struct DriverConnector {
    connect_timeout: Duration,
}

impl DriverConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for DriverConnector {
    async fn connect(
        &self,
        config: &ConnectionConfig,
        endpoint: &Endpoint,
    ) -> AppResult<Arc<dyn BackendSession>> {
        tracing::debug!(
            id = %config.id,
            kind = %config.kind,
            host = %endpoint.host,
            port = endpoint.port,
            tunneled = endpoint.tunneled,
            "Opening backend session"
        );
        let session: Arc<dyn BackendSession> = match config.kind {
            BackendKind::Relational => {
                Arc::new(MySqlSession::connect(config, endpoint, self.connect_timeout).await?)
            }
            BackendKind::Document => {
                Arc::new(MongoSession::connect(config, endpoint, self.connect_timeout).await?)
            }
            BackendKind::Search => {
                Arc::new(ElasticSession::connect(config, endpoint, self.connect_timeout).await?)
            }
        };
        Ok(session)
    }
}
