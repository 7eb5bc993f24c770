//! In-process fakes for the connector and the tunnel provider.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use common::config::AppConfig;
use common::errors::{AppError, AppResult};
use common::models::{
    BackendKind, BrowsePage, ColumnDescriptor, ConnectionConfig, ConnectionRequest, PageRequest,
    ResultEnvelope, Row, SshConfig,
};
use connection_service::adapters::{BackendSession, Connector, Endpoint};
use connection_service::registry::ConnectionRegistry;
use connection_service::state::AppState;
use connection_service::store::ConnectionStore;
use connection_service::tunnel::{TunnelHandle, TunnelProvider};

/// Shared record of every adapter call made by fake sessions.
#[derive(Default)]
pub struct CallLog {
    calls: Mutex<Vec<String>>,
}

impl CallLog {
    pub fn push(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.all().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

pub struct FakeSession {
    kind: BackendKind,
    log: Arc<CallLog>,
    fail_close: bool,
    /// How long `execute` holds the statement slot.
    busy: Duration,
    /// Shared by `execute` and `close`, so a close waits out a running statement.
    statement: tokio::sync::Mutex<()>,
}

#[async_trait]
impl BackendSession for FakeSession {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn list_databases(&self) -> AppResult<Vec<String>> {
        self.log.push("list_databases");
        Ok(vec!["shop".to_string(), "analytics".to_string()])
    }

    async fn list_tables(&self, database: &str) -> AppResult<Vec<String>> {
        self.log.push(format!("list_tables:{database}"));
        Ok(vec!["orders".to_string(), "users".to_string()])
    }

    async fn get_structure(&self, database: &str, table: &str) -> AppResult<Vec<ColumnDescriptor>> {
        self.log.push(format!("get_structure:{database}.{table}"));
        Ok(vec![
            ColumnDescriptor::new("id", "int", "PRI"),
            ColumnDescriptor::new("name", "varchar(64)", ""),
        ])
    }

    async fn browse(&self, database: &str, table: &str, page: PageRequest) -> AppResult<BrowsePage> {
        self.log.push(format!(
            "browse:{database}.{table}:offset={}:limit={}",
            page.offset(),
            page.page_size
        ));
        let mut row = Row::new();
        row.insert("id".to_string(), json!(page.offset() + 1));
        Ok(BrowsePage {
            rows: vec![row],
            total: 42,
            page: page.page,
            page_size: page.page_size,
        })
    }

    async fn execute(&self, query: &str, database: Option<&str>) -> AppResult<ResultEnvelope> {
        let _statement = self.statement.lock().await;
        self.log
            .push(format!("execute:{}:{query}", database.unwrap_or("-")));
        if !self.busy.is_zero() {
            tokio::time::sleep(self.busy).await;
        }
        if query.trim_start().to_ascii_uppercase().starts_with("SELECT") {
            let mut row = Row::new();
            row.insert("n".to_string(), json!(1));
            Ok(ResultEnvelope::from_rows(vec![row]))
        } else {
            Ok(ResultEnvelope::affected(1))
        }
    }

    async fn close(&self) -> AppResult<()> {
        let _statement = self.statement.lock().await;
        self.log.push("close");
        if self.fail_close {
            return Err(AppError::DatabaseConnection("socket already closed".into()));
        }
        Ok(())
    }
}

/// Connector that hands out [`FakeSession`]s and records every endpoint.
#[derive(Default)]
pub struct FakeConnector {
    pub log: Arc<CallLog>,
    pub fail: AtomicBool,
    pub fail_close: AtomicBool,
    pub connects: AtomicUsize,
    pub endpoints: Mutex<Vec<(String, Endpoint)>>,
    /// Milliseconds each `execute` of new sessions takes.
    pub busy_ms: AtomicU64,
}

impl FakeConnector {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn set_busy(&self, busy: Duration) {
        self.busy_ms.store(busy.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn last_endpoint(&self) -> Option<(String, Endpoint)> {
        self.endpoints.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        config: &ConnectionConfig,
        endpoint: &Endpoint,
    ) -> AppResult<Arc<dyn BackendSession>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.endpoints
            .lock()
            .unwrap()
            .push((config.id.clone(), endpoint.clone()));
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseConnection(
                "Access denied for user 'root'@'localhost'".into(),
            ));
        }
        Ok(Arc::new(FakeSession {
            kind: config.kind,
            log: self.log.clone(),
            fail_close: self.fail_close.load(Ordering::SeqCst),
            busy: Duration::from_millis(self.busy_ms.load(Ordering::SeqCst)),
            statement: tokio::sync::Mutex::new(()),
        }))
    }
}

/// Tunnel provider that allocates fake local ports and keeps the handles'
/// cancellation tokens so tests can see when a tunnel was stopped.
#[derive(Default)]
pub struct FakeTunnels {
    pub fail: AtomicBool,
    pub opened: Mutex<Vec<(String, u16)>>,
    pub tokens: Mutex<Vec<CancellationToken>>,
}

impl FakeTunnels {
    pub const FIRST_PORT: u16 = 40000;

    pub fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub fn stopped_count(&self) -> usize {
        self.tokens
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.is_cancelled())
            .count()
    }
}

#[async_trait]
impl TunnelProvider for FakeTunnels {
    async fn open(&self, ssh: &SshConfig, remote_host: &str, remote_port: u16) -> AppResult<TunnelHandle> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Tunnel(format!("cannot reach {}:{}", ssh.host, ssh.port)));
        }
        let mut opened = self.opened.lock().unwrap();
        opened.push((remote_host.to_string(), remote_port));
        let port = Self::FIRST_PORT + opened.len() as u16 - 1;

        let token = CancellationToken::new();
        self.tokens.lock().unwrap().push(token.clone());
        Ok(TunnelHandle::new(port, token))
    }
}

/// A registry over a temp data directory with fake backends.
pub struct Harness {
    pub dir: TempDir,
    pub connector: Arc<FakeConnector>,
    pub tunnels: Arc<FakeTunnels>,
    pub registry: Arc<ConnectionRegistry>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self::in_dir(dir)
    }

    pub fn in_dir(dir: TempDir) -> Self {
        let connector = Arc::new(FakeConnector::default());
        let tunnels = Arc::new(FakeTunnels::default());
        let registry = Arc::new(
            ConnectionRegistry::new(
                ConnectionStore::new(AppConfig::with_data_dir(dir.path()).connections_file()),
                connector.clone(),
                tunnels.clone(),
            )
            .unwrap(),
        );
        Self {
            dir,
            connector,
            tunnels,
            registry,
        }
    }

    /// Registry reopened over the same data directory.
    pub fn reopen(self) -> Self {
        Self::in_dir(self.dir)
    }

    pub fn app_state(&self) -> AppState {
        AppState::with_providers(
            AppConfig::with_data_dir(self.dir.path()),
            self.connector.clone(),
            self.tunnels.clone(),
        )
        .unwrap()
    }
}

pub fn mysql_request(name: &str) -> ConnectionRequest {
    ConnectionRequest {
        kind: Some("mysql".to_string()),
        name: Some(name.to_string()),
        host: Some("db.internal".to_string()),
        port: Some(3306),
        user: Some("root".to_string()),
        password: Some("secret".to_string()),
        database: Some("shop".to_string()),
        ..Default::default()
    }
}

pub fn mongo_request(name: &str) -> ConnectionRequest {
    ConnectionRequest {
        kind: Some("mongodb".to_string()),
        name: Some(name.to_string()),
        host: Some("mongo.internal".to_string()),
        ..Default::default()
    }
}

pub fn es_request(name: &str) -> ConnectionRequest {
    ConnectionRequest {
        kind: Some("elasticsearch".to_string()),
        name: Some(name.to_string()),
        host: Some("es.internal".to_string()),
        scheme: Some("http".to_string()),
        ..Default::default()
    }
}

pub fn ssh_config() -> SshConfig {
    SshConfig {
        host: "bastion.example.com".to_string(),
        port: 22,
        username: "deploy".to_string(),
        password: Some("hunter2".to_string()),
        ..Default::default()
    }
}
