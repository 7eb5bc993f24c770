//! Connection registry.
//!
//! Owns the persisted connection configs and the set of live sessions. Every
//! mutation (upsert, delete, connect, disconnect, test) runs under one async
//! lock; readers go through short read locks and only ever see fully built
//! entries. Backend and tunnel calls never run while a read/write lock on the
//! collections is held. Closing a session happens after its entry has been
//! detached and the mutation lock released.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use common::errors::{AppError, AppResult};
use common::models::{
    BackendKind, ConnectStatus, ConnectionConfig, ConnectionRequest, ConnectionTestResult,
};
use common::utils::IdGenerator;

use crate::adapters::{BackendSession, Connector, Endpoint};
use crate::store::ConnectionStore;
use crate::tunnel::{TunnelHandle, TunnelProvider};

/// Prefix of the throwaway ids used by connection tests.
pub const TEST_ID_PREFIX: &str = "__test__";

/// A live session plus the tunnel it runs through.
pub struct ActiveConnection {
    /// Config as it was when the session was opened.
    pub config: ConnectionConfig,
    pub session: Arc<dyn BackendSession>,
    tunnel: Option<TunnelHandle>,
}

pub struct ConnectionRegistry {
    store: ConnectionStore,
    connector: Arc<dyn Connector>,
    tunnels: Arc<dyn TunnelProvider>,
    op_lock: Mutex<()>,
    configs: RwLock<Vec<ConnectionConfig>>,
    active: RwLock<HashMap<String, ActiveConnection>>,
    teardown_failures: AtomicU64,
}

impl ConnectionRegistry {
    /// Creates a registry over `store`, loading the persisted configs.
    pub fn new(
        store: ConnectionStore,
        connector: Arc<dyn Connector>,
        tunnels: Arc<dyn TunnelProvider>,
    ) -> AppResult<Self> {
        let configs = store.load()?;
        tracing::info!(
            path = %store.path().display(),
            count = configs.len(),
            "Loaded saved connections"
        );
        Ok(Self {
            store,
            connector,
            tunnels,
            op_lock: Mutex::new(()),
            configs: RwLock::new(configs),
            active: RwLock::new(HashMap::new()),
            teardown_failures: AtomicU64::new(0),
        })
    }

    pub async fn list(&self) -> Vec<ConnectionConfig> {
        self.configs.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> AppResult<ConnectionConfig> {
        self.configs
            .read()
            .await
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| AppError::ConnectionNotFound(id.to_string()))
    }

    /// Creates a config, or merges `request` into the config with the same id.
    ///
    /// The file is rewritten before the in-memory collection changes, so a
    /// failed write leaves both untouched.
    pub async fn upsert(&self, request: ConnectionRequest) -> AppResult<ConnectionConfig> {
        let _guard = self.op_lock.lock().await;

        let mut next = self.configs.read().await.clone();
        let id = request.id.clone().filter(|id| !id.trim().is_empty());
        let position = id
            .as_ref()
            .and_then(|id| next.iter().position(|c| &c.id == id));

        let saved = match position {
            Some(index) => {
                next[index].merge(request)?;
                next[index].clone()
            }
            None => {
                let config = request.into_config(id.unwrap_or_else(IdGenerator::connection_id))?;
                next.push(config.clone());
                config
            }
        };

        self.store.save(next.clone()).await?;
        *self.configs.write().await = next;

        tracing::info!(id = %saved.id, kind = %saved.kind, created = position.is_none(), "Connection saved");
        Ok(saved)
    }

    /// Disconnects (if active) and removes the config.
    pub async fn delete(&self, id: &str) -> AppResult<()> {
        let detached = {
            let _guard = self.op_lock.lock().await;

            let mut next = self.configs.read().await.clone();
            let before = next.len();
            next.retain(|c| c.id != id);
            if next.len() == before {
                return Err(AppError::ConnectionNotFound(id.to_string()));
            }

            self.store.save(next.clone()).await?;
            *self.configs.write().await = next;
            self.active.write().await.remove(id)
        };

        if let Some(entry) = detached {
            self.release(id, entry).await;
        }
        tracing::info!(id = %id, "Connection deleted");
        Ok(())
    }

    /// Opens a session for `id`. Connecting an active id is a no-op.
    pub async fn connect(&self, id: &str) -> AppResult<ConnectStatus> {
        let _guard = self.op_lock.lock().await;

        if self.active.read().await.contains_key(id) {
            return Ok(ConnectStatus::AlreadyConnected);
        }
        let config = self.get(id).await?;

        let (session, tunnel) = self.open_session(&config).await?;
        let local_port = tunnel.as_ref().map(TunnelHandle::local_port);
        self.active.write().await.insert(
            id.to_string(),
            ActiveConnection {
                config,
                session,
                tunnel,
            },
        );

        tracing::info!(id = %id, tunnel_port = ?local_port, "Connection activated");
        Ok(ConnectStatus::Connected)
    }

    /// Closes the session for `id`, if any. Teardown errors are logged and
    /// counted, never returned.
    ///
    /// The entry leaves the active set under the mutation lock; closing runs
    /// after the lock is released, so a busy session never stalls other ids.
    pub async fn disconnect(&self, id: &str) {
        let detached = {
            let _guard = self.op_lock.lock().await;
            self.active.write().await.remove(id)
        };
        if let Some(entry) = detached {
            self.release(id, entry).await;
        }
    }

    /// Disconnects every active connection.
    pub async fn disconnect_all(&self) {
        let detached: Vec<(String, ActiveConnection)> = {
            let _guard = self.op_lock.lock().await;
            self.active.write().await.drain().collect()
        };
        for (id, entry) in detached {
            self.release(&id, entry).await;
        }
    }

    /// Opens and immediately closes a session for an unsaved config.
    ///
    /// When `request.id` names a saved connection the request is applied on
    /// top of it first. Nothing is persisted or registered as active.
    pub async fn test(&self, request: ConnectionRequest) -> ConnectionTestResult {
        let _guard = self.op_lock.lock().await;

        let temp_id = format!("{}-{}", TEST_ID_PREFIX, IdGenerator::short_id());
        let outcome = async {
            let mut config = self.resolve_test_config(request).await?;
            config.id = temp_id.clone();
            let (session, tunnel) = self.open_session(&config).await?;
            if let Err(e) = session.close().await {
                tracing::warn!(id = %temp_id, error = %e, "Closing test session failed");
            }
            if let Some(tunnel) = tunnel {
                tunnel.stop();
            }
            Ok::<_, AppError>(())
        }
        .await;

        match outcome {
            Ok(()) => ConnectionTestResult::success(),
            Err(e) => {
                tracing::info!(id = %temp_id, error = %e, "Connection test failed");
                ConnectionTestResult::failure(e)
            }
        }
    }

    pub async fn is_connected(&self, id: &str) -> bool {
        self.active.read().await.contains_key(id)
    }

    pub async fn connected_ids(&self) -> HashSet<String> {
        self.active.read().await.keys().cloned().collect()
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    /// Backend of `id`: the live snapshot when connected, else the saved config.
    pub async fn backend_kind(&self, id: &str) -> AppResult<BackendKind> {
        if let Some(active) = self.active.read().await.get(id) {
            return Ok(active.config.kind);
        }
        self.get(id).await.map(|c| c.kind)
    }

    /// Live session for `id`.
    ///
    /// # Errors
    /// `NotConnected` when the config exists but is inactive, `ConnectionNotFound`
    /// when it does not exist at all.
    pub async fn session(&self, id: &str) -> AppResult<Arc<dyn BackendSession>> {
        if let Some(active) = self.active.read().await.get(id) {
            return Ok(active.session.clone());
        }
        self.get(id).await?;
        Err(AppError::NotConnected(id.to_string()))
    }

    /// Number of close/stop failures swallowed so far.
    pub fn teardown_failures(&self) -> u64 {
        self.teardown_failures.load(Ordering::Relaxed)
    }

    async fn resolve_test_config(&self, request: ConnectionRequest) -> AppResult<ConnectionConfig> {
        let saved = match request.id.as_deref() {
            Some(id) => self.get(id).await.ok(),
            None => None,
        };
        match saved {
            Some(mut config) => {
                config.merge(request)?;
                Ok(config)
            }
            None => request.into_config(String::new()),
        }
    }

    /// Tunnel (when configured) then client. A client failure stops the
    /// tunnel before the error is returned.
    async fn open_session(
        &self,
        config: &ConnectionConfig,
    ) -> AppResult<(Arc<dyn BackendSession>, Option<TunnelHandle>)> {
        let (endpoint, tunnel) = match config.tunnel() {
            Some(ssh) => {
                let tunnel = self
                    .tunnels
                    .open(ssh, config.target_host(), config.target_port())
                    .await?;
                (Endpoint::tunneled(tunnel.local_port()), Some(tunnel))
            }
            None => (Endpoint::direct(config), None),
        };

        match self.connector.connect(config, &endpoint).await {
            Ok(session) => Ok((session, tunnel)),
            Err(e) => {
                if let Some(tunnel) = tunnel {
                    tunnel.stop();
                }
                tracing::warn!(id = %config.id, kind = %config.kind, error = %e, "Backend connection failed");
                Err(e)
            }
        }
    }

    /// Closes a detached entry: client first, then its tunnel. Never called
    /// with `op_lock` held.
    async fn release(&self, id: &str, entry: ActiveConnection) {
        if let Err(e) = entry.session.close().await {
            self.teardown_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(id = %id, error = %e, "Closing backend session failed");
        }
        if let Some(tunnel) = entry.tunnel {
            tunnel.stop();
        }

        tracing::info!(id = %id, "Connection deactivated");
    }
}
