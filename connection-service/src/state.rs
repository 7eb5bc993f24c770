//! Application state for connection service.

use std::sync::Arc;

use common::config::AppConfig;
use common::errors::AppResult;

use crate::adapters::{Connector, DriverConnector};
use crate::dispatcher::QueryDispatcher;
use crate::registry::ConnectionRegistry;
use crate::store::ConnectionStore;
use crate::tunnel::{SshTunnelProvider, TunnelProvider};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: QueryDispatcher,
}

impl AppState {
    /// State backed by the real drivers and SSH tunnels.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let timeout = config.connect_timeout();
        Self::with_providers(
            config,
            Arc::new(DriverConnector::new(timeout)),
            Arc::new(SshTunnelProvider::new(timeout)),
        )
    }

    /// State with injected connector and tunnel provider.
    pub fn with_providers(
        config: AppConfig,
        connector: Arc<dyn Connector>,
        tunnels: Arc<dyn TunnelProvider>,
    ) -> AppResult<Self> {
        let store = ConnectionStore::new(config.connections_file());
        let registry = Arc::new(ConnectionRegistry::new(store, connector, tunnels)?);
        Ok(Self {
            dispatcher: QueryDispatcher::new(registry.clone()),
            registry,
            config,
        })
    }
}
