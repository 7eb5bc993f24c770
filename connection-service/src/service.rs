//! Connection management service.
//!
//! API-facing layer over the registry: produces masked `ConnectionItem`s and
//! keeps handler code free of registry details.

use std::sync::Arc;

use async_trait::async_trait;

use common::errors::AppResult;
use common::models::{ConnectStatus, ConnectionItem, ConnectionRequest, ConnectionTestResult};

use crate::registry::ConnectionRegistry;

/// Operations exposed on connections.
#[async_trait]
pub trait ConnectionServiceTrait: Send + Sync {
    /// All saved connections with their live status.
    async fn list(&self) -> Vec<ConnectionItem>;

    async fn get(&self, id: &str) -> AppResult<ConnectionItem>;

    /// Create, or update when `req.id` names an existing connection.
    async fn save(&self, req: ConnectionRequest) -> AppResult<ConnectionItem>;

    async fn delete(&self, id: &str) -> AppResult<()>;

    async fn connect(&self, id: &str) -> AppResult<ConnectStatus>;

    async fn disconnect(&self, id: &str);

    async fn test(&self, req: ConnectionRequest) -> ConnectionTestResult;
}

pub struct ConnectionService {
    registry: Arc<ConnectionRegistry>,
}

impl ConnectionService {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ConnectionServiceTrait for ConnectionService {
    async fn list(&self) -> Vec<ConnectionItem> {
        let connected = self.registry.connected_ids().await;
        self.registry
            .list()
            .await
            .into_iter()
            .map(|config| {
                let is_connected = connected.contains(&config.id);
                ConnectionItem::new(config, is_connected)
            })
            .collect()
    }

    async fn get(&self, id: &str) -> AppResult<ConnectionItem> {
        let config = self.registry.get(id).await?;
        let connected = self.registry.is_connected(id).await;
        Ok(ConnectionItem::new(config, connected))
    }

    async fn save(&self, req: ConnectionRequest) -> AppResult<ConnectionItem> {
        let config = self.registry.upsert(req).await?;
        let connected = self.registry.is_connected(&config.id).await;
        Ok(ConnectionItem::new(config, connected))
    }

    async fn delete(&self, id: &str) -> AppResult<()> {
        self.registry.delete(id).await
    }

    async fn connect(&self, id: &str) -> AppResult<ConnectStatus> {
        self.registry.connect(id).await
    }

    async fn disconnect(&self, id: &str) {
        self.registry.disconnect(id).await
    }

    async fn test(&self, req: ConnectionRequest) -> ConnectionTestResult {
        self.registry.test(req).await
    }
}
