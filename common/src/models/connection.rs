//! Connection configuration models.
//!
//! `ConnectionConfig` is what gets persisted; `ConnectionRequest` is the
//! partial shape accepted for upserts; `ConnectionItem` is the masked view
//! returned to API clients.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::{AppError, AppResult};

/// Backend paradigm of a connection.
///
/// Persisted under the driver names used by existing connection files; the
/// paradigm names are accepted as aliases.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
pub enum BackendKind {
    /// Relational database (MySQL).
    #[serde(rename = "mysql", alias = "relational")]
    Relational,
    /// Document store (MongoDB).
    #[serde(rename = "mongodb", alias = "document")]
    Document,
    /// Search engine (Elasticsearch).
    #[serde(rename = "elasticsearch", alias = "search")]
    Search,
}

impl BackendKind {
    /// Returns the default port for this backend.
    pub fn default_port(&self) -> u16 {
        match self {
            BackendKind::Relational => 3306,
            BackendKind::Document => 27017,
            BackendKind::Search => 9200,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Relational => "mysql",
            BackendKind::Document => "mongodb",
            BackendKind::Search => "elasticsearch",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mysql" | "relational" => Ok(BackendKind::Relational),
            "mongodb" | "mongo" | "document" => Ok(BackendKind::Document),
            "elasticsearch" | "elastic" | "search" => Ok(BackendKind::Search),
            other => Err(AppError::UnsupportedDatabaseType(other.to_string())),
        }
    }
}

/// SSH jump host settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SshConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Path to a private key file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_passphrase: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

impl SshConfig {
    /// A descriptor without a host means "connect directly".
    pub fn is_enabled(&self) -> bool {
        !self.host.trim().is_empty()
    }

    fn masked(&self) -> Self {
        Self {
            password: None,
            key_passphrase: None,
            ..self.clone()
        }
    }
}

/// Full connection configuration (stored internally).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ConnectionConfig {
    /// Unique connection identifier.
    pub id: String,
    /// Backend type.
    #[serde(rename = "type")]
    pub kind: BackendKind,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Default database (relational only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Full connection string (document store only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// `http` or `https` (search only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_certs: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshConfig>,
}

impl ConnectionConfig {
    /// Host to reach when no tunnel is involved.
    pub fn target_host(&self) -> &str {
        self.host
            .as_deref()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or("127.0.0.1")
    }

    /// Port to reach when no tunnel is involved.
    pub fn target_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.kind.default_port())
    }

    /// SSH settings, only when they actually name a jump host.
    pub fn tunnel(&self) -> Option<&SshConfig> {
        self.ssh.as_ref().filter(|ssh| ssh.is_enabled())
    }

    /// Applies every field present in `request`; absent fields keep their
    /// stored value.
    pub fn merge(&mut self, request: ConnectionRequest) -> AppResult<()> {
        if let Some(kind) = request.kind.as_deref() {
            self.kind = kind.parse()?;
        }
        macro_rules! overwrite {
            ($($field:ident),*) => {
                $(if request.$field.is_some() { self.$field = request.$field; })*
            };
        }
        overwrite!(name, host, port, user, password, database, uri, scheme, api_key, verify_certs, ssh);
        Ok(())
    }
}

/// Request body for creating or updating a connection.
///
/// All fields are optional so the same shape serves partial updates; `type`
/// is required when the id does not exist yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ConnectionRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub scheme: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub verify_certs: Option<bool>,
    #[serde(default)]
    pub ssh: Option<SshConfig>,
}

impl ConnectionRequest {
    /// Builds a brand new config under `id`.
    ///
    /// # Errors
    /// `Validation` when `type` is missing, `UnsupportedDatabaseType` when it
    /// names an unknown backend.
    pub fn into_config(self, id: String) -> AppResult<ConnectionConfig> {
        let kind: BackendKind = self
            .kind
            .as_deref()
            .ok_or_else(|| AppError::Validation("connection type is required".into()))?
            .parse()?;
        Ok(ConnectionConfig {
            id,
            kind,
            name: self.name,
            host: self.host,
            port: self.port,
            user: self.user,
            password: self.password,
            database: self.database,
            uri: self.uri,
            scheme: self.scheme,
            api_key: self.api_key,
            verify_certs: self.verify_certs,
            ssh: self.ssh,
        })
    }
}

/// Connection item for API responses (secrets removed).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectionItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: BackendKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshConfig>,
    /// Whether a live session exists for this id.
    pub connected: bool,
}

impl ConnectionItem {
    pub fn new(config: ConnectionConfig, connected: bool) -> Self {
        Self {
            ssh: config.ssh.as_ref().map(SshConfig::masked),
            id: config.id,
            kind: config.kind,
            name: config.name,
            host: config.host,
            port: config.port,
            user: config.user,
            database: config.database,
            scheme: config.scheme,
            connected,
        }
    }
}

/// Outcome of `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectStatus {
    Connected,
    AlreadyConnected,
}

/// Outcome of a connection test. Failures are data, not errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ConnectionTestResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionTestResult {
    pub fn success() -> Self {
        Self { ok: true, error: None }
    }

    pub fn failure(error: impl std::fmt::Display) -> Self {
        Self {
            ok: false,
            error: Some(error.to_string()),
        }
    }
}
