//! SSH local port forwarding.
//!
//! A tunnel binds `127.0.0.1:<ephemeral>` and forwards every accepted socket
//! through a `direct-tcpip` channel to the remote target. Backends connect to
//! the local port instead of their configured host.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::errors::{AppError, AppResult};
use common::models::SshConfig;
use russh::client;
use russh_keys::key::KeyPair;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Handle to a running tunnel. Dropping it stops the tunnel.
#[derive(Debug)]
pub struct TunnelHandle {
    local_port: u16,
    cancel_token: CancellationToken,
}

impl TunnelHandle {
    pub fn new(local_port: u16, cancel_token: CancellationToken) -> Self {
        Self {
            local_port,
            cancel_token,
        }
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Stops accepting and tears down open forwards. Safe to call repeatedly.
    pub fn stop(&self) {
        if self.cancel_token.is_cancelled() {
            return;
        }
        self.cancel_token.cancel();
        tracing::info!(local_port = self.local_port, "SSH tunnel stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

impl Drop for TunnelHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Opens tunnels. The registry only sees this trait.
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    /// Resolves once the SSH session is authenticated and the local listener
    /// is bound.
    async fn open(&self, ssh: &SshConfig, remote_host: &str, remote_port: u16)
        -> AppResult<TunnelHandle>;
}

struct SshClientHandler;

#[async_trait]
impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // No known_hosts store; every host key is accepted.
        Ok(true)
    }
}

type SshHandle = client::Handle<SshClientHandler>;

/// russh backed tunnel provider.
pub struct SshTunnelProvider {
    connect_timeout: Duration,
}

impl SshTunnelProvider {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn connect_ssh(ssh: &SshConfig) -> AppResult<SshHandle> {
        let config = Arc::new(client::Config::default());
        let username = ssh.username.clone();

        let mut handle = client::connect(config, (ssh.host.as_str(), ssh.port), SshClientHandler)
            .await
            .map_err(|e| AppError::Tunnel(format!("failed to connect to {}: {}", ssh.host, e)))?;

        let authenticated = if let Some(key_file) = ssh.key_file.as_deref() {
            let key = load_private_key(key_file, ssh.key_passphrase.as_deref()).await?;
            handle
                .authenticate_publickey(&username, key)
                .await
                .map_err(|e| AppError::Tunnel(format!("key authentication failed: {}", e)))?
        } else {
            let password = ssh.password.clone().unwrap_or_default();
            handle
                .authenticate_password(&username, password)
                .await
                .map_err(|e| AppError::Tunnel(format!("password authentication failed: {}", e)))?
        };

        if !authenticated {
            return Err(AppError::Tunnel(format!(
                "authentication rejected for {}@{}",
                username, ssh.host
            )));
        }

        tracing::info!(user = %username, host = %ssh.host, "SSH authentication successful");
        Ok(handle)
    }
}

#[async_trait]
impl TunnelProvider for SshTunnelProvider {
    async fn open(
        &self,
        ssh: &SshConfig,
        remote_host: &str,
        remote_port: u16,
    ) -> AppResult<TunnelHandle> {
        tracing::info!(
            ssh_host = %ssh.host,
            ssh_port = ssh.port,
            remote = %format!("{remote_host}:{remote_port}"),
            "Opening SSH tunnel"
        );

        let handle = tokio::time::timeout(self.connect_timeout, Self::connect_ssh(ssh))
            .await
            .map_err(|_| {
                AppError::Tunnel(format!(
                    "timed out establishing session with {}:{} after {}s",
                    ssh.host,
                    ssh.port,
                    self.connect_timeout.as_secs()
                ))
            })??;
        let handle = Arc::new(Mutex::new(handle));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| AppError::Tunnel(format!("failed to bind local port: {}", e)))?;
        let local_port = listener
            .local_addr()
            .map_err(|e| AppError::Tunnel(e.to_string()))?
            .port();

        let cancel_token = CancellationToken::new();
        tokio::spawn(run_tunnel(
            listener,
            handle,
            remote_host.to_string(),
            remote_port,
            cancel_token.clone(),
        ));

        tracing::info!(local_port, "SSH tunnel listening");
        Ok(TunnelHandle::new(local_port, cancel_token))
    }
}

async fn load_private_key(path: &str, passphrase: Option<&str>) -> AppResult<Arc<KeyPair>> {
    let key_data = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AppError::Tunnel(format!("failed to read key file {}: {}", path, e)))?;
    let key = russh_keys::decode_secret_key(&key_data, passphrase)
        .map_err(|e| AppError::Tunnel(format!("failed to decode key file {}: {}", path, e)))?;
    Ok(Arc::new(key))
}

async fn run_tunnel(
    listener: TcpListener,
    handle: Arc<Mutex<SshHandle>>,
    remote_host: String,
    remote_port: u16,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((local_stream, peer)) => {
                    tracing::debug!(%peer, "Tunnel connection accepted");
                    let handle = handle.clone();
                    let remote_host = remote_host.clone();
                    let cancel = cancel_token.clone();
                    tokio::spawn(async move {
                        if let Err(e) =
                            forward_connection(local_stream, &handle, &remote_host, remote_port, cancel).await
                        {
                            tracing::warn!(error = %e, "Tunnel forwarding error");
                        }
                    });
                }
                Err(e) => tracing::error!(error = %e, "Failed to accept tunnel connection"),
            },
            _ = cancel_token.cancelled() => break,
        }
    }

    if let Err(e) = handle
        .lock()
        .await
        .disconnect(russh::Disconnect::ByApplication, "", "en")
        .await
    {
        tracing::debug!(error = %e, "SSH disconnect after tunnel stop failed");
    }
}

async fn forward_connection(
    mut local_stream: TcpStream,
    handle: &Mutex<SshHandle>,
    remote_host: &str,
    remote_port: u16,
    cancel_token: CancellationToken,
) -> AppResult<()> {
    let channel = handle
        .lock()
        .await
        .channel_open_direct_tcpip(remote_host, u32::from(remote_port), "127.0.0.1", 0)
        .await
        .map_err(|e| AppError::Tunnel(format!("failed to open channel: {}", e)))?;
    let mut remote_stream = channel.into_stream();

    tokio::select! {
        copied = tokio::io::copy_bidirectional(&mut local_stream, &mut remote_stream) => {
            if let Err(e) = copied {
                tracing::debug!(error = %e, "Tunnel stream closed with error");
            }
        }
        _ = cancel_token.cancelled() => {}
    }
    Ok(())
}
