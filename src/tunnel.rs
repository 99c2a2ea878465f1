//! Engine socket forwarding over SSH.
//!
//! [`SocketForwarder`] is the seam the engine factory uses to make a remote
//! daemon socket reachable locally. [`SshForwarder`] implements it with an
//! [`ssh_tunnel::UnixTunnel`] plus a drain task that logs late failures and
//! removes the dead socket, so the next connection re-creates the tunnel.
//! Forwarding needs Unix domain sockets on this host; elsewhere
//! [`SshForwarder`] refuses remote targets with a configuration error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
#[cfg(unix)]
use ssh_tunnel::{
    remove_socket_if_same, socket_ino, Readiness, TunnelError, TunnelState, UnixTunnel,
};
#[cfg(unix)]
use tokio::sync::mpsc;
#[cfg(unix)]
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
#[cfg(unix)]
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::options::ConnectionOptions;

/// Upper bound on SSH dial, authentication and listener bind.
pub const TUNNEL_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// A local socket backed by a live tunnel.
#[derive(Debug, Clone)]
pub struct ForwardedSocket {
    pub path: PathBuf,
    /// Cancelling stops the tunnel and removes `path`.
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait SocketForwarder: Send + Sync {
    /// Make `remote_path` on the target host reachable at `local_path`.
    ///
    /// Returns once the local listener accepts connections.
    async fn forward(
        &self,
        options: &ConnectionOptions,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<ForwardedSocket>;
}

#[derive(Debug, Default, Clone)]
pub struct SshForwarder {
    #[cfg_attr(not(unix), allow(dead_code))]
    ready_timeout: Option<Duration>,
}

impl SshForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = Some(timeout);
        self
    }
}

#[cfg(unix)]
#[async_trait]
impl SocketForwarder for SshForwarder {
    async fn forward(
        &self,
        options: &ConnectionOptions,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<ForwardedSocket> {
        let remote = options.remote.as_ref().ok_or_else(|| {
            Error::Configuration("Remote Hostname is required to forward a socket".to_string())
        })?;

        // An existing socket belongs to a tunnel that is still up.
        if tokio::fs::try_exists(local_path).await.unwrap_or(false) {
            debug!(local = %local_path.display(), "socket exists, reusing tunnel");
            return Ok(ForwardedSocket {
                path: local_path.to_path_buf(),
                cancel: CancellationToken::new(),
            });
        }

        let host = remote.hostname.clone();
        let tunnel = UnixTunnel::new(remote.ssh_config(), local_path, remote_path)
            .on_state(move |state| match state {
                TunnelState::Starting => debug!(target: "tunnel", host = %host, "starting"),
                TunnelState::Started => debug!(target: "tunnel", host = %host, "started"),
                TunnelState::Stopped => debug!(target: "tunnel", host = %host, "stopped"),
            });

        let cancel = CancellationToken::new();
        let mut handle = tunnel.start(cancel.clone());
        let timeout = self.ready_timeout.unwrap_or(TUNNEL_READY_TIMEOUT);

        match tokio::time::timeout(timeout, &mut handle.ready).await {
            Ok(Ok(Readiness::Ready)) => {}
            Ok(Ok(Readiness::Failed(e))) => return Err(e.into()),
            Ok(Err(_)) => {
                return Err(Error::Connection(format!(
                    "tunnel to {} exited before signaling readiness",
                    remote.hostname
                )))
            }
            Err(_) => {
                cancel.cancel();
                return Err(Error::Connection(format!(
                    "tunnel to {} not ready after {:?}",
                    remote.hostname, timeout
                )));
            }
        }

        let ino = socket_ino(local_path)?;
        spawn_error_drain(handle.errors, local_path.to_path_buf(), ino, cancel.clone());

        info!(
            host = %remote.hostname,
            remote_socket = %remote_path,
            local = %local_path.display(),
            "engine socket forwarded"
        );
        Ok(ForwardedSocket {
            path: local_path.to_path_buf(),
            cancel,
        })
    }
}

#[cfg(not(unix))]
#[async_trait]
impl SocketForwarder for SshForwarder {
    async fn forward(
        &self,
        options: &ConnectionOptions,
        _local_path: &Path,
        _remote_path: &str,
    ) -> Result<ForwardedSocket> {
        let host = options
            .remote
            .as_ref()
            .map(|r| r.hostname.as_str())
            .unwrap_or_default();
        Err(Error::Configuration(format!(
            "remote engine {} needs Unix socket forwarding, which this host does not support",
            host
        )))
    }
}

/// Log the first post-readiness failure and remove the socket it left.
#[cfg(unix)]
fn spawn_error_drain(
    mut errors: mpsc::UnboundedReceiver<TunnelError>,
    local_path: PathBuf,
    ino: u64,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            failure = errors.recv() => {
                if let Some(e) = failure {
                    error!(target: "tunnel", local = %local_path.display(), error = %e, "tunnel failed");
                    if let Err(e) = remove_socket_if_same(&local_path, ino) {
                        error!(target: "tunnel", local = %local_path.display(), error = %e, "failed to remove socket");
                    }
                }
            }
            _ = cancel.cancelled() => {
                debug!(target: "tunnel", local = %local_path.display(), "tunnel cancelled");
            }
        }
    })
}
