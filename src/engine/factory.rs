use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{DockerEngine, Engine, EngineConnector};
use crate::error::{Error, Result};
use crate::options::ConnectionOptions;
use crate::paths;
use crate::tunnel::{SocketForwarder, SshForwarder};

/// Produces connected engine clients, forwarding remote daemon sockets on
/// first use and reusing them afterwards.
pub struct EngineFactory {
    scratch_dir: PathBuf,
    forwarder: Arc<dyn SocketForwarder>,
    /// Live tunnels by local socket path. The lock also serializes the
    /// exists-check with tunnel creation.
    tunnels: Mutex<HashMap<PathBuf, CancellationToken>>,
}

impl EngineFactory {
    pub fn new(scratch_dir: impl Into<PathBuf>, forwarder: Arc<dyn SocketForwarder>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            forwarder,
            tunnels: Mutex::new(HashMap::new()),
        }
    }

    /// Factory that forwards over SSH.
    pub fn with_ssh(scratch_dir: impl Into<PathBuf>) -> Self {
        Self::new(scratch_dir, Arc::new(SshForwarder::new()))
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub async fn connect(&self, options: &ConnectionOptions) -> Result<Arc<dyn Engine>> {
        let engine = if options.is_local() {
            DockerEngine::connect_local(options.sock_path.as_deref()).await?
        } else {
            let socket = self.ensure_forwarded_socket(options).await?;
            DockerEngine::connect_socket(&socket).await?
        };
        Ok(Arc::new(engine))
    }

    /// Local path of the forwarded daemon socket for a remote target,
    /// starting a tunnel if none is live.
    pub async fn ensure_forwarded_socket(&self, options: &ConnectionOptions) -> Result<PathBuf> {
        let remote = options.remote.as_ref().ok_or_else(|| {
            Error::Configuration("Remote Hostname is required for a remote engine".to_string())
        })?;
        let local_path = paths::forwarded_socket_path(&self.scratch_dir, &remote.hostname);

        let mut tunnels = self.tunnels.lock().await;
        if tokio::fs::try_exists(&local_path).await.unwrap_or(false) {
            debug!(host = %remote.hostname, local = %local_path.display(), "reusing forwarded socket");
            return Ok(local_path);
        }

        let forwarded = self
            .forwarder
            .forward(options, &local_path, options.remote_socket())
            .await?;
        if let Some(stale) = tunnels.insert(forwarded.path.clone(), forwarded.cancel) {
            // Its socket is already gone; make sure the task is too.
            stale.cancel();
        }

        Ok(local_path)
    }

    /// Number of tunnels started by this factory that have not been shut down.
    pub async fn tunnel_count(&self) -> usize {
        self.tunnels.lock().await.len()
    }

    /// Cancel every tunnel this factory started.
    pub async fn close_tunnels(&self) {
        let mut tunnels = self.tunnels.lock().await;
        for (path, cancel) in tunnels.drain() {
            info!(local = %path.display(), "closing tunnel");
            cancel.cancel();
        }
    }
}

#[async_trait]
impl EngineConnector for EngineFactory {
    async fn connect(&self, options: &ConnectionOptions) -> Result<Arc<dyn Engine>> {
        EngineFactory::connect(self, options).await
    }

    async fn shutdown(&self) {
        self.close_tunnels().await;
    }
}
