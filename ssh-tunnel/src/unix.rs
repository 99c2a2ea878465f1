use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{SshConfig, SshSession, TunnelError};

/// How often the accept loop checks that the SSH session is still alive.
const LIVENESS_INTERVAL: Duration = Duration::from_secs(5);

/// Lifecycle of a tunnel as seen by its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Starting,
    Started,
    Stopped,
}

/// Outcome of tunnel establishment, delivered exactly once.
#[derive(Debug)]
pub enum Readiness {
    /// The local listener is bound and accepting connections.
    Ready,
    Failed(TunnelError),
}

type StateCallback = Arc<dyn Fn(TunnelState) + Send + Sync>;

/// Handle to a running tunnel task.
pub struct TunnelHandle {
    /// Resolves once with the establishment outcome.
    pub ready: oneshot::Receiver<Readiness>,
    /// Failures after readiness. Closed when the tunnel stops.
    pub errors: mpsc::UnboundedReceiver<TunnelError>,
    /// Cancelling stops the accept loop and removes the local socket.
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
}

/// A remote Unix socket exposed at a local path.
pub struct UnixTunnel {
    config: SshConfig,
    local_path: PathBuf,
    remote_path: String,
    on_state: Option<StateCallback>,
}

impl UnixTunnel {
    pub fn new(
        config: SshConfig,
        local_path: impl Into<PathBuf>,
        remote_path: impl Into<String>,
    ) -> Self {
        Self {
            config,
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            on_state: None,
        }
    }

    /// Observe state transitions.
    pub fn on_state<F>(mut self, callback: F) -> Self
    where
        F: Fn(TunnelState) + Send + Sync + 'static,
    {
        self.on_state = Some(Arc::new(callback));
        self
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    /// Spawn the tunnel task. The caller must wait on `ready` before dialing
    /// the local path.
    pub fn start(self, cancel: CancellationToken) -> TunnelHandle {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();

        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move { self.run(ready_tx, error_tx, task_cancel).await });

        TunnelHandle {
            ready: ready_rx,
            errors: error_rx,
            cancel,
            task,
        }
    }

    fn set_state(&self, state: TunnelState) {
        debug!(target: "tunnel", local = %self.local_path.display(), state = ?state, "tunnel state");
        if let Some(callback) = &self.on_state {
            callback(state);
        }
    }

    async fn establish(&self) -> Result<(SshSession, UnixListener, u64), TunnelError> {
        let session = SshSession::connect(&self.config).await?;

        if let Some(parent) = self.local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // bind fails with AddrInUse when the path exists, so two tunnels can
        // never share one socket file.
        let listener = match UnixListener::bind(&self.local_path) {
            Ok(listener) => listener,
            Err(e) => {
                session.close().await;
                return Err(e.into());
            }
        };
        let socket_ino = std::fs::metadata(&self.local_path)?.ino();

        Ok((session, listener, socket_ino))
    }

    async fn run(
        self,
        ready_tx: oneshot::Sender<Readiness>,
        error_tx: mpsc::UnboundedSender<TunnelError>,
        cancel: CancellationToken,
    ) {
        self.set_state(TunnelState::Starting);

        let (session, listener, socket_ino) = match self.establish().await {
            Ok(established) => established,
            Err(e) => {
                let _ = ready_tx.send(Readiness::Failed(e));
                self.set_state(TunnelState::Stopped);
                return;
            }
        };
        let session = Arc::new(session);

        self.set_state(TunnelState::Started);
        let _ = ready_tx.send(Readiness::Ready);

        info!(
            target: "tunnel",
            remote = %session.address(),
            remote_socket = %self.remote_path,
            local = %self.local_path.display(),
            "tunnel listening"
        );

        let mut pumps: JoinSet<Result<(u64, u64), TunnelError>> = JoinSet::new();
        let mut liveness = tokio::time::interval(LIVENESS_INTERVAL);

        let failure = loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let session = Arc::clone(&session);
                            let remote_path = self.remote_path.clone();
                            pumps.spawn(async move { pump(session, stream, remote_path).await });
                            debug!(target: "tunnel", active = pumps.len(), "connection accepted");
                        }
                        Err(e) => {
                            error!(target: "tunnel", error = %e, "accept failed");
                            break Some(e.into());
                        }
                    }
                }

                Some(joined) = pumps.join_next() => {
                    match joined {
                        Ok(Ok((up, down))) => {
                            debug!(target: "tunnel", bytes_up = up, bytes_down = down, "connection closed");
                        }
                        Ok(Err(e)) if session.is_closed() => break Some(e),
                        Ok(Err(e)) => warn!(target: "tunnel", error = %e, "proxied connection failed"),
                        Err(e) => error!(target: "tunnel", error = %e, "pump task panicked"),
                    }
                }

                _ = liveness.tick() => {
                    if session.is_closed() {
                        break Some(TunnelError::ConnectionLost(session.address().to_string()));
                    }
                }

                _ = cancel.cancelled() => {
                    info!(target: "tunnel", local = %self.local_path.display(), "cancellation requested, closing tunnel");
                    break None;
                }
            }
        };

        pumps.abort_all();
        // The socket goes before the error is published so nobody reuses a
        // dead path after observing the failure.
        if let Err(e) = remove_socket_if_same(&self.local_path, socket_ino) {
            warn!(target: "tunnel", local = %self.local_path.display(), error = %e, "failed to remove socket");
        }
        session.close().await;
        if let Some(e) = failure {
            let _ = error_tx.send(e);
        }
        self.set_state(TunnelState::Stopped);
    }
}

/// Inode of the socket file at `path`.
pub fn socket_ino(path: &Path) -> io::Result<u64> {
    Ok(std::fs::metadata(path)?.ino())
}

/// Remove `path` only if it is still the socket identified by `ino`.
///
/// A replacement tunnel may already have bound a new socket at the same path;
/// that one is left alone. Returns whether a file was removed.
pub fn remove_socket_if_same(path: &Path, ino: u64) -> io::Result<bool> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.ino() == ino => {
            std::fs::remove_file(path)?;
            Ok(true)
        }
        Ok(_) => Ok(false),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

async fn pump(
    session: Arc<SshSession>,
    mut local: UnixStream,
    remote_path: String,
) -> Result<(u64, u64), TunnelError> {
    let mut remote = session.open_unix(&remote_path).await?;
    let copied = tokio::io::copy_bidirectional(&mut local, &mut remote).await?;
    Ok(copied)
}
