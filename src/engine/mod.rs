//! Container engine capabilities.
//!
//! The orchestrator talks to the engine only through the [`Engine`] trait.
//! [`DockerEngine`] implements it over the Docker Engine API; tests use an
//! in-memory implementation.

mod docker;
mod factory;

pub use docker::DockerEngine;
pub use factory::EngineFactory;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::logs::LogSink;
use crate::options::ConnectionOptions;
use crate::types::ContainerRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSummary {
    pub id: String,
    pub name: String,
}

/// A named volume mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub source: String,
    pub target: String,
}

/// Everything needed to create a container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub hostname: String,
    pub image: String,
    pub user: String,
    pub labels: HashMap<String, String>,
    /// `KEY=value` pairs.
    pub env: Vec<String>,
    pub cmd: Vec<String>,
    pub privileged: bool,
    /// `host_path:container_path` bind mounts.
    pub binds: Vec<String>,
    pub volumes: Vec<VolumeMount>,
    pub network: Option<String>,
    /// `host:ip` entries added to the container's hosts file.
    pub extra_hosts: Vec<String>,
}

/// Inspection result. Timestamps are the engine's RFC 3339 strings.
#[derive(Debug, Clone, Default)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    pub running: bool,
    pub created: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecSpec {
    pub cmd: Vec<String>,
    pub user: String,
    pub privileged: bool,
    pub tty: bool,
    /// Start and return without waiting for the command to finish.
    pub detach: bool,
}

impl ExecSpec {
    pub fn new<I, S>(cmd: I, user: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            user: user.into(),
            ..Default::default()
        }
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    pub fn tty(mut self) -> Self {
        self.tty = true;
        self
    }

    pub fn detached(mut self) -> Self {
        self.detach = true;
        self
    }
}

/// Captured output of a finished exec. Detached execs report no exit code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: Option<i64>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Operations the provider needs from a container engine.
///
/// Errors follow one classification: a missing resource is
/// [`Error::NotFound`](crate::Error::NotFound), an unreachable engine is
/// [`Error::Connection`](crate::Error::Connection), and every other
/// rejection is [`Error::Operation`](crate::Error::Operation).
#[async_trait]
pub trait Engine: Send + Sync {
    /// Round-trip to the daemon.
    async fn ping(&self) -> Result<()>;

    async fn list_networks(&self) -> Result<Vec<NetworkSummary>>;

    async fn create_network(&self, name: &str, attachable: bool) -> Result<()>;

    async fn remove_network(&self, id: &str) -> Result<()>;

    /// Every `repo:tag` known to the engine.
    async fn list_image_tags(&self) -> Result<Vec<String>>;

    /// Every `repo@digest` known to the engine.
    async fn list_image_digests(&self) -> Result<Vec<String>>;

    /// Pull `repository:tag`, writing progress lines into `progress`.
    async fn pull_image(
        &self,
        repository: &str,
        tag: &str,
        registry: Option<&ContainerRegistry>,
        progress: &mut LogSink,
    ) -> Result<()>;

    /// Returns the new container's id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, name: &str) -> Result<()>;

    async fn stop_container(&self, name: &str) -> Result<()>;

    async fn inspect_container(&self, name: &str) -> Result<ContainerDetails>;

    /// Remove a container together with its anonymous volumes.
    async fn remove_container(&self, name: &str, force: bool) -> Result<()>;

    async fn remove_volume(&self, name: &str) -> Result<()>;

    async fn exec(&self, container: &str, spec: &ExecSpec) -> Result<ExecOutput>;

    /// Whether `path` exists inside the container.
    async fn stat_path(&self, container: &str, path: &str) -> Result<bool>;

    /// Tar archive of `path` from the container's filesystem.
    async fn copy_from_container(&self, container: &str, path: &str) -> Result<Vec<u8>>;

    /// Extract a tar archive into directory `dir` inside the container.
    async fn copy_to_container(&self, container: &str, dir: &str, archive: Vec<u8>)
        -> Result<()>;

    /// Follow stdout and stderr into `sink` until the stream ends or
    /// `cancel` fires.
    async fn follow_logs(
        &self,
        container: &str,
        sink: LogSink,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// Source of connected engines for a target.
#[async_trait]
pub trait EngineConnector: Send + Sync {
    async fn connect(&self, options: &ConnectionOptions) -> Result<Arc<dyn Engine>>;

    /// Release long-lived resources such as tunnels.
    async fn shutdown(&self) {}
}
