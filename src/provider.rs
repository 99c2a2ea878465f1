//! Provider facade: per-entity operations for workspaces and projects.
//!
//! Each request carries the target's options blob. The provider resolves it,
//! obtains an engine (local, or through a forwarded socket), and drives the
//! [`Orchestrator`]. It also owns the host-side bookkeeping the engine knows
//! nothing about: project directories (local filesystem or remote host over
//! SSH), per-entity log files, and the log followers of running projects.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use ssh_tunnel::SshSession;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ProviderConfig;
use crate::engine::{DockerEngine, Engine, EngineConnector, EngineFactory};
use crate::error::{Error, Result};
use crate::logs::{LogSink, LoggerFactory};
use crate::options::{ConnectionOptions, RemoteHost};
use crate::orchestrator::{ContainerOptions, LogFollower, Orchestrator};
use crate::paths;
use crate::types::{
    ContainerRegistry, Project, ProjectInfo, RequirementStatus, Workspace, WorkspaceInfo,
    WorkspaceMetadata,
};

/// Hostname local containers use to reach the host.
pub const HOST_GATEWAY_NAME: &str = "host.docker.internal";

#[derive(Clone, Default)]
pub struct WorkspaceRequest {
    pub workspace: Workspace,
    /// JSON options blob of the workspace's target.
    pub target_options: String,
    pub log_sink: Option<LogSink>,
}

#[derive(Clone)]
pub struct ProjectRequest {
    pub project: Project,
    pub target_options: String,
    pub registry: Option<ContainerRegistry>,
    pub log_sink: Option<LogSink>,
}

pub struct Provider {
    config: Arc<ProviderConfig>,
    connector: Arc<dyn EngineConnector>,
    loggers: Option<LoggerFactory>,
    /// Log followers of running projects, by container name.
    followers: Mutex<HashMap<String, LogFollower>>,
    cancel: CancellationToken,
}

impl Provider {
    /// Provider that reaches remote engines over SSH.
    pub fn new(config: ProviderConfig) -> Self {
        let factory = EngineFactory::with_ssh(config.scratch_dir.clone());
        Self::with_connector(config, Arc::new(factory))
    }

    pub fn with_connector(config: ProviderConfig, connector: Arc<dyn EngineConnector>) -> Self {
        let loggers = config.logs_dir.clone().map(LoggerFactory::new);
        Self {
            config: Arc::new(config),
            connector,
            loggers,
            followers: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Clear stale forwarded sockets and prepare the base directory.
    pub async fn initialize(&self) -> Result<()> {
        let scratch = &self.config.scratch_dir;
        match tokio::fs::remove_dir_all(scratch).await {
            Ok(()) => debug!(dir = %scratch.display(), "cleared socket directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(scratch).await?;
        tokio::fs::create_dir_all(&self.config.base_path).await?;

        info!(
            base_path = %self.config.base_path.display(),
            scratch_dir = %scratch.display(),
            "provider initialized"
        );
        Ok(())
    }

    /// Stop log followers and close tunnels.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let followers: Vec<_> = self.followers.lock().await.drain().map(|(_, f)| f).collect();
        for follower in followers {
            follower.shutdown().await;
        }
        self.connector.shutdown().await;
    }

    /// Whether a local engine is reachable.
    pub async fn check_requirements(&self) -> Vec<RequirementStatus> {
        let mut results = Vec::new();

        let engine = match DockerEngine::connect_local(None).await {
            Ok(engine) => {
                results.push(RequirementStatus {
                    name: "Docker installed".to_string(),
                    met: true,
                    reason: format!("Docker engine found at {}", engine.endpoint()),
                });
                engine
            }
            Err(e) => {
                results.push(RequirementStatus {
                    name: "Docker installed".to_string(),
                    met: false,
                    reason: format!("Docker is not installed or not reachable: {}", e),
                });
                return results;
            }
        };

        results.push(match engine.ping().await {
            Ok(()) => RequirementStatus {
                name: "Docker running".to_string(),
                met: true,
                reason: "Docker is running".to_string(),
            },
            Err(e) => RequirementStatus {
                name: "Docker running".to_string(),
                met: false,
                reason: format!("Docker is not running: {}", e),
            },
        });
        results
    }

    // Workspaces

    pub async fn create_workspace(&self, req: &WorkspaceRequest) -> Result<()> {
        validate_workspace(&req.workspace)?;
        let options = resolve(&req.target_options)?;
        let mut sink = self.workspace_sink(&req.workspace, req.log_sink.as_ref());
        let orchestrator = self.orchestrator(&options).await?;

        sink.line(format!("Creating network {}", req.workspace.id))?;
        orchestrator.create_network(&req.workspace.id).await?;

        let dir = self.workspace_dir(&options, &req.workspace.id);
        self.create_dir(&options, &dir).await?;

        info!(workspace = %req.workspace.id, dir = %dir, "workspace created");
        Ok(())
    }

    /// Workspaces have no engine state of their own to start.
    pub async fn start_workspace(&self, req: &WorkspaceRequest) -> Result<()> {
        validate_workspace(&req.workspace)?;
        resolve(&req.target_options)?;
        debug!(workspace = %req.workspace.id, "start workspace");
        Ok(())
    }

    pub async fn stop_workspace(&self, req: &WorkspaceRequest) -> Result<()> {
        validate_workspace(&req.workspace)?;
        resolve(&req.target_options)?;
        debug!(workspace = %req.workspace.id, "stop workspace");
        Ok(())
    }

    pub async fn destroy_workspace(&self, req: &WorkspaceRequest) -> Result<()> {
        validate_workspace(&req.workspace)?;
        let options = resolve(&req.target_options)?;
        let orchestrator = self.orchestrator(&options).await?;

        orchestrator.remove_network(&req.workspace.id).await?;

        let dir = self.workspace_dir(&options, &req.workspace.id);
        self.remove_dir(&options, &dir).await?;

        info!(workspace = %req.workspace.id, "workspace destroyed");
        Ok(())
    }

    pub async fn get_workspace_info(&self, req: &WorkspaceRequest) -> Result<WorkspaceInfo> {
        validate_workspace(&req.workspace)?;
        let options = resolve(&req.target_options)?;
        let orchestrator = self.orchestrator(&options).await?;

        let network_id = orchestrator.network_id(&req.workspace.id).await?;
        let metadata = WorkspaceMetadata {
            network_id: network_id.clone().unwrap_or_default(),
        };
        Ok(WorkspaceInfo {
            name: req.workspace.name.clone(),
            network_exists: network_id.is_some(),
            provider_metadata: serde_json::to_string(&metadata)
                .map_err(|e| Error::operation("encode workspace metadata", e))?,
        })
    }

    // Projects

    pub async fn create_project(&self, req: &ProjectRequest) -> Result<()> {
        validate_project(&req.project)?;
        let project = &req.project;
        let options = resolve(&req.target_options)?;
        let mut sink = self.project_sink(project, req.log_sink.as_ref());
        let orchestrator = self.orchestrator(&options).await?;

        let project_dir = self.project_dir(&options, project);
        self.create_dir(&options, &project_dir).await?;

        orchestrator
            .ensure_image(&project.image, req.registry.as_ref(), &mut sink)
            .await?;

        let (download_url, extra_hosts) = self.agent_download(&options)?;
        let container_options = ContainerOptions {
            project_dir,
            download_url,
            extra_hosts,
        };
        let spec = orchestrator.project_container_spec(project, &container_options);
        let container = spec.name.clone();
        let user = spec.user.clone();

        sink.line(format!("Creating container {}", container))?;
        orchestrator.create_container(&spec).await?;
        orchestrator.start_container(&container).await?;

        if self.config.agent.wait_for_binary {
            sink.line("Waiting for the agent to be installed")?;
            orchestrator
                .wait_for_path(&container, &self.config.agent.binary_path)
                .await?;
        }

        let clone_path = paths::container_project_dir(&project.name);
        orchestrator
            .clone_repository(&container, &user, &project.repository, &clone_path, &mut sink)
            .await?;
        orchestrator
            .configure_git_credentials(&container, &user, project.repository.git_user.as_ref())
            .await?;

        sink.line(format!("Project {} created", project.name))?;
        info!(container = %container, "project created");
        Ok(())
    }

    pub async fn start_project(&self, req: &ProjectRequest) -> Result<()> {
        validate_project(&req.project)?;
        let project = &req.project;
        let options = resolve(&req.target_options)?;
        let sink = self.project_sink(project, req.log_sink.as_ref());
        let orchestrator = self.orchestrator(&options).await?;

        let container = project.container_name();
        orchestrator.start_container(&container).await?;

        let follower = orchestrator.stream_logs(&container, sink);
        let mut followers = self.followers.lock().await;
        followers.retain(|name, f| {
            let done = f.is_finished();
            if done {
                debug!(container = %name, "dropping finished log follower");
            }
            !done
        });
        if let Some(previous) = followers.insert(container.clone(), follower) {
            previous.stop();
        }
        drop(followers);

        info!(container = %container, "project started");
        Ok(())
    }

    pub async fn stop_project(&self, req: &ProjectRequest) -> Result<()> {
        validate_project(&req.project)?;
        let project = &req.project;
        let options = resolve(&req.target_options)?;
        let orchestrator = self.orchestrator(&options).await?;

        let container = project.container_name();
        self.stop_follower(&container).await;
        orchestrator.stop_container(&container).await?;

        info!(container = %container, "project stopped");
        Ok(())
    }

    pub async fn destroy_project(&self, req: &ProjectRequest) -> Result<()> {
        validate_project(&req.project)?;
        let project = &req.project;
        let options = resolve(&req.target_options)?;
        let orchestrator = self.orchestrator(&options).await?;

        let container = project.container_name();
        self.stop_follower(&container).await;
        orchestrator
            .destroy_container(&container, &project.volume_name())
            .await?;

        let dir = self.project_dir(&options, project);
        self.remove_dir(&options, &dir).await?;

        info!(container = %container, "project destroyed");
        Ok(())
    }

    pub async fn get_project_info(&self, req: &ProjectRequest) -> Result<ProjectInfo> {
        validate_project(&req.project)?;
        let options = resolve(&req.target_options)?;
        let orchestrator = self.orchestrator(&options).await?;
        orchestrator
            .get_info(&req.project.container_name(), &req.project.name)
            .await
    }

    /// Whether a log follower is attached to the project's container.
    pub async fn is_following(&self, project: &Project) -> bool {
        self.followers
            .lock()
            .await
            .contains_key(&project.container_name())
    }

    async fn stop_follower(&self, container: &str) {
        let follower = self.followers.lock().await.remove(container);
        if let Some(follower) = follower {
            follower.shutdown().await;
            debug!(container = %container, "log follower stopped");
        }
    }

    async fn orchestrator(&self, options: &ConnectionOptions) -> Result<Orchestrator> {
        let engine: Arc<dyn Engine> = self.connector.connect(options).await?;
        Ok(Orchestrator::new(engine, Arc::clone(&self.config)).with_cancel(self.cancel.child_token()))
    }

    /// Download URL for the agent install script and the extra hosts needed
    /// to reach it.
    ///
    /// Local containers fetch the agent from the host's API server through
    /// the host gateway when an API port is configured.
    fn agent_download(&self, options: &ConnectionOptions) -> Result<(String, Vec<String>)> {
        let download_url = &self.config.agent.download_url;
        let api_port = match (options.is_local(), self.config.agent.api_port) {
            (true, Some(port)) => port,
            _ => return Ok((download_url.clone(), Vec::new())),
        };
        Ok((
            rewrite_for_host_gateway(download_url, api_port)?,
            vec![format!("{}:host-gateway", HOST_GATEWAY_NAME)],
        ))
    }

    fn workspace_sink(&self, workspace: &Workspace, external: Option<&LogSink>) -> LogSink {
        let sink = LogSink::with_tracing(workspace.id.clone());
        if let Some(loggers) = &self.loggers {
            match loggers.workspace_logger(&workspace.id) {
                Ok(file) => sink.attach(file),
                Err(e) => warn!(workspace = %workspace.id, error = %e, "cannot open workspace log"),
            }
        }
        if let Some(external) = external {
            sink.attach(external.clone());
        }
        sink
    }

    fn project_sink(&self, project: &Project, external: Option<&LogSink>) -> LogSink {
        let sink = LogSink::with_tracing(project.container_name());
        if let Some(loggers) = &self.loggers {
            match loggers.project_logger(&project.workspace_id, &project.name) {
                Ok(file) => sink.attach(file),
                Err(e) => {
                    warn!(container = %project.container_name(), error = %e, "cannot open project log")
                }
            }
        }
        if let Some(external) = external {
            sink.attach(external.clone());
        }
        sink
    }

    fn workspace_dir(&self, options: &ConnectionOptions, workspace_id: &str) -> String {
        match &options.remote {
            Some(remote) => paths::remote_workspace_dir(&remote.data_dir, workspace_id),
            None => path_string(paths::local_workspace_dir(&self.config.base_path, workspace_id)),
        }
    }

    fn project_dir(&self, options: &ConnectionOptions, project: &Project) -> String {
        match &options.remote {
            Some(remote) => {
                paths::remote_project_dir(&remote.data_dir, &project.workspace_id, &project.name)
            }
            None => path_string(paths::local_project_dir(
                &self.config.base_path,
                &project.workspace_id,
                &project.name,
            )),
        }
    }

    async fn create_dir(&self, options: &ConnectionOptions, dir: &str) -> Result<()> {
        match &options.remote {
            None => Ok(tokio::fs::create_dir_all(dir).await?),
            Some(remote) => remote_exec(remote, &format!("mkdir -p {}", shell_words::quote(dir))).await,
        }
    }

    async fn remove_dir(&self, options: &ConnectionOptions, dir: &str) -> Result<()> {
        match &options.remote {
            None => match tokio::fs::remove_dir_all(dir).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
            Some(remote) => remote_exec(remote, &format!("rm -rf {}", shell_words::quote(dir))).await,
        }
    }
}

fn validate_workspace(workspace: &Workspace) -> Result<()> {
    paths::validate_name("workspace id", &workspace.id)
}

fn validate_project(project: &Project) -> Result<()> {
    paths::validate_name("workspace id", &project.workspace_id)?;
    paths::validate_name("project name", &project.name)
}

fn resolve(blob: &str) -> Result<ConnectionOptions> {
    ConnectionOptions::resolve(blob).map(|(options, _)| options)
}

fn path_string(path: PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

/// Point `url` at the host gateway on `api_port` over plain http.
pub fn rewrite_for_host_gateway(url: &str, api_port: u16) -> Result<String> {
    let invalid = |detail: String| Error::Configuration(format!("agent download_url {}: {}", url, detail));

    let mut parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    parsed
        .set_scheme("http")
        .map_err(|_| invalid("cannot switch scheme to http".to_string()))?;
    parsed
        .set_host(Some(HOST_GATEWAY_NAME))
        .map_err(|e| invalid(e.to_string()))?;
    parsed
        .set_port(Some(api_port))
        .map_err(|_| invalid("cannot set port".to_string()))?;
    Ok(parsed.to_string())
}

/// Run a shell command on the target host.
async fn remote_exec(remote: &RemoteHost, command: &str) -> Result<()> {
    let session = SshSession::connect(&remote.ssh_config()).await?;
    let output = session.exec(command).await;
    session.close().await;

    let output = output?;
    if !output.success() {
        return Err(Error::operation(
            format!("`{}` on {}", command, remote.hostname),
            output.stderr.trim(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_for_host_gateway() {
        let url = rewrite_for_host_gateway("https://download.example.com/agent/get.sh?v=2", 3986)
            .unwrap();
        assert_eq!(url, "http://host.docker.internal:3986/agent/get.sh?v=2");
    }

    #[test]
    fn test_rewrite_rejects_garbage() {
        assert!(matches!(
            rewrite_for_host_gateway("::::", 3986).unwrap_err(),
            Error::Configuration(_)
        ));
    }
}
