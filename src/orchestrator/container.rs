use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Datelike, Utc};
use tracing::{debug, info};

use super::wait::{poll_until, settle, PollPolicy};
use super::Orchestrator;
use crate::engine::{ContainerSpec, ExecSpec, VolumeMount};
use crate::error::{Error, Result};
use crate::paths;
use crate::types::{Project, ProjectInfo};

pub const LABEL_WORKSPACE_ID: &str = "dockspace.workspace.id";
pub const LABEL_PROJECT_NAME: &str = "dockspace.workspace.project.name";
pub const LABEL_REPOSITORY_URL: &str = "dockspace.workspace.project.repository.url";

/// Host-side inputs to a project container.
#[derive(Debug, Clone, Default)]
pub struct ContainerOptions {
    /// Project directory on the engine host, bind-mounted into the container.
    pub project_dir: String,
    /// Where the container fetches the agent install script.
    pub download_url: String,
    pub extra_hosts: Vec<String>,
}

/// Engine timestamp, with the zero time mapped to `None`.
fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(value?).ok()?;
    if parsed.year() <= 1 {
        return None;
    }
    Some(parsed.with_timezone(&Utc))
}

impl Orchestrator {
    /// Container definition for a project.
    pub fn project_container_spec(&self, project: &Project, options: &ContainerOptions) -> ContainerSpec {
        let agent = &self.config.agent;
        let container_dir = paths::container_project_dir(&project.name);

        let labels = HashMap::from([
            (LABEL_WORKSPACE_ID.to_string(), project.workspace_id.clone()),
            (LABEL_PROJECT_NAME.to_string(), project.name.clone()),
            (
                LABEL_REPOSITORY_URL.to_string(),
                project.repository.url.clone(),
            ),
        ]);

        let mut env = vec![
            format!("DOCKSPACE_WS_ID={}", project.workspace_id),
            format!("DOCKSPACE_WS_DIR={}", container_dir),
            format!("DOCKSPACE_WS_PROJECT_NAME={}", project.name),
            format!(
                "DOCKSPACE_WS_PROJECT_REPOSITORY_URL={}",
                project.repository.url
            ),
            format!("DOCKSPACE_SERVER_API_KEY={}", project.api_key),
            format!("DOCKSPACE_SERVER_VERSION={}", agent.version),
            format!("DOCKSPACE_SERVER_URL={}", agent.server_url),
            format!("DOCKSPACE_SERVER_API_URL={}", agent.api_url),
        ];
        env.extend(project.env_vars.iter().map(|(k, v)| format!("{}={}", k, v)));

        let volumes = if self.config.nested_engine {
            vec![VolumeMount {
                source: project.volume_name(),
                target: paths::NESTED_ENGINE_DATA_DIR.to_string(),
            }]
        } else {
            Vec::new()
        };

        ContainerSpec {
            name: project.container_name(),
            hostname: project.name.clone(),
            image: project.image.clone(),
            user: project
                .user
                .clone()
                .unwrap_or_else(|| self.config.container_user.clone()),
            labels,
            env,
            cmd: vec![
                "bash".to_string(),
                "-c".to_string(),
                format!(
                    "curl -sfL {} | bash && {} agent",
                    options.download_url, agent.binary_path
                ),
            ],
            privileged: true,
            binds: vec![format!("{}:{}", options.project_dir, container_dir)],
            volumes,
            network: Some(project.workspace_id.clone()),
            extra_hosts: options.extra_hosts.clone(),
        }
    }

    pub async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let id = self.engine.create_container(spec).await?;
        info!(container = %spec.name, id = %id, image = %spec.image, "container created");
        Ok(id)
    }

    /// Start and wait until the engine reports the container running, then
    /// launch the nested engine daemon when configured.
    pub async fn start_container(&self, name: &str) -> Result<()> {
        let details = self.engine.inspect_container(name).await?;
        if details.running {
            debug!(container = %name, "already running");
        } else {
            self.engine.start_container(name).await?;
        }

        let policy = PollPolicy::new(&self.config.polling, self.config.polling.start_timeout());
        poll_until("wait for container start", policy, &self.cancel, || {
            let engine = self.engine.clone();
            async move { Ok(engine.inspect_container(name).await?.running) }
        })
        .await?;
        info!(container = %name, "container running");

        if self.config.nested_engine {
            let dockerd = ExecSpec::new(["dockerd"], "root")
                .privileged()
                .tty()
                .detached();
            self.engine.exec(name, &dockerd).await?;
            debug!(container = %name, "nested engine launched");
            settle(self.config.polling.settle(), &self.cancel).await?;
        }
        Ok(())
    }

    /// Stop and wait until the engine reports the container stopped.
    pub async fn stop_container(&self, name: &str) -> Result<()> {
        let details = self.engine.inspect_container(name).await?;
        if !details.running {
            debug!(container = %name, "already stopped");
            return Ok(());
        }

        self.engine.stop_container(name).await?;

        let policy = PollPolicy::new(&self.config.polling, self.config.polling.stop_timeout());
        poll_until("wait for container stop", policy, &self.cancel, || {
            let engine = self.engine.clone();
            async move { Ok(!engine.inspect_container(name).await?.running) }
        })
        .await?;
        info!(container = %name, "container stopped");
        Ok(())
    }

    /// Force-remove the container and its volume. Either may be gone already.
    pub async fn destroy_container(&self, name: &str, volume: &str) -> Result<()> {
        match self.engine.remove_container(name, true).await {
            Ok(()) => info!(container = %name, "container removed"),
            Err(e) if e.is_not_found() => debug!(container = %name, "container already removed"),
            Err(e) => return Err(e),
        }

        match self.engine.remove_volume(volume).await {
            Ok(()) => info!(volume = %volume, "volume removed"),
            Err(e) if e.is_not_found() => debug!(volume = %volume, "volume already removed"),
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Runtime state of a container. A missing container is reported as
    /// not running.
    pub async fn get_info(&self, container: &str, display_name: &str) -> Result<ProjectInfo> {
        let details = match self.engine.inspect_container(container).await {
            Ok(details) => details,
            Err(e) if e.is_not_found() => {
                return Ok(ProjectInfo {
                    name: display_name.to_string(),
                    is_running: false,
                    created: None,
                    started: None,
                    finished: None,
                    provider_metadata: serde_json::json!({ "status": "not found" }).to_string(),
                })
            }
            Err(e) => return Err(e),
        };

        let labels: BTreeMap<_, _> = details.labels.into_iter().collect();
        let provider_metadata = serde_json::to_string(&labels)
            .map_err(|e| Error::operation("encode container labels", e))?;

        Ok(ProjectInfo {
            name: display_name.to_string(),
            is_running: details.running,
            created: parse_timestamp(details.created.as_deref()),
            started: parse_timestamp(details.started_at.as_deref()),
            finished: parse_timestamp(details.finished_at.as_deref()),
            provider_metadata,
        })
    }
}
