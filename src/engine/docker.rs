use std::io::Write;
use std::path::Path;

use async_trait::async_trait;
use bollard::{
    auth::DockerCredentials,
    container::LogOutput,
    errors::Error as BollardError,
    exec::{StartExecOptions, StartExecResults},
    models::{
        ContainerCreateBody, ExecConfig, HostConfig, Mount, MountTypeEnum, NetworkCreateRequest,
    },
    query_parameters::{
        CreateContainerOptionsBuilder, CreateImageOptionsBuilder,
        DownloadFromContainerOptionsBuilder, InspectContainerOptions, ListImagesOptions,
        ListNetworksOptions, LogsOptionsBuilder, RemoveContainerOptionsBuilder,
        RemoveVolumeOptionsBuilder, StartContainerOptions, StopContainerOptions,
        UploadToContainerOptionsBuilder,
    },
    Docker, API_DEFAULT_VERSION,
};
use bytes::Bytes;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{ContainerDetails, ContainerSpec, Engine, ExecOutput, ExecSpec, NetworkSummary};
use crate::error::{Error, ResourceKind, Result};
use crate::logs::LogSink;
use crate::types::ContainerRegistry;

/// Request timeout for socket connections, in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 120;

/// [`Engine`] over the Docker Engine API.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
    endpoint: String,
}

impl DockerEngine {
    /// Connect to the local daemon. `sock_path` overrides the platform
    /// default endpoint (a Unix socket, or a named pipe on Windows).
    pub async fn connect_local(sock_path: Option<&str>) -> Result<Self> {
        let (docker, endpoint) = match sock_path {
            Some(path) => (
                Docker::connect_with_socket(path, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION),
                path.to_string(),
            ),
            None => (
                Docker::connect_with_local_defaults(),
                "local defaults".to_string(),
            ),
        };
        let docker = docker.map_err(|e| {
            Error::Connection(format!("connecting to engine at {}: {}", endpoint, e))
        })?;
        Self::negotiate(docker, endpoint).await
    }

    /// Connect through a forwarded Unix socket.
    pub async fn connect_socket(path: &Path) -> Result<Self> {
        let endpoint = path.display().to_string();
        let docker = Docker::connect_with_socket(&endpoint, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            .map_err(|e| {
                Error::Connection(format!("connecting to engine at {}: {}", endpoint, e))
            })?;
        Self::negotiate(docker, endpoint).await
    }

    async fn negotiate(docker: Docker, endpoint: String) -> Result<Self> {
        let docker = docker.negotiate_version().await.map_err(|e| {
            Error::Connection(format!(
                "negotiating API version with {}: {}",
                endpoint, e
            ))
        })?;
        debug!(endpoint = %endpoint, "engine connected");
        Ok(Self { docker, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Map an API error into the provider taxonomy.
fn classify(operation: &str, kind: ResourceKind, name: &str, err: BollardError) -> Error {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => Error::not_found(kind, name),
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => Error::operation(operation, format!("{} (status {})", message, status_code)),
        err @ (BollardError::IOError { .. }
        | BollardError::HyperResponseError { .. }
        | BollardError::SocketNotFoundError(_)
        | BollardError::RequestTimeoutError) => {
            Error::Connection(format!("{} {}: {}", operation, name, err))
        }
        other => Error::operation(operation, format!("{}: {}", name, other)),
    }
}

fn registry_credentials(registry: &ContainerRegistry) -> DockerCredentials {
    DockerCredentials {
        username: Some(registry.username.clone()),
        password: Some(registry.password.clone()),
        serveraddress: Some(registry.server.clone()),
        ..Default::default()
    }
}

#[async_trait]
impl Engine for DockerEngine {
    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| Error::Connection(format!("pinging {}: {}", self.endpoint, e)))?;
        Ok(())
    }

    async fn list_networks(&self) -> Result<Vec<NetworkSummary>> {
        let networks = self
            .docker
            .list_networks(None::<ListNetworksOptions>)
            .await
            .map_err(|e| classify("list networks", ResourceKind::Network, "*", e))?;

        Ok(networks
            .into_iter()
            .map(|n| NetworkSummary {
                id: n.id.unwrap_or_default(),
                name: n.name.unwrap_or_default(),
            })
            .collect())
    }

    async fn create_network(&self, name: &str, attachable: bool) -> Result<()> {
        self.docker
            .create_network(NetworkCreateRequest {
                name: name.to_string(),
                attachable: Some(attachable),
                ..Default::default()
            })
            .await
            .map_err(|e| classify("create network", ResourceKind::Network, name, e))?;
        Ok(())
    }

    async fn remove_network(&self, id: &str) -> Result<()> {
        self.docker
            .remove_network(id)
            .await
            .map_err(|e| classify("remove network", ResourceKind::Network, id, e))
    }

    async fn list_image_tags(&self) -> Result<Vec<String>> {
        let images = self
            .docker
            .list_images(None::<ListImagesOptions>)
            .await
            .map_err(|e| classify("list images", ResourceKind::Image, "*", e))?;

        Ok(images.into_iter().flat_map(|i| i.repo_tags).collect())
    }

    async fn list_image_digests(&self) -> Result<Vec<String>> {
        let images = self
            .docker
            .list_images(None::<ListImagesOptions>)
            .await
            .map_err(|e| classify("list images", ResourceKind::Image, "*", e))?;

        Ok(images.into_iter().flat_map(|i| i.repo_digests).collect())
    }

    async fn pull_image(
        &self,
        repository: &str,
        tag: &str,
        registry: Option<&ContainerRegistry>,
        progress: &mut LogSink,
    ) -> Result<()> {
        let image = format!("{}:{}", repository, tag);
        let options = CreateImageOptionsBuilder::new()
            .from_image(repository)
            .tag(tag)
            .build();
        let mut stream =
            self.docker
                .create_image(Some(options), None, registry.map(registry_credentials));

        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| classify("pull image", ResourceKind::Image, &image, e))?;
            if let Some(message) = info.error_detail.and_then(|d| d.message) {
                return Err(Error::operation("pull image", format!("{}: {}", image, message)));
            }
            match (info.status, info.progress) {
                (Some(status), Some(bar)) => writeln!(progress, "{} {}", status, bar)?,
                (Some(status), None) => writeln!(progress, "{}", status)?,
                _ => {}
            }
        }

        info!(image = %image, "image pulled");
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let mounts = spec
            .volumes
            .iter()
            .map(|v| Mount {
                typ: Some(MountTypeEnum::VOLUME),
                source: Some(v.source.clone()),
                target: Some(v.target.clone()),
                ..Default::default()
            })
            .collect();

        let body = ContainerCreateBody {
            hostname: Some(spec.hostname.clone()),
            image: Some(spec.image.clone()),
            user: Some(spec.user.clone()),
            labels: Some(spec.labels.clone()),
            env: Some(spec.env.clone()),
            cmd: Some(spec.cmd.clone()),
            host_config: Some(HostConfig {
                privileged: Some(spec.privileged),
                binds: Some(spec.binds.clone()),
                mounts: Some(mounts),
                network_mode: spec.network.clone(),
                extra_hosts: if spec.extra_hosts.is_empty() {
                    None
                } else {
                    Some(spec.extra_hosts.clone())
                },
                ..HostConfig::default()
            }),
            ..ContainerCreateBody::default()
        };

        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptionsBuilder::new().name(&spec.name).build()),
                body,
            )
            .await
            .map_err(|e| classify("create container", ResourceKind::Container, &spec.name, e))?;

        Ok(response.id)
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.docker
            .start_container(name, None::<StartContainerOptions>)
            .await
            .map_err(|e| classify("start container", ResourceKind::Container, name, e))
    }

    async fn stop_container(&self, name: &str) -> Result<()> {
        self.docker
            .stop_container(name, None::<StopContainerOptions>)
            .await
            .map_err(|e| classify("stop container", ResourceKind::Container, name, e))
    }

    async fn inspect_container(&self, name: &str) -> Result<ContainerDetails> {
        let inspect = self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(|e| classify("inspect container", ResourceKind::Container, name, e))?;

        let state = inspect.state.unwrap_or_default();
        Ok(ContainerDetails {
            id: inspect.id.unwrap_or_default(),
            name: inspect
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_else(|| name.to_string()),
            running: state.running.unwrap_or(false),
            created: inspect.created,
            started_at: state.started_at,
            finished_at: state.finished_at,
            labels: inspect.config.and_then(|c| c.labels).unwrap_or_default(),
        })
    }

    async fn remove_container(&self, name: &str, force: bool) -> Result<()> {
        self.docker
            .remove_container(
                name,
                Some(RemoveContainerOptionsBuilder::new().force(force).v(true).build()),
            )
            .await
            .map_err(|e| classify("remove container", ResourceKind::Container, name, e))
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.docker
            .remove_volume(name, Some(RemoveVolumeOptionsBuilder::new().force(true).build()))
            .await
            .map_err(|e| classify("remove volume", ResourceKind::Volume, name, e))
    }

    async fn exec(&self, container: &str, spec: &ExecSpec) -> Result<ExecOutput> {
        let config = ExecConfig {
            cmd: Some(spec.cmd.clone()),
            user: Some(spec.user.clone()),
            privileged: Some(spec.privileged),
            tty: Some(spec.tty),
            attach_stdout: Some(!spec.detach),
            attach_stderr: Some(!spec.detach),
            ..Default::default()
        };
        let created = self
            .docker
            .create_exec(container, config)
            .await
            .map_err(|e| classify("create exec", ResourceKind::Container, container, e))?;

        let start = StartExecOptions {
            detach: spec.detach,
            tty: spec.tty,
            ..Default::default()
        };
        let started = self
            .docker
            .start_exec(&created.id, Some(start))
            .await
            .map_err(|e| classify("start exec", ResourceKind::Exec, &created.id, e))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        match started {
            StartExecResults::Detached => return Ok(ExecOutput::default()),
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    let chunk = chunk
                        .map_err(|e| classify("read exec output", ResourceKind::Exec, &created.id, e))?;
                    match chunk {
                        LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                        other => stdout.extend_from_slice(&other.into_bytes()),
                    }
                }
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&created.id)
            .await
            .map_err(|e| classify("inspect exec", ResourceKind::Exec, &created.id, e))?;

        Ok(ExecOutput {
            exit_code: inspect.exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    async fn stat_path(&self, container: &str, path: &str) -> Result<bool> {
        let output = self
            .exec(container, &ExecSpec::new(["test", "-e", path], "root"))
            .await?;
        Ok(output.success())
    }

    async fn copy_from_container(&self, container: &str, path: &str) -> Result<Vec<u8>> {
        let options = DownloadFromContainerOptionsBuilder::new().path(path).build();
        let mut stream = self.docker.download_from_container(container, Some(options));

        let mut archive = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                classify(
                    "copy from container",
                    ResourceKind::Path,
                    &format!("{}:{}", container, path),
                    e,
                )
            })?;
            archive.extend_from_slice(&chunk);
        }
        Ok(archive)
    }

    async fn copy_to_container(
        &self,
        container: &str,
        dir: &str,
        archive: Vec<u8>,
    ) -> Result<()> {
        let options = UploadToContainerOptionsBuilder::new().path(dir).build();
        self.docker
            .upload_to_container(container, Some(options), bollard::body_full(Bytes::from(archive)))
            .await
            .map_err(|e| {
                classify(
                    "copy to container",
                    ResourceKind::Path,
                    &format!("{}:{}", container, dir),
                    e,
                )
            })
    }

    async fn follow_logs(
        &self,
        container: &str,
        mut sink: LogSink,
        cancel: CancellationToken,
    ) -> Result<()> {
        let options = LogsOptionsBuilder::new()
            .follow(true)
            .stdout(true)
            .stderr(true)
            .build();
        let mut stream = self.docker.logs(container, Some(options));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                item = stream.next() => match item {
                    None => return Ok(()),
                    Some(Ok(output)) => sink.write_all(&output.into_bytes())?,
                    Some(Err(e)) => {
                        return Err(classify("follow logs", ResourceKind::Container, container, e))
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_engine_errors() {
        let missing = BollardError::DockerResponseServerError {
            status_code: 404,
            message: "No such container: ws1-p1".to_string(),
        };
        assert!(classify("inspect container", ResourceKind::Container, "ws1-p1", missing).is_not_found());

        let conflict = BollardError::DockerResponseServerError {
            status_code: 409,
            message: "name already in use".to_string(),
        };
        match classify("create container", ResourceKind::Container, "ws1-p1", conflict) {
            Error::Operation { operation, message } => {
                assert_eq!(operation, "create container");
                assert!(message.contains("status 409"));
            }
            other => panic!("expected operation error, got {:?}", other),
        }

        let gone = BollardError::SocketNotFoundError("/tmp/socks/h.sock".to_string());
        assert!(matches!(
            classify("ping", ResourceKind::Container, "engine", gone),
            Error::Connection(_)
        ));
    }

    #[test]
    fn test_registry_credentials() {
        let creds = registry_credentials(&ContainerRegistry {
            server: "registry.example.com".to_string(),
            username: "ci".to_string(),
            password: "pw".to_string(),
        });
        assert_eq!(creds.serveraddress.as_deref(), Some("registry.example.com"));
        assert_eq!(creds.username.as_deref(), Some("ci"));
    }
}
