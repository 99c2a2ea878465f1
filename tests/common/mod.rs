// Common test utilities for dockspace integration tests
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dockspace::config::{PollingConfig, ProviderConfig};
use dockspace::engine::{
    ContainerDetails, ContainerSpec, Engine, EngineConnector, ExecOutput, ExecSpec, NetworkSummary,
};
use dockspace::error::{Error, ResourceKind, Result};
use dockspace::logs::LogSink;
use dockspace::options::ConnectionOptions;
use dockspace::tunnel::{ForwardedSocket, SocketForwarder};
use dockspace::types::ContainerRegistry;
use tokio_util::sync::CancellationToken;

pub const AGENT_BINARY: &str = "/usr/local/bin/dockspace";
pub const LOCAL_OPTIONS: &str = "{}";

/// Provider config with fast polling rooted at `base`.
pub fn test_config(base: &Path) -> ProviderConfig {
    ProviderConfig::new(base.join("workspaces"), "https://download.example.com/agent/get.sh")
        .expect("valid test config")
        .with_scratch_dir(base.join("socks"))
        .with_polling(PollingConfig {
            interval_ms: 1,
            max_interval_ms: 5,
            start_timeout_secs: 2,
            stop_timeout_secs: 2,
            agent_timeout_secs: 2,
            settle_secs: 0,
        })
}

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub spec: ContainerSpec,
    pub running: bool,
    pub created: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

#[derive(Default)]
struct FakeState {
    next_id: u64,
    networks: Vec<NetworkSummary>,
    images: Vec<String>,
    digests: Vec<String>,
    pulls: Vec<String>,
    containers: HashMap<String, FakeContainer>,
    volumes: HashSet<String>,
    /// (container, absolute path) -> content
    files: HashMap<(String, String), Vec<u8>>,
    execs: Vec<(String, ExecSpec)>,
    failing_exec: Option<String>,
}

/// In-memory engine with just enough behavior for provisioning flows.
///
/// Exec understands `git clone` (creates `<path>/.git`) and the home
/// directory lookup; other commands succeed without effect. Starting a
/// container installs the agent binary.
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<FakeState>,
    logs_closed: CancellationToken,
}

fn file_archive(name: &str, content: &[u8]) -> Vec<u8> {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, name, content).unwrap();
    builder.into_inner().unwrap()
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_image(self: Arc<Self>, tag: &str) -> Arc<Self> {
        self.state.lock().unwrap().images.push(tag.to_string());
        self
    }

    pub fn with_digest(self: Arc<Self>, digest: &str) -> Arc<Self> {
        self.state.lock().unwrap().digests.push(digest.to_string());
        self
    }

    /// End every log stream, as when the engine drops the connection.
    pub fn close_log_streams(&self) {
        self.logs_closed.cancel();
    }

    /// Execs whose command line contains `needle` exit 1.
    pub fn fail_exec_containing(&self, needle: &str) {
        self.state.lock().unwrap().failing_exec = Some(needle.to_string());
    }

    pub fn put_file(&self, container: &str, path: &str, content: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert((container.to_string(), path.to_string()), content.to_vec());
    }

    pub fn file(&self, container: &str, path: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(&(container.to_string(), path.to_string()))
            .cloned()
    }

    pub fn network_count(&self, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .networks
            .iter()
            .filter(|n| n.name == name)
            .count()
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        self.state.lock().unwrap().containers.get(name).cloned()
    }

    pub fn has_volume(&self, name: &str) -> bool {
        self.state.lock().unwrap().volumes.contains(name)
    }

    pub fn pulls(&self) -> Vec<String> {
        self.state.lock().unwrap().pulls.clone()
    }

    /// Command lines of every exec, in order.
    pub fn exec_commands(&self) -> Vec<Vec<String>> {
        self.state
            .lock()
            .unwrap()
            .execs
            .iter()
            .map(|(_, spec)| spec.cmd.clone())
            .collect()
    }

    pub fn execs(&self) -> Vec<(String, ExecSpec)> {
        self.state.lock().unwrap().execs.clone()
    }

    fn next_id(state: &mut FakeState) -> String {
        state.next_id += 1;
        format!("{:064x}", state.next_id)
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn list_networks(&self) -> Result<Vec<NetworkSummary>> {
        Ok(self.state.lock().unwrap().networks.clone())
    }

    async fn create_network(&self, name: &str, _attachable: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let id = Self::next_id(&mut state);
        // Like the real engine, duplicate names are accepted.
        state.networks.push(NetworkSummary {
            id,
            name: name.to_string(),
        });
        Ok(())
    }

    async fn remove_network(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let before = state.networks.len();
        state.networks.retain(|n| n.id != id);
        if state.networks.len() == before {
            return Err(Error::not_found(ResourceKind::Network, id));
        }
        Ok(())
    }

    async fn list_image_tags(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().images.clone())
    }

    async fn list_image_digests(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().digests.clone())
    }

    async fn pull_image(
        &self,
        repository: &str,
        tag: &str,
        _registry: Option<&ContainerRegistry>,
        progress: &mut LogSink,
    ) -> Result<()> {
        let image = format!("{}:{}", repository, tag);
        writeln!(progress, "Status: Downloaded newer image for {}", image)?;
        let mut state = self.state.lock().unwrap();
        state.pulls.push(image.clone());
        if tag.starts_with("sha256:") {
            state.digests.push(format!("{}@{}", repository, tag));
        } else {
            state.images.push(image);
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.containers.contains_key(&spec.name) {
            return Err(Error::operation(
                "create container",
                format!("name {} already in use (status 409)", spec.name),
            ));
        }
        let id = Self::next_id(&mut state);
        for volume in &spec.volumes {
            state.volumes.insert(volume.source.clone());
        }
        state.containers.insert(
            spec.name.clone(),
            FakeContainer {
                id: id.clone(),
                spec: spec.clone(),
                running: false,
                created: Utc::now().to_rfc3339(),
                started_at: None,
                finished_at: None,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| Error::not_found(ResourceKind::Container, name))?;
        container.running = true;
        container.started_at = Some(Utc::now().to_rfc3339());
        state
            .files
            .insert((name.to_string(), AGENT_BINARY.to_string()), b"#!agent".to_vec());
        Ok(())
    }

    async fn stop_container(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| Error::not_found(ResourceKind::Container, name))?;
        container.running = false;
        container.finished_at = Some(Utc::now().to_rfc3339());
        Ok(())
    }

    async fn inspect_container(&self, name: &str) -> Result<ContainerDetails> {
        let state = self.state.lock().unwrap();
        let container = state
            .containers
            .get(name)
            .ok_or_else(|| Error::not_found(ResourceKind::Container, name))?;
        Ok(ContainerDetails {
            id: container.id.clone(),
            name: name.to_string(),
            running: container.running,
            created: Some(container.created.clone()),
            started_at: container.started_at.clone(),
            finished_at: container.finished_at.clone(),
            labels: container.spec.labels.clone(),
        })
    }

    async fn remove_container(&self, name: &str, force: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.containers.get(name) {
            None => return Err(Error::not_found(ResourceKind::Container, name)),
            Some(c) if c.running && !force => {
                return Err(Error::operation("remove container", "container is running"))
            }
            Some(_) => {}
        }
        state.containers.remove(name);
        state.files.retain(|(container, _), _| container != name);
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        if self.state.lock().unwrap().volumes.remove(name) {
            Ok(())
        } else {
            Err(Error::not_found(ResourceKind::Volume, name))
        }
    }

    async fn exec(&self, container: &str, spec: &ExecSpec) -> Result<ExecOutput> {
        let mut state = self.state.lock().unwrap();
        if !state.containers.get(container).map(|c| c.running).unwrap_or(false) {
            return Err(Error::operation(
                "create exec",
                format!("container {} is not running (status 409)", container),
            ));
        }
        state.execs.push((container.to_string(), spec.clone()));

        let line = spec.cmd.join(" ");
        if let Some(needle) = &state.failing_exec {
            if line.contains(needle.as_str()) {
                return Ok(ExecOutput {
                    exit_code: Some(1),
                    stdout: String::new(),
                    stderr: format!("fatal: {} failed", needle),
                });
            }
        }
        if spec.detach {
            return Ok(ExecOutput::default());
        }

        let cmd: Vec<&str> = spec.cmd.iter().map(String::as_str).collect();
        let stdout = match cmd.as_slice() {
            ["git", "clone", .., path] => {
                state
                    .files
                    .insert((container.to_string(), format!("{}/.git", path)), Vec::new());
                String::new()
            }
            ["/bin/sh", "-c", "cd && pwd"] => format!("/home/{}\n", spec.user),
            _ => String::new(),
        };

        Ok(ExecOutput {
            exit_code: Some(0),
            stdout,
            stderr: String::new(),
        })
    }

    async fn stat_path(&self, container: &str, path: &str) -> Result<bool> {
        let state = self.state.lock().unwrap();
        if !state.containers.contains_key(container) {
            return Err(Error::not_found(ResourceKind::Container, container));
        }
        Ok(state
            .files
            .contains_key(&(container.to_string(), path.to_string())))
    }

    async fn copy_from_container(&self, container: &str, path: &str) -> Result<Vec<u8>> {
        let content = self
            .file(container, path)
            .ok_or_else(|| Error::not_found(ResourceKind::Path, format!("{}:{}", container, path)))?;
        let name = path.rsplit('/').next().unwrap_or(path);
        Ok(file_archive(name, &content))
    }

    async fn copy_to_container(&self, container: &str, dir: &str, archive: Vec<u8>) -> Result<()> {
        let mut archive = tar::Archive::new(Cursor::new(archive));
        for entry in archive.entries()? {
            let mut entry = entry?;
            let name = entry.path()?.to_string_lossy().into_owned();
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            let path = format!("{}/{}", dir.trim_end_matches('/'), name);
            self.put_file(container, &path, &content);
        }
        Ok(())
    }

    async fn follow_logs(
        &self,
        container: &str,
        mut sink: LogSink,
        cancel: CancellationToken,
    ) -> Result<()> {
        if self.container(container).is_none() {
            return Err(Error::not_found(ResourceKind::Container, container));
        }
        sink.write_all(format!("{} agent started\n", container).as_bytes())?;
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = self.logs_closed.cancelled() => {}
        }
        Ok(())
    }
}

/// Hands out one shared [`FakeEngine`] and records what it was asked for.
pub struct FakeConnector {
    pub engine: Arc<FakeEngine>,
    connects: Mutex<Vec<bool>>,
}

impl FakeConnector {
    pub fn new(engine: Arc<FakeEngine>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            connects: Mutex::new(Vec::new()),
        })
    }

    /// `is_local` of every connect call.
    pub fn connects(&self) -> Vec<bool> {
        self.connects.lock().unwrap().clone()
    }
}

#[async_trait]
impl EngineConnector for FakeConnector {
    async fn connect(&self, options: &ConnectionOptions) -> Result<Arc<dyn Engine>> {
        self.connects.lock().unwrap().push(options.is_local());
        Ok(self.engine.clone())
    }
}

/// Forwarder that creates the local socket file instead of dialing SSH.
#[derive(Default)]
pub struct SpyForwarder {
    calls: AtomicUsize,
    delay: Duration,
}

impl SpyForwarder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take `delay` before the socket appears, widening race windows.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SocketForwarder for SpyForwarder {
    async fn forward(
        &self,
        options: &ConnectionOptions,
        local_path: &Path,
        _remote_path: &str,
    ) -> Result<ForwardedSocket> {
        if options.remote.is_none() {
            return Err(Error::Configuration("no remote host".to_string()));
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        if let Some(parent) = local_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(local_path, b"")?;

        let cancel = CancellationToken::new();
        let path = local_path.to_path_buf();
        let watch = cancel.clone();
        tokio::spawn(async move {
            watch.cancelled().await;
            let _ = std::fs::remove_file(&path);
        });

        Ok(ForwardedSocket {
            path: local_path.to_path_buf(),
            cancel,
        })
    }
}

pub fn remote_options(hostname: &str) -> ConnectionOptions {
    let blob = serde_json::json!({
        "Remote Hostname": hostname,
        "Remote User": "dev",
        "Remote Password": "secret",
    })
    .to_string();
    ConnectionOptions::resolve(&blob).unwrap().0
}

/// Cloneable in-memory writer for asserting on sink output.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub fn workspace(id: &str) -> dockspace::types::Workspace {
    dockspace::types::Workspace {
        id: id.to_string(),
        name: format!("{} workspace", id),
    }
}

pub fn project(workspace_id: &str, name: &str) -> dockspace::types::Project {
    dockspace::types::Project {
        name: name.to_string(),
        workspace_id: workspace_id.to_string(),
        image: "dockspace/workspace:1.2".to_string(),
        user: None,
        repository: dockspace::types::Repository {
            url: "https://github.com/example/app.git".to_string(),
            ..Default::default()
        },
        env_vars: Default::default(),
        api_key: "key-123".to_string(),
    }
}
