//! Engine resource lifecycle.
//!
//! The orchestrator drives networks, images, containers and volumes through
//! an [`Engine`]. It holds no cached state: every decision is made from a
//! fresh list or inspect call, so operations are safe to retry. Callers
//! serialize operations on the same entity.
//!
//! Not-found is absorbed where the caller only wants to know (info queries,
//! destroy). Mutations that need an existing resource fail with
//! [`Error::NotFound`].

mod container;
mod image;
mod logs;
mod network;
mod provision;
mod wait;

pub use container::{ContainerOptions, LABEL_PROJECT_NAME, LABEL_REPOSITORY_URL, LABEL_WORKSPACE_ID};
pub use image::split_image_tag;
pub use logs::LogFollower;
pub use wait::{poll_until, PollPolicy};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::engine::{Engine, ExecOutput, ExecSpec};
use crate::error::{Error, Result};

pub struct Orchestrator {
    engine: Arc<dyn Engine>,
    config: Arc<ProviderConfig>,
    /// Parent of every wait and follower this orchestrator starts.
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(engine: Arc<dyn Engine>, config: Arc<ProviderConfig>) -> Self {
        Self {
            engine,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Run a command to completion. A non-zero exit is an
    /// [`Error::Operation`] carrying stderr.
    pub async fn exec_sync(&self, container: &str, spec: &ExecSpec) -> Result<ExecOutput> {
        debug!(container = %container, user = %spec.user, cmd = ?spec.cmd, "exec");
        let output = self.engine.exec(container, spec).await?;
        if output.success() {
            return Ok(output);
        }

        let detail = match output.stderr.trim() {
            "" => output.stdout.trim(),
            stderr => stderr,
        };
        Err(Error::operation(
            format!("exec `{}` in {}", spec.cmd.join(" "), container),
            match output.exit_code {
                Some(code) => format!("exit code {}: {}", code, detail),
                None => format!("no exit code: {}", detail),
            },
        ))
    }
}
