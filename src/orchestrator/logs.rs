use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Orchestrator;
use crate::logs::LogSink;

/// A background task copying container output into a sink.
pub struct LogFollower {
    container: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl LogFollower {
    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop and wait for the task to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

impl Orchestrator {
    /// Follow the container's stdout and stderr into `sink` in the
    /// background. A streaming failure is written into the sink.
    pub fn stream_logs(&self, container: &str, sink: LogSink) -> LogFollower {
        let cancel = self.cancel.child_token();
        let engine = self.engine.clone();
        let name = container.to_string();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            let mut err_sink = sink.clone();
            match engine.follow_logs(&name, sink, task_cancel).await {
                Ok(()) => debug!(target: "logs", container = %name, "log stream ended"),
                Err(e) => {
                    warn!(target: "logs", container = %name, error = %e, "log stream failed");
                    let _ = err_sink.line(e.to_string());
                }
            }
        });

        LogFollower {
            container: container.to_string(),
            cancel,
            task,
        }
    }
}
