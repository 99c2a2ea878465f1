use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Opens per-entity log files under one directory. Files are appended to,
/// never truncated, so a project's log survives restarts.
#[derive(Debug, Clone)]
pub struct LoggerFactory {
    logs_dir: PathBuf,
}

impl LoggerFactory {
    pub fn new(logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            logs_dir: logs_dir.into(),
        }
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn workspace_log_path(&self, workspace_id: &str) -> PathBuf {
        self.logs_dir.join(format!("{}.log", workspace_id))
    }

    pub fn project_log_path(&self, workspace_id: &str, project_name: &str) -> PathBuf {
        self.logs_dir
            .join(format!("{}-{}.log", workspace_id, project_name))
    }

    pub fn workspace_logger(&self, workspace_id: &str) -> io::Result<File> {
        self.open(&self.workspace_log_path(workspace_id))
    }

    pub fn project_logger(&self, workspace_id: &str, project_name: &str) -> io::Result<File> {
        self.open(&self.project_log_path(workspace_id, project_name))
    }

    fn open(&self, path: &Path) -> io::Result<File> {
        std::fs::create_dir_all(&self.logs_dir)?;
        OpenOptions::new().create(true).append(true).open(path)
    }
}
