use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Prefix of forwarded engine sockets in the scratch directory
pub const SOCKET_PREFIX: &str = "dockspace";

/// Mount root for project directories inside containers
pub const CONTAINER_WORKSPACES_DIR: &str = "/workspaces";

/// Nested engine storage inside project containers
pub const NESTED_ENGINE_DATA_DIR: &str = "/var/lib/docker";

/// Check an entity name that becomes a directory, network or container
/// name: `[a-zA-Z0-9][a-zA-Z0-9_.-]*`, and never `..`.
pub fn validate_name(what: &str, name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            first.is_ascii_alphanumeric()
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        }
        None => false,
    };
    if !valid || name.contains("..") {
        return Err(Error::Configuration(format!(
            "invalid {} {:?}: must match [a-zA-Z0-9][a-zA-Z0-9_.-]* without \"..\"",
            what, name
        )));
    }
    Ok(())
}

/// Replace every non-alphanumeric character with `-`
pub fn sanitize_hostname(hostname: &str) -> String {
    hostname
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// Local socket that proxies to the engine on `hostname`
pub fn forwarded_socket_path(scratch_dir: &Path, hostname: &str) -> PathBuf {
    scratch_dir.join(format!(
        "{}-{}.sock",
        SOCKET_PREFIX,
        sanitize_hostname(hostname)
    ))
}

/// Container name for a project
pub fn container_name(workspace_id: &str, project_name: &str) -> String {
    format!("{}-{}", workspace_id, project_name)
}

/// Nested engine volume for a project; shares the container name
pub fn volume_name(workspace_id: &str, project_name: &str) -> String {
    container_name(workspace_id, project_name)
}

/// Where the project directory is mounted inside its container
pub fn container_project_dir(project_name: &str) -> String {
    format!("{}/{}", CONTAINER_WORKSPACES_DIR, project_name)
}

/// Local workspace directory
pub fn local_workspace_dir(base_path: &Path, workspace_id: &str) -> PathBuf {
    base_path.join(workspace_id)
}

/// Local project directory
pub fn local_project_dir(base_path: &Path, workspace_id: &str, project_name: &str) -> PathBuf {
    local_workspace_dir(base_path, workspace_id).join(project_name)
}

/// Workspace directory on a remote host. Always `/`-separated.
pub fn remote_workspace_dir(data_dir: &str, workspace_id: &str) -> String {
    format!("{}/{}", data_dir.trim_end_matches('/'), workspace_id)
}

/// Project directory on a remote host. Always `/`-separated.
pub fn remote_project_dir(data_dir: &str, workspace_id: &str, project_name: &str) -> String {
    format!(
        "{}/{}",
        remote_workspace_dir(data_dir, workspace_id),
        project_name
    )
}
