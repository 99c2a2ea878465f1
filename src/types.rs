//! Entities handed to the provider and the descriptors it returns.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::paths;

/// Logical environment root: one network plus its project containers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
}

/// Older name for a workspace.
pub type Target = Workspace;

/// One code checkout with its own container, volume and directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub workspace_id: String,
    pub image: String,
    /// Container user; the provider default applies when unset.
    #[serde(default)]
    pub user: Option<String>,
    pub repository: Repository,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
    #[serde(default)]
    pub api_key: String,
}

impl Project {
    pub fn container_name(&self) -> String {
        paths::container_name(&self.workspace_id, &self.name)
    }

    pub fn volume_name(&self) -> String {
        paths::volume_name(&self.workspace_id, &self.name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Repository {
    pub url: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub git_user: Option<GitUser>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitUser {
    pub name: String,
    pub email: String,
}

/// Credentials for pulling from a private registry.
#[derive(Clone, Serialize, Deserialize)]
pub struct ContainerRegistry {
    pub server: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for ContainerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerRegistry")
            .field("server", &self.server)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub name: String,
    pub is_running: bool,
    pub created: Option<DateTime<Utc>>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    /// Opaque JSON; container labels when the container exists.
    pub provider_metadata: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    pub name: String,
    pub network_exists: bool,
    /// Opaque JSON; see [`WorkspaceMetadata`].
    pub provider_metadata: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceMetadata {
    pub network_id: String,
}

/// Result of a requirements check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequirementStatus {
    pub name: String,
    pub met: bool,
    pub reason: String,
}
