//! Provider configuration.
//!
//! Built once at startup, validated, then shared read-only (`Arc`) by the
//! engine factory, the orchestrator and the provider facade.
//!
//! ```toml
//! base_path = "/var/lib/dockspace/workspaces"
//! logs_dir = "/var/log/dockspace"
//!
//! [agent]
//! download_url = "https://download.example.com/agent/get.sh"
//! server_url = "https://dev.example.com"
//! api_url = "https://api.dev.example.com"
//!
//! [polling]
//! start_timeout_secs = 90
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

fn default_base_path() -> PathBuf {
    std::env::temp_dir().join("dockspace").join("workspaces")
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("dockspace-socks")
}

fn default_container_user() -> String {
    "dockspace".to_string()
}

fn default_true() -> bool {
    true
}

fn default_agent_binary() -> String {
    "/usr/local/bin/dockspace".to_string()
}

fn default_agent_version() -> String {
    "latest".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Root for local workspace and project directories.
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,

    /// Where forwarded engine sockets live. Cleared on initialization.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Per-entity log files are written here when set.
    #[serde(default)]
    pub logs_dir: Option<PathBuf>,

    /// User the project container runs as.
    #[serde(default = "default_container_user")]
    pub container_user: String,

    /// Launch an engine daemon inside each project container.
    #[serde(default = "default_true")]
    pub nested_engine: bool,

    pub agent: AgentConfig,

    #[serde(default)]
    pub polling: PollingConfig,
}

/// In-container agent bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Script that installs the agent binary; piped to bash at container start.
    pub download_url: String,

    #[serde(default = "default_agent_binary")]
    pub binary_path: String,

    #[serde(default = "default_agent_version")]
    pub version: String,

    #[serde(default)]
    pub server_url: String,

    #[serde(default)]
    pub api_url: String,

    /// Host port of the API server. When set, local containers fetch the
    /// agent through `host.docker.internal` on this port.
    #[serde(default)]
    pub api_port: Option<u16>,

    /// Wait for the agent binary to appear before provisioning a project.
    #[serde(default = "default_true")]
    pub wait_for_binary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollingConfig {
    pub interval_ms: u64,
    pub max_interval_ms: u64,
    pub start_timeout_secs: u64,
    pub stop_timeout_secs: u64,
    pub agent_timeout_secs: u64,
    /// Pause after launching the nested engine daemon.
    pub settle_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 200,
            max_interval_ms: 1000,
            start_timeout_secs: 60,
            stop_timeout_secs: 60,
            agent_timeout_secs: 300,
            settle_secs: 3,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

impl AgentConfig {
    pub fn new(download_url: impl Into<String>) -> Self {
        Self {
            download_url: download_url.into(),
            binary_path: default_agent_binary(),
            version: default_agent_version(),
            server_url: String::new(),
            api_url: String::new(),
            api_port: None,
            wait_for_binary: true,
        }
    }
}

impl ProviderConfig {
    /// Configuration with defaults for everything but the agent download URL.
    pub fn new(base_path: impl Into<PathBuf>, download_url: impl Into<String>) -> Result<Self> {
        let config = Self {
            base_path: base_path.into(),
            scratch_dir: default_scratch_dir(),
            logs_dir: None,
            container_user: default_container_user(),
            nested_engine: true,
            agent: AgentConfig::new(download_url),
            polling: PollingConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("parsing provider config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("reading provider config {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent.download_url.trim().is_empty() {
            return Err(Error::Configuration(
                "agent download_url must be set".to_string(),
            ));
        }
        Url::parse(&self.agent.download_url).map_err(|e| {
            Error::Configuration(format!(
                "invalid agent download_url {}: {}",
                self.agent.download_url, e
            ))
        })?;
        if self.container_user.is_empty() {
            return Err(Error::Configuration(
                "container_user must not be empty".to_string(),
            ));
        }
        if self.polling.interval_ms == 0 || self.polling.max_interval_ms < self.polling.interval_ms
        {
            return Err(Error::Configuration(format!(
                "polling interval {}ms must be non-zero and not exceed max interval {}ms",
                self.polling.interval_ms, self.polling.max_interval_ms
            )));
        }
        Ok(())
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn with_logs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.logs_dir = Some(dir.into());
        self
    }

    pub fn with_polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml() {
        let config = ProviderConfig::from_toml_str(
            r#"
            [agent]
            download_url = "https://download.example.com/get.sh"
            "#,
        )
        .unwrap();

        assert_eq!(config.container_user, "dockspace");
        assert!(config.nested_engine);
        assert!(config.logs_dir.is_none());
        assert_eq!(config.polling.settle(), Duration::from_secs(3));
        assert_eq!(config.agent.binary_path, "/usr/local/bin/dockspace");
    }

    #[test]
    fn test_missing_agent_section_is_configuration_error() {
        let err = ProviderConfig::from_toml_str("base_path = \"/srv\"").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_invalid_download_url() {
        let err = ProviderConfig::new("/srv", "not a url").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = ProviderConfig::from_toml_str(
            r#"
            colour = "blue"
            [agent]
            download_url = "https://download.example.com/get.sh"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_bad_polling_bounds() {
        let err = ProviderConfig::from_toml_str(
            r#"
            [agent]
            download_url = "https://download.example.com/get.sh"
            [polling]
            interval_ms = 5000
            max_interval_ms = 100
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
