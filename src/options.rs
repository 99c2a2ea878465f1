//! Target options: the JSON blob attached to a target configuration,
//! resolved into typed connection settings.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use ssh_tunnel::{SshAuth, SshConfig};

use crate::error::{Error, Result};

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_ENGINE_SOCKET: &str = "/var/run/docker.sock";
pub const DEFAULT_REMOTE_DATA_DIR: &str = "/tmp/dockspace-data";

/// Wire shape of the options blob. Keys match the target config manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetOptions {
    #[serde(rename = "Remote Hostname", default, skip_serializing_if = "Option::is_none")]
    pub remote_hostname: Option<String>,
    #[serde(rename = "Remote Port", default, skip_serializing_if = "Option::is_none")]
    pub remote_port: Option<u16>,
    #[serde(rename = "Remote User", default, skip_serializing_if = "Option::is_none")]
    pub remote_user: Option<String>,
    #[serde(rename = "Remote Password", default, skip_serializing_if = "Option::is_none")]
    pub remote_password: Option<String>,
    #[serde(
        rename = "Remote Private Key Path",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub remote_private_key: Option<String>,
    #[serde(
        rename = "Remote Private Key Passphrase",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub remote_private_key_passphrase: Option<String>,
    #[serde(rename = "Sock Path", default, skip_serializing_if = "Option::is_none")]
    pub sock_path: Option<String>,
    #[serde(
        rename = "Target Data Dir",
        alias = "Workspace Data Dir",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub data_dir: Option<String>,
}

/// A remote engine host reached over SSH.
#[derive(Debug, Clone)]
pub struct RemoteHost {
    pub hostname: String,
    pub port: u16,
    pub user: String,
    pub auth: SshAuth,
    /// Staging root for workspace directories on the remote host.
    pub data_dir: String,
}

impl RemoteHost {
    pub fn ssh_config(&self) -> SshConfig {
        SshConfig::new(
            self.hostname.clone(),
            self.port,
            self.user.clone(),
            self.auth.clone(),
        )
    }
}

/// Resolved connection settings. Local iff `remote` is `None`.
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
    /// Engine socket override. Local: the daemon endpoint. Remote: the
    /// socket path on the remote host.
    pub sock_path: Option<String>,
    pub remote: Option<RemoteHost>,
}

impl ConnectionOptions {
    /// Parse an options blob. Returns the options and whether the target is
    /// local. Never touches the network.
    pub fn resolve(blob: &str) -> Result<(Self, bool)> {
        let raw: TargetOptions = serde_json::from_str(blob)
            .map_err(|e| Error::Configuration(format!("parsing target options: {}", e)))?;
        let options = Self::from_target_options(raw)?;
        let is_local = options.is_local();
        Ok((options, is_local))
    }

    pub fn local() -> Self {
        Self::default()
    }

    pub fn is_local(&self) -> bool {
        self.remote.is_none()
    }

    /// Engine socket path on the remote side of a tunnel.
    pub fn remote_socket(&self) -> &str {
        self.sock_path.as_deref().unwrap_or(DEFAULT_ENGINE_SOCKET)
    }

    pub fn from_target_options(raw: TargetOptions) -> Result<Self> {
        let sock_path = raw.sock_path.filter(|s| !s.is_empty());

        let hostname = match raw.remote_hostname.filter(|h| !h.trim().is_empty()) {
            Some(hostname) => hostname,
            None => {
                return Ok(Self {
                    sock_path,
                    remote: None,
                })
            }
        };

        let port = raw.remote_port.unwrap_or(DEFAULT_SSH_PORT);
        if port == 0 {
            return Err(Error::Configuration(format!(
                "invalid Remote Port 0 for {}",
                hostname
            )));
        }

        let user = raw
            .remote_user
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::Configuration(format!("Remote User is required for {}", hostname)))?;

        let auth = match (raw.remote_password, raw.remote_private_key) {
            (Some(_), Some(_)) => {
                return Err(Error::Configuration(
                    "Remote Password and Remote Private Key Path are mutually exclusive"
                        .to_string(),
                ))
            }
            (Some(password), None) => SshAuth::Password(password),
            (None, Some(key_path)) => SshAuth::PrivateKey {
                path: PathBuf::from(shellexpand::tilde(&key_path).as_ref()),
                passphrase: raw.remote_private_key_passphrase,
            },
            (None, None) => {
                return Err(Error::Configuration(format!(
                    "either Remote Password or Remote Private Key Path is required for {}",
                    hostname
                )))
            }
        };

        Ok(Self {
            sock_path,
            remote: Some(RemoteHost {
                hostname,
                port,
                user,
                auth,
                data_dir: raw
                    .data_dir
                    .filter(|d| !d.is_empty())
                    .unwrap_or_else(|| DEFAULT_REMOTE_DATA_DIR.to_string()),
            }),
        })
    }
}
