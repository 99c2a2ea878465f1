use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::auth::load_key;
use crate::{SshAuth, TunnelError};

/// Where and how to open an SSH session.
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub auth: SshAuth,
}

impl SshConfig {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>, auth: SshAuth) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            auth,
        }
    }

    /// `host:port`, used in log fields and error messages.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct ClientHandler {
    host: String,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    // Host keys are not pinned; the caller supplies the target explicitly.
    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            target: "tunnel",
            host = %self.host,
            fingerprint = %server_public_key.fingerprint(),
            "accepting server host key"
        );
        Ok(true)
    }
}

/// Output of a command run over SSH.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: Option<u32>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }
}

/// An authenticated SSH session.
pub struct SshSession {
    handle: Handle<ClientHandler>,
    address: String,
}

impl SshSession {
    /// Connect and authenticate.
    pub async fn connect(config: &SshConfig) -> Result<Self, TunnelError> {
        let address = config.address();
        debug!(target: "tunnel", address = %address, user = %config.user, "opening SSH session");

        let ssh_config = Arc::new(client::Config::default());
        let handler = ClientHandler {
            host: config.host.clone(),
        };
        let mut handle =
            client::connect(ssh_config, (config.host.as_str(), config.port), handler).await?;

        let accepted = match &config.auth {
            SshAuth::Password(password) => {
                handle
                    .authenticate_password(config.user.clone(), password.clone())
                    .await?
            }
            SshAuth::PrivateKey { path, passphrase } => {
                let key = load_key(path, passphrase.as_deref())?;
                handle
                    .authenticate_publickey(config.user.clone(), Arc::new(key))
                    .await?
            }
        };

        if !accepted {
            return Err(TunnelError::AuthRejected(config.user.clone()));
        }

        debug!(target: "tunnel", address = %address, "SSH session authenticated");
        Ok(Self { handle, address })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Open a byte stream to a Unix socket on the remote host.
    pub async fn open_unix(
        &self,
        remote_path: &str,
    ) -> Result<impl AsyncRead + AsyncWrite + Unpin + Send, TunnelError> {
        let channel = self
            .handle
            .channel_open_direct_streamlocal(remote_path)
            .await?;
        Ok(channel.into_stream())
    }

    /// Run a command on the remote host and collect its output.
    pub async fn exec(&self, command: &str) -> Result<ExecOutput, TunnelError> {
        debug!(target: "tunnel", address = %self.address, command = %command, "remote exec");

        let mut channel = self.handle.channel_open_session().await?;
        channel.exec(true, command).await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                _ => {}
            }
        }

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_status,
        })
    }

    pub async fn close(&self) {
        let _ = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;
    }
}
