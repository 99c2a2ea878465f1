use std::io;
use std::path::PathBuf;

/// Tunnel error types.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    #[error("private key error: {0}")]
    Key(#[from] russh_keys::Error),

    #[error("private key {} is encrypted and no passphrase was supplied", .0.display())]
    PassphraseRequired(PathBuf),

    #[error("authentication rejected for user {0}")]
    AuthRejected(String),

    #[error("SSH connection to {0} lost")]
    ConnectionLost(String),
}

impl TunnelError {
    /// True when the error comes from the supplied credentials rather than
    /// from the network.
    pub fn is_credentials(&self) -> bool {
        matches!(
            self,
            TunnelError::Key(_) | TunnelError::PassphraseRequired(_)
        )
    }
}
