//! Error taxonomy shared by every provider operation.

use std::fmt;
use std::io;

use ssh_tunnel::TunnelError;

/// Kind of engine resource named in a [`Error::NotFound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Container,
    Network,
    Volume,
    Image,
    Exec,
    Path,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Container => "container",
            ResourceKind::Network => "network",
            ResourceKind::Volume => "volume",
            ResourceKind::Image => "image",
            ResourceKind::Exec => "exec",
            ResourceKind::Path => "path",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or malformed setup. Raised before any engine call.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Engine unreachable, SSH dial or auth failure, tunnel loss.
    #[error("connection error: {0}")]
    Connection(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: ResourceKind, name: String },

    /// The engine rejected a well-formed request.
    #[error("{operation} failed: {message}")]
    Operation { operation: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn operation(operation: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::Operation {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn not_found(kind: ResourceKind, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

impl From<TunnelError> for Error {
    fn from(err: TunnelError) -> Self {
        if err.is_credentials() {
            Error::Configuration(err.to_string())
        } else {
            Error::Connection(err.to_string())
        }
    }
}
