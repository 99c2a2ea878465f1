//! Forward a remote Unix domain socket to a local path over SSH.
//!
//! The tunnel binds a local Unix listener and, for every accepted
//! connection, opens a `direct-streamlocal` channel to the remote socket and
//! pumps bytes in both directions. The tunnel is only built on Unix hosts;
//! sessions and remote `exec` work everywhere.
//!
//! Readiness is reported exactly once through a single-slot channel, and only
//! after the local listener is bound. Failures that happen after readiness
//! (session loss, listener errors) arrive on a separate error channel.
//!
//! # Example
//!
//! ```rust,ignore
//! use ssh_tunnel::{Readiness, SshAuth, SshConfig, UnixTunnel};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = SshConfig::new("build-host", 22, "dev", SshAuth::Password("secret".into()));
//! let tunnel = UnixTunnel::new(config, "/tmp/socks/docker.sock", "/var/run/docker.sock");
//! let handle = tunnel.start(CancellationToken::new());
//!
//! match handle.ready.await {
//!     Ok(Readiness::Ready) => { /* dial /tmp/socks/docker.sock */ }
//!     Ok(Readiness::Failed(e)) => eprintln!("tunnel failed: {e}"),
//!     Err(_) => eprintln!("tunnel task exited"),
//! }
//! ```

mod auth;
mod error;
mod session;
#[cfg(unix)]
mod unix;

pub use auth::SshAuth;
pub use error::TunnelError;
pub use session::{ExecOutput, SshConfig, SshSession};
#[cfg(unix)]
pub use unix::{remove_socket_if_same, socket_ino, Readiness, TunnelHandle, TunnelState, UnixTunnel};
