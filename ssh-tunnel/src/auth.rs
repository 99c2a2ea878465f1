use std::fmt;
use std::path::{Path, PathBuf};

use russh_keys::key::KeyPair;
use tracing::debug;

use crate::TunnelError;

/// Credentials for an SSH session. Exactly one method is used.
#[derive(Clone)]
pub enum SshAuth {
    Password(String),
    PrivateKey {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

impl fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SshAuth::Password(_) => f.write_str("Password(<redacted>)"),
            SshAuth::PrivateKey { path, passphrase } => f
                .debug_struct("PrivateKey")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

/// Load a private key, decrypting it with `passphrase` when the file turns
/// out to be encrypted.
pub(crate) fn load_key(path: &Path, passphrase: Option<&str>) -> Result<KeyPair, TunnelError> {
    match russh_keys::load_secret_key(path, None) {
        Ok(key) => Ok(key),
        Err(russh_keys::Error::KeyIsEncrypted) => {
            let passphrase =
                passphrase.ok_or_else(|| TunnelError::PassphraseRequired(path.to_path_buf()))?;
            debug!(target: "tunnel", key = %path.display(), "private key is encrypted, decrypting");
            Ok(russh_keys::load_secret_key(path, Some(passphrase))?)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secrets() {
        let auth = SshAuth::Password("hunter2".to_string());
        assert!(!format!("{:?}", auth).contains("hunter2"));

        let auth = SshAuth::PrivateKey {
            path: PathBuf::from("/home/dev/.ssh/id_ed25519"),
            passphrase: Some("open sesame".to_string()),
        };
        let rendered = format!("{:?}", auth);
        assert!(rendered.contains("id_ed25519"));
        assert!(!rendered.contains("open sesame"));
    }

    #[test]
    fn test_load_key_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_key(&dir.path().join("nope"), None).unwrap_err();
        assert!(!matches!(err, TunnelError::PassphraseRequired(_)));
        assert!(err.is_credentials());
    }

    #[test]
    fn test_load_key_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id_rsa");
        std::fs::write(&path, "not a key").unwrap();
        assert!(load_key(&path, Some("pass")).is_err());
    }
}
