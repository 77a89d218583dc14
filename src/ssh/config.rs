//! SSH tunnel endpoint configuration
//!
//! Where the tunnel goes and how it authenticates.

use std::path::PathBuf;

use crate::error::{MysqlTunnelError, Result};

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// SSH server that the tunnel is opened through
#[derive(Clone, PartialEq, Eq)]
pub struct TunnelEndpoint {
    /// Remote hostname or IP address
    pub host: String,

    /// SSH port (default: 22)
    pub port: u16,

    /// Username for authentication
    pub username: String,

    /// Password for password authentication
    pub password: Option<String>,

    /// Path to a private key file for key authentication
    pub private_key_path: Option<PathBuf>,

    /// Passphrase protecting the private key
    pub private_key_passphrase: Option<String>,
}

impl TunnelEndpoint {
    /// Create a new endpoint with minimal required fields
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            password: None,
            private_key_path: None,
            private_key_passphrase: None,
        }
    }

    /// Set the SSH port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set password authentication
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set private key authentication (path to the key file)
    pub fn with_private_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.private_key_path = Some(path.into());
        self
    }

    /// Set the passphrase used to decrypt the private key
    pub fn with_private_key_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.private_key_passphrase = Some(passphrase.into());
        self
    }

    /// Check that every required field is present.
    ///
    /// All missing fields are reported together. A password or a private
    /// key is required; an empty password counts as absent.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();

        if self.host.trim().is_empty() {
            missing.push("host");
        }
        if self.port == 0 {
            missing.push("port");
        }
        if self.username.trim().is_empty() {
            missing.push("username");
        }

        let has_password = self.password.as_deref().is_some_and(|p| !p.is_empty());
        let has_key = self
            .private_key_path
            .as_ref()
            .is_some_and(|p| !p.as_os_str().is_empty());
        if !has_password && !has_key {
            missing.push("password or private_key_path");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(MysqlTunnelError::MissingFields {
                section: "ssh",
                fields: missing,
            })
        }
    }
}

impl std::fmt::Debug for TunnelEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key_path", &self.private_key_path)
            .field(
                "private_key_passphrase",
                &self.private_key_passphrase.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}
