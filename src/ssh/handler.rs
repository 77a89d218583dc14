//! SSH client handler implementation
//!
//! Implements the `russh::client::Handler` trait for tunnel sessions.

use tracing::debug;

/// SSH client handler for russh
///
/// Accepts every server host key. Tunnel endpoints are supplied by a trusted
/// configuration provider; host key pinning is left to that layer.
#[derive(Debug, Clone)]
pub struct TunnelHandler {
    /// Host label used in log lines
    host: String,
}

impl TunnelHandler {
    /// Create a new handler for the given SSH host
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl russh::client::Handler for TunnelHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            "Accepting {} host key from {}",
            server_public_key.algorithm().as_str(),
            self.host
        );
        Ok(true)
    }
}
