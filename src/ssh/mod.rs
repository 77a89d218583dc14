//! SSH tunnel module
//!
//! This module opens authenticated SSH sessions and forwards an ephemeral
//! local port through them to a remote database host.

pub mod config;
pub mod handler;
pub mod tunnel;

// Re-exports
pub use config::{TunnelEndpoint, DEFAULT_SSH_PORT};
pub use handler::TunnelHandler;
pub use tunnel::{SshTunnel, SshTunneler};
