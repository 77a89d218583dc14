//! Transport seams used by [`TunneledConnection`](crate::connection::TunneledConnection)
//!
//! A connection is built from two layers: a tunnel that forwards a local
//! ephemeral port to the database host, and a database session opened
//! against that local port. The production implementations are
//! [`SshTunneler`](crate::ssh::SshTunneler) and
//! [`MySqlDriver`](crate::db::MySqlDriver).

use async_trait::async_trait;
use serde_json::Value;

use crate::db::{DatabaseTarget, Row};
use crate::error::Result;
use crate::ssh::TunnelEndpoint;

/// Opens tunnels through an SSH server
#[async_trait]
pub trait Tunneler: Send + Sync {
    type Tunnel: Tunnel;

    /// Forward a local ephemeral port to `remote_host:remote_port`, as seen
    /// from the far side of `endpoint`.
    async fn open(
        &self,
        endpoint: &TunnelEndpoint,
        remote_host: &str,
        remote_port: u16,
    ) -> Result<Self::Tunnel>;
}

/// A running port forward
#[async_trait]
pub trait Tunnel: Send + Sync {
    /// Local port the forward listens on
    fn local_port(&self) -> u16;

    /// Whether the forward can still carry new connections
    fn is_active(&self) -> bool;

    /// Stop forwarding and release the underlying transport. Idempotent.
    async fn stop(&mut self);
}

/// Opens database sessions through a tunnel's local port
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    type Session: DatabaseSession;

    /// Connect to `127.0.0.1:local_port` with the target's credentials
    async fn open(&self, target: &DatabaseTarget, local_port: u16) -> Result<Self::Session>;
}

/// A live database session
#[async_trait]
pub trait DatabaseSession: Send {
    /// Round-trip liveness probe
    async fn ping(&mut self) -> Result<()>;

    /// Run a row-returning statement and fetch every row
    async fn fetch_rows(&mut self, query: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Run a mutating statement, commit it, and return the affected row count
    async fn execute_and_commit(&mut self, query: &str, params: &[Value]) -> Result<u64>;

    /// Roll back any open transaction
    async fn rollback(&mut self) -> Result<()>;

    /// Close the session
    async fn close(self) -> Result<()>;
}
