//! MySQL tunnel - MySQL connections through SSH tunnels
//!
//! This crate opens an SSH session, forwards an ephemeral local port to a
//! MySQL server reachable from the SSH host, and runs queries over a single
//! MySQL connection on that port. A query that fails is retried once after
//! reopening the MySQL connection through the same tunnel.
//!
//! # Features
//!
//! - [`TunneledConnection`]: connect, execute with one retry, liveness check, close
//! - Password or private-key SSH authentication (password tried first)
//! - Row-returning statements yield column-keyed rows; others are committed
//! - [`ConnectionRegistry`]: many connections keyed by id, with background eviction
//! - [`MysqlTunnelServer`]: the registry exposed as MCP tools over stdio
//!
//! # MCP Tools
//!
//! - `connect` - Open a tunneled connection with the configured endpoints
//! - `query` - Run SQL on an open connection
//! - `list-databases` / `list-tables` - Browse the server
//! - `status` - Probe a connection
//! - `disconnect` - Close a connection
//!
//! # Example Usage (Library)
//!
//! ```no_run
//! use mysql_tunnel::{DatabaseTarget, TunnelEndpoint, TunneledConnection};
//!
//! # async fn run() -> mysql_tunnel::Result<()> {
//! let endpoint = TunnelEndpoint::new("bastion.example.com", "deploy").with_password("secret");
//! let target = DatabaseTarget::new("localhost", 3306, "app", "db-secret", "shop")?;
//!
//! let mut conn = TunneledConnection::new(endpoint, target)?;
//! conn.connect().await?;
//! let outcome = conn.execute("SELECT id, name FROM users WHERE id = ?", &[1.into()]).await?;
//! println!("{} row(s)", outcome.row_count());
//! conn.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Example Usage (CLI)
//!
//! ```bash
//! mysql-tunnel --ssh-host=bastion --ssh-username=deploy --ssh-password=secret \
//!   --mysql-username=app --mysql-password=db-secret --mysql-database=shop
//! ```

pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod registry;
pub mod server;
pub mod ssh;
pub mod tools;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use config::{Args, Config};
pub use connection::{QueryOutcome, TunneledConnection, MAX_QUERY_ATTEMPTS};
pub use db::{sanitize_query, DatabaseTarget, MySqlDriver, Row, StatementKind};
pub use error::{MysqlTunnelError, Result};
pub use registry::{ConnectionRegistry, ConnectionStatus};
pub use server::MysqlTunnelServer;
pub use ssh::{SshTunnel, SshTunneler, TunnelEndpoint};
pub use tools::{ConnectionParams, QueryParams};
pub use transport::{DatabaseDriver, DatabaseSession, Tunnel, Tunneler};
