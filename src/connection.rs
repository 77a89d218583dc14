//! Tunneled MySQL connection
//!
//! Owns one SSH tunnel and one database session bound through it. Provides
//! connect, execute (with a one-shot reconnect-and-retry), liveness probing,
//! and deterministic teardown.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::db::{DatabaseTarget, MySqlDriver, Row, StatementKind};
use crate::error::{MysqlTunnelError, Result};
use crate::ssh::{SshTunneler, TunnelEndpoint};
use crate::transport::{DatabaseDriver, DatabaseSession, Tunnel, Tunneler};

/// Total attempts per `execute` call (first try plus one retry)
pub const MAX_QUERY_ATTEMPTS: u32 = 2;

/// Result of a successful `execute`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryOutcome {
    /// Rows of a SELECT/SHOW/DESCRIBE/DESC/EXPLAIN statement
    Rows(Vec<Row>),
    /// Affected row count of a committed mutating statement
    Affected(u64),
}

impl QueryOutcome {
    /// Rows, if this outcome carries a result set
    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            QueryOutcome::Rows(rows) => Some(rows),
            QueryOutcome::Affected(_) => None,
        }
    }

    /// Affected row count, if this outcome is from a mutating statement
    pub fn affected_rows(&self) -> Option<u64> {
        match self {
            QueryOutcome::Rows(_) => None,
            QueryOutcome::Affected(n) => Some(*n),
        }
    }

    /// Number of rows returned or affected
    pub fn row_count(&self) -> u64 {
        match self {
            QueryOutcome::Rows(rows) => rows.len() as u64,
            QueryOutcome::Affected(n) => *n,
        }
    }
}

/// One SSH tunnel plus one MySQL session
///
/// The tunnel is opened first and closed last; the session depends on the
/// tunnel's local port. All methods take `&mut self`, so a connection serves
/// one operation at a time. Use separate instances for concurrent queries;
/// each binds its own ephemeral port.
pub struct TunneledConnection<T: Tunneler = SshTunneler, D: DatabaseDriver = MySqlDriver> {
    endpoint: TunnelEndpoint,
    target: DatabaseTarget,
    tunneler: T,
    driver: D,
    tunnel: Option<T::Tunnel>,
    session: Option<D::Session>,
}

impl TunneledConnection {
    /// Create a connection using russh for the tunnel and sqlx for MySQL.
    ///
    /// Fails with [`MysqlTunnelError::MissingFields`] if either configuration
    /// lacks a required field. No network activity happens until `connect`.
    pub fn new(endpoint: TunnelEndpoint, target: DatabaseTarget) -> Result<Self> {
        Self::with_transport(endpoint, target, SshTunneler::new(), MySqlDriver::new())
    }
}

impl<T: Tunneler, D: DatabaseDriver> TunneledConnection<T, D> {
    /// Create a connection with explicit tunnel and driver implementations
    pub fn with_transport(
        endpoint: TunnelEndpoint,
        target: DatabaseTarget,
        tunneler: T,
        driver: D,
    ) -> Result<Self> {
        endpoint.validate()?;
        target.validate()?;

        Ok(Self {
            endpoint,
            target,
            tunneler,
            driver,
            tunnel: None,
            session: None,
        })
    }

    /// SSH endpoint configuration
    pub fn endpoint(&self) -> &TunnelEndpoint {
        &self.endpoint
    }

    /// Database target configuration
    pub fn target(&self) -> &DatabaseTarget {
        &self.target
    }

    /// Local port of the open tunnel, if connected
    pub fn local_port(&self) -> Option<u16> {
        self.tunnel.as_ref().map(|t| t.local_port())
    }

    /// Open the tunnel, then the database session through it.
    ///
    /// Either both come up or neither is left open. Any existing tunnel and
    /// session are closed first.
    pub async fn connect(&mut self) -> Result<()> {
        if self.tunnel.is_some() || self.session.is_some() {
            debug!("Closing existing tunnel before reconnecting");
            self.close().await;
        }

        info!(
            "Opening SSH tunnel via {}@{}:{} to {}:{}...",
            self.endpoint.username,
            self.endpoint.host,
            self.endpoint.port,
            self.target.host,
            self.target.port
        );

        let tunnel = match self
            .tunneler
            .open(&self.endpoint, &self.target.host, self.target.port)
            .await
        {
            Ok(tunnel) => tunnel,
            Err(e) => {
                error!("connect: failed to open SSH tunnel: {}", e);
                return Err(e);
            }
        };

        let local_port = tunnel.local_port();
        info!("SSH tunnel established on local port {}", local_port);
        self.tunnel = Some(tunnel);

        match self.driver.open(&self.target, local_port).await {
            Ok(session) => {
                self.session = Some(session);
                info!(
                    "Connected to MySQL database '{}' through the tunnel",
                    self.target.database
                );
                Ok(())
            }
            Err(e) => {
                error!("connect: failed to open MySQL session: {}", e);
                self.close().await;
                Err(e)
            }
        }
    }

    /// Run a query and return its rows or affected row count.
    ///
    /// `params` are bound positionally to `?` placeholders by the driver.
    /// A dead session is replaced through the existing tunnel before the
    /// query runs; a failed query is retried once on a fresh session.
    pub async fn execute(&mut self, query: &str, params: &[Value]) -> Result<QueryOutcome> {
        if self.tunnel.is_none() {
            warn!("execute: no active connection");
            return Err(MysqlTunnelError::NotConnected);
        }

        let kind = StatementKind::classify(query);
        let mut last_error = String::new();

        for attempt in 1..=MAX_QUERY_ATTEMPTS {
            match self.run_once(kind, query, params).await {
                Ok(outcome) => {
                    debug!(attempt, rows = outcome.row_count(), "execute: query succeeded");
                    return Ok(outcome);
                }
                Err(e) => {
                    error!(attempt, "execute: query failed: {}", e);
                    last_error = e.to_string();

                    if attempt < MAX_QUERY_ATTEMPTS {
                        info!(attempt, "execute: reconnecting MySQL session before retry");
                        match self.reconnect_session().await {
                            Ok(()) => continue,
                            Err(e) => error!(attempt, "execute: reconnect failed: {}", e),
                        }
                    }

                    self.rollback_quietly().await;
                    return Err(MysqlTunnelError::QueryFailed {
                        attempts: attempt,
                        message: last_error,
                    });
                }
            }
        }

        Err(MysqlTunnelError::QueryFailed {
            attempts: MAX_QUERY_ATTEMPTS,
            message: last_error,
        })
    }

    /// Probe the session, replacing it if the probe fails, then run the query
    async fn run_once(
        &mut self,
        kind: StatementKind,
        query: &str,
        params: &[Value],
    ) -> Result<QueryOutcome> {
        let alive = match self.session.as_mut() {
            Some(session) => match session.ping().await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Liveness probe failed: {}", e);
                    false
                }
            },
            None => false,
        };

        if !alive {
            self.reconnect_session().await?;
        }

        let session = self
            .session
            .as_mut()
            .ok_or(MysqlTunnelError::NotConnected)?;

        if kind.returns_rows() {
            session
                .fetch_rows(query, params)
                .await
                .map(QueryOutcome::Rows)
        } else {
            session
                .execute_and_commit(query, params)
                .await
                .map(QueryOutcome::Affected)
        }
    }

    /// Replace the database session, reusing the tunnel's local port
    async fn reconnect_session(&mut self) -> Result<()> {
        let local_port = match self.tunnel.as_ref() {
            Some(tunnel) if tunnel.is_active() => tunnel.local_port(),
            Some(_) => {
                return Err(MysqlTunnelError::connection(
                    "SSH tunnel is no longer active",
                ))
            }
            None => return Err(MysqlTunnelError::NotConnected),
        };

        if let Some(session) = self.session.take() {
            if let Err(e) = session.close().await {
                debug!("Closing stale MySQL session reported: {}", e);
            }
        }

        let session = self.driver.open(&self.target, local_port).await?;
        self.session = Some(session);
        info!("Reconnected MySQL session on local port {}", local_port);
        Ok(())
    }

    async fn rollback_quietly(&mut self) {
        if let Some(session) = self.session.as_mut() {
            if let Err(e) = session.rollback().await {
                debug!("Rollback after failed query reported: {}", e);
            }
        }
    }

    /// Check that the connection can still serve queries.
    ///
    /// Pings the session; if the ping fails and the tunnel is still up, the
    /// session is recreated once and pinged again. Never fails.
    pub async fn is_connected(&mut self) -> bool {
        match self.tunnel.as_ref() {
            Some(tunnel) if tunnel.is_active() => {}
            Some(_) => {
                debug!("is_connected: SSH tunnel is no longer active");
                return false;
            }
            None => return false,
        }

        if let Some(session) = self.session.as_mut() {
            match session.ping().await {
                Ok(()) => return true,
                Err(e) => warn!("is_connected: liveness probe failed: {}", e),
            }
        }

        if let Err(e) = self.reconnect_session().await {
            warn!("is_connected: reconnect failed: {}", e);
            return false;
        }

        match self.session.as_mut() {
            Some(session) => match session.ping().await {
                Ok(()) => true,
                Err(e) => {
                    warn!("is_connected: probe after reconnect failed: {}", e);
                    false
                }
            },
            None => false,
        }
    }

    /// Close the session, then stop the tunnel. Idempotent.
    pub async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            match session.close().await {
                Ok(()) => info!("MySQL session closed"),
                Err(e) => warn!("close: MySQL session close reported: {}", e),
            }
        }

        if let Some(mut tunnel) = self.tunnel.take() {
            if tunnel.is_active() {
                tunnel.stop().await;
                info!("SSH tunnel closed");
            } else {
                debug!("close: SSH tunnel already inactive");
            }
        }
    }
}

impl<T: Tunneler, D: DatabaseDriver> std::fmt::Debug for TunneledConnection<T, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunneledConnection")
            .field("endpoint", &self.endpoint)
            .field("target", &self.target)
            .field("local_port", &self.local_port())
            .field("has_session", &self.session.is_some())
            .finish()
    }
}
