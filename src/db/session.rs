//! MySQL sessions opened through a tunnel's local port

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{ConnectOptions, Connection, Executor};
use tokio::time::timeout;
use tracing::{debug, error, info};

use super::config::DatabaseTarget;
use super::value::{bind_params, row_to_map, Row};
use crate::config::CONNECTION_TIMEOUT_SECS;
use crate::error::{MysqlTunnelError, Result};
use crate::transport::{DatabaseDriver, DatabaseSession};

/// Tunnels always listen on loopback
const LOOPBACK: &str = "127.0.0.1";

/// Opens [`MySqlSession`]s with sqlx
#[derive(Debug, Clone)]
pub struct MySqlDriver {
    connect_timeout: Duration,
}

impl MySqlDriver {
    /// Create a driver with the default 30 second connection timeout
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECTION_TIMEOUT_SECS),
        }
    }

    /// Override the connection timeout
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    fn connect_options(target: &DatabaseTarget, local_port: u16) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(LOOPBACK)
            .port(local_port)
            .username(&target.username)
            .password(&target.password)
            .database(&target.database)
            .charset("utf8mb4")
            .disable_statement_logging()
    }
}

impl Default for MySqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseDriver for MySqlDriver {
    type Session = MySqlSession;

    async fn open(&self, target: &DatabaseTarget, local_port: u16) -> Result<MySqlSession> {
        debug!(
            "Connecting to MySQL database '{}' as '{}' via {}:{}",
            target.database, target.username, LOOPBACK, local_port
        );

        let options = Self::connect_options(target, local_port);
        let conn = match timeout(self.connect_timeout, MySqlConnection::connect_with(&options)).await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                error!("MySQL connection failed: {}", e);
                return Err(MysqlTunnelError::from(e));
            }
            Err(_) => {
                error!(
                    "MySQL connection timeout after {}s",
                    self.connect_timeout.as_secs()
                );
                return Err(MysqlTunnelError::database(format!(
                    "Connection timeout after {}s",
                    self.connect_timeout.as_secs()
                )));
            }
        };

        info!("Connected to MySQL database '{}'", target.database);
        Ok(MySqlSession { conn })
    }
}

/// One MySQL connection
///
/// Mutating statements run inside their own transaction and are committed
/// before `execute_and_commit` returns.
pub struct MySqlSession {
    conn: MySqlConnection,
}

#[async_trait]
impl DatabaseSession for MySqlSession {
    async fn ping(&mut self) -> Result<()> {
        self.conn.ping().await?;
        Ok(())
    }

    async fn fetch_rows(&mut self, query: &str, params: &[Value]) -> Result<Vec<Row>> {
        // Without parameters use the text protocol; not every statement can be prepared
        let rows = if params.is_empty() {
            (&mut self.conn).fetch_all(sqlx::raw_sql(query)).await?
        } else {
            bind_params(sqlx::query(query), params)
                .fetch_all(&mut self.conn)
                .await?
        };

        Ok(rows.iter().map(row_to_map).collect())
    }

    async fn execute_and_commit(&mut self, query: &str, params: &[Value]) -> Result<u64> {
        let mut tx = self.conn.begin().await?;

        let result = if params.is_empty() {
            (&mut *tx).execute(sqlx::raw_sql(query)).await?
        } else {
            bind_params(sqlx::query(query), params)
                .execute(&mut *tx)
                .await?
        };

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn rollback(&mut self) -> Result<()> {
        (&mut self.conn).execute(sqlx::raw_sql("ROLLBACK")).await?;
        Ok(())
    }

    async fn close(self) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }
}

impl std::fmt::Debug for MySqlSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlSession").finish_non_exhaustive()
    }
}
