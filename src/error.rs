//! Error types for the MySQL tunnel

use thiserror::Error;

/// Main error type for tunneled MySQL connections
#[derive(Debug, Error)]
pub enum MysqlTunnelError {
    /// One or more required configuration fields are absent
    #[error("Missing required {section} field(s): {}", fields.join(", "))]
    MissingFields {
        /// Which configuration bundle failed validation ("ssh" or "mysql")
        section: &'static str,
        /// Names of every missing field, in declaration order
        fields: Vec<&'static str>,
    },

    /// Configuration error outside of a single bundle (CLI arguments)
    #[error("Configuration error: {0}")]
    Config(String),

    /// SSH transport or tunnel failure
    #[error("SSH connection error: {0}")]
    Connection(String),

    /// SSH authentication failed (password or key)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// SSH key loading or parsing error
    #[error("SSH key error: {0}")]
    SshKey(String),

    /// Database driver failure (connect, ping, statement)
    #[error("Database error: {0}")]
    Database(String),

    /// `execute` was called before a successful `connect`
    #[error("Not connected: call connect() first")]
    NotConnected,

    /// Query failed after exhausting the retry budget
    #[error("Query failed after {attempts} attempt(s): {message}")]
    QueryFailed { attempts: u32, message: String },

    /// Invalid parameters provided
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Unknown connection id in the registry
    #[error("Unknown connection: {0}")]
    UnknownConnection(String),
}

/// Result type alias using MysqlTunnelError
pub type Result<T> = std::result::Result<T, MysqlTunnelError>;

impl MysqlTunnelError {
    /// Create a connection error from a string
    pub fn connection(msg: impl Into<String>) -> Self {
        MysqlTunnelError::Connection(msg.into())
    }

    /// Create an authentication error from a string
    pub fn auth(msg: impl Into<String>) -> Self {
        MysqlTunnelError::Authentication(msg.into())
    }

    /// Create a database error from a string
    pub fn database(msg: impl Into<String>) -> Self {
        MysqlTunnelError::Database(msg.into())
    }

    /// Create an invalid params error from a string
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        MysqlTunnelError::InvalidParams(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        MysqlTunnelError::Config(msg.into())
    }

    /// True for errors raised while establishing the tunnel or session
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            MysqlTunnelError::Connection(_)
                | MysqlTunnelError::Authentication(_)
                | MysqlTunnelError::SshKey(_)
                | MysqlTunnelError::Database(_)
        )
    }
}

impl From<sqlx::Error> for MysqlTunnelError {
    fn from(err: sqlx::Error) -> Self {
        MysqlTunnelError::Database(err.to_string())
    }
}
