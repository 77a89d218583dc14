//! MySQL target configuration

use crate::error::{MysqlTunnelError, Result};

/// Default MySQL port
pub const DEFAULT_MYSQL_PORT: u16 = 3306;

/// Database reached through the tunnel
///
/// `host` and `port` are resolved on the far side of the SSH server, so the
/// host is usually `localhost`.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
}

impl DatabaseTarget {
    /// Build a validated target; every field is required.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Result<Self> {
        let target = Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            database: database.into(),
        };
        target.validate()?;
        Ok(target)
    }

    /// Check that every field is present, reporting all missing ones.
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
        if self.password.is_empty() {
            missing.push("password");
        }
        if self.database.trim().is_empty() {
            missing.push("database");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(MysqlTunnelError::MissingFields {
                section: "mysql",
                fields: missing,
            })
        }
    }
}

impl std::fmt::Debug for DatabaseTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}
