//! Configuration and CLI argument parsing for the MySQL tunnel server

use clap::Parser;
use std::path::PathBuf;

use crate::db::DatabaseTarget;
use crate::error::{MysqlTunnelError, Result};
use crate::ssh::TunnelEndpoint;

/// Default max characters for a query (None = unlimited)
pub const DEFAULT_MAX_CHARS: Option<usize> = Some(10_000);

/// Connection timeout in seconds (SSH handshake and MySQL login)
pub const CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Default interval between registry liveness polls
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// MySQL tunnel server CLI Arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "mysql-tunnel")]
#[command(version)]
#[command(about = "MCP server for MySQL databases reached through SSH tunnels")]
pub struct Args {
    /// SSH host to tunnel through
    #[arg(long, env = "SSH_HOST")]
    pub ssh_host: String,

    /// SSH port
    #[arg(long, default_value = "22", env = "SSH_PORT")]
    pub ssh_port: u16,

    /// SSH username
    #[arg(long, env = "SSH_USERNAME")]
    pub ssh_username: String,

    /// SSH password (alternative to key)
    #[arg(long, env = "SSH_PASSWORD")]
    pub ssh_password: Option<String>,

    /// Path to SSH private key file (alternative to password)
    #[arg(long, env = "SSH_PRIVATE_KEY_PATH")]
    pub ssh_key: Option<PathBuf>,

    /// Passphrase for the SSH private key
    #[arg(long, env = "SSH_PRIVATE_KEY_PASSWORD")]
    pub ssh_key_passphrase: Option<String>,

    /// MySQL host as seen from the SSH server
    #[arg(long, default_value = "localhost", env = "MYSQL_HOST")]
    pub mysql_host: String,

    /// MySQL port as seen from the SSH server
    #[arg(long, default_value = "3306", env = "MYSQL_PORT")]
    pub mysql_port: u16,

    /// MySQL username
    #[arg(long, env = "MYSQL_USERNAME")]
    pub mysql_username: String,

    /// MySQL password
    #[arg(long, env = "MYSQL_PASSWORD")]
    pub mysql_password: String,

    /// MySQL database name
    #[arg(long, env = "MYSQL_DATABASE")]
    pub mysql_database: String,

    /// Connection timeout in seconds
    #[arg(long, default_value = "30", env = "MYSQL_TUNNEL_TIMEOUT")]
    pub timeout: u64,

    /// Maximum characters for a query.
    /// Use "none", "0", or negative value to disable limit.
    /// Default: 10000
    #[arg(long = "maxChars", env = "MYSQL_TUNNEL_MAX_CHARS")]
    pub max_chars: Option<String>,

    /// Seconds between liveness polls of open connections (0 disables)
    #[arg(long, default_value = "5", env = "MYSQL_TUNNEL_POLL_INTERVAL")]
    pub poll_interval: u64,

    /// Log filter (e.g. "info", "mysql_tunnel=debug"); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Parsed and validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SSH server the tunnel goes through
    pub endpoint: TunnelEndpoint,

    /// MySQL database behind the SSH server
    pub target: DatabaseTarget,

    /// Connection timeout in seconds
    pub timeout_secs: u64,

    /// Maximum query length (None = unlimited)
    pub max_chars: Option<usize>,

    /// Liveness poll interval (None = disabled)
    pub poll_interval_secs: Option<u64>,

    /// Log filter directive
    pub log_level: String,
}

impl Config {
    /// Create Config from CLI Args
    pub fn from_args(args: Args) -> Result<Self> {
        validate_args(&args)?;

        let max_chars = parse_max_chars(args.max_chars.as_deref());

        let mut endpoint = TunnelEndpoint::new(args.ssh_host, args.ssh_username)
            .with_port(args.ssh_port);
        if let Some(password) = sanitize_secret(args.ssh_password) {
            endpoint = endpoint.with_password(password);
        }
        if let Some(key) = args.ssh_key {
            endpoint = endpoint.with_private_key(key);
        }
        if let Some(passphrase) = sanitize_secret(args.ssh_key_passphrase) {
            endpoint = endpoint.with_private_key_passphrase(passphrase);
        }

        let target = DatabaseTarget::new(
            args.mysql_host,
            args.mysql_port,
            args.mysql_username,
            args.mysql_password,
            args.mysql_database,
        )?;
        endpoint.validate()?;

        Ok(Config {
            endpoint,
            target,
            timeout_secs: args.timeout,
            max_chars,
            poll_interval_secs: Some(args.poll_interval).filter(|secs| *secs > 0),
            log_level: args.log_level,
        })
    }
}

/// Validate CLI arguments, collecting every problem
fn validate_args(args: &Args) -> Result<()> {
    let mut errors = Vec::new();

    if args.ssh_host.trim().is_empty() {
        errors.push("Missing required --ssh-host".to_string());
    }

    if args.ssh_username.trim().is_empty() {
        errors.push("Missing required --ssh-username".to_string());
    }

    let has_password = args.ssh_password.as_deref().is_some_and(|p| !p.is_empty());
    if !has_password && args.ssh_key.is_none() {
        errors.push("Must provide either --ssh-password or --ssh-key".to_string());
    }

    if let Some(ref key_path) = args.ssh_key {
        if !key_path.exists() {
            errors.push(format!("SSH key file not found: {}", key_path.display()));
        }
    }

    if args.mysql_username.trim().is_empty() {
        errors.push("Missing required --mysql-username".to_string());
    }

    if args.mysql_password.is_empty() {
        errors.push("Missing required --mysql-password".to_string());
    }

    if args.mysql_database.trim().is_empty() {
        errors.push("Missing required --mysql-database".to_string());
    }

    if args.timeout == 0 {
        errors.push("--timeout must be greater than zero".to_string());
    }

    if !errors.is_empty() {
        return Err(MysqlTunnelError::config(format!("\n{}", errors.join("\n"))));
    }

    Ok(())
}

/// Parse max_chars argument
///
/// - "none" (case-insensitive) → None (unlimited)
/// - "0" or negative → None (unlimited)
/// - positive integer → Some(value)
/// - None (not provided) → DEFAULT_MAX_CHARS
pub fn parse_max_chars(value: Option<&str>) -> Option<usize> {
    match value {
        None => DEFAULT_MAX_CHARS,
        Some(s) => {
            if s.eq_ignore_ascii_case("none") {
                return None;
            }

            match s.parse::<i64>() {
                Ok(n) if n <= 0 => None,
                Ok(n) => Some(n as usize),
                Err(_) => DEFAULT_MAX_CHARS,
            }
        }
    }
}

/// Sanitize secret: return None if empty
fn sanitize_secret(secret: Option<String>) -> Option<String> {
    secret.filter(|p| !p.is_empty())
}
