//! MySQL session module
//!
//! Target configuration, statement classification, row decoding, and the
//! sqlx-backed session opened through the tunnel.

pub mod config;
pub mod session;
pub mod statement;
pub mod value;

// Re-exports
pub use config::{DatabaseTarget, DEFAULT_MYSQL_PORT};
pub use session::{MySqlDriver, MySqlSession};
pub use statement::{sanitize_query, StatementKind};
pub use value::Row;
