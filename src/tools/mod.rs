//! MCP tool parameter types
//!
//! Tools are dispatched in `server.rs`; this module holds their argument
//! shapes so schemas and parsing stay in one place.
//!
//! Available tools:
//! - `connect` - Open a tunneled connection with the configured endpoints
//! - `query` - Run SQL on an open connection
//! - `list-databases` / `list-tables` - Browse the server
//! - `status` - Probe a connection
//! - `disconnect` - Close a connection

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parameters for tools that act on one open connection
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct ConnectionParams {
    /// Id returned by the `connect` tool
    pub connection_id: String,
}

/// Parameters for the query tool
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct QueryParams {
    /// Id returned by the `connect` tool
    pub connection_id: String,

    /// SQL text; use `?` placeholders for values
    pub query: String,

    /// Values bound positionally to the `?` placeholders
    #[serde(default)]
    pub params: Vec<Value>,
}
