//! MCP Server implementation
//!
//! Exposes the connection registry as MCP tools: open tunneled MySQL
//! connections, run queries on them, browse databases and tables, probe
//! and close them.

use std::sync::Arc;
use std::time::Duration;

use rmcp::{
    handler::server::ServerHandler,
    model::*,
    service::{RequestContext, RoleServer},
    ErrorData as McpError,
};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::connection::{QueryOutcome, TunneledConnection};
use crate::db::{sanitize_query, MySqlDriver, Row};
use crate::registry::ConnectionRegistry;
use crate::ssh::SshTunneler;
use crate::tools::{ConnectionParams, QueryParams};

/// MySQL tunnel MCP Server
#[derive(Clone)]
pub struct MysqlTunnelServer {
    /// Server configuration
    config: Config,

    /// Open connections by id
    registry: Arc<ConnectionRegistry>,
}

impl MysqlTunnelServer {
    /// Create a new server. No connection is opened until the `connect` tool runs.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
        }
    }

    /// Get a reference to the connection registry
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Start the periodic liveness poll, if enabled
    pub fn start_liveness_poll(&self) -> Option<JoinHandle<()>> {
        let interval = self.config.poll_interval_secs?;
        info!("Polling connection liveness every {}s", interval);
        Some(
            self.registry
                .spawn_liveness_poll(Duration::from_secs(interval)),
        )
    }

    /// Close every connection
    pub async fn shutdown(&self) {
        info!("Shutting down MySQL tunnel server...");
        self.registry.close_all().await;
    }

    /// Open a connection with the configured endpoints (used by connect tool)
    async fn connect(&self) -> CallToolResult {
        let connect_timeout = Duration::from_secs(self.config.timeout_secs);
        let connection = match TunneledConnection::with_transport(
            self.config.endpoint.clone(),
            self.config.target.clone(),
            SshTunneler::new().with_connect_timeout(connect_timeout),
            MySqlDriver::new().with_connect_timeout(connect_timeout),
        ) {
            Ok(connection) => connection,
            Err(e) => return error_result(format!("Error: {}", e)),
        };

        match self.registry.register(connection).await {
            Ok(id) => json_result(json!({
                "connection_id": id,
                "message": "Connection established",
            })),
            Err(e) => {
                error!("connect tool failed: {}", e);
                error_result(format!("Failed to connect: {}", e))
            }
        }
    }

    /// Run a query (used by query tool)
    async fn query(&self, params: QueryParams) -> CallToolResult {
        debug!("query tool called on {}", params.connection_id);

        let query = match sanitize_query(&params.query, self.config.max_chars) {
            Ok(query) => query,
            Err(e) => {
                error!("Query sanitization failed: {}", e);
                return error_result(format!("Error: {}", e));
            }
        };

        match self
            .registry
            .execute(&params.connection_id, &query, &params.params)
            .await
        {
            Ok(QueryOutcome::Rows(rows)) => json_result(json!({
                "row_count": rows.len(),
                "data": rows,
            })),
            Ok(QueryOutcome::Affected(affected)) => json_result(json!({
                "affected_rows": affected,
            })),
            Err(e) => {
                error!("Query execution failed: {}", e);
                error_result(format!("Error: {}", e))
            }
        }
    }

    /// Run a SHOW statement and collect one column per row
    async fn list(&self, connection_id: &str, statement: &str, column: &str) -> CallToolResult {
        match self.registry.execute(connection_id, statement, &[]).await {
            Ok(QueryOutcome::Rows(rows)) => json_result(Value::Array(column_values(&rows, column))),
            Ok(QueryOutcome::Affected(_)) => json_result(json!([])),
            Err(e) => {
                error!("{} failed: {}", statement, e);
                error_result(format!("Error: {}", e))
            }
        }
    }

    /// Probe a connection (used by status tool)
    async fn status(&self, connection_id: &str) -> CallToolResult {
        match self.registry.status(connection_id).await {
            Some(status) => match serde_json::to_value(&status) {
                Ok(value) => json_result(value),
                Err(e) => error_result(format!("Error: {}", e)),
            },
            None => json_result(json!({
                "connected": false,
                "message": "No active connection",
            })),
        }
    }

    /// Close a connection (used by disconnect tool)
    async fn disconnect(&self, connection_id: &str) -> CallToolResult {
        if self.registry.disconnect(connection_id).await {
            json_result(json!({ "message": "Connection closed" }))
        } else {
            error_result(format!("Unknown connection: {}", connection_id))
        }
    }

    fn connect_tool() -> Tool {
        Tool::new(
            "connect",
            "Open an SSH tunnel and a MySQL connection through it using the server's configured endpoints. Returns a connection_id.",
            Arc::new(JsonObject::from_iter([
                ("type".to_string(), json!("object")),
                ("properties".to_string(), json!({})),
            ])),
        )
    }

    fn query_tool() -> Tool {
        Tool::new(
            "query",
            "Run SQL on an open connection. SELECT/SHOW/DESCRIBE/EXPLAIN return rows; other statements are committed and return the affected row count. Use ? placeholders with params.",
            input_schema::<QueryParams>(),
        )
    }

    fn list_databases_tool() -> Tool {
        Tool::new(
            "list-databases",
            "List databases visible to the MySQL user.",
            input_schema::<ConnectionParams>(),
        )
    }

    fn list_tables_tool() -> Tool {
        Tool::new(
            "list-tables",
            "List tables in the connection's database.",
            input_schema::<ConnectionParams>(),
        )
    }

    fn status_tool() -> Tool {
        Tool::new(
            "status",
            "Check whether a connection is alive and show what it is connected to.",
            input_schema::<ConnectionParams>(),
        )
    }

    fn disconnect_tool() -> Tool {
        Tool::new(
            "disconnect",
            "Close the MySQL connection and its SSH tunnel.",
            input_schema::<ConnectionParams>(),
        )
    }
}

/// JSON schema for a tool's parameter type
fn input_schema<T: JsonSchema>() -> Arc<JsonObject> {
    let schema = serde_json::to_value(schemars::schema_for!(T)).unwrap_or_default();
    Arc::new(schema.as_object().cloned().unwrap_or_default())
}

fn parse_args<T: DeserializeOwned>(
    arguments: Option<JsonObject>,
) -> std::result::Result<T, McpError> {
    let args = Value::Object(arguments.unwrap_or_default());
    serde_json::from_value(args).map_err(|e| McpError::invalid_params(e.to_string(), None))
}

fn json_result(value: Value) -> CallToolResult {
    let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
    CallToolResult::success(vec![Content::text(text)])
}

fn error_result(message: impl Into<String>) -> CallToolResult {
    CallToolResult::error(vec![Content::text(message.into())])
}

/// Values of `column` in each row, or of the first column when absent
fn column_values(rows: &[Row], column: &str) -> Vec<Value> {
    rows.iter()
        .filter_map(|row| row.get(column).or_else(|| row.values().next()).cloned())
        .collect()
}

impl ServerHandler for MysqlTunnelServer {
    /// Return server information
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(format!(
                "MySQL tunnel MCP Server v{} - MySQL '{}' via {}@{}:{}",
                env!("CARGO_PKG_VERSION"),
                self.config.target.database,
                self.config.endpoint.username,
                self.config.endpoint.host,
                self.config.endpoint.port,
            )),
        }
    }

    /// List available tools
    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<ListToolsResult, McpError> {
        debug!("list_tools called");

        Ok(ListToolsResult {
            tools: vec![
                Self::connect_tool(),
                Self::query_tool(),
                Self::list_databases_tool(),
                Self::list_tables_tool(),
                Self::status_tool(),
                Self::disconnect_tool(),
            ],
            next_cursor: None,
            meta: Default::default(),
        })
    }

    /// Call a tool
    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        let tool_name: &str = request.name.as_ref();
        debug!("call_tool called: {:?}", tool_name);

        match tool_name {
            "connect" => Ok(self.connect().await),
            "query" => {
                let params: QueryParams = parse_args(request.arguments)?;
                Ok(self.query(params).await)
            }
            "list-databases" | "list_databases" => {
                let params: ConnectionParams = parse_args(request.arguments)?;
                Ok(self
                    .list(&params.connection_id, "SHOW DATABASES", "Database")
                    .await)
            }
            "list-tables" | "list_tables" => {
                let params: ConnectionParams = parse_args(request.arguments)?;
                Ok(self.list(&params.connection_id, "SHOW TABLES", "").await)
            }
            "status" => {
                let params: ConnectionParams = parse_args(request.arguments)?;
                Ok(self.status(&params.connection_id).await)
            }
            "disconnect" => {
                let params: ConnectionParams = parse_args(request.arguments)?;
                Ok(self.disconnect(&params.connection_id).await)
            }
            _ => Err(McpError::invalid_params(
                format!("Unknown tool: {}", tool_name),
                None,
            )),
        }
    }
}
