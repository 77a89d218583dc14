//! MySQL tunnel MCP Server - Entry point
//!
//! Parses CLI arguments, validates configuration, starts the MCP server
//! on stdio transport, and closes every tunneled connection on shutdown.

use clap::Parser;
use rmcp::service::ServiceExt;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use mysql_tunnel::config::{Args, Config};
use mysql_tunnel::error::{MysqlTunnelError, Result};
use mysql_tunnel::server::MysqlTunnelServer;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries MCP JSON-RPC
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.as_str()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_args(args)?;

    info!(
        "MySQL tunnel MCP Server v{} starting...",
        env!("CARGO_PKG_VERSION")
    );
    info!(
        "Tunnel {}@{}:{} -> {}:{}/{}",
        config.endpoint.username,
        config.endpoint.host,
        config.endpoint.port,
        config.target.host,
        config.target.port,
        config.target.database
    );
    info!(
        "Timeout: {}s, Max chars: {}",
        config.timeout_secs,
        config
            .max_chars
            .map_or("unlimited".to_string(), |n| n.to_string())
    );

    let server = MysqlTunnelServer::new(config);
    let poll_handle = server.start_liveness_poll();

    let server_for_shutdown = server.clone();
    let shutdown_handle = tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = terminate_signal() => {
                info!("Received SIGTERM, shutting down...");
            }
        }

        server_for_shutdown.shutdown().await;
        std::process::exit(0);
    });

    info!("MySQL tunnel MCP Server running on stdio");

    let served = match server.clone().serve(rmcp::transport::io::stdio()).await {
        Ok(running_server) => {
            if let Err(e) = running_server.waiting().await {
                error!("Server error: {}", e);
            }
            Ok(())
        }
        Err(e) => {
            error!("Failed to start MCP server: {}", e);
            Err(MysqlTunnelError::connection(e.to_string()))
        }
    };

    shutdown_handle.abort();
    if let Some(handle) = poll_handle {
        handle.abort();
    }
    server.shutdown().await;

    info!("MySQL tunnel MCP Server stopped");
    served
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}
