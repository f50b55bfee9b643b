//! CodeWeaver MCP server.
//!
//! Exposes `find_code` (the only agent-facing operation) over MCP stdio, and
//! a read-only management HTTP server on its own port (spec.md §6).
//!
//! ## Usage
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "codeweaver": {
//!       "command": "codeweaver-server"
//!     }
//!   }
//! }
//! ```

use std::env;
use std::sync::Arc;

use anyhow::Result;
use rmcp::transport::stdio;
use rmcp::ServiceExt;
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod http_api;
mod state;
mod tools;

use config::AppConfig;
use state::BackgroundState;
use tools::CodeWeaverService;

#[tokio::main]
async fn main() -> Result<()> {
    // stdout is reserved for the MCP protocol; all logging goes to stderr.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .filter_module("ort", log::LevelFilter::Off)
        .try_init()
        .ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .try_init()
        .ok();

    let root = env::args().nth(1).unwrap_or_else(|| ".".to_string());
    let config = AppConfig::default();

    tracing::info!(root = %root, "starting CodeWeaver MCP server");

    let state = Arc::new(BackgroundState::start(&root, config).await?);

    let management_addr = state.config.read().await.server.management_addr()?;
    let http_router = http_api::router(state.clone());
    let management_listener = tokio::net::TcpListener::bind(management_addr).await?;
    tracing::info!(addr = %management_addr, "management HTTP server listening");
    let management_server = tokio::spawn(async move {
        if let Err(e) = axum::serve(management_listener, http_router).await {
            tracing::error!("management HTTP server stopped: {e}");
        }
    });

    let service = CodeWeaverService::new(state);
    let server = service.serve(stdio()).await?;
    server.waiting().await?;

    management_server.abort();
    tracing::info!("CodeWeaver MCP server stopped");
    Ok(())
}
