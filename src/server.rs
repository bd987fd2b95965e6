//! MCP server initialization for stdio and streamable HTTP transports.
//!
//! Provides [`serve_stdio`] and [`serve_http`] entry points that wire up the
//! database, embedding provider, conflict cache, and change listener into a
//! running server.

use crate::config::LoreConfig;
use crate::db;
use crate::embedding;
use crate::knowledge::conflicts::ConflictCache;
use crate::knowledge::policy;
use crate::notify::{ChangeListener, LogChangeListener};
use crate::tools::LoreTools;
use anyhow::Result;
use rmcp::ServiceExt;
use std::sync::{Arc, Mutex};

/// Shared setup: open the db, install policy, create the embedding provider
/// and conflict cache.
fn setup_shared_state(config: LoreConfig) -> Result<LoreTools> {
    let db_path = config.resolved_db_path();
    let (conn, fts_enabled) = db::open_database(&db_path)?;
    tracing::info!(db = %db_path.display(), fts_enabled, "database ready");

    policy::configure(&config.policy);

    let provider = embedding::create_provider(&config.embedding)?;
    let embedder: Option<Arc<dyn embedding::EmbeddingProvider>> = provider.map(Arc::from);
    match &embedder {
        Some(_) => tracing::info!(provider = %config.embedding.provider, "embedding provider ready"),
        None => tracing::info!("semantic scorer disabled; lexical and graph carry its weight"),
    }

    let db = Arc::new(Mutex::new(conn));
    let conflicts = Arc::new(ConflictCache::durable());
    let listener: Arc<dyn ChangeListener> = Arc::new(LogChangeListener);
    let config = Arc::new(config);

    Ok(LoreTools::new(db, embedder, conflicts, listener, config, fts_enabled))
}

/// Serve MCP over stdin/stdout. Returns once the client hangs up.
pub async fn serve_stdio(config: LoreConfig) -> Result<()> {
    let tools = setup_shared_state(config)?;

    let running = tools.serve(rmcp::transport::stdio()).await?;
    tracing::info!("serving MCP on stdio");

    running.waiting().await?;
    tracing::info!("stdio client disconnected, exiting");
    Ok(())
}

/// Serve MCP over streamable HTTP at `/mcp` until ctrl-c.
pub async fn serve_http(config: LoreConfig) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let tools = setup_shared_state(config)?;

    let sessions =
        rmcp::transport::streamable_http_server::session::local::LocalSessionManager::default();
    let service = rmcp::transport::streamable_http_server::StreamableHttpService::new(
        move || Ok(tools.clone()),
        sessions.into(),
        Default::default(),
    );
    let app = axum::Router::new().nest_service("/mcp", service);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("serving MCP at http://{addr}/mcp");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("HTTP server stopped");
    Ok(())
}

/// Resolves when the operator asks the process to stop.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown requested"),
        Err(err) => {
            // no signal stream means no clean way down; keep serving
            tracing::error!(%err, "cannot listen for ctrl-c, running until killed");
            std::future::pending::<()>().await;
        }
    }
}
