mod appliance;
mod config;
mod error;
mod fetcher;
mod orchestrator_job;
mod routes_backup;
mod script_status;
mod session_sweeper;
mod state;
mod types;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header::CONTENT_TYPE, HeaderValue, Method};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::appliance::ApplianceClient;
use crate::config::AppConfig;
use crate::fetcher::SshFetcher;
use crate::orchestrator_job::BackupDeps;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env()?;

    let trigger = ApplianceClient::new(&cfg).context("Failed to build appliance HTTP client")?;
    let deps = Arc::new(BackupDeps {
        fetcher: Arc::new(SshFetcher::new(cfg.network_timeout)),
        trigger: Arc::new(trigger),
        remote_path: cfg.backup_remote_path.clone(),
        decode: cfg.decode.clone(),
        network_timeout: cfg.network_timeout,
        fetch_timeout: cfg.fetch_timeout,
    });
    let app_state = Arc::new(AppState::new(cfg.clone(), deps));

    let cancel = CancellationToken::new();
    tokio::spawn(crate::session_sweeper::run_session_sweeper(
        app_state.clone(),
        cancel.clone(),
    ));

    let origin: HeaderValue = cfg
        .cors_origin
        .parse()
        .with_context(|| format!("Invalid CORS_ORIGIN: {}", cfg.cors_origin))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    let app = crate::routes_backup::router(app_state).layer(cors);

    let addr = &cfg.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %addr, remote_path = %cfg.backup_remote_path, "orchestrator listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
    cancel.cancel();
}
