use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use slotwise::api::{self, AppState};
use slotwise::config::Config;
use slotwise::schema::SchemaInstantiator;
use slotwise::store::postgres::{self, PgBackend};
use slotwise::tenant::TenantCache;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    slotwise::observability::init(config.metrics_port)?;

    let pool = postgres::connect(
        &config.database_url,
        config.max_connections,
        config.acquire_timeout,
    )
    .await?;
    postgres::ensure_directory(&pool).await?;
    let backend = Arc::new(PgBackend::new(pool.clone()));

    // Refuse to serve without a tenant map.
    let tenants = Arc::new(TenantCache::new(backend.clone(), config.tenant_refresh));
    tenants.start().await?;

    let state = AppState {
        tenants: tenants.clone(),
        schemas: Arc::new(SchemaInstantiator::new(backend.clone())),
        sessions: backend,
    };

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("slotwise listening on {addr}");
    info!("  max_connections: {}", config.max_connections);
    info!("  tenant_refresh: {:?}", tenants.refresh_interval());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("draining background tasks...");
    tenants.stop().await;
    pool.close().await;
    info!("slotwise stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received, stopping listener");
}
