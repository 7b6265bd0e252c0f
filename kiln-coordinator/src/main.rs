use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use kiln_coordinator::repository::MemoryMarkerCache;
use kiln_coordinator::state::fs_blob_store;
use kiln_coordinator::{AppState, Config, Stores, api, db};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kiln_coordinator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Kiln Coordinator...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let stores = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");

            let pool = db::create_pool(database_url)
                .await
                .context("Failed to create database pool")?;

            tracing::info!("Database connection pool created");

            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;

            Stores::postgres(pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, jobs and runners are kept in memory");
            Stores::in_memory()
        }
    };

    tokio::fs::create_dir_all(&config.artifacts_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create artifacts directory {}",
                config.artifacts_dir.display()
            )
        })?;
    let stores = stores.with_blobs(Arc::new(fs_blob_store(&config)));

    let stores = if config.poll_marker_cache {
        let markers = Arc::new(MemoryMarkerCache::new());
        spawn_marker_purge(Arc::clone(&markers), config.poll_marker_ttl);
        stores.with_markers(markers)
    } else {
        tracing::info!("Poll marker cache disabled");
        stores.without_marker_cache()
    };

    let state = AppState::new(stores, &config);

    for (token, description) in &config.runner_tokens {
        state
            .runners
            .provision(token.clone(), description)
            .await
            .context("Failed to provision runner")?;
    }

    // Build router with all API endpoints
    let app = api::create_router(state);

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Kiln Coordinator stopped");
    Ok(())
}

/// Periodically drops expired poll markers so idle runners do not pile up
fn spawn_marker_purge(markers: Arc<MemoryMarkerCache>, ttl: Duration) {
    let period = ttl.min(Duration::from_secs(300));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let purged = markers.purge_expired();
            if purged > 0 {
                tracing::debug!("Purged {} expired poll markers", purged);
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
