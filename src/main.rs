use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use simple_content::config::{Config, RepositoryBackend};
use simple_content::db::Database;
use simple_content::repository::{ContentRepository, MemoryRepository, SqliteRepository};
use simple_content::services::{ContentService, ServiceOptions};
use simple_content::{create_router, storage, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "simple_content=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting simple-content...");

    // Load configuration
    let config = Config::load()?;
    let config = Arc::new(config);
    tracing::info!("Configuration loaded");

    // Initialize repository
    let repository: Arc<dyn ContentRepository> = match config.repository.backend {
        RepositoryBackend::Memory => {
            tracing::warn!("Using in-memory repository, records are lost on restart");
            Arc::new(MemoryRepository::new())
        }
        RepositoryBackend::Sqlite => {
            let db = Database::new(&config.repository.path, config.repository.max_connections).await?;
            db.run_migrations().await?;
            tracing::info!("Database initialized");
            Arc::new(SqliteRepository::new(db))
        }
    };

    // Initialize storage
    let storage = storage::build_provider(&config.storage)?;

    let service = ContentService::new(
        storage,
        repository,
        ServiceOptions::from_config(&config.content),
    );

    // Create app state
    let state = AppState {
        service: Arc::new(service),
        config: config.clone(),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
