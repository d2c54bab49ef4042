//! Inventory engine HTTP server

use std::{net::SocketAddr, sync::Arc, time::Duration};

use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inventory_engine::{
    alert_publisher,
    config::StorageBackend,
    create_app,
    services::Services,
    store::{MemoryStore, PgStore, Stores},
    AppState, Config,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "inventory_server=debug,inventory_engine=debug,tower_http=debug,sqlx=warn".into()
    });
    if config.is_production() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting Inventory Engine Server");
    tracing::info!("Environment: {}", config.environment);

    let (stores, db) = match config.storage.backend {
        StorageBackend::Postgres => {
            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .min_connections(config.database.min_connections)
                .acquire_timeout(Duration::from_secs(30))
                .connect(&config.database.url)
                .await?;
            tracing::info!("Database connection established");

            // Run migrations in development
            if config.environment == "development" {
                tracing::info!("Running database migrations...");
                sqlx::migrate!("./migrations").run(&pool).await?;
                tracing::info!("Migrations completed");
            }

            (Stores::postgres(PgStore::new(pool.clone())), Some(pool))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; state is lost on restart");
            (Stores::memory(MemoryStore::new()), None)
        }
    };

    let alerts = alert_publisher(&config.alerts, db.as_ref())?;
    let services = Services::new(stores, alerts, &config.inventory);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let jobs = services.scheduler(config.scheduler.clone()).spawn(shutdown_rx);

    let state = AppState {
        services,
        config: Arc::new(config.clone()),
        db,
    };
    let app = create_app(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown_tx.send(true).ok();
    for job in jobs {
        if let Err(e) = job.await {
            tracing::error!(error = %e, "Scheduler job panicked");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutting down");
}
