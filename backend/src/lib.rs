//! Inventory Reservation & Reconciliation Engine
//!
//! Holds ingredient stock against customer carts, commits or releases those
//! holds, reconciles recorded usage against physical counts and keeps a
//! weighted-average cost per branch ingredient.

use std::sync::Arc;

use axum::{routing::get, Router};
use sqlx::PgPool;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod config;
pub mod error;
pub mod external;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;

pub use config::Config;

use config::{AlertConfig, AlertSink};
use error::{AppError, AppResult};
use external::{AlertPublisher, PgAlertPublisher, TracingAlertPublisher, WebhookAlertPublisher};
use services::Services;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub config: Arc<Config>,
    /// Present only with the Postgres backend; used by the health check
    pub db: Option<PgPool>,
}

/// Create the application router with all routes and middleware
pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", routes::api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Pick the alert sink named in configuration
pub fn alert_publisher(config: &AlertConfig, db: Option<&PgPool>) -> AppResult<Arc<dyn AlertPublisher>> {
    match config.sink {
        AlertSink::Log => Ok(Arc::new(TracingAlertPublisher)),
        AlertSink::Database => {
            let db = db.ok_or_else(|| {
                AppError::Configuration("alerts.sink = database requires the postgres storage backend".into())
            })?;
            Ok(Arc::new(PgAlertPublisher::new(db.clone())))
        }
        AlertSink::Webhook => {
            let url = config
                .webhook_url
                .clone()
                .ok_or_else(|| AppError::Configuration("alerts.webhook_url is required for the webhook sink".into()))?;
            Ok(Arc::new(WebhookAlertPublisher::new(url, config.webhook_secret.clone())))
        }
    }
}

async fn root() -> &'static str {
    "Inventory Reservation & Reconciliation Engine API v1"
}
