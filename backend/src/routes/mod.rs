//! Route definitions for the inventory engine

use axum::{
    routing::{get, post},
    Router,
};

use crate::{handlers, AppState};

/// Create API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/holds", hold_routes())
        .nest("/adjustments", adjustment_routes())
        .route("/receipts", post(handlers::record_receipt))
        .route(
            "/stock/:branch_id/:ingredient_id",
            get(handlers::get_stock).put(handlers::set_stock),
        )
        .route("/costs/:branch_id/:ingredient_id", get(handlers::get_cost))
        .route("/conversions/convert", post(handlers::convert))
}

/// Checkout hold routes
fn hold_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::check_and_reserve))
        .route("/commit", post(handlers::commit_hold))
        .route("/release", post(handlers::release_hold))
        .route("/by-order/:order_id", get(handlers::hold_by_order))
        .route("/:hold_id", get(handlers::get_hold))
}

/// Stock adjustment routes
fn adjustment_routes() -> Router<AppState> {
    Router::new()
        .route("/daily", post(handlers::reconcile_daily))
        .route("/manager", post(handlers::manager_adjustment))
        .route(
            "/:id",
            get(handlers::get_adjustment)
                .put(handlers::update_adjustment)
                .delete(handlers::delete_adjustment),
        )
        .route("/:id/commit", post(handlers::commit_adjustment))
        .route("/:id/entries", get(handlers::list_entries))
}
