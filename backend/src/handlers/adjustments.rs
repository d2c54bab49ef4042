//! HTTP handlers for stock adjustments

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{StockAdjustment, StockAdjustmentEntry};
use crate::services::{DailyReconcileInput, ManagerAdjustmentInput, ReconcileSummary, UpdateAdjustmentInput};
use crate::AppState;

/// Record end-of-day usage counts
pub async fn reconcile_daily(
    State(state): State<AppState>,
    Json(input): Json<DailyReconcileInput>,
) -> AppResult<Json<ReconcileSummary>> {
    let summary = state.services.adjustments.reconcile(input, Utc::now()).await?;
    Ok(Json(summary))
}

/// Correct stock to a manager's physical count
pub async fn manager_adjustment(
    State(state): State<AppState>,
    Json(input): Json<ManagerAdjustmentInput>,
) -> AppResult<(StatusCode, Json<StockAdjustment>)> {
    let adjustment = state
        .services
        .adjustments
        .manager_adjustment(input, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(adjustment)))
}

pub async fn commit_adjustment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.services.adjustments.commit_adjustment(id, Utc::now()).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_adjustment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<StockAdjustment>> {
    let adjustment = state.services.adjustments.adjustment(id).await?;
    Ok(Json(adjustment))
}

/// Replace the counted quantity of a pending adjustment
pub async fn update_adjustment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateAdjustmentInput>,
) -> AppResult<Json<StockAdjustment>> {
    let adjustment = state.services.adjustments.update_adjustment(id, input).await?;
    Ok(Json(adjustment))
}

pub async fn delete_adjustment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.services.adjustments.delete_adjustment(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_entries(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<StockAdjustmentEntry>>> {
    let entries = state.services.adjustments.entries(id).await?;
    Ok(Json(entries))
}
