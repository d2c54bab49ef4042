//! HTTP handlers for checkout holds

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::Reservation;
use crate::services::{CheckAndReserveInput, HoldSummary};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CommitHoldRequest {
    pub hold_id: Uuid,
    pub order_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseHoldRequest {
    pub hold_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct HoldLookupResponse {
    pub hold_id: Option<Uuid>,
}

/// Check availability and place a hold
pub async fn check_and_reserve(
    State(state): State<AppState>,
    Json(input): Json<CheckAndReserveInput>,
) -> AppResult<(StatusCode, Json<HoldSummary>)> {
    let summary = state
        .services
        .reservations
        .check_and_reserve(input, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

/// Deduct a hold after payment
pub async fn commit_hold(
    State(state): State<AppState>,
    Json(request): Json<CommitHoldRequest>,
) -> AppResult<StatusCode> {
    state
        .services
        .reservations
        .commit(request.hold_id, request.order_id, Utc::now())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Give a hold's stock back
pub async fn release_hold(
    State(state): State<AppState>,
    Json(request): Json<ReleaseHoldRequest>,
) -> AppResult<StatusCode> {
    state
        .services
        .reservations
        .release(request.hold_id, Utc::now())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Find the hold an order was committed from
pub async fn hold_by_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<HoldLookupResponse>> {
    let hold_id = state.services.reservations.hold_id_by_order(order_id).await?;
    Ok(Json(HoldLookupResponse { hold_id }))
}

pub async fn get_hold(
    State(state): State<AppState>,
    Path(hold_id): Path<Uuid>,
) -> AppResult<Json<Vec<Reservation>>> {
    let rows = state.services.reservations.hold(hold_id).await?;
    Ok(Json(rows))
}
