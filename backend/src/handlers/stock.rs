//! HTTP handlers for stock levels, receipts, costs and unit conversion

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::models::{normalize_unit_code, BranchId, IngredientId, InventoryCost, Stock, StockKey};
use crate::services::{ReceiptInput, ReceiptOutcome};
use crate::AppState;

/// Stock row with its derived available quantity
#[derive(Debug, Serialize)]
pub struct StockResponse {
    #[serde(flatten)]
    pub stock: Stock,
    pub available: Decimal,
}

impl From<Stock> for StockResponse {
    fn from(stock: Stock) -> Self {
        let available = stock.available();
        Self { stock, available }
    }
}

/// Input for setting up or correcting a stock row's on-hand level
#[derive(Debug, Deserialize, Validate)]
pub struct SetStockInput {
    pub quantity: Decimal,
    #[validate(length(min = 1, max = 16, message = "Unit code must be 1-16 characters"))]
    pub unit: String,
    #[serde(default)]
    pub threshold: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct ConvertRequest {
    pub ingredient_id: IngredientId,
    pub from_unit: String,
    pub to_unit: String,
    pub quantity: Decimal,
    pub branch_id: Option<BranchId>,
}

#[derive(Debug, Serialize)]
pub struct ConvertResponse {
    pub quantity: Decimal,
    pub factor: Decimal,
}

/// Record a goods receipt
pub async fn record_receipt(
    State(state): State<AppState>,
    Json(input): Json<ReceiptInput>,
) -> AppResult<(StatusCode, Json<ReceiptOutcome>)> {
    let outcome = state.services.costs.record_receipt(input, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn get_stock(
    State(state): State<AppState>,
    Path((branch_id, ingredient_id)): Path<(BranchId, IngredientId)>,
) -> AppResult<Json<StockResponse>> {
    let stock = state
        .services
        .ledger
        .stock(StockKey::new(branch_id, ingredient_id))
        .await?;
    Ok(Json(stock.into()))
}

/// Set on-hand quantity, unit and reorder threshold; reservations are kept
///
/// Rejected when on-hand would drop below reserved or the unit changes while
/// anything is reserved.
pub async fn set_stock(
    State(state): State<AppState>,
    Path((branch_id, ingredient_id)): Path<(BranchId, IngredientId)>,
    Json(input): Json<SetStockInput>,
) -> AppResult<Json<StockResponse>> {
    input.validate()?;
    crate::models::validate_non_negative_quantity(input.quantity)
        .map_err(|m| AppError::validation("quantity", m))?;
    crate::models::validate_non_negative_quantity(input.threshold)
        .map_err(|m| AppError::validation("threshold", m))?;

    let mut stock = Stock::new(branch_id, ingredient_id, normalize_unit_code(&input.unit), Utc::now());
    stock.quantity = input.quantity;
    stock.threshold = input.threshold;
    let stock = state.services.ledger.upsert(stock).await?;
    Ok(Json(stock.into()))
}

pub async fn get_cost(
    State(state): State<AppState>,
    Path((branch_id, ingredient_id)): Path<(BranchId, IngredientId)>,
) -> AppResult<Json<InventoryCost>> {
    let cost = state
        .services
        .costs
        .average_cost(StockKey::new(branch_id, ingredient_id))
        .await?;
    Ok(Json(cost))
}

/// Convert a quantity between units for an ingredient
pub async fn convert(
    State(state): State<AppState>,
    Json(request): Json<ConvertRequest>,
) -> AppResult<Json<ConvertResponse>> {
    let rate = state
        .services
        .resolver
        .resolve(request.ingredient_id, &request.from_unit, &request.to_unit, request.branch_id)
        .await?;
    Ok(Json(ConvertResponse {
        quantity: rate.apply(request.quantity),
        factor: rate.factor(),
    }))
}
