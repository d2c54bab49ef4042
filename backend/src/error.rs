//! Error handling for the inventory engine
//!
//! Every failure a caller can act on carries structured detail (ingredient,
//! required vs. available, unit) so clients can render a useful message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveTime;
use serde::Serialize;
use shared::{BranchId, IngredientId, LedgerError, Shortage};
use thiserror::Error;
use uuid::Uuid;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Stock availability
    #[error("Insufficient stock for {} ingredient(s)", shortages.len())]
    InsufficientStock { shortages: Vec<Shortage> },

    #[error("No stock row for branch {branch_id}, ingredient {ingredient_id}")]
    StockNotFound {
        branch_id: BranchId,
        ingredient_id: IngredientId,
    },

    // Unit conversion
    #[error("No conversion for ingredient {ingredient_id} from {from_unit} to {to_unit}")]
    ConversionNotFound {
        ingredient_id: IngredientId,
        from_unit: String,
        to_unit: String,
    },

    #[error("Units {from_unit} and {to_unit} share a dimension but not a base unit")]
    IncompatibleBaseUnit { from_unit: String, to_unit: String },

    // Reservations
    #[error("No recipe found for any ordered item")]
    NoRecipeFound,

    #[error("No active hold {0}")]
    NoActiveHold(Uuid),

    #[error("A cart id or guest id is required")]
    InvalidSession,

    // Adjustments
    #[error("Adjustment {0} is not pending")]
    AdjustmentNotPending(Uuid),

    #[error("Adjustment {0} is already committed")]
    AdjustmentAlreadyCommitted(Uuid),

    #[error("Adjustments are blocked during business hours ({opening}-{closing})")]
    AdjustmentBlockedDuringBusiness { opening: NaiveTime, closing: NaiveTime },

    #[error("A reason is required to force an adjustment")]
    ForceReasonRequired,

    #[error("Physical quantity equals the recorded quantity")]
    NoStockChange,

    // Validation errors
    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Internal errors
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Error code used in API responses and logs
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            AppError::StockNotFound { .. } => "STOCK_NOT_FOUND",
            AppError::ConversionNotFound { .. } => "CONVERSION_NOT_FOUND",
            AppError::IncompatibleBaseUnit { .. } => "INCOMPATIBLE_BASE_UNIT",
            AppError::NoRecipeFound => "NO_RECIPE_FOUND",
            AppError::NoActiveHold(_) => "NO_ACTIVE_HOLD",
            AppError::InvalidSession => "INVALID_SESSION",
            AppError::AdjustmentNotPending(_) => "ADJUSTMENT_NOT_PENDING",
            AppError::AdjustmentAlreadyCommitted(_) => "ADJUSTMENT_ALREADY_COMMITTED",
            AppError::AdjustmentBlockedDuringBusiness { .. } => "ADJUSTMENT_BLOCKED_DURING_BUSINESS",
            AppError::ForceReasonRequired => "FORCE_REASON_REQUIRED",
            AppError::NoStockChange => "NO_STOCK_CHANGE",
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::Internal(_) | AppError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::InsufficientStock { .. }
            | AppError::AdjustmentNotPending(_)
            | AppError::AdjustmentAlreadyCommitted(_) => StatusCode::CONFLICT,
            AppError::StockNotFound { .. } | AppError::NoActiveHold(_) | AppError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            AppError::ConversionNotFound { .. }
            | AppError::IncompatibleBaseUnit { .. }
            | AppError::NoRecipeFound
            | AppError::NoStockChange => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::AdjustmentBlockedDuringBusiness { .. } => StatusCode::LOCKED,
            AppError::InvalidSession | AppError::ForceReasonRequired | AppError::Validation { .. } => {
                StatusCode::BAD_REQUEST
            }
            AppError::Configuration(_)
            | AppError::DatabaseError(_)
            | AppError::Internal(_)
            | AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientStock(shortage) => AppError::InsufficientStock {
                shortages: vec![shortage],
            },
            LedgerError::NonPositiveQuantity(qty) => {
                AppError::validation("quantity", format!("Quantity must be positive, got {qty}"))
            }
            LedgerError::StockNotFound(key) => AppError::StockNotFound {
                branch_id: key.branch_id,
                ingredient_id: key.ingredient_id,
            },
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let (field, message) = errors
            .field_errors()
            .into_iter()
            .next()
            .map(|(field, errs)| {
                let message = errs
                    .first()
                    .and_then(|e| e.message.as_ref().map(|m| m.to_string()))
                    .unwrap_or_else(|| format!("{field} is invalid"));
                (field.to_string(), message)
            })
            .unwrap_or_else(|| ("request".to_string(), errors.to_string()));
        AppError::Validation { field, message }
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let message = match &self {
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            AppError::InternalError(_) => "An internal server error occurred".to_string(),
            other => other.to_string(),
        };

        let field = match &self {
            AppError::Validation { field, .. } => Some(field.clone()),
            _ => None,
        };

        let details = match &self {
            AppError::InsufficientStock { shortages } => Some(serde_json::json!({ "shortages": shortages })),
            AppError::ConversionNotFound {
                ingredient_id,
                from_unit,
                to_unit,
            } => Some(serde_json::json!({
                "ingredient_id": ingredient_id,
                "from_unit": from_unit,
                "to_unit": to_unit,
            })),
            AppError::StockNotFound {
                branch_id,
                ingredient_id,
            } => Some(serde_json::json!({
                "branch_id": branch_id,
                "ingredient_id": ingredient_id,
            })),
            AppError::AdjustmentBlockedDuringBusiness { opening, closing } => Some(serde_json::json!({
                "opening_time": opening,
                "closing_time": closing,
            })),
            _ => None,
        };

        // Log the error for debugging
        if status.is_server_error() {
            tracing::error!(code = self.code(), "Error: {:?}", self);
        } else {
            tracing::debug!(code = self.code(), "Request rejected: {}", self);
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message,
                field,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for services and handlers
pub type AppResult<T> = Result<T, AppError>;
