//! Low-stock alert evaluation

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Stock;
use crate::types::{BranchId, IngredientId};

/// Alert severity, from mildest to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Warning,
    Urgent,
    Critical,
    OutOfStock,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Warning => "WARNING",
            AlertSeverity::Urgent => "URGENT",
            AlertSeverity::Critical => "CRITICAL",
            AlertSeverity::OutOfStock => "OUT_OF_STOCK",
        }
    }
}

/// Severity for an available quantity against its reorder threshold
///
/// `available <= 0` is out of stock. With a positive threshold the ratio
/// `available / threshold` picks CRITICAL (<= 0.25), URGENT (<= 0.5) or
/// WARNING (<= 1). No threshold means only out-of-stock alerts.
pub fn evaluate_alert(available: Decimal, threshold: Decimal) -> Option<AlertSeverity> {
    if available <= Decimal::ZERO {
        return Some(AlertSeverity::OutOfStock);
    }
    if threshold <= Decimal::ZERO {
        return None;
    }
    let ratio = available / threshold;
    if ratio <= Decimal::new(25, 2) {
        Some(AlertSeverity::Critical)
    } else if ratio <= Decimal::new(5, 1) {
        Some(AlertSeverity::Urgent)
    } else if ratio <= Decimal::ONE {
        Some(AlertSeverity::Warning)
    } else {
        None
    }
}

/// Alert raised for a branch ingredient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockAlert {
    pub branch_id: BranchId,
    pub ingredient_id: IngredientId,
    pub severity: AlertSeverity,
    pub available: Decimal,
    pub threshold: Decimal,
    pub unit_code: String,
    pub raised_at: DateTime<Utc>,
}

impl StockAlert {
    /// Alert for the row's current state, if it warrants one
    pub fn for_stock(stock: &Stock, now: DateTime<Utc>) -> Option<Self> {
        let available = stock.available();
        evaluate_alert(available, stock.threshold).map(|severity| Self {
            branch_id: stock.branch_id,
            ingredient_id: stock.ingredient_id,
            severity,
            available,
            threshold: stock.threshold,
            unit_code: stock.unit.clone(),
            raised_at: now,
        })
    }
}
