//! Goods receipts and weighted-average cost

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use shared::{normalize_unit_code, round_quantity, BranchId, IngredientId, InventoryCost, Stock, StockKey};

use super::{validate_positive, validate_price, StockLedger, UnitConversionResolver};
use crate::error::{AppError, AppResult};

/// Input for recording a goods receipt
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ReceiptInput {
    pub branch_id: BranchId,
    pub ingredient_id: IngredientId,
    #[validate(custom = "validate_positive")]
    pub quantity: Decimal,
    /// Purchase unit; converted to the stock unit when they differ
    #[validate(length(min = 1, max = 16, message = "Unit code must be 1-16 characters"))]
    pub unit_code: String,
    #[validate(custom = "validate_price")]
    pub unit_price: Decimal,
}

/// Stock and cost after a receipt
#[derive(Debug, Clone, Serialize)]
pub struct ReceiptOutcome {
    pub stock: Stock,
    pub cost: InventoryCost,
}

/// Maintains the weighted-average unit cost per branch ingredient
#[derive(Clone)]
pub struct CostAverager {
    ledger: StockLedger,
    resolver: UnitConversionResolver,
}

impl CostAverager {
    pub fn new(ledger: StockLedger, resolver: UnitConversionResolver) -> Self {
        Self { ledger, resolver }
    }

    /// Add a receipt to stock and fold its price into the average, atomically
    pub async fn record_receipt(&self, input: ReceiptInput, now: DateTime<Utc>) -> AppResult<ReceiptOutcome> {
        input.validate()?;
        shared::validate_unit_code(&input.unit_code).map_err(|m| AppError::validation("unit_code", m))?;

        let key = StockKey::new(input.branch_id, input.ingredient_id);
        let purchase_unit = normalize_unit_code(&input.unit_code);
        let stock_unit = match self.ledger.find(key).await? {
            Some(stock) => stock.unit,
            None => purchase_unit.clone(),
        };

        let (quantity, unit_price) = if purchase_unit == stock_unit {
            (input.quantity, input.unit_price)
        } else {
            let factor = self
                .resolver
                .get_conversion_factor(input.ingredient_id, &purchase_unit, &stock_unit, Some(input.branch_id))
                .await?;
            shared::validate_conversion_factor(factor).map_err(|m| AppError::validation("unit_code", m))?;
            (
                round_quantity(input.quantity * factor),
                round_quantity(input.unit_price / factor),
            )
        };

        let (stock, cost) = self
            .ledger
            .increase(key, quantity, &stock_unit, unit_price, now)
            .await?;

        tracing::info!(
            branch_id = key.branch_id,
            ingredient_id = key.ingredient_id,
            quantity = %quantity,
            unit = %stock_unit,
            avg_cost = %cost.avg_cost,
            "Recorded goods receipt"
        );

        Ok(ReceiptOutcome { stock, cost })
    }

    /// Current average cost
    pub async fn average_cost(&self, key: StockKey) -> AppResult<InventoryCost> {
        self.ledger
            .cost(key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Inventory cost for {key}")))
    }
}
