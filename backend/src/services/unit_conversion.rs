//! Unit conversion resolver
//!
//! Same-dimension conversions go through each unit's factor to its base unit.
//! Everything else (CUP of flour to G, PIECE of egg to G) needs an
//! ingredient-specific row, looked up in a fixed priority order.

use std::sync::Arc;

use rust_decimal::Decimal;

use shared::{
    normalize_unit_code, round_half_up, round_quantity, BranchId, ConversionScope, IngredientId,
    BRIDGE_UNIT, QUANTITY_SCALE, RATIO_SCALE,
};

use crate::error::{AppError, AppResult};
use crate::store::UnitStore;

/// A resolved conversion: `result = quantity * numerator / denominator`
///
/// Reverse rules keep the stored factor as the denominator so a round trip
/// divides by exactly what the forward leg multiplied by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionRate {
    pub numerator: Decimal,
    pub denominator: Decimal,
}

impl ConversionRate {
    fn multiply(factor: Decimal) -> Self {
        Self {
            numerator: factor,
            denominator: Decimal::ONE,
        }
    }

    fn divide(factor: Decimal) -> Self {
        Self {
            numerator: Decimal::ONE,
            denominator: factor,
        }
    }

    pub fn apply(&self, quantity: Decimal) -> Decimal {
        round_quantity(quantity * self.numerator / self.denominator)
    }

    /// Scalar factor, 4 dp half-up
    pub fn factor(&self) -> Decimal {
        round_half_up(self.numerator / self.denominator, QUANTITY_SCALE)
    }
}

/// Converts quantities between units for a specific ingredient
#[derive(Clone)]
pub struct UnitConversionResolver {
    units: Arc<dyn UnitStore>,
}

impl UnitConversionResolver {
    pub fn new(units: Arc<dyn UnitStore>) -> Self {
        Self { units }
    }

    /// Convert `quantity` of `from_unit` into `to_unit`, 4 dp half-up
    pub async fn convert(
        &self,
        ingredient_id: IngredientId,
        from_unit: &str,
        to_unit: &str,
        quantity: Decimal,
        branch_id: Option<BranchId>,
    ) -> AppResult<Decimal> {
        let rate = self.resolve(ingredient_id, from_unit, to_unit, branch_id).await?;
        Ok(rate.apply(quantity))
    }

    /// The scalar factor for `from_unit -> to_unit`, same resolution order as `convert`
    pub async fn get_conversion_factor(
        &self,
        ingredient_id: IngredientId,
        from_unit: &str,
        to_unit: &str,
        branch_id: Option<BranchId>,
    ) -> AppResult<Decimal> {
        let rate = self.resolve(ingredient_id, from_unit, to_unit, branch_id).await?;
        Ok(rate.factor())
    }

    pub async fn resolve(
        &self,
        ingredient_id: IngredientId,
        from_unit: &str,
        to_unit: &str,
        branch_id: Option<BranchId>,
    ) -> AppResult<ConversionRate> {
        let from = normalize_unit_code(from_unit);
        let to = normalize_unit_code(to_unit);

        if from == to {
            return Ok(ConversionRate::multiply(Decimal::ONE));
        }

        if let Some(rate) = self.same_dimension(&from, &to).await? {
            return Ok(rate);
        }

        if let Some(rate) = self.ingredient_rule(ingredient_id, &from, &to, branch_id).await? {
            return Ok(rate);
        }

        tracing::debug!(ingredient_id, from = %from, to = %to, branch_id, "No conversion path");
        Err(AppError::ConversionNotFound {
            ingredient_id,
            from_unit: from,
            to_unit: to,
        })
    }

    /// Ratio of base factors when both units are known and share a dimension
    async fn same_dimension(&self, from: &str, to: &str) -> AppResult<Option<ConversionRate>> {
        let (Some(from_unit), Some(to_unit)) = (self.units.unit(from).await?, self.units.unit(to).await?)
        else {
            return Ok(None);
        };
        if from_unit.dimension != to_unit.dimension {
            return Ok(None);
        }
        if from_unit.base_code() != to_unit.base_code() {
            return Err(AppError::IncompatibleBaseUnit {
                from_unit: from.to_string(),
                to_unit: to.to_string(),
            });
        }
        let ratio = round_half_up(
            from_unit.factor_to_base() / to_unit.factor_to_base(),
            RATIO_SCALE,
        );
        Ok(Some(ConversionRate::multiply(ratio)))
    }

    /// Direct, reverse, then bridged ingredient rows; BRANCH before GLOBAL at each step
    async fn ingredient_rule(
        &self,
        ingredient_id: IngredientId,
        from: &str,
        to: &str,
        branch_id: Option<BranchId>,
    ) -> AppResult<Option<ConversionRate>> {
        if let Some(factor) = self.scoped_factor(ingredient_id, from, to, branch_id).await? {
            return Ok(Some(ConversionRate::multiply(factor)));
        }

        if let Some(factor) = self.scoped_factor(ingredient_id, to, from, branch_id).await? {
            return Ok(Some(ConversionRate::divide(factor)));
        }

        let to_bridge = self.scoped_factor(ingredient_id, from, BRIDGE_UNIT, branch_id).await?;
        let from_bridge = self.scoped_factor(ingredient_id, BRIDGE_UNIT, to, branch_id).await?;
        if let (Some(first), Some(second)) = (to_bridge, from_bridge) {
            return Ok(Some(ConversionRate::multiply(first * second)));
        }

        Ok(None)
    }

    /// Factor of the BRANCH row for `branch_id` if any, else the GLOBAL row
    async fn scoped_factor(
        &self,
        ingredient_id: IngredientId,
        from: &str,
        to: &str,
        branch_id: Option<BranchId>,
    ) -> AppResult<Option<Decimal>> {
        if branch_id.is_some() {
            if let Some(row) = self
                .units
                .conversion(ingredient_id, from, to, ConversionScope::Branch, branch_id)
                .await?
            {
                return Ok(Some(row.factor));
            }
        }
        let global = self
            .units
            .conversion(ingredient_id, from, to, ConversionScope::Global, None)
            .await?;
        Ok(global.map(|row| row.factor))
    }
}
