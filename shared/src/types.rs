//! Common types used across the engine

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Identifier of a branch (store/kitchen location)
pub type BranchId = i64;

/// Identifier of an ingredient
pub type IngredientId = i64;

/// Identifier of a sellable product variant
pub type ProductDetailId = i64;

/// Decimal places kept for quantities, conversion factors and costs
pub const QUANTITY_SCALE: u32 = 4;

/// Decimal places kept for same-dimension ratios before the final multiply
pub const RATIO_SCALE: u32 = 8;

/// Round half-up (away from zero on a tie) to `scale` decimal places
pub fn round_half_up(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}

/// Round to the quantity scale (4 decimal places, half-up)
pub fn round_quantity(value: Decimal) -> Decimal {
    round_half_up(value, QUANTITY_SCALE)
}

/// Stock key: one row per (branch, ingredient)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub branch_id: BranchId,
    pub ingredient_id: IngredientId,
}

impl StockKey {
    pub fn new(branch_id: BranchId, ingredient_id: IngredientId) -> Self {
        Self {
            branch_id,
            ingredient_id,
        }
    }
}

impl std::fmt::Display for StockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "branch {} / ingredient {}", self.branch_id, self.ingredient_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_round_half_up_tie_goes_up() {
        assert_eq!(round_quantity(dec("1.00005")), dec("1.0001"));
        assert_eq!(round_quantity(dec("1.00004")), dec("1.0000"));
    }

    #[test]
    fn test_round_half_up_negative_tie_goes_away_from_zero() {
        assert_eq!(round_quantity(dec("-2.00005")), dec("-2.0001"));
    }

    #[test]
    fn test_ratio_scale() {
        let third = Decimal::ONE / Decimal::from(3);
        assert_eq!(round_half_up(third, RATIO_SCALE), dec("0.33333333"));
    }
}
