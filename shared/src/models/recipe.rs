//! Recipe models (read from the catalog collaborator)

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{IngredientId, ProductDetailId};

/// Ingredient list that produces `yield_quantity` units of a product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub product_detail_id: ProductDetailId,
    pub yield_quantity: Decimal,
    pub lines: Vec<RecipeLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeLine {
    pub ingredient_id: IngredientId,
    pub quantity: Decimal,
    pub unit_code: String,
}

impl Recipe {
    /// Ingredient quantities for `ordered` units: `(line_qty / yield) * ordered`
    ///
    /// A non-positive yield is treated as 1.
    pub fn scaled_lines(&self, ordered: Decimal) -> Vec<RecipeLine> {
        let yield_quantity = if self.yield_quantity > Decimal::ZERO {
            self.yield_quantity
        } else {
            Decimal::ONE
        };
        self.lines
            .iter()
            .map(|line| RecipeLine {
                ingredient_id: line.ingredient_id,
                quantity: line.quantity / yield_quantity * ordered,
                unit_code: line.unit_code.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_lines() {
        let recipe = Recipe {
            product_detail_id: 11,
            yield_quantity: Decimal::from(4),
            lines: vec![RecipeLine {
                ingredient_id: 5,
                quantity: Decimal::from(200),
                unit_code: "G".into(),
            }],
        };
        let lines = recipe.scaled_lines(Decimal::from(2));
        assert_eq!(lines[0].quantity, Decimal::from(100));
    }

    #[test]
    fn test_zero_yield_treated_as_one() {
        let recipe = Recipe {
            product_detail_id: 11,
            yield_quantity: Decimal::ZERO,
            lines: vec![RecipeLine {
                ingredient_id: 5,
                quantity: Decimal::from(3),
                unit_code: "PC".into(),
            }],
        };
        assert_eq!(recipe.scaled_lines(Decimal::from(2))[0].quantity, Decimal::from(6));
    }
}
