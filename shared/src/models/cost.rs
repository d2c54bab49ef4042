//! Weighted-average inventory cost

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{round_quantity, BranchId, IngredientId};

/// Average unit cost of an ingredient at a branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryCost {
    pub branch_id: BranchId,
    pub ingredient_id: IngredientId,
    pub avg_cost: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// `(old_qty * old_avg + qty_in * unit_price) / (old_qty + qty_in)`, 4 dp half-up
///
/// A zero resulting quantity resets the average to zero.
pub fn weighted_average_cost(
    old_qty: Decimal,
    old_avg: Decimal,
    qty_in: Decimal,
    unit_price: Decimal,
) -> Decimal {
    let total_qty = old_qty + qty_in;
    if total_qty.is_zero() {
        return Decimal::ZERO;
    }
    round_quantity((old_qty * old_avg + qty_in * unit_price) / total_qty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_first_receipt_takes_unit_price() {
        assert_eq!(
            weighted_average_cost(Decimal::ZERO, Decimal::ZERO, dec("100"), dec("20")),
            dec("20")
        );
    }

    #[test]
    fn test_weighted_average() {
        // 100 @ 20 + 50 @ 30 = 3500 / 150
        assert_eq!(
            weighted_average_cost(dec("100"), dec("20"), dec("50"), dec("30")),
            dec("23.3333")
        );
    }

    #[test]
    fn test_zero_total_resets() {
        assert_eq!(
            weighted_average_cost(Decimal::ZERO, dec("12.5"), Decimal::ZERO, dec("9")),
            Decimal::ZERO
        );
    }

    fn price_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..=100_000i64).prop_map(|n| Decimal::new(n, 2))
    }

    fn quantity_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..=10_000i64).prop_map(|n| Decimal::new(n, 1))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// The new average lies between the old average and the receipt price
        #[test]
        fn prop_average_bounded(
            old_qty in quantity_strategy(),
            old_avg in price_strategy(),
            qty_in in quantity_strategy(),
            price in price_strategy()
        ) {
            let avg = weighted_average_cost(old_qty, old_avg, qty_in, price);
            let lo = old_avg.min(price);
            let hi = old_avg.max(price);
            let tolerance = Decimal::new(1, 4);
            prop_assert!(avg >= lo - tolerance);
            prop_assert!(avg <= hi + tolerance);
        }
    }
}
