//! Branch stock rows and the ledger rules that mutate them

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::AdjustmentType;
use crate::types::{round_quantity, BranchId, IngredientId, StockKey};

/// Stock of one ingredient at one branch
///
/// `quantity` is what is physically on hand, `reserved_quantity` is what open
/// holds have claimed. Every mutation below keeps
/// `0 <= reserved_quantity <= quantity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stock {
    pub branch_id: BranchId,
    pub ingredient_id: IngredientId,
    pub quantity: Decimal,
    pub reserved_quantity: Decimal,
    pub unit: String,
    pub threshold: Decimal,
    pub last_updated: DateTime<Utc>,
}

/// Shortage detail for one ingredient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortage {
    pub ingredient_id: IngredientId,
    pub required: Decimal,
    pub available: Decimal,
    pub unit_code: String,
}

/// One ingredient quantity inside a multi-row ledger operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLine {
    pub ingredient_id: IngredientId,
    pub quantity: Decimal,
}

impl StockLine {
    pub fn new(ingredient_id: IngredientId, quantity: Decimal) -> Self {
        Self {
            ingredient_id,
            quantity,
        }
    }
}

/// Ledger rule violations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient stock for ingredient {}: required {}, available {} {}", .0.ingredient_id, .0.required, .0.available, .0.unit_code)]
    InsufficientStock(Shortage),

    #[error("quantity must be positive, got {0}")]
    NonPositiveQuantity(Decimal),

    #[error("no stock row for {0}")]
    StockNotFound(StockKey),
}

/// Result of a release: releasing more than is reserved floors at zero
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    Floored { missing: Decimal },
}

impl Stock {
    /// Empty stock row, created lazily on first receipt
    pub fn new(
        branch_id: BranchId,
        ingredient_id: IngredientId,
        unit: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            branch_id,
            ingredient_id,
            quantity: Decimal::ZERO,
            reserved_quantity: Decimal::ZERO,
            unit: unit.into(),
            threshold: Decimal::ZERO,
            last_updated: now,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.branch_id, self.ingredient_id)
    }

    /// What can still be newly reserved
    pub fn available(&self) -> Decimal {
        self.quantity - self.reserved_quantity
    }

    /// Whether the row satisfies the at-rest invariants
    pub fn is_consistent(&self) -> bool {
        self.quantity >= Decimal::ZERO
            && self.reserved_quantity >= Decimal::ZERO
            && self.available() >= Decimal::ZERO
    }

    fn shortage(&self, required: Decimal, available: Decimal) -> LedgerError {
        LedgerError::InsufficientStock(Shortage {
            ingredient_id: self.ingredient_id,
            required,
            available,
            unit_code: self.unit.clone(),
        })
    }

    /// Claim `qty` from the available margin
    pub fn reserve(&mut self, qty: Decimal, now: DateTime<Utc>) -> Result<(), LedgerError> {
        ensure_positive(qty)?;
        let available = self.available();
        if available < qty {
            return Err(self.shortage(qty, available));
        }
        self.reserved_quantity = round_quantity(self.reserved_quantity + qty);
        self.last_updated = now;
        Ok(())
    }

    /// Return `qty` to the available margin, flooring the reserved amount at zero
    pub fn release(&mut self, qty: Decimal, now: DateTime<Utc>) -> Result<ReleaseOutcome, LedgerError> {
        ensure_positive(qty)?;
        let outcome = if qty > self.reserved_quantity {
            let missing = qty - self.reserved_quantity;
            self.reserved_quantity = Decimal::ZERO;
            ReleaseOutcome::Floored { missing }
        } else {
            self.reserved_quantity = round_quantity(self.reserved_quantity - qty);
            ReleaseOutcome::Released
        };
        self.last_updated = now;
        Ok(outcome)
    }

    /// Deduct `qty` for real, consuming the matching reservation
    ///
    /// Fails without touching the row when less than `qty` is on hand.
    pub fn commit(&mut self, qty: Decimal, now: DateTime<Utc>) -> Result<(), LedgerError> {
        ensure_positive(qty)?;
        if self.quantity < qty {
            return Err(self.shortage(qty, self.quantity));
        }
        self.quantity = round_quantity(self.quantity - qty);
        self.reserved_quantity = round_quantity((self.reserved_quantity - qty).max(Decimal::ZERO));
        self.last_updated = now;
        Ok(())
    }

    /// Corrective adjustment from a physical count
    ///
    /// ADJUST_OUT may not take on-hand quantity below what is already reserved.
    pub fn adjust(
        &mut self,
        delta: Decimal,
        direction: AdjustmentType,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        ensure_positive(delta)?;
        match direction {
            AdjustmentType::AdjustIn => {
                self.quantity = round_quantity(self.quantity + delta);
            }
            AdjustmentType::AdjustOut => {
                let available = self.available();
                if available < delta {
                    return Err(self.shortage(delta, available));
                }
                self.quantity = round_quantity(self.quantity - delta);
            }
        }
        self.last_updated = now;
        Ok(())
    }

    /// Move on-hand quantity to a physical count
    ///
    /// Returns the signed usage `quantity - physical`. A zero usage leaves the
    /// row untouched; a recount below what is reserved fails like ADJUST_OUT.
    pub fn recount(&mut self, physical: Decimal, now: DateTime<Utc>) -> Result<Decimal, LedgerError> {
        let usage = round_quantity(self.quantity - physical);
        if usage > Decimal::ZERO {
            self.adjust(usage, AdjustmentType::AdjustOut, now)?;
        } else if usage < Decimal::ZERO {
            self.adjust(-usage, AdjustmentType::AdjustIn, now)?;
        }
        Ok(usage)
    }

    /// Stock increase from a goods receipt
    pub fn increase(&mut self, qty: Decimal, now: DateTime<Utc>) -> Result<(), LedgerError> {
        ensure_positive(qty)?;
        self.quantity = round_quantity(self.quantity + qty);
        self.last_updated = now;
        Ok(())
    }
}

fn ensure_positive(qty: Decimal) -> Result<(), LedgerError> {
    if qty <= Decimal::ZERO {
        return Err(LedgerError::NonPositiveQuantity(qty));
    }
    Ok(())
}

/// Merge lines for the same ingredient and sort by ingredient id
///
/// Multi-row operations lock rows in this order.
pub fn normalize_lines(lines: &[StockLine]) -> Vec<StockLine> {
    let mut merged: std::collections::BTreeMap<IngredientId, Decimal> = Default::default();
    for line in lines {
        *merged.entry(line.ingredient_id).or_insert(Decimal::ZERO) += line.quantity;
    }
    merged
        .into_iter()
        .map(|(ingredient_id, quantity)| StockLine::new(ingredient_id, quantity))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stock(quantity: i64, reserved: i64) -> Stock {
        Stock {
            branch_id: 1,
            ingredient_id: 5,
            quantity: Decimal::from(quantity),
            reserved_quantity: Decimal::from(reserved),
            unit: "G".to_string(),
            threshold: Decimal::from(20),
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn test_reserve_reduces_available() {
        let mut s = stock(100, 0);
        s.reserve(Decimal::from(30), Utc::now()).unwrap();
        assert_eq!(s.reserved_quantity, Decimal::from(30));
        assert_eq!(s.available(), Decimal::from(70));
    }

    #[test]
    fn test_reserve_beyond_available_fails_untouched() {
        let mut s = stock(100, 80);
        let before = s.clone();
        let err = s.reserve(Decimal::from(30), Utc::now()).unwrap_err();
        match err {
            LedgerError::InsufficientStock(shortage) => {
                assert_eq!(shortage.required, Decimal::from(30));
                assert_eq!(shortage.available, Decimal::from(20));
                assert_eq!(shortage.unit_code, "G");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(s, before);
    }

    #[test]
    fn test_commit_consumes_reservation() {
        let mut s = stock(100, 30);
        s.commit(Decimal::from(30), Utc::now()).unwrap();
        assert_eq!(s.quantity, Decimal::from(70));
        assert_eq!(s.reserved_quantity, Decimal::ZERO);
    }

    #[test]
    fn test_commit_more_than_on_hand_fails() {
        let mut s = stock(10, 10);
        assert!(s.commit(Decimal::from(11), Utc::now()).is_err());
        assert_eq!(s.quantity, Decimal::from(10));
        assert_eq!(s.reserved_quantity, Decimal::from(10));
    }

    #[test]
    fn test_release_floors_at_zero() {
        let mut s = stock(100, 5);
        let outcome = s.release(Decimal::from(8), Utc::now()).unwrap();
        assert_eq!(outcome, ReleaseOutcome::Floored { missing: Decimal::from(3) });
        assert_eq!(s.reserved_quantity, Decimal::ZERO);
    }

    #[test]
    fn test_adjust_out_cannot_cut_into_reservations() {
        let mut s = stock(50, 40);
        assert!(s.adjust(Decimal::from(11), AdjustmentType::AdjustOut, Utc::now()).is_err());
        s.adjust(Decimal::from(10), AdjustmentType::AdjustOut, Utc::now()).unwrap();
        assert_eq!(s.quantity, Decimal::from(40));
        assert!(s.is_consistent());
    }

    #[test]
    fn test_adjust_in_adds() {
        let mut s = stock(50, 0);
        s.adjust(Decimal::from(5), AdjustmentType::AdjustIn, Utc::now()).unwrap();
        assert_eq!(s.quantity, Decimal::from(55));
    }

    #[test]
    fn test_recount_moves_to_physical() {
        let mut s = stock(100, 10);
        assert_eq!(s.recount(Decimal::from(70), Utc::now()), Ok(Decimal::from(30)));
        assert_eq!(s.quantity, Decimal::from(70));

        assert_eq!(s.recount(Decimal::from(75), Utc::now()), Ok(Decimal::from(-5)));
        assert_eq!(s.quantity, Decimal::from(75));
        assert_eq!(s.reserved_quantity, Decimal::from(10));
    }

    #[test]
    fn test_recount_below_reserved_fails_untouched() {
        let mut s = stock(100, 80);
        let before = s.clone();
        assert!(matches!(
            s.recount(Decimal::from(50), Utc::now()),
            Err(LedgerError::InsufficientStock(_))
        ));
        assert_eq!(s, before);

        assert_eq!(s.recount(Decimal::from(100), Utc::now()), Ok(Decimal::ZERO));
        assert_eq!(s, before);
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let mut s = stock(50, 0);
        assert_eq!(
            s.reserve(Decimal::ZERO, Utc::now()),
            Err(LedgerError::NonPositiveQuantity(Decimal::ZERO))
        );
    }

    #[test]
    fn test_normalize_lines_merges_and_sorts() {
        let lines = vec![
            StockLine::new(9, Decimal::from(1)),
            StockLine::new(3, Decimal::from(2)),
            StockLine::new(9, Decimal::from(4)),
        ];
        let merged = normalize_lines(&lines);
        assert_eq!(
            merged,
            vec![StockLine::new(3, Decimal::from(2)), StockLine::new(9, Decimal::from(5))]
        );
    }

    #[derive(Debug, Clone)]
    enum Op {
        Reserve(i64),
        Release(i64),
        Commit(i64),
        AdjustIn(i64),
        AdjustOut(i64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1i64..500).prop_map(Op::Reserve),
            (1i64..500).prop_map(Op::Release),
            (1i64..500).prop_map(Op::Commit),
            (1i64..500).prop_map(Op::AdjustIn),
            (1i64..500).prop_map(Op::AdjustOut),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Rows stay consistent whatever sequence of operations is applied
        #[test]
        fn prop_invariants_hold_under_any_sequence(
            initial in 0i64..1000,
            ops in prop::collection::vec(op_strategy(), 1..40)
        ) {
            let mut s = stock(initial, 0);
            for op in ops {
                let now = Utc::now();
                let _ = match op {
                    Op::Reserve(q) => s.reserve(Decimal::new(q, 1), now).map(|_| ()),
                    Op::Release(q) => s.release(Decimal::new(q, 1), now).map(|_| ()),
                    Op::Commit(q) => s.commit(Decimal::new(q, 1), now),
                    Op::AdjustIn(q) => s.adjust(Decimal::new(q, 1), AdjustmentType::AdjustIn, now),
                    Op::AdjustOut(q) => s.adjust(Decimal::new(q, 1), AdjustmentType::AdjustOut, now),
                };
                prop_assert!(s.is_consistent(), "inconsistent row: {:?}", s);
            }
        }

        /// Reserve then release restores the reserved quantity exactly
        #[test]
        fn prop_reserve_release_round_trip(
            on_hand in 1i64..10_000,
            already in 0i64..100,
            qty in 1i64..10_000
        ) {
            let mut s = stock(on_hand + already, already);
            let before = s.reserved_quantity;
            if s.reserve(Decimal::new(qty, 2), Utc::now()).is_ok() {
                s.release(Decimal::new(qty, 2), Utc::now()).unwrap();
                prop_assert_eq!(s.reserved_quantity, before);
            }
        }

        /// Reserve then commit moves quantity and reserved by the same amount
        #[test]
        fn prop_commit_leaves_available_unchanged(
            on_hand in 1i64..10_000,
            qty in 1i64..10_000
        ) {
            let mut s = stock(on_hand, 0);
            let qty = Decimal::new(qty, 2);
            if s.reserve(qty, Utc::now()).is_ok() {
                let available = s.available();
                let quantity = s.quantity;
                let reserved = s.reserved_quantity;
                s.commit(qty, Utc::now()).unwrap();
                prop_assert_eq!(quantity - s.quantity, qty);
                prop_assert_eq!(reserved - s.reserved_quantity, qty);
                prop_assert_eq!(s.available(), available);
            }
        }
    }
}
