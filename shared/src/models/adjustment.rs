//! Stock adjustment (physical count reconciliation) models

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ParseEnumError;
use crate::types::{round_quantity, BranchId, IngredientId};

/// Direction of a corrective stock mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjustmentType {
    /// Stock is added back (less was used than the system deducted)
    AdjustIn,
    /// Stock is removed (more was used than the system deducted)
    AdjustOut,
}

impl AdjustmentType {
    /// ADJUST_OUT iff variance >= 0
    pub fn from_variance(variance: Decimal) -> Self {
        if variance >= Decimal::ZERO {
            AdjustmentType::AdjustOut
        } else {
            AdjustmentType::AdjustIn
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentType::AdjustIn => "ADJUST_IN",
            AdjustmentType::AdjustOut => "ADJUST_OUT",
        }
    }
}

impl std::str::FromStr for AdjustmentType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADJUST_IN" => Ok(AdjustmentType::AdjustIn),
            "ADJUST_OUT" => Ok(AdjustmentType::AdjustOut),
            other => Err(ParseEnumError::new("adjustment type", other)),
        }
    }
}

/// Lifecycle of a stock adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjustmentStatus {
    Pending,
    Committed,
    AutoCommitted,
}

impl AdjustmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentStatus::Pending => "PENDING",
            AdjustmentStatus::Committed => "COMMITTED",
            AdjustmentStatus::AutoCommitted => "AUTO_COMMITTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AdjustmentStatus::Pending)
    }
}

impl std::str::FromStr for AdjustmentStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(AdjustmentStatus::Pending),
            "COMMITTED" => Ok(AdjustmentStatus::Committed),
            "AUTO_COMMITTED" => Ok(AdjustmentStatus::AutoCommitted),
            other => Err(ParseEnumError::new("adjustment status", other)),
        }
    }
}

/// Where a count came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjustmentSource {
    /// End-of-day usage count
    Daily,
    /// One-shot manager recount
    Manager,
}

impl AdjustmentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentSource::Daily => "DAILY",
            AdjustmentSource::Manager => "MANAGER",
        }
    }
}

impl std::str::FromStr for AdjustmentSource {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DAILY" => Ok(AdjustmentSource::Daily),
            "MANAGER" => Ok(AdjustmentSource::Manager),
            other => Err(ParseEnumError::new("adjustment source", other)),
        }
    }
}

/// Reconciliation of counted usage against system-derived usage
///
/// Quantities are expressed as consumption: `system_quantity` is what committed
/// orders deducted, `actual_quantity` is what the counts say was used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub id: Uuid,
    pub branch_id: BranchId,
    pub ingredient_id: IngredientId,
    pub adjustment_date: NaiveDate,
    pub adjustment_type: AdjustmentType,
    pub status: AdjustmentStatus,
    pub source: AdjustmentSource,
    pub system_quantity: Decimal,
    pub actual_quantity: Decimal,
    pub variance: Decimal,
    /// Absolute variance, the amount the ledger mutation moves
    pub quantity: Decimal,
    pub entry_count: i32,
    pub last_entry_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub reason: Option<String>,
    pub forced: bool,
    pub created_at: DateTime<Utc>,
    pub committed_at: Option<DateTime<Utc>>,
}

/// An append-only physical count feeding an adjustment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockAdjustmentEntry {
    pub id: Uuid,
    pub adjustment_id: Uuid,
    pub entry_quantity: Decimal,
    pub recorded_by: String,
    pub entry_time: DateTime<Utc>,
    pub source: AdjustmentSource,
    pub notes: Option<String>,
}

/// Before/after variance of a recomputation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recalculation {
    pub previous_variance: Decimal,
    pub variance: Decimal,
}

impl Recalculation {
    /// Sign flip, or a move of more than 0.1 units that is also above 10%
    pub fn is_significant(&self) -> bool {
        let flipped = AdjustmentType::from_variance(self.previous_variance)
            != AdjustmentType::from_variance(self.variance);
        if flipped {
            return true;
        }
        let change = (self.variance - self.previous_variance).abs();
        if change <= Decimal::new(1, 1) {
            return false;
        }
        if self.previous_variance.is_zero() {
            return true;
        }
        change / self.previous_variance.abs() > Decimal::new(1, 1)
    }
}

impl StockAdjustment {
    /// Fresh PENDING adjustment with a zero baseline
    pub fn pending(
        branch_id: BranchId,
        ingredient_id: IngredientId,
        adjustment_date: NaiveDate,
        source: AdjustmentSource,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            branch_id,
            ingredient_id,
            adjustment_date,
            adjustment_type: AdjustmentType::AdjustOut,
            status: AdjustmentStatus::Pending,
            source,
            system_quantity: Decimal::ZERO,
            actual_quantity: Decimal::ZERO,
            variance: Decimal::ZERO,
            quantity: Decimal::ZERO,
            entry_count: 0,
            last_entry_at: None,
            notes: None,
            reason: None,
            forced: false,
            created_at: now,
            committed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == AdjustmentStatus::Pending
    }

    /// Fold a new count into the running actual quantity
    pub fn record_entry(
        &mut self,
        entry_quantity: Decimal,
        recorded_by: impl Into<String>,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> StockAdjustmentEntry {
        self.actual_quantity = round_quantity(self.actual_quantity + entry_quantity);
        self.entry_count += 1;
        self.last_entry_at = Some(now);
        if notes.is_some() {
            self.notes = notes.clone();
        }
        self.refresh_variance();
        StockAdjustmentEntry {
            id: Uuid::new_v4(),
            adjustment_id: self.id,
            entry_quantity,
            recorded_by: recorded_by.into(),
            entry_time: now,
            source: self.source,
            notes,
        }
    }

    /// Recompute variance, type and quantity against a new system quantity
    pub fn recompute(&mut self, system_quantity: Decimal) -> Recalculation {
        let previous_variance = self.variance;
        self.system_quantity = round_quantity(system_quantity);
        self.refresh_variance();
        Recalculation {
            previous_variance,
            variance: self.variance,
        }
    }

    fn refresh_variance(&mut self) {
        self.variance = self.actual_quantity - self.system_quantity;
        self.adjustment_type = AdjustmentType::from_variance(self.variance);
        self.quantity = self.variance.abs();
    }

    /// Move to a terminal status
    pub fn finalize(&mut self, status: AdjustmentStatus, now: DateTime<Utc>) {
        self.status = status;
        self.committed_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn adjustment() -> StockAdjustment {
        StockAdjustment::pending(
            1,
            5,
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            AdjustmentSource::Daily,
            Utc::now(),
        )
    }

    #[test]
    fn test_usage_above_system_is_adjust_out() {
        let mut adj = adjustment();
        adj.record_entry(Decimal::from(12), "chef", None, Utc::now());
        adj.recompute(Decimal::from(10));
        assert_eq!(adj.variance, Decimal::from(2));
        assert_eq!(adj.adjustment_type, AdjustmentType::AdjustOut);
        assert_eq!(adj.quantity, Decimal::from(2));
    }

    #[test]
    fn test_usage_below_system_is_adjust_in() {
        let mut adj = adjustment();
        adj.record_entry(Decimal::from(7), "chef", None, Utc::now());
        adj.recompute(Decimal::from(10));
        assert_eq!(adj.variance, Decimal::from(-3));
        assert_eq!(adj.adjustment_type, AdjustmentType::AdjustIn);
        assert_eq!(adj.quantity, Decimal::from(3));
    }

    #[test]
    fn test_entries_accumulate() {
        let mut adj = adjustment();
        let first = adj.record_entry(Decimal::from(4), "a", Some("morning".into()), Utc::now());
        adj.record_entry(Decimal::from(6), "b", None, Utc::now());
        assert_eq!(adj.actual_quantity, Decimal::from(10));
        assert_eq!(adj.entry_count, 2);
        assert_eq!(first.adjustment_id, adj.id);
        assert_eq!(adj.notes.as_deref(), Some("morning"));
    }

    #[test]
    fn test_sign_flip_is_significant() {
        let recalc = Recalculation {
            previous_variance: Decimal::new(5, 2),
            variance: Decimal::new(-5, 2),
        };
        assert!(recalc.is_significant());
    }

    #[test]
    fn test_small_change_is_not_significant() {
        let recalc = Recalculation {
            previous_variance: Decimal::from(2),
            variance: Decimal::new(205, 2),
        };
        assert!(!recalc.is_significant());
    }

    #[test]
    fn test_large_relative_change_is_significant() {
        let recalc = Recalculation {
            previous_variance: Decimal::from(2),
            variance: Decimal::new(25, 1),
        };
        assert!(recalc.is_significant());
    }

    #[test]
    fn test_status_labels_round_trip() {
        for status in [
            AdjustmentStatus::Pending,
            AdjustmentStatus::Committed,
            AdjustmentStatus::AutoCommitted,
        ] {
            assert_eq!(status.as_str().parse::<AdjustmentStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<AdjustmentStatus>().is_err());
    }

    proptest! {
        #[test]
        fn prop_variance_and_type_consistent(
            entries in prop::collection::vec(0i64..10_000, 1..6),
            system in 0i64..50_000
        ) {
            let mut adj = adjustment();
            for e in entries {
                adj.record_entry(Decimal::new(e, 2), "counter", None, Utc::now());
            }
            adj.recompute(Decimal::new(system, 2));
            prop_assert_eq!(adj.variance, adj.actual_quantity - adj.system_quantity);
            prop_assert_eq!(
                adj.adjustment_type == AdjustmentType::AdjustOut,
                adj.variance >= Decimal::ZERO
            );
            prop_assert_eq!(adj.quantity, adj.variance.abs());
        }
    }
}
