//! Persistence seams for the inventory engine
//!
//! Services talk to storage only through these traits. Two implementations
//! exist: [`postgres`] for production and [`memory`] for tests and local runs.
//! Every multi-row stock operation is atomic: it either applies to all lines or
//! leaves every row untouched.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use shared::{
    normalize_lines, normalize_unit_code, AdjustmentType, BranchHours, BranchId, ConversionScope,
    IngredientId, IngredientUnitConversion, InventoryCost, LedgerError, ProductDetailId, Recipe,
    ReleaseOutcome, Reservation, ReservationStatus, Shortage, Stock, StockAdjustment,
    StockAdjustmentEntry, StockKey, StockLine, Unit,
};

use crate::error::{AppError, AppResult};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// A stock row after a release, with how the release landed
#[derive(Debug, Clone)]
pub struct ReleasedStock {
    pub stock: Stock,
    pub outcome: ReleaseOutcome,
}

/// Stock rows and weighted-average costs
#[async_trait]
pub trait StockStore: Send + Sync {
    async fn get(&self, key: StockKey) -> AppResult<Option<Stock>>;

    /// Insert or replace a row's quantity, unit and threshold under the row lock
    ///
    /// Reserved quantity is kept and bounds the write, as `merge_upsert` describes.
    async fn upsert(&self, stock: Stock) -> AppResult<Stock>;

    /// Reserve every line or none; shortages for all lines are reported together
    async fn reserve_all(
        &self,
        branch_id: BranchId,
        lines: &[StockLine],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Stock>>;

    /// Deduct every line or none
    async fn commit_all(
        &self,
        branch_id: BranchId,
        lines: &[StockLine],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Stock>>;

    /// Return reserved quantities; missing rows are skipped
    async fn release_all(
        &self,
        branch_id: BranchId,
        lines: &[StockLine],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<ReleasedStock>>;

    async fn adjust(
        &self,
        key: StockKey,
        delta: Decimal,
        direction: AdjustmentType,
        now: DateTime<Utc>,
    ) -> AppResult<Stock>;

    /// Lock the row, move on-hand to `physical` and return the signed usage
    ///
    /// `NoStockChange` when the count matches what is on hand.
    async fn recount(
        &self,
        key: StockKey,
        physical: Decimal,
        now: DateTime<Utc>,
    ) -> AppResult<(Stock, Decimal)>;

    /// Add received stock and fold the receipt into the average cost, atomically
    async fn receive(
        &self,
        key: StockKey,
        quantity: Decimal,
        unit: &str,
        unit_price: Decimal,
        now: DateTime<Utc>,
    ) -> AppResult<(Stock, InventoryCost)>;

    async fn cost(&self, key: StockKey) -> AppResult<Option<InventoryCost>>;
}

/// One counted quantity for a daily adjustment
#[derive(Debug, Clone)]
pub struct DailyCount {
    pub key: StockKey,
    pub date: NaiveDate,
    /// Counted usage, already rounded
    pub quantity: Decimal,
    /// Usage derived from committed orders for the day
    pub system_quantity: Decimal,
    pub recorded_by: String,
    pub notes: Option<String>,
}

/// How `claim` moves a hold's ACTIVE rows
#[derive(Debug, Clone, Copy)]
pub struct HoldClaim {
    pub to: ReservationStatus,
    pub now: DateTime<Utc>,
    pub order_id: Option<Uuid>,
    /// Leave rows whose `expires_at` has passed untouched
    pub skip_expired: bool,
}

/// Reservation rows
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn insert_all(&self, rows: &[Reservation]) -> AppResult<()>;

    async fn by_group(&self, group_id: Uuid) -> AppResult<Vec<Reservation>>;

    /// Atomically move the group's ACTIVE rows to `claim.to`, returning them
    async fn claim(&self, group_id: Uuid, claim: HoldClaim) -> AppResult<Vec<Reservation>>;

    /// Roll a failed claim back to ACTIVE
    async fn unclaim(&self, ids: &[Uuid]) -> AppResult<()>;

    /// Groups holding at least one ACTIVE row with `expires_at < now`
    async fn expired_groups(&self, now: DateTime<Utc>) -> AppResult<Vec<Uuid>>;

    /// Delete RELEASED rows released before `before`
    async fn purge_released(&self, before: DateTime<Utc>) -> AppResult<u64>;

    async fn group_by_order(&self, order_id: Uuid) -> AppResult<Option<Uuid>>;

    /// Sum of COMMITTED quantities for `key` committed within `[from, to)`
    async fn committed_quantity(
        &self,
        key: StockKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Decimal>;
}

/// Stock adjustments and their entries
#[async_trait]
pub trait AdjustmentStore: Send + Sync {
    async fn get(&self, id: Uuid) -> AppResult<Option<StockAdjustment>>;

    /// Fold a count into the day's PENDING daily adjustment, creating it if needed
    ///
    /// Find-or-create, accumulation and the entry insert happen atomically, so
    /// concurrent counts for the same ingredient and day all land on one row.
    async fn record_daily_count(&self, count: &DailyCount, now: DateTime<Utc>) -> AppResult<StockAdjustment>;

    /// Insert a new adjustment together with its first entry
    async fn insert_with_entry(
        &self,
        adjustment: &StockAdjustment,
        entry: &StockAdjustmentEntry,
    ) -> AppResult<()>;

    /// Overwrite a PENDING row; false when it is no longer pending
    async fn update_pending(&self, adjustment: &StockAdjustment) -> AppResult<bool>;

    /// Write a terminal row over a PENDING one; false when it is no longer pending
    async fn finalize(&self, adjustment: &StockAdjustment) -> AppResult<bool>;

    /// Undo `finalize` after the ledger rejected the mutation
    async fn reopen(&self, adjustment: &StockAdjustment) -> AppResult<()>;

    async fn delete_pending(&self, id: Uuid) -> AppResult<bool>;

    async fn entries(&self, id: Uuid) -> AppResult<Vec<StockAdjustmentEntry>>;

    /// Branches with a PENDING daily adjustment
    async fn pending_branches(&self) -> AppResult<Vec<BranchId>>;

    /// PENDING daily adjustments of a branch, oldest day first
    async fn pending_for_branch(&self, branch_id: BranchId) -> AppResult<Vec<StockAdjustment>>;
}

/// Units of measure and ingredient conversions
#[async_trait]
pub trait UnitStore: Send + Sync {
    async fn unit(&self, code: &str) -> AppResult<Option<Unit>>;

    /// Active conversion row for `from -> to` in `scope`
    async fn conversion(
        &self,
        ingredient_id: IngredientId,
        from_unit: &str,
        to_unit: &str,
        scope: ConversionScope,
        branch_id: Option<BranchId>,
    ) -> AppResult<Option<IngredientUnitConversion>>;
}

/// Recipe collaborator
#[async_trait]
pub trait RecipeLookup: Send + Sync {
    async fn recipe(&self, product_detail_id: ProductDetailId) -> AppResult<Option<Recipe>>;
}

/// Branch schedule collaborator
#[async_trait]
pub trait BranchSchedule: Send + Sync {
    async fn hours(&self, branch_id: BranchId) -> AppResult<Option<BranchHours>>;
}

/// All storage seams, shared by the services
#[derive(Clone)]
pub struct Stores {
    pub stock: Arc<dyn StockStore>,
    pub reservations: Arc<dyn ReservationStore>,
    pub adjustments: Arc<dyn AdjustmentStore>,
    pub units: Arc<dyn UnitStore>,
    pub recipes: Arc<dyn RecipeLookup>,
    pub branches: Arc<dyn BranchSchedule>,
}

impl Stores {
    pub fn memory(store: MemoryStore) -> Self {
        Self {
            stock: Arc::new(store.clone()),
            reservations: Arc::new(store.clone()),
            adjustments: Arc::new(store.clone()),
            units: Arc::new(store.clone()),
            recipes: Arc::new(store.clone()),
            branches: Arc::new(store),
        }
    }

    pub fn postgres(store: PgStore) -> Self {
        Self {
            stock: Arc::new(store.clone()),
            reservations: Arc::new(store.clone()),
            adjustments: Arc::new(store.clone()),
            units: Arc::new(store.clone()),
            recipes: Arc::new(store.clone()),
            branches: Arc::new(store),
        }
    }
}

/// The row an upsert writes over `existing`
///
/// Reserved quantity belongs to open holds: it is carried over, on-hand may not
/// drop below it, and the unit may not change while any of it is held.
pub(crate) fn merge_upsert(existing: Option<&Stock>, incoming: Stock) -> AppResult<Stock> {
    let Some(existing) = existing else {
        return Ok(Stock {
            reserved_quantity: Decimal::ZERO,
            ..incoming
        });
    };
    if incoming.quantity < existing.reserved_quantity {
        return Err(AppError::validation(
            "quantity",
            format!("Quantity cannot drop below reserved {}", existing.reserved_quantity),
        ));
    }
    if normalize_unit_code(&incoming.unit) != existing.unit && existing.reserved_quantity > Decimal::ZERO {
        return Err(AppError::validation(
            "unit",
            format!(
                "Unit cannot change from {} while {} is reserved",
                existing.unit, existing.reserved_quantity
            ),
        ));
    }
    Ok(Stock {
        reserved_quantity: existing.reserved_quantity,
        ..incoming
    })
}

/// Apply `op` to the row of every line, all-or-nothing
///
/// `rows` holds the current (locked) rows keyed by ingredient. Shortages across
/// all lines are collected into one `InsufficientStock`; on any failure no
/// staged row is returned and the caller must not write anything.
pub(crate) fn stage_lines<F>(
    branch_id: BranchId,
    lines: &[StockLine],
    rows: &std::collections::HashMap<IngredientId, Stock>,
    mut op: F,
) -> AppResult<Vec<Stock>>
where
    F: FnMut(&mut Stock, Decimal) -> Result<(), LedgerError>,
{
    let lines = normalize_lines(lines);
    let mut staged = Vec::with_capacity(lines.len());
    let mut shortages = Vec::new();

    for line in &lines {
        let Some(current) = rows.get(&line.ingredient_id) else {
            shortages.push(Shortage {
                ingredient_id: line.ingredient_id,
                required: line.quantity,
                available: Decimal::ZERO,
                unit_code: String::new(),
            });
            continue;
        };
        debug_assert_eq!(current.branch_id, branch_id);
        let mut row = current.clone();
        match op(&mut row, line.quantity) {
            Ok(()) => staged.push(row),
            Err(LedgerError::InsufficientStock(shortage)) => shortages.push(shortage),
            Err(other) => return Err(other.into()),
        }
    }

    if !shortages.is_empty() {
        return Err(AppError::InsufficientStock { shortages });
    }
    Ok(staged)
}
