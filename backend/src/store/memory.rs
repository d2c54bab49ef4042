//! In-process store backed by `tokio::sync::RwLock`
//!
//! Used by the test suite and by `storage.backend = "memory"` for local runs.
//! Each trait method takes the write lock once, so every multi-row operation
//! is atomic with respect to other callers.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use uuid::Uuid;

use shared::{
    normalize_lines, normalize_unit_code, weighted_average_cost, AdjustmentSource, AdjustmentStatus,
    AdjustmentType, BranchHours, BranchId, ConversionScope, IngredientId, IngredientUnitConversion,
    InventoryCost, ProductDetailId, Recipe, Reservation, ReservationStatus, Stock, StockAdjustment,
    StockAdjustmentEntry, StockKey, StockLine, Unit,
};

use super::{
    merge_upsert, stage_lines, AdjustmentStore, BranchSchedule, DailyCount, HoldClaim, RecipeLookup,
    ReleasedStock, ReservationStore, StockStore, UnitStore,
};
use crate::error::{AppError, AppResult};

#[derive(Default)]
struct MemoryState {
    stock: HashMap<StockKey, Stock>,
    costs: HashMap<StockKey, InventoryCost>,
    reservations: HashMap<Uuid, Reservation>,
    adjustments: HashMap<Uuid, StockAdjustment>,
    entries: Vec<StockAdjustmentEntry>,
    units: HashMap<String, Unit>,
    conversions: Vec<IngredientUnitConversion>,
    recipes: HashMap<ProductDetailId, Recipe>,
    hours: HashMap<BranchId, BranchHours>,
}

impl MemoryState {
    fn branch_rows(&self, branch_id: BranchId, lines: &[StockLine]) -> HashMap<IngredientId, Stock> {
        lines
            .iter()
            .filter_map(|line| {
                self.stock
                    .get(&StockKey::new(branch_id, line.ingredient_id))
                    .map(|row| (line.ingredient_id, row.clone()))
            })
            .collect()
    }

    fn write_back(&mut self, rows: &[Stock]) {
        for row in rows {
            self.stock.insert(row.key(), row.clone());
        }
    }
}

/// Shared in-memory store; clones see the same data
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_stock(&self, stock: Stock) {
        self.state.write().await.stock.insert(stock.key(), stock);
    }

    pub async fn put_unit(&self, unit: Unit) {
        self.state.write().await.units.insert(unit.code.clone(), unit);
    }

    pub async fn put_conversion(&self, mut conversion: IngredientUnitConversion) {
        conversion.from_unit = normalize_unit_code(&conversion.from_unit);
        conversion.to_unit = normalize_unit_code(&conversion.to_unit);
        self.state.write().await.conversions.push(conversion);
    }

    pub async fn put_recipe(&self, recipe: Recipe) {
        self.state
            .write()
            .await
            .recipes
            .insert(recipe.product_detail_id, recipe);
    }

    pub async fn put_branch_hours(&self, hours: BranchHours) {
        self.state.write().await.hours.insert(hours.branch_id, hours);
    }

    /// Every adjustment row, oldest first
    pub async fn adjustments(&self) -> Vec<StockAdjustment> {
        let state = self.state.read().await;
        let mut rows: Vec<StockAdjustment> = state.adjustments.values().cloned().collect();
        rows.sort_by_key(|a| (a.created_at, a.ingredient_id));
        rows
    }

    /// Every reservation row, oldest first
    pub async fn reservations(&self) -> Vec<Reservation> {
        let state = self.state.read().await;
        let mut rows: Vec<Reservation> = state.reservations.values().cloned().collect();
        rows.sort_by_key(|r| (r.created_at, r.ingredient_id));
        rows
    }
}

#[async_trait]
impl StockStore for MemoryStore {
    async fn get(&self, key: StockKey) -> AppResult<Option<Stock>> {
        Ok(self.state.read().await.stock.get(&key).cloned())
    }

    async fn upsert(&self, stock: Stock) -> AppResult<Stock> {
        let mut state = self.state.write().await;
        let row = merge_upsert(state.stock.get(&stock.key()), stock)?;
        state.stock.insert(row.key(), row.clone());
        Ok(row)
    }

    async fn reserve_all(
        &self,
        branch_id: BranchId,
        lines: &[StockLine],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Stock>> {
        let mut state = self.state.write().await;
        let rows = state.branch_rows(branch_id, lines);
        let staged = stage_lines(branch_id, lines, &rows, |row, qty| row.reserve(qty, now))?;
        state.write_back(&staged);
        Ok(staged)
    }

    async fn commit_all(
        &self,
        branch_id: BranchId,
        lines: &[StockLine],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Stock>> {
        let mut state = self.state.write().await;
        let rows = state.branch_rows(branch_id, lines);
        let staged = stage_lines(branch_id, lines, &rows, |row, qty| row.commit(qty, now))?;
        state.write_back(&staged);
        Ok(staged)
    }

    async fn release_all(
        &self,
        branch_id: BranchId,
        lines: &[StockLine],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<ReleasedStock>> {
        let mut state = self.state.write().await;
        let mut released = Vec::new();
        for line in normalize_lines(lines) {
            let key = StockKey::new(branch_id, line.ingredient_id);
            let Some(row) = state.stock.get_mut(&key) else {
                continue;
            };
            let outcome = row.release(line.quantity, now)?;
            released.push(ReleasedStock {
                stock: row.clone(),
                outcome,
            });
        }
        Ok(released)
    }

    async fn adjust(
        &self,
        key: StockKey,
        delta: Decimal,
        direction: AdjustmentType,
        now: DateTime<Utc>,
    ) -> AppResult<Stock> {
        let mut state = self.state.write().await;
        let row = state.stock.get_mut(&key).ok_or(AppError::StockNotFound {
            branch_id: key.branch_id,
            ingredient_id: key.ingredient_id,
        })?;
        let mut staged = row.clone();
        staged.adjust(delta, direction, now)?;
        *row = staged.clone();
        Ok(staged)
    }

    async fn recount(
        &self,
        key: StockKey,
        physical: Decimal,
        now: DateTime<Utc>,
    ) -> AppResult<(Stock, Decimal)> {
        let mut state = self.state.write().await;
        let row = state.stock.get_mut(&key).ok_or(AppError::StockNotFound {
            branch_id: key.branch_id,
            ingredient_id: key.ingredient_id,
        })?;
        let mut staged = row.clone();
        let usage = staged.recount(physical, now)?;
        if usage.is_zero() {
            return Err(AppError::NoStockChange);
        }
        *row = staged.clone();
        Ok((staged, usage))
    }

    async fn receive(
        &self,
        key: StockKey,
        quantity: Decimal,
        unit: &str,
        unit_price: Decimal,
        now: DateTime<Utc>,
    ) -> AppResult<(Stock, InventoryCost)> {
        let mut state = self.state.write().await;
        let mut stock = state
            .stock
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Stock::new(key.branch_id, key.ingredient_id, unit, now));
        let old_qty = stock.quantity;
        let old_avg = state.costs.get(&key).map_or(Decimal::ZERO, |c| c.avg_cost);

        stock.increase(quantity, now)?;
        let cost = InventoryCost {
            branch_id: key.branch_id,
            ingredient_id: key.ingredient_id,
            avg_cost: weighted_average_cost(old_qty, old_avg, quantity, unit_price),
            updated_at: now,
        };

        state.stock.insert(key, stock.clone());
        state.costs.insert(key, cost.clone());
        Ok((stock, cost))
    }

    async fn cost(&self, key: StockKey) -> AppResult<Option<InventoryCost>> {
        Ok(self.state.read().await.costs.get(&key).cloned())
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn insert_all(&self, rows: &[Reservation]) -> AppResult<()> {
        let mut state = self.state.write().await;
        for row in rows {
            state.reservations.insert(row.id, row.clone());
        }
        Ok(())
    }

    async fn by_group(&self, group_id: Uuid) -> AppResult<Vec<Reservation>> {
        let state = self.state.read().await;
        let mut rows: Vec<Reservation> = state
            .reservations
            .values()
            .filter(|r| r.group_id == group_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.ingredient_id);
        Ok(rows)
    }

    async fn claim(&self, group_id: Uuid, claim: HoldClaim) -> AppResult<Vec<Reservation>> {
        let mut state = self.state.write().await;
        let mut claimed = Vec::new();
        for row in state.reservations.values_mut() {
            if row.group_id != group_id || !row.status.can_transition_to(claim.to) {
                continue;
            }
            if claim.skip_expired && row.is_expired(claim.now) {
                continue;
            }
            row.status = claim.to;
            match claim.to {
                ReservationStatus::Committed => {
                    row.committed_at = Some(claim.now);
                    row.order_id = claim.order_id.or(row.order_id);
                }
                ReservationStatus::Released => row.released_at = Some(claim.now),
                ReservationStatus::Active => {}
            }
            claimed.push(row.clone());
        }
        claimed.sort_by_key(|r| r.ingredient_id);
        Ok(claimed)
    }

    async fn unclaim(&self, ids: &[Uuid]) -> AppResult<()> {
        let mut state = self.state.write().await;
        for id in ids {
            if let Some(row) = state.reservations.get_mut(id) {
                row.status = ReservationStatus::Active;
                row.committed_at = None;
                row.released_at = None;
                row.order_id = None;
            }
        }
        Ok(())
    }

    async fn expired_groups(&self, now: DateTime<Utc>) -> AppResult<Vec<Uuid>> {
        let state = self.state.read().await;
        let groups: BTreeSet<Uuid> = state
            .reservations
            .values()
            .filter(|r| r.status == ReservationStatus::Active && r.is_expired(now))
            .map(|r| r.group_id)
            .collect();
        Ok(groups.into_iter().collect())
    }

    async fn purge_released(&self, before: DateTime<Utc>) -> AppResult<u64> {
        let mut state = self.state.write().await;
        let len = state.reservations.len();
        state.reservations.retain(|_, r| {
            !(r.status == ReservationStatus::Released && r.released_at.is_some_and(|at| at < before))
        });
        Ok((len - state.reservations.len()) as u64)
    }

    async fn group_by_order(&self, order_id: Uuid) -> AppResult<Option<Uuid>> {
        let state = self.state.read().await;
        Ok(state
            .reservations
            .values()
            .filter(|r| r.order_id == Some(order_id))
            .min_by_key(|r| r.created_at)
            .map(|r| r.group_id))
    }

    async fn committed_quantity(
        &self,
        key: StockKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Decimal> {
        let state = self.state.read().await;
        Ok(state
            .reservations
            .values()
            .filter(|r| {
                r.status == ReservationStatus::Committed
                    && r.branch_id == key.branch_id
                    && r.ingredient_id == key.ingredient_id
                    && r.committed_at.is_some_and(|at| at >= from && at < to)
            })
            .map(|r| r.quantity_reserved)
            .sum())
    }
}

#[async_trait]
impl AdjustmentStore for MemoryStore {
    async fn get(&self, id: Uuid) -> AppResult<Option<StockAdjustment>> {
        Ok(self.state.read().await.adjustments.get(&id).cloned())
    }

    async fn record_daily_count(&self, count: &DailyCount, now: DateTime<Utc>) -> AppResult<StockAdjustment> {
        let mut state = self.state.write().await;
        let mut adjustment = state
            .adjustments
            .values()
            .find(|a| {
                a.is_pending()
                    && a.source == AdjustmentSource::Daily
                    && a.branch_id == count.key.branch_id
                    && a.ingredient_id == count.key.ingredient_id
                    && a.adjustment_date == count.date
            })
            .cloned()
            .unwrap_or_else(|| {
                StockAdjustment::pending(
                    count.key.branch_id,
                    count.key.ingredient_id,
                    count.date,
                    AdjustmentSource::Daily,
                    now,
                )
            });
        let entry = adjustment.record_entry(count.quantity, count.recorded_by.as_str(), count.notes.clone(), now);
        adjustment.recompute(count.system_quantity);
        state.adjustments.insert(adjustment.id, adjustment.clone());
        state.entries.push(entry);
        Ok(adjustment)
    }

    async fn insert_with_entry(
        &self,
        adjustment: &StockAdjustment,
        entry: &StockAdjustmentEntry,
    ) -> AppResult<()> {
        let mut state = self.state.write().await;
        if state.adjustments.contains_key(&adjustment.id) {
            return Err(AppError::Internal(format!("adjustment {} already exists", adjustment.id)));
        }
        state.adjustments.insert(adjustment.id, adjustment.clone());
        state.entries.push(entry.clone());
        Ok(())
    }

    async fn update_pending(&self, adjustment: &StockAdjustment) -> AppResult<bool> {
        let mut state = self.state.write().await;
        match state.adjustments.get_mut(&adjustment.id) {
            Some(existing) if existing.is_pending() => {
                *existing = adjustment.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finalize(&self, adjustment: &StockAdjustment) -> AppResult<bool> {
        self.update_pending(adjustment).await
    }

    async fn reopen(&self, adjustment: &StockAdjustment) -> AppResult<()> {
        let mut reopened = adjustment.clone();
        reopened.status = AdjustmentStatus::Pending;
        reopened.committed_at = None;
        self.state
            .write()
            .await
            .adjustments
            .insert(reopened.id, reopened);
        Ok(())
    }

    async fn delete_pending(&self, id: Uuid) -> AppResult<bool> {
        let mut state = self.state.write().await;
        let pending = state.adjustments.get(&id).is_some_and(|a| a.is_pending());
        if pending {
            state.adjustments.remove(&id);
            state.entries.retain(|e| e.adjustment_id != id);
        }
        Ok(pending)
    }

    async fn entries(&self, id: Uuid) -> AppResult<Vec<StockAdjustmentEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<StockAdjustmentEntry> = state
            .entries
            .iter()
            .filter(|e| e.adjustment_id == id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.entry_time);
        Ok(entries)
    }

    async fn pending_branches(&self) -> AppResult<Vec<BranchId>> {
        let state = self.state.read().await;
        let branches: BTreeSet<BranchId> = state
            .adjustments
            .values()
            .filter(|a| a.is_pending() && a.source == AdjustmentSource::Daily)
            .map(|a| a.branch_id)
            .collect();
        Ok(branches.into_iter().collect())
    }

    async fn pending_for_branch(&self, branch_id: BranchId) -> AppResult<Vec<StockAdjustment>> {
        let state = self.state.read().await;
        let mut rows: Vec<StockAdjustment> = state
            .adjustments
            .values()
            .filter(|a| a.is_pending() && a.source == AdjustmentSource::Daily && a.branch_id == branch_id)
            .cloned()
            .collect();
        rows.sort_by_key(|a| (a.adjustment_date, a.ingredient_id));
        Ok(rows)
    }
}

#[async_trait]
impl UnitStore for MemoryStore {
    async fn unit(&self, code: &str) -> AppResult<Option<Unit>> {
        let code = normalize_unit_code(code);
        Ok(self.state.read().await.units.get(&code).cloned())
    }

    async fn conversion(
        &self,
        ingredient_id: IngredientId,
        from_unit: &str,
        to_unit: &str,
        scope: ConversionScope,
        branch_id: Option<BranchId>,
    ) -> AppResult<Option<IngredientUnitConversion>> {
        let from_unit = normalize_unit_code(from_unit);
        let to_unit = normalize_unit_code(to_unit);
        let state = self.state.read().await;
        Ok(state
            .conversions
            .iter()
            .filter(|c| {
                c.ingredient_id == ingredient_id
                    && c.from_unit == from_unit
                    && c.to_unit == to_unit
                    && c.applies_to(scope, branch_id)
            })
            .min_by_key(|c| c.id)
            .cloned())
    }
}

#[async_trait]
impl RecipeLookup for MemoryStore {
    async fn recipe(&self, product_detail_id: ProductDetailId) -> AppResult<Option<Recipe>> {
        Ok(self.state.read().await.recipes.get(&product_detail_id).cloned())
    }
}

#[async_trait]
impl BranchSchedule for MemoryStore {
    async fn hours(&self, branch_id: BranchId) -> AppResult<Option<BranchHours>> {
        Ok(self.state.read().await.hours.get(&branch_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn stock(ingredient_id: IngredientId, quantity: i64) -> Stock {
        Stock {
            branch_id: 1,
            ingredient_id,
            quantity: Decimal::from(quantity),
            reserved_quantity: Decimal::ZERO,
            unit: "G".to_string(),
            threshold: Decimal::ZERO,
            last_updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_reserve_all_is_all_or_nothing() {
        let store = MemoryStore::new();
        store.put_stock(stock(1, 100)).await;
        store.put_stock(stock(2, 10)).await;

        let lines = vec![
            StockLine::new(1, Decimal::from(30)),
            StockLine::new(2, Decimal::from(20)),
        ];
        let err = store.reserve_all(1, &lines, Utc::now()).await.unwrap_err();
        match err {
            AppError::InsufficientStock { shortages } => {
                assert_eq!(shortages.len(), 1);
                assert_eq!(shortages[0].ingredient_id, 2);
            }
            other => panic!("unexpected: {other:?}"),
        }

        let first = StockStore::get(&store, StockKey::new(1, 1)).await.unwrap().unwrap();
        assert_eq!(first.reserved_quantity, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_missing_row_is_a_shortage() {
        let store = MemoryStore::new();
        let err = store
            .reserve_all(1, &[StockLine::new(9, Decimal::ONE)], Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientStock { .. }));
    }

    #[tokio::test]
    async fn test_upsert_keeps_reserved_quantity() {
        let store = MemoryStore::new();
        store.put_stock(stock(1, 100)).await;
        store
            .reserve_all(1, &[StockLine::new(1, Decimal::from(30))], Utc::now())
            .await
            .unwrap();

        let row = store.upsert(stock(1, 120)).await.unwrap();
        assert_eq!(row.quantity, Decimal::from(120));
        assert_eq!(row.reserved_quantity, Decimal::from(30));
    }

    #[tokio::test]
    async fn test_upsert_cannot_drop_below_reserved() {
        let store = MemoryStore::new();
        store.put_stock(stock(1, 100)).await;
        store
            .reserve_all(1, &[StockLine::new(1, Decimal::from(30))], Utc::now())
            .await
            .unwrap();

        let err = store.upsert(stock(1, 29)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "quantity"));

        let row = StockStore::get(&store, StockKey::new(1, 1)).await.unwrap().unwrap();
        assert_eq!(row.quantity, Decimal::from(100));
        assert_eq!(row.reserved_quantity, Decimal::from(30));
    }

    #[tokio::test]
    async fn test_upsert_unit_change_needs_no_open_reservations() {
        let store = MemoryStore::new();
        store.put_stock(stock(1, 100)).await;
        store
            .reserve_all(1, &[StockLine::new(1, Decimal::from(30))], Utc::now())
            .await
            .unwrap();

        let in_kg = Stock {
            unit: "KG".to_string(),
            ..stock(1, 100)
        };
        let err = store.upsert(in_kg.clone()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "unit"));

        store
            .release_all(1, &[StockLine::new(1, Decimal::from(30))], Utc::now())
            .await
            .unwrap();
        let row = store.upsert(in_kg).await.unwrap();
        assert_eq!(row.unit, "KG");
    }

    #[tokio::test]
    async fn test_recount_to_on_hand_is_no_change() {
        let store = MemoryStore::new();
        store.put_stock(stock(1, 100)).await;

        let err = store
            .recount(StockKey::new(1, 1), Decimal::from(100), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NoStockChange));

        let (row, usage) = store
            .recount(StockKey::new(1, 1), Decimal::from(60), Utc::now())
            .await
            .unwrap();
        assert_eq!(usage, Decimal::from(40));
        assert_eq!(row.quantity, Decimal::from(60));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_daily_counts_accumulate_on_one_row() {
        let store = MemoryStore::new();
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let count = DailyCount {
            key: StockKey::new(1, 1),
            date,
            quantity: Decimal::ONE,
            system_quantity: Decimal::from(3),
            recorded_by: "barista".to_string(),
            notes: None,
        };

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let count = count.clone();
                tokio::spawn(async move { store.record_daily_count(&count, Utc::now()).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let rows = store.adjustments().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].entry_count, 8);
        assert_eq!(rows[0].actual_quantity, Decimal::from(8));
        assert_eq!(rows[0].variance, Decimal::from(5));
        assert_eq!(store.entries(rows[0].id).await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_receive_creates_row_and_cost() {
        let store = MemoryStore::new();
        let key = StockKey::new(1, 4);
        let (stock, cost) = store
            .receive(key, Decimal::from(10), "G", Decimal::from(2), Utc::now())
            .await
            .unwrap();
        assert_eq!(stock.quantity, Decimal::from(10));
        assert_eq!(cost.avg_cost, Decimal::from(2));
    }
}
