//! PostgreSQL store
//!
//! Multi-row stock operations run in one transaction and lock their rows with
//! `SELECT ... FOR UPDATE` in ascending ingredient order, so two checkouts that
//! touch the same ingredients always queue in the same order.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use shared::{
    normalize_lines, normalize_unit_code, weighted_average_cost, AdjustmentSource, AdjustmentType,
    BranchHours, BranchId, ConversionScope, HoldOwner, IngredientId, IngredientUnitConversion,
    InventoryCost, ProductDetailId, Recipe, RecipeLine, Reservation, ReservationStatus, Stock,
    StockAdjustment, StockAdjustmentEntry, StockKey, StockLine, Unit, UnitKind,
};

use super::{
    merge_upsert, stage_lines, AdjustmentStore, BranchSchedule, DailyCount, HoldClaim, RecipeLookup,
    ReleasedStock, ReservationStore, StockStore, UnitStore,
};
use crate::error::{AppError, AppResult};

const STOCK_COLUMNS: &str =
    "branch_id, ingredient_id, quantity, reserved_quantity, unit, threshold, last_updated";

const RESERVATION_COLUMNS: &str = "id, group_id, branch_id, ingredient_id, quantity_reserved, \
     unit_code, status, expires_at, cart_id, guest_id, order_id, created_at, committed_at, released_at";

const ADJUSTMENT_COLUMNS: &str = "id, branch_id, ingredient_id, adjustment_date, adjustment_type, \
     status, source, system_quantity, actual_quantity, variance, quantity, entry_count, last_entry_at, \
     notes, reason, forced, created_at, committed_at";

/// Postgres-backed implementation of every store trait
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Lock the branch rows named by `lines`, ascending by ingredient
    async fn lock_rows(
        tx: &mut Transaction<'_, Postgres>,
        branch_id: BranchId,
        lines: &[StockLine],
    ) -> AppResult<HashMap<IngredientId, Stock>> {
        let ingredient_ids: Vec<IngredientId> = normalize_lines(lines)
            .iter()
            .map(|line| line.ingredient_id)
            .collect();

        let rows = sqlx::query_as::<_, StockRow>(&format!(
            "SELECT {STOCK_COLUMNS} FROM stock \
             WHERE branch_id = $1 AND ingredient_id = ANY($2) \
             ORDER BY ingredient_id \
             FOR UPDATE"
        ))
        .bind(branch_id)
        .bind(&ingredient_ids)
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.ingredient_id, Stock::from(row)))
            .collect())
    }

    async fn write_stock(tx: &mut Transaction<'_, Postgres>, stock: &Stock) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE stock
            SET quantity = $3, reserved_quantity = $4, last_updated = $5
            WHERE branch_id = $1 AND ingredient_id = $2
            "#,
        )
        .bind(stock.branch_id)
        .bind(stock.ingredient_id)
        .bind(stock.quantity)
        .bind(stock.reserved_quantity)
        .bind(stock.last_updated)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_entry(
        tx: &mut Transaction<'_, Postgres>,
        entry: &StockAdjustmentEntry,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_adjustment_entries
                (id, adjustment_id, entry_quantity, recorded_by, entry_time, source, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id)
        .bind(entry.adjustment_id)
        .bind(entry.entry_quantity)
        .bind(&entry.recorded_by)
        .bind(entry.entry_time)
        .bind(entry.source.as_str())
        .bind(&entry.notes)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Overwrite an adjustment row; with `only_pending` the write is skipped
    /// unless the stored row is still PENDING
    async fn overwrite_adjustment(
        &self,
        adjustment: &StockAdjustment,
        only_pending: bool,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE stock_adjustments
            SET adjustment_type = $2, status = $3, system_quantity = $4, actual_quantity = $5,
                variance = $6, quantity = $7, entry_count = $8, last_entry_at = $9, notes = $10,
                reason = $11, forced = $12, committed_at = $13
            WHERE id = $1 AND (NOT $14 OR status = 'PENDING')
            "#,
        )
        .bind(adjustment.id)
        .bind(adjustment.adjustment_type.as_str())
        .bind(adjustment.status.as_str())
        .bind(adjustment.system_quantity)
        .bind(adjustment.actual_quantity)
        .bind(adjustment.variance)
        .bind(adjustment.quantity)
        .bind(adjustment.entry_count)
        .bind(adjustment.last_entry_at)
        .bind(&adjustment.notes)
        .bind(&adjustment.reason)
        .bind(adjustment.forced)
        .bind(adjustment.committed_at)
        .bind(only_pending)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

// ============================================================================
// Row types
// ============================================================================

#[derive(Debug, FromRow)]
struct StockRow {
    branch_id: BranchId,
    ingredient_id: IngredientId,
    quantity: Decimal,
    reserved_quantity: Decimal,
    unit: String,
    threshold: Decimal,
    last_updated: DateTime<Utc>,
}

impl From<StockRow> for Stock {
    fn from(row: StockRow) -> Self {
        Stock {
            branch_id: row.branch_id,
            ingredient_id: row.ingredient_id,
            quantity: row.quantity,
            reserved_quantity: row.reserved_quantity,
            unit: row.unit,
            threshold: row.threshold,
            last_updated: row.last_updated,
        }
    }
}

#[derive(Debug, FromRow)]
struct CostRow {
    branch_id: BranchId,
    ingredient_id: IngredientId,
    avg_cost: Decimal,
    updated_at: DateTime<Utc>,
}

impl From<CostRow> for InventoryCost {
    fn from(row: CostRow) -> Self {
        InventoryCost {
            branch_id: row.branch_id,
            ingredient_id: row.ingredient_id,
            avg_cost: row.avg_cost,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ReservationRow {
    id: Uuid,
    group_id: Uuid,
    branch_id: BranchId,
    ingredient_id: IngredientId,
    quantity_reserved: Decimal,
    unit_code: String,
    status: String,
    expires_at: DateTime<Utc>,
    cart_id: Option<Uuid>,
    guest_id: Option<Uuid>,
    order_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    committed_at: Option<DateTime<Utc>>,
    released_at: Option<DateTime<Utc>>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = AppError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        let owner = HoldOwner::from_parts(row.cart_id, row.guest_id)
            .ok_or_else(|| AppError::Internal(format!("reservation {} has no owner", row.id)))?;
        Ok(Reservation {
            id: row.id,
            group_id: row.group_id,
            branch_id: row.branch_id,
            ingredient_id: row.ingredient_id,
            quantity_reserved: row.quantity_reserved,
            unit_code: row.unit_code,
            status: row.status.parse().map_err(corrupt)?,
            expires_at: row.expires_at,
            owner,
            order_id: row.order_id,
            created_at: row.created_at,
            committed_at: row.committed_at,
            released_at: row.released_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AdjustmentRow {
    id: Uuid,
    branch_id: BranchId,
    ingredient_id: IngredientId,
    adjustment_date: NaiveDate,
    adjustment_type: String,
    status: String,
    source: String,
    system_quantity: Decimal,
    actual_quantity: Decimal,
    variance: Decimal,
    quantity: Decimal,
    entry_count: i32,
    last_entry_at: Option<DateTime<Utc>>,
    notes: Option<String>,
    reason: Option<String>,
    forced: bool,
    created_at: DateTime<Utc>,
    committed_at: Option<DateTime<Utc>>,
}

impl TryFrom<AdjustmentRow> for StockAdjustment {
    type Error = AppError;

    fn try_from(row: AdjustmentRow) -> Result<Self, Self::Error> {
        Ok(StockAdjustment {
            id: row.id,
            branch_id: row.branch_id,
            ingredient_id: row.ingredient_id,
            adjustment_date: row.adjustment_date,
            adjustment_type: row.adjustment_type.parse().map_err(corrupt)?,
            status: row.status.parse().map_err(corrupt)?,
            source: row.source.parse().map_err(corrupt)?,
            system_quantity: row.system_quantity,
            actual_quantity: row.actual_quantity,
            variance: row.variance,
            quantity: row.quantity,
            entry_count: row.entry_count,
            last_entry_at: row.last_entry_at,
            notes: row.notes,
            reason: row.reason,
            forced: row.forced,
            created_at: row.created_at,
            committed_at: row.committed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct EntryRow {
    id: Uuid,
    adjustment_id: Uuid,
    entry_quantity: Decimal,
    recorded_by: String,
    entry_time: DateTime<Utc>,
    source: String,
    notes: Option<String>,
}

impl TryFrom<EntryRow> for StockAdjustmentEntry {
    type Error = AppError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        Ok(StockAdjustmentEntry {
            id: row.id,
            adjustment_id: row.adjustment_id,
            entry_quantity: row.entry_quantity,
            recorded_by: row.recorded_by,
            entry_time: row.entry_time,
            source: row.source.parse().map_err(corrupt)?,
            notes: row.notes,
        })
    }
}

#[derive(Debug, FromRow)]
struct UnitRow {
    code: String,
    dimension: String,
    base_unit_code: Option<String>,
    factor_to_base: Option<Decimal>,
}

impl TryFrom<UnitRow> for Unit {
    type Error = AppError;

    fn try_from(row: UnitRow) -> Result<Self, Self::Error> {
        let dimension = row.dimension.parse().map_err(corrupt)?;
        let kind = match (row.base_unit_code, row.factor_to_base) {
            (Some(base), Some(factor)) if base != row.code => UnitKind::Derived {
                base_unit_code: base,
                factor_to_base: factor,
            },
            _ => UnitKind::Base,
        };
        Ok(Unit {
            code: row.code,
            dimension,
            kind,
        })
    }
}

#[derive(Debug, FromRow)]
struct ConversionRow {
    id: i64,
    ingredient_id: IngredientId,
    from_unit: String,
    to_unit: String,
    factor: Decimal,
    scope: String,
    branch_id: Option<BranchId>,
    active: bool,
}

impl TryFrom<ConversionRow> for IngredientUnitConversion {
    type Error = AppError;

    fn try_from(row: ConversionRow) -> Result<Self, Self::Error> {
        Ok(IngredientUnitConversion {
            id: row.id,
            ingredient_id: row.ingredient_id,
            from_unit: row.from_unit,
            to_unit: row.to_unit,
            factor: row.factor,
            scope: row.scope.parse().map_err(corrupt)?,
            branch_id: row.branch_id,
            active: row.active,
        })
    }
}

#[derive(Debug, FromRow)]
struct RecipeLineRow {
    ingredient_id: IngredientId,
    quantity: Decimal,
    unit_code: String,
}

#[derive(Debug, FromRow)]
struct BranchHoursRow {
    branch_id: BranchId,
    opening_time: NaiveTime,
    closing_time: NaiveTime,
    utc_offset_minutes: i32,
}

fn corrupt(err: shared::ParseEnumError) -> AppError {
    AppError::Internal(format!("corrupt row: {err}"))
}

// ============================================================================
// Stock
// ============================================================================

#[async_trait]
impl StockStore for PgStore {
    async fn get(&self, key: StockKey) -> AppResult<Option<Stock>> {
        let row = sqlx::query_as::<_, StockRow>(&format!(
            "SELECT {STOCK_COLUMNS} FROM stock WHERE branch_id = $1 AND ingredient_id = $2"
        ))
        .bind(key.branch_id)
        .bind(key.ingredient_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Stock::from))
    }

    async fn upsert(&self, stock: Stock) -> AppResult<Stock> {
        let mut tx = self.pool.begin().await?;
        let mut current = Self::lock_rows(
            &mut tx,
            stock.branch_id,
            &[StockLine::new(stock.ingredient_id, stock.quantity)],
        )
        .await?;
        let merged = merge_upsert(current.remove(&stock.ingredient_id).as_ref(), stock)?;

        let row = sqlx::query_as::<_, StockRow>(&format!(
            r#"
            INSERT INTO stock ({STOCK_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (branch_id, ingredient_id) DO UPDATE
            SET quantity = EXCLUDED.quantity,
                unit = EXCLUDED.unit,
                threshold = EXCLUDED.threshold,
                last_updated = EXCLUDED.last_updated
            RETURNING {STOCK_COLUMNS}
            "#
        ))
        .bind(merged.branch_id)
        .bind(merged.ingredient_id)
        .bind(merged.quantity)
        .bind(merged.reserved_quantity)
        .bind(&merged.unit)
        .bind(merged.threshold)
        .bind(merged.last_updated)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn reserve_all(
        &self,
        branch_id: BranchId,
        lines: &[StockLine],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Stock>> {
        let mut tx = self.pool.begin().await?;
        let rows = Self::lock_rows(&mut tx, branch_id, lines).await?;
        let staged = stage_lines(branch_id, lines, &rows, |row, qty| row.reserve(qty, now))?;
        for row in &staged {
            Self::write_stock(&mut tx, row).await?;
        }
        tx.commit().await?;
        Ok(staged)
    }

    async fn commit_all(
        &self,
        branch_id: BranchId,
        lines: &[StockLine],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Stock>> {
        let mut tx = self.pool.begin().await?;
        let rows = Self::lock_rows(&mut tx, branch_id, lines).await?;
        let staged = stage_lines(branch_id, lines, &rows, |row, qty| row.commit(qty, now))?;
        for row in &staged {
            Self::write_stock(&mut tx, row).await?;
        }
        tx.commit().await?;
        Ok(staged)
    }

    async fn release_all(
        &self,
        branch_id: BranchId,
        lines: &[StockLine],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<ReleasedStock>> {
        let mut tx = self.pool.begin().await?;
        let mut rows = Self::lock_rows(&mut tx, branch_id, lines).await?;
        let mut released = Vec::with_capacity(rows.len());
        for line in normalize_lines(lines) {
            let Some(row) = rows.get_mut(&line.ingredient_id) else {
                continue;
            };
            let outcome = row.release(line.quantity, now)?;
            Self::write_stock(&mut tx, row).await?;
            released.push(ReleasedStock {
                stock: row.clone(),
                outcome,
            });
        }
        tx.commit().await?;
        Ok(released)
    }

    async fn adjust(
        &self,
        key: StockKey,
        delta: Decimal,
        direction: AdjustmentType,
        now: DateTime<Utc>,
    ) -> AppResult<Stock> {
        let mut tx = self.pool.begin().await?;
        let mut rows = Self::lock_rows(
            &mut tx,
            key.branch_id,
            &[StockLine::new(key.ingredient_id, delta)],
        )
        .await?;
        let mut row = rows.remove(&key.ingredient_id).ok_or(AppError::StockNotFound {
            branch_id: key.branch_id,
            ingredient_id: key.ingredient_id,
        })?;
        row.adjust(delta, direction, now)?;
        Self::write_stock(&mut tx, &row).await?;
        tx.commit().await?;
        Ok(row)
    }

    async fn recount(
        &self,
        key: StockKey,
        physical: Decimal,
        now: DateTime<Utc>,
    ) -> AppResult<(Stock, Decimal)> {
        let mut tx = self.pool.begin().await?;
        let mut rows = Self::lock_rows(
            &mut tx,
            key.branch_id,
            &[StockLine::new(key.ingredient_id, physical)],
        )
        .await?;
        let mut row = rows.remove(&key.ingredient_id).ok_or(AppError::StockNotFound {
            branch_id: key.branch_id,
            ingredient_id: key.ingredient_id,
        })?;
        let usage = row.recount(physical, now)?;
        if usage.is_zero() {
            return Err(AppError::NoStockChange);
        }
        Self::write_stock(&mut tx, &row).await?;
        tx.commit().await?;
        Ok((row, usage))
    }

    async fn receive(
        &self,
        key: StockKey,
        quantity: Decimal,
        unit: &str,
        unit_price: Decimal,
        now: DateTime<Utc>,
    ) -> AppResult<(Stock, InventoryCost)> {
        let mut tx = self.pool.begin().await?;

        // Create the row first so there is always something to lock
        sqlx::query(
            r#"
            INSERT INTO stock (branch_id, ingredient_id, quantity, reserved_quantity, unit, threshold, last_updated)
            VALUES ($1, $2, 0, 0, $3, 0, $4)
            ON CONFLICT (branch_id, ingredient_id) DO NOTHING
            "#,
        )
        .bind(key.branch_id)
        .bind(key.ingredient_id)
        .bind(unit)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let mut rows = Self::lock_rows(
            &mut tx,
            key.branch_id,
            &[StockLine::new(key.ingredient_id, quantity)],
        )
        .await?;
        let mut stock = rows.remove(&key.ingredient_id).ok_or(AppError::StockNotFound {
            branch_id: key.branch_id,
            ingredient_id: key.ingredient_id,
        })?;

        let old_avg = sqlx::query_scalar::<_, Decimal>(
            "SELECT avg_cost FROM inventory_costs WHERE branch_id = $1 AND ingredient_id = $2 FOR UPDATE",
        )
        .bind(key.branch_id)
        .bind(key.ingredient_id)
        .fetch_optional(&mut *tx)
        .await?
        .unwrap_or(Decimal::ZERO);

        let old_qty = stock.quantity;
        stock.increase(quantity, now)?;
        let avg_cost = weighted_average_cost(old_qty, old_avg, quantity, unit_price);

        Self::write_stock(&mut tx, &stock).await?;
        let cost = sqlx::query_as::<_, CostRow>(
            r#"
            INSERT INTO inventory_costs (branch_id, ingredient_id, avg_cost, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (branch_id, ingredient_id) DO UPDATE
            SET avg_cost = EXCLUDED.avg_cost, updated_at = EXCLUDED.updated_at
            RETURNING branch_id, ingredient_id, avg_cost, updated_at
            "#,
        )
        .bind(key.branch_id)
        .bind(key.ingredient_id)
        .bind(avg_cost)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((stock, cost.into()))
    }

    async fn cost(&self, key: StockKey) -> AppResult<Option<InventoryCost>> {
        let row = sqlx::query_as::<_, CostRow>(
            "SELECT branch_id, ingredient_id, avg_cost, updated_at FROM inventory_costs \
             WHERE branch_id = $1 AND ingredient_id = $2",
        )
        .bind(key.branch_id)
        .bind(key.ingredient_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(InventoryCost::from))
    }
}

// ============================================================================
// Reservations
// ============================================================================

#[async_trait]
impl ReservationStore for PgStore {
    async fn insert_all(&self, rows: &[Reservation]) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(&format!(
                "INSERT INTO reservations ({RESERVATION_COLUMNS}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
            ))
            .bind(row.id)
            .bind(row.group_id)
            .bind(row.branch_id)
            .bind(row.ingredient_id)
            .bind(row.quantity_reserved)
            .bind(&row.unit_code)
            .bind(row.status.as_str())
            .bind(row.expires_at)
            .bind(row.owner.cart_id())
            .bind(row.owner.guest_id())
            .bind(row.order_id)
            .bind(row.created_at)
            .bind(row.committed_at)
            .bind(row.released_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn by_group(&self, group_id: Uuid) -> AppResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE group_id = $1 ORDER BY ingredient_id"
        ))
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Reservation::try_from).collect()
    }

    async fn claim(&self, group_id: Uuid, claim: HoldClaim) -> AppResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, ReservationRow>(&format!(
            r#"
            UPDATE reservations
            SET status = $2::text,
                committed_at = CASE WHEN $2::text = 'COMMITTED' THEN $3 ELSE committed_at END,
                released_at = CASE WHEN $2::text = 'RELEASED' THEN $3 ELSE released_at END,
                order_id = COALESCE($4::uuid, order_id)
            WHERE group_id = $1
              AND status = 'ACTIVE'
              AND (NOT $5 OR expires_at >= $3)
            RETURNING {RESERVATION_COLUMNS}
            "#
        ))
        .bind(group_id)
        .bind(claim.to.as_str())
        .bind(claim.now)
        .bind(claim.order_id.filter(|_| claim.to == ReservationStatus::Committed))
        .bind(claim.skip_expired)
        .fetch_all(&self.pool)
        .await?;

        let mut claimed = rows
            .into_iter()
            .map(Reservation::try_from)
            .collect::<AppResult<Vec<_>>>()?;
        claimed.sort_by_key(|r| r.ingredient_id);
        Ok(claimed)
    }

    async fn unclaim(&self, ids: &[Uuid]) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE reservations
            SET status = 'ACTIVE', committed_at = NULL, released_at = NULL, order_id = NULL
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn expired_groups(&self, now: DateTime<Utc>) -> AppResult<Vec<Uuid>> {
        let groups = sqlx::query_scalar::<_, Uuid>(
            "SELECT DISTINCT group_id FROM reservations \
             WHERE status = 'ACTIVE' AND expires_at < $1 ORDER BY group_id",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(groups)
    }

    async fn purge_released(&self, before: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            "DELETE FROM reservations WHERE status = 'RELEASED' AND released_at < $1",
        )
        .bind(before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn group_by_order(&self, order_id: Uuid) -> AppResult<Option<Uuid>> {
        let group = sqlx::query_scalar::<_, Uuid>(
            "SELECT group_id FROM reservations WHERE order_id = $1 ORDER BY created_at LIMIT 1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(group)
    }

    async fn committed_quantity(
        &self,
        key: StockKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Decimal> {
        let total = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(quantity_reserved), 0)
            FROM reservations
            WHERE status = 'COMMITTED'
              AND branch_id = $1 AND ingredient_id = $2
              AND committed_at >= $3 AND committed_at < $4
            "#,
        )
        .bind(key.branch_id)
        .bind(key.ingredient_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }
}

// ============================================================================
// Adjustments
// ============================================================================

#[async_trait]
impl AdjustmentStore for PgStore {
    async fn get(&self, id: Uuid) -> AppResult<Option<StockAdjustment>> {
        let row = sqlx::query_as::<_, AdjustmentRow>(&format!(
            "SELECT {ADJUSTMENT_COLUMNS} FROM stock_adjustments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(StockAdjustment::try_from).transpose()
    }

    async fn record_daily_count(&self, count: &DailyCount, now: DateTime<Utc>) -> AppResult<StockAdjustment> {
        // A fresh row carries this count alone; on conflict it is folded into the pending one
        let mut fresh = StockAdjustment::pending(
            count.key.branch_id,
            count.key.ingredient_id,
            count.date,
            AdjustmentSource::Daily,
            now,
        );
        let mut entry = fresh.record_entry(count.quantity, count.recorded_by.as_str(), count.notes.clone(), now);
        fresh.recompute(count.system_quantity);

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, AdjustmentRow>(&format!(
            r#"
            INSERT INTO stock_adjustments ({ADJUSTMENT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (branch_id, ingredient_id, adjustment_date, source) WHERE status = 'PENDING'
            DO UPDATE
            SET actual_quantity = stock_adjustments.actual_quantity + EXCLUDED.actual_quantity,
                system_quantity = EXCLUDED.system_quantity,
                variance = stock_adjustments.actual_quantity + EXCLUDED.actual_quantity - EXCLUDED.system_quantity,
                quantity = ABS(stock_adjustments.actual_quantity + EXCLUDED.actual_quantity - EXCLUDED.system_quantity),
                adjustment_type = CASE
                    WHEN stock_adjustments.actual_quantity + EXCLUDED.actual_quantity >= EXCLUDED.system_quantity
                    THEN 'ADJUST_OUT' ELSE 'ADJUST_IN' END,
                entry_count = stock_adjustments.entry_count + 1,
                last_entry_at = EXCLUDED.last_entry_at,
                notes = COALESCE(EXCLUDED.notes, stock_adjustments.notes)
            RETURNING {ADJUSTMENT_COLUMNS}
            "#
        ))
        .bind(fresh.id)
        .bind(fresh.branch_id)
        .bind(fresh.ingredient_id)
        .bind(fresh.adjustment_date)
        .bind(fresh.adjustment_type.as_str())
        .bind(fresh.status.as_str())
        .bind(fresh.source.as_str())
        .bind(fresh.system_quantity)
        .bind(fresh.actual_quantity)
        .bind(fresh.variance)
        .bind(fresh.quantity)
        .bind(fresh.entry_count)
        .bind(fresh.last_entry_at)
        .bind(&fresh.notes)
        .bind(&fresh.reason)
        .bind(fresh.forced)
        .bind(fresh.created_at)
        .bind(fresh.committed_at)
        .fetch_one(&mut *tx)
        .await?;
        let adjustment = StockAdjustment::try_from(row)?;

        entry.adjustment_id = adjustment.id;
        Self::insert_entry(&mut tx, &entry).await?;

        tx.commit().await?;
        Ok(adjustment)
    }

    async fn insert_with_entry(
        &self,
        adjustment: &StockAdjustment,
        entry: &StockAdjustmentEntry,
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            r#"
            INSERT INTO stock_adjustments ({ADJUSTMENT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#
        ))
        .bind(adjustment.id)
        .bind(adjustment.branch_id)
        .bind(adjustment.ingredient_id)
        .bind(adjustment.adjustment_date)
        .bind(adjustment.adjustment_type.as_str())
        .bind(adjustment.status.as_str())
        .bind(adjustment.source.as_str())
        .bind(adjustment.system_quantity)
        .bind(adjustment.actual_quantity)
        .bind(adjustment.variance)
        .bind(adjustment.quantity)
        .bind(adjustment.entry_count)
        .bind(adjustment.last_entry_at)
        .bind(&adjustment.notes)
        .bind(&adjustment.reason)
        .bind(adjustment.forced)
        .bind(adjustment.created_at)
        .bind(adjustment.committed_at)
        .execute(&mut *tx)
        .await?;

        Self::insert_entry(&mut tx, entry).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn update_pending(&self, adjustment: &StockAdjustment) -> AppResult<bool> {
        self.overwrite_adjustment(adjustment, true).await
    }

    async fn finalize(&self, adjustment: &StockAdjustment) -> AppResult<bool> {
        self.overwrite_adjustment(adjustment, true).await
    }

    async fn reopen(&self, adjustment: &StockAdjustment) -> AppResult<()> {
        let mut reopened = adjustment.clone();
        reopened.status = shared::AdjustmentStatus::Pending;
        reopened.committed_at = None;
        self.overwrite_adjustment(&reopened, false).await?;
        Ok(())
    }

    async fn delete_pending(&self, id: Uuid) -> AppResult<bool> {
        // Entries go with the row via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM stock_adjustments WHERE id = $1 AND status = 'PENDING'")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn entries(&self, id: Uuid) -> AppResult<Vec<StockAdjustmentEntry>> {
        let rows = sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT id, adjustment_id, entry_quantity, recorded_by, entry_time, source, notes
            FROM stock_adjustment_entries
            WHERE adjustment_id = $1
            ORDER BY entry_time
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(StockAdjustmentEntry::try_from).collect()
    }

    async fn pending_branches(&self) -> AppResult<Vec<BranchId>> {
        let branches = sqlx::query_scalar::<_, BranchId>(
            "SELECT DISTINCT branch_id FROM stock_adjustments \
             WHERE status = 'PENDING' AND source = 'DAILY' ORDER BY branch_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(branches)
    }

    async fn pending_for_branch(&self, branch_id: BranchId) -> AppResult<Vec<StockAdjustment>> {
        let rows = sqlx::query_as::<_, AdjustmentRow>(&format!(
            "SELECT {ADJUSTMENT_COLUMNS} FROM stock_adjustments \
             WHERE branch_id = $1 AND status = 'PENDING' AND source = 'DAILY' \
             ORDER BY adjustment_date, ingredient_id"
        ))
        .bind(branch_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(StockAdjustment::try_from).collect()
    }
}

// ============================================================================
// Collaborators
// ============================================================================

#[async_trait]
impl UnitStore for PgStore {
    async fn unit(&self, code: &str) -> AppResult<Option<Unit>> {
        let row = sqlx::query_as::<_, UnitRow>(
            "SELECT code, dimension, base_unit_code, factor_to_base FROM units WHERE code = $1",
        )
        .bind(normalize_unit_code(code))
        .fetch_optional(&self.pool)
        .await?;
        row.map(Unit::try_from).transpose()
    }

    async fn conversion(
        &self,
        ingredient_id: IngredientId,
        from_unit: &str,
        to_unit: &str,
        scope: ConversionScope,
        branch_id: Option<BranchId>,
    ) -> AppResult<Option<IngredientUnitConversion>> {
        let row = sqlx::query_as::<_, ConversionRow>(
            r#"
            SELECT id, ingredient_id, from_unit, to_unit, factor, scope, branch_id, active
            FROM ingredient_unit_conversions
            WHERE ingredient_id = $1
              AND from_unit = $2
              AND to_unit = $3
              AND scope = $4
              AND active
              AND ($4 = 'GLOBAL' OR branch_id = $5)
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(ingredient_id)
        .bind(normalize_unit_code(from_unit))
        .bind(normalize_unit_code(to_unit))
        .bind(scope.as_str())
        .bind(branch_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(IngredientUnitConversion::try_from).transpose()
    }
}

#[async_trait]
impl RecipeLookup for PgStore {
    async fn recipe(&self, product_detail_id: ProductDetailId) -> AppResult<Option<Recipe>> {
        let yield_quantity = sqlx::query_scalar::<_, Decimal>(
            "SELECT yield_quantity FROM recipes WHERE product_detail_id = $1",
        )
        .bind(product_detail_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(yield_quantity) = yield_quantity else {
            return Ok(None);
        };

        let lines = sqlx::query_as::<_, RecipeLineRow>(
            "SELECT ingredient_id, quantity, unit_code FROM recipe_lines \
             WHERE product_detail_id = $1 ORDER BY ingredient_id",
        )
        .bind(product_detail_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(Recipe {
            product_detail_id,
            yield_quantity,
            lines: lines
                .into_iter()
                .map(|l| RecipeLine {
                    ingredient_id: l.ingredient_id,
                    quantity: l.quantity,
                    unit_code: l.unit_code,
                })
                .collect(),
        }))
    }
}

#[async_trait]
impl BranchSchedule for PgStore {
    async fn hours(&self, branch_id: BranchId) -> AppResult<Option<BranchHours>> {
        let row = sqlx::query_as::<_, BranchHoursRow>(
            "SELECT branch_id, opening_time, closing_time, utc_offset_minutes FROM branch_hours \
             WHERE branch_id = $1",
        )
        .bind(branch_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| BranchHours {
            branch_id: r.branch_id,
            opening_time: r.opening_time,
            closing_time: r.closing_time,
            utc_offset_minutes: r.utc_offset_minutes,
        }))
    }
}
