//! Stock ledger service
//!
//! Thin layer over [`StockStore`]: every mutation goes through the store's
//! atomic primitives, then the resulting rows are checked against their reorder
//! threshold off the request path.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use shared::{
    AdjustmentType, BranchId, InventoryCost, ReleaseOutcome, Stock, StockAlert, StockKey, StockLine,
};

use crate::error::{AppError, AppResult};
use crate::external::AlertPublisher;
use crate::store::{ReleasedStock, StockStore};

/// Authoritative quantity/reserved/available state per branch ingredient
#[derive(Clone)]
pub struct StockLedger {
    store: Arc<dyn StockStore>,
    alerts: Arc<dyn AlertPublisher>,
}

impl StockLedger {
    pub fn new(store: Arc<dyn StockStore>, alerts: Arc<dyn AlertPublisher>) -> Self {
        Self { store, alerts }
    }

    pub async fn find(&self, key: StockKey) -> AppResult<Option<Stock>> {
        self.store.get(key).await
    }

    /// The stock row, or `StockNotFound`
    pub async fn stock(&self, key: StockKey) -> AppResult<Stock> {
        self.store.get(key).await?.ok_or(AppError::StockNotFound {
            branch_id: key.branch_id,
            ingredient_id: key.ingredient_id,
        })
    }

    /// Set on-hand quantity, unit and threshold; open reservations are kept
    ///
    /// On-hand may not drop below what is reserved, and the unit is fixed while
    /// anything is reserved.
    pub async fn upsert(&self, stock: Stock) -> AppResult<Stock> {
        let row = self.store.upsert(stock).await?;
        self.evaluate_alerts(std::slice::from_ref(&row));
        Ok(row)
    }

    pub async fn reserve(&self, key: StockKey, qty: Decimal, now: DateTime<Utc>) -> AppResult<Stock> {
        let rows = self
            .reserve_all(key.branch_id, &[StockLine::new(key.ingredient_id, qty)], now)
            .await?;
        single(rows, key)
    }

    pub async fn commit(&self, key: StockKey, qty: Decimal, now: DateTime<Utc>) -> AppResult<Stock> {
        let rows = self
            .commit_all(key.branch_id, &[StockLine::new(key.ingredient_id, qty)], now)
            .await?;
        single(rows, key)
    }

    pub async fn release(&self, key: StockKey, qty: Decimal, now: DateTime<Utc>) -> AppResult<Stock> {
        let rows = self
            .release_all(key.branch_id, &[StockLine::new(key.ingredient_id, qty)], now)
            .await?;
        single(rows.into_iter().map(|r| r.stock).collect(), key)
    }

    /// Reserve a whole hold, or nothing
    pub async fn reserve_all(
        &self,
        branch_id: BranchId,
        lines: &[StockLine],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Stock>> {
        let rows = self.store.reserve_all(branch_id, lines, now).await?;
        tracing::debug!(branch_id, lines = rows.len(), "Reserved stock");
        self.evaluate_alerts(&rows);
        Ok(rows)
    }

    /// Deduct a whole hold, or nothing
    ///
    /// Available quantity does not move on commit, so no alert is evaluated.
    pub async fn commit_all(
        &self,
        branch_id: BranchId,
        lines: &[StockLine],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Stock>> {
        let rows = self.store.commit_all(branch_id, lines, now).await?;
        tracing::debug!(branch_id, lines = rows.len(), "Committed stock");
        Ok(rows)
    }

    /// Return reserved quantities; a release beyond what is reserved floors at zero
    pub async fn release_all(
        &self,
        branch_id: BranchId,
        lines: &[StockLine],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<ReleasedStock>> {
        let released = self.store.release_all(branch_id, lines, now).await?;
        for row in &released {
            if let ReleaseOutcome::Floored { missing } = row.outcome {
                tracing::warn!(
                    branch_id,
                    ingredient_id = row.stock.ingredient_id,
                    missing = %missing,
                    "Release exceeded reserved quantity; floored at zero"
                );
            }
        }
        let rows: Vec<Stock> = released.iter().map(|r| r.stock.clone()).collect();
        self.evaluate_alerts(&rows);
        Ok(released)
    }

    pub async fn adjust(
        &self,
        key: StockKey,
        delta: Decimal,
        direction: AdjustmentType,
        now: DateTime<Utc>,
    ) -> AppResult<Stock> {
        let row = self.store.adjust(key, delta, direction, now).await?;
        tracing::info!(
            branch_id = key.branch_id,
            ingredient_id = key.ingredient_id,
            direction = direction.as_str(),
            delta = %delta,
            quantity = %row.quantity,
            "Adjusted stock"
        );
        self.evaluate_alerts(std::slice::from_ref(&row));
        Ok(row)
    }

    /// Set on-hand to a physical count under the row lock; returns the signed usage
    pub async fn recount(
        &self,
        key: StockKey,
        physical: Decimal,
        now: DateTime<Utc>,
    ) -> AppResult<(Stock, Decimal)> {
        let (row, usage) = self.store.recount(key, physical, now).await?;
        tracing::info!(
            branch_id = key.branch_id,
            ingredient_id = key.ingredient_id,
            usage = %usage,
            quantity = %row.quantity,
            "Recounted stock"
        );
        self.evaluate_alerts(std::slice::from_ref(&row));
        Ok((row, usage))
    }

    /// Receiving: add stock (creating the row) and fold the price into the average cost
    pub async fn increase(
        &self,
        key: StockKey,
        qty: Decimal,
        unit: &str,
        unit_price: Decimal,
        now: DateTime<Utc>,
    ) -> AppResult<(Stock, InventoryCost)> {
        let (row, cost) = self.store.receive(key, qty, unit, unit_price, now).await?;
        self.evaluate_alerts(std::slice::from_ref(&row));
        Ok((row, cost))
    }

    pub async fn cost(&self, key: StockKey) -> AppResult<Option<InventoryCost>> {
        self.store.cost(key).await
    }

    /// Publish alerts for rows that warrant one, without blocking the caller
    fn evaluate_alerts(&self, rows: &[Stock]) {
        let now = Utc::now();
        let alerts: Vec<StockAlert> = rows
            .iter()
            .filter_map(|row| StockAlert::for_stock(row, now))
            .collect();
        if alerts.is_empty() {
            return;
        }

        let publisher = Arc::clone(&self.alerts);
        tokio::spawn(async move {
            for alert in alerts {
                if let Err(e) = publisher.publish(&alert).await {
                    tracing::warn!(
                        branch_id = alert.branch_id,
                        ingredient_id = alert.ingredient_id,
                        error = %e,
                        "Failed to publish stock alert"
                    );
                }
            }
        });
    }
}

fn single(rows: Vec<Stock>, key: StockKey) -> AppResult<Stock> {
    rows.into_iter().next().ok_or(AppError::StockNotFound {
        branch_id: key.branch_id,
        ingredient_id: key.ingredient_id,
    })
}
