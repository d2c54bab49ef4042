//! Checkout holds: reserve on checkout, commit on payment, release on cancel or expiry

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use shared::{
    hold_lines, round_quantity, BranchId, HoldOwner, IngredientId, ProductDetailId, Reservation,
    ReservationStatus, Stock, StockKey, StockLine,
};

use super::{validate_positive, StockLedger, UnitConversionResolver};
use crate::error::{AppError, AppResult};
use crate::store::{HoldClaim, RecipeLookup, ReservationStore};

/// Input for placing a hold
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CheckAndReserveInput {
    pub branch_id: BranchId,
    pub cart_id: Option<Uuid>,
    pub guest_id: Option<Uuid>,
    #[validate(length(min = 1, message = "At least one item is required"))]
    pub items: Vec<HoldItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HoldItem {
    pub product_detail_id: ProductDetailId,
    #[validate(custom = "validate_positive")]
    pub quantity: Decimal,
}

/// Reserved amount of one ingredient
#[derive(Debug, Clone, Serialize)]
pub struct IngredientSummary {
    pub ingredient_id: IngredientId,
    pub quantity: Decimal,
    pub unit_code: String,
    pub available_after: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemSummary {
    pub product_detail_id: ProductDetailId,
    pub quantity: Decimal,
    /// Items without a recipe hold no stock
    pub recipe_found: bool,
}

/// A placed hold
#[derive(Debug, Clone, Serialize)]
pub struct HoldSummary {
    pub hold_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub ingredient_summaries: Vec<IngredientSummary>,
    pub item_summaries: Vec<ItemSummary>,
}

/// Result of an expiry sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub groups_released: usize,
    pub reservations_released: usize,
}

/// Hold lifecycle over the stock ledger
#[derive(Clone)]
pub struct ReservationManager {
    ledger: StockLedger,
    resolver: UnitConversionResolver,
    reservations: Arc<dyn ReservationStore>,
    recipes: Arc<dyn RecipeLookup>,
    hold_ttl: Duration,
    released_retention: Duration,
}

impl ReservationManager {
    pub fn new(
        ledger: StockLedger,
        resolver: UnitConversionResolver,
        reservations: Arc<dyn ReservationStore>,
        recipes: Arc<dyn RecipeLookup>,
        hold_ttl: Duration,
        released_retention: Duration,
    ) -> Self {
        Self {
            ledger,
            resolver,
            reservations,
            recipes,
            hold_ttl,
            released_retention,
        }
    }

    /// Check availability for every ingredient of the order and hold it
    ///
    /// Either every ingredient is reserved and one row per ingredient is stored,
    /// or nothing changes.
    pub async fn check_and_reserve(
        &self,
        input: CheckAndReserveInput,
        now: DateTime<Utc>,
    ) -> AppResult<HoldSummary> {
        let owner = HoldOwner::from_parts(input.cart_id, input.guest_id).ok_or(AppError::InvalidSession)?;
        input.validate()?;
        for item in &input.items {
            item.validate()?;
        }

        let branch_id = input.branch_id;
        let mut required: BTreeMap<IngredientId, (Decimal, String)> = BTreeMap::new();
        let mut item_summaries = Vec::with_capacity(input.items.len());

        for item in &input.items {
            let recipe = self.recipes.recipe(item.product_detail_id).await?;
            item_summaries.push(ItemSummary {
                product_detail_id: item.product_detail_id,
                quantity: item.quantity,
                recipe_found: recipe.is_some(),
            });
            let Some(recipe) = recipe else {
                tracing::debug!(product_detail_id = item.product_detail_id, "No recipe; item holds nothing");
                continue;
            };

            for line in recipe.scaled_lines(item.quantity) {
                let key = StockKey::new(branch_id, line.ingredient_id);
                let target_unit = match self.ledger.find(key).await? {
                    Some(stock) => stock.unit,
                    None => shared::normalize_unit_code(&line.unit_code),
                };
                let quantity = self
                    .resolver
                    .convert(line.ingredient_id, &line.unit_code, &target_unit, line.quantity, Some(branch_id))
                    .await?;
                let entry = required
                    .entry(line.ingredient_id)
                    .or_insert((Decimal::ZERO, target_unit));
                entry.0 += quantity;
            }
        }

        if required.is_empty() {
            return Err(AppError::NoRecipeFound);
        }

        // Requirements that round away in the stock unit hold nothing
        let (lines, negligible): (Vec<StockLine>, Vec<StockLine>) = required
            .iter()
            .map(|(ingredient_id, (qty, _))| StockLine::new(*ingredient_id, round_quantity(*qty)))
            .partition(|line| line.quantity > Decimal::ZERO);
        for line in &negligible {
            tracing::debug!(branch_id, ingredient_id = line.ingredient_id, "Requirement rounds to zero; not reserved");
        }

        let stocks = if lines.is_empty() {
            Vec::new()
        } else {
            self.reserve_lines(branch_id, &lines, &required, now).await?
        };

        let hold_id = Uuid::new_v4();
        let expires_at = now + self.hold_ttl;
        let rows: Vec<Reservation> = lines
            .iter()
            .map(|line| Reservation {
                id: Uuid::new_v4(),
                group_id: hold_id,
                branch_id,
                ingredient_id: line.ingredient_id,
                quantity_reserved: line.quantity,
                unit_code: unit_of(&required, line.ingredient_id),
                status: ReservationStatus::Active,
                expires_at,
                owner,
                order_id: None,
                created_at: now,
                committed_at: None,
                released_at: None,
            })
            .collect();

        if rows.is_empty() {
            tracing::info!(%hold_id, branch_id, "Nothing to hold; every requirement rounds to zero");
        } else if let Err(e) = self.reservations.insert_all(&rows).await {
            tracing::error!(%hold_id, error = %e, "Failed to store reservations; releasing stock");
            if let Err(release_err) = self.ledger.release_all(branch_id, &lines, now).await {
                tracing::error!(%hold_id, error = %release_err, "Compensating release failed");
            }
            return Err(e);
        }

        tracing::info!(%hold_id, branch_id, ingredients = rows.len(), %expires_at, "Placed hold");

        let mut ingredient_summaries: Vec<IngredientSummary> = rows
            .iter()
            .map(|row| IngredientSummary {
                ingredient_id: row.ingredient_id,
                quantity: row.quantity_reserved,
                unit_code: row.unit_code.clone(),
                available_after: stocks
                    .iter()
                    .find(|s| s.ingredient_id == row.ingredient_id)
                    .map_or(Decimal::ZERO, |s| s.available()),
            })
            .collect();
        for line in &negligible {
            let available_after = self
                .ledger
                .find(StockKey::new(branch_id, line.ingredient_id))
                .await?
                .map_or(Decimal::ZERO, |s| s.available());
            ingredient_summaries.push(IngredientSummary {
                ingredient_id: line.ingredient_id,
                quantity: Decimal::ZERO,
                unit_code: unit_of(&required, line.ingredient_id),
                available_after,
            });
        }
        ingredient_summaries.sort_by_key(|s| s.ingredient_id);

        Ok(HoldSummary {
            hold_id,
            expires_at,
            ingredient_summaries,
            item_summaries,
        })
    }

    /// Reserve `lines`, naming each shortage in the unit it was required in
    async fn reserve_lines(
        &self,
        branch_id: BranchId,
        lines: &[StockLine],
        required: &BTreeMap<IngredientId, (Decimal, String)>,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Stock>> {
        match self.ledger.reserve_all(branch_id, lines, now).await {
            Ok(stocks) => Ok(stocks),
            Err(AppError::InsufficientStock { mut shortages }) => {
                for shortage in shortages.iter_mut().filter(|s| s.unit_code.is_empty()) {
                    shortage.unit_code = unit_of(required, shortage.ingredient_id);
                }
                tracing::info!(branch_id, shortages = shortages.len(), "Hold rejected: insufficient stock");
                Err(AppError::InsufficientStock { shortages })
            }
            Err(e) => Err(e),
        }
    }

    /// Deduct a hold's stock after payment
    ///
    /// Expired rows are not claimed; the expiry sweep releases them.
    pub async fn commit(&self, hold_id: Uuid, order_id: Option<Uuid>, now: DateTime<Utc>) -> AppResult<()> {
        let claim = HoldClaim {
            to: ReservationStatus::Committed,
            now,
            order_id,
            skip_expired: true,
        };
        let claimed = self.reservations.claim(hold_id, claim).await?;
        let Some(first) = claimed.first() else {
            return Err(AppError::NoActiveHold(hold_id));
        };
        let branch_id = first.branch_id;

        if let Err(e) = self.ledger.commit_all(branch_id, &hold_lines(&claimed), now).await {
            tracing::warn!(%hold_id, error = %e, "Commit rejected by ledger; reopening hold");
            self.unclaim(hold_id, &claimed).await;
            return Err(e);
        }

        tracing::info!(%hold_id, ?order_id, branch_id, ingredients = claimed.len(), "Committed hold");
        Ok(())
    }

    /// Return a hold's stock; releasing an unknown or finished hold is a no-op
    pub async fn release(&self, hold_id: Uuid, now: DateTime<Utc>) -> AppResult<usize> {
        let claim = HoldClaim {
            to: ReservationStatus::Released,
            now,
            order_id: None,
            skip_expired: false,
        };
        let claimed = self.reservations.claim(hold_id, claim).await?;
        let Some(first) = claimed.first() else {
            tracing::debug!(%hold_id, "Release found no active reservations");
            return Ok(0);
        };
        let branch_id = first.branch_id;

        if let Err(e) = self.ledger.release_all(branch_id, &hold_lines(&claimed), now).await {
            tracing::warn!(%hold_id, error = %e, "Release failed; reopening hold");
            self.unclaim(hold_id, &claimed).await;
            return Err(e);
        }

        tracing::info!(%hold_id, branch_id, ingredients = claimed.len(), "Released hold");
        Ok(claimed.len())
    }

    async fn unclaim(&self, hold_id: Uuid, claimed: &[Reservation]) {
        let ids: Vec<Uuid> = claimed.iter().map(|r| r.id).collect();
        if let Err(e) = self.reservations.unclaim(&ids).await {
            tracing::error!(%hold_id, error = %e, "Failed to reopen hold");
        }
    }

    pub async fn hold_id_by_order(&self, order_id: Uuid) -> AppResult<Option<Uuid>> {
        self.reservations.group_by_order(order_id).await
    }

    /// Reservation rows of a hold
    pub async fn hold(&self, hold_id: Uuid) -> AppResult<Vec<Reservation>> {
        let rows = self.reservations.by_group(hold_id).await?;
        if rows.is_empty() {
            return Err(AppError::NotFound(format!("Hold {hold_id}")));
        }
        Ok(rows)
    }

    /// Release every hold with an expired ACTIVE row
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> AppResult<SweepReport> {
        let mut report = SweepReport::default();
        for hold_id in self.reservations.expired_groups(now).await? {
            match self.release(hold_id, now).await {
                Ok(0) => {}
                Ok(released) => {
                    report.groups_released += 1;
                    report.reservations_released += released;
                }
                Err(e) => tracing::warn!(%hold_id, error = %e, "Failed to release expired hold"),
            }
        }
        if report.groups_released > 0 {
            tracing::info!(
                groups = report.groups_released,
                reservations = report.reservations_released,
                "Released expired holds"
            );
        }
        Ok(report)
    }

    /// Delete RELEASED rows older than the retention window
    pub async fn purge_released(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let purged = self.reservations.purge_released(now - self.released_retention).await?;
        if purged > 0 {
            tracing::info!(purged, "Purged released reservations");
        }
        Ok(purged)
    }
}

fn unit_of(required: &BTreeMap<IngredientId, (Decimal, String)>, ingredient_id: IngredientId) -> String {
    required
        .get(&ingredient_id)
        .map(|(_, unit)| unit.clone())
        .unwrap_or_default()
}
