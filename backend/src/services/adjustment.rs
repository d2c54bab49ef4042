//! Stock adjustment reconciler
//!
//! Physical counts are compared against what committed orders say was used.
//! The difference is applied to the ledger either immediately or by the
//! auto-commit sweep once the branch has closed for the day.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use shared::{
    default_closing_cutoff, is_blank, round_quantity, utc_day_bounds, AdjustmentSource, AdjustmentStatus,
    AdjustmentType, BranchHours, BranchId, IngredientId, StockAdjustment, StockAdjustmentEntry, StockKey,
};

use super::{validate_non_negative, StockLedger};
use crate::error::{AppError, AppResult};
use crate::store::{AdjustmentStore, BranchSchedule, DailyCount, ReservationStore};

/// End-of-day usage counts for one branch
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DailyReconcileInput {
    pub branch_id: BranchId,
    pub adjustment_date: NaiveDate,
    #[validate(length(min = 1, message = "At least one item is required"))]
    pub items: Vec<DailyCountItem>,
    #[serde(default)]
    pub commit_immediately: bool,
    #[validate(length(min = 1, message = "recorded_by is required"))]
    pub recorded_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DailyCountItem {
    pub ingredient_id: IngredientId,
    #[validate(custom = "validate_non_negative")]
    pub actual_used_quantity: Decimal,
    pub notes: Option<String>,
}

/// Outcome for one counted ingredient
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileResult {
    pub adjustment_id: Uuid,
    pub ingredient_id: IngredientId,
    pub system_quantity: Decimal,
    pub actual_quantity: Decimal,
    pub variance: Decimal,
    pub adjustment_type: AdjustmentType,
    pub status: AdjustmentStatus,
    /// Why an immediate commit did not happen
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileSummary {
    pub processed_items: usize,
    pub committed_items: usize,
    pub total_variance: Decimal,
    pub results: Vec<ReconcileResult>,
}

/// One-shot recount by a manager
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ManagerAdjustmentInput {
    pub branch_id: BranchId,
    pub ingredient_id: IngredientId,
    #[validate(custom = "validate_non_negative")]
    pub physical_quantity: Decimal,
    #[serde(default)]
    pub force_adjust: bool,
    pub reason: Option<String>,
    #[validate(length(min = 1, message = "recorded_by is required"))]
    pub recorded_by: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateAdjustmentInput {
    #[validate(custom = "validate_non_negative")]
    pub actual_quantity: Decimal,
    pub notes: Option<String>,
}

/// Result of an auto-commit sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AutoCommitReport {
    pub branches_scanned: usize,
    pub auto_committed: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct AdjustmentReconciler {
    ledger: StockLedger,
    reservations: Arc<dyn ReservationStore>,
    adjustments: Arc<dyn AdjustmentStore>,
    branches: Arc<dyn BranchSchedule>,
    closing_buffer: Duration,
}

impl AdjustmentReconciler {
    pub fn new(
        ledger: StockLedger,
        reservations: Arc<dyn ReservationStore>,
        adjustments: Arc<dyn AdjustmentStore>,
        branches: Arc<dyn BranchSchedule>,
        closing_buffer: Duration,
    ) -> Self {
        Self {
            ledger,
            reservations,
            adjustments,
            branches,
            closing_buffer,
        }
    }

    /// Record daily usage counts, optionally committing them right away
    pub async fn reconcile(&self, input: DailyReconcileInput, now: DateTime<Utc>) -> AppResult<ReconcileSummary> {
        input.validate()?;
        for item in &input.items {
            item.validate()?;
        }

        let hours = self.branch_hours(input.branch_id).await;
        let mut summary = ReconcileSummary {
            processed_items: 0,
            committed_items: 0,
            total_variance: Decimal::ZERO,
            results: Vec::with_capacity(input.items.len()),
        };

        for item in input.items {
            let key = StockKey::new(input.branch_id, item.ingredient_id);
            let system_quantity = self
                .system_quantity(key, input.adjustment_date, hours.as_ref())
                .await?;
            let count = DailyCount {
                key,
                date: input.adjustment_date,
                quantity: round_quantity(item.actual_used_quantity),
                system_quantity,
                recorded_by: input.recorded_by.clone(),
                notes: item.notes,
            };
            let mut adjustment = self.adjustments.record_daily_count(&count, now).await?;
            summary.processed_items += 1;

            let mut error = None;
            if input.commit_immediately {
                match self.apply(adjustment.clone(), AdjustmentStatus::Committed, hours.as_ref(), now).await {
                    Ok(committed) => {
                        adjustment = committed;
                        summary.committed_items += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            adjustment_id = %adjustment.id,
                            ingredient_id = item.ingredient_id,
                            error = %e,
                            "Immediate commit failed; adjustment stays pending"
                        );
                        error = Some(e.to_string());
                    }
                }
            }

            summary.total_variance += adjustment.variance;
            summary.results.push(ReconcileResult {
                adjustment_id: adjustment.id,
                ingredient_id: adjustment.ingredient_id,
                system_quantity: adjustment.system_quantity,
                actual_quantity: adjustment.actual_quantity,
                variance: adjustment.variance,
                adjustment_type: adjustment.adjustment_type,
                status: adjustment.status,
                error,
            });
        }

        tracing::info!(
            branch_id = input.branch_id,
            date = %input.adjustment_date,
            processed = summary.processed_items,
            committed = summary.committed_items,
            total_variance = %summary.total_variance,
            "Reconciled daily counts"
        );
        Ok(summary)
    }

    /// Correct stock to a manager's physical count and commit immediately
    ///
    /// The stock row is locked, moved to the count and the usage derived in one
    /// step; the adjustment is recorded from that usage only once the ledger has
    /// accepted it. Stored in consumption terms: the unexplained usage is the
    /// actual quantity against a zero system quantity.
    pub async fn manager_adjustment(
        &self,
        input: ManagerAdjustmentInput,
        now: DateTime<Utc>,
    ) -> AppResult<StockAdjustment> {
        input.validate()?;

        if input.force_adjust && is_blank(input.reason.as_deref()) {
            return Err(AppError::ForceReasonRequired);
        }

        let hours = self.branch_hours(input.branch_id).await;
        if let Some(hours) = &hours {
            if !input.force_adjust && hours.is_within_business_window(now, self.closing_buffer) {
                return Err(AppError::AdjustmentBlockedDuringBusiness {
                    opening: hours.opening_time,
                    closing: hours.closing_time,
                });
            }
        }

        let key = StockKey::new(input.branch_id, input.ingredient_id);
        let physical = round_quantity(input.physical_quantity);
        let (_, usage) = self.ledger.recount(key, physical, now).await?;

        let date = hours.as_ref().map_or_else(|| now.date_naive(), |h| h.local_date(now));
        let mut adjustment = StockAdjustment::pending(
            input.branch_id,
            input.ingredient_id,
            date,
            AdjustmentSource::Manager,
            now,
        );
        adjustment.forced = input.force_adjust;
        adjustment.reason = input.reason.filter(|r| !r.trim().is_empty());
        let entry = adjustment.record_entry(usage, input.recorded_by, None, now);
        adjustment.finalize(AdjustmentStatus::Committed, now);

        if let Err(e) = self.adjustments.insert_with_entry(&adjustment, &entry).await {
            tracing::error!(adjustment_id = %adjustment.id, error = %e, "Failed to record recount; reverting stock");
            let revert = self
                .ledger
                .adjust(key, adjustment.quantity, opposite(adjustment.adjustment_type), now)
                .await;
            if let Err(revert_err) = revert {
                tracing::error!(adjustment_id = %adjustment.id, error = %revert_err, "Failed to revert recount");
            }
            return Err(e);
        }

        if input.force_adjust {
            tracing::warn!(
                adjustment_id = %adjustment.id,
                branch_id = input.branch_id,
                reason = adjustment.reason.as_deref().unwrap_or_default(),
                "Forced manager adjustment"
            );
        }
        tracing::info!(
            adjustment_id = %adjustment.id,
            direction = adjustment.adjustment_type.as_str(),
            quantity = %adjustment.quantity,
            "Committed manager adjustment"
        );
        Ok(adjustment)
    }

    /// Commit a PENDING adjustment now
    pub async fn commit_adjustment(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<StockAdjustment> {
        let adjustment = self.adjustment(id).await?;
        if !adjustment.is_pending() {
            return Err(AppError::AdjustmentNotPending(id));
        }
        let hours = self.branch_hours(adjustment.branch_id).await;
        self.apply(adjustment, AdjustmentStatus::Committed, hours.as_ref(), now).await
    }

    /// Replace the counted quantity of a PENDING adjustment
    pub async fn update_adjustment(&self, id: Uuid, input: UpdateAdjustmentInput) -> AppResult<StockAdjustment> {
        input.validate()?;

        let mut adjustment = self.adjustment(id).await?;
        if !adjustment.is_pending() {
            return Err(AppError::AdjustmentAlreadyCommitted(id));
        }

        adjustment.actual_quantity = round_quantity(input.actual_quantity);
        if input.notes.is_some() {
            adjustment.notes = input.notes;
        }
        let system = match adjustment.source {
            AdjustmentSource::Daily => {
                let hours = self.branch_hours(adjustment.branch_id).await;
                self.system_quantity(adjustment_key(&adjustment), adjustment.adjustment_date, hours.as_ref())
                    .await?
            }
            AdjustmentSource::Manager => adjustment.system_quantity,
        };
        adjustment.recompute(system);

        if !self.adjustments.update_pending(&adjustment).await? {
            return Err(AppError::AdjustmentAlreadyCommitted(id));
        }
        Ok(adjustment)
    }

    /// Delete a PENDING adjustment and its entries
    pub async fn delete_adjustment(&self, id: Uuid) -> AppResult<()> {
        let adjustment = self.adjustment(id).await?;
        if !adjustment.is_pending() || !self.adjustments.delete_pending(id).await? {
            return Err(AppError::AdjustmentAlreadyCommitted(id));
        }
        tracing::info!(adjustment_id = %id, "Deleted pending adjustment");
        Ok(())
    }

    pub async fn adjustment(&self, id: Uuid) -> AppResult<StockAdjustment> {
        self.adjustments
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Adjustment {id}")))
    }

    pub async fn entries(&self, id: Uuid) -> AppResult<Vec<StockAdjustmentEntry>> {
        self.adjustment(id).await?;
        self.adjustments.entries(id).await
    }

    /// Auto-commit every PENDING adjustment whose business day has closed
    pub async fn auto_commit_sweep(&self, now: DateTime<Utc>) -> AppResult<AutoCommitReport> {
        let mut report = AutoCommitReport::default();

        for branch_id in self.adjustments.pending_branches().await? {
            report.branches_scanned += 1;
            let hours = self.branch_hours(branch_id).await;

            for adjustment in self.adjustments.pending_for_branch(branch_id).await? {
                let cutoff = match &hours {
                    Some(h) => h.closing_cutoff(adjustment.adjustment_date, self.closing_buffer),
                    None => default_closing_cutoff(adjustment.adjustment_date, self.closing_buffer),
                };
                if now < cutoff {
                    continue;
                }

                let id = adjustment.id;
                match self
                    .apply(adjustment, AdjustmentStatus::AutoCommitted, hours.as_ref(), now)
                    .await
                {
                    Ok(_) => report.auto_committed += 1,
                    Err(e) => {
                        report.failed += 1;
                        tracing::warn!(adjustment_id = %id, branch_id, error = %e, "Auto-commit failed");
                    }
                }
            }
        }

        if report.auto_committed > 0 || report.failed > 0 {
            tracing::info!(
                branches = report.branches_scanned,
                committed = report.auto_committed,
                failed = report.failed,
                "Auto-commit sweep finished"
            );
        }
        Ok(report)
    }

    /// Final recompute, claim PENDING -> `status`, then move stock
    ///
    /// The claim is undone when the ledger rejects the mutation.
    async fn apply(
        &self,
        mut adjustment: StockAdjustment,
        status: AdjustmentStatus,
        hours: Option<&BranchHours>,
        now: DateTime<Utc>,
    ) -> AppResult<StockAdjustment> {
        if adjustment.source == AdjustmentSource::Daily {
            let system = self
                .system_quantity(adjustment_key(&adjustment), adjustment.adjustment_date, hours)
                .await?;
            let recalculation = adjustment.recompute(system);
            if recalculation.is_significant() {
                tracing::warn!(
                    adjustment_id = %adjustment.id,
                    previous_variance = %recalculation.previous_variance,
                    variance = %recalculation.variance,
                    "Variance changed significantly on final recompute"
                );
            }
        }

        let pending = adjustment.clone();
        adjustment.finalize(status, now);
        if !self.adjustments.finalize(&adjustment).await? {
            return Err(AppError::AdjustmentNotPending(adjustment.id));
        }

        if adjustment.quantity > Decimal::ZERO {
            let applied = self
                .ledger
                .adjust(
                    adjustment_key(&adjustment),
                    adjustment.quantity,
                    adjustment.adjustment_type,
                    now,
                )
                .await;
            if let Err(e) = applied {
                if let Err(reopen_err) = self.adjustments.reopen(&pending).await {
                    tracing::error!(adjustment_id = %adjustment.id, error = %reopen_err, "Failed to reopen adjustment");
                }
                return Err(e);
            }
        }

        tracing::info!(
            adjustment_id = %adjustment.id,
            status = status.as_str(),
            direction = adjustment.adjustment_type.as_str(),
            quantity = %adjustment.quantity,
            "Committed adjustment"
        );
        Ok(adjustment)
    }

    /// Usage derived from orders committed on the branch-local `date`
    async fn system_quantity(
        &self,
        key: StockKey,
        date: NaiveDate,
        hours: Option<&BranchHours>,
    ) -> AppResult<Decimal> {
        let (from, to) = hours.map_or_else(|| utc_day_bounds(date), |h| h.day_bounds(date));
        let total = self.reservations.committed_quantity(key, from, to).await?;
        Ok(round_quantity(total))
    }

    /// Branch hours; a failing lookup is logged and treated as "no hours"
    async fn branch_hours(&self, branch_id: BranchId) -> Option<BranchHours> {
        match self.branches.hours(branch_id).await {
            Ok(hours) => hours,
            Err(e) => {
                tracing::warn!(branch_id, error = %e, "Branch hours lookup failed");
                None
            }
        }
    }
}

fn opposite(direction: AdjustmentType) -> AdjustmentType {
    match direction {
        AdjustmentType::AdjustIn => AdjustmentType::AdjustOut,
        AdjustmentType::AdjustOut => AdjustmentType::AdjustIn,
    }
}

fn adjustment_key(adjustment: &StockAdjustment) -> StockKey {
    StockKey::new(adjustment.branch_id, adjustment.ingredient_id)
}
