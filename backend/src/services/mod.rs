//! Business logic services for the inventory engine

use std::borrow::Cow;
use std::sync::Arc;

use rust_decimal::Decimal;
use validator::ValidationError;

use crate::config::{InventoryConfig, SchedulerConfig};
use crate::external::AlertPublisher;
use crate::store::Stores;

pub mod adjustment;
pub mod cost;
pub mod reservation;
pub mod scheduler;
pub mod stock_ledger;
pub mod unit_conversion;

pub use adjustment::{
    AdjustmentReconciler, AutoCommitReport, DailyCountItem, DailyReconcileInput, ManagerAdjustmentInput,
    ReconcileResult, ReconcileSummary, UpdateAdjustmentInput,
};
pub use cost::{CostAverager, ReceiptInput, ReceiptOutcome};
pub use reservation::{
    CheckAndReserveInput, HoldItem, HoldSummary, IngredientSummary, ItemSummary, ReservationManager,
    SweepReport,
};
pub use scheduler::{InventoryScheduler, SingleFlight};
pub use stock_ledger::StockLedger;
pub use unit_conversion::{ConversionRate, UnitConversionResolver};

/// Every service, wired over one set of stores
#[derive(Clone)]
pub struct Services {
    pub ledger: StockLedger,
    pub resolver: UnitConversionResolver,
    pub costs: CostAverager,
    pub reservations: ReservationManager,
    pub adjustments: AdjustmentReconciler,
}

impl Services {
    pub fn new(stores: Stores, alerts: Arc<dyn AlertPublisher>, inventory: &InventoryConfig) -> Self {
        let ledger = StockLedger::new(stores.stock, alerts);
        let resolver = UnitConversionResolver::new(stores.units);
        let costs = CostAverager::new(ledger.clone(), resolver.clone());
        let reservations = ReservationManager::new(
            ledger.clone(),
            resolver.clone(),
            Arc::clone(&stores.reservations),
            stores.recipes,
            inventory.hold_ttl(),
            inventory.released_retention(),
        );
        let adjustments = AdjustmentReconciler::new(
            ledger.clone(),
            stores.reservations,
            stores.adjustments,
            stores.branches,
            inventory.closing_buffer(),
        );
        Self {
            ledger,
            resolver,
            costs,
            reservations,
            adjustments,
        }
    }

    pub fn scheduler(&self, config: SchedulerConfig) -> InventoryScheduler {
        InventoryScheduler::new(self.reservations.clone(), self.adjustments.clone(), config)
    }
}

// ============================================================================
// Request validators
// ============================================================================

fn rule_error(code: &'static str, message: &'static str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(Cow::Borrowed(message));
    error
}

pub(crate) fn validate_positive(quantity: &Decimal) -> Result<(), ValidationError> {
    shared::validate_positive_quantity(*quantity).map_err(|m| rule_error("positive", m))
}

pub(crate) fn validate_non_negative(quantity: &Decimal) -> Result<(), ValidationError> {
    shared::validate_non_negative_quantity(*quantity).map_err(|m| rule_error("non_negative", m))
}

pub(crate) fn validate_price(price: &Decimal) -> Result<(), ValidationError> {
    shared::validate_unit_price(*price).map_err(|m| rule_error("price", m))
}
