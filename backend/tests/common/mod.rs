//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;

use inventory_engine::config::InventoryConfig;
use inventory_engine::external::RecordingAlertPublisher;
use inventory_engine::services::Services;
use inventory_engine::store::{MemoryStore, Stores};
use shared::{
    BranchHours, BranchId, ConversionScope, Dimension, IngredientId, IngredientUnitConversion, ProductDetailId,
    Recipe, RecipeLine, Stock, StockKey, Unit,
};

pub const BRANCH: BranchId = 1;
pub const COFFEE: IngredientId = 100;
pub const MILK: IngredientId = 200;
pub const LATTE: ProductDetailId = 10;
pub const ESPRESSO: ProductDetailId = 11;

// Helper to create Decimal from string
pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn key(ingredient_id: IngredientId) -> StockKey {
    StockKey::new(BRANCH, ingredient_id)
}

pub struct Fixture {
    pub store: MemoryStore,
    pub alerts: RecordingAlertPublisher,
    pub services: Services,
}

impl Fixture {
    pub fn new() -> Self {
        let store = MemoryStore::new();
        let alerts = RecordingAlertPublisher::new();
        let services = Services::new(
            Stores::memory(store.clone()),
            Arc::new(alerts.clone()),
            &InventoryConfig::default(),
        );
        Self { store, alerts, services }
    }

    pub async fn stock(&self, ingredient_id: IngredientId, quantity: &str, unit: &str) {
        self.stock_with_threshold(ingredient_id, quantity, unit, "0").await;
    }

    pub async fn stock_with_threshold(&self, ingredient_id: IngredientId, quantity: &str, unit: &str, threshold: &str) {
        let mut stock = Stock::new(BRANCH, ingredient_id, unit, at(2024, 6, 1, 0, 0));
        stock.quantity = dec(quantity);
        stock.threshold = dec(threshold);
        self.store.put_stock(stock).await;
    }

    pub async fn recipe(&self, product_detail_id: ProductDetailId, lines: &[(IngredientId, &str, &str)]) {
        self.store
            .put_recipe(Recipe {
                product_detail_id,
                yield_quantity: Decimal::ONE,
                lines: lines
                    .iter()
                    .map(|(ingredient_id, quantity, unit)| RecipeLine {
                        ingredient_id: *ingredient_id,
                        quantity: dec(quantity),
                        unit_code: unit.to_string(),
                    })
                    .collect(),
            })
            .await;
    }

    /// G/KG weight units and ML/L volume units
    pub async fn metric_units(&self) {
        self.store.put_unit(Unit::base("G", Dimension::Weight)).await;
        self.store.put_unit(Unit::derived("KG", Dimension::Weight, "G", dec("1000"))).await;
        self.store.put_unit(Unit::base("ML", Dimension::Volume)).await;
        self.store.put_unit(Unit::derived("L", Dimension::Volume, "ML", dec("1000"))).await;
    }

    pub async fn conversion(
        &self,
        id: i64,
        ingredient_id: IngredientId,
        from: &str,
        to: &str,
        factor: &str,
        branch_id: Option<BranchId>,
    ) {
        self.store
            .put_conversion(IngredientUnitConversion {
                id,
                ingredient_id,
                from_unit: from.to_string(),
                to_unit: to.to_string(),
                factor: dec(factor),
                scope: if branch_id.is_some() {
                    ConversionScope::Branch
                } else {
                    ConversionScope::Global
                },
                branch_id,
                active: true,
            })
            .await;
    }

    pub async fn hours(&self, opening: (u32, u32), closing: (u32, u32)) {
        self.store
            .put_branch_hours(BranchHours {
                branch_id: BRANCH,
                opening_time: NaiveTime::from_hms_opt(opening.0, opening.1, 0).unwrap(),
                closing_time: NaiveTime::from_hms_opt(closing.0, closing.1, 0).unwrap(),
                utc_offset_minutes: 0,
            })
            .await;
    }

    pub async fn current(&self, ingredient_id: IngredientId) -> Stock {
        self.services.ledger.stock(key(ingredient_id)).await.unwrap()
    }
}
