//! Shared domain types for the Inventory Reservation & Reconciliation Engine
//!
//! This crate holds the pure domain model: stock rows and their mutation rules,
//! reservations, costs, stock adjustments, units and branch schedules. It does
//! no IO; the backend persists these types and drives them from services.

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;
