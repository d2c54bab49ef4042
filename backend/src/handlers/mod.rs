//! HTTP handlers

pub mod adjustments;
pub mod health;
pub mod holds;
pub mod stock;

pub use adjustments::*;
pub use health::*;
pub use holds::*;
pub use stock::*;
