//! Domain models for the inventory engine

mod adjustment;
mod alert;
mod branch;
mod cost;
mod recipe;
mod reservation;
mod stock;
mod unit;

pub use adjustment::*;
pub use alert::*;
pub use branch::*;
pub use cost::*;
pub use recipe::*;
pub use reservation::*;
pub use stock::*;
pub use unit::*;

/// Error returned when a stored enum label cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
