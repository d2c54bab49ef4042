//! Units of measure and ingredient-specific conversions

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ParseEnumError;
use crate::types::{BranchId, IngredientId};

/// Synthetic unit used to bridge two cross-dimension conversions
pub const BRIDGE_UNIT: &str = "BASE";

/// Measurement family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Dimension {
    Weight,
    Volume,
    Count,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Weight => "WEIGHT",
            Dimension::Volume => "VOLUME",
            Dimension::Count => "COUNT",
        }
    }
}

impl std::str::FromStr for Dimension {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WEIGHT" => Ok(Dimension::Weight),
            "VOLUME" => Ok(Dimension::Volume),
            "COUNT" => Ok(Dimension::Count),
            other => Err(ParseEnumError::new("dimension", other)),
        }
    }
}

/// Position of a unit in its dimension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitKind {
    /// The dimension's reference unit (factor 1)
    Base,
    /// `1 unit = factor_to_base * base unit`
    Derived {
        base_unit_code: String,
        factor_to_base: Decimal,
    },
}

/// A unit of measure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub code: String,
    pub dimension: Dimension,
    pub kind: UnitKind,
}

impl Unit {
    pub fn base(code: &str, dimension: Dimension) -> Self {
        Self {
            code: normalize_unit_code(code),
            dimension,
            kind: UnitKind::Base,
        }
    }

    pub fn derived(code: &str, dimension: Dimension, base_unit_code: &str, factor_to_base: Decimal) -> Self {
        Self {
            code: normalize_unit_code(code),
            dimension,
            kind: UnitKind::Derived {
                base_unit_code: normalize_unit_code(base_unit_code),
                factor_to_base,
            },
        }
    }

    /// Code of the base unit this unit resolves to
    pub fn base_code(&self) -> &str {
        match &self.kind {
            UnitKind::Base => &self.code,
            UnitKind::Derived { base_unit_code, .. } => base_unit_code,
        }
    }

    pub fn factor_to_base(&self) -> Decimal {
        match &self.kind {
            UnitKind::Base => Decimal::ONE,
            UnitKind::Derived { factor_to_base, .. } => *factor_to_base,
        }
    }
}

/// Whether a conversion row applies everywhere or to one branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversionScope {
    Global,
    Branch,
}

impl ConversionScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionScope::Global => "GLOBAL",
            ConversionScope::Branch => "BRANCH",
        }
    }
}

impl std::str::FromStr for ConversionScope {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GLOBAL" => Ok(ConversionScope::Global),
            "BRANCH" => Ok(ConversionScope::Branch),
            other => Err(ParseEnumError::new("conversion scope", other)),
        }
    }
}

/// Ingredient-specific conversion, e.g. 1 CUP of flour = 120 G
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngredientUnitConversion {
    pub id: i64,
    pub ingredient_id: IngredientId,
    pub from_unit: String,
    pub to_unit: String,
    /// `1 from_unit = factor * to_unit`
    pub factor: Decimal,
    pub scope: ConversionScope,
    pub branch_id: Option<BranchId>,
    pub active: bool,
}

impl IngredientUnitConversion {
    /// Whether this row may serve a lookup in `scope` for `branch_id`
    pub fn applies_to(&self, scope: ConversionScope, branch_id: Option<BranchId>) -> bool {
        if !self.active || self.scope != scope {
            return false;
        }
        match scope {
            ConversionScope::Global => true,
            ConversionScope::Branch => branch_id.is_some() && self.branch_id == branch_id,
        }
    }
}

/// Unit codes are compared trimmed and upper-cased
pub fn normalize_unit_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}
