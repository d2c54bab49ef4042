//! Validation utilities for inventory requests

use rust_decimal::Decimal;

// ============================================================================
// Quantity Validations
// ============================================================================

/// Validate that a quantity is strictly positive
pub fn validate_positive_quantity(quantity: Decimal) -> Result<(), &'static str> {
    if quantity <= Decimal::ZERO {
        return Err("Quantity must be positive");
    }
    Ok(())
}

/// Validate that a quantity is zero or more (physical counts)
pub fn validate_non_negative_quantity(quantity: Decimal) -> Result<(), &'static str> {
    if quantity < Decimal::ZERO {
        return Err("Quantity cannot be negative");
    }
    Ok(())
}

/// Validate a unit price (free goods are allowed)
pub fn validate_unit_price(price: Decimal) -> Result<(), &'static str> {
    if price < Decimal::ZERO {
        return Err("Unit price cannot be negative");
    }
    Ok(())
}

/// Validate a conversion factor
pub fn validate_conversion_factor(factor: Decimal) -> Result<(), &'static str> {
    if factor <= Decimal::ZERO {
        return Err("Conversion factor must be positive");
    }
    Ok(())
}

// ============================================================================
// General Validations
// ============================================================================

/// Validate unit code format (1-16 alphanumeric or underscore)
pub fn validate_unit_code(code: &str) -> Result<(), &'static str> {
    let code = code.trim();
    if code.is_empty() {
        return Err("Unit code cannot be empty");
    }
    if code.len() > 16 {
        return Err("Unit code must be at most 16 characters");
    }
    if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err("Unit code must be alphanumeric");
    }
    Ok(())
}

/// True when the text is missing or whitespace only
pub fn is_blank(text: Option<&str>) -> bool {
    text.map_or(true, |t| t.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_positive_quantity() {
        assert!(validate_positive_quantity(Decimal::new(1, 4)).is_ok());
        assert!(validate_positive_quantity(Decimal::ZERO).is_err());
        assert!(validate_positive_quantity(Decimal::from(-3)).is_err());
    }

    #[test]
    fn test_validate_non_negative_quantity() {
        assert!(validate_non_negative_quantity(Decimal::ZERO).is_ok());
        assert!(validate_non_negative_quantity(Decimal::new(-1, 2)).is_err());
    }

    #[test]
    fn test_validate_unit_price() {
        assert!(validate_unit_price(Decimal::ZERO).is_ok());
        assert!(validate_unit_price(Decimal::from(-1)).is_err());
    }

    #[test]
    fn test_validate_conversion_factor() {
        assert!(validate_conversion_factor(Decimal::from(250)).is_ok());
        assert!(validate_conversion_factor(Decimal::ZERO).is_err());
    }

    #[test]
    fn test_validate_unit_code() {
        assert!(validate_unit_code("KG").is_ok());
        assert!(validate_unit_code("fl_oz").is_ok());
        assert!(validate_unit_code("  ").is_err());
        assert!(validate_unit_code("kg/l").is_err());
        assert!(validate_unit_code("ABCDEFGHIJKLMNOPQ").is_err());
    }

    #[test]
    fn test_is_blank() {
        assert!(is_blank(None));
        assert!(is_blank(Some("   ")));
        assert!(!is_blank(Some("stocktake after delivery")));
    }
}
