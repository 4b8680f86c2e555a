//! Validation helper functions for configuration types.

use crate::core::errors::{CompsetError, Result};

/// Validate that a usize value is greater than zero.
pub fn validate_positive_usize(value: usize, field: &str) -> Result<()> {
    if value == 0 {
        return Err(CompsetError::config_field(
            format!("{} must be greater than 0", field),
            field,
        ));
    }
    Ok(())
}

/// Validate that an f64 value is finite and greater than zero.
pub fn validate_positive_f64(value: f64, field: &str) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(CompsetError::config_field(
            format!("{} must be greater than 0.0", field),
            field,
        ));
    }
    Ok(())
}

/// Validate that an f64 value is in the unit range [0.0, 1.0].
pub fn validate_unit_range(value: f64, field: &str) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(CompsetError::config_field(
            format!("{} must be between 0.0 and 1.0", field),
            field,
        ));
    }
    Ok(())
}

/// Validate that a probability threshold lies strictly inside (0.0, 1.0).
pub fn validate_open_unit_range(value: f64, field: &str) -> Result<()> {
    if !(value > 0.0 && value < 1.0) {
        return Err(CompsetError::config_field(
            format!("{} must be strictly between 0.0 and 1.0", field),
            field,
        ));
    }
    Ok(())
}

/// Validate that a string value is not blank.
pub fn validate_non_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CompsetError::config_field(
            format!("{} must not be empty", field),
            field,
        ));
    }
    Ok(())
}
