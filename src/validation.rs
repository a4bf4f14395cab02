//! Validation helpers for run parameters.
//!
//! Each helper returns a short static reason on failure; callers prefix it with
//! the parameter name.

use std::ops::RangeInclusive;

/// Validates that a value lies within an inclusive range.
///
/// NaN never lies within a range.
///
/// # Returns
///
/// * `Ok(())` if the value is within the range.
/// * `Err(&'static str)` if the value is outside the range.
pub fn is_in_range<T: PartialOrd>(value: T, range: RangeInclusive<T>) -> Result<(), &'static str> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err("value is outside the allowed range")
    }
}

/// Validates that a float is finite and strictly positive.
pub fn is_finite_positive(value: f64) -> Result<(), &'static str> {
    if !value.is_finite() {
        Err("value must be finite")
    } else if value <= 0.0 {
        Err("value must be greater than 0")
    } else {
        Ok(())
    }
}

/// Validates that a string is not empty.
pub fn is_not_empty(value: &str) -> Result<(), &'static str> {
    if !value.trim().is_empty() {
        Ok(())
    } else {
        Err("value cannot be empty")
    }
}

/// Validates that a string can be embedded in a single file name.
///
/// Rejects path separators, NUL bytes and parent-directory references.
pub fn is_valid_file_component(value: &str) -> Result<(), &'static str> {
    is_not_empty(value)?;
    if value.contains(['/', '\\', '\0']) {
        return Err("value cannot contain path separators or null bytes");
    }
    if value == "." || value == ".." {
        return Err("value cannot be a directory reference");
    }
    Ok(())
}
