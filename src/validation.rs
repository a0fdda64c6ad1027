//! Validation helpers for configuration and setting values.
//!
//! Each helper returns `Err` with a human-readable reason; callers prefix it
//! with the offending key.

use std::ops::RangeInclusive;

/// Validates if a given string is a valid file path.
///
/// # Arguments
///
/// * `path` - The string to validate.
///
/// # Returns
///
/// * `Ok(())` if the file path is valid.
/// * `Err(&'static str)` if the file path is invalid.
pub fn is_valid_path(path: &str) -> Result<(), &'static str> {
    if path.is_empty() {
        return Err("File path cannot be empty");
    }
    if path.contains('\0') {
        return Err("File path cannot contain null bytes");
    }
    Ok(())
}

/// Validates if a given value is within a specified numeric range.
///
/// NaN is never within a range.
///
/// # Arguments
///
/// * `value` - The value to validate.
/// * `range` - The inclusive range to validate against.
///
/// # Returns
///
/// * `Ok(())` if the value is within the range.
/// * `Err(&'static str)` if the value is outside the range.
pub fn is_in_range<T: PartialOrd>(value: T, range: RangeInclusive<T>) -> Result<(), &'static str> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err("Value is outside the specified range")
    }
}

/// Validates that a duration-like or sampling value is finite and strictly positive.
pub fn is_positive(value: f64) -> Result<(), &'static str> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err("Value must be a positive, finite number")
    }
}

/// Validates if a given string is not empty.
///
/// # Arguments
///
/// * `value` - The string to validate.
///
/// # Returns
///
/// * `Ok(())` if the string is not empty.
/// * `Err(&'static str)` if the string is empty.
pub fn is_not_empty(value: &str) -> Result<(), &'static str> {
    if !value.is_empty() {
        Ok(())
    } else {
        Err("Value cannot be empty")
    }
}

/// Validates that a name can be used as one component of a file name.
///
/// Measurement and sample names end up in `<timestamp>_<name>[_<sample>].h5`,
/// so they must not carry path separators.
pub fn is_file_name_component(value: &str) -> Result<(), &'static str> {
    if value.contains(['/', '\\', '\0']) {
        Err("Name cannot contain path separators or null bytes")
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_path() {
        assert!(is_valid_path("data").is_ok());
        assert!(is_valid_path("").is_err());
        assert!(is_valid_path("da\0ta").is_err());
    }

    #[test]
    fn test_is_in_range() {
        assert!(is_in_range(0.5, 0.0..=1.0).is_ok());
        assert!(is_in_range(-0.1, 0.0..=1.0).is_err());
        assert!(is_in_range(f64::NAN, 0.0..=f64::MAX).is_err());
    }

    #[test]
    fn test_is_positive() {
        assert!(is_positive(0.058).is_ok());
        assert!(is_positive(0.0).is_err());
        assert!(is_positive(f64::INFINITY).is_err());
    }

    #[test]
    fn test_file_name_component() {
        assert!(is_file_name_component("arabidopsis_01").is_ok());
        assert!(is_file_name_component("").is_ok());
        assert!(is_file_name_component("../escape").is_err());
    }
}
