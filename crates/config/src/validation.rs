// crates/config/src/validation.rs
//! Validation for configuration values
//!
//! Each config section implements `ConfigSection`, which includes
//! validation and merging.

pub use kpiboard_settings::ValidationError;

/// A section of the config file
///
/// New sections plug into `Config` by implementing this trait; load, save
/// and validation pick them up without further changes.
pub trait ConfigSection: Default {
    /// Returns every problem found in the section
    fn validate(&self) -> Result<(), Vec<ValidationError>>;

    /// Merges another section into this one; values from `other` win
    fn merge(&mut self, other: Self);

    /// Section name as it appears in the file
    fn section_name(&self) -> &'static str;
}

/// Common validators for config values
pub struct Validator;

impl Validator {
    /// Validates that a numeric value is within an inclusive range
    pub fn in_range<T>(value: T, min: T, max: T, field: &str) -> Result<(), ValidationError>
    where
        T: PartialOrd + std::fmt::Display + Copy,
    {
        if value < min || value > max {
            Err(ValidationError::with_value(
                field,
                format!("must be between {} and {}", min, max),
                value,
            ))
        } else {
            Ok(())
        }
    }

    /// Validates that a value is strictly greater than zero
    pub fn positive(value: u64, field: &str) -> Result<(), ValidationError> {
        if value == 0 {
            Err(ValidationError::with_value(field, "must be greater than 0", value))
        } else {
            Ok(())
        }
    }

    /// Validates that `low` does not exceed `high`
    pub fn ordered(low: u64, high: u64, field: &str) -> Result<(), ValidationError> {
        if low > high {
            Err(ValidationError::with_value(
                field,
                format!("must not be smaller than {}", low),
                high,
            ))
        } else {
            Ok(())
        }
    }

    /// Collects multiple validation results into a single result
    pub fn collect_errors(
        results: Vec<Result<(), ValidationError>>,
    ) -> Result<(), Vec<ValidationError>> {
        let errors: Vec<ValidationError> = results.into_iter().filter_map(|r| r.err()).collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
