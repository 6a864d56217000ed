//! # Validation Module
//!
//! Input validation for onboarding, catalog edits, offers and bookings.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Admin form (external)                                        │
//! │  └── Immediate feedback on empty fields                                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Engine operation (Rust)                                      │
//! │  ├── Type validation (deserialization)                                 │
//! │  └── THIS MODULE: field rules, collected into ValidationFailed         │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Primary store (SQLite)                                       │
//! │  ├── CHECK constraints (health range, non-negative rates)              │
//! │  └── UNIQUE ... COLLATE NOCASE (serials, offer codes, categories)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Single-field validators return [`ValidationResult`]; the `validate_new_*`
//! functions run every rule for one input and report all failures together.
//!
//! ## Usage
//! ```rust
//! use fleet_core::validation::{validate_serial_number, validate_new_device};
//! use fleet_core::types::NewDevice;
//!
//! assert!(validate_serial_number("PS5-0001").is_ok());
//!
//! let bad = NewDevice::new("", "");
//! let failed = validate_new_device(&bad).unwrap_err();
//! assert_eq!(failed.errors().len(), 2);
//! ```

use chrono::{DateTime, Utc};

use crate::error::{ValidationError, ValidationFailed};
use crate::types::{CatalogSettings, DiscountType, NewDevice, NewOffer, RateTable};
use crate::{MAX_BUNDLED_CONTROLLERS, MAX_RATE};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

const MAX_SERIAL_LEN: usize = 64;
const MAX_CATEGORY_LEN: usize = 100;
const MAX_OFFER_CODE_LEN: usize = 32;
const MAX_FEATURE_LEN: usize = 200;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a device serial number.
///
/// ## Rules
/// - Must not be empty
/// - At most 64 characters
/// - Letters, digits, hyphens and underscores only
///
/// ## Example
/// ```rust
/// use fleet_core::validation::validate_serial_number;
///
/// assert!(validate_serial_number("PS5-0001").is_ok());
/// assert!(validate_serial_number("has space").is_err());
/// ```
pub fn validate_serial_number(serial: &str) -> ValidationResult<()> {
    validate_code_like("serialNumber", serial, MAX_SERIAL_LEN)
}

/// Validates a category label.
///
/// Free text, but not blank and not absurdly long.
pub fn validate_category(category: &str) -> ValidationResult<()> {
    let category = category.trim();

    if category.is_empty() {
        return Err(ValidationError::Required {
            field: "category".to_string(),
        });
    }

    if category.chars().count() > MAX_CATEGORY_LEN {
        return Err(ValidationError::TooLong {
            field: "category".to_string(),
            max: MAX_CATEGORY_LEN,
        });
    }

    Ok(())
}

/// Validates a promotional code (same character rules as serials).
pub fn validate_offer_code(code: &str) -> ValidationResult<()> {
    validate_code_like("code", code, MAX_OFFER_CODE_LEN)
}

fn validate_code_like(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.len() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates the number of controllers bundled with a unit.
pub fn validate_controller_count(count: Option<u32>) -> ValidationResult<()> {
    match count {
        Some(n) if n > MAX_BUNDLED_CONTROLLERS => Err(ValidationError::OutOfRange {
            field: "controllerCount".to_string(),
            min: 0,
            max: MAX_BUNDLED_CONTROLLERS as i64,
        }),
        _ => Ok(()),
    }
}

/// Validates an amount that may be zero but never negative.
///
/// ## Example
/// ```rust
/// use fleet_core::validation::validate_non_negative;
///
/// assert!(validate_non_negative("dailyRate", 0).is_ok());
/// assert!(validate_non_negative("dailyRate", -1).is_err());
/// ```
pub fn validate_non_negative(field: &str, value: i64) -> ValidationResult<()> {
    if value < 0 {
        return Err(ValidationError::Negative {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates an offer's discount value against its type.
///
/// ## Rules
/// - `percentage`: 0 to 100
/// - `fixed`: any non-negative amount
pub fn validate_discount(discount_type: DiscountType, value: i64) -> ValidationResult<()> {
    match discount_type {
        DiscountType::Percentage if !(0..=100).contains(&value) => {
            Err(ValidationError::OutOfRange {
                field: "discountValue".to_string(),
                min: 0,
                max: 100,
            })
        }
        DiscountType::Percentage => Ok(()),
        DiscountType::Fixed => validate_non_negative("discountValue", value),
    }
}

/// Validates every rate in a table.
pub fn validate_rates(rates: &RateTable, failed: &mut ValidationFailed) {
    failed.check(validate_rate("dailyRate", rates.daily_rate));
    failed.check(validate_rate("weeklyRate", rates.weekly_rate));
    failed.check(validate_rate("monthlyRate", rates.monthly_rate));
    failed.check(validate_rate("controllerDailyRate", rates.controller_daily_rate));
    failed.check(validate_rate("controllerWeeklyRate", rates.controller_weekly_rate));
    failed.check(validate_rate("controllerMonthlyRate", rates.controller_monthly_rate));
}

/// A rate is non-negative and at most [`MAX_RATE`].
pub fn validate_rate(field: &str, value: i64) -> ValidationResult<()> {
    validate_non_negative(field, value)?;
    if value > MAX_RATE {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: MAX_RATE,
        });
    }
    Ok(())
}

// =============================================================================
// Window Validators
// =============================================================================

/// Validates a booking window.
///
/// Bookings must cover at least one instant: `start < end`.
pub fn validate_rental_window(start: DateTime<Utc>, end: DateTime<Utc>) -> ValidationResult<()> {
    if start >= end {
        return Err(ValidationError::InvalidFormat {
            field: "endDate".to_string(),
            reason: "must be after startDate".to_string(),
        });
    }
    Ok(())
}

/// Validates an optional offer validity window.
pub fn validate_offer_window(
    from: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
) -> ValidationResult<()> {
    match (from, until) {
        (Some(from), Some(until)) if until < from => Err(ValidationError::InvalidFormat {
            field: "validUntil".to_string(),
            reason: "must not be before validFrom".to_string(),
        }),
        _ => Ok(()),
    }
}

// =============================================================================
// Composite Validators
// =============================================================================

/// Runs every onboarding rule and reports all failures at once.
pub fn validate_new_device(new: &NewDevice) -> Result<(), ValidationFailed> {
    let mut failed = ValidationFailed::new();
    failed.check(validate_serial_number(&new.serial_number));
    failed.check(validate_category(&new.category));
    failed.check(validate_controller_count(new.controller_count));
    if let Some(cost) = new.purchase_cost {
        failed.check(validate_non_negative("purchaseCost", cost));
    }
    failed.into_result()
}

/// Runs every offer rule.
pub fn validate_new_offer(new: &NewOffer) -> Result<(), ValidationFailed> {
    let mut failed = ValidationFailed::new();
    failed.check(validate_offer_code(&new.code));
    failed.check(validate_discount(new.discount_type, new.discount_value));
    failed.check(validate_offer_window(new.valid_from, new.valid_until));
    for category in &new.applicable_categories {
        if let Err(err) = validate_category(category) {
            failed.push(ValidationError::InvalidFormat {
                field: "applicableCategories".to_string(),
                reason: err.to_string(),
            });
            break;
        }
    }
    failed.into_result()
}

/// Runs every catalog rule on a full settings record.
pub fn validate_catalog_settings(settings: &CatalogSettings) -> Result<(), ValidationFailed> {
    let mut failed = ValidationFailed::new();
    failed.check(validate_category(&settings.device_category));
    validate_rates(&settings.rates, &mut failed);
    if settings.max_controllers == 0 || settings.max_controllers > MAX_BUNDLED_CONTROLLERS {
        failed.push(ValidationError::OutOfRange {
            field: "maxControllers".to_string(),
            min: 1,
            max: MAX_BUNDLED_CONTROLLERS as i64,
        });
    }
    if settings
        .features
        .iter()
        .any(|f| f.trim().is_empty() || f.chars().count() > MAX_FEATURE_LEN)
    {
        failed.push(ValidationError::InvalidFormat {
            field: "features".to_string(),
            reason: format!("entries must be 1 to {} characters", MAX_FEATURE_LEN),
        });
    }
    failed.into_result()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_validate_serial_number() {
        assert!(validate_serial_number("PS5-0001").is_ok());
        assert!(validate_serial_number("xbx_42").is_ok());

        assert!(validate_serial_number("").is_err());
        assert!(validate_serial_number("   ").is_err());
        assert!(validate_serial_number("has space").is_err());
        assert!(validate_serial_number(&"A".repeat(100)).is_err());
    }

    #[test]
    fn test_validate_category() {
        assert!(validate_category("PS5 Pro").is_ok());
        assert!(validate_category("  ").is_err());
        assert!(validate_category(&"x".repeat(101)).is_err());
    }

    #[test]
    fn test_validate_discount() {
        assert!(validate_discount(DiscountType::Percentage, 100).is_ok());
        assert!(validate_discount(DiscountType::Percentage, 101).is_err());
        assert!(validate_discount(DiscountType::Percentage, -1).is_err());
        assert!(validate_discount(DiscountType::Fixed, 5000).is_ok());
        assert!(validate_discount(DiscountType::Fixed, -5).is_err());
    }

    #[test]
    fn test_validate_rental_window() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert!(validate_rental_window(start, start + Duration::days(1)).is_ok());
        assert!(validate_rental_window(start, start).is_err());
        assert!(validate_rental_window(start, start - Duration::hours(1)).is_err());
    }

    #[test]
    fn test_validate_new_device_collects_every_field() {
        let mut new = NewDevice::new("bad serial", "");
        new.controller_count = Some(20);
        new.purchase_cost = Some(-1);

        let failed = validate_new_device(&new).unwrap_err();
        assert_eq!(failed.errors().len(), 4);
        assert!(failed.for_field("serialNumber").is_some());
        assert!(failed.for_field("category").is_some());
        assert!(failed.for_field("controllerCount").is_some());
        assert!(failed.for_field("purchaseCost").is_some());
    }

    #[test]
    fn test_validate_new_offer() {
        assert!(validate_new_offer(&NewOffer::percentage("SPRING10", 10)).is_ok());

        let failed = validate_new_offer(&NewOffer::percentage("spring 10", 150)).unwrap_err();
        assert!(failed.for_field("code").is_some());
        assert!(failed.for_field("discountValue").is_some());
    }

    #[test]
    fn test_validate_catalog_settings() {
        let now = Utc::now();
        let mut settings = CatalogSettings::with_defaults("PS5", now);
        assert!(validate_catalog_settings(&settings).is_ok());

        settings.rates.weekly_rate = -10;
        settings.max_controllers = 0;
        let failed = validate_catalog_settings(&settings).unwrap_err();
        assert!(failed.for_field("weeklyRate").is_some());
        assert!(failed.for_field("maxControllers").is_some());
    }

    #[test]
    fn test_rates_and_controller_limit_are_bounded() {
        let mut settings = CatalogSettings::with_defaults("PS5", Utc::now());
        settings.rates.daily_rate = i64::MAX - 10;
        settings.max_controllers = MAX_BUNDLED_CONTROLLERS + 1;

        let failed = validate_catalog_settings(&settings).unwrap_err();
        assert!(matches!(
            failed.for_field("dailyRate"),
            Some(ValidationError::OutOfRange { max: MAX_RATE, .. })
        ));
        assert!(failed.for_field("maxControllers").is_some());
        assert!(validate_rate("weeklyRate", MAX_RATE).is_ok());
    }
}
