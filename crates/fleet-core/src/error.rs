//! # Error Types
//!
//! Domain-specific error types for fleet-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  fleet-core errors (this file)                                         │
//! │  ├── CoreError         - Business rule violations                      │
//! │  ├── ValidationFailed  - One or more field errors                      │
//! │  └── ValidationError   - A single field error                          │
//! │                                                                         │
//! │  fleet-db errors (separate crate)                                      │
//! │  └── DbError           - SQLite failures                               │
//! │                                                                         │
//! │  fleet-engine errors (separate crate)                                  │
//! │  ├── StoreError        - Persistence collaborator failures             │
//! │  └── FleetError        - What booking/admin flows see                  │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → FleetError → UI message           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (device id, category, limits)
//! 3. Every variant is user-actionable: the booking flow can show it verbatim

use std::fmt;

use thiserror::Error;

use crate::types::DeviceStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Business rule violations.
///
/// These are never swallowed: assignment and lifecycle failures block the
/// specific action and report the reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// No device in the category satisfies the window and status constraints.
    ///
    /// ## User Workflow
    /// ```text
    /// Book "PS5" for Jan 1 → Jan 2
    ///      │
    ///      ▼
    /// Every PS5 is either booked in that window or under repair
    ///      │
    ///      ▼
    /// NoAvailableUnit { category: "PS5" }
    ///      │
    ///      ▼
    /// UI shows: "No PS5 available for those dates"
    /// ```
    #[error("No available unit in category '{category}'")]
    NoAvailableUnit { category: String },

    /// The device already carries a live rental overlapping the window.
    ///
    /// ## When This Occurs
    /// - An explicitly chosen device is booked in that window
    /// - The optimistic re-check just before commit found a competing binding
    #[error("Device {device_id} is already booked for an overlapping window")]
    DeviceAlreadyBooked { device_id: String },

    /// More controllers requested than the category allows.
    #[error("Requested {requested} controllers, category allows at most {max}")]
    ControllerLimitExceeded { requested: u32, max: u32 },

    /// The lifecycle state machine rejected the move.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition { from: DeviceStatus, to: DeviceStatus },

    /// Rename target already exists as a distinct catalog entry.
    #[error("Category '{name}' already exists")]
    CategoryRenameConflict { name: String },

    /// Device status does not allow binding it to this rental window.
    #[error("Device {device_id} is {status} and cannot be assigned")]
    DeviceNotAssignable {
        device_id: String,
        status: DeviceStatus,
    },

    /// Device category differs from the rental's category.
    #[error("Device {device_id} is a '{device_category}', rental needs '{rental_category}'")]
    CategoryMismatch {
        device_id: String,
        device_category: String,
        rental_category: String,
    },

    /// Operation needs an active or overdue rental.
    #[error("Rental {rental_id} is {status} and can no longer change")]
    RentalNotLive { rental_id: String, status: String },

    /// Device is still referenced by a live rental.
    #[error("Device {device_id} has {live_rentals} live rental(s)")]
    DeviceInUse {
        device_id: String,
        live_rentals: usize,
    },

    /// Schema-level field errors.
    #[error(transparent)]
    Validation(#[from] ValidationFailed),
}

impl From<ValidationError> for CoreError {
    fn from(err: ValidationError) -> Self {
        CoreError::Validation(ValidationFailed::single(err))
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// A single input validation failure, addressable by field name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    Negative { field: String },

    /// Invalid format (e.g., serial number characters, inverted window).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Duplicate value (e.g., duplicate serial number or offer code).
    #[error("{field} '{value}' already exists")]
    Duplicate { field: String, value: String },
}

impl ValidationError {
    /// Name of the offending field.
    pub fn field(&self) -> &str {
        match self {
            ValidationError::Required { field }
            | ValidationError::TooLong { field, .. }
            | ValidationError::OutOfRange { field, .. }
            | ValidationError::Negative { field }
            | ValidationError::InvalidFormat { field, .. }
            | ValidationError::Duplicate { field, .. } => field,
        }
    }
}

/// All field errors found while validating one input.
///
/// ## Why collect?
/// The admin onboarding form highlights every bad field at once instead of
/// making the operator fix them one round-trip at a time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationFailed {
    errors: Vec<ValidationError>,
}

impl ValidationFailed {
    /// Wraps a single field error.
    pub fn single(err: ValidationError) -> Self {
        ValidationFailed { errors: vec![err] }
    }

    /// Empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `result` if it is an error.
    pub fn check(&mut self, result: Result<(), ValidationError>) {
        if let Err(err) = result {
            self.errors.push(err);
        }
    }

    /// Adds an error unconditionally.
    pub fn push(&mut self, err: ValidationError) {
        self.errors.push(err);
    }

    /// `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> Result<(), ValidationFailed> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Every recorded error.
    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// The error recorded for `field`, if any.
    pub fn for_field(&self, field: &str) -> Option<&ValidationError> {
        self.errors.iter().find(|e| e.field() == field)
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for ValidationFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validation failed")?;
        for (i, err) in self.errors.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}", sep, err)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationFailed {}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::ControllerLimitExceeded {
            requested: 5,
            max: 4,
        };
        assert_eq!(
            err.to_string(),
            "Requested 5 controllers, category allows at most 4"
        );

        let err = CoreError::InvalidStatusTransition {
            from: DeviceStatus::UnderRepair,
            to: DeviceStatus::Rented,
        };
        assert_eq!(
            err.to_string(),
            "Invalid status transition: Under-Repair -> Rented"
        );
    }

    #[test]
    fn test_validation_failed_collects_fields() {
        let mut failed = ValidationFailed::new();
        failed.check(Ok(()));
        failed.check(Err(ValidationError::Required {
            field: "serialNumber".to_string(),
        }));
        failed.push(ValidationError::Negative {
            field: "purchaseCost".to_string(),
        });

        let err = failed.into_result().unwrap_err();
        assert_eq!(err.errors().len(), 2);
        assert!(err.for_field("serialNumber").is_some());
        assert!(err.for_field("category").is_none());
        assert_eq!(
            err.to_string(),
            "Validation failed: serialNumber is required; purchaseCost must not be negative"
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "code".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
