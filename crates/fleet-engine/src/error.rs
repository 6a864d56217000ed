//! # Engine Error Types
//!
//! Two layers: [`StoreError`] is what a persistence collaborator reports,
//! [`FleetError`] is what callers of the engine see.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Engine Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Business rule  │  │     Store       │  │     Configuration       │ │
//! │  │  (CoreError)    │  │  (StoreError)   │  │                         │ │
//! │  │                 │  │                 │  │  InvalidConfig          │ │
//! │  │  NoAvailableUnit│  │  Unavailable ───┼──┼─► fallback mirror       │ │
//! │  │  DeviceAlready  │  │  NotFound       │  │  ConfigLoadFailed       │ │
//! │  │    Booked       │  │  Duplicate      │  │  ConfigSaveFailed       │ │
//! │  │  Validation ... │  │  VersionConflict│  │                         │ │
//! │  └─────────────────┘  │  Persistence    │  └─────────────────────────┘ │
//! │                       │    Failed       │                              │
//! │                       └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use fleet_core::{CoreError, EntityKind, ValidationError, ValidationFailed};

/// Result type alias for store calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for engine operations.
pub type FleetResult<T> = Result<T, FleetError>;

// =============================================================================
// Store Error
// =============================================================================

/// Failure reported by a [`FleetStore`](crate::store::FleetStore).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    /// The store could not be reached.
    ///
    /// ## When This Occurs
    /// - SQLite pool closed or exhausted
    /// - Injected outage on the in-memory store
    ///
    /// The fallback layer catches this one and writes to the mirror.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: EntityKind, id: String },

    /// A unique key is already taken (serial number, offer code, category).
    #[error("Duplicate {field}: '{value}' already exists")]
    Duplicate { field: String, value: String },

    /// An `expected_version` did not match the stored record.
    #[error("{entity} {id} changed concurrently (expected version {expected})")]
    VersionConflict {
        entity: EntityKind,
        id: String,
        expected: i64,
    },

    /// The store refused the record (CHECK constraint and the like).
    #[error("Store rejected the write: {0}")]
    Rejected(String),

    /// Stored data could not be decoded.
    #[error("Corrupt store data: {0}")]
    Corrupt(String),

    /// The primary failed and the fallback mirror could not take the write
    /// either.
    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),

    /// Any other backend failure.
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(entity: EntityKind, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        StoreError::Duplicate {
            field: field.into(),
            value: value.into(),
        }
    }

    /// True when the store could not be reached at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }

    /// Returns true if the same call may succeed when repeated.
    pub fn is_retryable(&self) -> bool {
        self.is_unavailable()
    }
}

impl From<fleet_db::DbError> for StoreError {
    fn from(err: fleet_db::DbError) -> Self {
        use fleet_db::DbError;

        if err.is_connectivity() {
            return StoreError::Unavailable(err.to_string());
        }
        match err {
            DbError::UniqueViolation { field, value } => StoreError::Duplicate { field, value },
            DbError::ConstraintViolation(msg) => StoreError::Rejected(msg),
            DbError::Corrupt { table, reason } => {
                StoreError::Corrupt(format!("{table}: {reason}"))
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

// =============================================================================
// Fleet Error
// =============================================================================

/// Error returned by [`FleetEngine`](crate::FleetEngine) operations.
///
/// ## Design Principles
/// - Business-rule violations stay typed (`Rule(CoreError)`)
/// - A missing record is its own variant, not a string
/// - Store failures the fallback could not absorb surface as `Store`
#[derive(Debug, Error)]
pub enum FleetError {
    /// A business rule refused the operation.
    #[error(transparent)]
    Rule(#[from] CoreError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: EntityKind, id: String },

    /// Both the primary store and the fallback mirror failed.
    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),

    /// Any other store failure (conflict, outage without fallback, ...).
    #[error("Store error: {0}")]
    Store(StoreError),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),
}

impl FleetError {
    pub fn not_found(entity: EntityKind, id: impl Into<String>) -> Self {
        FleetError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// The business-rule error, if this is one.
    pub fn as_rule(&self) -> Option<&CoreError> {
        match self {
            FleetError::Rule(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for FleetError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => FleetError::NotFound { entity, id },
            StoreError::Duplicate { field, value } => FleetError::Rule(CoreError::Validation(
                ValidationFailed::single(ValidationError::Duplicate { field, value }),
            )),
            StoreError::PersistenceFailed(msg) => FleetError::PersistenceFailed(msg),
            other => FleetError::Store(other),
        }
    }
}

impl From<ValidationFailed> for FleetError {
    fn from(err: ValidationFailed) -> Self {
        FleetError::Rule(CoreError::Validation(err))
    }
}

impl From<ValidationError> for FleetError {
    fn from(err: ValidationError) -> Self {
        FleetError::Rule(CoreError::from(err))
    }
}

impl From<std::io::Error> for FleetError {
    fn from(err: std::io::Error) -> Self {
        FleetError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for FleetError {
    fn from(err: toml::de::Error) -> Self {
        FleetError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for FleetError {
    fn from(err: toml::ser::Error) -> Self {
        FleetError::ConfigSaveFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_db::DbError;

    #[test]
    fn test_db_errors_classify() {
        assert!(StoreError::from(DbError::PoolExhausted).is_unavailable());
        assert!(StoreError::from(DbError::ConnectionFailed("gone".into())).is_retryable());
        assert_eq!(
            StoreError::from(DbError::duplicate("serialNumber", "PS5-1")),
            StoreError::duplicate("serialNumber", "PS5-1")
        );
        assert!(!StoreError::from(DbError::ConstraintViolation("health".into())).is_retryable());
    }

    #[test]
    fn test_duplicate_surfaces_as_field_error() {
        let err = FleetError::from(StoreError::duplicate("serialNumber", "PS5-001"));
        match err {
            FleetError::Rule(CoreError::Validation(failed)) => {
                assert!(failed.for_field("serialNumber").is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_not_found_and_persistence_map_directly() {
        assert!(matches!(
            FleetError::from(StoreError::not_found(EntityKind::Rental, "r-1")),
            FleetError::NotFound { entity: EntityKind::Rental, .. }
        ));
        assert!(matches!(
            FleetError::from(StoreError::PersistenceFailed("disk full".into())),
            FleetError::PersistenceFailed(_)
        ));
        assert!(matches!(
            FleetError::from(StoreError::Unavailable("down".into())),
            FleetError::Store(StoreError::Unavailable(_))
        ));
    }
}
