//! # Repository Module
//!
//! One repository per table of the primary store.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SqliteStore (fleet-engine)                                            │
//! │       │                                                                 │
//! │       │  db.devices().update(id, &patch)                               │
//! │       ▼                                                                 │
//! │  DeviceRepository ─┐                                                    │
//! │  RentalRepository ─┼──► SQL (runtime queries, FromRow rows)            │
//! │  CatalogRepository ┤                                                    │
//! │  OfferRepository ──┘                                                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Patches are applied with a read-modify-write inside one transaction:
//! the row is read, the patch is applied with the domain's own `apply`, and
//! the full row is written back guarded by `WHERE sync_version = ?`.
//!
//! ## Available Repositories
//!
//! - [`device::DeviceRepository`] - Physical units
//! - [`rental::RentalRepository`] - Bookings and their bindings
//! - [`catalog::CatalogRepository`] - Per-category settings and rename
//! - [`offer::OfferRepository`] - Promotional codes

pub mod catalog;
pub mod device;
pub mod offer;
pub mod rental;

use crate::error::{DbError, DbResult};

/// Encodes a string list for a JSON TEXT column.
pub(crate) fn encode_list(table: &str, values: &[String]) -> DbResult<String> {
    serde_json::to_string(values).map_err(|e| DbError::corrupt(table, e))
}

/// Decodes a JSON TEXT column into a string list.
pub(crate) fn decode_list(table: &str, raw: &str) -> DbResult<Vec<String>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw).map_err(|e| DbError::corrupt(table, e))
}

/// Narrows a stored INTEGER into a `u32` column value.
pub(crate) fn to_u32(table: &str, column: &str, value: i64) -> DbResult<u32> {
    u32::try_from(value).map_err(|_| DbError::corrupt(table, format!("{column} = {value}")))
}
