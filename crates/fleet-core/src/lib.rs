//! # fleet-core: Pure Business Logic for the Console Rental Fleet
//!
//! This crate is the **heart** of the rental engine. It contains every
//! business rule as a pure function with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Console Fleet Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Storefront / Back Office (external)                │   │
//! │  │    Catalog page ──► Booking flow ──► Admin device table         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 fleet-engine (orchestration)                    │   │
//! │  │    FleetStore trait, FallbackStore, Assignment, Catalog cache   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ fleet-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │  ┌──────────┐ ┌──────────┐ ┌────────────┐ ┌──────────┐         │   │
//! │  │  │  types   │ │lifecycle │ │availability│ │ pricing  │         │   │
//! │  │  │ Device   │ │ legal    │ │ overlap    │ │ quote    │         │   │
//! │  │  │ Rental   │ │ moves    │ │ counting   │ │ offers   │         │   │
//! │  │  └──────────┘ └──────────┘ └────────────┘ └──────────┘         │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO CLOCK • PURE FUNCTIONS             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Device, Rental, CatalogSettings, PromotionalOffer)
//! - [`money`] - Integer money type (whole currency units, no floats)
//! - [`patch`] - Partial updates with optimistic version checks
//! - [`catalog`] - Category matching and the fallback rate table
//! - [`lifecycle`] - Device status state machine and health rules
//! - [`availability`] - Overlap tests and free-unit counting
//! - [`pricing`] - Quote derivation and offer evaluation
//! - [`validation`] - Field-level input validation
//! - [`error`] - Domain error types
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: same catalog + offers + request = same quote
//! 2. **No Clock**: every time-dependent rule takes `now` as an argument
//! 3. **Integer Money**: rates and totals are whole currency units (i64)
//! 4. **Derived Rented**: a device is never *stored* as Rented
//!
//! ## Example Usage
//!
//! ```rust
//! use fleet_core::pricing::{quote, QuoteRequest};
//! use fleet_core::types::RentalPlan;
//!
//! // No catalog entry at all: the fallback rate table answers
//! let request = QuoteRequest::new("Retro Console", RentalPlan::Daily, 1);
//! let q = quote(&[], &[], &request, chrono::Utc::now()).unwrap();
//! assert_eq!(q.total_price, 500);
//! assert!(q.used_fallback_rates);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod availability;
pub mod catalog;
pub mod error;
pub mod lifecycle;
pub mod money;
pub mod patch;
pub mod pricing;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError, ValidationFailed};
pub use money::Money;
pub use patch::{CatalogPatch, DevicePatch, OfferPatch, RentalPatch};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Highest health score a device can carry.
pub const MAX_HEALTH: u8 = 100;

/// Health below which a `Ready` device is pulled into `Maintenance`.
///
/// ## Business Reason
/// A unit that scored poorly on inspection should not be handed to a customer
/// until a technician has looked at it. Engine config can override this.
pub const DEFAULT_HEALTH_MAINTENANCE_THRESHOLD: u8 = 60;

/// Maximum controllers a category allows when it is first created.
pub const DEFAULT_MAX_CONTROLLERS: u32 = 4;

/// Upper bound accepted for a device's bundled controller count.
pub const MAX_BUNDLED_CONTROLLERS: u32 = 8;

/// Largest rate, in whole units, a catalog entry may carry.
pub const MAX_RATE: i64 = 1_000_000_000;
