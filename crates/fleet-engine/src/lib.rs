//! # fleet-engine: Allocation Engine for the Console Fleet
//!
//! Books rentals, binds physical units to them and keeps the fleet's
//! lifecycle honest. The rules live in `fleet-core`; this crate runs them
//! against a [`FleetStore`] and survives primary-store outages with a local
//! mirror.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Console Fleet Engine                             │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                    FleetEngine (Orchestrator)                    │  │
//! │  │                                                                  │  │
//! │  │  quote · available_count · book · assign · complete · cancel    │  │
//! │  │  onboard_device · set_device_status · edit_health · decommission │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ CatalogService │  │ FallbackStore  │  │  Clock                 │    │
//! │  │                │  │                │  │                        │    │
//! │  │ cached catalog │  │ primary first, │  │ SystemClock in         │    │
//! │  │ + offers,      │  │ local mirror   │  │ production,            │    │
//! │  │ rename w/ retry│  │ on outage      │  │ FixedClock in tests    │    │
//! │  └────────────────┘  └───────┬────────┘  └────────────────────────┘    │
//! │                              │                                          │
//! │                 ┌────────────┴────────────┐                             │
//! │                 ▼                         ▼                             │
//! │          ┌─────────────┐          ┌──────────────┐                      │
//! │          │ SqliteStore │          │ LocalMirror  │                      │
//! │          │ (fleet-db)  │          │ JSON + outbox│                      │
//! │          └─────────────┘          └──────────────┘                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`engine`] - `FleetEngine` construction and fallback administration
//! - [`pricing`] - quotes with fallback rates
//! - [`availability`] - free-unit counts and lists
//! - [`devices`] - onboarding and operator edits
//! - [`rentals`] - booking, assignment, release, overdue sweep
//! - [`catalog`] - catalog and offer cache, category rename
//! - [`store`] - the `FleetStore` trait, SQLite and in-memory stores
//! - [`fallback`] - local mirror and pending-write log
//! - [`config`] - TOML + environment configuration
//! - [`error`] - store and engine error types
//! - [`telemetry`] - tracing subscriber setup
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fleet_engine::{BookingRequest, EngineConfig, FleetEngine, RentalPlan};
//!
//! let engine = FleetEngine::open(EngineConfig::load_or_default(None)).await?;
//!
//! let rental = engine
//!     .book(BookingRequest::new("PS5", RentalPlan::Weekly, start, end).controllers(2))
//!     .await?;
//! println!("{} on unit {:?}", rental.total_price, rental.device_id);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod availability;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod devices;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod pricing;
pub mod rentals;
pub mod store;
pub mod telemetry;

// =============================================================================
// Re-exports
// =============================================================================

pub use catalog::{CatalogService, CatalogSnapshot, ResolvedCategory};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::EngineConfig;
pub use devices::DeviceView;
pub use engine::FleetEngine;
pub use error::{FleetError, FleetResult, StoreError, StoreResult};
pub use fallback::{FallbackStore, LocalMirror, PendingOperation, PendingWrite};
pub use rentals::{Assignment, BookingRequest};
pub use store::{FleetStore, MemoryStore, Outage, SqliteStore, Tables};

pub use fleet_core::availability::MaintenancePolicy;
pub use fleet_core::pricing::{Quote, QuoteRequest};
pub use fleet_core::{
    CatalogPatch, CatalogSettings, CoreError, DateRange, Device, DevicePatch, DeviceStatus,
    EntityKind, NewDevice, NewOffer, PromotionalOffer, RateTable, Rental, RentalFilter,
    RentalPlan, RentalStatus,
};
