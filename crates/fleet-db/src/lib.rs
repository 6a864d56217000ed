//! # fleet-db: SQLite Primary Store
//!
//! Durable storage for devices, rentals, catalog settings and promotional
//! offers. It uses SQLite with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Console Fleet Data Flow                          │
//! │                                                                         │
//! │  FleetEngine (book / assign / complete)                                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SqliteStore (fleet-engine) ── maps DbError ──► StoreError             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     fleet-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ DeviceRepo    │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ RentalRepo    │    │ 001_initial  │  │   │
//! │  │   │ WAL, busy     │    │ CatalogRepo   │    │   _schema    │  │   │
//! │  │   │ timeout       │    │ OfferRepo     │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  fleet.db (SQLite, WAL)                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - One repository per table
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fleet_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("./fleet.db")).await?;
//! let ps5_units = db.devices().list_by_category("PS5").await?;
//! let live = db.rentals().list(&RentalFilter::live()).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::catalog::CatalogRepository;
pub use repository::device::DeviceRepository;
pub use repository::offer::OfferRepository;
pub use repository::rental::RentalRepository;
