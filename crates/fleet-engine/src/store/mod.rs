//! # Persistence Collaborator
//!
//! The engine talks to storage only through [`FleetStore`]. Every call is
//! asynchronous and may fail on its own.
//!
//! ## Implementations
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   FleetEngine ──► Arc<dyn FleetStore>                                  │
//! │                          │                                              │
//! │          ┌───────────────┼────────────────────┐                         │
//! │          ▼               ▼                    ▼                         │
//! │   ┌─────────────┐ ┌─────────────┐  ┌──────────────────────┐            │
//! │   │ SqliteStore │ │ MemoryStore │  │ FallbackStore        │            │
//! │   │ (fleet-db)  │ │ (tests,     │  │ wraps any primary,   │            │
//! │   │             │ │  outages)   │  │ mirrors on outage    │            │
//! │   └─────────────┘ └─────────────┘  └──────────────────────┘            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Writes take patches, never whole records, so a store can apply them to
//! whatever version it holds and detect conflicts via `expected_version`.

pub mod memory;
pub mod sqlite;
pub mod tables;

use async_trait::async_trait;
use std::collections::BTreeSet;

use fleet_core::{
    CatalogPatch, CatalogSettings, Device, DevicePatch, EntityKind, OfferPatch, PromotionalOffer,
    Rental, RentalFilter, RentalPatch,
};

use crate::error::StoreResult;

pub use memory::{MemoryStore, Outage};
pub use sqlite::SqliteStore;
pub use tables::Tables;

/// A record key: which family, which id.
pub type RecordKey = (EntityKind, String);

/// Asynchronous, fallible storage for the four record families.
#[async_trait]
pub trait FleetStore: Send + Sync {
    // =========================================================================
    // Reads
    // =========================================================================

    async fn read_devices(&self) -> StoreResult<Vec<Device>>;

    async fn read_rentals(&self, filter: &RentalFilter) -> StoreResult<Vec<Rental>>;

    async fn read_catalog(&self) -> StoreResult<Vec<CatalogSettings>>;

    async fn read_offers(&self) -> StoreResult<Vec<PromotionalOffer>>;

    async fn read_device(&self, id: &str) -> StoreResult<Option<Device>> {
        Ok(self.read_devices().await?.into_iter().find(|d| d.id == id))
    }

    async fn read_rental(&self, id: &str) -> StoreResult<Option<Rental>> {
        Ok(self
            .read_rentals(&RentalFilter::all())
            .await?
            .into_iter()
            .find(|r| r.id == id))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Stores a new device. `Duplicate` on a taken id or serial number.
    async fn insert_device(&self, device: &Device) -> StoreResult<Device>;

    async fn write_device(&self, id: &str, patch: &DevicePatch) -> StoreResult<Device>;

    async fn delete_device(&self, id: &str) -> StoreResult<()>;

    async fn insert_rental(&self, rental: &Rental) -> StoreResult<Rental>;

    async fn write_rental(&self, id: &str, patch: &RentalPatch) -> StoreResult<Rental>;

    /// Upsert: a missing category is created from defaults plus `patch`.
    async fn write_catalog(
        &self,
        category: &str,
        patch: &CatalogPatch,
    ) -> StoreResult<CatalogSettings>;

    /// Rekeys a catalog entry and retargets every device (and live rental)
    /// carrying the old label, all or nothing.
    async fn rename_catalog(&self, old: &str, new: &str) -> StoreResult<CatalogSettings>;

    async fn insert_offer(&self, offer: &PromotionalOffer) -> StoreResult<PromotionalOffer>;

    async fn write_offer(&self, code: &str, patch: &OfferPatch) -> StoreResult<PromotionalOffer>;

    // =========================================================================
    // Fallback
    // =========================================================================

    /// Records that exist only in a local mirror, awaiting reconciliation.
    ///
    /// Stores without a mirror have none.
    async fn pending_keys(&self) -> BTreeSet<RecordKey> {
        BTreeSet::new()
    }
}
