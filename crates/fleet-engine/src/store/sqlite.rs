//! # SQLite Store
//!
//! [`FleetStore`] over the fleet-db repositories. Each call maps to one
//! repository method; `DbError`s are translated to [`StoreError`]s with the
//! record family filled in.

use async_trait::async_trait;
use tracing::debug;

use fleet_core::{
    CatalogPatch, CatalogSettings, Device, DevicePatch, EntityKind, OfferPatch, PromotionalOffer,
    Rental, RentalFilter, RentalPatch,
};
use fleet_db::{Database, DbError};

use super::FleetStore;
use crate::error::{StoreError, StoreResult};

/// Adds the record family to the errors that need it.
fn map_err(entity: EntityKind) -> impl Fn(DbError) -> StoreError {
    move |err| match err {
        DbError::NotFound { id, .. } => StoreError::NotFound { entity, id },
        DbError::VersionConflict { id, expected, .. } => {
            StoreError::VersionConflict { entity, id, expected }
        }
        other => StoreError::from(other),
    }
}

/// Primary store backed by SQLite.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        SqliteStore { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl FleetStore for SqliteStore {
    async fn read_devices(&self) -> StoreResult<Vec<Device>> {
        self.db.devices().list().await.map_err(map_err(EntityKind::Device))
    }

    async fn read_rentals(&self, filter: &RentalFilter) -> StoreResult<Vec<Rental>> {
        self.db
            .rentals()
            .list(filter)
            .await
            .map_err(map_err(EntityKind::Rental))
    }

    async fn read_catalog(&self) -> StoreResult<Vec<CatalogSettings>> {
        self.db.catalog().list().await.map_err(map_err(EntityKind::Catalog))
    }

    async fn read_offers(&self) -> StoreResult<Vec<PromotionalOffer>> {
        self.db.offers().list().await.map_err(map_err(EntityKind::Offer))
    }

    async fn read_device(&self, id: &str) -> StoreResult<Option<Device>> {
        self.db
            .devices()
            .get_by_id(id)
            .await
            .map_err(map_err(EntityKind::Device))
    }

    async fn read_rental(&self, id: &str) -> StoreResult<Option<Rental>> {
        self.db
            .rentals()
            .get_by_id(id)
            .await
            .map_err(map_err(EntityKind::Rental))
    }

    async fn insert_device(&self, device: &Device) -> StoreResult<Device> {
        self.db
            .devices()
            .insert(device)
            .await
            .map_err(map_err(EntityKind::Device))
    }

    async fn write_device(&self, id: &str, patch: &DevicePatch) -> StoreResult<Device> {
        self.db
            .devices()
            .update(id, patch)
            .await
            .map_err(map_err(EntityKind::Device))
    }

    async fn delete_device(&self, id: &str) -> StoreResult<()> {
        self.db
            .devices()
            .delete(id)
            .await
            .map_err(map_err(EntityKind::Device))
    }

    async fn insert_rental(&self, rental: &Rental) -> StoreResult<Rental> {
        self.db
            .rentals()
            .insert(rental)
            .await
            .map_err(map_err(EntityKind::Rental))
    }

    async fn write_rental(&self, id: &str, patch: &RentalPatch) -> StoreResult<Rental> {
        self.db
            .rentals()
            .update(id, patch)
            .await
            .map_err(map_err(EntityKind::Rental))
    }

    async fn write_catalog(
        &self,
        category: &str,
        patch: &CatalogPatch,
    ) -> StoreResult<CatalogSettings> {
        self.db
            .catalog()
            .upsert(category, patch)
            .await
            .map_err(map_err(EntityKind::Catalog))
    }

    async fn rename_catalog(&self, old: &str, new: &str) -> StoreResult<CatalogSettings> {
        debug!(from = %old, to = %new, "Renaming category in SQLite");
        self.db
            .catalog()
            .rename(old, new)
            .await
            .map_err(map_err(EntityKind::Catalog))
    }

    async fn insert_offer(&self, offer: &PromotionalOffer) -> StoreResult<PromotionalOffer> {
        self.db
            .offers()
            .insert(offer)
            .await
            .map_err(map_err(EntityKind::Offer))
    }

    async fn write_offer(&self, code: &str, patch: &OfferPatch) -> StoreResult<PromotionalOffer> {
        self.db
            .offers()
            .update(code, patch)
            .await
            .map_err(map_err(EntityKind::Offer))
    }
}
