//! # In-Memory Store
//!
//! A [`FleetStore`] over [`Tables`], with outage injection so the fallback
//! path can be exercised without a real network.
//!
//! ## Outage Modes
//! ```text
//!   Outage::None      every call goes through
//!   Outage::Writes    reads work, every write fails with Unavailable
//!   Outage::All       every call fails with Unavailable
//!
//!   fail_next_writes(n)   the next n writes fail, then the store recovers
//! ```

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use fleet_core::{
    CatalogPatch, CatalogSettings, Device, DevicePatch, OfferPatch, PromotionalOffer, Rental,
    RentalFilter, RentalPatch,
};

use super::{FleetStore, Tables};
use crate::error::{StoreError, StoreResult};

/// Which calls an injected outage affects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Outage {
    None = 0,
    Writes = 1,
    All = 2,
}

impl Outage {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Outage::Writes,
            2 => Outage::All,
            _ => Outage::None,
        }
    }
}

/// Primary store kept entirely in memory.
#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    outage: AtomicU8,
    fail_next_writes: AtomicU32,
    writes_attempted: AtomicU32,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_tables(Tables::new())
    }

    pub fn with_tables(tables: Tables) -> Self {
        MemoryStore {
            tables: RwLock::new(tables),
            outage: AtomicU8::new(Outage::None as u8),
            fail_next_writes: AtomicU32::new(0),
            writes_attempted: AtomicU32::new(0),
        }
    }

    pub fn set_outage(&self, outage: Outage) {
        debug!(?outage, "Memory store outage changed");
        self.outage.store(outage as u8, Ordering::SeqCst);
    }

    pub fn outage(&self) -> Outage {
        Outage::from_u8(self.outage.load(Ordering::SeqCst))
    }

    /// Makes the next `count` writes fail with `Unavailable`.
    pub fn fail_next_writes(&self, count: u32) {
        self.fail_next_writes.store(count, Ordering::SeqCst);
    }

    /// Number of write calls received, failed ones included.
    pub fn writes_attempted(&self) -> u32 {
        self.writes_attempted.load(Ordering::SeqCst)
    }

    /// A copy of the current data.
    pub async fn snapshot(&self) -> Tables {
        self.tables.read().await.clone()
    }

    fn check_read(&self) -> StoreResult<()> {
        match self.outage() {
            Outage::All => Err(StoreError::Unavailable("memory store is down".into())),
            Outage::None | Outage::Writes => Ok(()),
        }
    }

    fn check_write(&self) -> StoreResult<()> {
        self.writes_attempted.fetch_add(1, Ordering::SeqCst);

        if self.outage() != Outage::None {
            return Err(StoreError::Unavailable("memory store rejects writes".into()));
        }

        let scripted = self
            .fail_next_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if scripted.is_ok() {
            return Err(StoreError::Unavailable("scripted write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl FleetStore for MemoryStore {
    async fn read_devices(&self) -> StoreResult<Vec<Device>> {
        self.check_read()?;
        Ok(self.tables.read().await.devices())
    }

    async fn read_rentals(&self, filter: &RentalFilter) -> StoreResult<Vec<Rental>> {
        self.check_read()?;
        Ok(self.tables.read().await.rentals(filter))
    }

    async fn read_catalog(&self) -> StoreResult<Vec<CatalogSettings>> {
        self.check_read()?;
        Ok(self.tables.read().await.catalog())
    }

    async fn read_offers(&self) -> StoreResult<Vec<PromotionalOffer>> {
        self.check_read()?;
        Ok(self.tables.read().await.offers())
    }

    async fn read_device(&self, id: &str) -> StoreResult<Option<Device>> {
        self.check_read()?;
        Ok(self.tables.read().await.devices.get(id).cloned())
    }

    async fn read_rental(&self, id: &str) -> StoreResult<Option<Rental>> {
        self.check_read()?;
        Ok(self.tables.read().await.rentals.get(id).cloned())
    }

    async fn insert_device(&self, device: &Device) -> StoreResult<Device> {
        self.check_write()?;
        self.tables.write().await.insert_device(device)
    }

    async fn write_device(&self, id: &str, patch: &DevicePatch) -> StoreResult<Device> {
        self.check_write()?;
        self.tables.write().await.update_device(id, patch, Utc::now())
    }

    async fn delete_device(&self, id: &str) -> StoreResult<()> {
        self.check_write()?;
        self.tables.write().await.delete_device(id)
    }

    async fn insert_rental(&self, rental: &Rental) -> StoreResult<Rental> {
        self.check_write()?;
        self.tables.write().await.insert_rental(rental)
    }

    async fn write_rental(&self, id: &str, patch: &RentalPatch) -> StoreResult<Rental> {
        self.check_write()?;
        self.tables.write().await.update_rental(id, patch, Utc::now())
    }

    async fn write_catalog(
        &self,
        category: &str,
        patch: &CatalogPatch,
    ) -> StoreResult<CatalogSettings> {
        self.check_write()?;
        self.tables
            .write()
            .await
            .upsert_catalog(category, patch, Utc::now())
    }

    async fn rename_catalog(&self, old: &str, new: &str) -> StoreResult<CatalogSettings> {
        self.check_write()?;
        self.tables.write().await.rename_catalog(old, new, Utc::now())
    }

    async fn insert_offer(&self, offer: &PromotionalOffer) -> StoreResult<PromotionalOffer> {
        self.check_write()?;
        self.tables.write().await.insert_offer(offer)
    }

    async fn write_offer(&self, code: &str, patch: &OfferPatch) -> StoreResult<PromotionalOffer> {
        self.check_write()?;
        self.tables.write().await.update_offer(code, patch, Utc::now())
    }
}
