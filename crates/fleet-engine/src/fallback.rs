//! # Fallback Consistency Layer
//!
//! [`FallbackStore`] wraps the primary store. When a primary call fails with
//! `Unavailable`, the write lands in a [`LocalMirror`] instead and is recorded
//! in an outbox for manual reconciliation. Reads overlay the mirror's pending
//! records on top of whatever the primary returns.
//!
//! ## Write Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  write(id, patch)                                                       │
//! │       │                                                                 │
//! │       ├── id already pending locally? ──yes──► mirror                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  primary.write ──Ok──► remember in `known`, return                      │
//! │       │                                                                 │
//! │       ├── Unavailable ──► mirror: apply to known+overlay,               │
//! │       │                   store in overlay, append to outbox,           │
//! │       │                   persist snapshot ──fail──► PersistenceFailed  │
//! │       │                                                                 │
//! │       └── any other error ──► returned unchanged                        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Read Path
//! ```text
//!   primary.read ──Ok──► refresh `known`, overlay pending records (local wins)
//!        │
//!        └── Unavailable ──► known + overlay
//! ```
//!
//! Category renames need the primary; they are never mirrored.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use fleet_core::{
    CatalogPatch, CatalogSettings, Device, DevicePatch, EntityKind, OfferPatch, PromotionalOffer,
    Rental, RentalFilter, RentalPatch,
};

use crate::error::{StoreError, StoreResult};
use crate::store::tables::{label_key, sort_devices, sort_rentals};
use crate::store::{FleetStore, RecordKey, Tables};

// =============================================================================
// Pending Writes
// =============================================================================

/// What a pending write did to its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingOperation {
    Insert,
    Update,
    Delete,
}

/// One write the primary store has not seen yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingWrite {
    /// Monotonic sequence number, used to acknowledge entries.
    pub seq: u64,
    pub entity: EntityKind,
    pub entity_id: String,
    pub operation: PendingOperation,
    /// The record as the mirror stored it (`null` for deletes).
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

// =============================================================================
// Local Mirror
// =============================================================================

/// Synchronous local copy of the fleet.
///
/// `known` holds the last records the primary returned; `overlay` holds the
/// records written locally while the primary was down. Only `overlay`
/// records are "locally pending".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalMirror {
    known: Tables,
    overlay: Tables,
    removed_devices: BTreeSet<String>,
    outbox: Vec<PendingWrite>,
    next_seq: u64,

    #[serde(skip)]
    path: Option<PathBuf>,
    #[serde(skip)]
    max_pending: usize,
}

impl LocalMirror {
    /// An empty mirror that lives only in memory.
    pub fn new(max_pending: usize) -> Self {
        LocalMirror {
            max_pending,
            next_seq: 1,
            ..Default::default()
        }
    }

    /// Loads the mirror snapshot at `path`, or starts empty if there is none.
    ///
    /// Every later change is written back to the same file.
    pub fn open(path: impl Into<PathBuf>, max_pending: usize) -> StoreResult<Self> {
        let path = path.into();

        let mut mirror = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                StoreError::PersistenceFailed(format!("read {}: {e}", path.display()))
            })?;
            let mirror: LocalMirror = serde_json::from_str(&content)
                .map_err(|e| StoreError::Corrupt(format!("mirror {}: {e}", path.display())))?;
            info!(
                path = %path.display(),
                pending = mirror.outbox.len(),
                "Loaded local mirror"
            );
            mirror
        } else {
            debug!(path = %path.display(), "No mirror snapshot yet, starting empty");
            LocalMirror::new(max_pending)
        };

        mirror.path = Some(path);
        mirror.max_pending = max_pending;
        mirror.next_seq = mirror.next_seq.max(1);
        Ok(mirror)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn pending(&self) -> &[PendingWrite] {
        &self.outbox
    }

    pub fn pending_keys(&self) -> BTreeSet<RecordKey> {
        self.outbox
            .iter()
            .map(|w| (w.entity, w.entity_id.clone()))
            .collect()
    }

    /// Whether a record has local changes the primary has not seen.
    pub fn is_local(&self, entity: EntityKind, id: &str) -> bool {
        match entity {
            EntityKind::Device => {
                self.overlay.devices.contains_key(id) || self.removed_devices.contains(id)
            }
            EntityKind::Rental => self.overlay.rentals.contains_key(id),
            EntityKind::Catalog => self.overlay.catalog.contains_key(&label_key(id)),
            EntityKind::Offer => self.overlay.offers.contains_key(&label_key(id)),
        }
    }

    /// `known` with `overlay` laid over it.
    pub fn merged(&self) -> Tables {
        let mut merged = self.known.clone();
        for device in self.overlay.devices.values() {
            merged.put_device(device.clone());
        }
        for id in &self.removed_devices {
            merged.devices.remove(id);
        }
        for rental in self.overlay.rentals.values() {
            merged.put_rental(rental.clone());
        }
        for settings in self.overlay.catalog.values() {
            merged.put_catalog(settings.clone());
        }
        for offer in self.overlay.offers.values() {
            merged.put_offer(offer.clone());
        }
        merged
    }

    // =========================================================================
    // Overlaying primary reads
    // =========================================================================

    fn overlay_devices(&mut self, primary: Vec<Device>) -> Vec<Device> {
        self.known.devices = primary.into_iter().map(|d| (d.id.clone(), d)).collect();

        let mut by_id: BTreeMap<String, Device> = self.known.devices.clone();
        by_id.extend(self.overlay.devices.clone());
        for id in &self.removed_devices {
            by_id.remove(id);
        }

        let mut devices: Vec<Device> = by_id.into_values().collect();
        sort_devices(&mut devices);
        devices
    }

    fn overlay_rentals(&mut self, primary: Vec<Rental>, filter: &RentalFilter) -> Vec<Rental> {
        for rental in &primary {
            self.known.put_rental(rental.clone());
        }

        let mut by_id: BTreeMap<String, Rental> =
            primary.into_iter().map(|r| (r.id.clone(), r)).collect();
        for (id, local) in &self.overlay.rentals {
            if filter.matches(local) {
                by_id.insert(id.clone(), local.clone());
            } else {
                by_id.remove(id);
            }
        }

        let mut rentals: Vec<Rental> = by_id.into_values().collect();
        sort_rentals(&mut rentals);
        rentals
    }

    fn overlay_catalog(&mut self, primary: Vec<CatalogSettings>) -> Vec<CatalogSettings> {
        self.known.catalog.clear();
        for settings in primary {
            self.known.put_catalog(settings);
        }
        let mut merged = self.known.catalog.clone();
        merged.extend(self.overlay.catalog.clone());
        merged.into_values().collect()
    }

    fn overlay_offers(&mut self, primary: Vec<PromotionalOffer>) -> Vec<PromotionalOffer> {
        self.known.offers.clear();
        for offer in primary {
            self.known.put_offer(offer);
        }
        let mut merged = self.known.offers.clone();
        merged.extend(self.overlay.offers.clone());
        merged.into_values().collect()
    }

    // =========================================================================
    // Local writes
    // =========================================================================

    /// Runs `change` against the mirror, records it and persists the result.
    ///
    /// Any failure restores the mirror to its previous state.
    fn commit<T, F>(&mut self, change: F) -> StoreResult<T>
    where
        F: FnOnce(&mut LocalMirror, DateTime<Utc>) -> StoreResult<(T, PendingWrite)>,
    {
        if self.outbox.len() >= self.max_pending {
            return Err(StoreError::PersistenceFailed(format!(
                "local mirror is full ({} pending writes)",
                self.outbox.len()
            )));
        }

        let backup = self.clone();
        let result = change(self, Utc::now()).and_then(|(value, entry)| {
            warn!(
                entity = %entry.entity,
                id = %entry.entity_id,
                operation = ?entry.operation,
                seq = entry.seq,
                "Write stored in local mirror, pending reconciliation"
            );
            self.outbox.push(entry);
            self.persist()?;
            Ok(value)
        });

        if result.is_err() {
            *self = backup;
        }
        result
    }

    fn entry<T: Serialize>(
        &mut self,
        entity: EntityKind,
        id: &str,
        operation: PendingOperation,
        record: Option<&T>,
        now: DateTime<Utc>,
    ) -> StoreResult<PendingWrite> {
        let payload = match record {
            Some(record) => serde_json::to_value(record)
                .map_err(|e| StoreError::PersistenceFailed(e.to_string()))?,
            None => serde_json::Value::Null,
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        Ok(PendingWrite {
            seq,
            entity,
            entity_id: id.to_string(),
            operation,
            payload,
            recorded_at: now,
        })
    }

    pub fn insert_device(&mut self, device: &Device) -> StoreResult<Device> {
        self.commit(|m, now| {
            let stored = m.merged().insert_device(device)?;
            m.removed_devices.remove(&stored.id);
            m.overlay.put_device(stored.clone());
            let entry = m.entry(EntityKind::Device, &stored.id, PendingOperation::Insert, Some(&stored), now)?;
            Ok((stored, entry))
        })
    }

    pub fn write_device(&mut self, id: &str, patch: &DevicePatch) -> StoreResult<Device> {
        self.commit(|m, now| {
            let stored = m.merged().update_device(id, patch, now)?;
            m.overlay.put_device(stored.clone());
            let entry = m.entry(EntityKind::Device, id, PendingOperation::Update, Some(&stored), now)?;
            Ok((stored, entry))
        })
    }

    pub fn delete_device(&mut self, id: &str) -> StoreResult<()> {
        self.commit(|m, now| {
            m.merged().delete_device(id)?;
            m.overlay.devices.remove(id);
            m.removed_devices.insert(id.to_string());
            let entry = m.entry::<Device>(EntityKind::Device, id, PendingOperation::Delete, None, now)?;
            Ok(((), entry))
        })
    }

    pub fn insert_rental(&mut self, rental: &Rental) -> StoreResult<Rental> {
        self.commit(|m, now| {
            let stored = m.merged().insert_rental(rental)?;
            m.overlay.put_rental(stored.clone());
            let entry = m.entry(EntityKind::Rental, &stored.id, PendingOperation::Insert, Some(&stored), now)?;
            Ok((stored, entry))
        })
    }

    pub fn write_rental(&mut self, id: &str, patch: &RentalPatch) -> StoreResult<Rental> {
        self.commit(|m, now| {
            let stored = m.merged().update_rental(id, patch, now)?;
            m.overlay.put_rental(stored.clone());
            let entry = m.entry(EntityKind::Rental, id, PendingOperation::Update, Some(&stored), now)?;
            Ok((stored, entry))
        })
    }

    pub fn write_catalog(
        &mut self,
        category: &str,
        patch: &CatalogPatch,
    ) -> StoreResult<CatalogSettings> {
        self.commit(|m, now| {
            let mut merged = m.merged();
            let operation = if merged.catalog.contains_key(&label_key(category)) {
                PendingOperation::Update
            } else {
                PendingOperation::Insert
            };
            let stored = merged.upsert_catalog(category, patch, now)?;
            m.overlay.put_catalog(stored.clone());
            let entry = m.entry(EntityKind::Catalog, &stored.device_category, operation, Some(&stored), now)?;
            Ok((stored, entry))
        })
    }

    pub fn insert_offer(&mut self, offer: &PromotionalOffer) -> StoreResult<PromotionalOffer> {
        self.commit(|m, now| {
            let stored = m.merged().insert_offer(offer)?;
            m.overlay.put_offer(stored.clone());
            let entry = m.entry(EntityKind::Offer, &stored.code, PendingOperation::Insert, Some(&stored), now)?;
            Ok((stored, entry))
        })
    }

    pub fn write_offer(&mut self, code: &str, patch: &OfferPatch) -> StoreResult<PromotionalOffer> {
        self.commit(|m, now| {
            let stored = m.merged().update_offer(code, patch, now)?;
            m.overlay.put_offer(stored.clone());
            let entry = m.entry(EntityKind::Offer, &stored.code, PendingOperation::Update, Some(&stored), now)?;
            Ok((stored, entry))
        })
    }

    /// Mirrors a rename the primary already committed.
    fn apply_rename(&mut self, renamed: &CatalogSettings, old: &str, now: DateTime<Utc>) {
        let new = renamed.device_category.as_str();
        for tables in [&mut self.known, &mut self.overlay] {
            if let Some(mut local) = tables.catalog.remove(&label_key(old)) {
                local.device_category = new.to_string();
                tables.put_catalog(local);
            }
            tables.retarget_category(old, new, now);
        }
        self.known.put_catalog(renamed.clone());
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Drops the given outbox entries.
    ///
    /// A record whose last pending entry is dropped leaves the overlay, so
    /// the next read shows the primary's copy again. Returns how many entries
    /// were removed.
    pub fn acknowledge(&mut self, seqs: &[u64]) -> StoreResult<usize> {
        let backup = self.clone();
        let before = self.outbox.len();
        let (dropped, kept): (Vec<PendingWrite>, Vec<PendingWrite>) = std::mem::take(&mut self.outbox)
            .into_iter()
            .partition(|w| seqs.contains(&w.seq));
        self.outbox = kept;

        let still_pending = self.pending_keys();
        for write in &dropped {
            if still_pending.contains(&(write.entity, write.entity_id.clone())) {
                continue;
            }
            let id = write.entity_id.as_str();
            match write.entity {
                EntityKind::Device => {
                    self.overlay.devices.remove(id);
                    self.removed_devices.remove(id);
                }
                EntityKind::Rental => {
                    self.overlay.rentals.remove(id);
                }
                EntityKind::Catalog => {
                    self.overlay.catalog.remove(&label_key(id));
                }
                EntityKind::Offer => {
                    self.overlay.offers.remove(&label_key(id));
                }
            }
        }

        if let Err(err) = self.persist() {
            *self = backup;
            return Err(err);
        }
        info!(acknowledged = dropped.len(), remaining = self.outbox.len(), "Acknowledged pending writes");
        Ok(before - self.outbox.len())
    }

    fn persist(&self) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::PersistenceFailed(format!("create {}: {e}", parent.display()))
                })?;
            }
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| StoreError::PersistenceFailed(e.to_string()))?;
        std::fs::write(path, json)
            .map_err(|e| StoreError::PersistenceFailed(format!("write {}: {e}", path.display())))
    }
}

// =============================================================================
// Fallback Store
// =============================================================================

/// Records the primary returned, kept in the mirror's `known` tables.
trait Remember {
    fn remember(&self, tables: &mut Tables);
}

impl Remember for Device {
    fn remember(&self, tables: &mut Tables) {
        tables.put_device(self.clone());
    }
}

impl Remember for Rental {
    fn remember(&self, tables: &mut Tables) {
        tables.put_rental(self.clone());
    }
}

impl Remember for CatalogSettings {
    fn remember(&self, tables: &mut Tables) {
        tables.put_catalog(self.clone());
    }
}

impl Remember for PromotionalOffer {
    fn remember(&self, tables: &mut Tables) {
        tables.put_offer(self.clone());
    }
}

/// A primary store with a local mirror behind it.
pub struct FallbackStore {
    primary: Arc<dyn FleetStore>,
    mirror: Mutex<LocalMirror>,
}

impl std::fmt::Debug for FallbackStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackStore").finish_non_exhaustive()
    }
}

impl FallbackStore {
    pub fn new(primary: Arc<dyn FleetStore>, mirror: LocalMirror) -> Self {
        FallbackStore {
            primary,
            mirror: Mutex::new(mirror),
        }
    }

    /// Outbox entries awaiting manual reconciliation, oldest first.
    pub async fn pending(&self) -> Vec<PendingWrite> {
        self.mirror.lock().await.pending().to_vec()
    }

    /// Drops reconciled entries and their overlay records.
    pub async fn acknowledge(&self, seqs: &[u64]) -> StoreResult<usize> {
        self.mirror.lock().await.acknowledge(seqs)
    }

    pub async fn is_pending(&self, entity: EntityKind, id: &str) -> bool {
        self.mirror.lock().await.is_local(entity, id)
    }

    /// Sends a write to the primary, or to the mirror when the record is
    /// already pending locally or the primary is unreachable.
    async fn route<T, P, L>(&self, entity: EntityKind, id: &str, primary: P, local: L) -> StoreResult<T>
    where
        T: Remember + Send,
        P: Future<Output = StoreResult<T>> + Send,
        L: FnOnce(&mut LocalMirror) -> StoreResult<T> + Send,
    {
        let mut mirror = self.mirror.lock().await;
        if mirror.is_local(entity, id) {
            debug!(%entity, id, "Record pending locally, writing to mirror");
            return local(&mut mirror);
        }

        match primary.await {
            Ok(record) => {
                record.remember(&mut mirror.known);
                Ok(record)
            }
            Err(err) if err.is_unavailable() => {
                warn!(%entity, id, error = %err, "Primary store unavailable, falling back to local mirror");
                local(&mut mirror)
            }
            Err(err) => Err(err),
        }
    }

    /// Runs a primary read, falling back to the mirror's view on outage.
    async fn read_or_local<T, P, O, L>(&self, what: &str, primary: P, overlay: O, local: L) -> StoreResult<T>
    where
        P: Future<Output = StoreResult<T>> + Send,
        O: FnOnce(&mut LocalMirror, T) -> T + Send,
        L: FnOnce(&LocalMirror) -> T + Send,
    {
        match primary.await {
            Ok(records) => Ok(overlay(&mut *self.mirror.lock().await, records)),
            Err(err) if err.is_unavailable() => {
                warn!(what, error = %err, "Primary read failed, serving local mirror");
                Ok(local(&*self.mirror.lock().await))
            }
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl FleetStore for FallbackStore {
    async fn read_devices(&self) -> StoreResult<Vec<Device>> {
        self.read_or_local(
            "devices",
            self.primary.read_devices(),
            |m, primary| m.overlay_devices(primary),
            |m| m.merged().devices(),
        )
        .await
    }

    async fn read_rentals(&self, filter: &RentalFilter) -> StoreResult<Vec<Rental>> {
        self.read_or_local(
            "rentals",
            self.primary.read_rentals(filter),
            |m, primary| m.overlay_rentals(primary, filter),
            |m| m.merged().rentals(filter),
        )
        .await
    }

    async fn read_catalog(&self) -> StoreResult<Vec<CatalogSettings>> {
        self.read_or_local(
            "catalog",
            self.primary.read_catalog(),
            |m, primary| m.overlay_catalog(primary),
            |m| m.merged().catalog(),
        )
        .await
    }

    async fn read_offers(&self) -> StoreResult<Vec<PromotionalOffer>> {
        self.read_or_local(
            "offers",
            self.primary.read_offers(),
            |m, primary| m.overlay_offers(primary),
            |m| m.merged().offers(),
        )
        .await
    }

    async fn read_device(&self, id: &str) -> StoreResult<Option<Device>> {
        {
            let mirror = self.mirror.lock().await;
            if mirror.is_local(EntityKind::Device, id) {
                return Ok(mirror.merged().devices.get(id).cloned());
            }
        }
        match self.primary.read_device(id).await {
            Ok(device) => {
                if let Some(device) = &device {
                    device.remember(&mut self.mirror.lock().await.known);
                }
                Ok(device)
            }
            Err(err) if err.is_unavailable() => {
                Ok(self.mirror.lock().await.merged().devices.get(id).cloned())
            }
            Err(err) => Err(err),
        }
    }

    async fn read_rental(&self, id: &str) -> StoreResult<Option<Rental>> {
        {
            let mirror = self.mirror.lock().await;
            if mirror.is_local(EntityKind::Rental, id) {
                return Ok(mirror.overlay.rentals.get(id).cloned());
            }
        }
        match self.primary.read_rental(id).await {
            Ok(rental) => {
                if let Some(rental) = &rental {
                    rental.remember(&mut self.mirror.lock().await.known);
                }
                Ok(rental)
            }
            Err(err) if err.is_unavailable() => {
                Ok(self.mirror.lock().await.known.rentals.get(id).cloned())
            }
            Err(err) => Err(err),
        }
    }

    async fn insert_device(&self, device: &Device) -> StoreResult<Device> {
        self.route(
            EntityKind::Device,
            &device.id,
            self.primary.insert_device(device),
            |m| m.insert_device(device),
        )
        .await
    }

    async fn write_device(&self, id: &str, patch: &DevicePatch) -> StoreResult<Device> {
        self.route(
            EntityKind::Device,
            id,
            self.primary.write_device(id, patch),
            |m| m.write_device(id, patch),
        )
        .await
    }

    async fn delete_device(&self, id: &str) -> StoreResult<()> {
        let mut mirror = self.mirror.lock().await;
        if mirror.is_local(EntityKind::Device, id) {
            return mirror.delete_device(id);
        }
        match self.primary.delete_device(id).await {
            Ok(()) => {
                mirror.known.devices.remove(id);
                Ok(())
            }
            Err(err) if err.is_unavailable() => {
                warn!(device_id = %id, error = %err, "Primary store unavailable, deleting in local mirror");
                mirror.delete_device(id)
            }
            Err(err) => Err(err),
        }
    }

    async fn insert_rental(&self, rental: &Rental) -> StoreResult<Rental> {
        self.route(
            EntityKind::Rental,
            &rental.id,
            self.primary.insert_rental(rental),
            |m| m.insert_rental(rental),
        )
        .await
    }

    async fn write_rental(&self, id: &str, patch: &RentalPatch) -> StoreResult<Rental> {
        self.route(
            EntityKind::Rental,
            id,
            self.primary.write_rental(id, patch),
            |m| m.write_rental(id, patch),
        )
        .await
    }

    async fn write_catalog(
        &self,
        category: &str,
        patch: &CatalogPatch,
    ) -> StoreResult<CatalogSettings> {
        self.route(
            EntityKind::Catalog,
            category,
            self.primary.write_catalog(category, patch),
            |m| m.write_catalog(category, patch),
        )
        .await
    }

    async fn rename_catalog(&self, old: &str, new: &str) -> StoreResult<CatalogSettings> {
        let mut mirror = self.mirror.lock().await;
        let renamed = self.primary.rename_catalog(old, new).await?;

        mirror.apply_rename(&renamed, old, Utc::now());
        if let Err(err) = mirror.persist() {
            warn!(error = %err, "Could not persist mirror after category rename");
        }
        Ok(renamed)
    }

    async fn insert_offer(&self, offer: &PromotionalOffer) -> StoreResult<PromotionalOffer> {
        self.route(
            EntityKind::Offer,
            &offer.code,
            self.primary.insert_offer(offer),
            |m| m.insert_offer(offer),
        )
        .await
    }

    async fn write_offer(&self, code: &str, patch: &OfferPatch) -> StoreResult<PromotionalOffer> {
        self.route(
            EntityKind::Offer,
            code,
            self.primary.write_offer(code, patch),
            |m| m.write_offer(code, patch),
        )
        .await
    }

    async fn pending_keys(&self) -> BTreeSet<RecordKey> {
        self.mirror.lock().await.pending_keys()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Outage};
    use fleet_core::{DeviceStatus, NewDevice};

    async fn setup() -> (Arc<MemoryStore>, FallbackStore) {
        let primary = Arc::new(MemoryStore::new());
        let device = Device::onboard("d-1", NewDevice::new("PS5-001", "PS5"), Utc::now());
        primary.insert_device(&device).await.unwrap();

        let store = FallbackStore::new(primary.clone(), LocalMirror::new(100));
        store.read_devices().await.unwrap();
        (primary, store)
    }

    #[tokio::test]
    async fn test_write_falls_back_and_overlays_reads() {
        let (primary, store) = setup().await;
        primary.set_outage(Outage::Writes);

        let written = store
            .write_device("d-1", &DevicePatch::status(DeviceStatus::Maintenance))
            .await
            .unwrap();
        assert_eq!(written.status, DeviceStatus::Maintenance);

        // Primary is readable again but still holds the old record.
        let devices = store.read_devices().await.unwrap();
        assert_eq!(devices[0].status, DeviceStatus::Maintenance);
        assert_eq!(
            primary.read_device("d-1").await.unwrap().unwrap().status,
            DeviceStatus::Ready
        );

        let pending = store.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].entity, EntityKind::Device);
        assert_eq!(pending[0].operation, PendingOperation::Update);
        assert!(store.is_pending(EntityKind::Device, "d-1").await);
    }

    #[tokio::test]
    async fn test_pending_record_keeps_writing_locally() {
        let (primary, store) = setup().await;
        primary.set_outage(Outage::Writes);
        store
            .write_device("d-1", &DevicePatch::status(DeviceStatus::Maintenance))
            .await
            .unwrap();

        primary.set_outage(Outage::None);
        let attempts = primary.writes_attempted();
        store
            .write_device("d-1", &DevicePatch::status(DeviceStatus::Ready))
            .await
            .unwrap();

        assert_eq!(primary.writes_attempted(), attempts);
        assert_eq!(store.pending().await.len(), 2);
    }

    #[tokio::test]
    async fn test_full_outage_reads_from_mirror() {
        let (primary, store) = setup().await;
        primary.set_outage(Outage::All);

        let devices = store.read_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].serial_number, "PS5-001");
    }

    #[tokio::test]
    async fn test_full_mirror_surfaces_persistence_failed() {
        let primary = Arc::new(MemoryStore::new());
        let store = FallbackStore::new(primary.clone(), LocalMirror::new(1));
        primary.set_outage(Outage::All);

        let first = Device::onboard("d-1", NewDevice::new("PS5-001", "PS5"), Utc::now());
        store.insert_device(&first).await.unwrap();

        let second = Device::onboard("d-2", NewDevice::new("PS5-002", "PS5"), Utc::now());
        let err = store.insert_device(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::PersistenceFailed(_)));
        assert_eq!(store.pending().await.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_local_write_leaves_no_entry() {
        let (primary, store) = setup().await;
        primary.set_outage(Outage::Writes);

        let err = store
            .write_device("d-1", &DevicePatch::status(DeviceStatus::Rented))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        assert!(store.pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_acknowledge_restores_primary_view() {
        let (primary, store) = setup().await;
        primary.set_outage(Outage::Writes);
        store
            .write_device("d-1", &DevicePatch::status(DeviceStatus::Maintenance))
            .await
            .unwrap();
        primary.set_outage(Outage::None);

        let seqs: Vec<u64> = store.pending().await.iter().map(|w| w.seq).collect();
        assert_eq!(store.acknowledge(&seqs).await.unwrap(), 1);

        assert!(store.pending_keys().await.is_empty());
        assert_eq!(store.read_devices().await.unwrap()[0].status, DeviceStatus::Ready);
    }

    #[tokio::test]
    async fn test_mirror_snapshot_survives_reopen() {
        let path = std::env::temp_dir().join(format!("fleet-mirror-{}.json", uuid::Uuid::new_v4()));
        let primary = Arc::new(MemoryStore::new());
        primary.set_outage(Outage::All);

        {
            let mirror = LocalMirror::open(&path, 10).unwrap();
            let store = FallbackStore::new(primary.clone(), mirror);
            let device = Device::onboard("d-9", NewDevice::new("SW-009", "Switch"), Utc::now());
            store.insert_device(&device).await.unwrap();
        }

        let reopened = LocalMirror::open(&path, 10).unwrap();
        assert_eq!(reopened.pending().len(), 1);
        assert!(reopened.is_local(EntityKind::Device, "d-9"));
        assert_eq!(reopened.merged().devices["d-9"].serial_number, "SW-009");

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_rename_requires_primary() {
        let (primary, store) = setup().await;
        primary.write_catalog("PS5", &CatalogPatch::default()).await.unwrap();
        primary.set_outage(Outage::Writes);

        let err = store.rename_catalog("PS5", "PS5 Pro").await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(store.pending().await.is_empty());
    }
}
