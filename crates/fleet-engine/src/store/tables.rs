//! # In-Memory Tables
//!
//! One ordered map per record family, with the same write rules the SQLite
//! schema enforces (unique serials and codes, version checks, no stored
//! `Rented`). [`MemoryStore`](super::MemoryStore) keeps its data here, and the
//! fallback mirror keeps both its last-known primary records and its pending
//! overlay here.
//!
//! ## Keys
//! ```text
//!   devices   id
//!   rentals   id
//!   catalog   device_category, trimmed + lowercased
//!   offers    code, trimmed + lowercased
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use fleet_core::catalog::same_category;
use fleet_core::patch::version_matches;
use fleet_core::{
    CatalogPatch, CatalogSettings, Device, DevicePatch, DeviceStatus, EntityKind, OfferPatch,
    PromotionalOffer, Rental, RentalFilter, RentalPatch,
};

use crate::error::{StoreError, StoreResult};

/// Map key for a case-insensitive label.
pub fn label_key(label: &str) -> String {
    label.trim().to_lowercase()
}

fn check_version(
    entity: EntityKind,
    id: &str,
    expected: Option<i64>,
    current: i64,
) -> StoreResult<()> {
    if version_matches(expected, current) {
        Ok(())
    } else {
        Err(StoreError::VersionConflict {
            entity,
            id: id.to_string(),
            expected: expected.unwrap_or_default(),
        })
    }
}

fn refuse_rented(status: DeviceStatus) -> StoreResult<()> {
    if status == DeviceStatus::Rented {
        return Err(StoreError::Rejected(
            "device status 'Rented' is derived and cannot be stored".into(),
        ));
    }
    Ok(())
}

/// The four record families, in memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tables {
    pub devices: BTreeMap<String, Device>,
    pub rentals: BTreeMap<String, Rental>,
    pub catalog: BTreeMap<String, CatalogSettings>,
    pub offers: BTreeMap<String, PromotionalOffer>,
}

impl Tables {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Devices ordered by serial number (case-insensitive), then id.
    pub fn devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.values().cloned().collect();
        sort_devices(&mut devices);
        devices
    }

    /// Rentals matching `filter`, ordered by start then id.
    pub fn rentals(&self, filter: &RentalFilter) -> Vec<Rental> {
        let mut rentals: Vec<Rental> = self
            .rentals
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        sort_rentals(&mut rentals);
        rentals
    }

    pub fn catalog(&self) -> Vec<CatalogSettings> {
        self.catalog.values().cloned().collect()
    }

    pub fn offers(&self) -> Vec<PromotionalOffer> {
        self.offers.values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
            && self.rentals.is_empty()
            && self.catalog.is_empty()
            && self.offers.is_empty()
    }

    // =========================================================================
    // Devices
    // =========================================================================

    pub fn insert_device(&mut self, device: &Device) -> StoreResult<Device> {
        refuse_rented(device.status)?;
        if self.devices.contains_key(&device.id) {
            return Err(StoreError::duplicate("id", &device.id));
        }
        if self.serial_taken(&device.serial_number, None) {
            return Err(StoreError::duplicate("serialNumber", &device.serial_number));
        }
        self.devices.insert(device.id.clone(), device.clone());
        Ok(device.clone())
    }

    pub fn update_device(
        &mut self,
        id: &str,
        patch: &DevicePatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Device> {
        let current = self
            .devices
            .get(id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Device, id))?;
        check_version(EntityKind::Device, id, patch.expected_version, current.sync_version)?;

        let mut updated = current.clone();
        patch.apply(&mut updated, now);
        refuse_rented(updated.status)?;
        if self.serial_taken(&updated.serial_number, Some(id)) {
            return Err(StoreError::duplicate("serialNumber", &updated.serial_number));
        }

        self.devices.insert(id.to_string(), updated.clone());
        Ok(updated)
    }

    pub fn delete_device(&mut self, id: &str) -> StoreResult<()> {
        self.devices
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(EntityKind::Device, id))
    }

    fn serial_taken(&self, serial: &str, except_id: Option<&str>) -> bool {
        self.devices.values().any(|d| {
            Some(d.id.as_str()) != except_id && d.serial_number.eq_ignore_ascii_case(serial.trim())
        })
    }

    // =========================================================================
    // Rentals
    // =========================================================================

    pub fn insert_rental(&mut self, rental: &Rental) -> StoreResult<Rental> {
        if self.rentals.contains_key(&rental.id) {
            return Err(StoreError::duplicate("id", &rental.id));
        }
        if rental.start_date > rental.end_date {
            return Err(StoreError::Rejected("rental ends before it starts".into()));
        }
        self.rentals.insert(rental.id.clone(), rental.clone());
        Ok(rental.clone())
    }

    pub fn update_rental(
        &mut self,
        id: &str,
        patch: &RentalPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Rental> {
        let current = self
            .rentals
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Rental, id))?;
        check_version(EntityKind::Rental, id, patch.expected_version, current.sync_version)?;
        patch.apply(current, now);
        Ok(current.clone())
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    pub fn upsert_catalog(
        &mut self,
        category: &str,
        patch: &CatalogPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<CatalogSettings> {
        let key = label_key(category);
        let settings = match self.catalog.get_mut(&key) {
            Some(existing) => {
                check_version(
                    EntityKind::Catalog,
                    &existing.device_category,
                    patch.expected_version,
                    existing.sync_version,
                )?;
                patch.apply(existing, now);
                existing.clone()
            }
            None => {
                let created = patch.into_new_settings(category, now);
                self.catalog.insert(key, created.clone());
                created
            }
        };
        Ok(settings)
    }

    /// Rekeys `old` to `new` and retargets devices and live rentals.
    ///
    /// Checks run before anything is touched, so a rejected rename leaves the
    /// tables as they were.
    pub fn rename_catalog(
        &mut self,
        old: &str,
        new: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<CatalogSettings> {
        let (old_key, new_key) = (label_key(old), label_key(new));
        if !self.catalog.contains_key(&old_key) {
            return Err(StoreError::not_found(EntityKind::Catalog, old.trim()));
        }
        if old_key != new_key && self.catalog.contains_key(&new_key) {
            return Err(StoreError::duplicate("deviceCategory", new.trim()));
        }

        let mut settings = match self.catalog.remove(&old_key) {
            Some(settings) => settings,
            None => return Err(StoreError::not_found(EntityKind::Catalog, old.trim())),
        };
        settings.device_category = new.trim().to_string();
        settings.sync_version += 1;
        settings.updated_at = now;
        self.catalog.insert(new_key, settings.clone());

        self.retarget_category(old, new, now);
        Ok(settings)
    }

    /// Moves every device and live rental labelled `old` to `new`.
    ///
    /// Returns how many records changed.
    pub fn retarget_category(&mut self, old: &str, new: &str, now: DateTime<Utc>) -> usize {
        let mut changed = 0;
        for device in self.devices.values_mut() {
            if same_category(&device.category, old) {
                DevicePatch::category(new).apply(device, now);
                changed += 1;
            }
        }
        for rental in self.rentals.values_mut() {
            if rental.is_live() && same_category(&rental.category, old) {
                RentalPatch::category(new).apply(rental, now);
                changed += 1;
            }
        }
        changed
    }

    // =========================================================================
    // Offers
    // =========================================================================

    pub fn insert_offer(&mut self, offer: &PromotionalOffer) -> StoreResult<PromotionalOffer> {
        let key = label_key(&offer.code);
        if self.offers.contains_key(&key) {
            return Err(StoreError::duplicate("code", offer.code.trim()));
        }
        self.offers.insert(key, offer.clone());
        Ok(offer.clone())
    }

    pub fn update_offer(
        &mut self,
        code: &str,
        patch: &OfferPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<PromotionalOffer> {
        let offer = self
            .offers
            .get_mut(&label_key(code))
            .ok_or_else(|| StoreError::not_found(EntityKind::Offer, code.trim()))?;
        check_version(EntityKind::Offer, &offer.code, patch.expected_version, offer.sync_version)?;
        patch.apply(offer, now);
        Ok(offer.clone())
    }

    // =========================================================================
    // Raw upserts (mirror bookkeeping)
    // =========================================================================

    pub fn put_device(&mut self, device: Device) {
        self.devices.insert(device.id.clone(), device);
    }

    pub fn put_rental(&mut self, rental: Rental) {
        self.rentals.insert(rental.id.clone(), rental);
    }

    pub fn put_catalog(&mut self, settings: CatalogSettings) {
        self.catalog.insert(label_key(&settings.device_category), settings);
    }

    pub fn put_offer(&mut self, offer: PromotionalOffer) {
        self.offers.insert(label_key(&offer.code), offer);
    }
}

pub(crate) fn sort_devices(devices: &mut [Device]) {
    devices.sort_by(|a, b| {
        a.serial_number
            .to_lowercase()
            .cmp(&b.serial_number.to_lowercase())
            .then_with(|| a.id.cmp(&b.id))
    });
}

pub(crate) fn sort_rentals(rentals: &mut [Rental]) {
    rentals.sort_by(|a, b| a.start_date.cmp(&b.start_date).then_with(|| a.id.cmp(&b.id)));
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use fleet_core::{NewDevice, RentalPlan, RentalStatus};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap()
    }

    fn device(id: &str, serial: &str, category: &str) -> Device {
        Device::onboard(id, NewDevice::new(serial, category), now())
    }

    fn rental(id: &str, category: &str, status: RentalStatus) -> Rental {
        Rental {
            id: id.into(),
            customer_id: None,
            category: category.into(),
            product_id: None,
            plan: RentalPlan::Daily,
            controller_count: 1,
            offer_code: None,
            start_date: now(),
            end_date: now() + Duration::days(1),
            status,
            device_id: Some("d-1".into()),
            total_price: 500,
            created_at: now(),
            updated_at: now(),
            returned_at: None,
            sync_version: 0,
        }
    }

    #[test]
    fn test_serial_uniqueness_ignores_case() {
        let mut tables = Tables::new();
        tables.insert_device(&device("d-1", "PS5-001", "PS5")).unwrap();

        let err = tables.insert_device(&device("d-2", "ps5-001", "PS5")).unwrap_err();
        assert_eq!(err, StoreError::duplicate("serialNumber", "ps5-001"));

        tables.insert_device(&device("d-2", "PS5-002", "PS5")).unwrap();
        let mut rename = DevicePatch::default();
        rename.serial_number = Some("PS5-001".into());
        assert!(matches!(
            tables.update_device("d-2", &rename, now()),
            Err(StoreError::Duplicate { .. })
        ));
    }

    #[test]
    fn test_rented_cannot_be_stored() {
        let mut tables = Tables::new();
        tables.insert_device(&device("d-1", "PS5-001", "PS5")).unwrap();
        let err = tables
            .update_device("d-1", &DevicePatch::status(DeviceStatus::Rented), now())
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        assert_eq!(tables.devices["d-1"].status, DeviceStatus::Ready);
    }

    #[test]
    fn test_version_conflict_leaves_record() {
        let mut tables = Tables::new();
        tables.insert_device(&device("d-1", "PS5-001", "PS5")).unwrap();
        tables
            .update_device("d-1", &DevicePatch::status(DeviceStatus::Maintenance), now())
            .unwrap();

        let stale = DevicePatch::status(DeviceStatus::Ready).expecting(0);
        assert!(matches!(
            tables.update_device("d-1", &stale, now()),
            Err(StoreError::VersionConflict { .. })
        ));
        assert_eq!(tables.devices["d-1"].status, DeviceStatus::Maintenance);
    }

    #[test]
    fn test_rename_moves_devices_and_live_rentals_only() {
        let mut tables = Tables::new();
        tables.upsert_catalog("PS5", &CatalogPatch::default(), now()).unwrap();
        tables.insert_device(&device("d-1", "PS5-001", "PS5")).unwrap();
        tables.insert_device(&device("d-2", "SW-001", "Switch")).unwrap();
        tables.insert_rental(&rental("r-live", "ps5", RentalStatus::Active)).unwrap();
        tables.insert_rental(&rental("r-done", "PS5", RentalStatus::Completed)).unwrap();

        let renamed = tables.rename_catalog("PS5", "PS5 Pro", now()).unwrap();
        assert_eq!(renamed.device_category, "PS5 Pro");
        assert!(!tables.catalog.contains_key("ps5"));
        assert_eq!(tables.devices["d-1"].category, "PS5 Pro");
        assert_eq!(tables.devices["d-2"].category, "Switch");
        assert_eq!(tables.rentals["r-live"].category, "PS5 Pro");
        assert_eq!(tables.rentals["r-done"].category, "PS5");
    }

    #[test]
    fn test_rename_conflict_changes_nothing() {
        let mut tables = Tables::new();
        tables.upsert_catalog("PS5", &CatalogPatch::default(), now()).unwrap();
        tables.upsert_catalog("Switch", &CatalogPatch::default(), now()).unwrap();
        tables.insert_device(&device("d-1", "PS5-001", "PS5")).unwrap();
        let before = tables.clone();

        assert!(matches!(
            tables.rename_catalog("PS5", "SWITCH", now()),
            Err(StoreError::Duplicate { .. })
        ));
        assert_eq!(tables, before);
    }

    #[test]
    fn test_offer_codes_are_case_insensitive_keys() {
        use fleet_core::NewOffer;
        let mut tables = Tables::new();
        let offer = PromotionalOffer::from_new("o-1", NewOffer::percentage("Spring10", 10), now());
        tables.insert_offer(&offer).unwrap();

        assert!(tables.insert_offer(&offer).is_err());
        let off = tables.update_offer("SPRING10", &OfferPatch::active(false), now()).unwrap();
        assert!(!off.is_active);
    }
}
