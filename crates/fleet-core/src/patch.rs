//! # Patches
//!
//! Partial updates for every stored record.
//!
//! ## Write Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  caller builds      DevicePatch::status(Maintenance).expecting(3)      │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  store reads the record, checks expected_version == sync_version       │
//! │        │                         │                                      │
//! │        │ match / no expectation  │ mismatch                             │
//! │        ▼                         ▼                                      │
//! │  patch.apply(&mut record, now)   VersionConflict (nothing written)     │
//! │  sync_version += 1                                                      │
//! │  updated_at = now                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Patches without an expected version are last-write-wins. The same patch
//! value is what the fallback mirror records in its outbox, so patches are
//! serializable.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    CatalogSettings, Device, DeviceStatus, DiscountType, PromotionalOffer, RateTable, Rental,
    RentalStatus,
};

/// True when `expected` is absent or equals `current`.
#[inline]
pub fn version_matches(expected: Option<i64>, current: i64) -> bool {
    expected.map_or(true, |v| v == current)
}

// =============================================================================
// Device Patch
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePatch {
    pub serial_number: Option<String>,
    pub category: Option<String>,
    pub status: Option<DeviceStatus>,
    pub health: Option<u8>,
    pub connectors: Option<Vec<String>>,
    pub controller_count: Option<u32>,
    pub storage_capacity: Option<String>,
    pub firmware_version: Option<String>,
    pub supplier: Option<String>,
    pub purchase_cost: Option<i64>,
    pub warranty_until: Option<NaiveDate>,
    pub notes: Option<String>,
    pub expected_version: Option<i64>,
}

impl DevicePatch {
    pub fn status(status: DeviceStatus) -> Self {
        DevicePatch {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn health_and_status(health: u8, status: DeviceStatus) -> Self {
        DevicePatch {
            health: Some(health),
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn category(category: impl Into<String>) -> Self {
        DevicePatch {
            category: Some(category.into()),
            ..Default::default()
        }
    }

    pub fn expecting(mut self, version: i64) -> Self {
        self.expected_version = Some(version);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self
            == DevicePatch {
                expected_version: self.expected_version,
                ..Default::default()
            }
    }

    /// Writes every present field into `device`.
    pub fn apply(&self, device: &mut Device, now: DateTime<Utc>) {
        if let Some(v) = &self.serial_number {
            device.serial_number = v.trim().to_string();
        }
        if let Some(v) = &self.category {
            device.category = v.trim().to_string();
        }
        if let Some(v) = self.status {
            device.status = v;
        }
        if let Some(v) = self.health {
            device.health = v.min(crate::MAX_HEALTH);
        }
        if let Some(v) = &self.connectors {
            device.connectors = v.clone();
        }
        if let Some(v) = self.controller_count {
            device.controller_count = Some(v);
        }
        if let Some(v) = &self.storage_capacity {
            device.storage_capacity = Some(v.clone());
        }
        if let Some(v) = &self.firmware_version {
            device.firmware_version = Some(v.clone());
        }
        if let Some(v) = &self.supplier {
            device.supplier = Some(v.clone());
        }
        if let Some(v) = self.purchase_cost {
            device.purchase_cost = Some(v);
        }
        if let Some(v) = self.warranty_until {
            device.warranty_until = Some(v);
        }
        if let Some(v) = &self.notes {
            device.notes = Some(v.clone());
        }
        device.sync_version += 1;
        device.updated_at = now;
    }
}

// =============================================================================
// Rental Patch
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RentalPatch {
    pub status: Option<RentalStatus>,
    /// Only written by a category rename.
    pub category: Option<String>,
    pub device_id: Option<String>,
    pub returned_at: Option<DateTime<Utc>>,
    pub expected_version: Option<i64>,
}

impl RentalPatch {
    /// Binds (or rebinds) the rental to a device.
    pub fn bind(device_id: impl Into<String>) -> Self {
        RentalPatch {
            device_id: Some(device_id.into()),
            ..Default::default()
        }
    }

    pub fn status(status: RentalStatus) -> Self {
        RentalPatch {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Completion: terminal status plus the return instant.
    pub fn completed(at: DateTime<Utc>) -> Self {
        RentalPatch {
            status: Some(RentalStatus::Completed),
            returned_at: Some(at),
            ..Default::default()
        }
    }

    pub fn category(category: impl Into<String>) -> Self {
        RentalPatch {
            category: Some(category.into()),
            ..Default::default()
        }
    }

    pub fn expecting(mut self, version: i64) -> Self {
        self.expected_version = Some(version);
        self
    }

    pub fn apply(&self, rental: &mut Rental, now: DateTime<Utc>) {
        if let Some(v) = self.status {
            rental.status = v;
        }
        if let Some(v) = &self.category {
            rental.category = v.trim().to_string();
        }
        if let Some(v) = &self.device_id {
            rental.device_id = Some(v.clone());
        }
        if let Some(v) = self.returned_at {
            rental.returned_at = Some(v);
        }
        rental.sync_version += 1;
        rental.updated_at = now;
    }
}

// =============================================================================
// Catalog Patch
// =============================================================================

/// Partial catalog update. Used as an upsert: applying it to a missing
/// category starts from [`CatalogSettings::with_defaults`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogPatch {
    pub is_enabled: Option<bool>,
    pub is_featured: Option<bool>,
    pub max_controllers: Option<u32>,
    pub extra_controller_enabled: Option<bool>,
    pub rates: Option<RateTable>,
    pub features: Option<Vec<String>>,
    pub expected_version: Option<i64>,
}

impl CatalogPatch {
    pub fn rates(rates: RateTable) -> Self {
        CatalogPatch {
            rates: Some(rates),
            ..Default::default()
        }
    }

    /// A patch that reproduces `settings` in full (used to copy an entry
    /// under a new key).
    pub fn from_settings(settings: &CatalogSettings) -> Self {
        CatalogPatch {
            is_enabled: Some(settings.is_enabled),
            is_featured: Some(settings.is_featured),
            max_controllers: Some(settings.max_controllers),
            extra_controller_enabled: Some(settings.extra_controller_enabled),
            rates: Some(settings.rates),
            features: Some(settings.features.clone()),
            expected_version: None,
        }
    }

    pub fn expecting(mut self, version: i64) -> Self {
        self.expected_version = Some(version);
        self
    }

    pub fn apply(&self, settings: &mut CatalogSettings, now: DateTime<Utc>) {
        if let Some(v) = self.is_enabled {
            settings.is_enabled = v;
        }
        if let Some(v) = self.is_featured {
            settings.is_featured = v;
        }
        if let Some(v) = self.max_controllers {
            settings.max_controllers = v;
        }
        if let Some(v) = self.extra_controller_enabled {
            settings.extra_controller_enabled = v;
        }
        if let Some(v) = self.rates {
            settings.rates = v;
        }
        if let Some(v) = &self.features {
            settings.features = v.clone();
        }
        settings.sync_version += 1;
        settings.updated_at = now;
    }

    /// The record an upsert of this patch creates for a new category.
    pub fn into_new_settings(&self, category: &str, now: DateTime<Utc>) -> CatalogSettings {
        let mut settings = CatalogSettings::with_defaults(category, now);
        self.apply(&mut settings, now);
        settings.sync_version = 0;
        settings
    }
}

// =============================================================================
// Offer Patch
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferPatch {
    pub description: Option<String>,
    pub discount_type: Option<DiscountType>,
    pub discount_value: Option<i64>,
    pub min_rental_days: Option<u32>,
    pub applicable_categories: Option<Vec<String>>,
    pub is_active: Option<bool>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub expected_version: Option<i64>,
}

impl OfferPatch {
    pub fn active(is_active: bool) -> Self {
        OfferPatch {
            is_active: Some(is_active),
            ..Default::default()
        }
    }

    pub fn apply(&self, offer: &mut PromotionalOffer, now: DateTime<Utc>) {
        if let Some(v) = &self.description {
            offer.description = Some(v.clone());
        }
        if let Some(v) = self.discount_type {
            offer.discount_type = v;
        }
        if let Some(v) = self.discount_value {
            offer.discount_value = v;
        }
        if let Some(v) = self.min_rental_days {
            offer.min_rental_days = v;
        }
        if let Some(v) = &self.applicable_categories {
            offer.applicable_categories = v.clone();
        }
        if let Some(v) = self.is_active {
            offer.is_active = v;
        }
        if let Some(v) = self.valid_from {
            offer.valid_from = Some(v);
        }
        if let Some(v) = self.valid_until {
            offer.valid_until = Some(v);
        }
        offer.sync_version += 1;
        offer.updated_at = now;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewDevice;

    #[test]
    fn test_device_patch_bumps_version() {
        let t0 = Utc::now();
        let mut device = Device::onboard("d-1", NewDevice::new("PS5-001", "PS5"), t0);
        let t1 = t0 + chrono::Duration::seconds(5);

        DevicePatch::health_and_status(55, DeviceStatus::Maintenance).apply(&mut device, t1);

        assert_eq!(device.health, 55);
        assert_eq!(device.status, DeviceStatus::Maintenance);
        assert_eq!(device.sync_version, 1);
        assert_eq!(device.updated_at, t1);
        assert_eq!(device.serial_number, "PS5-001");
    }

    #[test]
    fn test_empty_patch() {
        assert!(DevicePatch::default().is_empty());
        assert!(DevicePatch::default().expecting(2).is_empty());
        assert!(!DevicePatch::category("Switch").is_empty());
    }

    #[test]
    fn test_version_matches() {
        assert!(version_matches(None, 7));
        assert!(version_matches(Some(7), 7));
        assert!(!version_matches(Some(6), 7));
    }

    #[test]
    fn test_catalog_patch_upsert_starts_from_defaults() {
        let now = Utc::now();
        let mut rates = RateTable::fallback();
        rates.daily_rate = 650;
        let settings = CatalogPatch::rates(rates).into_new_settings("Switch", now);

        assert_eq!(settings.device_category, "Switch");
        assert_eq!(settings.rates.daily_rate, 650);
        assert_eq!(settings.rates.weekly_rate, 3000);
        assert_eq!(settings.sync_version, 0);
        assert!(settings.is_enabled);
    }

    #[test]
    fn test_from_settings_copies_every_field() {
        let now = Utc::now();
        let mut original = CatalogSettings::with_defaults("PS5", now);
        original.rates.daily_rate = 777;
        original.features = vec!["4K".into(), "HDR".into()];
        original.is_featured = true;

        let copy = CatalogPatch::from_settings(&original).into_new_settings("PS5 Pro", now);
        assert_eq!(copy.rates, original.rates);
        assert_eq!(copy.features, original.features);
        assert!(copy.is_featured);
        assert_eq!(copy.device_category, "PS5 Pro");
    }
}
