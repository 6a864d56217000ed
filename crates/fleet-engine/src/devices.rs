//! # Device Registry
//!
//! Onboarding, listing and operator edits. Status changes go through the
//! lifecycle rules in `fleet_core::lifecycle`; `Rented` is never written,
//! only derived when a device is read.
//!
//! ## Operator Edits
//! ```text
//!   set_device_status ──► operator_transition(stored, rented now?, to)
//!   edit_health       ──► clamp 0..=100, Ready below threshold ──► Maintenance
//!   decommission      ──► DeviceInUse while live rentals exist
//!                         (force: complete them first, then delete)
//! ```

use serde::Serialize;
use tracing::{debug, info};

use fleet_core::availability::{effective_status, occupying_rental};
use fleet_core::catalog::same_category;
use fleet_core::lifecycle::{edit_health, normalize_stored, operator_transition, HealthEdit};
use fleet_core::validation::validate_new_device;
use fleet_core::{
    CoreError, Device, DevicePatch, DeviceStatus, EntityKind, NewDevice, Rental, RentalFilter,
    RentalPatch, ValidationError,
};

use crate::catalog::ResolvedCategory;
use crate::error::{FleetError, FleetResult};
use crate::FleetEngine;

/// A device as the back office sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceView {
    #[serde(flatten)]
    pub device: Device,
    /// `Rented` while a live rental holds the unit, else the stored status.
    pub effective_status: DeviceStatus,
    pub occupying_rental_id: Option<String>,
    /// Customer on the occupying rental (`currentUser` in the storefront).
    pub current_customer: Option<String>,
    /// The record has writes only the local mirror holds.
    pub locally_pending: bool,
}

impl FleetEngine {
    /// Registers a new unit: health 100, status `Ready`.
    ///
    /// A category the catalog cannot match at all, not even by prefix, gets
    /// default settings.
    pub async fn onboard_device(&self, new: NewDevice) -> FleetResult<Device> {
        validate_new_device(&new)?;

        let existing = self.store.read_devices().await?;
        if existing
            .iter()
            .any(|d| d.serial_number.eq_ignore_ascii_case(new.serial_number.trim()))
        {
            return Err(ValidationError::Duplicate {
                field: "serialNumber".into(),
                value: new.serial_number.trim().to_string(),
            }
            .into());
        }

        if matches!(self.catalog.lookup(&new.category).await, ResolvedCategory::Missing) {
            self.catalog.ensure_category(&new.category).await?;
        }

        let device = Device::onboard(uuid::Uuid::new_v4().to_string(), new, self.clock.now());
        let stored = self.store.insert_device(&device).await?;
        info!(device_id = %stored.id, serial = %stored.serial_number, category = %stored.category, "Device onboarded");
        Ok(stored)
    }

    /// Devices with derived fields, ordered by serial number.
    pub async fn list_devices(&self, category: Option<&str>) -> FleetResult<Vec<DeviceView>> {
        let (devices, rentals) = self.load_fleet().await?;
        let pending = self.store.pending_keys().await;
        let now = self.clock.now();

        Ok(devices
            .into_iter()
            .filter(|d| category.map_or(true, |c| same_category(&d.category, c)))
            .map(|device| {
                let locally_pending = pending.contains(&(EntityKind::Device, device.id.clone()));
                view(device, &rentals, now, locally_pending)
            })
            .collect())
    }

    pub async fn get_device(&self, id: &str) -> FleetResult<DeviceView> {
        let device = self.read_device(id).await?;
        let rentals = self.live_rentals_for(id).await?;
        let pending = self.store.pending_keys().await;
        let locally_pending = pending.contains(&(EntityKind::Device, device.id.clone()));
        Ok(view(device, &rentals, self.clock.now(), locally_pending))
    }

    /// Operator status change.
    ///
    /// ## Errors
    /// `InvalidStatusTransition` for `Rented`, for a device rented right now,
    /// and for anything outside the four operator moves.
    pub async fn set_device_status(&self, id: &str, to: DeviceStatus) -> FleetResult<Device> {
        let device = self.read_device(id).await?;
        let rentals = self.live_rentals_for(id).await?;
        let rented = occupying_rental(id, &rentals, self.clock.now()).is_some();

        let next = operator_transition(device.status, rented, to).map_err(|err| {
            debug!(device_id = %id, error = %err, "Status change rejected");
            err
        })?;
        if next == device.status {
            return Ok(device);
        }

        let stored = self
            .store
            .write_device(id, &DevicePatch::status(next).expecting(device.sync_version))
            .await?;
        info!(device_id = %id, from = %device.status, to = %next, "Device status changed");
        Ok(stored)
    }

    /// Manual health edit, clamped to `0..=100`.
    pub async fn edit_health(&self, id: &str, value: i64) -> FleetResult<Device> {
        let device = self.read_device(id).await?;
        let HealthEdit {
            health,
            status,
            auto_maintenance,
        } = edit_health(
            device.status,
            value,
            self.config.lifecycle.health_maintenance_threshold,
        );

        let stored = self
            .store
            .write_device(
                id,
                &DevicePatch::health_and_status(health, status).expecting(device.sync_version),
            )
            .await?;

        if auto_maintenance {
            info!(device_id = %id, health, "Health below threshold, device moved to maintenance");
        }
        Ok(stored)
    }

    /// Removes a device from the fleet.
    ///
    /// With `force`, live rentals on the unit are completed first; without
    /// it they block the removal.
    pub async fn decommission(&self, id: &str, force: bool) -> FleetResult<()> {
        let _guard = self.assign_lock.lock().await;

        self.read_device(id).await?;
        let live = self.live_rentals_for(id).await?;
        if !live.is_empty() && !force {
            return Err(CoreError::DeviceInUse {
                device_id: id.to_string(),
                live_rentals: live.len(),
            }
            .into());
        }

        let now = self.clock.now();
        for rental in &live {
            self.store
                .write_rental(
                    &rental.id,
                    &RentalPatch::completed(now).expecting(rental.sync_version),
                )
                .await?;
            info!(rental_id = %rental.id, device_id = %id, "Rental force-completed for decommission");
        }

        self.store.delete_device(id).await?;
        info!(device_id = %id, "Device decommissioned");
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Reads one device with its stored status normalised.
    pub(crate) async fn read_device(&self, id: &str) -> FleetResult<Device> {
        let mut device = self
            .store
            .read_device(id)
            .await?
            .ok_or_else(|| FleetError::not_found(EntityKind::Device, id))?;
        device.status = normalize_stored(device.status);
        Ok(device)
    }

    pub(crate) async fn live_rentals_for(&self, device_id: &str) -> FleetResult<Vec<Rental>> {
        Ok(self
            .store
            .read_rentals(&RentalFilter::live().for_device(device_id))
            .await?)
    }
}

fn view(
    device: Device,
    rentals: &[Rental],
    now: chrono::DateTime<chrono::Utc>,
    locally_pending: bool,
) -> DeviceView {
    let occupying = occupying_rental(&device.id, rentals, now);
    DeviceView {
        effective_status: effective_status(&device, rentals, now),
        occupying_rental_id: occupying.map(|r| r.id.clone()),
        current_customer: occupying.and_then(|r| r.customer_id.clone()),
        locally_pending,
        device,
    }
}
