//! # Availability Queries
//!
//! Reads devices and live rentals, then asks the rules in
//! `fleet_core::availability`. Stored statuses are normalised on the way in
//! so a stray persisted `Rented` never makes a unit look bookable.

use tracing::warn;

use fleet_core::availability::{available_devices, count_available, AvailabilityWindow};
use fleet_core::lifecycle::normalize_stored;
use fleet_core::{DateRange, Device, Rental, RentalFilter};

use crate::error::{FleetResult, StoreResult};
use crate::FleetEngine;

impl FleetEngine {
    /// Number of units of `category` free for `range` (or right now).
    ///
    /// Never fails: if the store cannot be read the answer is zero.
    pub async fn available_count(&self, category: &str, range: Option<DateRange>) -> usize {
        let (devices, rentals) = match self.load_fleet().await {
            Ok(fleet) => fleet,
            Err(err) => {
                warn!(category, error = %err, "Availability unknown, reporting none");
                return 0;
            }
        };

        count_available(
            &devices,
            &rentals,
            category,
            AvailabilityWindow::from(range),
            self.clock.now(),
            self.config.availability.maintenance_policy,
        )
    }

    /// Units of `category` free for `range`, in the order automatic
    /// assignment would pick them.
    pub async fn available_devices(
        &self,
        category: &str,
        range: Option<DateRange>,
    ) -> FleetResult<Vec<Device>> {
        let (devices, rentals) = self.load_fleet().await?;
        Ok(available_devices(
            &devices,
            &rentals,
            category,
            AvailabilityWindow::from(range),
            self.clock.now(),
            self.config.availability.maintenance_policy,
        )
        .into_iter()
        .cloned()
        .collect())
    }

    /// Every device (status normalised) and every live rental.
    pub(crate) async fn load_fleet(&self) -> StoreResult<(Vec<Device>, Vec<Rental>)> {
        let mut devices = self.store.read_devices().await?;
        for device in &mut devices {
            device.status = normalize_stored(device.status);
        }
        let rentals = self.store.read_rentals(&RentalFilter::live()).await?;
        Ok((devices, rentals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::EngineConfig;
    use crate::store::{FleetStore, MemoryStore, Outage, Tables};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use fleet_core::availability::MaintenancePolicy;
    use fleet_core::{DeviceStatus, NewDevice, RentalPlan, RentalStatus};
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap()
    }

    fn device(id: &str, serial: &str, status: DeviceStatus) -> Device {
        let mut d = Device::onboard(id, NewDevice::new(serial, "PS5"), now());
        d.status = status;
        d
    }

    fn rental(id: &str, device_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Rental {
        Rental {
            id: id.into(),
            customer_id: Some("c-1".into()),
            category: "PS5".into(),
            product_id: None,
            plan: RentalPlan::Daily,
            controller_count: 1,
            offer_code: None,
            start_date: start,
            end_date: end,
            status: RentalStatus::Active,
            device_id: Some(device_id.into()),
            total_price: 500,
            created_at: now(),
            updated_at: now(),
            returned_at: None,
            sync_version: 0,
        }
    }

    fn engine_with(tables: Tables, policy: MaintenancePolicy) -> (Arc<MemoryStore>, FleetEngine) {
        let store = Arc::new(MemoryStore::with_tables(tables));
        let mut config = EngineConfig::default();
        config.availability.maintenance_policy = policy;
        let engine = FleetEngine::new(store.clone(), config)
            .with_clock(Arc::new(FixedClock::new(now())));
        (store, engine)
    }

    #[tokio::test]
    async fn test_now_and_future_windows() {
        let mut tables = Tables::new();
        tables.put_device(device("d-1", "PS5-001", DeviceStatus::Ready));
        tables.put_device(device("d-2", "PS5-002", DeviceStatus::Maintenance));
        tables.put_device(device("d-3", "PS5-003", DeviceStatus::UnderRepair));
        tables.put_rental(rental("r-1", "d-1", now() - Duration::hours(1), now() + Duration::days(1)));
        let (_, engine) = engine_with(tables, MaintenancePolicy::CountForFutureRanges);

        assert_eq!(engine.available_count("PS5", None).await, 0);

        let next_week = DateRange::new(now() + Duration::days(7), now() + Duration::days(8));
        assert_eq!(engine.available_count("ps5", next_week).await, 2);

        let serials: Vec<String> = engine
            .available_devices("PS5", next_week)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.serial_number)
            .collect();
        assert_eq!(serials, vec!["PS5-001", "PS5-002"]);
    }

    #[tokio::test]
    async fn test_exclude_policy_ignores_maintenance() {
        let mut tables = Tables::new();
        tables.put_device(device("d-2", "PS5-002", DeviceStatus::Maintenance));
        let (_, engine) = engine_with(tables, MaintenancePolicy::Exclude);

        let next_week = DateRange::new(now() + Duration::days(7), now() + Duration::days(8));
        assert_eq!(engine.available_count("PS5", next_week).await, 0);
    }

    #[tokio::test]
    async fn test_store_outage_reports_zero() {
        let mut tables = Tables::new();
        tables.put_device(device("d-1", "PS5-001", DeviceStatus::Ready));
        let (store, engine) = engine_with(tables, MaintenancePolicy::default());

        assert_eq!(engine.available_count("PS5", None).await, 1);
        store.set_outage(Outage::All);
        assert_eq!(engine.available_count("PS5", None).await, 0);
        assert!(engine.available_devices("PS5", None).await.is_err());
        store.set_outage(Outage::None);
        assert_eq!(store.read_devices().await.unwrap().len(), 1);
    }
}
