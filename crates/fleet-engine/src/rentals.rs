//! # Rentals and Assignment
//!
//! Booking, binding a unit to a rental, and releasing it again.
//!
//! ## Assignment Commit
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  assign_lock ─┐                                                         │
//! │               ▼                                                         │
//! │  read rental ──► live? ──no──► RentalNotLive                            │
//! │               │                                                         │
//! │               ▼                                                         │
//! │  pick device  (explicit: check_assignable / auto: free units by serial) │
//! │               │                                                         │
//! │               ▼                                                         │
//! │  re-read device + its live rentals, check again (auto: try the next)    │
//! │               │                                                         │
//! │               ▼                                                         │
//! │  write_rental(bind, expecting version)                                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The lock covers this engine instance; the re-check right before the
//! write covers everything else that shares the store.
//!
//! ## Release
//! Completing or cancelling writes the device first
//! (`status_after_release`), then the rental. If the rental write is
//! refused the device status is put back. The rental keeps its `device_id`
//! for audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fleet_core::availability::{
    available_devices, check_assignable, is_assignable_status, AvailabilityWindow,
};
use fleet_core::lifecycle::{normalize_stored, status_after_release};
use fleet_core::pricing::QuoteRequest;
use fleet_core::validation::{validate_category, validate_rental_window};
use fleet_core::{
    CoreError, DateRange, Device, DevicePatch, DeviceStatus, EntityKind, Rental, RentalFilter, RentalPatch,
    RentalPlan, RentalStatus,
};

use crate::error::{FleetError, FleetResult};
use crate::FleetEngine;

/// How a booking gets its unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode", content = "deviceId")]
pub enum Assignment {
    /// First free unit in serial-number order.
    #[default]
    Auto,
    /// This unit or nothing.
    Device(String),
    /// Book now, bind a unit later with [`FleetEngine::assign`].
    Deferred,
}

/// A confirmed booking from the storefront.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub category: String,
    pub plan: RentalPlan,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub controller_count: u32,
    #[serde(default)]
    pub offer_code: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub assignment: Assignment,
}

impl BookingRequest {
    pub fn new(
        category: impl Into<String>,
        plan: RentalPlan,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        BookingRequest {
            category: category.into(),
            plan,
            start,
            end,
            controller_count: 1,
            offer_code: None,
            customer_id: None,
            product_id: None,
            assignment: Assignment::Auto,
        }
    }

    pub fn controllers(mut self, count: u32) -> Self {
        self.controller_count = count;
        self
    }

    pub fn offer(mut self, code: impl Into<String>) -> Self {
        self.offer_code = Some(code.into());
        self
    }

    pub fn customer(mut self, customer_id: impl Into<String>) -> Self {
        self.customer_id = Some(customer_id.into());
        self
    }

    pub fn assignment(mut self, assignment: Assignment) -> Self {
        self.assignment = assignment;
        self
    }
}

impl FleetEngine {
    // =========================================================================
    // Booking
    // =========================================================================

    /// Quotes, picks a unit and stores the rental as `active`.
    ///
    /// `total_price` is fixed here and never recomputed.
    ///
    /// ## Errors
    /// - `ValidationFailed` for an empty category or `end <= start`
    /// - `ControllerLimitExceeded` from the quote
    /// - `NoAvailableUnit` when automatic assignment finds nothing
    /// - `DeviceAlreadyBooked` / `DeviceNotAssignable` / `CategoryMismatch`
    ///   for an explicitly chosen unit
    pub async fn book(&self, request: BookingRequest) -> FleetResult<Rental> {
        validate_category(&request.category)?;
        validate_rental_window(request.start, request.end)?;
        let window = DateRange {
            start: request.start,
            end: request.end,
        };

        let mut quote_request =
            QuoteRequest::new(request.category.trim(), request.plan, request.controller_count)
                .with_duration_days(window.days());
        if let Some(code) = &request.offer_code {
            quote_request = quote_request.with_offer(code.as_str());
        }
        let quote = self.quote(&quote_request).await?;

        let _guard = self.assign_lock.lock().await;
        let now = self.clock.now();

        let mut rental = Rental {
            id: uuid::Uuid::new_v4().to_string(),
            customer_id: request.customer_id,
            category: request.category.trim().to_string(),
            product_id: request.product_id,
            plan: request.plan,
            controller_count: request.controller_count,
            offer_code: request.offer_code,
            start_date: window.start,
            end_date: window.end,
            status: RentalStatus::Active,
            device_id: None,
            total_price: quote.total_price,
            created_at: now,
            updated_at: now,
            returned_at: None,
            sync_version: 0,
        };

        let device = match &request.assignment {
            Assignment::Auto => Some(self.pick_device(&rental, now).await?),
            Assignment::Device(device_id) => Some(self.confirm_device(device_id, &rental, now).await?),
            Assignment::Deferred => None,
        };
        rental.device_id = device.map(|d| d.id);

        let stored = self.store.insert_rental(&rental).await?;
        info!(
            rental_id = %stored.id,
            category = %stored.category,
            device_id = ?stored.device_id,
            total = stored.total_price,
            "Rental booked"
        );
        Ok(stored)
    }

    // =========================================================================
    // Assignment
    // =========================================================================

    /// Binds a unit to a live rental, or moves it to another unit.
    ///
    /// Without `device_id` the first free unit in serial order is taken. The
    /// previous unit, if any, is free for the window as soon as this returns.
    pub async fn assign(&self, rental_id: &str, device_id: Option<&str>) -> FleetResult<Rental> {
        let _guard = self.assign_lock.lock().await;
        let now = self.clock.now();

        let rental = self.read_rental(rental_id).await?;
        ensure_live(&rental)?;

        let device = match device_id {
            Some(id) => self.confirm_device(id, &rental, now).await?,
            None => self.pick_device(&rental, now).await?,
        };

        let stored = self
            .store
            .write_rental(
                rental_id,
                &RentalPatch::bind(device.id.as_str()).expecting(rental.sync_version),
            )
            .await?;
        info!(
            rental_id = %rental_id,
            device_id = %device.id,
            previous = ?rental.device_id,
            "Rental assigned"
        );
        Ok(stored)
    }

    /// First free `Ready` unit for the rental's category and window.
    ///
    /// Candidates are re-checked in serial order; one taken since the fleet
    /// was read is skipped in favour of the next.
    async fn pick_device(&self, rental: &Rental, now: DateTime<Utc>) -> FleetResult<Device> {
        let (devices, rentals) = self.load_fleet().await?;
        let others: Vec<Rental> = rentals.into_iter().filter(|r| r.id != rental.id).collect();

        let candidates: Vec<Device> = available_devices(
            &devices,
            &others,
            &rental.category,
            AvailabilityWindow::Range(rental.window()),
            now,
            self.config.availability.maintenance_policy,
        )
        .into_iter()
        .filter(|d| is_assignable_status(d.status))
        .cloned()
        .collect();

        for candidate in &candidates {
            match self.recheck(&candidate.id, rental, now).await {
                Ok(device) => return Ok(device),
                Err(FleetError::Rule(
                    CoreError::DeviceAlreadyBooked { .. } | CoreError::DeviceNotAssignable { .. },
                )) => continue,
                Err(err) => return Err(err),
            }
        }

        debug!(
            category = %rental.category,
            candidates = candidates.len(),
            "No unit free for the window"
        );
        Err(CoreError::NoAvailableUnit {
            category: rental.category.clone(),
        }
        .into())
    }

    /// Validates an explicitly requested unit.
    async fn confirm_device(
        &self,
        device_id: &str,
        rental: &Rental,
        now: DateTime<Utc>,
    ) -> FleetResult<Device> {
        self.recheck(device_id, rental, now).await
    }

    /// Reads the unit and its live rentals fresh and runs the full check.
    ///
    /// This is the last read before the bind is written.
    async fn recheck(&self, device_id: &str, rental: &Rental, now: DateTime<Utc>) -> FleetResult<Device> {
        let device = self.read_device(device_id).await?;
        let live = self.live_rentals_for(device_id).await?;

        check_assignable(&device, rental, &live, now).map_err(|err| {
            debug!(device_id, rental_id = %rental.id, error = %err, "Unit rejected for rental");
            FleetError::from(err)
        })?;
        Ok(device)
    }

    // =========================================================================
    // Release
    // =========================================================================

    /// Marks the rental returned; the unit goes to `Maintenance`.
    pub async fn complete(&self, rental_id: &str) -> FleetResult<Rental> {
        self.release(rental_id, RentalStatus::Completed).await
    }

    /// Cancels the rental and frees its unit immediately.
    pub async fn cancel(&self, rental_id: &str) -> FleetResult<Rental> {
        self.release(rental_id, RentalStatus::Cancelled).await
    }

    async fn release(&self, rental_id: &str, outcome: RentalStatus) -> FleetResult<Rental> {
        let _guard = self.assign_lock.lock().await;
        let now = self.clock.now();

        let rental = self.read_rental(rental_id).await?;
        ensure_live(&rental)?;

        let released = match &rental.device_id {
            Some(device_id) => self.release_device(device_id, &rental, now).await?,
            None => None,
        };

        let patch = match outcome {
            RentalStatus::Completed => RentalPatch::completed(now),
            other => RentalPatch::status(other),
        };
        let stored = match self
            .store
            .write_rental(rental_id, &patch.expecting(rental.sync_version))
            .await
        {
            Ok(stored) => stored,
            Err(err) => {
                if let Some((previous, written)) = released {
                    self.restore_device(previous, &written).await;
                }
                return Err(err.into());
            }
        };
        info!(rental_id = %rental_id, status = %stored.status, "Rental released");
        Ok(stored)
    }

    /// Moves the bound unit to its post-rental status.
    ///
    /// Returns the status it had and the record as written, or `None` when
    /// nothing changed.
    async fn release_device(
        &self,
        device_id: &str,
        rental: &Rental,
        now: DateTime<Utc>,
    ) -> FleetResult<Option<(DeviceStatus, Device)>> {
        let device = match self.store.read_device(device_id).await? {
            Some(device) => device,
            None => {
                warn!(device_id, rental_id = %rental.id, "Bound device no longer exists");
                return Ok(None);
            }
        };

        let stored = normalize_stored(device.status);
        let next = status_after_release(stored, rental.has_started(now));
        if next == device.status {
            return Ok(None);
        }
        let written = self
            .store
            .write_device(device_id, &DevicePatch::status(next).expecting(device.sync_version))
            .await?;
        info!(device_id, from = %device.status, to = %next, "Device released");
        Ok(Some((stored, written)))
    }

    async fn restore_device(&self, previous: DeviceStatus, written: &Device) {
        let patch = DevicePatch::status(previous).expecting(written.sync_version);
        match self.store.write_device(&written.id, &patch).await {
            Ok(_) => warn!(device_id = %written.id, status = %previous, "Release undone"),
            Err(err) => warn!(
                device_id = %written.id,
                error = %err,
                "Could not undo device release"
            ),
        }
    }

    // =========================================================================
    // Overdue sweep and reads
    // =========================================================================

    /// Persists `overdue` for every active rental whose end has passed.
    ///
    /// Reads already report overdue lazily; this makes it stick.
    pub async fn mark_overdue(&self) -> FleetResult<Vec<Rental>> {
        let now = self.clock.now();
        let live = self.store.read_rentals(&RentalFilter::live()).await?;

        let mut marked = Vec::new();
        for rental in live
            .iter()
            .filter(|r| r.status == RentalStatus::Active && r.end_date <= now)
        {
            let stored = self
                .store
                .write_rental(
                    &rental.id,
                    &RentalPatch::status(RentalStatus::Overdue).expecting(rental.sync_version),
                )
                .await?;
            marked.push(stored);
        }

        if !marked.is_empty() {
            info!(count = marked.len(), "Rentals marked overdue");
        }
        Ok(marked)
    }

    /// One rental, with overdue applied.
    pub async fn get_rental(&self, id: &str) -> FleetResult<Rental> {
        let mut rental = self.read_rental(id).await?;
        rental.status = rental.effective_status(self.clock.now());
        Ok(rental)
    }

    /// Rentals matching `filter`, with overdue applied.
    pub async fn list_rentals(&self, filter: &RentalFilter) -> FleetResult<Vec<Rental>> {
        let now = self.clock.now();
        let mut rentals = self.store.read_rentals(filter).await?;
        for rental in &mut rentals {
            rental.status = rental.effective_status(now);
        }
        Ok(rentals)
    }

    async fn read_rental(&self, id: &str) -> FleetResult<Rental> {
        self.store
            .read_rental(id)
            .await?
            .ok_or_else(|| FleetError::not_found(EntityKind::Rental, id))
    }
}

fn ensure_live(rental: &Rental) -> FleetResult<()> {
    if rental.is_live() {
        return Ok(());
    }
    Err(CoreError::RentalNotLive {
        rental_id: rental.id.clone(),
        status: rental.status.to_string(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::EngineConfig;
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone};
    use fleet_core::NewDevice;
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap()
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, d, 0, 0, 0).unwrap()
    }

    fn engine() -> (FixedClock, FleetEngine) {
        let clock = FixedClock::new(now());
        let engine = FleetEngine::new(Arc::new(MemoryStore::new()), EngineConfig::default())
            .with_clock(Arc::new(clock.clone()));
        (clock, engine)
    }

    #[tokio::test]
    async fn test_book_rejects_empty_window() {
        let (_, engine) = engine();
        let err = engine
            .book(BookingRequest::new("PS5", RentalPlan::Daily, day(2), day(2)))
            .await
            .unwrap_err();
        assert!(matches!(err.as_rule(), Some(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_deferred_booking_then_assign() {
        let (_, engine) = engine();
        let device = engine.onboard_device(NewDevice::new("PS5-001", "PS5")).await.unwrap();

        let rental = engine
            .book(
                BookingRequest::new("PS5", RentalPlan::Daily, day(3), day(4))
                    .assignment(Assignment::Deferred),
            )
            .await
            .unwrap();
        assert_eq!(rental.device_id, None);

        let bound = engine.assign(&rental.id, None).await.unwrap();
        assert_eq!(bound.device_id.as_deref(), Some(device.id.as_str()));

        // Re-assigning the same rental to the same unit does not clash with itself.
        let again = engine.assign(&rental.id, Some(&device.id)).await.unwrap();
        assert_eq!(again.device_id, bound.device_id);
    }

    #[tokio::test]
    async fn test_reassign_frees_previous_unit() {
        let (_, engine) = engine();
        let first = engine.onboard_device(NewDevice::new("PS5-001", "PS5")).await.unwrap();
        let second = engine.onboard_device(NewDevice::new("PS5-002", "PS5")).await.unwrap();
        let window = DateRange::new(day(3), day(4));

        let rental = engine
            .book(BookingRequest::new("PS5", RentalPlan::Daily, day(3), day(4)))
            .await
            .unwrap();
        assert_eq!(rental.device_id.as_deref(), Some(first.id.as_str()));

        engine.assign(&rental.id, Some(&second.id)).await.unwrap();
        let free: Vec<String> = engine
            .available_devices("PS5", window)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(free, vec![first.id]);
    }

    #[tokio::test]
    async fn test_explicit_device_checks() {
        let (_, engine) = engine();
        let ps5 = engine.onboard_device(NewDevice::new("PS5-001", "PS5")).await.unwrap();
        let switch = engine.onboard_device(NewDevice::new("SW-001", "Switch")).await.unwrap();
        engine.set_device_status(&ps5.id, DeviceStatus::UnderRepair).await.unwrap();

        let err = engine
            .book(
                BookingRequest::new("PS5", RentalPlan::Daily, day(3), day(4))
                    .assignment(Assignment::Device(switch.id.clone())),
            )
            .await
            .unwrap_err();
        assert!(matches!(err.as_rule(), Some(CoreError::CategoryMismatch { .. })));

        let err = engine
            .book(
                BookingRequest::new("PS5", RentalPlan::Daily, day(3), day(4))
                    .assignment(Assignment::Device(ps5.id.clone())),
            )
            .await
            .unwrap_err();
        assert!(matches!(err.as_rule(), Some(CoreError::DeviceNotAssignable { .. })));
    }

    #[tokio::test]
    async fn test_complete_started_rental_forces_maintenance() {
        let (clock, engine) = engine();
        let device = engine.onboard_device(NewDevice::new("PS5-001", "PS5")).await.unwrap();
        let rental = engine
            .book(BookingRequest::new("PS5", RentalPlan::Daily, day(1), day(2)))
            .await
            .unwrap();

        assert_eq!(
            engine.get_device(&device.id).await.unwrap().effective_status,
            DeviceStatus::Rented
        );

        clock.advance(Duration::hours(10));
        let done = engine.complete(&rental.id).await.unwrap();
        assert_eq!(done.status, RentalStatus::Completed);
        assert!(done.returned_at.is_some());
        assert_eq!(done.device_id.as_deref(), Some(device.id.as_str()));

        let view = engine.get_device(&device.id).await.unwrap();
        assert_eq!(view.effective_status, DeviceStatus::Maintenance);

        let err = engine.complete(&rental.id).await.unwrap_err();
        assert!(matches!(err.as_rule(), Some(CoreError::RentalNotLive { .. })));
    }

    #[tokio::test]
    async fn test_cancel_before_start_keeps_device_ready() {
        let (_, engine) = engine();
        let device = engine.onboard_device(NewDevice::new("PS5-001", "PS5")).await.unwrap();
        let rental = engine
            .book(BookingRequest::new("PS5", RentalPlan::Daily, day(5), day(6)))
            .await
            .unwrap();

        engine.cancel(&rental.id).await.unwrap();
        let view = engine.get_device(&device.id).await.unwrap();
        assert_eq!(view.device.status, DeviceStatus::Ready);
        assert_eq!(engine.available_count("PS5", DateRange::new(day(5), day(6))).await, 1);
    }

    #[tokio::test]
    async fn test_release_keeps_under_repair() {
        let (clock, engine) = engine();
        let device = engine.onboard_device(NewDevice::new("PS5-001", "PS5")).await.unwrap();
        let rental = engine
            .book(BookingRequest::new("PS5", RentalPlan::Daily, day(5), day(6)))
            .await
            .unwrap();

        engine.set_device_status(&device.id, DeviceStatus::UnderRepair).await.unwrap();
        clock.set(day(5) + Duration::hours(12));
        engine.complete(&rental.id).await.unwrap();

        let view = engine.get_device(&device.id).await.unwrap();
        assert_eq!(view.device.status, DeviceStatus::UnderRepair);
    }

    #[tokio::test]
    async fn test_overdue_is_lazy_then_swept() {
        let (clock, engine) = engine();
        engine.onboard_device(NewDevice::new("PS5-001", "PS5")).await.unwrap();
        let rental = engine
            .book(BookingRequest::new("PS5", RentalPlan::Daily, day(1), day(2)))
            .await
            .unwrap();

        clock.set(day(3));
        assert_eq!(engine.get_rental(&rental.id).await.unwrap().status, RentalStatus::Overdue);
        assert_eq!(engine.available_count("PS5", None).await, 0);

        let marked = engine.mark_overdue().await.unwrap();
        assert_eq!(marked.len(), 1);
        assert!(engine.mark_overdue().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_booking_stores_quoted_total() {
        let (_, engine) = engine();
        engine.onboard_device(NewDevice::new("PS5-001", "PS5")).await.unwrap();

        let rental = engine
            .book(
                BookingRequest::new("PS5", RentalPlan::Daily, day(3), day(4))
                    .controllers(2)
                    .offer("UNKNOWN")
                    .customer("c-42"),
            )
            .await
            .unwrap();
        assert_eq!(rental.total_price, 600);
        assert_eq!(rental.offer_code.as_deref(), Some("UNKNOWN"));
        assert_eq!(rental.customer_id.as_deref(), Some("c-42"));
    }
}
