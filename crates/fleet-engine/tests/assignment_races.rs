//! Competing assignments for the same unit.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Mutex;

use fleet_core::{CatalogPatch, DevicePatch, OfferPatch, RentalPatch};
use fleet_engine::store::RecordKey;
use fleet_engine::{
    Assignment, BookingRequest, CatalogSettings, CoreError, Device, DeviceStatus, EngineConfig,
    EntityKind, FixedClock, FleetEngine, FleetError, FleetStore, MemoryStore, NewDevice,
    PromotionalOffer, Rental, RentalFilter, RentalPlan, RentalStatus, StoreError, StoreResult,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 12, 31, 12, 0, 0).unwrap()
}

fn jan(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).unwrap()
}

fn engine_over(store: Arc<dyn FleetStore>) -> FleetEngine {
    FleetEngine::new(store, EngineConfig::default()).with_clock(Arc::new(FixedClock::new(now())))
}

async fn deferred(engine: &FleetEngine, start: DateTime<Utc>, end: DateTime<Utc>) -> Rental {
    engine
        .book(BookingRequest::new("PS5", RentalPlan::Daily, start, end).assignment(Assignment::Deferred))
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_assignments_for_one_unit_yield_one_winner() {
    let engine = Arc::new(engine_over(Arc::new(MemoryStore::new())));
    let device = engine.onboard_device(NewDevice::new("PS5-001", "PS5")).await.unwrap();
    let first = deferred(&engine, jan(1), jan(3)).await;
    let second = deferred(&engine, jan(2), jan(4)).await;

    let a = {
        let engine = engine.clone();
        let device_id = device.id.clone();
        tokio::spawn(async move { engine.assign(&first.id, Some(&device_id)).await })
    };
    let b = {
        let engine = engine.clone();
        let device_id = device.id.clone();
        tokio::spawn(async move { engine.assign(&second.id, Some(&device_id)).await })
    };
    let results = [a.await.unwrap(), b.await.unwrap()];

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(loser.as_rule(), Some(CoreError::DeviceAlreadyBooked { .. })));

    let bound: Vec<Rental> = engine
        .list_rentals(&RentalFilter::live().for_device(device.id.as_str()))
        .await
        .unwrap();
    assert_eq!(bound.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_bookings_never_overbook() {
    let engine = Arc::new(engine_over(Arc::new(MemoryStore::new())));
    for n in 1..=3 {
        engine
            .onboard_device(NewDevice::new(format!("PS5-00{n}"), "PS5"))
            .await
            .unwrap();
    }

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .book(BookingRequest::new("PS5", RentalPlan::Daily, jan(1), jan(2)))
                    .await
            })
        })
        .collect();

    let mut booked = BTreeSet::new();
    let mut refused = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(rental) => {
                assert!(booked.insert(rental.device_id.unwrap()));
            }
            Err(err) => {
                assert!(matches!(err.as_rule(), Some(CoreError::NoAvailableUnit { .. })));
                refused += 1;
            }
        }
    }
    assert_eq!(booked.len(), 3);
    assert_eq!(refused, 5);
}

/// Store wrapper that slips a competing booking in between the engine's
/// first availability read and its re-check of the chosen unit.
///
/// It can also refuse rental writes as if another instance had just edited
/// the record.
struct InterleavingStore {
    inner: MemoryStore,
    intruder: Mutex<Option<Rental>>,
    intruded: AtomicBool,
    refuse_rental_writes: AtomicBool,
}

impl InterleavingStore {
    fn new() -> Self {
        InterleavingStore {
            inner: MemoryStore::new(),
            intruder: Mutex::new(None),
            intruded: AtomicBool::new(false),
            refuse_rental_writes: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl FleetStore for InterleavingStore {
    async fn read_devices(&self) -> StoreResult<Vec<Device>> {
        self.inner.read_devices().await
    }

    async fn read_rentals(&self, filter: &RentalFilter) -> StoreResult<Vec<Rental>> {
        if filter.device_id.is_some() {
            if let Some(rental) = self.intruder.lock().await.take() {
                self.inner.insert_rental(&rental).await?;
                self.intruded.store(true, Ordering::SeqCst);
            }
        }
        self.inner.read_rentals(filter).await
    }

    async fn read_catalog(&self) -> StoreResult<Vec<CatalogSettings>> {
        self.inner.read_catalog().await
    }

    async fn read_offers(&self) -> StoreResult<Vec<PromotionalOffer>> {
        self.inner.read_offers().await
    }

    async fn read_device(&self, id: &str) -> StoreResult<Option<Device>> {
        self.inner.read_device(id).await
    }

    async fn read_rental(&self, id: &str) -> StoreResult<Option<Rental>> {
        self.inner.read_rental(id).await
    }

    async fn insert_device(&self, device: &Device) -> StoreResult<Device> {
        self.inner.insert_device(device).await
    }

    async fn write_device(&self, id: &str, patch: &DevicePatch) -> StoreResult<Device> {
        self.inner.write_device(id, patch).await
    }

    async fn delete_device(&self, id: &str) -> StoreResult<()> {
        self.inner.delete_device(id).await
    }

    async fn insert_rental(&self, rental: &Rental) -> StoreResult<Rental> {
        self.inner.insert_rental(rental).await
    }

    async fn write_rental(&self, id: &str, patch: &RentalPatch) -> StoreResult<Rental> {
        if self.refuse_rental_writes.load(Ordering::SeqCst) {
            return Err(StoreError::VersionConflict {
                entity: EntityKind::Rental,
                id: id.to_string(),
                expected: patch.expected_version.unwrap_or_default(),
            });
        }
        self.inner.write_rental(id, patch).await
    }

    async fn write_catalog(&self, category: &str, patch: &CatalogPatch) -> StoreResult<CatalogSettings> {
        self.inner.write_catalog(category, patch).await
    }

    async fn rename_catalog(&self, old: &str, new: &str) -> StoreResult<CatalogSettings> {
        self.inner.rename_catalog(old, new).await
    }

    async fn insert_offer(&self, offer: &PromotionalOffer) -> StoreResult<PromotionalOffer> {
        self.inner.insert_offer(offer).await
    }

    async fn write_offer(&self, code: &str, patch: &OfferPatch) -> StoreResult<PromotionalOffer> {
        self.inner.write_offer(code, patch).await
    }

    async fn pending_keys(&self) -> BTreeSet<RecordKey> {
        self.inner.pending_keys().await
    }
}

#[tokio::test]
async fn recheck_catches_a_booking_made_after_the_first_read() {
    let store = Arc::new(InterleavingStore::new());
    let engine = engine_over(store.clone());
    let device = engine.onboard_device(NewDevice::new("PS5-001", "PS5")).await.unwrap();
    let ours = deferred(&engine, jan(1), jan(3)).await;

    // Another instance books the same unit for an overlapping window.
    *store.intruder.lock().await = Some(competing(&ours, &device.id));

    let err = engine.assign(&ours.id, Some(&device.id)).await.unwrap_err();
    assert!(store.intruded.load(Ordering::SeqCst));
    assert!(matches!(err.as_rule(), Some(CoreError::DeviceAlreadyBooked { .. })));

    let unchanged = engine.get_rental(&ours.id).await.unwrap();
    assert_eq!(unchanged.device_id, None);
}

fn competing(ours: &Rental, device_id: &str) -> Rental {
    let mut theirs = ours.clone();
    theirs.id = "r-other".into();
    theirs.start_date = jan(2);
    theirs.end_date = jan(4);
    theirs.device_id = Some(device_id.to_string());
    theirs
}

#[tokio::test]
async fn auto_assign_moves_on_when_the_first_unit_is_taken() {
    let store = Arc::new(InterleavingStore::new());
    let engine = engine_over(store.clone());
    let first = engine.onboard_device(NewDevice::new("PS5-001", "PS5")).await.unwrap();
    let second = engine.onboard_device(NewDevice::new("PS5-002", "PS5")).await.unwrap();
    let ours = deferred(&engine, jan(1), jan(3)).await;

    *store.intruder.lock().await = Some(competing(&ours, &first.id));

    let bound = engine.assign(&ours.id, None).await.unwrap();
    assert!(store.intruded.load(Ordering::SeqCst));
    assert_eq!(bound.device_id.as_deref(), Some(second.id.as_str()));
}

#[tokio::test]
async fn auto_assign_reports_no_unit_when_every_candidate_is_taken() {
    let store = Arc::new(InterleavingStore::new());
    let engine = engine_over(store.clone());
    let only = engine.onboard_device(NewDevice::new("PS5-001", "PS5")).await.unwrap();
    let ours = deferred(&engine, jan(1), jan(3)).await;

    *store.intruder.lock().await = Some(competing(&ours, &only.id));

    let err = engine.assign(&ours.id, None).await.unwrap_err();
    assert!(matches!(err.as_rule(), Some(CoreError::NoAvailableUnit { .. })));
}

#[tokio::test]
async fn refused_release_puts_the_device_back() {
    let store = Arc::new(InterleavingStore::new());
    let clock = FixedClock::new(now());
    let engine = FleetEngine::new(store.clone(), EngineConfig::default()).with_clock(Arc::new(clock.clone()));
    let device = engine.onboard_device(NewDevice::new("PS5-001", "PS5")).await.unwrap();
    let rental = engine
        .book(BookingRequest::new("PS5", RentalPlan::Daily, jan(1), jan(3)))
        .await
        .unwrap();

    clock.set(jan(2));
    store.refuse_rental_writes.store(true, Ordering::SeqCst);
    let err = engine.complete(&rental.id).await.unwrap_err();
    assert!(matches!(err, FleetError::Store(StoreError::VersionConflict { .. })));

    let view = engine.get_device(&device.id).await.unwrap();
    assert_eq!(view.device.status, DeviceStatus::Ready);
    assert_eq!(view.effective_status, DeviceStatus::Rented);
    assert_eq!(engine.get_rental(&rental.id).await.unwrap().status, RentalStatus::Active);

    store.refuse_rental_writes.store(false, Ordering::SeqCst);
    engine.complete(&rental.id).await.unwrap();
    let view = engine.get_device(&device.id).await.unwrap();
    assert_eq!(view.device.status, DeviceStatus::Maintenance);
}

#[tokio::test]
async fn stale_rental_version_is_refused() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_over(store.clone());
    engine.onboard_device(NewDevice::new("PS5-001", "PS5")).await.unwrap();
    let rental = deferred(&engine, jan(1), jan(2)).await;

    // Someone else touched the rental since it was read.
    store
        .write_rental(&rental.id, &RentalPatch::status(RentalStatus::Active))
        .await
        .unwrap();
    let err = store
        .write_rental(&rental.id, &RentalPatch::bind("x").expecting(rental.sync_version))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::VersionConflict { .. }));

    // The engine reads fresh and succeeds.
    assert!(engine.assign(&rental.id, None).await.is_ok());
}
