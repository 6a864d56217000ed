//! # Availability
//!
//! Which units of a category can take a booking for a given window.
//!
//! ## Eligibility Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  devices ──► same category ──► status eligible ──► no live overlap ──► │
//! │                                   │                    │                │
//! │                 Ready        ✔    │   bound rentals in {active,overdue} │
//! │                 Under-Repair ✘    │   whose occupied window meets the   │
//! │                 Maintenance  ?    │   requested one (overdue = open end)│
//! │                                   │                                     │
//! │   ? = only for windows starting after today, and only when the          │
//! │       policy counts Maintenance as soon-to-be-available                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The policy only affects counting. Binding a unit to a rental needs it
//! `Ready`: a unit in maintenance waits for inspection whatever the window.
//!
//! ## "Right Now"
//! A query without a window asks about `[now, now + 1ns)`. The same code
//! path answers both questions, so they cannot disagree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::same_category;
use crate::error::{CoreError, CoreResult};
use crate::types::{DateRange, Device, DeviceStatus, Rental};

/// Whether `Maintenance` units count for future windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenancePolicy {
    /// A unit in maintenance today is expected back for windows that start
    /// on a later calendar date.
    CountForFutureRanges,
    /// Maintenance units never count.
    Exclude,
}

impl Default for MaintenancePolicy {
    fn default() -> Self {
        MaintenancePolicy::CountForFutureRanges
    }
}

/// The window an availability question is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityWindow {
    Now,
    Range(DateRange),
}

impl AvailabilityWindow {
    pub fn resolve(&self, now: DateTime<Utc>) -> DateRange {
        match self {
            AvailabilityWindow::Now => DateRange::instant(now),
            AvailabilityWindow::Range(range) => *range,
        }
    }
}

impl From<Option<DateRange>> for AvailabilityWindow {
    fn from(range: Option<DateRange>) -> Self {
        range.map_or(AvailabilityWindow::Now, AvailabilityWindow::Range)
    }
}

// =============================================================================
// Rules
// =============================================================================

/// Does the stored status allow a booking over `range`?
pub fn is_status_eligible(
    status: DeviceStatus,
    range: &DateRange,
    now: DateTime<Utc>,
    policy: MaintenancePolicy,
) -> bool {
    match status {
        DeviceStatus::Ready => true,
        DeviceStatus::Maintenance => {
            policy == MaintenancePolicy::CountForFutureRanges
                && range.start.date_naive() > now.date_naive()
        }
        DeviceStatus::UnderRepair | DeviceStatus::Rented => false,
    }
}

/// Can a unit with this stored status be bound to a rental?
pub fn is_assignable_status(status: DeviceStatus) -> bool {
    status == DeviceStatus::Ready
}

/// Live rentals bound to `device_id` that block `range`.
///
/// `skip_rental` excludes the rental being (re)assigned from its own check.
pub fn blocking_rentals<'a>(
    device_id: &'a str,
    rentals: &'a [Rental],
    range: &'a DateRange,
    now: DateTime<Utc>,
    skip_rental: Option<&'a str>,
) -> impl Iterator<Item = &'a Rental> + 'a {
    rentals.iter().filter(move |r| {
        r.device_id.as_deref() == Some(device_id)
            && Some(r.id.as_str()) != skip_rental
            && r.blocks(range, now)
    })
}

/// True when no live rental bound to the device overlaps `range`.
pub fn is_free(device_id: &str, rentals: &[Rental], range: &DateRange, now: DateTime<Utc>) -> bool {
    blocking_rentals(device_id, rentals, range, now, None)
        .next()
        .is_none()
}

/// The live rental holding the device at `now`, if any.
///
/// This is what makes a device read as `Rented`.
pub fn occupying_rental<'a>(
    device_id: &str,
    rentals: &'a [Rental],
    now: DateTime<Utc>,
) -> Option<&'a Rental> {
    let instant = DateRange::instant(now);
    rentals
        .iter()
        .find(|r| r.device_id.as_deref() == Some(device_id) && r.blocks(&instant, now))
}

/// Status as a reader should see it: `Rented` while a live rental holds it.
pub fn effective_status(device: &Device, rentals: &[Rental], now: DateTime<Utc>) -> DeviceStatus {
    if occupying_rental(&device.id, rentals, now).is_some() {
        DeviceStatus::Rented
    } else {
        device.status
    }
}

// =============================================================================
// Queries
// =============================================================================

/// Every unit of `category` that could take a booking for `window`.
///
/// Sorted by serial number (case-insensitive, then id), which is also the
/// order automatic assignment picks from.
pub fn available_devices<'a>(
    devices: &'a [Device],
    rentals: &[Rental],
    category: &str,
    window: AvailabilityWindow,
    now: DateTime<Utc>,
    policy: MaintenancePolicy,
) -> Vec<&'a Device> {
    let range = window.resolve(now);
    if range.is_empty() {
        return Vec::new();
    }

    let mut free: Vec<&Device> = devices
        .iter()
        .filter(|d| same_category(&d.category, category))
        .filter(|d| is_status_eligible(d.status, &range, now, policy))
        .filter(|d| is_free(&d.id, rentals, &range, now))
        .collect();

    free.sort_by(|a, b| {
        a.serial_number
            .to_lowercase()
            .cmp(&b.serial_number.to_lowercase())
            .then_with(|| a.id.cmp(&b.id))
    });
    free
}

/// Number of units of `category` that could take a booking for `window`.
///
/// ## Example
/// ```rust
/// use chrono::Utc;
/// use fleet_core::availability::{count_available, AvailabilityWindow, MaintenancePolicy};
/// use fleet_core::types::{Device, NewDevice};
///
/// let now = Utc::now();
/// let devices = vec![Device::onboard("d-1", NewDevice::new("PS5-001", "PS5"), now)];
/// let n = count_available(&devices, &[], "ps5", AvailabilityWindow::Now, now, MaintenancePolicy::default());
/// assert_eq!(n, 1);
/// ```
pub fn count_available(
    devices: &[Device],
    rentals: &[Rental],
    category: &str,
    window: AvailabilityWindow,
    now: DateTime<Utc>,
    policy: MaintenancePolicy,
) -> usize {
    available_devices(devices, rentals, category, window, now, policy).len()
}

/// Checks that `device` may be bound to `rental`.
///
/// `rentals` must contain at least every live rental bound to the device.
///
/// ## Order of checks
/// 1. Category ──► `CategoryMismatch`
/// 2. Status other than `Ready` ──► `DeviceNotAssignable`
/// 3. Overlap with other live bindings ──► `DeviceAlreadyBooked`
pub fn check_assignable(
    device: &Device,
    rental: &Rental,
    rentals: &[Rental],
    now: DateTime<Utc>,
) -> CoreResult<()> {
    if !same_category(&device.category, &rental.category) {
        return Err(CoreError::CategoryMismatch {
            device_id: device.id.clone(),
            device_category: device.category.clone(),
            rental_category: rental.category.clone(),
        });
    }

    if !is_assignable_status(device.status) {
        return Err(CoreError::DeviceNotAssignable {
            device_id: device.id.clone(),
            status: device.status,
        });
    }

    let range = rental.window();
    if blocking_rentals(&device.id, rentals, &range, now, Some(rental.id.as_str()))
        .next()
        .is_some()
    {
        return Err(CoreError::DeviceAlreadyBooked {
            device_id: device.id.clone(),
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewDevice, RentalPlan, RentalStatus};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap()
    }

    fn device(id: &str, serial: &str, status: DeviceStatus) -> Device {
        let mut d = Device::onboard(id, NewDevice::new(serial, "PS5"), now());
        d.status = status;
        d
    }

    fn rental(id: &str, device_id: Option<&str>, start: DateTime<Utc>, days: i64) -> Rental {
        Rental {
            id: id.into(),
            customer_id: Some("cust-1".into()),
            category: "PS5".into(),
            product_id: None,
            plan: RentalPlan::Daily,
            controller_count: 1,
            offer_code: None,
            start_date: start,
            end_date: start + Duration::days(days),
            status: RentalStatus::Active,
            device_id: device_id.map(String::from),
            total_price: 500,
            created_at: start,
            updated_at: start,
            returned_at: None,
            sync_version: 0,
        }
    }

    fn range(start: DateTime<Utc>, days: i64) -> AvailabilityWindow {
        AvailabilityWindow::Range(DateRange::new(start, start + Duration::days(days)).unwrap())
    }

    #[test]
    fn test_under_repair_never_counts() {
        let devices = vec![
            device("a", "A", DeviceStatus::Ready),
            device("b", "B", DeviceStatus::UnderRepair),
        ];
        let n = count_available(
            &devices,
            &[],
            "PS5",
            range(now() + Duration::days(3), 1),
            now(),
            MaintenancePolicy::CountForFutureRanges,
        );
        assert_eq!(n, 1);
    }

    #[test]
    fn test_maintenance_counts_only_for_later_dates() {
        let devices = vec![device("m", "M", DeviceStatus::Maintenance)];
        let policy = MaintenancePolicy::CountForFutureRanges;

        assert_eq!(count_available(&devices, &[], "PS5", AvailabilityWindow::Now, now(), policy), 0);
        // Later today is still "today".
        assert_eq!(
            count_available(&devices, &[], "PS5", range(now() + Duration::hours(2), 1), now(), policy),
            0
        );
        assert_eq!(
            count_available(&devices, &[], "PS5", range(now() + Duration::days(1), 1), now(), policy),
            1
        );
        assert_eq!(
            count_available(
                &devices,
                &[],
                "PS5",
                range(now() + Duration::days(1), 1),
                now(),
                MaintenancePolicy::Exclude
            ),
            0
        );
    }

    #[test]
    fn test_overlap_blocks_and_touching_does_not() {
        let devices = vec![device("a", "A", DeviceStatus::Ready)];
        let rentals = vec![rental("r1", Some("a"), now(), 1)];
        let policy = MaintenancePolicy::default();

        assert_eq!(count_available(&devices, &rentals, "PS5", range(now(), 1), now(), policy), 0);
        assert_eq!(
            count_available(&devices, &rentals, "PS5", range(now() + Duration::days(1), 1), now(), policy),
            1
        );
    }

    #[test]
    fn test_unbound_and_closed_rentals_do_not_block() {
        let devices = vec![device("a", "A", DeviceStatus::Ready)];
        let mut closed = rental("r2", Some("a"), now(), 1);
        closed.status = RentalStatus::Cancelled;
        let rentals = vec![rental("r1", None, now(), 1), closed];

        assert_eq!(
            count_available(&devices, &rentals, "PS5", AvailabilityWindow::Now, now(), MaintenancePolicy::default()),
            1
        );
    }

    #[test]
    fn test_overdue_rental_keeps_blocking() {
        let devices = vec![device("a", "A", DeviceStatus::Ready)];
        let rentals = vec![rental("r1", Some("a"), now() - Duration::days(5), 2)];

        assert_eq!(
            count_available(&devices, &rentals, "PS5", range(now() + Duration::days(10), 1), now(), MaintenancePolicy::default()),
            0
        );
        assert_eq!(effective_status(&devices[0], &rentals, now()), DeviceStatus::Rented);
    }

    #[test]
    fn test_now_matches_epsilon_range() {
        let devices = vec![
            device("a", "A", DeviceStatus::Ready),
            device("b", "B", DeviceStatus::Ready),
        ];
        let rentals = vec![rental("r1", Some("a"), now() - Duration::hours(1), 1)];
        let policy = MaintenancePolicy::default();

        let by_now = count_available(&devices, &rentals, "PS5", AvailabilityWindow::Now, now(), policy);
        let by_range = count_available(
            &devices,
            &rentals,
            "PS5",
            AvailabilityWindow::Range(DateRange::new(now(), now() + Duration::milliseconds(1)).unwrap()),
            now(),
            policy,
        );
        assert_eq!(by_now, 1);
        assert_eq!(by_now, by_range);
    }

    #[test]
    fn test_available_devices_sorted_by_serial() {
        let devices = vec![
            device("z", "ps5-010", DeviceStatus::Ready),
            device("y", "PS5-002", DeviceStatus::Ready),
        ];
        let free = available_devices(&devices, &[], "PS5", AvailabilityWindow::Now, now(), MaintenancePolicy::default());
        let serials: Vec<_> = free.iter().map(|d| d.serial_number.as_str()).collect();
        assert_eq!(serials, vec!["PS5-002", "ps5-010"]);
    }

    #[test]
    fn test_check_assignable() {
        let ready = device("a", "A", DeviceStatus::Ready);
        let target = rental("new", None, now(), 1);
        let existing = vec![rental("r1", Some("a"), now(), 1)];

        assert!(check_assignable(&ready, &target, &[], now()).is_ok());
        assert_eq!(
            check_assignable(&ready, &target, &existing, now()),
            Err(CoreError::DeviceAlreadyBooked { device_id: "a".into() })
        );

        // A rental never conflicts with itself.
        let mut bound = existing[0].clone();
        bound.device_id = Some("a".into());
        assert!(check_assignable(&ready, &bound, &existing, now()).is_ok());

        let maint = device("m", "M", DeviceStatus::Maintenance);
        assert!(matches!(
            check_assignable(&maint, &target, &[], now()),
            Err(CoreError::DeviceNotAssignable { .. })
        ));

        let mut other = device("x", "X", DeviceStatus::Ready);
        other.category = "Switch".into();
        assert!(matches!(
            check_assignable(&other, &target, &[], now()),
            Err(CoreError::CategoryMismatch { .. })
        ));
    }

    #[test]
    fn test_maintenance_counts_but_is_never_assignable() {
        let maint = device("m", "M", DeviceStatus::Maintenance);
        let next_week = rental("later", None, now() + Duration::days(7), 1);
        let policy = MaintenancePolicy::CountForFutureRanges;

        assert_eq!(
            count_available(&[maint.clone()], &[], "PS5", range(now() + Duration::days(7), 1), now(), policy),
            1
        );
        assert_eq!(
            check_assignable(&maint, &next_week, &[], now()),
            Err(CoreError::DeviceNotAssignable {
                device_id: "m".into(),
                status: DeviceStatus::Maintenance,
            })
        );
        assert!(!is_assignable_status(DeviceStatus::UnderRepair));
        assert!(is_assignable_status(DeviceStatus::Ready));
    }
}
