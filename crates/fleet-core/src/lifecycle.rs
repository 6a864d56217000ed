//! # Device Lifecycle
//!
//! The status state machine and the health rules that drive it.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │              operator                     operator                      │
//! │   Maintenance ◄──────────── Ready ────────────► Under-Repair           │
//! │        │       ────────────►  ▲  ◄────────────       │                  │
//! │        │         operator     │     operator         │                  │
//! │        │                      │                      │                  │
//! │        │           health < threshold (auto)         │                  │
//! │        │                                             │                  │
//! │        │              Rented (derived)               │                  │
//! │        │     assignment ─►  ●  ─► complete/cancel    │                  │
//! │        └──────────────────────────────┘              │                  │
//! │                release forces Maintenance,           │                  │
//! │                never downgrades Under-Repair ◄───────┘                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every function here is pure: it takes the device as it is now (and
//! whether it is currently rented) and returns what it should become.

use crate::error::{CoreError, CoreResult};
use crate::types::DeviceStatus;
use crate::MAX_HEALTH;

/// True for the four moves an operator may make by hand.
pub fn is_operator_transition(from: DeviceStatus, to: DeviceStatus) -> bool {
    use DeviceStatus::*;
    matches!(
        (from, to),
        (Ready, Maintenance) | (Ready, UnderRepair) | (Maintenance, Ready) | (UnderRepair, Ready)
    )
}

/// Validates an operator status change.
///
/// ## Arguments
/// * `stored` - status persisted on the device (never `Rented`)
/// * `currently_rented` - a live rental holds the device right now
/// * `to` - requested status
///
/// ## Returns
/// The status to persist. Asking for the status the device already has is a
/// no-op and returns it unchanged.
///
/// ## Rejections
/// ```text
///   to == Rented                 ──► InvalidStatusTransition (only assignment rents)
///   device is Rented right now   ──► InvalidStatusTransition (only release un-rents)
///   not one of the four moves    ──► InvalidStatusTransition
/// ```
pub fn operator_transition(
    stored: DeviceStatus,
    currently_rented: bool,
    to: DeviceStatus,
) -> CoreResult<DeviceStatus> {
    let from = if currently_rented {
        DeviceStatus::Rented
    } else {
        stored
    };

    if to == DeviceStatus::Rented || from == DeviceStatus::Rented {
        return Err(CoreError::InvalidStatusTransition { from, to });
    }

    if from == to {
        return Ok(from);
    }

    if is_operator_transition(from, to) {
        Ok(to)
    } else {
        Err(CoreError::InvalidStatusTransition { from, to })
    }
}

/// Clamps a requested health score into `0..=100`.
#[inline]
pub fn clamp_health(value: i64) -> u8 {
    value.clamp(0, MAX_HEALTH as i64) as u8
}

/// Outcome of a manual health edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthEdit {
    pub health: u8,
    pub status: DeviceStatus,
    /// The edit pulled a `Ready` unit into `Maintenance`.
    pub auto_maintenance: bool,
}

/// Applies a manual health edit.
///
/// The value is clamped first. A `Ready` device whose new health is below
/// `threshold` moves to `Maintenance`; every other status is left alone.
///
/// ## Example
/// ```rust
/// use fleet_core::lifecycle::edit_health;
/// use fleet_core::types::DeviceStatus;
///
/// let edit = edit_health(DeviceStatus::Ready, 55, 60);
/// assert_eq!(edit.status, DeviceStatus::Maintenance);
///
/// let edit = edit_health(DeviceStatus::Ready, 250, 60);
/// assert_eq!(edit.health, 100);
/// ```
pub fn edit_health(stored: DeviceStatus, value: i64, threshold: u8) -> HealthEdit {
    let health = clamp_health(value);
    let auto_maintenance = stored == DeviceStatus::Ready && health < threshold;
    HealthEdit {
        health,
        status: if auto_maintenance {
            DeviceStatus::Maintenance
        } else {
            stored
        },
        auto_maintenance,
    }
}

/// Status a device takes when its rental is completed or cancelled.
///
/// ## Rules
/// - `Under-Repair` stays `Under-Repair` (release never upgrades a broken unit)
/// - A rental that never started never moved the device; it keeps its status
/// - Otherwise the unit went out and must be inspected: `Maintenance`
pub fn status_after_release(stored: DeviceStatus, rental_started: bool) -> DeviceStatus {
    match stored {
        DeviceStatus::UnderRepair => DeviceStatus::UnderRepair,
        _ if !rental_started => stored,
        _ => DeviceStatus::Maintenance,
    }
}

/// Normalises a status read back from storage.
///
/// `Rented` is never persisted; a record carrying it (legacy data, a bad
/// import) is treated as `Maintenance` so it is not handed out unchecked.
pub fn normalize_stored(status: DeviceStatus) -> DeviceStatus {
    match status {
        DeviceStatus::Rented => DeviceStatus::Maintenance,
        other => other,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
