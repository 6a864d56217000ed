//! # Domain Types
//!
//! Core domain types used throughout the rental engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │     Device      │   │     Rental      │   │ CatalogSettings │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │◄──│  device_id?     │   │  device_category│       │
//! │  │  serial_number  │   │  category ──────┼──►│  rates          │       │
//! │  │  category       │   │  [start, end)   │   │  max_controllers│       │
//! │  │  status, health │   │  status         │   │  features       │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  DeviceStatus   │   │  RentalStatus   │   │PromotionalOffer │       │
//! │  │  Ready          │   │  active         │   │  code (NOCASE)  │       │
//! │  │  Rented*        │   │  overdue        │   │  percentage /   │       │
//! │  │  Maintenance    │   │  completed      │   │  fixed          │       │
//! │  │  Under-Repair   │   │  cancelled      │   │  min_rental_days│       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  * Rented is derived from live rentals, never stored                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every device has:
//! - `id`: UUID v4 - immutable, used by rentals
//! - `serial_number`: human-facing, unique, what technicians read off the box

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::catalog::same_category;
use crate::money::Money;
use crate::{DEFAULT_MAX_CONTROLLERS, MAX_HEALTH};

// =============================================================================
// Date Range
// =============================================================================

/// A half-open time window `[start, end)`.
///
/// ## Overlap Rule
/// ```text
///   a: [────────)
///   b:          [────────)      touching ends do NOT overlap
///   c:      [──────)            overlaps a
///   d: [)                       empty window overlaps nothing
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    #[ts(as = "String")]
    pub start: DateTime<Utc>,
    #[ts(as = "String")]
    pub end: DateTime<Utc>,
}

impl DateRange {
    /// Builds a window; returns `None` when `end` precedes `start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start <= end).then_some(DateRange { start, end })
    }

    /// The smallest non-empty window starting at `now`.
    ///
    /// Asking about this window is the same question as "is it free right
    /// now", which keeps the no-range availability query and the ranged one
    /// in agreement.
    pub fn instant(now: DateTime<Utc>) -> Self {
        DateRange {
            start: now,
            end: now + Duration::nanoseconds(1),
        }
    }

    /// True when the two windows share at least one instant.
    #[inline]
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// True when `at` falls inside `[start, end)`.
    #[inline]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Length in whole days, rounding any partial day up.
    pub fn days(&self) -> u32 {
        let secs = (self.end - self.start).num_seconds().max(0);
        let days = (secs + 86_399) / 86_400;
        days as u32
    }
}

// =============================================================================
// Rental Plan
// =============================================================================

/// The pricing tier a booking is quoted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum RentalPlan {
    Daily,
    Weekly,
    Monthly,
}

impl RentalPlan {
    /// Nominal number of days one period of this plan covers.
    ///
    /// Used to check an offer's `min_rental_days` when the caller did not
    /// give an explicit duration.
    pub const fn days(&self) -> u32 {
        match self {
            RentalPlan::Daily => 1,
            RentalPlan::Weekly => 7,
            RentalPlan::Monthly => 30,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            RentalPlan::Daily => "daily",
            RentalPlan::Weekly => "weekly",
            RentalPlan::Monthly => "monthly",
        }
    }
}

impl fmt::Display for RentalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Device Status
// =============================================================================

/// Operational state of a physical unit.
///
/// `Rented` exists so views can report it; it is never persisted. See
/// [`crate::lifecycle`] for the legal moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[ts(export)]
pub enum DeviceStatus {
    Ready,
    Rented,
    Maintenance,
    #[serde(rename = "Under-Repair")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "Under-Repair"))]
    UnderRepair,
}

impl DeviceStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Ready => "Ready",
            DeviceStatus::Rented => "Rented",
            DeviceStatus::Maintenance => "Maintenance",
            DeviceStatus::UnderRepair => "Under-Repair",
        }
    }
}

impl Default for DeviceStatus {
    fn default() -> Self {
        DeviceStatus::Ready
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Device
// =============================================================================

/// A physical rental unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Human-facing serial, unique across the fleet (case-insensitive).
    pub serial_number: String,

    /// Catalog category label, e.g. "PS5".
    pub category: String,

    /// Stored status. Never `Rented`.
    pub status: DeviceStatus,

    /// Inspection score, always within `0..=100`.
    pub health: u8,

    /// Ports / cables shipped with the unit.
    #[serde(default)]
    pub connectors: Vec<String>,

    /// Controllers bundled in the box.
    pub controller_count: Option<u32>,

    pub storage_capacity: Option<String>,

    pub firmware_version: Option<String>,

    pub supplier: Option<String>,

    /// Acquisition cost (informational).
    pub purchase_cost: Option<i64>,

    #[ts(as = "Option<String>")]
    pub warranty_until: Option<NaiveDate>,

    pub notes: Option<String>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,

    /// Bumped on every write; patches may pin it for conflict detection.
    pub sync_version: i64,
}

impl Device {
    /// Materializes a freshly onboarded unit: full health, `Ready`.
    pub fn onboard(id: impl Into<String>, new: NewDevice, now: DateTime<Utc>) -> Self {
        Device {
            id: id.into(),
            serial_number: new.serial_number.trim().to_string(),
            category: new.category.trim().to_string(),
            status: DeviceStatus::Ready,
            health: MAX_HEALTH,
            connectors: new.connectors,
            controller_count: new.controller_count,
            storage_capacity: new.storage_capacity,
            firmware_version: new.firmware_version,
            supplier: new.supplier,
            purchase_cost: new.purchase_cost,
            warranty_until: new.warranty_until,
            notes: new.notes,
            created_at: now,
            updated_at: now,
            sync_version: 0,
        }
    }
}

/// Input for onboarding a unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct NewDevice {
    pub serial_number: String,
    pub category: String,
    #[serde(default)]
    pub connectors: Vec<String>,
    pub controller_count: Option<u32>,
    pub storage_capacity: Option<String>,
    pub firmware_version: Option<String>,
    pub supplier: Option<String>,
    pub purchase_cost: Option<i64>,
    #[ts(as = "Option<String>")]
    pub warranty_until: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl NewDevice {
    pub fn new(serial_number: impl Into<String>, category: impl Into<String>) -> Self {
        NewDevice {
            serial_number: serial_number.into(),
            category: category.into(),
            ..Default::default()
        }
    }
}

// =============================================================================
// Rental Status
// =============================================================================

/// Booking state.
///
/// ```text
///   active ──(end passes, not returned)──► overdue
///     │                                      │
///     ├──────────── return ──────────────────┼──► completed
///     └──────────── cancel ──────────────────┴──► cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum RentalStatus {
    Active,
    Overdue,
    Completed,
    Cancelled,
}

impl RentalStatus {
    /// Active and overdue rentals hold their device.
    #[inline]
    pub const fn is_live(&self) -> bool {
        matches!(self, RentalStatus::Active | RentalStatus::Overdue)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            RentalStatus::Active => "active",
            RentalStatus::Overdue => "overdue",
            RentalStatus::Completed => "completed",
            RentalStatus::Cancelled => "cancelled",
        }
    }
}

impl Default for RentalStatus {
    fn default() -> Self {
        RentalStatus::Active
    }
}

impl fmt::Display for RentalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Rental
// =============================================================================

/// A booking of a category (and, once resolved, a specific device).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Rental {
    pub id: String,

    /// Customer reference from the auth layer (opaque here).
    pub customer_id: Option<String>,

    pub category: String,

    /// Storefront product the booking came from, if any.
    pub product_id: Option<String>,

    pub plan: RentalPlan,

    pub controller_count: u32,

    /// Offer code the customer entered (kept even if it did not apply).
    pub offer_code: Option<String>,

    #[ts(as = "String")]
    pub start_date: DateTime<Utc>,

    #[ts(as = "String")]
    pub end_date: DateTime<Utc>,

    pub status: RentalStatus,

    /// Bound unit; kept after release for audit.
    pub device_id: Option<String>,

    /// Quoted at booking time, never recomputed.
    pub total_price: i64,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,

    #[ts(as = "Option<String>")]
    pub returned_at: Option<DateTime<Utc>>,

    pub sync_version: i64,
}

impl Rental {
    /// The booked window.
    #[inline]
    pub fn window(&self) -> DateRange {
        DateRange {
            start: self.start_date,
            end: self.end_date,
        }
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    /// Status with overdue detection applied lazily.
    ///
    /// There is no background scheduler: an `active` rental whose end has
    /// passed reads as `overdue` until the sweep persists it.
    pub fn effective_status(&self, now: DateTime<Utc>) -> RentalStatus {
        match self.status {
            RentalStatus::Active if self.end_date <= now => RentalStatus::Overdue,
            other => other,
        }
    }

    /// True once the rental window has begun.
    #[inline]
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.start_date <= now
    }

    /// Window this rental keeps its device out of circulation.
    ///
    /// ```text
    ///   active, end in future:  [start, end)
    ///   overdue (end passed):   [start, ∞)   the unit has not come back
    ///   completed / cancelled:  nothing
    /// ```
    /// `None` for the end means open-ended.
    pub fn occupied_window(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, Option<DateTime<Utc>>)> {
        match self.effective_status(now) {
            RentalStatus::Active => Some((self.start_date, Some(self.end_date))),
            RentalStatus::Overdue => Some((self.start_date, None)),
            RentalStatus::Completed | RentalStatus::Cancelled => None,
        }
    }

    /// True when this rental holds its device during any part of `range`.
    pub fn blocks(&self, range: &DateRange, now: DateTime<Utc>) -> bool {
        if range.is_empty() {
            return false;
        }
        match self.occupied_window(now) {
            None => false,
            Some((start, Some(end))) => start < range.end && range.start < end && start < end,
            Some((start, None)) => start < range.end,
        }
    }
}

/// Which rentals a read should return.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RentalFilter {
    pub device_id: Option<String>,
    pub category: Option<String>,
    /// Only `active` / `overdue`.
    pub live_only: bool,
}

impl RentalFilter {
    /// Every rental.
    pub fn all() -> Self {
        Self::default()
    }

    /// Only rentals holding a device.
    pub fn live() -> Self {
        RentalFilter {
            live_only: true,
            ..Self::default()
        }
    }

    pub fn for_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn in_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn matches(&self, rental: &Rental) -> bool {
        if self.live_only && !rental.is_live() {
            return false;
        }
        if let Some(device_id) = &self.device_id {
            if rental.device_id.as_deref() != Some(device_id.as_str()) {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if !same_category(&rental.category, category) {
                return false;
            }
        }
        true
    }
}

// =============================================================================
// Catalog Settings
// =============================================================================

/// Per-plan rates for the console and for each extra controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct RateTable {
    pub daily_rate: i64,
    pub weekly_rate: i64,
    pub monthly_rate: i64,
    pub controller_daily_rate: i64,
    pub controller_weekly_rate: i64,
    pub controller_monthly_rate: i64,
}

impl RateTable {
    /// The documented table used when a category has no catalog entry.
    ///
    /// The storefront must never show a broken price, so an unknown category
    /// is quoted with these numbers rather than failing.
    pub const fn fallback() -> Self {
        RateTable {
            daily_rate: 500,
            weekly_rate: 3000,
            monthly_rate: 10000,
            controller_daily_rate: 100,
            controller_weekly_rate: 500,
            controller_monthly_rate: 1500,
        }
    }

    pub fn rate_for(&self, plan: RentalPlan) -> Money {
        Money::from_units(match plan {
            RentalPlan::Daily => self.daily_rate,
            RentalPlan::Weekly => self.weekly_rate,
            RentalPlan::Monthly => self.monthly_rate,
        })
    }

    pub fn controller_rate_for(&self, plan: RentalPlan) -> Money {
        Money::from_units(match plan {
            RentalPlan::Daily => self.controller_daily_rate,
            RentalPlan::Weekly => self.controller_weekly_rate,
            RentalPlan::Monthly => self.controller_monthly_rate,
        })
    }
}

impl Default for RateTable {
    fn default() -> Self {
        RateTable::fallback()
    }
}

/// Pricing and storefront configuration for one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSettings {
    /// Unique key (case-insensitive).
    pub device_category: String,
    pub is_enabled: bool,
    pub is_featured: bool,
    pub max_controllers: u32,
    pub extra_controller_enabled: bool,
    #[serde(flatten)]
    pub rates: RateTable,
    /// Ordered marketing bullet points.
    #[serde(default)]
    pub features: Vec<String>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    pub sync_version: i64,
}

impl CatalogSettings {
    /// Entry created the first time a category shows up (e.g. on onboarding).
    pub fn with_defaults(category: impl Into<String>, now: DateTime<Utc>) -> Self {
        CatalogSettings {
            device_category: category.into().trim().to_string(),
            is_enabled: true,
            is_featured: false,
            max_controllers: DEFAULT_MAX_CONTROLLERS,
            extra_controller_enabled: true,
            rates: RateTable::fallback(),
            features: Vec::new(),
            updated_at: now,
            sync_version: 0,
        }
    }
}

// =============================================================================
// Promotional Offer
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    /// `discount_value` is a percentage (0–100).
    Percentage,
    /// `discount_value` is an amount in currency units.
    Fixed,
}

/// A promotional code. Deactivated, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PromotionalOffer {
    pub id: String,
    /// Unique, compared case-insensitively.
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    pub min_rental_days: u32,
    /// Empty means every category.
    #[serde(default)]
    pub applicable_categories: Vec<String>,
    pub is_active: bool,
    #[ts(as = "Option<String>")]
    pub valid_from: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub valid_until: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    pub sync_version: i64,
}

impl PromotionalOffer {
    pub fn from_new(id: impl Into<String>, new: NewOffer, now: DateTime<Utc>) -> Self {
        PromotionalOffer {
            id: id.into(),
            code: new.code.trim().to_string(),
            description: new.description,
            discount_type: new.discount_type,
            discount_value: new.discount_value,
            min_rental_days: new.min_rental_days,
            applicable_categories: new.applicable_categories,
            is_active: new.is_active,
            valid_from: new.valid_from,
            valid_until: new.valid_until,
            created_at: now,
            updated_at: now,
            sync_version: 0,
        }
    }

    /// Case-insensitive code comparison, ignoring surrounding whitespace.
    pub fn code_matches(&self, code: &str) -> bool {
        self.code.trim().eq_ignore_ascii_case(code.trim())
    }

    /// Membership test against the category set (empty set = all).
    pub fn applies_to(&self, category: &str) -> bool {
        self.applicable_categories.is_empty()
            || self
                .applicable_categories
                .iter()
                .any(|c| same_category(c, category))
    }

    /// True when `now` is inside the optional validity window (inclusive).
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        let after_start = self.valid_from.map_or(true, |from| from <= now);
        let before_end = self.valid_until.map_or(true, |until| now <= until);
        after_start && before_end
    }
}

/// Input for creating an offer.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct NewOffer {
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    #[serde(default)]
    pub min_rental_days: u32,
    #[serde(default)]
    pub applicable_categories: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[ts(as = "Option<String>")]
    pub valid_from: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub valid_until: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl NewOffer {
    pub fn percentage(code: impl Into<String>, pct: i64) -> Self {
        Self::build(code, DiscountType::Percentage, pct)
    }

    pub fn fixed(code: impl Into<String>, amount: i64) -> Self {
        Self::build(code, DiscountType::Fixed, amount)
    }

    fn build(code: impl Into<String>, discount_type: DiscountType, value: i64) -> Self {
        NewOffer {
            code: code.into(),
            description: None,
            discount_type,
            discount_value: value,
            min_rental_days: 0,
            applicable_categories: Vec::new(),
            is_active: true,
            valid_from: None,
            valid_until: None,
        }
    }

    pub fn min_days(mut self, days: u32) -> Self {
        self.min_rental_days = days;
        self
    }

    pub fn for_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.applicable_categories = categories.into_iter().map(Into::into).collect();
        self
    }
}

// =============================================================================
// Entity Kind
// =============================================================================

/// The four record families the persistence collaborator stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Device,
    Rental,
    Catalog,
    Offer,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::Device => "device",
            EntityKind::Rental => "rental",
            EntityKind::Catalog => "catalog",
            EntityKind::Offer => "offer",
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
