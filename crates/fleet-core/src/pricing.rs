//! # Pricing
//!
//! Derives a quote from catalog settings, offers and a request.
//!
//! ## Quote Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  QuoteRequest { category, plan, controllers, offer_code?, days? }      │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  1. catalog::lookup  (exact ─► prefix ─► fallback table)               │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  2. base     = rate_for(plan)                                           │
//! │  3. add_on   = max(0, controllers - 1) × controller_rate_for(plan)     │
//! │               only when extra controllers are enabled                   │
//! │               controllers > max ──► ControllerLimitExceeded             │
//! │  4. subtotal = base + add_on                                            │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  5. offer: active? code? category? window? min days?                    │
//! │        any "no" ──► no discount (never an error)                        │
//! │        percentage ──► subtotal × (1 - v/100), half-up                   │
//! │        fixed      ──► subtotal - v, floored at 0                        │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  6. total_price  (persisted verbatim as Rental.total_price)             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`quote`] is a pure function of its inputs: the same catalog, offers,
//! request and instant always give the same quote.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::catalog::{lookup, CatalogMatch};
use crate::error::{CoreError, CoreResult, ValidationError, ValidationFailed};
use crate::money::Money;
use crate::types::{CatalogSettings, DiscountType, PromotionalOffer, RentalPlan};

// =============================================================================
// Request / Result
// =============================================================================

/// What the storefront asks a price for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub category: String,
    pub plan: RentalPlan,
    /// Total controllers including the one in the box.
    pub controller_count: u32,
    pub offer_code: Option<String>,
    /// Rental length checked against an offer's `min_rental_days`.
    /// Defaults to the plan's nominal length.
    pub duration_days: Option<u32>,
}

impl QuoteRequest {
    pub fn new(category: impl Into<String>, plan: RentalPlan, controller_count: u32) -> Self {
        QuoteRequest {
            category: category.into(),
            plan,
            controller_count,
            offer_code: None,
            duration_days: None,
        }
    }

    pub fn with_offer(mut self, code: impl Into<String>) -> Self {
        self.offer_code = Some(code.into());
        self
    }

    pub fn with_duration_days(mut self, days: u32) -> Self {
        self.duration_days = Some(days);
        self
    }

    /// Days used for offer eligibility.
    pub fn effective_days(&self) -> u32 {
        self.duration_days.unwrap_or_else(|| self.plan.days())
    }
}

/// A priced booking.
///
/// The four integer fields are the storefront contract; the rest explains
/// how they were reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub category: String,
    pub plan: RentalPlan,
    /// Catalog key that supplied the rates (`None` = fallback table).
    pub matched_category: Option<String>,
    pub used_fallback_rates: bool,
    pub base_price: i64,
    pub add_on_price: i64,
    pub discount_applied: i64,
    pub total_price: i64,
    /// Code of the offer that was applied, as stored.
    pub applied_offer: Option<String>,
}

impl Quote {
    pub fn subtotal(&self) -> i64 {
        self.base_price + self.add_on_price
    }
}

// =============================================================================
// Offer Evaluation
// =============================================================================

/// Why an offer code did not apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferRejection {
    UnknownCode,
    Inactive,
    WrongCategory,
    OutsideWindow,
    TooShort,
}

/// Finds an offer by code, case-insensitively.
pub fn find_offer<'a>(offers: &'a [PromotionalOffer], code: &str) -> Option<&'a PromotionalOffer> {
    offers.iter().find(|o| o.code_matches(code))
}

/// Decides whether `code` applies to this booking.
///
/// The offer's category set is checked against both the requested label and
/// the catalog key it resolved to, so an offer scoped to "PS5" still applies
/// to a "PS5 Slim" booking priced from the "PS5" entry.
pub fn evaluate_offer<'a>(
    offers: &'a [PromotionalOffer],
    code: &str,
    request: &QuoteRequest,
    matched_category: Option<&str>,
    now: DateTime<Utc>,
) -> Result<&'a PromotionalOffer, OfferRejection> {
    let offer = find_offer(offers, code).ok_or(OfferRejection::UnknownCode)?;

    if !offer.is_active {
        return Err(OfferRejection::Inactive);
    }

    let category_ok = offer.applies_to(&request.category)
        || matched_category.map_or(false, |key| offer.applies_to(key));
    if !category_ok {
        return Err(OfferRejection::WrongCategory);
    }

    if !offer.is_within_window(now) {
        return Err(OfferRejection::OutsideWindow);
    }

    if request.effective_days() < offer.min_rental_days {
        return Err(OfferRejection::TooShort);
    }

    Ok(offer)
}

/// Price after applying `offer` to `subtotal`.
pub fn discounted(subtotal: Money, offer: &PromotionalOffer) -> Money {
    match offer.discount_type {
        DiscountType::Percentage => subtotal.apply_percentage_discount(offer.discount_value),
        DiscountType::Fixed => subtotal.saturating_discount(Money::from_units(offer.discount_value)),
    }
}

// =============================================================================
// Quote
// =============================================================================

/// Prices a booking.
///
/// ## Errors
/// Only `ControllerLimitExceeded`. Offer problems never fail a quote.
///
/// ## Example
/// ```rust
/// use chrono::Utc;
/// use fleet_core::pricing::{quote, QuoteRequest};
/// use fleet_core::types::{CatalogSettings, RentalPlan};
///
/// let mut ps5 = CatalogSettings::with_defaults("PS5", Utc::now());
/// ps5.rates.weekly_rate = 2800;
/// ps5.rates.controller_weekly_rate = 400;
///
/// let q = quote(&[ps5], &[], &QuoteRequest::new("PS5", RentalPlan::Weekly, 3), Utc::now()).unwrap();
/// assert_eq!(q.base_price, 2800);
/// assert_eq!(q.add_on_price, 800);
/// assert_eq!(q.total_price, 3600);
/// ```
pub fn quote(
    catalog: &[CatalogSettings],
    offers: &[PromotionalOffer],
    request: &QuoteRequest,
    now: DateTime<Utc>,
) -> CoreResult<Quote> {
    let matched = lookup(catalog, &request.category);
    price_with(matched, offers, request, now)
}

/// Prices a booking against an already resolved catalog match.
pub fn price_with(
    matched: CatalogMatch<'_>,
    offers: &[PromotionalOffer],
    request: &QuoteRequest,
    now: DateTime<Utc>,
) -> CoreResult<Quote> {
    let max = matched.max_controllers();
    if request.controller_count > max {
        return Err(CoreError::ControllerLimitExceeded {
            requested: request.controller_count,
            max,
        });
    }

    let rates = matched.rates();
    let base = rates.rate_for(request.plan);

    let add_on = if matched.extra_controller_enabled() {
        let extra = request.controller_count.saturating_sub(1) as i64;
        rates
            .controller_rate_for(request.plan)
            .checked_multiply_quantity(extra)
            .ok_or_else(|| price_overflow("addOnPrice"))?
    } else {
        Money::zero()
    };

    let subtotal = base
        .checked_add(add_on)
        .ok_or_else(|| price_overflow("totalPrice"))?;

    let applied = request
        .offer_code
        .as_deref()
        .filter(|code| !code.trim().is_empty())
        .and_then(|code| {
            evaluate_offer(offers, code, request, matched.matched_category(), now).ok()
        });

    let total = applied.map_or(subtotal, |offer| discounted(subtotal, offer));

    Ok(Quote {
        category: request.category.trim().to_string(),
        plan: request.plan,
        matched_category: matched.matched_category().map(String::from),
        used_fallback_rates: matched.is_missing(),
        base_price: base.units(),
        add_on_price: add_on.units(),
        discount_applied: (subtotal - total).units(),
        total_price: total.units(),
        applied_offer: applied.map(|o| o.code.clone()),
    })
}

fn price_overflow(field: &str) -> CoreError {
    CoreError::Validation(ValidationFailed::single(ValidationError::OutOfRange {
        field: field.to_string(),
        min: 0,
        max: i64::MAX,
    }))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewOffer;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn ps5() -> CatalogSettings {
        let mut s = CatalogSettings::with_defaults("PS5", now());
        s.rates.daily_rate = 500;
        s.rates.weekly_rate = 3000;
        s.rates.controller_daily_rate = 100;
        s.max_controllers = 4;
        s
    }

    fn offer(new: NewOffer) -> PromotionalOffer {
        PromotionalOffer::from_new(format!("id-{}", new.code), new, now())
    }

    #[test]
    fn test_scenario_single_day_quote() {
        let q = quote(&[ps5()], &[], &QuoteRequest::new("PS5", RentalPlan::Daily, 1), now()).unwrap();
        assert_eq!(q.base_price, 500);
        assert_eq!(q.add_on_price, 0);
        assert_eq!(q.discount_applied, 0);
        assert_eq!(q.total_price, 500);
        assert!(!q.used_fallback_rates);
    }

    #[test]
    fn test_controller_add_on_and_limit() {
        let q = quote(&[ps5()], &[], &QuoteRequest::new("PS5", RentalPlan::Daily, 3), now()).unwrap();
        assert_eq!(q.add_on_price, 200);
        assert_eq!(q.total_price, 700);

        let err = quote(&[ps5()], &[], &QuoteRequest::new("PS5", RentalPlan::Daily, 5), now()).unwrap_err();
        assert_eq!(err, CoreError::ControllerLimitExceeded { requested: 5, max: 4 });

        // Zero controllers is not negative add-on.
        let q = quote(&[ps5()], &[], &QuoteRequest::new("PS5", RentalPlan::Daily, 0), now()).unwrap();
        assert_eq!(q.add_on_price, 0);
    }

    #[test]
    fn test_add_on_disabled() {
        let mut s = ps5();
        s.extra_controller_enabled = false;
        let q = quote(&[s], &[], &QuoteRequest::new("PS5", RentalPlan::Daily, 3), now()).unwrap();
        assert_eq!(q.add_on_price, 0);
        assert_eq!(q.total_price, 500);
    }

    #[test]
    fn test_fallback_table_for_unknown_category() {
        let q = quote(&[ps5()], &[], &QuoteRequest::new("Steam Deck", RentalPlan::Monthly, 2), now()).unwrap();
        assert!(q.used_fallback_rates);
        assert_eq!(q.matched_category, None);
        assert_eq!(q.base_price, 10000);
        assert_eq!(q.add_on_price, 1500);
    }

    #[test]
    fn test_percentage_and_fixed_offers() {
        let offers = vec![
            offer(NewOffer::percentage("TEN", 10)),
            offer(NewOffer::fixed("FLAT900", 900)),
        ];

        let q = quote(
            &[ps5()],
            &offers,
            &QuoteRequest::new("PS5", RentalPlan::Daily, 2).with_offer("ten"),
            now(),
        )
        .unwrap();
        assert_eq!(q.discount_applied, 60);
        assert_eq!(q.total_price, 540);
        assert_eq!(q.applied_offer.as_deref(), Some("TEN"));

        let q = quote(
            &[ps5()],
            &offers,
            &QuoteRequest::new("PS5", RentalPlan::Daily, 1).with_offer("FLAT900"),
            now(),
        )
        .unwrap();
        assert_eq!(q.total_price, 0);
        assert_eq!(q.discount_applied, 500);
    }

    #[test]
    fn test_ineligible_offers_degrade_silently() {
        let mut inactive = offer(NewOffer::percentage("OFF", 50));
        inactive.is_active = false;
        let offers = vec![
            inactive,
            offer(NewOffer::percentage("SWITCHONLY", 50).for_categories(["Switch"])),
            offer(NewOffer::percentage("LONG", 50).min_days(7)),
            {
                let mut o = offer(NewOffer::percentage("EXPIRED", 50));
                o.valid_until = Some(now() - Duration::days(1));
                o
            },
        ];
        let plain = quote(&[ps5()], &[], &QuoteRequest::new("PS5", RentalPlan::Daily, 1), now()).unwrap();

        for code in ["NOPE", "OFF", "SWITCHONLY", "LONG", "EXPIRED", ""] {
            let q = quote(
                &[ps5()],
                &offers,
                &QuoteRequest::new("PS5", RentalPlan::Daily, 1).with_offer(code),
                now(),
            )
            .unwrap();
            assert_eq!(q.base_price, plain.base_price, "code {code}");
            assert_eq!(q.total_price, plain.total_price, "code {code}");
            assert!(q.applied_offer.is_none(), "code {code}");
        }
    }

    #[test]
    fn test_min_days_uses_explicit_duration() {
        let offers = vec![offer(NewOffer::percentage("LONG", 50).min_days(7))];
        let request = QuoteRequest::new("PS5", RentalPlan::Daily, 1)
            .with_offer("LONG")
            .with_duration_days(10);
        let q = quote(&[ps5()], &offers, &request, now()).unwrap();
        assert_eq!(q.total_price, 250);

        let weekly = QuoteRequest::new("PS5", RentalPlan::Weekly, 1).with_offer("LONG");
        let q = quote(&[ps5()], &offers, &weekly, now()).unwrap();
        assert_eq!(q.total_price, 1500);
    }

    #[test]
    fn test_offer_scoped_to_matched_catalog_key() {
        let offers = vec![offer(NewOffer::percentage("PSFAN", 20).for_categories(["PS5"]))];
        let q = quote(
            &[ps5()],
            &offers,
            &QuoteRequest::new("PS5 Slim", RentalPlan::Daily, 1).with_offer("PSFAN"),
            now(),
        )
        .unwrap();
        assert_eq!(q.matched_category.as_deref(), Some("PS5"));
        assert_eq!(q.total_price, 400);
    }

    #[test]
    fn test_quote_is_deterministic() {
        let offers = vec![offer(NewOffer::percentage("TEN", 10))];
        let request = QuoteRequest::new("ps5", RentalPlan::Weekly, 4).with_offer("TEN");
        let first = quote(&[ps5()], &offers, &request, now()).unwrap();
        for _ in 0..10 {
            assert_eq!(quote(&[ps5()], &offers, &request, now()).unwrap(), first);
        }
    }

    #[test]
    fn test_evaluate_offer_reports_reason() {
        let offers = vec![offer(NewOffer::percentage("LONG", 10).min_days(30))];
        let request = QuoteRequest::new("PS5", RentalPlan::Weekly, 1);
        assert_eq!(
            evaluate_offer(&offers, "long", &request, Some("PS5"), now()).unwrap_err(),
            OfferRejection::TooShort
        );
        assert_eq!(
            evaluate_offer(&offers, "missing", &request, Some("PS5"), now()).unwrap_err(),
            OfferRejection::UnknownCode
        );
    }

    #[test]
    fn test_rates_too_large_to_add_are_refused() {
        let mut settings = ps5();
        settings.rates.daily_rate = i64::MAX - 10;
        let request = QuoteRequest::new("PS5", RentalPlan::Daily, 2);

        let err = quote(&[settings], &[], &request, now()).unwrap_err();
        match err {
            CoreError::Validation(failed) => assert!(failed.for_field("totalPrice").is_some()),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
