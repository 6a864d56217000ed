//! # Quoting
//!
//! Prices a booking from the cached catalog and offers. A category with no
//! catalog entry (and no prefix match) is priced from the configured
//! fallback table instead of failing.

use chrono::{DateTime, Utc};
use tracing::debug;

use fleet_core::catalog::CatalogMatch;
use fleet_core::pricing::{price_with, Quote, QuoteRequest};
use fleet_core::{CatalogPatch, CatalogSettings};

use crate::catalog::CatalogSnapshot;
use crate::error::FleetResult;
use crate::FleetEngine;

impl FleetEngine {
    /// Quotes a booking.
    ///
    /// ## Errors
    /// Only `ControllerLimitExceeded`. Unknown, inactive or ineligible offer
    /// codes are ignored, and an unreadable catalog prices with fallback rates.
    pub async fn quote(&self, request: &QuoteRequest) -> FleetResult<Quote> {
        let snapshot = self.catalog.snapshot().await;
        self.quote_with(&snapshot, request, self.clock.now())
    }

    pub(crate) fn quote_with(
        &self,
        snapshot: &CatalogSnapshot,
        request: &QuoteRequest,
        now: DateTime<Utc>,
    ) -> FleetResult<Quote> {
        let matched = snapshot.lookup(&request.category);
        if !matched.is_missing() {
            return Ok(price_with(matched, &snapshot.offers, request, now)?);
        }

        let fallback = self.fallback_settings(&request.category, now);
        let mut quote = price_with(CatalogMatch::Exact(&fallback), &snapshot.offers, request, now)?;
        quote.matched_category = None;
        quote.used_fallback_rates = true;

        debug!(category = %request.category, total = quote.total_price, "Quoted with fallback rates");
        Ok(quote)
    }

    /// Settings standing in for a category the catalog does not know.
    fn fallback_settings(&self, category: &str, now: DateTime<Utc>) -> CatalogSettings {
        let pricing = &self.config.pricing;
        let patch = CatalogPatch {
            max_controllers: Some(pricing.default_max_controllers),
            extra_controller_enabled: Some(true),
            rates: Some(pricing.fallback_rates),
            ..Default::default()
        };
        patch.into_new_settings(category, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::store::MemoryStore;
    use fleet_core::{NewOffer, RateTable, RentalPlan};
    use std::sync::Arc;

    fn engine() -> FleetEngine {
        FleetEngine::new(Arc::new(MemoryStore::new()), EngineConfig::default())
    }

    #[tokio::test]
    async fn test_unknown_category_uses_configured_fallback() {
        let mut config = EngineConfig::default();
        config.pricing.fallback_rates.daily_rate = 700;
        let engine = FleetEngine::new(Arc::new(MemoryStore::new()), config);

        let quote = engine
            .quote(&QuoteRequest::new("Steam Deck", RentalPlan::Daily, 1))
            .await
            .unwrap();
        assert_eq!(quote.base_price, 700);
        assert!(quote.used_fallback_rates);
        assert_eq!(quote.matched_category, None);
    }

    #[tokio::test]
    async fn test_catalog_rates_and_offer() {
        let engine = engine();
        let mut rates = RateTable::fallback();
        rates.weekly_rate = 2800;
        rates.controller_weekly_rate = 400;
        engine
            .catalog()
            .upsert_settings("PS5", CatalogPatch::rates(rates))
            .await
            .unwrap();
        engine
            .catalog()
            .create_offer(NewOffer::percentage("WEEK10", 10))
            .await
            .unwrap();

        let request = QuoteRequest::new("PS5", RentalPlan::Weekly, 3).with_offer("week10");
        let quote = engine.quote(&request).await.unwrap();
        assert_eq!(quote.base_price, 2800);
        assert_eq!(quote.add_on_price, 800);
        assert_eq!(quote.discount_applied, 360);
        assert_eq!(quote.total_price, 3240);

        // Re-quoting gives the same answer.
        assert_eq!(engine.quote(&request).await.unwrap(), quote);
    }

    #[tokio::test]
    async fn test_controller_limit_from_config_applies_to_fallback() {
        let mut config = EngineConfig::default();
        config.pricing.default_max_controllers = 2;
        let engine = FleetEngine::new(Arc::new(MemoryStore::new()), config);

        let err = engine
            .quote(&QuoteRequest::new("Mystery", RentalPlan::Daily, 3))
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_rule(),
            Some(fleet_core::CoreError::ControllerLimitExceeded { requested: 3, max: 2 })
        ));
    }
}
