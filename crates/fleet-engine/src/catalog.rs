//! # Catalog Service
//!
//! Owns the cached catalog and offer lists. Every pricing and booking call
//! reads through here; admin writes go to the store and then drop the cache.
//!
//! ## Cache Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   snapshot() ──► cached? ──yes──► Arc<CatalogSnapshot>                 │
//! │                     │                                                   │
//! │                     no                                                  │
//! │                     ▼                                                   │
//! │                refresh() ──Ok──► cache + return                         │
//! │                     │                                                   │
//! │                     └──Err──► empty snapshot, NOT cached                │
//! │                               (quotes fall back to the default table)  │
//! │                                                                         │
//! │   upsert_settings / ensure_category / rename_category /                 │
//! │   create_offer / set_offer_active ──► store write ──► invalidate()      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use fleet_core::catalog::{check_rename, find_exact, lookup, CatalogMatch};
use fleet_core::pricing::find_offer;
use fleet_core::validation::{validate_catalog_settings, validate_category, validate_new_offer};
use fleet_core::{
    CatalogPatch, CatalogSettings, CoreError, EntityKind, NewOffer, OfferPatch, PromotionalOffer,
    ValidationError,
};

use crate::clock::Clock;
use crate::config::RetrySettings;
use crate::error::{FleetError, FleetResult, StoreError};
use crate::store::FleetStore;

// =============================================================================
// Snapshot
// =============================================================================

/// Catalog and offers as read at one point in time.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    pub catalog: Vec<CatalogSettings>,
    pub offers: Vec<PromotionalOffer>,
}

impl CatalogSnapshot {
    /// Exact-then-prefix resolution of a category label.
    pub fn lookup(&self, category: &str) -> CatalogMatch<'_> {
        lookup(&self.catalog, category)
    }
}

/// Owned result of [`CatalogService::lookup`].
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedCategory {
    Exact(CatalogSettings),
    Prefix(CatalogSettings),
    Missing,
}

impl ResolvedCategory {
    pub fn settings(&self) -> Option<&CatalogSettings> {
        match self {
            ResolvedCategory::Exact(s) | ResolvedCategory::Prefix(s) => Some(s),
            ResolvedCategory::Missing => None,
        }
    }
}

impl From<CatalogMatch<'_>> for ResolvedCategory {
    fn from(matched: CatalogMatch<'_>) -> Self {
        match matched {
            CatalogMatch::Exact(s) => ResolvedCategory::Exact(s.clone()),
            CatalogMatch::Prefix(s) => ResolvedCategory::Prefix(s.clone()),
            CatalogMatch::Missing => ResolvedCategory::Missing,
        }
    }
}

// =============================================================================
// Service
// =============================================================================

pub struct CatalogService {
    store: Arc<dyn FleetStore>,
    cache: RwLock<Option<Arc<CatalogSnapshot>>>,
    retry: RetrySettings,
    clock: Arc<dyn Clock>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn FleetStore>, retry: RetrySettings, clock: Arc<dyn Clock>) -> Self {
        CatalogService {
            store,
            cache: RwLock::new(None),
            retry,
            clock,
        }
    }

    /// The cached snapshot, loading it first if needed.
    ///
    /// A failed load returns an empty snapshot and leaves the cache empty,
    /// so the next call tries again.
    pub async fn snapshot(&self) -> Arc<CatalogSnapshot> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            return cached.clone();
        }

        match self.refresh().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "Catalog unavailable, pricing with fallback rates");
                Arc::new(CatalogSnapshot::default())
            }
        }
    }

    /// Reloads catalog and offers from the store.
    pub async fn refresh(&self) -> FleetResult<Arc<CatalogSnapshot>> {
        let catalog = self.store.read_catalog().await?;
        let offers = self.store.read_offers().await?;
        debug!(categories = catalog.len(), offers = offers.len(), "Catalog refreshed");

        let snapshot = Arc::new(CatalogSnapshot { catalog, offers });
        *self.cache.write().await = Some(snapshot.clone());
        Ok(snapshot)
    }

    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    pub async fn list_categories(&self) -> Vec<CatalogSettings> {
        self.snapshot().await.catalog.clone()
    }

    pub async fn lookup(&self, category: &str) -> ResolvedCategory {
        self.snapshot().await.lookup(category).into()
    }

    // =========================================================================
    // Catalog administration
    // =========================================================================

    /// Creates or updates a category's settings.
    pub async fn upsert_settings(
        &self,
        category: &str,
        patch: CatalogPatch,
    ) -> FleetResult<CatalogSettings> {
        validate_category(category)?;

        let now = self.clock.now();
        let snapshot = self.snapshot().await;
        let candidate = match find_exact(&snapshot.catalog, category) {
            Some(existing) => {
                let mut updated = existing.clone();
                patch.apply(&mut updated, now);
                updated
            }
            None => patch.into_new_settings(category, now),
        };
        validate_catalog_settings(&candidate)?;

        let stored = self.store.write_catalog(category.trim(), &patch).await;
        self.invalidate().await;
        let stored = stored?;

        info!(category = %stored.device_category, version = stored.sync_version, "Catalog settings saved");
        Ok(stored)
    }

    /// Returns the category's settings, creating them with defaults if the
    /// category has never been seen.
    pub async fn ensure_category(&self, category: &str) -> FleetResult<CatalogSettings> {
        validate_category(category)?;

        if let Some(existing) = find_exact(&self.snapshot().await.catalog, category) {
            return Ok(existing.clone());
        }

        let created = self
            .store
            .write_catalog(category.trim(), &CatalogPatch::default())
            .await;
        self.invalidate().await;
        let created = created?;

        info!(category = %created.device_category, "Category created with default settings");
        Ok(created)
    }

    /// Renames a category and retargets every device carrying the old label.
    ///
    /// Transient store failures are retried with exponential backoff; the
    /// store applies each attempt all or nothing.
    ///
    /// ## Errors
    /// - `NotFound` when `old` has no catalog entry
    /// - `CategoryRenameConflict` when `new` is a different existing entry
    pub async fn rename_category(&self, old: &str, new: &str) -> FleetResult<CatalogSettings> {
        let snapshot = self.refresh().await?;
        if find_exact(&snapshot.catalog, old).is_none() {
            return Err(FleetError::not_found(EntityKind::Catalog, old.trim()));
        }
        check_rename(&snapshot.catalog, old, new)?;

        let mut backoff = self.backoff();
        let result = loop {
            match self.store.rename_catalog(old.trim(), new.trim()).await {
                Ok(renamed) => break Ok(renamed),
                Err(err) if err.is_retryable() => match backoff.next_backoff() {
                    Some(wait) => {
                        warn!(from = %old, to = %new, error = %err, ?wait, "Category rename failed, retrying");
                        tokio::time::sleep(wait).await;
                    }
                    None => break Err(FleetError::from(err)),
                },
                Err(StoreError::Duplicate { value, .. }) => {
                    break Err(FleetError::from(CoreError::CategoryRenameConflict { name: value }))
                }
                Err(err) => break Err(FleetError::from(err)),
            }
        };

        self.invalidate().await;
        let renamed = result?;
        info!(from = %old, to = %renamed.device_category, "Category renamed");
        Ok(renamed)
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.retry.initial_backoff(),
            max_interval: self.retry.max_backoff(),
            multiplier: 2.0,
            max_elapsed_time: Some(self.retry.max_elapsed()),
            ..Default::default()
        }
    }

    // =========================================================================
    // Offers
    // =========================================================================

    pub async fn list_offers(&self) -> Vec<PromotionalOffer> {
        self.snapshot().await.offers.clone()
    }

    /// Creates a promotional offer. Codes are unique ignoring case.
    pub async fn create_offer(&self, new: NewOffer) -> FleetResult<PromotionalOffer> {
        validate_new_offer(&new)?;

        let snapshot = self.snapshot().await;
        if find_offer(&snapshot.offers, &new.code).is_some() {
            return Err(ValidationError::Duplicate {
                field: "code".into(),
                value: new.code.trim().to_string(),
            }
            .into());
        }

        let offer = PromotionalOffer::from_new(uuid::Uuid::new_v4().to_string(), new, self.clock.now());
        let stored = self.store.insert_offer(&offer).await;
        self.invalidate().await;
        let stored = stored?;

        info!(code = %stored.code, "Offer created");
        Ok(stored)
    }

    /// Turns an offer on or off. Offers are never deleted.
    pub async fn set_offer_active(&self, code: &str, active: bool) -> FleetResult<PromotionalOffer> {
        let updated = self.store.write_offer(code.trim(), &OfferPatch::active(active)).await;
        self.invalidate().await;
        let updated = updated?;

        info!(code = %updated.code, active, "Offer toggled");
        Ok(updated)
    }
}
