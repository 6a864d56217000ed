//! # Fleet Engine
//!
//! The orchestrator every caller goes through. It owns the store handle, the
//! catalog service, the clock and the assignment lock; the operations
//! themselves live in [`pricing`](crate::pricing),
//! [`availability`](crate::availability), [`devices`](crate::devices) and
//! [`rentals`](crate::rentals).
//!
//! ## Booking Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  BookingRequest                                                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  available_devices (read)  ──► quote (catalog + offers)                 │
//! │                                   │                                     │
//! │                                   ▼                                     │
//! │                    ┌──── assign_lock ─────────────────┐                 │
//! │                    │ pick device, re-check, write     │                 │
//! │                    └──────────────┬───────────────────┘                 │
//! │                                   ▼                                     │
//! │                     FleetStore (FallbackStore → primary | mirror)       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use fleet_db::{Database, DbConfig};

use crate::catalog::CatalogService;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{FleetError, FleetResult, StoreError, StoreResult};
use crate::fallback::{FallbackStore, LocalMirror, PendingWrite};
use crate::store::{FleetStore, SqliteStore};

/// Rental fleet allocation engine.
pub struct FleetEngine {
    pub(crate) store: Arc<dyn FleetStore>,
    pub(crate) fallback: Option<Arc<FallbackStore>>,
    pub(crate) catalog: CatalogService,
    pub(crate) config: EngineConfig,
    pub(crate) clock: Arc<dyn Clock>,
    /// Serialises the check-then-bind section of assignment and release.
    pub(crate) assign_lock: Mutex<()>,
}

impl FleetEngine {
    /// Engine over any store, without a fallback mirror.
    pub fn new(store: Arc<dyn FleetStore>, config: EngineConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        FleetEngine {
            catalog: CatalogService::new(store.clone(), config.retry.clone(), clock.clone()),
            store,
            fallback: None,
            config,
            clock,
            assign_lock: Mutex::new(()),
        }
    }

    /// Engine whose writes fall back to a local mirror.
    pub fn with_fallback(fallback: Arc<FallbackStore>, config: EngineConfig) -> Self {
        let store: Arc<dyn FleetStore> = fallback.clone();
        let mut engine = Self::new(store, config);
        engine.fallback = Some(fallback);
        engine
    }

    /// Replaces the clock (tests pin time with [`FixedClock`](crate::clock::FixedClock)).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.catalog = CatalogService::new(self.store.clone(), self.config.retry.clone(), clock.clone());
        self.clock = clock;
        self
    }

    /// Opens the SQLite primary and the configured mirror.
    ///
    /// ## What This Does
    /// 1. Validates the configuration
    /// 2. Connects to SQLite (running migrations)
    /// 3. Loads the mirror snapshot when `fallback.mirror_path` is set
    /// 4. Wires primary and mirror into a [`FallbackStore`]
    pub async fn open(config: EngineConfig) -> FleetResult<Self> {
        config.validate()?;

        let path = config.database.resolved_path()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                FleetError::InvalidConfig(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let db_config = DbConfig::new(&path).max_connections(config.database.max_connections);
        let db = Database::new(db_config).await.map_err(StoreError::from)?;

        let max_pending = config.fallback.max_pending_entries;
        let mirror = match &config.fallback.mirror_path {
            Some(mirror_path) => LocalMirror::open(mirror_path, max_pending)?,
            None => LocalMirror::new(max_pending),
        };

        info!(
            database = %path.display(),
            mirror = ?config.fallback.mirror_path,
            "Fleet engine opened"
        );

        let fallback = Arc::new(FallbackStore::new(Arc::new(SqliteStore::new(db)), mirror));
        Ok(Self::with_fallback(fallback, config))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &CatalogService {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<dyn FleetStore> {
        &self.store
    }

    pub fn fallback(&self) -> Option<&Arc<FallbackStore>> {
        self.fallback.as_ref()
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    // =========================================================================
    // Fallback administration
    // =========================================================================

    /// Writes waiting in the local mirror. Empty without a fallback.
    pub async fn pending_writes(&self) -> Vec<PendingWrite> {
        match &self.fallback {
            Some(fallback) => fallback.pending().await,
            None => Vec::new(),
        }
    }

    /// Marks mirrored writes as reconciled by hand.
    pub async fn acknowledge_pending(&self, seqs: &[u64]) -> StoreResult<usize> {
        let acknowledged = match &self.fallback {
            Some(fallback) => fallback.acknowledge(seqs).await?,
            None => 0,
        };
        self.catalog.invalidate().await;
        Ok(acknowledged)
    }
}

impl std::fmt::Debug for FleetEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetEngine")
            .field("fallback", &self.fallback.is_some())
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
