//! # Engine Configuration
//!
//! Configuration management for the allocation engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     FLEET_HEALTH_THRESHOLD=55                                          │
//! │     FLEET_MAINTENANCE_POLICY=exclude                                   │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/fleet/engine.toml (Linux)                                │
//! │     ~/Library/Application Support/com.consolefleet.fleet/engine.toml   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     threshold 60, maintenance counts for future ranges                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # engine.toml
//! [lifecycle]
//! health_maintenance_threshold = 60
//!
//! [availability]
//! maintenance_policy = "count_for_future_ranges"  # or "exclude"
//!
//! [pricing]
//! default_max_controllers = 4
//!
//! [pricing.fallback_rates]
//! dailyRate = 500
//! weeklyRate = 3000
//! monthlyRate = 10000
//! controllerDailyRate = 100
//! controllerWeeklyRate = 500
//! controllerMonthlyRate = 1500
//!
//! [fallback]
//! mirror_path = "/var/lib/fleet/mirror.json"
//! max_pending_entries = 1000
//!
//! [retry]
//! initial_backoff_ms = 200
//! max_backoff_ms = 5000
//! max_elapsed_ms = 30000
//!
//! [database]
//! path = "/var/lib/fleet/fleet.db"
//! max_connections = 5
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use fleet_core::availability::MaintenancePolicy;
use fleet_core::validation::validate_rates;
use fleet_core::MAX_BUNDLED_CONTROLLERS;
use fleet_core::{
    RateTable, ValidationFailed, DEFAULT_HEALTH_MAINTENANCE_THRESHOLD, DEFAULT_MAX_CONTROLLERS,
    MAX_HEALTH,
};

use crate::error::{FleetError, FleetResult};

// =============================================================================
// Sections
// =============================================================================

/// Device lifecycle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleSettings {
    /// A `Ready` unit whose health is edited below this value moves to
    /// `Maintenance`.
    #[serde(default = "default_threshold")]
    pub health_maintenance_threshold: u8,
}

fn default_threshold() -> u8 {
    DEFAULT_HEALTH_MAINTENANCE_THRESHOLD
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        LifecycleSettings {
            health_maintenance_threshold: default_threshold(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AvailabilitySettings {
    #[serde(default)]
    pub maintenance_policy: MaintenancePolicy,
}

/// Pricing used when a category has no catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingSettings {
    #[serde(default = "default_max_controllers")]
    pub default_max_controllers: u32,

    #[serde(default)]
    pub fallback_rates: RateTable,
}

fn default_max_controllers() -> u32 {
    DEFAULT_MAX_CONTROLLERS
}

impl Default for PricingSettings {
    fn default() -> Self {
        PricingSettings {
            fallback_rates: RateTable::fallback(),
            default_max_controllers: default_max_controllers(),
        }
    }
}

/// Local fallback mirror settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackSettings {
    /// Where the mirror snapshot is persisted. `None` keeps it in memory.
    #[serde(default)]
    pub mirror_path: Option<PathBuf>,

    /// Upper bound on locally pending writes. Past it, fallback writes fail
    /// with `PersistenceFailed`.
    #[serde(default = "default_max_pending")]
    pub max_pending_entries: usize,
}

fn default_max_pending() -> usize {
    1000
}

impl Default for FallbackSettings {
    fn default() -> Self {
        FallbackSettings {
            mirror_path: None,
            max_pending_entries: default_max_pending(),
        }
    }
}

/// Backoff for retrying transient store failures (category rename).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Total time budget across all attempts.
    #[serde(default = "default_max_elapsed")]
    pub max_elapsed_ms: u64,
}

fn default_initial_backoff() -> u64 {
    200
}
fn default_max_backoff() -> u64 {
    5_000
}
fn default_max_elapsed() -> u64 {
    30_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            max_elapsed_ms: default_max_elapsed(),
        }
    }
}

impl RetrySettings {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn max_elapsed(&self) -> Duration {
        Duration::from_millis(self.max_elapsed_ms)
    }
}

/// SQLite primary store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Database file. `None` means `<data dir>/fleet.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: None,
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseSettings {
    /// The configured path, or the platform data directory.
    pub fn resolved_path(&self) -> FleetResult<PathBuf> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        project_dirs()
            .map(|dirs| dirs.data_dir().join("fleet.db"))
            .ok_or_else(|| FleetError::InvalidConfig("No database path available".into()))
    }
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub lifecycle: LifecycleSettings,

    #[serde(default)]
    pub availability: AvailabilitySettings,

    #[serde(default)]
    pub pricing: PricingSettings,

    #[serde(default)]
    pub fallback: FallbackSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (engine.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> FleetResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> FleetResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| FleetError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| FleetError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| FleetError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> FleetResult<()> {
        if self.lifecycle.health_maintenance_threshold > MAX_HEALTH {
            return Err(FleetError::InvalidConfig(format!(
                "health_maintenance_threshold must be at most {}, got {}",
                MAX_HEALTH, self.lifecycle.health_maintenance_threshold
            )));
        }

        let mut failed = ValidationFailed::new();
        validate_rates(&self.pricing.fallback_rates, &mut failed);
        if !failed.is_empty() {
            return Err(FleetError::InvalidConfig(format!("fallback_rates: {failed}")));
        }

        if self.pricing.default_max_controllers == 0
            || self.pricing.default_max_controllers > MAX_BUNDLED_CONTROLLERS
        {
            return Err(FleetError::InvalidConfig(format!(
                "default_max_controllers must be between 1 and {MAX_BUNDLED_CONTROLLERS}"
            )));
        }

        if self.fallback.max_pending_entries == 0 {
            return Err(FleetError::InvalidConfig(
                "max_pending_entries must be greater than 0".into(),
            ));
        }

        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(FleetError::InvalidConfig(
                "initial_backoff_ms must not exceed max_backoff_ms".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("FLEET_HEALTH_THRESHOLD") {
            match value.parse::<u8>() {
                Ok(threshold) => {
                    debug!(threshold, "Overriding health threshold from environment");
                    self.lifecycle.health_maintenance_threshold = threshold;
                }
                Err(_) => warn!(value = %value, "Ignoring unparsable FLEET_HEALTH_THRESHOLD"),
            }
        }

        if let Ok(policy) = std::env::var("FLEET_MAINTENANCE_POLICY") {
            match policy.to_lowercase().as_str() {
                "count_for_future_ranges" | "count" => {
                    self.availability.maintenance_policy = MaintenancePolicy::CountForFutureRanges
                }
                "exclude" => self.availability.maintenance_policy = MaintenancePolicy::Exclude,
                _ => warn!(policy = %policy, "Unknown maintenance policy in environment"),
            }
        }

        if let Ok(path) = std::env::var("FLEET_MIRROR_PATH") {
            debug!(path = %path, "Overriding mirror path from environment");
            self.fallback.mirror_path = Some(PathBuf::from(path));
        }

        if let Ok(value) = std::env::var("FLEET_MAX_PENDING") {
            if let Ok(max) = value.parse::<usize>() {
                self.fallback.max_pending_entries = max;
            }
        }

        if let Ok(path) = std::env::var("FLEET_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("engine.toml"))
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "consolefleet", "fleet")
}
