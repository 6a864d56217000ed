//! # Tracing Setup
//!
//! Installs a `tracing-subscriber` formatter for hosts embedding the engine.
//!
//! ## Filter
//! `RUST_LOG` wins when set; otherwise [`DEFAULT_FILTER`] applies, which keeps
//! sqlx statement logging quiet and engine decisions visible.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,fleet_engine=debug,fleet_db=debug,sqlx=warn";

/// Installs the global subscriber.
///
/// Calling it twice is harmless: the second call finds a subscriber already
/// set and leaves it in place.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
