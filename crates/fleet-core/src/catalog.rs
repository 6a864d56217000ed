//! # Catalog Matching
//!
//! Maps a free-text category label onto a catalog entry.
//!
//! ## Two-Step Lookup
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  lookup(catalog, "PS5 Pro Digital")                                    │
//! │                                                                         │
//! │  1. Exact (trimmed, case-insensitive)                                  │
//! │     "ps5 pro digital" == key?          ──► CatalogMatch::Exact          │
//! │                                                                         │
//! │  2. Prefix token                                                        │
//! │     key tokens are a leading run of the requested tokens               │
//! │     ["PS5","Pro"] ⊑ ["PS5","Pro","Digital"]  ──► CatalogMatch::Prefix   │
//! │     longest key wins; "PS5" loses to "PS5 Pro"                          │
//! │                                                                         │
//! │  3. Nothing                            ──► CatalogMatch::Missing        │
//! │     callers quote with RateTable::fallback()                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only a catalog key can be a prefix of the request, never the reverse:
//! asking for "PS5" never lands on a "PS5 Pro" entry.

use crate::error::{CoreError, CoreResult};
use crate::types::{CatalogSettings, RateTable};
use crate::validation::validate_category;
use crate::DEFAULT_MAX_CONTROLLERS;

/// Compares two category labels the way every lookup does.
///
/// ## Example
/// ```rust
/// use fleet_core::catalog::same_category;
///
/// assert!(same_category(" PS5 ", "ps5"));
/// assert!(!same_category("PS5", "PS5 Pro"));
/// ```
pub fn same_category(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

fn tokens(label: &str) -> Vec<String> {
    label.split_whitespace().map(str::to_lowercase).collect()
}

// =============================================================================
// Catalog Match
// =============================================================================

/// Outcome of resolving a category label against the catalog.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CatalogMatch<'a> {
    /// The label names an entry directly.
    Exact(&'a CatalogSettings),
    /// An entry's key is a leading token run of the label.
    Prefix(&'a CatalogSettings),
    /// No entry applies.
    Missing,
}

impl<'a> CatalogMatch<'a> {
    pub fn settings(&self) -> Option<&'a CatalogSettings> {
        match self {
            CatalogMatch::Exact(s) | CatalogMatch::Prefix(s) => Some(s),
            CatalogMatch::Missing => None,
        }
    }

    /// Key of the entry that answered, if any.
    pub fn matched_category(&self) -> Option<&'a str> {
        self.settings().map(|s| s.device_category.as_str())
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, CatalogMatch::Missing)
    }

    /// Rates to quote with; the fallback table when nothing matched.
    pub fn rates(&self) -> RateTable {
        self.settings()
            .map(|s| s.rates)
            .unwrap_or_else(RateTable::fallback)
    }

    pub fn max_controllers(&self) -> u32 {
        self.settings()
            .map(|s| s.max_controllers)
            .unwrap_or(DEFAULT_MAX_CONTROLLERS)
    }

    pub fn extra_controller_enabled(&self) -> bool {
        self.settings()
            .map(|s| s.extra_controller_enabled)
            .unwrap_or(true)
    }
}

/// Exact (trimmed, case-insensitive) lookup.
pub fn find_exact<'a>(catalog: &'a [CatalogSettings], category: &str) -> Option<&'a CatalogSettings> {
    catalog
        .iter()
        .find(|s| same_category(&s.device_category, category))
}

/// Resolves `category` with the exact-then-prefix rule.
pub fn lookup<'a>(catalog: &'a [CatalogSettings], category: &str) -> CatalogMatch<'a> {
    if let Some(settings) = find_exact(catalog, category) {
        return CatalogMatch::Exact(settings);
    }

    let wanted = tokens(category);
    if wanted.len() < 2 {
        return CatalogMatch::Missing;
    }

    catalog
        .iter()
        .filter_map(|settings| {
            let key = tokens(&settings.device_category);
            let is_prefix =
                !key.is_empty() && key.len() < wanted.len() && wanted.starts_with(&key);
            is_prefix.then_some((key.len(), settings))
        })
        // Longest key first, then alphabetical for a stable answer.
        .max_by(|(len_a, a), (len_b, b)| {
            len_a
                .cmp(len_b)
                .then_with(|| b.device_category.cmp(&a.device_category))
        })
        .map(|(_, settings)| CatalogMatch::Prefix(settings))
        .unwrap_or(CatalogMatch::Missing)
}

// =============================================================================
// Rename Rules
// =============================================================================

/// Checks whether `old` may be renamed to `new`.
///
/// ## Rules
/// - `new` must be a valid category label
/// - `new` must not already exist as a *different* entry
/// - A case-only change of the same entry is allowed
///
/// Whether `old` exists is the caller's concern.
pub fn check_rename(catalog: &[CatalogSettings], old: &str, new: &str) -> CoreResult<()> {
    validate_category(new)?;

    if same_category(old, new) {
        return Ok(());
    }

    if find_exact(catalog, new).is_some() {
        return Err(CoreError::CategoryRenameConflict {
            name: new.trim().to_string(),
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
    use chrono::Utc;

    fn entry(key: &str, daily: i64) -> CatalogSettings {
        let mut s = CatalogSettings::with_defaults(key, Utc::now());
        s.rates.daily_rate = daily;
        s
    }

    #[test]
    fn test_exact_match_ignores_case_and_whitespace() {
        let catalog = vec![entry("PS5", 500)];
        let m = lookup(&catalog, "  ps5 ");
        assert!(matches!(m, CatalogMatch::Exact(_)));
        assert_eq!(m.rates().daily_rate, 500);
    }

    #[test]
    fn test_prefix_token_fallback_picks_longest_key() {
        let catalog = vec![entry("PS5", 500), entry("PS5 Pro", 800)];

        let m = lookup(&catalog, "PS5 Pro Digital");
        assert!(matches!(m, CatalogMatch::Prefix(_)));
        assert_eq!(m.matched_category(), Some("PS5 Pro"));

        let m = lookup(&catalog, "PS5 Slim");
        assert_eq!(m.matched_category(), Some("PS5"));
    }

    #[test]
    fn test_shorter_request_does_not_match_longer_key() {
        let catalog = vec![entry("PS5 Pro", 800)];
        let m = lookup(&catalog, "PS5");
        assert!(m.is_missing());
        assert_eq!(m.rates(), RateTable::fallback());
        assert_eq!(m.max_controllers(), DEFAULT_MAX_CONTROLLERS);
        assert!(m.extra_controller_enabled());
    }

    #[test]
    fn test_partial_token_is_not_a_prefix() {
        let catalog = vec![entry("PS", 100)];
        assert!(lookup(&catalog, "PS5 Pro").is_missing());
    }

    #[test]
    fn test_rename_conflict() {
        let catalog = vec![entry("PS5", 500), entry("Switch", 300)];

        assert!(check_rename(&catalog, "PS5", "PS5 Pro").is_ok());
        assert!(check_rename(&catalog, "PS5", "ps5").is_ok());
        assert_eq!(
            check_rename(&catalog, "PS5", "switch"),
            Err(CoreError::CategoryRenameConflict {
                name: "switch".to_string()
            })
        );
        assert!(matches!(
            check_rename(&catalog, "PS5", "  "),
            Err(CoreError::Validation(_))
        ));
    }
}
