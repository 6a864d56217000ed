//! # Catalog Repository
//!
//! Per-category settings, keyed case-insensitively by `device_category`.
//!
//! ## Rename In One Transaction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  rename("PS5", "PS5 Pro")                                              │
//! │                                                                         │
//! │  BEGIN                                                                  │
//! │    SELECT "PS5"                       missing ──► NotFound             │
//! │    SELECT "PS5 Pro" (distinct entry)  exists  ──► UniqueViolation      │
//! │    UPDATE catalog_settings  key "PS5" ──► "PS5 Pro"                    │
//! │    UPDATE devices           category "PS5" ──► "PS5 Pro"               │
//! │    UPDATE rentals (live)    category "PS5" ──► "PS5 Pro"               │
//! │  COMMIT                                                                 │
//! │                                                                         │
//! │  Any failure rolls back all three updates.                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::{decode_list, encode_list, to_u32};
use fleet_core::catalog::same_category;
use fleet_core::patch::version_matches;
use fleet_core::{CatalogPatch, CatalogSettings, RateTable};

const TABLE: &str = "catalog_settings";

const SELECT_COLUMNS: &str = r#"
    SELECT
        device_category, is_enabled, is_featured, max_controllers, extra_controller_enabled,
        daily_rate, weekly_rate, monthly_rate,
        controller_daily_rate, controller_weekly_rate, controller_monthly_rate,
        features, updated_at, sync_version
    FROM catalog_settings
"#;

#[derive(Debug, FromRow)]
struct CatalogRow {
    device_category: String,
    is_enabled: bool,
    is_featured: bool,
    max_controllers: i64,
    extra_controller_enabled: bool,
    daily_rate: i64,
    weekly_rate: i64,
    monthly_rate: i64,
    controller_daily_rate: i64,
    controller_weekly_rate: i64,
    controller_monthly_rate: i64,
    features: String,
    updated_at: DateTime<Utc>,
    sync_version: i64,
}

impl TryFrom<CatalogRow> for CatalogSettings {
    type Error = DbError;

    fn try_from(row: CatalogRow) -> DbResult<CatalogSettings> {
        Ok(CatalogSettings {
            max_controllers: to_u32(TABLE, "max_controllers", row.max_controllers)?,
            features: decode_list(TABLE, &row.features)?,
            device_category: row.device_category,
            is_enabled: row.is_enabled,
            is_featured: row.is_featured,
            extra_controller_enabled: row.extra_controller_enabled,
            rates: RateTable {
                daily_rate: row.daily_rate,
                weekly_rate: row.weekly_rate,
                monthly_rate: row.monthly_rate,
                controller_daily_rate: row.controller_daily_rate,
                controller_weekly_rate: row.controller_weekly_rate,
                controller_monthly_rate: row.controller_monthly_rate,
            },
            updated_at: row.updated_at,
            sync_version: row.sync_version,
        })
    }
}

async fn fetch_in(
    tx: &mut Transaction<'_, Sqlite>,
    category: &str,
) -> DbResult<Option<CatalogSettings>> {
    let sql = format!("{SELECT_COLUMNS} WHERE device_category = ?1 COLLATE NOCASE");
    let row: Option<CatalogRow> = sqlx::query_as(&sql)
        .bind(category.trim())
        .fetch_optional(&mut **tx)
        .await?;
    row.map(CatalogSettings::try_from).transpose()
}

/// Repository for catalog settings.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    /// Every catalog entry, ordered by category.
    pub async fn list(&self) -> DbResult<Vec<CatalogSettings>> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY device_category COLLATE NOCASE");
        let rows: Vec<CatalogRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(CatalogSettings::try_from).collect()
    }

    /// Exact (case-insensitive) lookup.
    pub async fn get(&self, category: &str) -> DbResult<Option<CatalogSettings>> {
        let sql = format!("{SELECT_COLUMNS} WHERE device_category = ?1 COLLATE NOCASE");
        let row: Option<CatalogRow> = sqlx::query_as(&sql)
            .bind(category.trim())
            .fetch_optional(&self.pool)
            .await?;
        row.map(CatalogSettings::try_from).transpose()
    }

    /// Applies `patch` to `category`, creating the entry with defaults if it
    /// does not exist yet.
    pub async fn upsert(&self, category: &str, patch: &CatalogPatch) -> DbResult<CatalogSettings> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let settings = match fetch_in(&mut tx, category).await? {
            Some(mut existing) => {
                let read_version = existing.sync_version;
                if !version_matches(patch.expected_version, read_version) {
                    return Err(DbError::VersionConflict {
                        entity: "CatalogSettings".to_string(),
                        id: existing.device_category,
                        expected: patch.expected_version.unwrap_or_default(),
                    });
                }
                patch.apply(&mut existing, now);
                debug!(category = %existing.device_category, "Updating catalog settings");
                write_row(&mut tx, &existing, Some(read_version)).await?;
                existing
            }
            None => {
                let created = patch.into_new_settings(category, now);
                info!(category = %created.device_category, "Creating catalog settings");
                write_row(&mut tx, &created, None).await?;
                created
            }
        };

        tx.commit().await?;
        Ok(settings)
    }

    /// Renames a category and retargets every device and live rental.
    ///
    /// ## Returns
    /// The entry under its new key.
    ///
    /// ## Errors
    /// * `NotFound` - `old` has no catalog entry
    /// * `UniqueViolation` - `new` already exists as a distinct entry
    pub async fn rename(&self, old: &str, new: &str) -> DbResult<CatalogSettings> {
        let (old, new) = (old.trim(), new.trim());
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let mut settings = fetch_in(&mut tx, old)
            .await?
            .ok_or_else(|| DbError::not_found("CatalogSettings", old))?;

        if !same_category(old, new) && fetch_in(&mut tx, new).await?.is_some() {
            return Err(DbError::duplicate("deviceCategory", new));
        }

        sqlx::query(
            r#"
            UPDATE catalog_settings
            SET device_category = ?2, updated_at = ?3, sync_version = sync_version + 1
            WHERE device_category = ?1 COLLATE NOCASE
            "#,
        )
        .bind(old)
        .bind(new)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let devices = sqlx::query(
            r#"
            UPDATE devices
            SET category = ?2, updated_at = ?3, sync_version = sync_version + 1
            WHERE category = ?1 COLLATE NOCASE
            "#,
        )
        .bind(old)
        .bind(new)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let rentals = sqlx::query(
            r#"
            UPDATE rentals
            SET category = ?2, updated_at = ?3, sync_version = sync_version + 1
            WHERE category = ?1 COLLATE NOCASE AND status IN ('active', 'overdue')
            "#,
        )
        .bind(old)
        .bind(new)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            from = %old,
            to = %new,
            devices = devices.rows_affected(),
            rentals = rentals.rows_affected(),
            "Category renamed"
        );

        settings.device_category = new.to_string();
        settings.updated_at = now;
        settings.sync_version += 1;
        Ok(settings)
    }
}

/// Inserts (`read_version = None`) or version-guarded updates a full row.
async fn write_row(
    tx: &mut Transaction<'_, Sqlite>,
    s: &CatalogSettings,
    read_version: Option<i64>,
) -> DbResult<()> {
    let features = encode_list(TABLE, &s.features)?;

    let result = match read_version {
        None => {
            sqlx::query(
                r#"
                INSERT INTO catalog_settings (
                    device_category, is_enabled, is_featured, max_controllers,
                    extra_controller_enabled, daily_rate, weekly_rate, monthly_rate,
                    controller_daily_rate, controller_weekly_rate, controller_monthly_rate,
                    features, updated_at, sync_version
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                "#,
            )
            .bind(&s.device_category)
            .bind(s.is_enabled)
            .bind(s.is_featured)
            .bind(s.max_controllers as i64)
            .bind(s.extra_controller_enabled)
            .bind(s.rates.daily_rate)
            .bind(s.rates.weekly_rate)
            .bind(s.rates.monthly_rate)
            .bind(s.rates.controller_daily_rate)
            .bind(s.rates.controller_weekly_rate)
            .bind(s.rates.controller_monthly_rate)
            .bind(features)
            .bind(s.updated_at)
            .bind(s.sync_version)
            .execute(&mut **tx)
            .await?
        }
        Some(version) => {
            sqlx::query(
                r#"
                UPDATE catalog_settings SET
                    is_enabled = ?2, is_featured = ?3, max_controllers = ?4,
                    extra_controller_enabled = ?5, daily_rate = ?6, weekly_rate = ?7,
                    monthly_rate = ?8, controller_daily_rate = ?9, controller_weekly_rate = ?10,
                    controller_monthly_rate = ?11, features = ?12, updated_at = ?13,
                    sync_version = ?14
                WHERE device_category = ?1 COLLATE NOCASE AND sync_version = ?15
                "#,
            )
            .bind(&s.device_category)
            .bind(s.is_enabled)
            .bind(s.is_featured)
            .bind(s.max_controllers as i64)
            .bind(s.extra_controller_enabled)
            .bind(s.rates.daily_rate)
            .bind(s.rates.weekly_rate)
            .bind(s.rates.monthly_rate)
            .bind(s.rates.controller_daily_rate)
            .bind(s.rates.controller_weekly_rate)
            .bind(s.rates.controller_monthly_rate)
            .bind(features)
            .bind(s.updated_at)
            .bind(s.sync_version)
            .bind(version)
            .execute(&mut **tx)
            .await?
        }
    };

    if result.rows_affected() == 0 {
        return Err(DbError::VersionConflict {
            entity: "CatalogSettings".to_string(),
            id: s.device_category.clone(),
            expected: read_version.unwrap_or_default(),
        });
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use fleet_core::{Device, DeviceStatus, NewDevice, RentalFilter};

    fn rates(daily: i64) -> RateTable {
        RateTable {
            daily_rate: daily,
            ..RateTable::fallback()
        }
    }

    #[tokio::test]
    async fn test_upsert_creates_then_updates() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.catalog();

        let created = repo.upsert("PS5", &CatalogPatch::rates(rates(450))).await.unwrap();
        assert_eq!(created.rates.daily_rate, 450);
        assert_eq!(created.sync_version, 0);

        let mut patch = CatalogPatch::default();
        patch.features = Some(vec!["4K HDR".into(), "DualSense".into()]);
        patch.is_featured = Some(true);
        let updated = repo.upsert("ps5", &patch).await.unwrap();

        assert_eq!(updated.device_category, "PS5");
        assert_eq!(updated.rates.daily_rate, 450);
        assert_eq!(updated.features, vec!["4K HDR", "DualSense"]);
        assert_eq!(updated.sync_version, 1);
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_version_conflict() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.catalog();
        repo.upsert("PS5", &CatalogPatch::rates(rates(450))).await.unwrap();
        repo.upsert("PS5", &CatalogPatch::rates(rates(500))).await.unwrap();

        let err = repo
            .upsert("PS5", &CatalogPatch::rates(rates(999)).expecting(0))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::VersionConflict { .. }));
        assert_eq!(repo.get("PS5").await.unwrap().unwrap().rates.daily_rate, 500);
    }

    #[tokio::test]
    async fn test_rename_retargets_devices() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.catalog().upsert("PS5", &CatalogPatch::rates(rates(500))).await.unwrap();
        for (id, serial) in [("d-1", "PS5-001"), ("d-2", "PS5-002")] {
            db.devices()
                .insert(&Device::onboard(id, NewDevice::new(serial, "PS5"), Utc::now()))
                .await
                .unwrap();
        }

        let renamed = db.catalog().rename("PS5", "PS5 Pro").await.unwrap();
        assert_eq!(renamed.device_category, "PS5 Pro");
        assert_eq!(renamed.rates.daily_rate, 500);

        assert!(db.catalog().get("PS5").await.unwrap().is_none());
        assert_eq!(db.catalog().get("PS5 Pro").await.unwrap().unwrap().rates.daily_rate, 500);

        let devices = db.devices().list_by_category("PS5 Pro").await.unwrap();
        assert_eq!(devices.len(), 2);
        assert!(devices.iter().all(|d| d.status == DeviceStatus::Ready));
        assert!(db.devices().list_by_category("PS5").await.unwrap().is_empty());
        assert!(db.rentals().list(&RentalFilter::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rename_conflict_leaves_everything_untouched() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.catalog().upsert("PS5", &CatalogPatch::default()).await.unwrap();
        db.catalog().upsert("Switch", &CatalogPatch::default()).await.unwrap();
        db.devices()
            .insert(&Device::onboard("d-1", NewDevice::new("PS5-001", "PS5"), Utc::now()))
            .await
            .unwrap();

        let err = db.catalog().rename("PS5", "switch").await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
        assert_eq!(db.devices().list_by_category("PS5").await.unwrap().len(), 1);
        assert!(db.catalog().get("PS5").await.unwrap().is_some());

        assert!(matches!(
            db.catalog().rename("Xbox", "Xbox One").await,
            Err(DbError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_case_only_rename() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.catalog().upsert("ps5", &CatalogPatch::default()).await.unwrap();

        let renamed = db.catalog().rename("ps5", "PS5").await.unwrap();
        assert_eq!(renamed.device_category, "PS5");
        assert_eq!(db.catalog().list().await.unwrap()[0].device_category, "PS5");
    }
}
