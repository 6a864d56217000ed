//! # Device Repository
//!
//! Database operations for physical rental units.
//!
//! ## Stored vs Derived Status
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  devices.status column       what readers see                          │
//! │  ────────────────────        ─────────────────────────────────          │
//! │  Ready                ──┬──► Rented   (a live rental holds it now)     │
//! │                         └──► Ready                                      │
//! │  Maintenance          ─────► Maintenance                                │
//! │  Under-Repair         ─────► Under-Repair                               │
//! │                                                                         │
//! │  The CHECK constraint refuses 'Rented'; the derivation lives in         │
//! │  fleet-core::availability and runs over rows from this table.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::{decode_list, encode_list, to_u32};
use fleet_core::patch::version_matches;
use fleet_core::{Device, DevicePatch, DeviceStatus};

const TABLE: &str = "devices";

const SELECT_COLUMNS: &str = r#"
    SELECT
        id, serial_number, category, status, health, connectors,
        controller_count, storage_capacity, firmware_version, supplier,
        purchase_cost, warranty_until, notes, created_at, updated_at, sync_version
    FROM devices
"#;

#[derive(Debug, FromRow)]
struct DeviceRow {
    id: String,
    serial_number: String,
    category: String,
    status: DeviceStatus,
    health: i64,
    connectors: String,
    controller_count: Option<i64>,
    storage_capacity: Option<String>,
    firmware_version: Option<String>,
    supplier: Option<String>,
    purchase_cost: Option<i64>,
    warranty_until: Option<NaiveDate>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    sync_version: i64,
}

impl TryFrom<DeviceRow> for Device {
    type Error = DbError;

    fn try_from(row: DeviceRow) -> DbResult<Device> {
        Ok(Device {
            connectors: decode_list(TABLE, &row.connectors)?,
            controller_count: row
                .controller_count
                .map(|c| to_u32(TABLE, "controller_count", c))
                .transpose()?,
            health: row.health.clamp(0, fleet_core::MAX_HEALTH as i64) as u8,
            id: row.id,
            serial_number: row.serial_number,
            category: row.category,
            status: row.status,
            storage_capacity: row.storage_capacity,
            firmware_version: row.firmware_version,
            supplier: row.supplier,
            purchase_cost: row.purchase_cost,
            warranty_until: row.warranty_until,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
            sync_version: row.sync_version,
        })
    }
}

fn collect(rows: Vec<DeviceRow>) -> DbResult<Vec<Device>> {
    rows.into_iter().map(Device::try_from).collect()
}

/// Maps a unique violation on `serial_number` to a field-level duplicate.
fn serial_conflict(err: sqlx::Error, serial: &str) -> DbError {
    match DbError::from(err) {
        DbError::UniqueViolation { field, .. } if field.contains("serial_number") => {
            DbError::duplicate("serialNumber", serial)
        }
        other => other,
    }
}

/// Repository for device database operations.
#[derive(Debug, Clone)]
pub struct DeviceRepository {
    pool: SqlitePool,
}

impl DeviceRepository {
    /// Creates a new DeviceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        DeviceRepository { pool }
    }

    /// Every device, ordered by serial number.
    pub async fn list(&self) -> DbResult<Vec<Device>> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY serial_number COLLATE NOCASE, id");
        let rows: Vec<DeviceRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        collect(rows)
    }

    /// Devices carrying `category` (case-insensitive).
    pub async fn list_by_category(&self, category: &str) -> DbResult<Vec<Device>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE category = ?1 COLLATE NOCASE ORDER BY serial_number COLLATE NOCASE, id"
        );
        let rows: Vec<DeviceRow> = sqlx::query_as(&sql)
            .bind(category.trim())
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }

    /// Gets a device by its ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Device>> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
        let row: Option<DeviceRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Device::try_from).transpose()
    }

    /// Gets a device by serial number (case-insensitive).
    pub async fn get_by_serial(&self, serial: &str) -> DbResult<Option<Device>> {
        let sql = format!("{SELECT_COLUMNS} WHERE serial_number = ?1 COLLATE NOCASE");
        let row: Option<DeviceRow> = sqlx::query_as(&sql)
            .bind(serial.trim())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Device::try_from).transpose()
    }

    /// Inserts a new device.
    ///
    /// ## Returns
    /// * `Err(DbError::UniqueViolation)` - serial number already exists
    pub async fn insert(&self, device: &Device) -> DbResult<Device> {
        debug!(serial = %device.serial_number, category = %device.category, "Inserting device");

        sqlx::query(
            r#"
            INSERT INTO devices (
                id, serial_number, category, status, health, connectors,
                controller_count, storage_capacity, firmware_version, supplier,
                purchase_cost, warranty_until, notes, created_at, updated_at, sync_version
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
        )
        .bind(&device.id)
        .bind(&device.serial_number)
        .bind(&device.category)
        .bind(device.status)
        .bind(device.health as i64)
        .bind(encode_list(TABLE, &device.connectors)?)
        .bind(device.controller_count.map(i64::from))
        .bind(&device.storage_capacity)
        .bind(&device.firmware_version)
        .bind(&device.supplier)
        .bind(device.purchase_cost)
        .bind(device.warranty_until)
        .bind(&device.notes)
        .bind(device.created_at)
        .bind(device.updated_at)
        .bind(device.sync_version)
        .execute(&self.pool)
        .await
        .map_err(|e| serial_conflict(e, &device.serial_number))?;

        Ok(device.clone())
    }

    /// Applies a patch to one device.
    ///
    /// ## Flow
    /// ```text
    /// BEGIN
    ///   SELECT row ──► missing?            NotFound
    ///   expected_version != sync_version?  VersionConflict
    ///   patch.apply(row)
    ///   UPDATE ... WHERE id = ? AND sync_version = <read version>
    /// COMMIT
    /// ```
    pub async fn update(&self, id: &str, patch: &DevicePatch) -> DbResult<Device> {
        debug!(id = %id, "Updating device");

        let mut tx = self.pool.begin().await?;

        let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
        let row: Option<DeviceRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let mut device = match row {
            Some(row) => Device::try_from(row)?,
            None => return Err(DbError::not_found("Device", id)),
        };

        let read_version = device.sync_version;
        if !version_matches(patch.expected_version, read_version) {
            return Err(DbError::VersionConflict {
                entity: "Device".to_string(),
                id: id.to_string(),
                expected: patch.expected_version.unwrap_or_default(),
            });
        }

        patch.apply(&mut device, Utc::now());

        let result = sqlx::query(
            r#"
            UPDATE devices SET
                serial_number = ?2,
                category = ?3,
                status = ?4,
                health = ?5,
                connectors = ?6,
                controller_count = ?7,
                storage_capacity = ?8,
                firmware_version = ?9,
                supplier = ?10,
                purchase_cost = ?11,
                warranty_until = ?12,
                notes = ?13,
                updated_at = ?14,
                sync_version = ?15
            WHERE id = ?1 AND sync_version = ?16
            "#,
        )
        .bind(&device.id)
        .bind(&device.serial_number)
        .bind(&device.category)
        .bind(device.status)
        .bind(device.health as i64)
        .bind(encode_list(TABLE, &device.connectors)?)
        .bind(device.controller_count.map(i64::from))
        .bind(&device.storage_capacity)
        .bind(&device.firmware_version)
        .bind(&device.supplier)
        .bind(device.purchase_cost)
        .bind(device.warranty_until)
        .bind(&device.notes)
        .bind(device.updated_at)
        .bind(device.sync_version)
        .bind(read_version)
        .execute(&mut *tx)
        .await
        .map_err(|e| serial_conflict(e, &device.serial_number))?;

        if result.rows_affected() == 0 {
            return Err(DbError::VersionConflict {
                entity: "Device".to_string(),
                id: id.to_string(),
                expected: read_version,
            });
        }

        tx.commit().await?;
        Ok(device)
    }

    /// Hard-deletes a device (decommission).
    ///
    /// Rentals keep their `device_id` for audit; the caller checks there
    /// are no live ones first.
    pub async fn delete(&self, id: &str) -> DbResult<()> {
        debug!(id = %id, "Deleting device");

        let result = sqlx::query("DELETE FROM devices WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Device", id));
        }
        Ok(())
    }

    /// Counts devices (for diagnostics and the seed binary).
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM devices")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use fleet_core::NewDevice;

    async fn repo() -> DeviceRepository {
        Database::new(DbConfig::in_memory()).await.unwrap().devices()
    }

    fn unit(id: &str, serial: &str, category: &str) -> Device {
        let mut new = NewDevice::new(serial, category);
        new.connectors = vec!["HDMI".into()];
        new.controller_count = Some(2);
        Device::onboard(id, new, Utc::now())
    }

    #[tokio::test]
    async fn test_insert_and_fetch() {
        let repo = repo().await;
        repo.insert(&unit("d-1", "PS5-001", "PS5")).await.unwrap();

        let fetched = repo.get_by_id("d-1").await.unwrap().unwrap();
        assert_eq!(fetched.serial_number, "PS5-001");
        assert_eq!(fetched.connectors, vec!["HDMI".to_string()]);
        assert_eq!(fetched.controller_count, Some(2));
        assert_eq!(fetched.status, DeviceStatus::Ready);
        assert_eq!(fetched.health, 100);

        assert!(repo.get_by_serial("ps5-001").await.unwrap().is_some());
        assert!(repo.get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_serial_is_rejected_case_insensitively() {
        let repo = repo().await;
        repo.insert(&unit("d-1", "PS5-001", "PS5")).await.unwrap();

        let err = repo.insert(&unit("d-2", "ps5-001", "PS5")).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { ref field, .. } if field == "serialNumber"));
    }

    #[tokio::test]
    async fn test_list_by_category_ignores_case() {
        let repo = repo().await;
        repo.insert(&unit("d-1", "B-2", "PS5")).await.unwrap();
        repo.insert(&unit("d-2", "a-1", "ps5")).await.unwrap();
        repo.insert(&unit("d-3", "X-1", "Switch")).await.unwrap();

        let ps5 = repo.list_by_category("PS5").await.unwrap();
        let serials: Vec<_> = ps5.iter().map(|d| d.serial_number.as_str()).collect();
        assert_eq!(serials, vec!["a-1", "B-2"]);
        assert_eq!(repo.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_update_with_version_check() {
        let repo = repo().await;
        repo.insert(&unit("d-1", "PS5-001", "PS5")).await.unwrap();

        let updated = repo
            .update(
                "d-1",
                &DevicePatch::health_and_status(40, DeviceStatus::Maintenance).expecting(0),
            )
            .await
            .unwrap();
        assert_eq!(updated.sync_version, 1);
        assert_eq!(updated.health, 40);

        let err = repo
            .update("d-1", &DevicePatch::status(DeviceStatus::Ready).expecting(0))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::VersionConflict { .. }));

        // Nothing was written by the rejected patch.
        let stored = repo.get_by_id("d-1").await.unwrap().unwrap();
        assert_eq!(stored.status, DeviceStatus::Maintenance);
    }

    #[tokio::test]
    async fn test_update_and_delete_missing() {
        let repo = repo().await;
        assert!(matches!(
            repo.update("nope", &DevicePatch::status(DeviceStatus::Ready)).await,
            Err(DbError::NotFound { .. })
        ));
        assert!(matches!(repo.delete("nope").await, Err(DbError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_rented_status_is_refused_by_schema() {
        let repo = repo().await;
        let mut device = unit("d-1", "PS5-001", "PS5");
        device.status = DeviceStatus::Rented;
        assert!(matches!(
            repo.insert(&device).await,
            Err(DbError::ConstraintViolation(_))
        ));
    }
}
