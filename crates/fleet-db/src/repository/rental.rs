//! # Rental Repository
//!
//! Database operations for bookings.
//!
//! Rentals are never deleted: completed and cancelled rows stay for audit,
//! and keep the `device_id` they were bound to.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::to_u32;
use fleet_core::patch::version_matches;
use fleet_core::{Rental, RentalFilter, RentalPatch, RentalPlan, RentalStatus};

const TABLE: &str = "rentals";

const SELECT_COLUMNS: &str = r#"
    SELECT
        id, customer_id, category, product_id, plan, controller_count, offer_code,
        start_date, end_date, status, device_id, total_price,
        created_at, updated_at, returned_at, sync_version
    FROM rentals
"#;

#[derive(Debug, FromRow)]
struct RentalRow {
    id: String,
    customer_id: Option<String>,
    category: String,
    product_id: Option<String>,
    plan: RentalPlan,
    controller_count: i64,
    offer_code: Option<String>,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    status: RentalStatus,
    device_id: Option<String>,
    total_price: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    returned_at: Option<DateTime<Utc>>,
    sync_version: i64,
}

impl TryFrom<RentalRow> for Rental {
    type Error = DbError;

    fn try_from(row: RentalRow) -> DbResult<Rental> {
        Ok(Rental {
            controller_count: to_u32(TABLE, "controller_count", row.controller_count)?,
            id: row.id,
            customer_id: row.customer_id,
            category: row.category,
            product_id: row.product_id,
            plan: row.plan,
            offer_code: row.offer_code,
            start_date: row.start_date,
            end_date: row.end_date,
            status: row.status,
            device_id: row.device_id,
            total_price: row.total_price,
            created_at: row.created_at,
            updated_at: row.updated_at,
            returned_at: row.returned_at,
            sync_version: row.sync_version,
        })
    }
}

/// Repository for rental database operations.
#[derive(Debug, Clone)]
pub struct RentalRepository {
    pool: SqlitePool,
}

impl RentalRepository {
    pub fn new(pool: SqlitePool) -> Self {
        RentalRepository { pool }
    }

    /// Rentals matching `filter`, oldest start first.
    ///
    /// ## Generated SQL
    /// ```text
    /// SELECT ... FROM rentals WHERE 1 = 1
    ///   [AND device_id = ?]
    ///   [AND category = ? COLLATE NOCASE]
    ///   [AND status IN ('active', 'overdue')]
    /// ORDER BY start_date, id
    /// ```
    pub async fn list(&self, filter: &RentalFilter) -> DbResult<Vec<Rental>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_COLUMNS);
        query.push(" WHERE 1 = 1");

        if let Some(device_id) = &filter.device_id {
            query.push(" AND device_id = ").push_bind(device_id.clone());
        }
        if let Some(category) = &filter.category {
            query
                .push(" AND category = ")
                .push_bind(category.trim().to_string())
                .push(" COLLATE NOCASE");
        }
        if filter.live_only {
            query.push(" AND status IN ('active', 'overdue')");
        }
        query.push(" ORDER BY start_date, id");

        let rows = query.build_query_as::<RentalRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(Rental::try_from).collect()
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Rental>> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
        let row: Option<RentalRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Rental::try_from).transpose()
    }

    /// Inserts a new rental.
    pub async fn insert(&self, rental: &Rental) -> DbResult<Rental> {
        debug!(
            id = %rental.id,
            category = %rental.category,
            device_id = ?rental.device_id,
            "Inserting rental"
        );

        sqlx::query(
            r#"
            INSERT INTO rentals (
                id, customer_id, category, product_id, plan, controller_count, offer_code,
                start_date, end_date, status, device_id, total_price,
                created_at, updated_at, returned_at, sync_version
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
        )
        .bind(&rental.id)
        .bind(&rental.customer_id)
        .bind(&rental.category)
        .bind(&rental.product_id)
        .bind(rental.plan)
        .bind(rental.controller_count as i64)
        .bind(&rental.offer_code)
        .bind(rental.start_date)
        .bind(rental.end_date)
        .bind(rental.status)
        .bind(&rental.device_id)
        .bind(rental.total_price)
        .bind(rental.created_at)
        .bind(rental.updated_at)
        .bind(rental.returned_at)
        .bind(rental.sync_version)
        .execute(&self.pool)
        .await?;

        Ok(rental.clone())
    }

    /// Applies a patch (bind, status change, return stamp) to one rental.
    ///
    /// Only the mutable columns are written; the quoted `total_price` and
    /// the booked window never change after insert.
    pub async fn update(&self, id: &str, patch: &RentalPatch) -> DbResult<Rental> {
        debug!(id = %id, "Updating rental");

        let mut tx = self.pool.begin().await?;

        let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
        let row: Option<RentalRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let mut rental = match row {
            Some(row) => Rental::try_from(row)?,
            None => return Err(DbError::not_found("Rental", id)),
        };

        let read_version = rental.sync_version;
        if !version_matches(patch.expected_version, read_version) {
            return Err(DbError::VersionConflict {
                entity: "Rental".to_string(),
                id: id.to_string(),
                expected: patch.expected_version.unwrap_or_default(),
            });
        }

        patch.apply(&mut rental, Utc::now());

        let result = sqlx::query(
            r#"
            UPDATE rentals SET
                category = ?2,
                status = ?3,
                device_id = ?4,
                returned_at = ?5,
                updated_at = ?6,
                sync_version = ?7
            WHERE id = ?1 AND sync_version = ?8
            "#,
        )
        .bind(&rental.id)
        .bind(&rental.category)
        .bind(rental.status)
        .bind(&rental.device_id)
        .bind(rental.returned_at)
        .bind(rental.updated_at)
        .bind(rental.sync_version)
        .bind(read_version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::VersionConflict {
                entity: "Rental".to_string(),
                id: id.to_string(),
                expected: read_version,
            });
        }

        tx.commit().await?;
        Ok(rental)
    }
}

// =============================================================================
// Tests
// =============================================================================
