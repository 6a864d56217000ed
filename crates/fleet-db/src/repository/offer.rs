//! # Offer Repository
//!
//! Promotional codes. Codes are unique case-insensitively and offers are
//! deactivated rather than deleted, so there is no `delete` here.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::{decode_list, encode_list, to_u32};
use fleet_core::patch::version_matches;
use fleet_core::{DiscountType, OfferPatch, PromotionalOffer};

const TABLE: &str = "promotional_offers";

const SELECT_COLUMNS: &str = r#"
    SELECT
        id, code, description, discount_type, discount_value, min_rental_days,
        applicable_categories, is_active, valid_from, valid_until,
        created_at, updated_at, sync_version
    FROM promotional_offers
"#;

#[derive(Debug, FromRow)]
struct OfferRow {
    id: String,
    code: String,
    description: Option<String>,
    discount_type: DiscountType,
    discount_value: i64,
    min_rental_days: i64,
    applicable_categories: String,
    is_active: bool,
    valid_from: Option<DateTime<Utc>>,
    valid_until: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    sync_version: i64,
}

impl TryFrom<OfferRow> for PromotionalOffer {
    type Error = DbError;

    fn try_from(row: OfferRow) -> DbResult<PromotionalOffer> {
        Ok(PromotionalOffer {
            min_rental_days: to_u32(TABLE, "min_rental_days", row.min_rental_days)?,
            applicable_categories: decode_list(TABLE, &row.applicable_categories)?,
            id: row.id,
            code: row.code,
            description: row.description,
            discount_type: row.discount_type,
            discount_value: row.discount_value,
            is_active: row.is_active,
            valid_from: row.valid_from,
            valid_until: row.valid_until,
            created_at: row.created_at,
            updated_at: row.updated_at,
            sync_version: row.sync_version,
        })
    }
}

/// Repository for promotional offers.
#[derive(Debug, Clone)]
pub struct OfferRepository {
    pool: SqlitePool,
}

impl OfferRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OfferRepository { pool }
    }

    /// Every offer, active or not, ordered by code.
    pub async fn list(&self) -> DbResult<Vec<PromotionalOffer>> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY code COLLATE NOCASE");
        let rows: Vec<OfferRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(PromotionalOffer::try_from).collect()
    }

    pub async fn get_by_code(&self, code: &str) -> DbResult<Option<PromotionalOffer>> {
        let sql = format!("{SELECT_COLUMNS} WHERE code = ?1 COLLATE NOCASE");
        let row: Option<OfferRow> = sqlx::query_as(&sql)
            .bind(code.trim())
            .fetch_optional(&self.pool)
            .await?;
        row.map(PromotionalOffer::try_from).transpose()
    }

    /// Inserts a new offer.
    ///
    /// ## Returns
    /// * `Err(DbError::UniqueViolation)` - the code is already taken
    pub async fn insert(&self, offer: &PromotionalOffer) -> DbResult<PromotionalOffer> {
        debug!(code = %offer.code, "Inserting offer");

        sqlx::query(
            r#"
            INSERT INTO promotional_offers (
                id, code, description, discount_type, discount_value, min_rental_days,
                applicable_categories, is_active, valid_from, valid_until,
                created_at, updated_at, sync_version
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&offer.id)
        .bind(&offer.code)
        .bind(&offer.description)
        .bind(offer.discount_type)
        .bind(offer.discount_value)
        .bind(offer.min_rental_days as i64)
        .bind(encode_list(TABLE, &offer.applicable_categories)?)
        .bind(offer.is_active)
        .bind(offer.valid_from)
        .bind(offer.valid_until)
        .bind(offer.created_at)
        .bind(offer.updated_at)
        .bind(offer.sync_version)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { .. } => DbError::duplicate("code", &offer.code),
            other => other,
        })?;

        Ok(offer.clone())
    }

    /// Applies a patch to the offer with `code`.
    pub async fn update(&self, code: &str, patch: &OfferPatch) -> DbResult<PromotionalOffer> {
        debug!(code = %code, "Updating offer");

        let mut tx = self.pool.begin().await?;

        let sql = format!("{SELECT_COLUMNS} WHERE code = ?1 COLLATE NOCASE");
        let row: Option<OfferRow> = sqlx::query_as(&sql)
            .bind(code.trim())
            .fetch_optional(&mut *tx)
            .await?;
        let mut offer = match row {
            Some(row) => PromotionalOffer::try_from(row)?,
            None => return Err(DbError::not_found("PromotionalOffer", code)),
        };

        let read_version = offer.sync_version;
        if !version_matches(patch.expected_version, read_version) {
            return Err(DbError::VersionConflict {
                entity: "PromotionalOffer".to_string(),
                id: offer.code,
                expected: patch.expected_version.unwrap_or_default(),
            });
        }

        patch.apply(&mut offer, Utc::now());

        let result = sqlx::query(
            r#"
            UPDATE promotional_offers SET
                description = ?2,
                discount_type = ?3,
                discount_value = ?4,
                min_rental_days = ?5,
                applicable_categories = ?6,
                is_active = ?7,
                valid_from = ?8,
                valid_until = ?9,
                updated_at = ?10,
                sync_version = ?11
            WHERE id = ?1 AND sync_version = ?12
            "#,
        )
        .bind(&offer.id)
        .bind(&offer.description)
        .bind(offer.discount_type)
        .bind(offer.discount_value)
        .bind(offer.min_rental_days as i64)
        .bind(encode_list(TABLE, &offer.applicable_categories)?)
        .bind(offer.is_active)
        .bind(offer.valid_from)
        .bind(offer.valid_until)
        .bind(offer.updated_at)
        .bind(offer.sync_version)
        .bind(read_version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::VersionConflict {
                entity: "PromotionalOffer".to_string(),
                id: offer.code,
                expected: read_version,
            });
        }

        tx.commit().await?;
        Ok(offer)
    }
}

// =============================================================================
// Tests
// =============================================================================
