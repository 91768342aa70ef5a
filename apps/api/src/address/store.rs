//! Profile address store — durable repository for `ProfileAddressRecord`.
//!
//! Writes are transactional and serialized per profile: the Postgres
//! implementation takes row locks on the profile's address rows, then
//! verifies the snapshot fingerprints the write plan was computed from are
//! still current. A stale snapshot is a `Conflict` and the manager replans.

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::address::persistence::{AddressWritePlan, RecordFingerprint};
use crate::models::address::ProfileAddressRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The profile's address set changed between plan and commit.
    /// Transient: callers retry with a fresh snapshot.
    #[error("concurrent modification of profile address set")]
    Conflict,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait ProfileAddressStore: Send + Sync {
    async fn load_profile_addresses(
        &self,
        profile_id: Uuid,
    ) -> Result<Vec<ProfileAddressRecord>, StoreError>;

    /// Apply a write plan atomically: all updates and the optional insert
    /// commit together or not at all.
    async fn commit_plan(
        &self,
        plan: &AddressWritePlan,
    ) -> Result<ProfileAddressRecord, StoreError>;
}

// ─── Postgres implementation ────────────────────────────────────

pub struct PgProfileAddressStore {
    pool: PgPool,
}

/// The partial unique index on (profile_id) WHERE is_active is the
/// last line of defense for the single-active invariant. A violation means
/// a concurrent writer won the race: transient, so retry, not 500.
fn conflict_on_unique_violation(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db) = e {
        if db.code().as_deref() == Some("23505") {
            return StoreError::Conflict;
        }
    }
    StoreError::Database(e)
}

impl PgProfileAddressStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileAddressStore for PgProfileAddressStore {
    async fn load_profile_addresses(
        &self,
        profile_id: Uuid,
    ) -> Result<Vec<ProfileAddressRecord>, StoreError> {
        Ok(sqlx::query_as::<_, ProfileAddressRecord>(
            "SELECT * FROM profile_addresses WHERE profile_id = $1 ORDER BY created_at ASC",
        )
        .bind(profile_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn commit_plan(
        &self,
        plan: &AddressWritePlan,
    ) -> Result<ProfileAddressRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Serialize concurrent writers on the same profile. The fingerprint
        // includes is_active and last_updated_at, both of which every commit
        // moves on the rows it touches, so a plan computed before a
        // concurrent commit cannot pass this check.
        let locked: Vec<RecordFingerprint> = sqlx::query_as(
            "SELECT id, is_active, last_updated_at FROM profile_addresses WHERE profile_id = $1 FOR UPDATE",
        )
        .bind(plan.profile_id)
        .fetch_all(&mut *tx)
        .await?;

        // The plan was computed from a snapshot; if the row set moved under
        // us, bail out and let the manager replan.
        let mut expected = plan.snapshot.clone();
        let mut actual = locked;
        expected.sort_by_key(|f| f.0);
        actual.sort_by_key(|f| f.0);
        if expected != actual {
            return Err(StoreError::Conflict);
        }

        for record in &plan.deactivated {
            sqlx::query(
                r#"
                UPDATE profile_addresses
                SET is_active = $2, is_primary = $3, last_updated_at = $4, updated_by = $5
                WHERE id = $1
                "#,
            )
            .bind(record.id)
            .bind(record.is_active)
            .bind(record.is_primary)
            .bind(record.last_updated_at)
            .bind(&record.updated_by)
            .execute(&mut *tx)
            .await
            .map_err(conflict_on_unique_violation)?;
        }

        let target = &plan.target;
        if plan.is_insert {
            sqlx::query(
                r#"
                INSERT INTO profile_addresses
                    (id, profile_id, street_number, street_name, street_type,
                     unit_number, unit_type, suburb, state, postcode, country,
                     external_id, latitude, longitude,
                     is_validated, validation_source, confidence_score, validation_date,
                     property_type, land_area_sqm, floor_area_sqm,
                     is_active, is_primary, address_type,
                     created_at, created_by, last_updated_at, updated_by)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                        $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28)
                "#,
            )
            .bind(target.id)
            .bind(target.profile_id)
            .bind(&target.street_number)
            .bind(&target.street_name)
            .bind(&target.street_type)
            .bind(&target.unit_number)
            .bind(&target.unit_type)
            .bind(&target.suburb)
            .bind(&target.state)
            .bind(&target.postcode)
            .bind(&target.country)
            .bind(&target.external_id)
            .bind(target.latitude)
            .bind(target.longitude)
            .bind(target.is_validated)
            .bind(&target.validation_source)
            .bind(target.confidence_score)
            .bind(target.validation_date)
            .bind(&target.property_type)
            .bind(target.land_area_sqm)
            .bind(target.floor_area_sqm)
            .bind(target.is_active)
            .bind(target.is_primary)
            .bind(&target.address_type)
            .bind(target.created_at)
            .bind(&target.created_by)
            .bind(target.last_updated_at)
            .bind(&target.updated_by)
            .execute(&mut *tx)
            .await
            .map_err(conflict_on_unique_violation)?;
        } else {
            // created_at / created_by are deliberately absent: immutable.
            sqlx::query(
                r#"
                UPDATE profile_addresses
                SET street_number = $2, street_name = $3, street_type = $4,
                    unit_number = $5, unit_type = $6, suburb = $7, state = $8,
                    postcode = $9, country = $10, external_id = $11,
                    latitude = $12, longitude = $13,
                    is_validated = $14, validation_source = $15,
                    confidence_score = $16, validation_date = $17,
                    property_type = $18, land_area_sqm = $19, floor_area_sqm = $20,
                    is_active = $21, is_primary = $22,
                    last_updated_at = $23, updated_by = $24
                WHERE id = $1
                "#,
            )
            .bind(target.id)
            .bind(&target.street_number)
            .bind(&target.street_name)
            .bind(&target.street_type)
            .bind(&target.unit_number)
            .bind(&target.unit_type)
            .bind(&target.suburb)
            .bind(&target.state)
            .bind(&target.postcode)
            .bind(&target.country)
            .bind(&target.external_id)
            .bind(target.latitude)
            .bind(target.longitude)
            .bind(target.is_validated)
            .bind(&target.validation_source)
            .bind(target.confidence_score)
            .bind(target.validation_date)
            .bind(&target.property_type)
            .bind(target.land_area_sqm)
            .bind(target.floor_area_sqm)
            .bind(target.is_active)
            .bind(target.is_primary)
            .bind(target.last_updated_at)
            .bind(&target.updated_by)
            .execute(&mut *tx)
            .await
            .map_err(conflict_on_unique_violation)?;
        }

        tx.commit().await.map_err(conflict_on_unique_violation)?;

        Ok(target.clone())
    }
}

// ─── In-memory implementation (tests) ───────────────────────────
