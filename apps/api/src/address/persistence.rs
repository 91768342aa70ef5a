//! Address persistence manager — the audit-aware state machine that decides
//! create vs update vs deactivate for a profile's address set.
//!
//! The state machine itself is the pure [`plan_address_write`] function over
//! a loaded snapshot; the manager wraps it with field validation, the store
//! commit, and a bounded retry on transient conflicts. Invariants:
//!
//! - at most one active record per profile, exactly one after a success
//! - `created_at` / `created_by` are written once and never altered
//! - `last_updated_at` / `updated_by` move together on every mutation
//! - superseding the active address is attributed to the requesting actor,
//!   never to the automated source

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::address::store::{ProfileAddressStore, StoreError};
use crate::models::address::{
    Actor, ProfileAddressRecord, ResolvedAddress, WriteClassification,
};

const MAX_WRITE_ATTEMPTS: u32 = 3;
const DEFAULT_ADDRESS_TYPE: &str = "residential";

#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Required structured fields absent. Rejected before any persistence.
    #[error("missing required address fields: {0}")]
    ValidationFieldsMissing(String),

    /// Transient write conflicts exhausted the retry budget.
    /// Surfaced to the caller as retryable.
    #[error("concurrent modification of profile address set, retry the save")]
    Conflict,

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for PersistenceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict => PersistenceError::Conflict,
            other => PersistenceError::Store(other),
        }
    }
}

/// Fingerprint of one record at planning time. Every commit flips
/// `is_active` or moves `last_updated_at` on the rows it touches, so a plan
/// computed before a concurrent commit can no longer match at commit time —
/// the id set alone would still match and let a stale plan through.
pub type RecordFingerprint = (Uuid, bool, Option<DateTime<Utc>>);

pub fn record_fingerprint(record: &ProfileAddressRecord) -> RecordFingerprint {
    (record.id, record.is_active, record.last_updated_at)
}

/// The mutations one `apply_address` call commits atomically.
#[derive(Debug, Clone)]
pub struct AddressWritePlan {
    pub profile_id: Uuid,
    pub classification: WriteClassification,
    /// Fingerprints of the rows the plan was computed from; the store
    /// rejects the commit if the profile's row set has moved since.
    pub snapshot: Vec<RecordFingerprint>,
    /// The record being inserted or updated; always active.
    pub target: ProfileAddressRecord,
    pub is_insert: bool,
    /// Superseded records, already rewritten as inactive.
    pub deactivated: Vec<ProfileAddressRecord>,
}

/// Pure state machine: given the profile's current records, decide what the
/// write does. No I/O, fully deterministic for a fixed `now`.
pub fn plan_address_write(
    existing: &[ProfileAddressRecord],
    profile_id: Uuid,
    resolved: &ResolvedAddress,
    actor: &Actor,
    now: DateTime<Utc>,
) -> AddressWritePlan {
    let snapshot: Vec<RecordFingerprint> = existing.iter().map(record_fingerprint).collect();

    let matched = resolved.external_id.as_deref().and_then(|id| {
        existing
            .iter()
            .find(|r| r.external_id.as_deref() == Some(id))
    });

    match matched {
        Some(current) => {
            // Update path: same property refreshed or edited in place.
            let manual_edit = current.canonical().differs_from(&resolved.address);
            let classification = if manual_edit {
                WriteClassification::ManualEdit
            } else {
                WriteClassification::AutomatedRefresh
            };

            let mut target = current.clone();
            overwrite_mutable_fields(&mut target, resolved);
            target.is_active = true;
            target.is_primary = true;
            target.last_updated_at = Some(now);
            target.updated_by = Some(match classification {
                WriteClassification::ManualEdit => actor.audit_value().to_string(),
                _ => Actor::System.audit_value().to_string(),
            });

            let deactivated = deactivate_others(existing, current.id, actor, now);

            AddressWritePlan {
                profile_id,
                classification,
                snapshot,
                target,
                is_insert: false,
                deactivated,
            }
        }
        None => {
            // New-address path: supersede everything and create.
            let target = ProfileAddressRecord {
                id: Uuid::new_v4(),
                profile_id,
                street_number: resolved.address.street_number.clone(),
                street_name: resolved.address.street_name.clone(),
                street_type: resolved.address.street_type.clone(),
                unit_number: resolved.address.unit_number.clone(),
                unit_type: resolved.address.unit_type.clone(),
                suburb: resolved.address.suburb.clone(),
                state: resolved.address.state.clone(),
                postcode: resolved.address.postcode.clone(),
                country: resolved.address.country.clone(),
                external_id: resolved.external_id.clone(),
                latitude: resolved.latitude,
                longitude: resolved.longitude,
                is_validated: resolved.is_validated,
                validation_source: resolved.validation_source.clone(),
                confidence_score: resolved.confidence_score,
                validation_date: resolved.validation_date,
                property_type: resolved.metadata.property_type.clone(),
                land_area_sqm: resolved.metadata.land_area_sqm,
                floor_area_sqm: resolved.metadata.floor_area_sqm,
                is_active: true,
                is_primary: true,
                address_type: DEFAULT_ADDRESS_TYPE.to_string(),
                created_at: now,
                created_by: actor.audit_value().to_string(),
                last_updated_at: None,
                updated_by: None,
            };

            let deactivated = deactivate_others(existing, target.id, actor, now);

            AddressWritePlan {
                profile_id,
                classification: WriteClassification::NewAddress,
                snapshot,
                target,
                is_insert: true,
                deactivated,
            }
        }
    }
}

fn overwrite_mutable_fields(record: &mut ProfileAddressRecord, resolved: &ResolvedAddress) {
    record.street_number = resolved.address.street_number.clone();
    record.street_name = resolved.address.street_name.clone();
    record.street_type = resolved.address.street_type.clone();
    record.unit_number = resolved.address.unit_number.clone();
    record.unit_type = resolved.address.unit_type.clone();
    record.suburb = resolved.address.suburb.clone();
    record.state = resolved.address.state.clone();
    record.postcode = resolved.address.postcode.clone();
    record.country = resolved.address.country.clone();
    record.latitude = resolved.latitude;
    record.longitude = resolved.longitude;
    record.is_validated = resolved.is_validated;
    record.validation_source = resolved.validation_source.clone();
    record.confidence_score = resolved.confidence_score;
    record.validation_date = resolved.validation_date;
    record.property_type = resolved.metadata.property_type.clone();
    record.land_area_sqm = resolved.metadata.land_area_sqm;
    record.floor_area_sqm = resolved.metadata.floor_area_sqm;
}

/// Superseding is a user decision: deactivations are always attributed to
/// the requesting actor, never rewritten as automated. Already-inactive
/// history rows are left untouched so their audit trail stays frozen.
fn deactivate_others(
    existing: &[ProfileAddressRecord],
    keep_id: Uuid,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Vec<ProfileAddressRecord> {
    existing
        .iter()
        .filter(|r| r.id != keep_id && r.is_active)
        .map(|r| {
            let mut deactivated = r.clone();
            deactivated.is_active = false;
            deactivated.is_primary = false;
            deactivated.last_updated_at = Some(now);
            deactivated.updated_by = Some(actor.audit_value().to_string());
            deactivated
        })
        .collect()
}

fn validate_required_fields(resolved: &ResolvedAddress) -> Result<(), PersistenceError> {
    let mut missing = Vec::new();
    if resolved.address.street_name.trim().is_empty() {
        missing.push("street_name");
    }
    if resolved.address.suburb.trim().is_empty() {
        missing.push("suburb");
    }
    if resolved.address.state.trim().is_empty() {
        missing.push("state");
    }
    if resolved.address.postcode.trim().is_empty() {
        missing.push("postcode");
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(PersistenceError::ValidationFieldsMissing(missing.join(", ")))
    }
}

#[derive(Clone)]
pub struct AddressPersistenceManager {
    store: Arc<dyn ProfileAddressStore>,
}

impl AddressPersistenceManager {
    pub fn new(store: Arc<dyn ProfileAddressStore>) -> Self {
        Self { store }
    }

    /// Apply a resolved address to a profile's address set and return the
    /// now-active record. Retries only on transient snapshot conflicts,
    /// never on validation failure.
    pub async fn apply_address(
        &self,
        profile_id: Uuid,
        resolved: &ResolvedAddress,
        actor: &Actor,
    ) -> Result<ProfileAddressRecord, PersistenceError> {
        validate_required_fields(resolved)?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let existing = self.store.load_profile_addresses(profile_id).await?;
            let plan = plan_address_write(&existing, profile_id, resolved, actor, Utc::now());
            let classification = plan.classification;

            match self.store.commit_plan(&plan).await {
                Ok(record) => {
                    info!(
                        "applied address for profile {profile_id}: {:?} by {}",
                        classification,
                        actor.audit_value()
                    );
                    return Ok(record);
                }
                Err(StoreError::Conflict) if attempt < MAX_WRITE_ATTEMPTS => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::store::memory::MemoryAddressStore;
    use crate::models::address::{CanonicalAddress, PropertyMetadata};
    use std::sync::atomic::Ordering;

    fn resolved(external_id: &str) -> ResolvedAddress {
        ResolvedAddress {
            address: CanonicalAddress {
                street_number: "4".into(),
                street_name: "MILBURN".into(),
                street_type: "CCT".into(),
                unit_number: None,
                unit_type: None,
                suburb: "BOOLAROO".into(),
                state: "NSW".into(),
                postcode: "2284".into(),
                country: "AU".into(),
            },
            external_id: Some(external_id.into()),
            latitude: Some(-32.928419),
            longitude: Some(151.611373),
            is_validated: true,
            validation_source: Some("kleber".into()),
            confidence_score: Some(0.95),
            validation_date: Some(Utc::now()),
            metadata: PropertyMetadata::default(),
        }
    }

    fn manager() -> (AddressPersistenceManager, Arc<MemoryAddressStore>) {
        let store = Arc::new(MemoryAddressStore::new());
        (AddressPersistenceManager::new(store.clone()), store)
    }

    async fn all_records(
        store: &MemoryAddressStore,
        profile_id: Uuid,
    ) -> Vec<ProfileAddressRecord> {
        store.load_profile_addresses(profile_id).await.unwrap()
    }

    fn active_count(records: &[ProfileAddressRecord]) -> usize {
        records.iter().filter(|r| r.is_active).count()
    }

    // Scenario B: first save creates a single active record.
    #[tokio::test]
    async fn test_first_apply_creates_active_record() {
        let (manager, store) = manager();
        let profile = Uuid::new_v4();

        let record = manager
            .apply_address(profile, &resolved("P1"), &Actor::System)
            .await
            .unwrap();

        assert!(record.is_active);
        assert_eq!(record.created_by, "system");
        assert!(record.updated_by.is_none());
        assert!(record.last_updated_at.is_none());

        let records = all_records(&store, profile).await;
        assert_eq!(records.len(), 1);
        assert_eq!(active_count(&records), 1);
    }

    // Scenario C: same external id with a changed field is a manual edit.
    #[tokio::test]
    async fn test_field_change_on_same_external_id_is_manual_edit() {
        let (manager, store) = manager();
        let profile = Uuid::new_v4();

        let created = manager
            .apply_address(profile, &resolved("P1"), &Actor::System)
            .await
            .unwrap();

        let mut edited = resolved("P1");
        edited.address.suburb = "SPEERS POINT".into();
        let updated = manager
            .apply_address(profile, &edited, &Actor::User("user42".into()))
            .await
            .unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.suburb, "SPEERS POINT");
        assert_eq!(updated.updated_by.as_deref(), Some("user42"));
        assert_eq!(updated.created_by, "system");
        assert_eq!(updated.created_at, created.created_at);

        let records = all_records(&store, profile).await;
        assert_eq!(records.len(), 1);
    }

    // Idempotence: identical resubmission is an automated refresh.
    #[tokio::test]
    async fn test_identical_resubmission_is_automated_refresh() {
        let (manager, store) = manager();
        let profile = Uuid::new_v4();

        manager
            .apply_address(profile, &resolved("P1"), &Actor::User("user42".into()))
            .await
            .unwrap();
        let refreshed = manager
            .apply_address(profile, &resolved("P1"), &Actor::User("user42".into()))
            .await
            .unwrap();

        // attribution stays with the automated source, not the resubmitter
        assert_eq!(refreshed.updated_by.as_deref(), Some("system"));
        assert!(refreshed.last_updated_at.is_some());

        let records = all_records(&store, profile).await;
        assert_eq!(records.len(), 1);
        assert_eq!(active_count(&records), 1);
    }

    // Scenario D: a different external id supersedes the current address.
    #[tokio::test]
    async fn test_new_external_id_deactivates_previous() {
        let (manager, store) = manager();
        let profile = Uuid::new_v4();

        manager
            .apply_address(profile, &resolved("P1"), &Actor::System)
            .await
            .unwrap();
        let actor = Actor::User("user42".into());
        let mut second = resolved("P2");
        second.address.suburb = "ADAMSTOWN".into();
        let new_active = manager
            .apply_address(profile, &second, &actor)
            .await
            .unwrap();

        assert_eq!(new_active.external_id.as_deref(), Some("P2"));
        assert_eq!(new_active.created_by, "user42");

        let records = all_records(&store, profile).await;
        assert_eq!(records.len(), 2);
        assert_eq!(active_count(&records), 1);

        let old = records
            .iter()
            .find(|r| r.external_id.as_deref() == Some("P1"))
            .unwrap();
        assert!(!old.is_active);
        // deactivation attributed to the user, never the automated source
        assert_eq!(old.updated_by.as_deref(), Some("user42"));
    }

    // Scenario E: switching back reactivates the original row in place.
    #[tokio::test]
    async fn test_switching_back_reactivates_original_record() {
        let (manager, store) = manager();
        let profile = Uuid::new_v4();
        let actor = Actor::User("user42".into());

        let original = manager
            .apply_address(profile, &resolved("P1"), &Actor::System)
            .await
            .unwrap();
        let mut second = resolved("P2");
        second.address.suburb = "ADAMSTOWN".into();
        manager.apply_address(profile, &second, &actor).await.unwrap();

        let reactivated = manager
            .apply_address(profile, &resolved("P1"), &actor)
            .await
            .unwrap();

        assert_eq!(reactivated.id, original.id);
        assert!(reactivated.is_active);
        assert_eq!(reactivated.created_at, original.created_at);
        assert_eq!(reactivated.created_by, "system");

        let records = all_records(&store, profile).await;
        assert_eq!(records.len(), 2);
        assert_eq!(active_count(&records), 1);
        let p2 = records
            .iter()
            .find(|r| r.external_id.as_deref() == Some("P2"))
            .unwrap();
        assert!(!p2.is_active);
        assert_eq!(p2.updated_by.as_deref(), Some("user42"));
    }

    // Single-active invariant across an arbitrary call sequence.
    #[tokio::test]
    async fn test_single_active_invariant_across_sequence() {
        let (manager, store) = manager();
        let profile = Uuid::new_v4();
        let actor = Actor::User("user7".into());

        for id in ["P1", "P2", "P3", "P1", "P2"] {
            let mut r = resolved(id);
            r.address.street_number = id.trim_start_matches('P').to_string();
            manager.apply_address(profile, &r, &actor).await.unwrap();
            let records = all_records(&store, profile).await;
            assert_eq!(active_count(&records), 1);
        }

        let records = all_records(&store, profile).await;
        assert_eq!(records.len(), 3); // history never deleted
    }

    #[tokio::test]
    async fn test_missing_required_fields_rejected_without_persistence() {
        let (manager, store) = manager();
        let profile = Uuid::new_v4();

        let mut bad = resolved("P1");
        bad.address.suburb = "".into();
        bad.address.postcode = "  ".into();

        let err = manager
            .apply_address(profile, &bad, &Actor::System)
            .await
            .unwrap_err();
        match err {
            PersistenceError::ValidationFieldsMissing(fields) => {
                assert!(fields.contains("suburb"));
                assert!(fields.contains("postcode"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!(all_records(&store, profile).await.is_empty());
    }

    #[tokio::test]
    async fn test_transient_conflict_is_retried() {
        let (manager, store) = manager();
        let profile = Uuid::new_v4();

        store.fail_commits.store(2, Ordering::SeqCst);
        let record = manager
            .apply_address(profile, &resolved("P1"), &Actor::System)
            .await
            .unwrap();
        assert!(record.is_active);
    }

    #[tokio::test]
    async fn test_conflict_budget_exhausted_surfaces_retryable() {
        let (manager, store) = manager();
        let profile = Uuid::new_v4();

        store.fail_commits.store(10, Ordering::SeqCst);
        let err = manager
            .apply_address(profile, &resolved("P1"), &Actor::System)
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Conflict));
    }

    #[test]
    fn test_plan_without_external_id_takes_new_address_path() {
        let mut r = resolved("P1");
        r.external_id = None;
        let plan = plan_address_write(&[], Uuid::new_v4(), &r, &Actor::User("u".into()), Utc::now());
        assert_eq!(plan.classification, WriteClassification::NewAddress);
        assert!(plan.is_insert);
        assert!(plan.target.external_id.is_none());
    }

    #[test]
    fn test_plan_snapshot_fingerprints_existing_rows() {
        let profile = Uuid::new_v4();
        let first = plan_address_write(&[], profile, &resolved("P1"), &Actor::System, Utc::now());
        let existing = vec![first.target.clone()];
        let second =
            plan_address_write(&existing, profile, &resolved("P2"), &Actor::System, Utc::now());
        assert_eq!(second.snapshot, vec![record_fingerprint(&first.target)]);
    }

    // Two writers plan against the same snapshot; the loser's commit must be
    // rejected instead of reactivating a row alongside the winner's. The id
    // set alone would pass here — only the fingerprint check catches it.
    #[tokio::test]
    async fn test_stale_plan_commit_conflicts_instead_of_double_activating() {
        let (manager, store) = manager();
        let profile = Uuid::new_v4();
        let actor = Actor::User("user42".into());

        manager
            .apply_address(profile, &resolved("P1"), &Actor::System)
            .await
            .unwrap();
        let mut second = resolved("P2");
        second.address.suburb = "ADAMSTOWN".into();
        manager.apply_address(profile, &second, &actor).await.unwrap();

        // Both plans see the same state: P2 active, P1 inactive.
        let snapshot = all_records(&store, profile).await;
        let reactivate_p1 =
            plan_address_write(&snapshot, profile, &resolved("P1"), &actor, Utc::now());
        let refresh_p2 = plan_address_write(&snapshot, profile, &second, &actor, Utc::now());

        store.commit_plan(&reactivate_p1).await.unwrap();
        // The stale refresh of P2 would activate it without deactivating P1.
        let err = store.commit_plan(&refresh_p2).await.unwrap_err();
        assert!(matches!(err, crate::address::store::StoreError::Conflict));

        let records = all_records(&store, profile).await;
        assert_eq!(active_count(&records), 1);
        let active = records.iter().find(|r| r.is_active).unwrap();
        assert_eq!(active.external_id.as_deref(), Some("P1"));
    }
}
