#![allow(dead_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The normalized structured address, independent of any provider's response
/// shape. Unparsed components are empty strings, unknown optionals are None.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalAddress {
    pub street_number: String,
    pub street_name: String,
    pub street_type: String,
    pub unit_number: Option<String>,
    pub unit_type: Option<String>,
    pub suburb: String,
    pub state: String,
    pub postcode: String,
    pub country: String,
}

impl CanonicalAddress {
    /// Field-by-field comparison over every structured component.
    /// Used to classify an update as a manual edit vs an automated refresh.
    pub fn differs_from(&self, other: &CanonicalAddress) -> bool {
        self != other
    }
}

/// One entry of a provider autocomplete/search response, already standardized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressSuggestion {
    pub display_text: String,
    /// Provider-assigned stable property identifier.
    pub external_id: Option<String>,
    /// Provider rank, ascending (0 = best match).
    pub rank: u32,
    pub address: CanonicalAddress,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub confidence: f64,
}

/// Non-address metadata a validation provider may return about a property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyMetadata {
    pub property_type: Option<String>,
    pub land_area_sqm: Option<f64>,
    pub floor_area_sqm: Option<f64>,
}

/// Canonical outcome of a validation call. `validated = false` with zeroed
/// confidence is the well-formed "fall back to manual entry" shape; it is
/// never an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressValidationResult {
    pub validated: bool,
    /// Always within [0, 1] regardless of the provider's native scale.
    pub confidence: f64,
    pub external_id: Option<String>,
    pub address: CanonicalAddress,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub metadata: PropertyMetadata,
    pub validation_source: Option<String>,
    pub validation_date: Option<DateTime<Utc>>,
}

impl AddressValidationResult {
    /// The "not validated" fallback returned when no provider is configured
    /// or the provider is unreachable.
    pub fn unvalidated(address: CanonicalAddress) -> Self {
        Self {
            validated: false,
            confidence: 0.0,
            external_id: None,
            address,
            latitude: None,
            longitude: None,
            metadata: PropertyMetadata::default(),
            validation_source: None,
            validation_date: None,
        }
    }
}

/// Reliability tier of a resolved coordinate, ordered by how far down the
/// fallback chain it was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateSource {
    PropertyDetail,
    SearchResult,
    SearchResultDetail,
    RegionCentroid,
    NotFound,
}

impl CoordinateSource {
    pub fn confidence(&self) -> f64 {
        match self {
            CoordinateSource::PropertyDetail => 0.9,
            CoordinateSource::SearchResult => 0.8,
            CoordinateSource::SearchResultDetail => 0.7,
            CoordinateSource::RegionCentroid => 0.5,
            CoordinateSource::NotFound => 0.0,
        }
    }
}

/// Outcome of the coordinate fallback chain. Never an error: a miss is
/// `success = false` with a reason string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinateResolution {
    pub success: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub confidence: f64,
    pub source: CoordinateSource,
    pub reason: Option<String>,
}

impl CoordinateResolution {
    pub fn found(lat: f64, lon: f64, source: CoordinateSource) -> Self {
        Self {
            success: true,
            latitude: Some(lat),
            longitude: Some(lon),
            confidence: source.confidence(),
            source,
            reason: None,
        }
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            latitude: None,
            longitude: None,
            confidence: 0.0,
            source: CoordinateSource::NotFound,
            reason: Some(reason.into()),
        }
    }
}

/// A fully resolved address handed to the persistence manager.
/// This is the write-side mirror of `AddressValidationResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedAddress {
    pub address: CanonicalAddress,
    pub external_id: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_validated: bool,
    pub validation_source: Option<String>,
    pub confidence_score: Option<f64>,
    pub validation_date: Option<DateTime<Utc>>,
    pub metadata: PropertyMetadata,
}

/// Who performed a write. `System` is the sentinel for writes that exactly
/// mirror provider data with no user-entered change; audit columns are
/// type-checked through this enum rather than string-matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    User(String),
    System,
}

pub const SYSTEM_ACTOR: &str = "system";

impl Actor {
    /// The value stored in `created_by` / `updated_by` audit columns.
    pub fn audit_value(&self) -> &str {
        match self {
            Actor::User(id) => id,
            Actor::System => SYSTEM_ACTOR,
        }
    }
}

/// How an update-path write was classified by the persistence state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteClassification {
    ManualEdit,
    AutomatedRefresh,
    NewAddress,
}

/// One persisted address of a profile. History is never deleted: superseded
/// rows stay with `is_active = false`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProfileAddressRecord {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub street_number: String,
    pub street_name: String,
    pub street_type: String,
    pub unit_number: Option<String>,
    pub unit_type: Option<String>,
    pub suburb: String,
    pub state: String,
    pub postcode: String,
    pub country: String,
    pub external_id: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_validated: bool,
    pub validation_source: Option<String>,
    pub confidence_score: Option<f64>,
    pub validation_date: Option<DateTime<Utc>>,
    pub property_type: Option<String>,
    pub land_area_sqm: Option<f64>,
    pub floor_area_sqm: Option<f64>,
    pub is_active: bool,
    pub is_primary: bool,
    pub address_type: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
}

impl ProfileAddressRecord {
    pub fn canonical(&self) -> CanonicalAddress {
        CanonicalAddress {
            street_number: self.street_number.clone(),
            street_name: self.street_name.clone(),
            street_type: self.street_type.clone(),
            unit_number: self.unit_number.clone(),
            unit_type: self.unit_type.clone(),
            suburb: self.suburb.clone(),
            state: self.state.clone(),
            postcode: self.postcode.clone(),
            country: self.country.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_audit_values() {
        assert_eq!(Actor::User("user42".into()).audit_value(), "user42");
        assert_eq!(Actor::System.audit_value(), "system");
    }

    #[test]
    fn test_canonical_differs_on_any_field() {
        let a = CanonicalAddress {
            street_number: "4".into(),
            street_name: "MILBURN".into(),
            street_type: "CCT".into(),
            suburb: "BOOLAROO".into(),
            state: "NSW".into(),
            postcode: "2284".into(),
            country: "AU".into(),
            ..Default::default()
        };
        let mut b = a.clone();
        assert!(!a.differs_from(&b));
        b.suburb = "SPEERS POINT".into();
        assert!(a.differs_from(&b));
    }

    #[test]
    fn test_coordinate_source_confidence_tiers_descend() {
        let tiers = [
            CoordinateSource::PropertyDetail,
            CoordinateSource::SearchResult,
            CoordinateSource::SearchResultDetail,
            CoordinateSource::RegionCentroid,
            CoordinateSource::NotFound,
        ];
        for pair in tiers.windows(2) {
            assert!(pair[0].confidence() > pair[1].confidence());
        }
    }

    #[test]
    fn test_unvalidated_fallback_is_well_formed() {
        let r = AddressValidationResult::unvalidated(CanonicalAddress::default());
        assert!(!r.validated);
        assert_eq!(r.confidence, 0.0);
        assert!(r.external_id.is_none());
        assert!(r.latitude.is_none());
    }
}
