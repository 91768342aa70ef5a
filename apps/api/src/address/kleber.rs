//! Kleber (DataTools) client — the Australian address provider.
//!
//! ARCHITECTURAL RULE: the raw Kleber payload shapes live only in this file.
//! Everything is standardized into the canonical types before leaving, so no
//! downstream code ever sees a `DtResponse`.

use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::address::parser::parse_suggestion_text;
use crate::address::provider::{
    AddressProvider, PropertyCoordinates, ProviderError, PROVIDER_TIMEOUT_SECS,
};
use crate::models::address::{
    AddressSuggestion, AddressValidationResult, CanonicalAddress, PropertyMetadata,
};

use async_trait::async_trait;

const DEFAULT_BASE_URL: &str = "https://kleber.datatools.com.au/KleberWebService/DtKleberService.svc/ProcessQueryStringRequest";
const SEARCH_METHOD: &str = "DataTools.Capture.Address.Predictive.AuPaf.SearchAddress";
const RETRIEVE_METHOD: &str = "DataTools.Capture.Address.Predictive.AuPaf.RetrieveAddress";
const VERIFY_METHOD: &str = "DataTools.Verify.Address.AuPaf.VerifyAddress";

/// Stored coordinates are capped at 6 decimal places at this boundary to
/// avoid float noise in diffs; reads keep full provider precision.
const COORDINATE_DECIMALS: i32 = 6;

pub const PROVIDER_NAME: &str = "kleber";
const COUNTRY: &str = "AU";

// ─── Raw payload shapes ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct KleberEnvelope {
    #[serde(rename = "DtResponse")]
    dt_response: DtResponse,
}

#[derive(Debug, Deserialize)]
struct DtResponse {
    #[serde(rename = "ErrorMessage", default)]
    error_message: Option<String>,
    #[serde(rename = "Result", default)]
    result: Vec<KleberRecord>,
}

/// One Kleber result row. Every field is optional: missing fields map to
/// None, never raise.
#[derive(Debug, Deserialize, Default)]
struct KleberRecord {
    #[serde(rename = "AddressLine", default)]
    address_line: Option<String>,
    #[serde(rename = "RecordId", default)]
    record_id: Option<String>,
    #[serde(rename = "UnitNumber", default)]
    unit_number: Option<String>,
    #[serde(rename = "UnitType", default)]
    unit_type: Option<String>,
    #[serde(rename = "StreetNumber1", default)]
    street_number: Option<String>,
    #[serde(rename = "StreetName", default)]
    street_name: Option<String>,
    #[serde(rename = "StreetType", default)]
    street_type: Option<String>,
    #[serde(rename = "Locality", default)]
    locality: Option<String>,
    #[serde(rename = "State", default)]
    state: Option<String>,
    #[serde(rename = "Postcode", default)]
    postcode: Option<String>,
    #[serde(rename = "Latitude", default)]
    latitude: Option<String>,
    #[serde(rename = "Longitude", default)]
    longitude: Option<String>,
    /// Kleber emits confidence on a 0–100 scale.
    #[serde(rename = "Confidence", default)]
    confidence: Option<f64>,
    #[serde(rename = "PropertyType", default)]
    property_type: Option<String>,
    #[serde(rename = "LandArea", default)]
    land_area: Option<f64>,
    #[serde(rename = "FloorArea", default)]
    floor_area: Option<f64>,
}

// ─── Client ─────────────────────────────────────────────────────

pub struct KleberProvider {
    client: Client,
    base_url: String,
    request_key: String,
}

impl KleberProvider {
    pub fn new(request_key: String) -> Self {
        Self::with_base_url(request_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(request_key: String, base_url: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(PROVIDER_TIMEOUT_SECS))
                .build()
                .expect("Failed to build HTTP client"),
            base_url,
            request_key,
        }
    }

    async fn call(&self, method: &str, params: &[(&str, &str)]) -> Result<DtResponse, ProviderError> {
        let mut query: Vec<(&str, &str)> = vec![
            ("Method", method),
            ("RequestKey", &self.request_key),
            ("OutputFormat", "json"),
        ];
        query.extend_from_slice(params);

        let response = self.client.get(&self.base_url).query(&query).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        // Body read failure is transport (Unavailable); a body that does not
        // decode as a Kleber envelope is a Parse error.
        let body = response.text().await?;
        let envelope: KleberEnvelope = serde_json::from_str(&body)?;

        if let Some(msg) = envelope.dt_response.error_message.as_deref() {
            if !msg.is_empty() {
                return Err(ProviderError::Api {
                    status: 200,
                    message: msg.to_string(),
                });
            }
        }

        debug!(
            "Kleber {} returned {} result(s)",
            method,
            envelope.dt_response.result.len()
        );

        Ok(envelope.dt_response)
    }
}

#[async_trait]
impl AddressProvider for KleberProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<AddressSuggestion>, ProviderError> {
        let limit_str = limit.to_string();
        let response = self
            .call(
                SEARCH_METHOD,
                &[("AddressLine", query), ("ResultLimit", &limit_str)],
            )
            .await?;

        Ok(standardize_suggestions(&response.result))
    }

    async fn validate(
        &self,
        address_text: &str,
        external_id: Option<&str>,
    ) -> Result<AddressValidationResult, ProviderError> {
        let response = match external_id {
            Some(id) => self.call(RETRIEVE_METHOD, &[("RecordId", id)]).await?,
            None => {
                self.call(VERIFY_METHOD, &[("AddressLine1", address_text)])
                    .await?
            }
        };

        Ok(standardize_validation(
            response.result.first(),
            address_text,
        ))
    }

    async fn property_coordinates(
        &self,
        external_id: &str,
    ) -> Result<Option<PropertyCoordinates>, ProviderError> {
        let response = self.call(RETRIEVE_METHOD, &[("RecordId", external_id)]).await?;
        Ok(response.result.first().and_then(record_coordinates))
    }
}

// ─── Standardization ────────────────────────────────────────────

/// Prefer structured fields from the payload; fall back to parsing the flat
/// address line for whatever is missing.
fn record_to_canonical(record: &KleberRecord) -> CanonicalAddress {
    let parsed = parse_suggestion_text(record.address_line.as_deref().unwrap_or(""));

    CanonicalAddress {
        street_number: record
            .street_number
            .clone()
            .unwrap_or(parsed.street_number),
        street_name: record.street_name.clone().unwrap_or(parsed.street_name),
        street_type: record.street_type.clone().unwrap_or(parsed.street_type),
        unit_number: record.unit_number.clone(),
        unit_type: record.unit_type.clone(),
        suburb: record.locality.clone().unwrap_or(parsed.suburb),
        state: record.state.clone().unwrap_or(parsed.state),
        postcode: record.postcode.clone().unwrap_or(parsed.postcode),
        country: COUNTRY.to_string(),
    }
}

fn standardize_suggestions(records: &[KleberRecord]) -> Vec<AddressSuggestion> {
    records
        .iter()
        .enumerate()
        .map(|(rank, record)| {
            let coords = record_coordinates(record);
            AddressSuggestion {
                display_text: record.address_line.clone().unwrap_or_default(),
                external_id: record.record_id.clone(),
                rank: rank as u32,
                address: record_to_canonical(record),
                latitude: coords.map(|c| c.latitude),
                longitude: coords.map(|c| c.longitude),
                confidence: normalize_confidence(record.confidence),
            }
        })
        .collect()
}

fn standardize_validation(
    record: Option<&KleberRecord>,
    address_text: &str,
) -> AddressValidationResult {
    let record = match record {
        Some(r) => r,
        // Empty result set is NoMatchFound, represented as validated=false.
        None => {
            return AddressValidationResult::unvalidated(
                parse_suggestion_text(address_text).into_canonical(COUNTRY),
            )
        }
    };

    let coords = record_coordinates(record);

    AddressValidationResult {
        validated: true,
        confidence: normalize_confidence(record.confidence),
        external_id: record.record_id.clone(),
        address: record_to_canonical(record),
        latitude: coords.map(|c| round_coordinate(c.latitude)),
        longitude: coords.map(|c| round_coordinate(c.longitude)),
        metadata: PropertyMetadata {
            property_type: record.property_type.clone(),
            land_area_sqm: record.land_area,
            floor_area_sqm: record.floor_area,
        },
        validation_source: Some(PROVIDER_NAME.to_string()),
        validation_date: Some(Utc::now()),
    }
}

fn record_coordinates(record: &KleberRecord) -> Option<PropertyCoordinates> {
    let latitude = record.latitude.as_deref()?.parse::<f64>().ok()?;
    let longitude = record.longitude.as_deref()?.parse::<f64>().ok()?;
    Some(PropertyCoordinates {
        latitude,
        longitude,
    })
}

/// Kleber's 0–100 scale mapped into the canonical [0, 1] contract.
/// Absent confidence on a returned record defaults to a neutral 0.5.
fn normalize_confidence(raw: Option<f64>) -> f64 {
    match raw {
        Some(c) => (c / 100.0).clamp(0.0, 1.0),
        None => 0.5,
    }
}

fn round_coordinate(value: f64) -> f64 {
    let factor = 10f64.powi(COORDINATE_DECIMALS);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEARCH_FIXTURE: &str = r#"{
        "DtResponse": {
            "ErrorMessage": "",
            "Result": [
                {"AddressLine": "4 MILBURN CCT, BOOLAROO NSW 2284", "RecordId": "P1", "Confidence": 95.0},
                {"AddressLine": "4 MILBURN PL, ST IVES NSW 2075", "RecordId": "P2", "Confidence": 80.0}
            ]
        }
    }"#;

    const RETRIEVE_FIXTURE: &str = r#"{
        "DtResponse": {
            "Result": [{
                "AddressLine": "4 MILBURN CCT, BOOLAROO NSW 2284",
                "RecordId": "P1",
                "StreetNumber1": "4",
                "StreetName": "MILBURN",
                "StreetType": "CCT",
                "Locality": "BOOLAROO",
                "State": "NSW",
                "Postcode": "2284",
                "Latitude": "-32.9284191",
                "Longitude": "151.6113728",
                "Confidence": 98.0,
                "PropertyType": "House",
                "LandArea": 556.0
            }]
        }
    }"#;

    fn parse_fixture(raw: &str) -> DtResponse {
        serde_json::from_str::<KleberEnvelope>(raw).unwrap().dt_response
    }

    #[test]
    fn test_search_standardizes_flat_lines_via_parser() {
        let response = parse_fixture(SEARCH_FIXTURE);
        let suggestions = standardize_suggestions(&response.result);

        assert_eq!(suggestions.len(), 2);
        let first = &suggestions[0];
        assert_eq!(first.external_id.as_deref(), Some("P1"));
        assert_eq!(first.rank, 0);
        assert_eq!(first.address.street_number, "4");
        assert_eq!(first.address.street_name, "MILBURN");
        assert_eq!(first.address.street_type, "CCT");
        assert_eq!(first.address.suburb, "BOOLAROO");
        assert_eq!(first.address.state, "NSW");
        assert_eq!(first.address.postcode, "2284");
        assert!((first.confidence - 0.95).abs() < 1e-9);
        assert_eq!(suggestions[1].rank, 1);
    }

    #[test]
    fn test_retrieve_prefers_structured_fields() {
        let response = parse_fixture(RETRIEVE_FIXTURE);
        let result = standardize_validation(response.result.first(), "ignored");

        assert!(result.validated);
        assert_eq!(result.external_id.as_deref(), Some("P1"));
        assert_eq!(result.address.suburb, "BOOLAROO");
        assert_eq!(result.validation_source.as_deref(), Some("kleber"));
        assert_eq!(result.metadata.property_type.as_deref(), Some("House"));
        assert_eq!(result.metadata.land_area_sqm, Some(556.0));
        // 7-decimal provider value capped to 6 at the validation boundary
        assert_eq!(result.latitude, Some(-32.928419));
        assert_eq!(result.longitude, Some(151.611373));
    }

    #[test]
    fn test_empty_result_is_unvalidated_not_error() {
        let result = standardize_validation(None, "4 MILBURN CCT, BOOLAROO NSW 2284");
        assert!(!result.validated);
        assert_eq!(result.confidence, 0.0);
        // Heuristic parse still fills the canonical shape for manual entry
        assert_eq!(result.address.suburb, "BOOLAROO");
    }

    #[test]
    fn test_missing_fields_map_to_none_never_raise() {
        let raw = r#"{"DtResponse": {"Result": [{"RecordId": "P9"}]}}"#;
        let response = parse_fixture(raw);
        let suggestions = standardize_suggestions(&response.result);
        assert_eq!(suggestions[0].external_id.as_deref(), Some("P9"));
        assert_eq!(suggestions[0].display_text, "");
        assert_eq!(suggestions[0].address.street_name, "");
    }

    #[test]
    fn test_confidence_normalization_clamps() {
        assert_eq!(normalize_confidence(Some(95.0)), 0.95);
        assert_eq!(normalize_confidence(Some(150.0)), 1.0);
        assert_eq!(normalize_confidence(Some(-5.0)), 0.0);
        assert_eq!(normalize_confidence(None), 0.5);
    }

    #[test]
    fn test_malformed_envelope_is_a_parse_error() {
        let err = serde_json::from_str::<KleberEnvelope>("<html>gateway error</html>").unwrap_err();
        assert!(matches!(ProviderError::from(err), ProviderError::Parse(_)));
    }

    #[test]
    fn test_record_coordinates_need_both_axes() {
        let record = KleberRecord {
            latitude: Some("-32.9".to_string()),
            ..Default::default()
        };
        assert!(record_coordinates(&record).is_none());
    }
}
