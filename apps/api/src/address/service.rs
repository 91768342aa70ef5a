//! Address validation service — the orchestrator behind the public
//! search / validate / resolve-coordinates operations.
//!
//! Provider failures stop here. Every operation returns a well-formed
//! fallback instead of an error so the caller's save flow can always degrade
//! to manual entry.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::address::coordinates::CoordinateResolver;
use crate::address::parser::parse_suggestion_text;
use crate::address::provider::{ProviderError, ProviderRegistry};
use crate::models::address::{
    AddressSuggestion, AddressValidationResult, CoordinateResolution,
};

const DEFAULT_SEARCH_LIMIT: usize = 10;
const MAX_SEARCH_LIMIT: usize = 20;

/// Search outcome: either suggestions, or empty with the reason the provider
/// could not be reached. Never an error.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub suggestions: Vec<AddressSuggestion>,
    /// Set when the provider was configured but unreachable; the UI shows
    /// "service unavailable, use manual entry".
    pub unavailable_reason: Option<String>,
}

impl SearchOutcome {
    fn empty() -> Self {
        Self {
            suggestions: vec![],
            unavailable_reason: None,
        }
    }

    fn unavailable(reason: String) -> Self {
        Self {
            suggestions: vec![],
            unavailable_reason: Some(reason),
        }
    }
}

#[derive(Clone)]
pub struct AddressValidationService {
    registry: Arc<ProviderRegistry>,
}

impl AddressValidationService {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// Autocomplete search, ordered by ascending provider rank.
    /// No configured provider for the country is an empty list, not an error.
    pub async fn search(&self, query: &str, country_code: &str, limit: Option<usize>) -> SearchOutcome {
        let provider = match self.registry.for_country(country_code) {
            Some(p) => p,
            None => return SearchOutcome::empty(),
        };

        let limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT).clamp(1, MAX_SEARCH_LIMIT);

        match provider.search(query, limit).await {
            Ok(mut suggestions) => {
                suggestions.sort_by_key(|s| s.rank);
                SearchOutcome {
                    suggestions,
                    unavailable_reason: None,
                }
            }
            Err(e) => {
                warn!("address search via {} failed: {e}", provider.name());
                SearchOutcome::unavailable(unavailable_reason(&e))
            }
        }
    }

    /// Full validation. Any failure — no provider, transport outage, no
    /// match — collapses into the well-formed "not validated" result so the
    /// caller can fall back to manual entry. Never throws.
    pub async fn validate(
        &self,
        address_text: &str,
        external_id: Option<&str>,
        country_code: &str,
    ) -> AddressValidationResult {
        let fallback = || {
            AddressValidationResult::unvalidated(
                parse_suggestion_text(address_text).into_canonical(&country_code.to_uppercase()),
            )
        };

        let provider = match self.registry.for_country(country_code) {
            Some(p) => p,
            None => return fallback(),
        };

        match provider.validate(address_text, external_id).await {
            Ok(result) => result,
            Err(e) => {
                warn!("address validation via {} failed: {e}", provider.name());
                fallback()
            }
        }
    }

    /// Best-effort geocode through the fallback chain of
    /// [`CoordinateResolver`]. Never throws; a total miss is
    /// `success = false` with a reason.
    pub async fn resolve_coordinates(
        &self,
        address_text: &str,
        external_id: Option<&str>,
        country_code: &str,
    ) -> CoordinateResolution {
        let provider = self.registry.for_country(country_code).map(|p| p.as_ref());
        CoordinateResolver::new(provider)
            .resolve(address_text, external_id)
            .await
    }
}

fn unavailable_reason(e: &ProviderError) -> String {
    match e {
        ProviderError::Unavailable(_) => {
            "address service unavailable, use manual entry".to_string()
        }
        other => format!("address lookup failed: {other}"),
    }
}
