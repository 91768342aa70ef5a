//! Provider seam — the trait every geocoding provider implements, the
//! transport-level error taxonomy, and the country-code routing registry.
//!
//! ARCHITECTURAL RULE: nothing outside `address::` sees a provider-specific
//! payload shape. Providers standardize at their own parse boundary and hand
//! back only the canonical types.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::address::{AddressSuggestion, AddressValidationResult};

/// Fixed timeout applied to every outbound provider call. Address resolution
/// must never block the larger save workflow.
pub const PROVIDER_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport or timeout failure. Recoverable: callers degrade to the
    /// manual-entry fallback instead of propagating this.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("provider payload parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Unavailable(e.to_string())
    }
}

/// Coordinates from a property-detail lookup, full precision as returned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropertyCoordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// One external geocoding provider. Implementations own their HTTP client,
/// credentials, and payload standardization.
#[async_trait]
pub trait AddressProvider: Send + Sync {
    /// Provider name recorded as `validation_source` on results.
    fn name(&self) -> &'static str;

    /// Autocomplete search. Results ordered by ascending provider rank.
    async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<AddressSuggestion>, ProviderError>;

    /// Full validation of an address, optionally pinned to a known
    /// provider property id.
    async fn validate(
        &self,
        address_text: &str,
        external_id: Option<&str>,
    ) -> Result<AddressValidationResult, ProviderError>;

    /// Property-detail lookup by provider id. `Ok(None)` means the provider
    /// answered but holds no geocode for the property.
    async fn property_coordinates(
        &self,
        external_id: &str,
    ) -> Result<Option<PropertyCoordinates>, ProviderError>;
}

/// Static country-code → provider routing table, constructed once at startup
/// and injected into the validation service. Replaces module-level singleton
/// clients so tests can register fakes.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn AddressProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, country_code: &str, provider: Arc<dyn AddressProvider>) -> Self {
        self.providers
            .insert(country_code.to_uppercase(), provider);
        self
    }

    /// Unknown country codes resolve to None; callers take the no-provider
    /// fallback path rather than erroring.
    pub fn for_country(&self, country_code: &str) -> Option<&Arc<dyn AddressProvider>> {
        self.providers.get(&country_code.to_uppercase())
    }
}
