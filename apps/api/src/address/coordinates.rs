//! Coordinate resolver — the geocode fallback chain.
//!
//! Chain: property detail by id → re-search → detail on the search hit →
//! per-state centroid → explicit not-found. Each tier carries a fixed
//! confidence so callers can tell a rooftop geocode from a state centroid.
//! Provider failures at any step fall through to the next tier; this module
//! never returns an error.

use tracing::debug;

use crate::address::parser::parse_suggestion_text;
use crate::address::provider::AddressProvider;
use crate::models::address::{CoordinateResolution, CoordinateSource};

// ─── Per-state centroid table ───────────────────────────────────

struct StateCentroid {
    state: &'static str,
    lat: f64,
    lon: f64,
}

const STATE_CENTROIDS: &[StateCentroid] = &[
    StateCentroid { state: "NSW", lat: -33.8688, lon: 151.2093 },
    StateCentroid { state: "VIC", lat: -37.8136, lon: 144.9631 },
    StateCentroid { state: "QLD", lat: -27.4698, lon: 153.0251 },
    StateCentroid { state: "SA", lat: -34.9285, lon: 138.6007 },
    StateCentroid { state: "WA", lat: -31.9505, lon: 115.8605 },
    StateCentroid { state: "TAS", lat: -42.8821, lon: 147.3272 },
    StateCentroid { state: "NT", lat: -12.4634, lon: 130.8456 },
    StateCentroid { state: "ACT", lat: -35.2809, lon: 149.1300 },
];

/// Geographic center of Australia, used when a state is present but not in
/// the table (e.g. a provider-specific subdivision spelling).
const COUNTRY_DEFAULT_CENTROID: (f64, f64) = (-25.2744, 133.7751);

/// Centroid for a resolved state. An empty state is a genuine miss; an
/// unrecognized non-empty state falls back to the country default.
pub fn state_centroid(state: &str) -> Option<(f64, f64)> {
    let state = state.trim();
    if state.is_empty() {
        return None;
    }
    let upper = state.to_uppercase();
    STATE_CENTROIDS
        .iter()
        .find(|c| c.state == upper)
        .map(|c| (c.lat, c.lon))
        .or(Some(COUNTRY_DEFAULT_CENTROID))
}

// ─── Resolver ───────────────────────────────────────────────────

const SEARCH_LIMIT: usize = 5;

pub struct CoordinateResolver<'a> {
    provider: Option<&'a dyn AddressProvider>,
}

impl<'a> CoordinateResolver<'a> {
    pub fn new(provider: Option<&'a dyn AddressProvider>) -> Self {
        Self { provider }
    }

    /// Walk the fallback chain, stopping at the first tier that yields a
    /// coordinate. Returns `success = false` only when the address cannot be
    /// matched at all.
    pub async fn resolve(&self, address_text: &str, external_id: Option<&str>) -> CoordinateResolution {
        if let Some(provider) = self.provider {
            // 1. Property detail by the known provider id
            if let Some(id) = external_id {
                if let Ok(Some(coords)) = provider.property_coordinates(id).await {
                    return CoordinateResolution::found(
                        coords.latitude,
                        coords.longitude,
                        CoordinateSource::PropertyDetail,
                    );
                }
                debug!("property detail for {id} yielded no geocode, falling back to search");
            }

            // 2/3. Re-run the search and work with the best hit
            match provider.search(address_text, SEARCH_LIMIT).await {
                Ok(suggestions) if !suggestions.is_empty() => {
                    let hit = suggestions
                        .iter()
                        .find(|s| s.display_text.eq_ignore_ascii_case(address_text.trim()))
                        .unwrap_or(&suggestions[0]);

                    if let (Some(lat), Some(lon)) = (hit.latitude, hit.longitude) {
                        return CoordinateResolution::found(
                            lat,
                            lon,
                            CoordinateSource::SearchResult,
                        );
                    }

                    if let Some(id) = hit.external_id.as_deref() {
                        if let Ok(Some(coords)) = provider.property_coordinates(id).await {
                            return CoordinateResolution::found(
                                coords.latitude,
                                coords.longitude,
                                CoordinateSource::SearchResultDetail,
                            );
                        }
                    }
                }
                Ok(_) => debug!("coordinate search returned no results for {address_text:?}"),
                Err(e) => debug!("coordinate search failed, falling back to centroid: {e}"),
            }
        }

        // 4. Static per-state centroid
        let state = parse_suggestion_text(address_text).state;
        if let Some((lat, lon)) = state_centroid(&state) {
            return CoordinateResolution::found(lat, lon, CoordinateSource::RegionCentroid);
        }

        // 5. Nothing matched anywhere
        CoordinateResolution::not_found(format!("no coordinate match for {address_text:?}"))
    }
}
