//! HTTP handlers for the address subsystem. Thin plumbing: all decisions
//! live in the service and the persistence manager.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::address::service::SearchOutcome;
use crate::errors::AppError;
use crate::models::address::{
    Actor, AddressValidationResult, CoordinateResolution, ProfileAddressRecord, ResolvedAddress,
};
use crate::state::AppState;

/// Header set by the auth layer in front of this service.
const USER_ID_HEADER: &str = "x-user-id";

#[derive(Deserialize)]
pub struct SearchParams {
    pub query: String,
    pub country: String,
    pub limit: Option<usize>,
}

/// GET /api/v1/address/search
pub async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Json<SearchOutcome> {
    let outcome = state
        .address_service
        .search(&params.query, &params.country, params.limit)
        .await;
    Json(outcome)
}

#[derive(Deserialize)]
pub struct ResolveRequest {
    pub address_text: String,
    pub external_id: Option<String>,
    pub country: String,
}

/// POST /api/v1/address/validate
pub async fn handle_validate(
    State(state): State<AppState>,
    Json(req): Json<ResolveRequest>,
) -> Json<AddressValidationResult> {
    let result = state
        .address_service
        .validate(&req.address_text, req.external_id.as_deref(), &req.country)
        .await;
    Json(result)
}

/// POST /api/v1/address/coordinates
pub async fn handle_resolve_coordinates(
    State(state): State<AppState>,
    Json(req): Json<ResolveRequest>,
) -> Json<CoordinateResolution> {
    let result = state
        .address_service
        .resolve_coordinates(&req.address_text, req.external_id.as_deref(), &req.country)
        .await;
    Json(result)
}

#[derive(Deserialize)]
pub struct ApplyAddressRequest {
    pub resolved: ResolvedAddress,
    /// True when the write exactly mirrors provider data with no
    /// user-entered change; attributed to the automated source.
    #[serde(default)]
    pub automated: bool,
}

/// PUT /api/v1/profiles/:profile_id/address
pub async fn handle_apply_address(
    State(state): State<AppState>,
    Path(profile_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<ApplyAddressRequest>,
) -> Result<Json<ProfileAddressRecord>, AppError> {
    let actor = request_actor(&headers, req.automated)?;
    let record = state
        .address_manager
        .apply_address(profile_id, &req.resolved, &actor)
        .await?;
    Ok(Json(record))
}

/// GET /api/v1/profiles/:profile_id/address
/// Full history, active record first.
pub async fn handle_get_addresses(
    State(state): State<AppState>,
    Path(profile_id): Path<Uuid>,
) -> Result<Json<Vec<ProfileAddressRecord>>, AppError> {
    let records = sqlx::query_as::<_, ProfileAddressRecord>(
        "SELECT * FROM profile_addresses WHERE profile_id = $1 ORDER BY is_active DESC, created_at DESC",
    )
    .bind(profile_id)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(records))
}

fn request_actor(headers: &HeaderMap, automated: bool) -> Result<Actor, AppError> {
    if automated {
        return Ok(Actor::System);
    }
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| Actor::User(v.to_string()))
        .ok_or(AppError::Unauthorized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_actor_automated_is_system() {
        let headers = HeaderMap::new();
        assert_eq!(request_actor(&headers, true).unwrap(), Actor::System);
    }

    #[test]
    fn test_request_actor_reads_user_header() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, "user42".parse().unwrap());
        assert_eq!(
            request_actor(&headers, false).unwrap(),
            Actor::User("user42".into())
        );
    }

    #[test]
    fn test_request_actor_missing_header_is_unauthorized() {
        let headers = HeaderMap::new();
        assert!(matches!(
            request_actor(&headers, false),
            Err(AppError::Unauthorized)
        ));
    }
}
