use sqlx::PgPool;

use crate::address::persistence::AddressPersistenceManager;
use crate::address::service::AddressValidationService;
use crate::config::Config;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub address_service: AddressValidationService,
    pub address_manager: AddressPersistenceManager,
    pub config: Config,
}
