//! REST surface over the enclave manager.

pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get, post};
use axum::Router;

use burrow_network::EnclaveManager;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<EnclaveManager>,
    /// Graceful-stop bound used when the API removes services.
    pub stop_timeout: Duration,
}

/// Build the full API router.
pub fn build_router(manager: Arc<EnclaveManager>, stop_timeout: Duration) -> Router {
    let state = ApiState {
        manager,
        stop_timeout,
    };
    Router::new()
        .route(
            "/api/v1/enclaves",
            get(handlers::list_enclaves).post(handlers::create_enclave),
        )
        .route(
            "/api/v1/enclaves/{enclave}",
            delete(handlers::destroy_enclave),
        )
        .route(
            "/api/v1/enclaves/{enclave}/services",
            get(handlers::list_services).post(handlers::add_service),
        )
        .route(
            "/api/v1/enclaves/{enclave}/services/{service}",
            get(handlers::get_service).delete(handlers::remove_service),
        )
        .route(
            "/api/v1/enclaves/{enclave}/services/{service}/exec",
            post(handlers::exec_command),
        )
        .route(
            "/api/v1/enclaves/{enclave}/repartition",
            post(handlers::repartition),
        )
        .with_state(state)
}
