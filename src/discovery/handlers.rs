//! Discovery HTTP API
//!
//! - `GET /services`: every endpoint of the current snapshot.
//! - `GET /services/random`: one endpoint, or `503` when none are known.

use super::types::Endpoint;
use super::watcher::MembershipWatcher;

use axum::{Json, Router, extract::Extension, http::StatusCode, routing::get};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const ENDPOINT_SERVICES: &str = "/services";
pub const ENDPOINT_RANDOM_SERVICE: &str = "/services/random";

#[derive(Debug, Serialize, Deserialize)]
pub struct ServicesResponse {
    /// Generation of the snapshot served; `None` before the first notification.
    pub generation: Option<u64>,
    pub services: Vec<Endpoint>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RandomServiceResponse {
    pub service: Option<Endpoint>,
    pub error: Option<String>,
}

pub async fn handle_get_services(
    Extension(watcher): Extension<Arc<MembershipWatcher>>,
) -> (StatusCode, Json<ServicesResponse>) {
    let response = match watcher.snapshot() {
        Some(snapshot) => ServicesResponse {
            generation: Some(snapshot.generation),
            services: snapshot.endpoints.clone(),
        },
        None => ServicesResponse {
            generation: None,
            services: vec![],
        },
    };

    (StatusCode::OK, Json(response))
}

pub async fn handle_get_random_service(
    Extension(watcher): Extension<Arc<MembershipWatcher>>,
) -> (StatusCode, Json<RandomServiceResponse>) {
    match watcher.get_random_service() {
        Ok(endpoint) => (
            StatusCode::OK,
            Json(RandomServiceResponse {
                service: Some(endpoint),
                error: None,
            }),
        ),
        Err(e) => {
            tracing::debug!("Random service lookup failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(RandomServiceResponse {
                    service: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

pub fn router(watcher: Arc<MembershipWatcher>) -> Router {
    Router::new()
        .route(ENDPOINT_SERVICES, get(handle_get_services))
        .route(ENDPOINT_RANDOM_SERVICE, get(handle_get_random_service))
        .layer(Extension(watcher))
}
