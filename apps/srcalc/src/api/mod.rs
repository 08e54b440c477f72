//! # HTTP API
//!
//! ```text
//! GET  /health                     public
//! GET  /specialties
//! GET  /specialties/{id}/variables
//! GET  /patients/{dfn}
//! POST /calculations
//! POST /notes
//! ```
//!
//! Every route except `/health` passes the rate limiter and, when a key is
//! configured, the `x-api-key` check.

pub mod handlers;
pub mod types;

use crate::config::ServerConfig;
use axum::Router;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use srcalc_core::{CatalogStore, PatientSource};
use std::num::NonZeroU32;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use types::ApiError;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<CatalogStore>,
    pub patients: Arc<dyn PatientSource>,
    api_key: Option<Arc<str>>,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl AppState {
    pub fn new(
        store: CatalogStore,
        patients: Arc<dyn PatientSource>,
        server: &ServerConfig,
    ) -> Self {
        let per_second = NonZeroU32::new(server.rate_limit_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            store: Arc::new(store),
            patients,
            api_key: server.api_key.as_deref().map(Arc::from),
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
        }
    }
}

/// Build the router.
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/specialties", get(handlers::list_specialties))
        .route(
            "/specialties/{id}/variables",
            get(handlers::specialty_variables),
        )
        .route("/patients/{dfn}", get(handlers::get_patient))
        .route("/calculations", post(handlers::run_calculation))
        .route("/notes", post(handlers::save_note))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(protected)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if state.limiter.check().is_err() {
        tracing::warn!("rate limit exceeded");
        return Err(ApiError::RateLimited);
    }
    Ok(next.run(request).await)
}

async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = &state.api_key else {
        return Ok(next.run(request).await);
    };

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(next.run(request).await)
    } else {
        tracing::warn!(path = %request.uri().path(), "rejected request without valid API key");
        Err(ApiError::Unauthorized)
    }
}
