//! HTTP app assembly: merges the module routers and applies shared layers.

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

use crate::auth::{AuthManager, AuthRouteState, auth_routes};
use crate::onboarding::{OnboardingManager, OnboardingRouteState, onboarding_routes};

/// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}))
}

/// Build the full router served by the binary.
pub fn build_router(onboarding: Arc<OnboardingManager>, auth: Arc<AuthManager>) -> Router {
    // The mobile client calls from its own origin and sends `x-device-id`.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .merge(onboarding_routes(OnboardingRouteState {
            manager: onboarding,
        }))
        .merge(auth_routes(AuthRouteState { manager: auth }))
        .layer(ServiceBuilder::new().layer(cors))
}
