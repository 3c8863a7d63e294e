//! REST endpoints for phone sign-in.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use super::AuthManager;
use crate::device::DeviceId;
use crate::error::Error;

/// Shared state for auth routes.
#[derive(Clone)]
pub struct AuthRouteState {
    pub manager: Arc<AuthManager>,
}

#[derive(Deserialize)]
struct PhoneRequest {
    phone: String,
}

#[derive(Deserialize)]
struct VerifyRequest {
    code: String,
}

/// POST /api/auth/phone
async fn request_code(
    State(state): State<AuthRouteState>,
    DeviceId(device): DeviceId,
    Json(req): Json<PhoneRequest>,
) -> Result<impl IntoResponse, Error> {
    Ok(Json(state.manager.request_code(&device, &req.phone).await?))
}

/// POST /api/auth/verify
async fn verify_code(
    State(state): State<AuthRouteState>,
    DeviceId(device): DeviceId,
    Json(req): Json<VerifyRequest>,
) -> Result<impl IntoResponse, Error> {
    Ok(Json(state.manager.verify_code(&device, &req.code).await?))
}

/// POST /api/auth/resend
async fn resend(
    State(state): State<AuthRouteState>,
    DeviceId(device): DeviceId,
) -> Result<impl IntoResponse, Error> {
    Ok(Json(state.manager.resend(&device).await?))
}

/// GET /api/auth/resend
///
/// Seconds left on the countdown, for clients that poll instead of ticking
/// locally.
async fn resend_status(
    State(state): State<AuthRouteState>,
    DeviceId(device): DeviceId,
) -> Result<impl IntoResponse, Error> {
    Ok(Json(state.manager.resend_status(&device).await?))
}

/// POST /api/auth/logout
async fn logout(
    State(state): State<AuthRouteState>,
    DeviceId(device): DeviceId,
) -> Result<impl IntoResponse, Error> {
    Ok(Json(state.manager.logout(&device).await?))
}

/// Build the auth REST routes.
pub fn auth_routes(state: AuthRouteState) -> Router {
    Router::new()
        .route("/api/auth/phone", post(request_code))
        .route("/api/auth/verify", post(verify_code))
        .route("/api/auth/resend", post(resend).get(resend_status))
        .route("/api/auth/logout", post(logout))
        .with_state(state)
}
