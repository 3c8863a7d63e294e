//! REST endpoints for the onboarding flow.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use super::manager::{FlowResponse, OnboardingManager};
use super::screen::StepAction;
use crate::device::DeviceId;
use crate::error::Error;

/// Shared state for onboarding routes.
#[derive(Clone)]
pub struct OnboardingRouteState {
    pub manager: Arc<OnboardingManager>,
}

#[derive(Debug, Default, Deserialize)]
struct ValidateRequest {
    /// Client router path, e.g. `/onboarding/delivery`.
    #[serde(default)]
    path: Option<String>,
}

/// GET /api/onboarding/state
async fn get_state(
    State(state): State<OnboardingRouteState>,
    DeviceId(device): DeviceId,
) -> Result<impl IntoResponse, Error> {
    Ok(Json(state.manager.state(&device).await?))
}

async fn act(
    state: &OnboardingRouteState,
    device: &str,
    action: StepAction,
) -> Result<Json<FlowResponse>, Error> {
    Ok(Json(state.manager.act(device, action).await?))
}

/// POST /api/onboarding/next
async fn next(
    State(state): State<OnboardingRouteState>,
    DeviceId(device): DeviceId,
) -> Result<impl IntoResponse, Error> {
    act(&state, &device, StepAction::Next).await
}

/// POST /api/onboarding/prev
async fn prev(
    State(state): State<OnboardingRouteState>,
    DeviceId(device): DeviceId,
) -> Result<impl IntoResponse, Error> {
    act(&state, &device, StepAction::Back).await
}

/// POST /api/onboarding/close
///
/// Leaves the flow for the landing page. Collected data is kept.
async fn close(
    State(state): State<OnboardingRouteState>,
    DeviceId(device): DeviceId,
) -> Result<impl IntoResponse, Error> {
    act(&state, &device, StepAction::Close).await
}

/// POST /api/onboarding/validate
///
/// Called by the client on every navigation. Body is optional.
async fn validate(
    State(state): State<OnboardingRouteState>,
    DeviceId(device): DeviceId,
    body: Option<Json<ValidateRequest>>,
) -> Result<impl IntoResponse, Error> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    Ok(Json(
        state
            .manager
            .validate(&device, req.path.as_deref())
            .await?,
    ))
}

/// POST /api/onboarding/reset
async fn reset(
    State(state): State<OnboardingRouteState>,
    DeviceId(device): DeviceId,
) -> Result<impl IntoResponse, Error> {
    Ok(Json(state.manager.reset(&device).await?))
}

/// GET /api/onboarding/steps/{step}
async fn get_step(
    State(state): State<OnboardingRouteState>,
    DeviceId(device): DeviceId,
    Path(step): Path<String>,
) -> Result<impl IntoResponse, Error> {
    Ok(Json(state.manager.screen(&device, &step).await?))
}

/// POST /api/onboarding/steps/{step}
async fn submit(
    State(state): State<OnboardingRouteState>,
    DeviceId(device): DeviceId,
    Path(step): Path<String>,
    body: Option<Json<serde_json::Value>>,
) -> Result<impl IntoResponse, Error> {
    let body = body.map(|Json(v)| v).unwrap_or_default();
    Ok(Json(state.manager.submit(&device, &step, body).await?))
}

/// Build the onboarding REST routes.
pub fn onboarding_routes(state: OnboardingRouteState) -> Router {
    Router::new()
        .route("/api/onboarding/state", get(get_state))
        .route("/api/onboarding/next", post(next))
        .route("/api/onboarding/prev", post(prev))
        .route("/api/onboarding/close", post(close))
        .route("/api/onboarding/validate", post(validate))
        .route("/api/onboarding/reset", post(reset))
        .route(
            "/api/onboarding/steps/{step}",
            get(get_step).post(submit),
        )
        .with_state(state)
}
