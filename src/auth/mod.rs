//! Phone sign-in: OTP request, resend countdown, verification and logout.

pub mod otp;
pub mod routes;
pub mod session;

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::api::SubscriptionApi;
use crate::config::OtpConfig;
use crate::device::{Device, DeviceRegistry};
use crate::error::{ApiError, Error, ValidationError};
use crate::onboarding::FlowResponse;
use crate::onboarding::step::Route;

pub use otp::{ResendStatus, ResendTimer};
pub use routes::{AuthRouteState, auth_routes};
pub use session::{AuthSession, SessionStore};

/// Reply to a code request.
#[derive(Debug, Clone, Serialize)]
pub struct CodeSent {
    pub phone: String,
    pub resend: ResendStatus,
}

/// Reply to a verification attempt.
#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub flow: FlowResponse,
}

pub struct AuthManager {
    api: Arc<dyn SubscriptionApi>,
    devices: Arc<DeviceRegistry>,
    otp: OtpConfig,
}

impl AuthManager {
    pub fn new(api: Arc<dyn SubscriptionApi>, devices: Arc<DeviceRegistry>, otp: OtpConfig) -> Self {
        Self { api, devices, otp }
    }

    /// Send a code to `raw_phone` and start the resend countdown.
    pub async fn request_code(&self, device_id: &str, raw_phone: &str) -> Result<CodeSent, Error> {
        let phone = otp::normalize_phone(raw_phone)?;
        let device = self.devices.get(device_id).await?;
        self.send_code(&device, phone).await
    }

    /// Send another code to the number already entered.
    pub async fn resend(&self, device_id: &str) -> Result<CodeSent, Error> {
        let device = self.devices.get(device_id).await?;
        let phone = device.registration.snapshot().await.phone.number;
        if phone.is_empty() {
            return Err(ValidationError::Required { field: "phone" }.into());
        }
        self.send_code(&device, phone).await
    }

    pub async fn resend_status(&self, device_id: &str) -> Result<ResendStatus, Error> {
        let device = self.devices.get(device_id).await?;
        Ok(device.resend_status().await)
    }

    async fn send_code(&self, device: &Arc<Device>, phone: String) -> Result<CodeSent, Error> {
        let status = device.resend_status().await;
        if !status.can_resend {
            return Err(ValidationError::ResendLocked {
                remaining_secs: status.remaining_secs,
            }
            .into());
        }

        self.api.request_otp(&phone).await?;
        device
            .registration
            .update(|flow| {
                let state = flow.state_mut();
                state.phone.number = phone.clone();
                state.phone.verified = false;
                state.phone.autofill_code = None;
                state.clear_error();
            })
            .await?;
        let resend = device.restart_resend_timer(self.otp.resend_secs).await;
        info!(device = %device.id, phone = %phone, "OTP sent");

        if self.otp.dev_autofill {
            otp::spawn_dev_autofill(
                Arc::clone(&self.api),
                Arc::clone(&device.registration),
                phone.clone(),
                self.otp.dev_autofill_delay,
            );
        }
        Ok(CodeSent { phone, resend })
    }

    /// Exchange the code for a session and route into the flow.
    ///
    /// A wrong code is reported inline and keeps the user on phone entry.
    pub async fn verify_code(&self, device_id: &str, raw_code: &str) -> Result<Verification, Error> {
        let code = otp::validate_code(raw_code)?;
        let device = self.devices.get(device_id).await?;
        let phone = device.registration.snapshot().await.phone.number;
        if phone.is_empty() {
            return Err(ValidationError::Required { field: "phone" }.into());
        }

        let token = match self.api.verify_otp(&phone, &code).await {
            Ok(token) => token,
            Err(e @ (ApiError::Rejected { .. } | ApiError::Unauthorized { .. })) => {
                warn!(device = device_id, error = %e, "OTP rejected");
                let message = match e {
                    ApiError::Rejected { message, .. } if !message.trim().is_empty() => message,
                    _ => "Invalid code".to_string(),
                };
                device
                    .registration
                    .update(|flow| flow.state_mut().set_error(message.clone()))
                    .await?;
                return Ok(Verification {
                    verified: false,
                    error: Some(message),
                    flow: FlowResponse::leave(Route::Phone),
                });
            }
            Err(e) => return Err(e.into()),
        };

        device
            .session
            .set(AuthSession::new(token.access_token, phone.clone()))
            .await?;
        device.stop_resend_timer().await;
        let flow = device
            .registration
            .update(|flow| {
                let state = flow.state_mut();
                state.phone.verified = true;
                state.phone.autofill_code = None;
                state.clear_error();
                let route = flow.validate_and_redirect(true);
                FlowResponse::at(route, flow)
            })
            .await?;
        info!(device = device_id, phone = %phone, route = %flow.route, "Phone verified");
        Ok(Verification {
            verified: true,
            error: None,
            flow,
        })
    }

    /// Drop the session and all collected data.
    pub async fn logout(&self, device_id: &str) -> Result<FlowResponse, Error> {
        let device = self.devices.get(device_id).await?;
        device.sign_out().await?;
        Ok(FlowResponse::leave(Route::Home))
    }
}
