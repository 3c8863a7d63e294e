//! Per-device state: registration flow, auth session, and resend timer.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tokio::sync::{Mutex, MutexGuard};

use crate::auth::otp::{ResendStatus, ResendTimer};
use crate::auth::session::SessionStore;
use crate::error::DatabaseError;
use crate::onboarding::model::{PhoneSlice, settings_keys};
use crate::onboarding::store::RegistrationStore;
use crate::store::Database;

/// Header carrying the client's device id.
pub const DEVICE_HEADER: &str = "x-device-id";

const MAX_DEVICE_ID_LEN: usize = 128;

/// Device id taken from [`DEVICE_HEADER`]. Missing, blank or oversized values
/// fall back to [`settings_keys::DEFAULT_DEVICE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn from_header(value: Option<&str>) -> Self {
        let id = value
            .map(str::trim)
            .filter(|v| !v.is_empty() && v.len() <= MAX_DEVICE_ID_LEN)
            .unwrap_or(settings_keys::DEFAULT_DEVICE);
        Self(id.to_string())
    }
}

impl<S: Send + Sync> FromRequestParts<S> for DeviceId {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(DEVICE_HEADER)
            .and_then(|v| v.to_str().ok());
        Ok(Self::from_header(value))
    }
}

/// Everything held for one client device.
pub struct Device {
    pub id: String,
    pub registration: Arc<RegistrationStore>,
    pub session: SessionStore,
    resend: Mutex<Option<ResendTimer>>,
    submits: Mutex<()>,
}

impl Device {
    async fn load(db: Arc<dyn Database>, id: &str) -> Result<Self, DatabaseError> {
        Ok(Self {
            id: id.to_string(),
            registration: Arc::new(RegistrationStore::load(Arc::clone(&db), id).await?),
            session: SessionStore::load(db, id).await?,
            resend: Mutex::new(None),
            submits: Mutex::new(()),
        })
    }

    pub async fn resend_status(&self) -> ResendStatus {
        self.resend
            .lock()
            .await
            .as_ref()
            .map(ResendTimer::status)
            .unwrap_or_else(ResendStatus::ready)
    }

    /// Replace the running countdown with a fresh one.
    pub async fn restart_resend_timer(&self, secs: u64) -> ResendStatus {
        let timer = ResendTimer::start(secs);
        let status = timer.status();
        *self.resend.lock().await = Some(timer);
        status
    }

    pub async fn stop_resend_timer(&self) {
        self.resend.lock().await.take();
    }

    /// Held for the whole of a step submit, upstream calls included.
    pub async fn lock_submits(&self) -> MutexGuard<'_, ()> {
        self.submits.lock().await
    }

    /// Start the flow over. A signed-in device keeps its verified phone.
    pub async fn restart_flow(&self) -> Result<(), DatabaseError> {
        match self.session.get().await {
            Some(session) => {
                self.registration
                    .restart(PhoneSlice {
                        number: session.phone,
                        verified: true,
                        autofill_code: None,
                    })
                    .await
            }
            None => self.registration.reset_temporary_state().await,
        }
    }

    /// Forget the session and everything collected for this device.
    pub async fn sign_out(&self) -> Result<(), DatabaseError> {
        self.session.clear().await?;
        self.registration.reset_temporary_state().await?;
        self.stop_resend_timer().await;
        tracing::info!(device = %self.id, "Device signed out");
        Ok(())
    }
}

/// Lazily loaded devices, keyed by the id the client sends.
pub struct DeviceRegistry {
    db: Arc<dyn Database>,
    devices: Mutex<HashMap<String, Arc<Device>>>,
}

impl DeviceRegistry {
    pub fn new(db: Arc<dyn Database>) -> Arc<Self> {
        Arc::new(Self {
            db,
            devices: Mutex::new(HashMap::new()),
        })
    }

    /// Get the device, loading its persisted state on first use.
    pub async fn get(&self, id: &str) -> Result<Arc<Device>, DatabaseError> {
        let mut devices = self.devices.lock().await;
        if let Some(device) = devices.get(id) {
            return Ok(Arc::clone(device));
        }
        let device = Arc::new(Device::load(Arc::clone(&self.db), id).await?);
        devices.insert(id.to_string(), Arc::clone(&device));
        tracing::debug!(device = id, "Device loaded");
        Ok(device)
    }

    pub async fn len(&self) -> usize {
        self.devices.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.lock().await.is_empty()
    }
}
