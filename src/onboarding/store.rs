//! Registration store: one device's flow state, persisted on every change.

use std::sync::Arc;

use tokio::sync::RwLock;

use super::flow::FlowController;
use super::model::{PhoneSlice, RegistrationState, settings_keys};
use crate::error::DatabaseError;
use crate::store::Database;

/// Injectable container around a [`FlowController`].
///
/// All mutations go through [`RegistrationStore::update`], which holds the
/// write lock until the new state is saved, so a device only ever has one
/// current step.
pub struct RegistrationStore {
    db: Arc<dyn Database>,
    device_id: String,
    flow: RwLock<FlowController>,
}

impl RegistrationStore {
    /// Load the saved state for `device_id`, or start empty.
    ///
    /// A record that no longer parses is discarded rather than failing the
    /// request; the user restarts the flow.
    pub async fn load(db: Arc<dyn Database>, device_id: &str) -> Result<Self, DatabaseError> {
        let state = match db
            .get_setting(device_id, settings_keys::REGISTRATION_STATE)
            .await?
        {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                tracing::warn!(device = device_id, error = %e, "Discarding unreadable registration state");
                RegistrationState::default()
            }),
            None => RegistrationState::default(),
        };
        Ok(Self {
            db,
            device_id: device_id.to_string(),
            flow: RwLock::new(FlowController::new(state)),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub async fn snapshot(&self) -> RegistrationState {
        self.flow.read().await.state().clone()
    }

    /// Run a read-only closure against the controller.
    pub async fn read<R>(&self, f: impl FnOnce(&FlowController) -> R) -> R {
        f(&*self.flow.read().await)
    }

    /// Apply `f` and persist the result.
    ///
    /// The in-memory state only changes when the write succeeds.
    pub async fn update<R>(&self, f: impl FnOnce(&mut FlowController) -> R) -> Result<R, DatabaseError> {
        let mut guard = self.flow.write().await;
        let mut next = guard.clone();
        let out = f(&mut next);
        next.state_mut().touch();
        self.save(next.state()).await?;
        *guard = next;
        Ok(out)
    }

    /// Drop all collected data, in memory and on disk.
    pub async fn reset_temporary_state(&self) -> Result<(), DatabaseError> {
        let mut guard = self.flow.write().await;
        self.db
            .delete_setting(&self.device_id, settings_keys::REGISTRATION_STATE)
            .await?;
        guard.reset();
        tracing::info!(device = %self.device_id, "Registration state reset");
        Ok(())
    }

    /// Start the flow over but keep `phone`, so a signed-in device can walk
    /// it again without re-verifying.
    pub async fn restart(&self, phone: PhoneSlice) -> Result<(), DatabaseError> {
        let mut guard = self.flow.write().await;
        let mut next = FlowController::default();
        next.reset();
        next.state_mut().phone = phone;
        self.save(next.state()).await?;
        *guard = next;
        tracing::info!(device = %self.device_id, "Registration restarted");
        Ok(())
    }

    async fn save(&self, state: &RegistrationState) -> Result<(), DatabaseError> {
        let value =
            serde_json::to_value(state).map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.db
            .set_setting(&self.device_id, settings_keys::REGISTRATION_STATE, &value)
            .await
    }
}
