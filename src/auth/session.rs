//! Access-token session for one device, persisted next to the registration
//! state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::DatabaseError;
use crate::onboarding::model::settings_keys;
use crate::store::Database;

/// An authenticated session.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub access_token: SecretString,
    pub phone: String,
    pub issued_at: DateTime<Utc>,
}

impl AuthSession {
    pub fn new(access_token: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            phone: phone.into(),
            issued_at: Utc::now(),
        }
    }
}

/// On-disk shape. The token only leaves `SecretString` here.
#[derive(Serialize, Deserialize)]
struct StoredSession {
    access_token: String,
    phone: String,
    issued_at: DateTime<Utc>,
}

impl From<&AuthSession> for StoredSession {
    fn from(s: &AuthSession) -> Self {
        Self {
            access_token: s.access_token.expose_secret().to_string(),
            phone: s.phone.clone(),
            issued_at: s.issued_at,
        }
    }
}

impl From<StoredSession> for AuthSession {
    fn from(s: StoredSession) -> Self {
        Self {
            access_token: SecretString::from(s.access_token),
            phone: s.phone,
            issued_at: s.issued_at,
        }
    }
}

/// Holds the current session of one device and writes through to the
/// settings table.
pub struct SessionStore {
    db: Arc<dyn Database>,
    device_id: String,
    session: RwLock<Option<AuthSession>>,
}

impl SessionStore {
    /// Load the persisted session. A corrupt record is dropped with a warning.
    pub async fn load(db: Arc<dyn Database>, device_id: &str) -> Result<Self, DatabaseError> {
        let session = match db.get_setting(device_id, settings_keys::AUTH_SESSION).await? {
            Some(value) => match serde_json::from_value::<StoredSession>(value) {
                Ok(stored) => Some(AuthSession::from(stored)),
                Err(e) => {
                    tracing::warn!(device = device_id, error = %e, "Discarding unreadable auth session");
                    None
                }
            },
            None => None,
        };
        Ok(Self {
            db,
            device_id: device_id.to_string(),
            session: RwLock::new(session),
        })
    }

    pub async fn get(&self) -> Option<AuthSession> {
        self.session.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.session.read().await.is_some()
    }

    pub async fn set(&self, session: AuthSession) -> Result<(), DatabaseError> {
        let value = serde_json::to_value(StoredSession::from(&session))
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let mut guard = self.session.write().await;
        self.db
            .set_setting(&self.device_id, settings_keys::AUTH_SESSION, &value)
            .await?;
        *guard = Some(session);
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), DatabaseError> {
        let mut guard = self.session.write().await;
        self.db
            .delete_setting(&self.device_id, settings_keys::AUTH_SESSION)
            .await?;
        *guard = None;
        Ok(())
    }
}
