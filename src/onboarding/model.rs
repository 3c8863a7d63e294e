//! Registration aggregate: one slice per onboarding screen.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::step::{self, Step};
use crate::error::ValidationError;

/// Phone entry and OTP verification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhoneSlice {
    /// Normalized E.164 number, empty until submitted.
    pub number: String,
    pub verified: bool,
    /// Code fetched by the dev autofill helper, never set in production.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autofill_code: Option<String>,
}

/// Names collected on the welcome screen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WelcomeSlice {
    pub first_name: String,
    pub last_name: String,
}

/// Account details collected on the register screen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationSlice {
    pub email: String,
    /// Display name for the account.
    pub name: String,
    pub terms_accepted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Boy,
    Girl,
}

/// The child profile being created or edited.
///
/// `id` present means the profile already exists upstream and is updated in
/// place; absent means a new profile is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditingChild {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    pub has_limitations: bool,
    /// Required when `has_limitations` is set.
    pub comment: String,
    pub interest_ids: Vec<u64>,
    pub skill_ids: Vec<u64>,
}

impl EditingChild {
    /// Check the form before it is submitted. Returns the first failing field.
    pub fn validate(&self, today: NaiveDate) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::Required { field: "name" });
        }
        let birth_date = self
            .birth_date
            .ok_or(ValidationError::Required { field: "birth_date" })?;
        if birth_date > today {
            return Err(ValidationError::Invalid {
                field: "birth_date",
                reason: "cannot be in the future".to_string(),
            });
        }
        if self.gender.is_none() {
            return Err(ValidationError::Required { field: "gender" });
        }
        if self.has_limitations && self.comment.trim().is_empty() {
            return Err(ValidationError::Required { field: "comment" });
        }
        Ok(())
    }
}

/// Interests and skills picked for the child.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoriesSlice {
    pub interest_ids: Vec<u64>,
    pub skill_ids: Vec<u64>,
}

/// Chosen subscription tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionSlice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    /// Upstream subscription id once `validate_subscriptions` created it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<u64>,
}

impl SubscriptionSlice {
    pub fn selected_plan(&self) -> Option<&str> {
        self.plan_id.as_deref().filter(|id| !id.trim().is_empty())
    }
}

/// Delivery logistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySlice {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    /// Delivery window, e.g. `"10:00-14:00"`.
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_id: Option<u64>,
}

impl DeliverySlice {
    pub fn is_filled(&self) -> bool {
        !self.address.trim().is_empty() && self.date.is_some() && !self.time.trim().is_empty()
    }
}

/// Payment outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentSlice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    /// Hosted checkout page returned by the upstream API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    /// Sent with every attempt for the same payment so a retry never charges
    /// twice. Cleared when the payment fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<Uuid>,
    pub confirmed: bool,
}

/// Everything the flow has collected so far.
///
/// Persisted as one JSON blob under [`settings_keys::REGISTRATION_STATE`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationState {
    #[serde(deserialize_with = "step::deserialize_lenient")]
    pub current_step: Step,
    pub phone: PhoneSlice,
    pub welcome: WelcomeSlice,
    pub registration: RegistrationSlice,
    pub child: EditingChild,
    pub categories: CategoriesSlice,
    pub subscription: SubscriptionSlice,
    pub delivery: DeliverySlice,
    pub payment: PaymentSlice,
    /// Inline error from the last failed submit, cleared on the next success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RegistrationState {
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}

/// Settings keys used for onboarding persistence.
pub mod settings_keys {
    /// Key for the `RegistrationState` JSON blob.
    pub const REGISTRATION_STATE: &str = "registration_state";
    /// Key for the `AuthSession` JSON blob.
    pub const AUTH_SESSION: &str = "auth_session";
    /// Device id used when the client sends none.
    pub const DEFAULT_DEVICE: &str = "default";
}
