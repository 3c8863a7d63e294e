//! Upstream subscription API: the REST collaborators the flow consumes.
//!
//! Every call is opaque to the flow: success lets the step advance, failure
//! becomes the step's inline error.

pub mod http;
#[cfg(test)]
pub mod stub;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::onboarding::model::{EditingChild, Gender};

pub use http::HttpApi;

/// Access token issued after OTP verification.
#[derive(Debug, Clone, Deserialize)]
pub struct IssuedToken {
    pub access_token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileUpdate {
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terms_accepted: Option<bool>,
}

/// Child profile as the upstream API expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChildPayload {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    pub has_limitations: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub interest_ids: Vec<u64>,
    pub skill_ids: Vec<u64>,
}

impl From<&EditingChild> for ChildPayload {
    fn from(child: &EditingChild) -> Self {
        Self {
            name: child.name.trim().to_string(),
            birth_date: child.birth_date,
            gender: child.gender,
            has_limitations: child.has_limitations,
            comment: Some(child.comment.trim())
                .filter(|c| child.has_limitations && !c.is_empty())
                .map(String::from),
            interest_ids: child.interest_ids.clone(),
            skill_ids: child.skill_ids.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChildRecord {
    pub id: u64,
}

/// An interest or a skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: u64,
    pub name: String,
}

/// A subscription tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    /// Price per box.
    pub price: Decimal,
    /// Boxes delivered per billing period.
    pub boxes: u32,
}

impl Plan {
    /// Amount charged for one billing period.
    pub fn total(&self) -> Decimal {
        self.price * Decimal::from(self.boxes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRequest {
    pub plan_id: String,
    pub child_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscriptionRecord {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressRequest {
    pub address: String,
    pub date: NaiveDate,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AddressRecord {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchPaymentRequest {
    pub subscription_ids: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_id: Option<u64>,
    /// Reused across retries so the upstream charges once.
    pub idempotency_key: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BatchPayment {
    pub id: String,
    pub status: PaymentStatus,
    pub amount: Decimal,
    #[serde(default)]
    pub checkout_url: Option<String>,
}

/// The upstream REST API, as seen by the onboarding flow.
#[async_trait]
pub trait SubscriptionApi: Send + Sync {
    /// Send a one-time code to `phone`.
    async fn request_otp(&self, phone: &str) -> Result<(), ApiError>;

    /// Exchange a code for an access token.
    async fn verify_otp(&self, phone: &str, code: &str) -> Result<IssuedToken, ApiError>;

    /// Look up the last code sent to `phone`. Only served by dev deployments.
    async fn dev_otp_code(&self, phone: &str) -> Result<Option<String>, ApiError>;

    async fn update_profile(
        &self,
        token: &SecretString,
        profile: &ProfileUpdate,
    ) -> Result<(), ApiError>;

    async fn create_child(
        &self,
        token: &SecretString,
        child: &ChildPayload,
    ) -> Result<ChildRecord, ApiError>;

    async fn update_child(
        &self,
        token: &SecretString,
        id: u64,
        child: &ChildPayload,
    ) -> Result<ChildRecord, ApiError>;

    async fn list_interests(&self, token: &SecretString) -> Result<Vec<Category>, ApiError>;

    async fn list_skills(&self, token: &SecretString) -> Result<Vec<Category>, ApiError>;

    async fn list_plans(&self, token: &SecretString) -> Result<Vec<Plan>, ApiError>;

    async fn create_subscription(
        &self,
        token: &SecretString,
        request: &SubscriptionRequest,
    ) -> Result<SubscriptionRecord, ApiError>;

    async fn create_delivery_address(
        &self,
        token: &SecretString,
        request: &AddressRequest,
    ) -> Result<AddressRecord, ApiError>;

    async fn create_batch_payment(
        &self,
        token: &SecretString,
        request: &BatchPaymentRequest,
    ) -> Result<BatchPayment, ApiError>;

    async fn get_payment(&self, token: &SecretString, id: &str) -> Result<BatchPayment, ApiError>;
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn plan_total_multiplies_boxes() {
        let plan = Plan {
            id: "quarterly".into(),
            name: "Quarterly".into(),
            price: dec!(29.90),
            boxes: 3,
        };
        assert_eq!(plan.total(), dec!(89.70));
    }

    #[test]
    fn child_payload_drops_comment_without_limitations() {
        let child = EditingChild {
            name: " Mia ".into(),
            comment: "left over".into(),
            has_limitations: false,
            ..Default::default()
        };
        let payload = ChildPayload::from(&child);
        assert_eq!(payload.name, "Mia");
        assert!(payload.comment.is_none());

        let limited = EditingChild {
            has_limitations: true,
            comment: "No small parts".into(),
            ..child
        };
        assert_eq!(
            ChildPayload::from(&limited).comment.as_deref(),
            Some("No small parts")
        );
    }

    #[test]
    fn payment_status_parses_snake_case() {
        let json = serde_json::json!({
            "id": "pay_1",
            "status": "paid",
            "amount": "89.70"
        });
        let payment: BatchPayment = serde_json::from_value(json).unwrap();
        assert_eq!(payment.status, PaymentStatus::Paid);
        assert_eq!(payment.amount, dec!(89.70));
        assert!(payment.checkout_url.is_none());
    }
}
