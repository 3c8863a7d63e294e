//! In-memory [`SubscriptionApi`] for unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use uuid::Uuid;

use super::*;

pub const VALID_CODE: &str = "1234";

pub struct StubApi {
    pub calls: Mutex<Vec<String>>,
    pub idempotency_keys: Mutex<Vec<Uuid>>,
    pub payment_status: Mutex<PaymentStatus>,
    /// Every call fails with 401 while set.
    pub unauthorized: AtomicBool,
    /// The next call fails with 422 and this message.
    pub reject_next: Mutex<Option<String>>,
}

impl Default for StubApi {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            idempotency_keys: Mutex::new(Vec::new()),
            payment_status: Mutex::new(PaymentStatus::Paid),
            unauthorized: AtomicBool::new(false),
            reject_next: Mutex::new(None),
        }
    }
}

impl StubApi {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, endpoint: &str) -> usize {
        self.calls().iter().filter(|c| *c == endpoint).count()
    }

    fn hit(&self, endpoint: &str) -> Result<(), ApiError> {
        self.calls.lock().unwrap().push(endpoint.to_string());
        if self.unauthorized.load(Ordering::SeqCst) {
            return Err(ApiError::Unauthorized {
                endpoint: endpoint.to_string(),
            });
        }
        if let Some(message) = self.reject_next.lock().unwrap().take() {
            return Err(ApiError::Rejected {
                endpoint: endpoint.to_string(),
                status: 422,
                message,
            });
        }
        Ok(())
    }

    fn payment(&self) -> BatchPayment {
        BatchPayment {
            id: "pay_1".into(),
            status: *self.payment_status.lock().unwrap(),
            amount: dec!(29.90),
            checkout_url: Some("https://pay.example/pay_1".into()),
        }
    }
}

fn category(id: u64, name: &str) -> Category {
    Category {
        id,
        name: name.into(),
    }
}

#[async_trait]
impl SubscriptionApi for StubApi {
    async fn request_otp(&self, _phone: &str) -> Result<(), ApiError> {
        self.hit("request_otp")
    }

    async fn verify_otp(&self, phone: &str, code: &str) -> Result<IssuedToken, ApiError> {
        self.hit("verify_otp")?;
        if code != VALID_CODE {
            return Err(ApiError::Rejected {
                endpoint: "/auth/otp/verify".into(),
                status: 400,
                message: "Invalid code".into(),
            });
        }
        Ok(IssuedToken {
            access_token: format!("tok-{phone}"),
        })
    }

    async fn dev_otp_code(&self, _phone: &str) -> Result<Option<String>, ApiError> {
        self.hit("dev_otp_code")?;
        Ok(Some(VALID_CODE.into()))
    }

    async fn update_profile(&self, _: &SecretString, _: &ProfileUpdate) -> Result<(), ApiError> {
        self.hit("update_profile")
    }

    async fn create_child(&self, _: &SecretString, _: &ChildPayload) -> Result<ChildRecord, ApiError> {
        self.hit("create_child")?;
        Ok(ChildRecord { id: 11 })
    }

    async fn update_child(
        &self,
        _: &SecretString,
        id: u64,
        _: &ChildPayload,
    ) -> Result<ChildRecord, ApiError> {
        self.hit("update_child")?;
        Ok(ChildRecord { id })
    }

    async fn list_interests(&self, _: &SecretString) -> Result<Vec<Category>, ApiError> {
        self.hit("list_interests")?;
        Ok(vec![category(1, "Lego"), category(2, "Puzzles"), category(3, "Books")])
    }

    async fn list_skills(&self, _: &SecretString) -> Result<Vec<Category>, ApiError> {
        self.hit("list_skills")?;
        Ok(vec![category(10, "Fine motor"), category(11, "Logic")])
    }

    async fn list_plans(&self, _: &SecretString) -> Result<Vec<Plan>, ApiError> {
        self.hit("list_plans")?;
        Ok(vec![
            Plan {
                id: "monthly".into(),
                name: "Monthly".into(),
                price: dec!(29.90),
                boxes: 1,
            },
            Plan {
                id: "quarterly".into(),
                name: "Quarterly".into(),
                price: dec!(27.90),
                boxes: 3,
            },
        ])
    }

    async fn create_subscription(
        &self,
        _: &SecretString,
        _: &SubscriptionRequest,
    ) -> Result<SubscriptionRecord, ApiError> {
        self.hit("create_subscription")?;
        Ok(SubscriptionRecord { id: 501 })
    }

    async fn create_delivery_address(
        &self,
        _: &SecretString,
        _: &AddressRequest,
    ) -> Result<AddressRecord, ApiError> {
        self.hit("create_delivery_address")?;
        Ok(AddressRecord { id: 77 })
    }

    async fn create_batch_payment(
        &self,
        _: &SecretString,
        request: &BatchPaymentRequest,
    ) -> Result<BatchPayment, ApiError> {
        self.idempotency_keys
            .lock()
            .unwrap()
            .push(request.idempotency_key);
        self.hit("create_batch_payment")?;
        Ok(self.payment())
    }

    async fn get_payment(&self, _: &SecretString, _id: &str) -> Result<BatchPayment, ApiError> {
        self.hit("get_payment")?;
        Ok(self.payment())
    }
}
