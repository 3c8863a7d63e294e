//! `SubscriptionApi` over HTTP with reqwest.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{
    AddressRecord, AddressRequest, BatchPayment, BatchPaymentRequest, Category, ChildPayload,
    ChildRecord, IssuedToken, Plan, ProfileUpdate, SubscriptionApi, SubscriptionRecord,
    SubscriptionRequest,
};
use crate::error::ApiError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// JSON client for the upstream API.
pub struct HttpApi {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>, api_key: Option<SecretString>) -> Result<Self, ApiError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::RequestFailed {
                endpoint: base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn request(&self, method: Method, path: &str, token: Option<&SecretString>) -> RequestBuilder {
        let mut req = self.client.request(method, format!("{}{path}", self.base_url));
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key.expose_secret());
        }
        if let Some(token) = token {
            req = req.bearer_auth(token.expose_secret());
        }
        req
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder, endpoint: &str) -> Result<T, ApiError> {
        let resp = self.dispatch(req, endpoint).await?;
        resp.json::<T>().await.map_err(|e| ApiError::InvalidResponse {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })
    }

    async fn send_empty(&self, req: RequestBuilder, endpoint: &str) -> Result<(), ApiError> {
        self.dispatch(req, endpoint).await.map(|_| ())
    }

    async fn dispatch(&self, req: RequestBuilder, endpoint: &str) -> Result<reqwest::Response, ApiError> {
        let resp = req.send().await.map_err(|e| ApiError::RequestFailed {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;

        let status = resp.status();
        debug!(endpoint, status = status.as_u16(), "Upstream response");

        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized {
                endpoint: endpoint.to_string(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Rejected {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        Ok(resp)
    }

    fn json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        token: Option<&SecretString>,
        body: &B,
    ) -> RequestBuilder {
        self.request(method, path, token).json(body)
    }
}

/// Pull a human-readable message out of an error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            ["message", "detail", "error"]
                .iter()
                .find_map(|k| v.get(*k).and_then(|m| m.as_str()).map(String::from))
        })
        .unwrap_or_else(|| body.chars().take(200).collect())
}

#[derive(serde::Deserialize)]
struct DevCode {
    code: Option<String>,
}

#[async_trait]
impl SubscriptionApi for HttpApi {
    async fn request_otp(&self, phone: &str) -> Result<(), ApiError> {
        let req = self.json(Method::POST, "/auth/otp", None, &serde_json::json!({ "phone": phone }));
        self.send_empty(req, "/auth/otp").await
    }

    async fn verify_otp(&self, phone: &str, code: &str) -> Result<IssuedToken, ApiError> {
        let req = self.json(
            Method::POST,
            "/auth/otp/verify",
            None,
            &serde_json::json!({ "phone": phone, "code": code }),
        );
        self.send(req, "/auth/otp/verify").await
    }

    async fn dev_otp_code(&self, phone: &str) -> Result<Option<String>, ApiError> {
        let req = self
            .request(Method::GET, "/dev/otp", None)
            .query(&[("phone", phone)]);
        let found: DevCode = self.send(req, "/dev/otp").await?;
        Ok(found.code)
    }

    async fn update_profile(&self, token: &SecretString, profile: &ProfileUpdate) -> Result<(), ApiError> {
        let req = self.json(Method::PATCH, "/users/me", Some(token), profile);
        self.send_empty(req, "/users/me").await
    }

    async fn create_child(&self, token: &SecretString, child: &ChildPayload) -> Result<ChildRecord, ApiError> {
        let req = self.json(Method::POST, "/children", Some(token), child);
        self.send(req, "/children").await
    }

    async fn update_child(
        &self,
        token: &SecretString,
        id: u64,
        child: &ChildPayload,
    ) -> Result<ChildRecord, ApiError> {
        let path = format!("/children/{id}");
        let req = self.json(Method::PUT, &path, Some(token), child);
        self.send(req, &path).await
    }

    async fn list_interests(&self, token: &SecretString) -> Result<Vec<Category>, ApiError> {
        let req = self.request(Method::GET, "/interests", Some(token));
        self.send(req, "/interests").await
    }

    async fn list_skills(&self, token: &SecretString) -> Result<Vec<Category>, ApiError> {
        let req = self.request(Method::GET, "/skills", Some(token));
        self.send(req, "/skills").await
    }

    async fn list_plans(&self, token: &SecretString) -> Result<Vec<Plan>, ApiError> {
        let req = self.request(Method::GET, "/plans", Some(token));
        self.send(req, "/plans").await
    }

    async fn create_subscription(
        &self,
        token: &SecretString,
        request: &SubscriptionRequest,
    ) -> Result<SubscriptionRecord, ApiError> {
        let req = self.json(Method::POST, "/subscriptions", Some(token), request);
        self.send(req, "/subscriptions").await
    }

    async fn create_delivery_address(
        &self,
        token: &SecretString,
        request: &AddressRequest,
    ) -> Result<AddressRecord, ApiError> {
        let req = self.json(Method::POST, "/delivery-addresses", Some(token), request);
        self.send(req, "/delivery-addresses").await
    }

    async fn create_batch_payment(
        &self,
        token: &SecretString,
        request: &BatchPaymentRequest,
    ) -> Result<BatchPayment, ApiError> {
        let req = self
            .json(Method::POST, "/payments/batch", Some(token), request)
            .header("idempotency-key", request.idempotency_key.to_string());
        self.send(req, "/payments/batch").await
    }

    async fn get_payment(&self, token: &SecretString, id: &str) -> Result<BatchPayment, ApiError> {
        let path = format!("/payments/{id}");
        let req = self.request(Method::GET, &path, Some(token));
        self.send(req, &path).await
    }
}
