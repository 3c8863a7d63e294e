//! OnboardingManager: runs step submits against the upstream API and drives
//! navigation for each device.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use secrecy::SecretString;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::flow::{FlowController, Transition};
use super::forms::{
    CategoriesForm, ChildForm, DeliveryForm, RegisterForm, StepSubmission, SubscriptionForm,
    WelcomeForm,
};
use super::model::{CategoriesSlice, PaymentSlice, RegistrationState};
use super::screen::{self, ActionOutcome, StepAction, StepScreen};
use super::step::{Route, Step};
use crate::api::{
    AddressRequest, BatchPayment, BatchPaymentRequest, Category, ChildPayload, PaymentStatus,
    ProfileUpdate, SubscriptionApi, SubscriptionRequest,
};
use crate::device::{Device, DeviceRegistry};
use crate::error::{ApiError, DatabaseError, Error, ValidationError};

const GENERIC_FAILURE: &str = "Something went wrong, please try again";

/// Where the client should be, and what to draw there.
#[derive(Debug, Clone, Serialize)]
pub struct FlowResponse {
    pub route: Route,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<Transition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screen: Option<StepScreen>,
}

impl FlowResponse {
    /// Navigate away from the flow.
    pub fn leave(route: Route) -> Self {
        Self {
            route,
            transition: None,
            screen: None,
        }
    }

    /// Navigate to `route`, rendering its screen when it is a step.
    pub fn at(route: Route, flow: &FlowController) -> Self {
        Self {
            route,
            transition: None,
            screen: route.step().map(|step| screen::render(step, flow)),
        }
    }

    /// Stay on the current step.
    pub fn current(flow: &FlowController) -> Self {
        Self::at(flow.current_step().route(), flow)
    }

    pub fn advanced(&self) -> bool {
        self.transition.is_some_and(|t| t.moved())
    }
}

type Patch = Box<dyn FnOnce(&mut RegistrationState) + Send>;

/// What a successful submit writes back.
struct Applied {
    patch: Patch,
    advance: bool,
}

impl Applied {
    fn advance(patch: impl FnOnce(&mut RegistrationState) + Send + 'static) -> Self {
        Self {
            patch: Box::new(patch),
            advance: true,
        }
    }

    fn stay(patch: impl FnOnce(&mut RegistrationState) + Send + 'static) -> Self {
        Self {
            patch: Box::new(patch),
            advance: false,
        }
    }
}

enum StepFailure {
    Invalid(ValidationError),
    Api(ApiError),
    /// A precondition inside the flow, shown inline.
    Flow(&'static str),
    Store(DatabaseError),
}

impl From<ValidationError> for StepFailure {
    fn from(e: ValidationError) -> Self {
        Self::Invalid(e)
    }
}

impl From<ApiError> for StepFailure {
    fn from(e: ApiError) -> Self {
        Self::Api(e)
    }
}

impl From<DatabaseError> for StepFailure {
    fn from(e: DatabaseError) -> Self {
        Self::Store(e)
    }
}

/// Coordinates the onboarding flow across devices.
pub struct OnboardingManager {
    api: Arc<dyn SubscriptionApi>,
    devices: Arc<DeviceRegistry>,
}

impl OnboardingManager {
    pub fn new(api: Arc<dyn SubscriptionApi>, devices: Arc<DeviceRegistry>) -> Self {
        Self { api, devices }
    }

    /// Current screen. Unauthenticated devices are pointed at phone entry.
    pub async fn state(&self, device_id: &str) -> Result<FlowResponse, Error> {
        let device = self.devices.get(device_id).await?;
        let authenticated = device.session.is_authenticated().await;
        Ok(device
            .registration
            .read(|flow| FlowResponse {
                route: if authenticated {
                    flow.current_step().route()
                } else {
                    Route::Phone
                },
                transition: None,
                screen: Some(screen::render_current(flow)),
            })
            .await)
    }

    /// Apply a screen's back / next / close action.
    pub async fn act(&self, device_id: &str, action: StepAction) -> Result<FlowResponse, Error> {
        let device = self.devices.get(device_id).await?;
        if action != StepAction::Close && !device.session.is_authenticated().await {
            return Ok(FlowResponse::leave(Route::Phone));
        }
        let response = device
            .registration
            .update(|flow| match screen::apply_action(flow, action) {
                ActionOutcome::Navigated(transition) => FlowResponse {
                    transition: Some(transition),
                    ..FlowResponse::current(flow)
                },
                ActionOutcome::Left(route) => FlowResponse::leave(route),
            })
            .await?;
        info!(device = device_id, ?action, route = %response.route, "Onboarding action");
        Ok(response)
    }

    /// Reconcile the client's location with the flow.
    ///
    /// `path` is where the client router currently is. A step path is honored
    /// when its gate passes; otherwise the device lands on its current step,
    /// or on the first open step when the current one is closed.
    pub async fn validate(&self, device_id: &str, path: Option<&str>) -> Result<FlowResponse, Error> {
        let device = self.devices.get(device_id).await?;
        let authenticated = device.session.is_authenticated().await;
        let requested = path.and_then(Route::parse).and_then(|r| r.step());
        let response = device
            .registration
            .update(|flow| {
                if let (true, Some(step)) = (authenticated, requested) {
                    flow.go_to(step);
                }
                let route = flow.validate_and_redirect(authenticated);
                FlowResponse::at(route, flow)
            })
            .await?;
        Ok(response)
    }

    /// Render `raw_step` for the device without moving it. Unknown names
    /// render the first step.
    pub async fn screen(&self, device_id: &str, raw_step: &str) -> Result<StepScreen, Error> {
        let device = self.devices.get(device_id).await?;
        Ok(device
            .registration
            .read(|flow| screen::render_named(raw_step, flow))
            .await)
    }

    /// Drop everything collected for the device. The session, and with it
    /// the verified phone, is kept.
    pub async fn reset(&self, device_id: &str) -> Result<FlowResponse, Error> {
        let device = self.devices.get(device_id).await?;
        let _submits = device.lock_submits().await;
        device.restart_flow().await?;
        let authenticated = device.session.is_authenticated().await;
        Ok(device
            .registration
            .read(|flow| {
                if authenticated {
                    FlowResponse::current(flow)
                } else {
                    FlowResponse::leave(Route::Phone)
                }
            })
            .await)
    }

    /// Submit the form of `raw_step`, which must be the current step.
    ///
    /// Submits for one device run one at a time, and the result is only
    /// applied if the device is still on `raw_step` when it comes back.
    ///
    /// Field errors come back as `Err(Error::Validation)`. Upstream failures
    /// are stored as the step's inline error and the step is kept, except a
    /// rejected session, which signs the device out.
    pub async fn submit(
        &self,
        device_id: &str,
        raw_step: &str,
        body: serde_json::Value,
    ) -> Result<FlowResponse, Error> {
        let step: Step = raw_step.parse().map_err(|e| ValidationError::Invalid {
            field: "step",
            reason: format!("{e}"),
        })?;
        let device = self.devices.get(device_id).await?;
        let Some(session) = device.session.get().await else {
            return Ok(FlowResponse::leave(Route::Phone));
        };
        let _submits = device.lock_submits().await;
        let current = device.registration.read(FlowController::current_step).await;
        if step != current {
            return Err(ValidationError::Invalid {
                field: "step",
                reason: format!("current step is {current}"),
            }
            .into());
        }

        let submission = StepSubmission::parse(step, body)?;
        if let StepSubmission::Success = submission {
            device.restart_flow().await?;
            info!(device = device_id, "Onboarding finished");
            return Ok(FlowResponse::leave(Route::Home));
        }

        let state = device.registration.snapshot().await;
        match self
            .handle(submission, &device, &state, &session.access_token)
            .await
        {
            Ok(applied) => {
                let response = device
                    .registration
                    .update(move |flow| {
                        // A back/next action may have landed while upstream was awaited.
                        let at = flow.current_step();
                        if at != step {
                            return FlowResponse {
                                transition: Some(Transition::Blocked { at }),
                                ..FlowResponse::current(flow)
                            };
                        }
                        flow.state_mut().clear_error();
                        (applied.patch)(flow.state_mut());
                        let transition = applied.advance.then(|| flow.go_to_next_step());
                        FlowResponse {
                            transition,
                            ..FlowResponse::current(flow)
                        }
                    })
                    .await?;
                info!(device = device_id, step = %step, route = %response.route, "Step submitted");
                Ok(response)
            }
            Err(StepFailure::Invalid(e)) => Err(e.into()),
            Err(StepFailure::Store(e)) => Err(e.into()),
            Err(StepFailure::Api(e)) if e.is_unauthorized() => {
                warn!(device = device_id, error = %e, "Session rejected upstream, signing out");
                device.sign_out().await?;
                Ok(FlowResponse::leave(Route::Home))
            }
            Err(StepFailure::Api(e)) => {
                warn!(device = device_id, step = %step, error = %e, "Step submit failed");
                self.fail(&device, inline_message(&e)).await
            }
            Err(StepFailure::Flow(message)) => self.fail(&device, message).await,
        }
    }

    async fn fail(&self, device: &Device, message: impl Into<String>) -> Result<FlowResponse, Error> {
        let message = message.into();
        Ok(device
            .registration
            .update(|flow| {
                flow.state_mut().set_error(message);
                FlowResponse::current(flow)
            })
            .await?)
    }

    async fn handle(
        &self,
        submission: StepSubmission,
        device: &Device,
        state: &RegistrationState,
        token: &SecretString,
    ) -> Result<Applied, StepFailure> {
        match submission {
            StepSubmission::Welcome(form) => self.submit_welcome(form, token).await,
            StepSubmission::Register(form) => self.submit_register(form, state, token).await,
            StepSubmission::Child(form) => self.submit_child(form, state, token).await,
            StepSubmission::Categories(form) => self.submit_categories(form, state, token).await,
            StepSubmission::Subscription(form) => {
                self.submit_subscription(form, state, token).await
            }
            StepSubmission::ValidateSubscriptions => {
                self.create_subscription(state, token).await
            }
            StepSubmission::Delivery(form) => self.submit_delivery(form, token).await,
            StepSubmission::Payment => self.submit_payment(device, state, token).await,
            // Handled before any upstream call.
            StepSubmission::Success => Ok(Applied::stay(|_| {})),
        }
    }

    async fn submit_welcome(
        &self,
        form: WelcomeForm,
        token: &SecretString,
    ) -> Result<Applied, StepFailure> {
        let welcome = form.validate()?;
        let profile = ProfileUpdate {
            first_name: welcome.first_name.clone(),
            last_name: welcome.last_name.clone(),
            ..Default::default()
        };
        self.api.update_profile(token, &profile).await?;
        Ok(Applied::advance(move |s| s.welcome = welcome))
    }

    async fn submit_register(
        &self,
        form: RegisterForm,
        state: &RegistrationState,
        token: &SecretString,
    ) -> Result<Applied, StepFailure> {
        let registration = form.validate()?;
        let profile = ProfileUpdate {
            first_name: state.welcome.first_name.clone(),
            last_name: state.welcome.last_name.clone(),
            email: Some(registration.email.clone()),
            display_name: Some(registration.name.clone()),
            terms_accepted: Some(registration.terms_accepted),
        };
        self.api.update_profile(token, &profile).await?;
        Ok(Applied::advance(move |s| s.registration = registration))
    }

    /// Create the child, or update it in place once it has an upstream id.
    async fn submit_child(
        &self,
        form: ChildForm,
        state: &RegistrationState,
        token: &SecretString,
    ) -> Result<Applied, StepFailure> {
        let mut child = form.apply(&state.child, today())?;
        let payload = ChildPayload::from(&child);
        let record = match child.id {
            Some(id) => self.api.update_child(token, id, &payload).await?,
            None => self.api.create_child(token, &payload).await?,
        };
        child.id = Some(record.id);
        Ok(Applied::advance(move |s| s.child = child))
    }

    async fn submit_categories(
        &self,
        form: CategoriesForm,
        state: &RegistrationState,
        token: &SecretString,
    ) -> Result<Applied, StepFailure> {
        let Some(child_id) = state.child.id else {
            return Err(StepFailure::Flow("child not selected"));
        };
        let form = form.normalized()?;
        let (interests, skills) = tokio::try_join!(
            self.api.list_interests(token),
            self.api.list_skills(token)
        )?;
        ensure_known(&form.interest_ids, &interests, "interest_ids")?;
        ensure_known(&form.skill_ids, &skills, "skill_ids")?;

        let mut child = state.child.clone();
        child.interest_ids = form.interest_ids.clone();
        child.skill_ids = form.skill_ids.clone();
        self.api
            .update_child(token, child_id, &ChildPayload::from(&child))
            .await?;

        Ok(Applied::advance(move |s| {
            s.categories = CategoriesSlice {
                interest_ids: form.interest_ids,
                skill_ids: form.skill_ids,
            };
            s.child = child;
        }))
    }

    async fn submit_subscription(
        &self,
        form: SubscriptionForm,
        state: &RegistrationState,
        token: &SecretString,
    ) -> Result<Applied, StepFailure> {
        let plan_id = form.validate()?;
        let plans = self.api.list_plans(token).await?;
        let Some(plan) = plans.iter().find(|p| p.id == plan_id) else {
            return Err(ValidationError::Invalid {
                field: "plan_id",
                reason: format!("unknown plan '{plan_id}'"),
            }
            .into());
        };
        info!(plan = %plan.id, total = %plan.total(), "Plan selected");

        let changed = state.subscription.selected_plan() != Some(plan_id.as_str());
        Ok(Applied::advance(move |s| {
            if changed {
                s.subscription.subscription_id = None;
                s.payment = PaymentSlice::default();
            }
            s.subscription.plan_id = Some(plan_id);
        }))
    }

    /// Create the subscription once. Resubmitting after success only advances.
    async fn create_subscription(
        &self,
        state: &RegistrationState,
        token: &SecretString,
    ) -> Result<Applied, StepFailure> {
        if state.subscription.subscription_id.is_some() {
            return Ok(Applied::advance(|_| {}));
        }
        let Some(child_id) = state.child.id else {
            return Err(StepFailure::Flow("child not selected"));
        };
        let Some(plan_id) = state.subscription.selected_plan() else {
            return Err(StepFailure::Flow("plan not selected"));
        };
        let request = SubscriptionRequest {
            plan_id: plan_id.to_string(),
            child_id,
        };
        let record = self.api.create_subscription(token, &request).await?;
        Ok(Applied::advance(move |s| {
            s.subscription.subscription_id = Some(record.id)
        }))
    }

    async fn submit_delivery(
        &self,
        form: DeliveryForm,
        token: &SecretString,
    ) -> Result<Applied, StepFailure> {
        let mut delivery = form.validate(today())?;
        let Some(date) = delivery.date else {
            return Err(ValidationError::Required { field: "date" }.into());
        };
        let request = AddressRequest {
            address: delivery.address.clone(),
            date,
            time: delivery.time.clone(),
        };
        let record = self.api.create_delivery_address(token, &request).await?;
        delivery.address_id = Some(record.id);
        Ok(Applied::advance(move |s| s.delivery = delivery))
    }

    /// Start the batch payment, or poll it when one is already pending.
    async fn submit_payment(
        &self,
        device: &Device,
        state: &RegistrationState,
        token: &SecretString,
    ) -> Result<Applied, StepFailure> {
        if state.payment.confirmed {
            return Ok(Applied::advance(|_| {}));
        }
        let payment = match &state.payment.payment_id {
            Some(id) => self.api.get_payment(token, id).await?,
            None => {
                let Some(subscription_id) = state.subscription.subscription_id else {
                    return Err(StepFailure::Flow("subscription not created"));
                };
                // Persisted before the call so a retry after a lost response reuses it.
                let key = match state.payment.idempotency_key {
                    Some(key) => key,
                    None => {
                        let key = Uuid::new_v4();
                        device
                            .registration
                            .update(|flow| flow.state_mut().payment.idempotency_key = Some(key))
                            .await?;
                        key
                    }
                };
                let request = BatchPaymentRequest {
                    subscription_ids: vec![subscription_id],
                    address_id: state.delivery.address_id,
                    idempotency_key: key,
                };
                self.api.create_batch_payment(token, &request).await?
            }
        };
        Ok(apply_payment(payment))
    }
}

fn apply_payment(payment: BatchPayment) -> Applied {
    info!(payment = %payment.id, status = ?payment.status, amount = %payment.amount, "Payment status");
    match payment.status {
        PaymentStatus::Paid => Applied::advance(move |s| {
            s.payment.payment_id = Some(payment.id);
            s.payment.checkout_url = None;
            s.payment.confirmed = true;
        }),
        PaymentStatus::Pending => Applied::stay(move |s| {
            s.payment.payment_id = Some(payment.id);
            s.payment.checkout_url = payment.checkout_url;
        }),
        PaymentStatus::Failed => Applied::stay(|s| {
            s.payment = PaymentSlice::default();
            s.set_error("payment failed");
        }),
    }
}

fn ensure_known(ids: &[u64], known: &[Category], field: &'static str) -> Result<(), ValidationError> {
    match ids.iter().find(|id| !known.iter().any(|c| c.id == **id)) {
        Some(unknown) => Err(ValidationError::Invalid {
            field,
            reason: format!("unknown id {unknown}"),
        }),
        None => Ok(()),
    }
}

fn inline_message(e: &ApiError) -> String {
    match e {
        ApiError::Rejected { message, .. } if !message.trim().is_empty() => message.clone(),
        _ => GENERIC_FAILURE.to_string(),
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use chrono::Duration;
    use serde_json::json;

    use super::*;
    use crate::api::stub::StubApi;
    use crate::auth::session::AuthSession;
    use crate::store::{Database, LibSqlBackend};

    const DEVICE: &str = "dev1";

    struct Harness {
        api: Arc<StubApi>,
        devices: Arc<DeviceRegistry>,
        manager: OnboardingManager,
    }

    async fn harness() -> Harness {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let api = Arc::new(StubApi::default());
        let devices = DeviceRegistry::new(db);
        let manager = OnboardingManager::new(api.clone(), Arc::clone(&devices));
        Harness {
            api,
            devices,
            manager,
        }
    }

    impl Harness {
        async fn sign_in(&self) {
            let device = self.devices.get(DEVICE).await.unwrap();
            device
                .session
                .set(AuthSession::new("tok", "+15551234567"))
                .await
                .unwrap();
            device
                .registration
                .update(|flow| {
                    flow.state_mut().phone.number = "+15551234567".into();
                    flow.state_mut().phone.verified = true;
                })
                .await
                .unwrap();
        }

        async fn submit(&self, step: &str, body: serde_json::Value) -> FlowResponse {
            self.manager.submit(DEVICE, step, body).await.unwrap()
        }

        async fn state(&self) -> RegistrationState {
            self.devices
                .get(DEVICE)
                .await
                .unwrap()
                .registration
                .snapshot()
                .await
        }

        async fn walk_to(&self, target: Step) {
            let tomorrow = today() + Duration::days(1);
            let steps: Vec<(Step, serde_json::Value)> = vec![
                (Step::Welcome, json!({"first_name": "Ann", "last_name": "Lee"})),
                (
                    Step::Register,
                    json!({"email": "ann@example.com", "name": "Ann Lee", "terms_accepted": true}),
                ),
                (
                    Step::Child,
                    json!({"name": "Mia", "birth_date": "2021-03-14", "gender": "girl"}),
                ),
                (Step::Categories, json!({"interest_ids": [1, 3], "skill_ids": [11]})),
                (Step::Subscription, json!({"plan_id": "quarterly"})),
                (Step::ValidateSubscriptions, json!({})),
                (
                    Step::Delivery,
                    json!({"address": "12 Oak St", "date": tomorrow, "time": "10:00-14:00"}),
                ),
                (Step::Payment, json!({})),
            ];
            let current = self.state().await.current_step;
            for (step, body) in steps {
                if step == target {
                    return;
                }
                if step < current {
                    continue;
                }
                let resp = self.submit(step.as_str(), body).await;
                assert!(resp.advanced(), "submit at {step} did not advance: {resp:?}");
            }
        }
    }

    #[tokio::test]
    async fn full_flow_reaches_success_and_resets() {
        let h = harness().await;
        h.sign_in().await;
        h.walk_to(Step::Success).await;

        let state = h.state().await;
        assert_eq!(state.current_step, Step::Success);
        assert_eq!(state.child.id, Some(11));
        assert_eq!(state.child.interest_ids, vec![1, 3]);
        assert_eq!(state.subscription.subscription_id, Some(501));
        assert_eq!(state.delivery.address_id, Some(77));
        assert!(state.payment.confirmed);

        let done = h.submit("success", json!({})).await;
        assert_eq!(done.route, Route::Home);
        assert_eq!(h.state().await.current_step, Step::Welcome);
        assert!(!h.state().await.payment.confirmed);
    }

    #[tokio::test]
    async fn finished_flow_can_be_walked_again() {
        let h = harness().await;
        h.sign_in().await;
        h.walk_to(Step::Success).await;
        h.submit("success", json!({})).await;

        let resp = h.manager.validate(DEVICE, Some("/onboarding/welcome")).await.unwrap();
        assert_eq!(resp.route, Route::Step(Step::Welcome));
        assert!(h.state().await.phone.verified);

        h.walk_to(Step::Child).await;
        assert_eq!(h.state().await.current_step, Step::Child);
        assert_eq!(h.api.called("create_child"), 1);
    }

    #[tokio::test]
    async fn unauthenticated_submit_goes_to_phone() {
        let h = harness().await;
        let resp = h
            .submit("welcome", json!({"first_name": "Ann", "last_name": "Lee"}))
            .await;
        assert_eq!(resp.route, Route::Phone);
        assert!(h.api.calls().is_empty());
    }

    #[tokio::test]
    async fn submit_must_target_current_step() {
        let h = harness().await;
        h.sign_in().await;
        let err = h
            .manager
            .submit(DEVICE, "delivery", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::Invalid { field: "step", .. })));

        let err = h.manager.submit(DEVICE, "gift_wrap", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn field_errors_do_not_call_upstream() {
        let h = harness().await;
        h.sign_in().await;
        let err = h
            .manager
            .submit(DEVICE, "welcome", json!({"first_name": "Ann"}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::Required { field: "last_name" })
        ));
        assert_eq!(h.api.called("update_profile"), 0);
    }

    #[tokio::test]
    async fn upstream_failure_stays_with_inline_error() {
        let h = harness().await;
        h.sign_in().await;
        *h.api.reject_next.lock().unwrap() = Some("Profile locked".into());

        let resp = h
            .submit("welcome", json!({"first_name": "Ann", "last_name": "Lee"}))
            .await;
        assert!(!resp.advanced());
        assert_eq!(resp.route, Route::Step(Step::Welcome));
        assert_eq!(
            resp.screen.unwrap().error.as_deref(),
            Some("Profile locked")
        );

        // Next success clears it.
        let resp = h
            .submit("welcome", json!({"first_name": "Ann", "last_name": "Lee"}))
            .await;
        assert!(resp.advanced());
        assert!(h.state().await.error.is_none());
    }

    #[tokio::test]
    async fn unauthorized_signs_out_and_goes_home() {
        let h = harness().await;
        h.sign_in().await;
        h.walk_to(Step::Child).await;
        h.api.unauthorized.store(true, Ordering::SeqCst);

        let resp = h
            .submit(
                "child",
                json!({"name": "Mia", "birth_date": "2021-03-14", "gender": "girl"}),
            )
            .await;
        assert_eq!(resp.route, Route::Home);

        let device = h.devices.get(DEVICE).await.unwrap();
        assert!(!device.session.is_authenticated().await);
        let state = h.state().await;
        assert_eq!(state.current_step, Step::Welcome);
        assert!(!state.phone.verified);
        assert!(state.welcome.first_name.is_empty());
    }

    #[tokio::test]
    async fn child_is_updated_in_place_once_created() {
        let h = harness().await;
        h.sign_in().await;
        h.walk_to(Step::Categories).await;
        assert_eq!(h.api.called("create_child"), 1);

        h.manager.act(DEVICE, StepAction::Back).await.unwrap();
        let resp = h
            .submit(
                "child",
                json!({"name": "Mia Rose", "birth_date": "2021-03-14", "gender": "girl"}),
            )
            .await;
        assert!(resp.advanced());
        assert_eq!(h.api.called("create_child"), 1);
        assert_eq!(h.api.called("update_child"), 1);
        assert_eq!(h.state().await.child.name, "Mia Rose");
    }

    #[tokio::test]
    async fn categories_without_child_sets_error() {
        let h = harness().await;
        h.sign_in().await;
        let device = h.devices.get(DEVICE).await.unwrap();
        device
            .registration
            .update(|flow| flow.state_mut().current_step = Step::Categories)
            .await
            .unwrap();

        let resp = h.submit("categories", json!({"interest_ids": [1]})).await;
        assert!(!resp.advanced());
        assert_eq!(resp.screen.unwrap().error.as_deref(), Some("child not selected"));
        assert_eq!(h.api.called("list_interests"), 0);
    }

    #[tokio::test]
    async fn unknown_category_or_plan_is_rejected() {
        let h = harness().await;
        h.sign_in().await;
        h.walk_to(Step::Categories).await;
        let err = h
            .manager
            .submit(DEVICE, "categories", json!({"interest_ids": [1, 99]}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::Invalid { field: "interest_ids", .. })
        ));

        h.walk_to(Step::Subscription).await;
        let err = h
            .manager
            .submit(DEVICE, "subscription", json!({"plan_id": "weekly"}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::Invalid { field: "plan_id", .. })
        ));
    }

    #[tokio::test]
    async fn subscription_is_created_once() {
        let h = harness().await;
        h.sign_in().await;
        h.walk_to(Step::Delivery).await;
        h.manager.act(DEVICE, StepAction::Back).await.unwrap();

        let resp = h.submit("validate_subscriptions", json!({})).await;
        assert!(resp.advanced());
        assert_eq!(h.api.called("create_subscription"), 1);
    }

    #[tokio::test]
    async fn past_delivery_date_is_rejected() {
        let h = harness().await;
        h.sign_in().await;
        h.walk_to(Step::Delivery).await;
        let yesterday = today() - Duration::days(1);
        let err = h
            .manager
            .submit(
                DEVICE,
                "delivery",
                json!({"address": "12 Oak St", "date": yesterday, "time": "10:00"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::Invalid { field: "date", .. })
        ));
    }

    #[tokio::test]
    async fn pending_payment_is_polled_with_same_key() {
        let h = harness().await;
        h.sign_in().await;
        h.walk_to(Step::Payment).await;
        *h.api.payment_status.lock().unwrap() = PaymentStatus::Pending;

        let resp = h.submit("payment", json!({})).await;
        assert!(!resp.advanced());
        let state = h.state().await;
        assert_eq!(state.payment.payment_id.as_deref(), Some("pay_1"));
        assert!(state.payment.checkout_url.is_some());
        assert!(state.payment.idempotency_key.is_some());

        *h.api.payment_status.lock().unwrap() = PaymentStatus::Paid;
        let resp = h.submit("payment", json!({})).await;
        assert!(resp.advanced());
        assert_eq!(resp.route, Route::Step(Step::Success));
        assert_eq!(h.api.called("create_batch_payment"), 1);
        assert_eq!(h.api.called("get_payment"), 1);
    }

    #[tokio::test]
    async fn payment_retry_reuses_idempotency_key() {
        let h = harness().await;
        h.sign_in().await;
        h.walk_to(Step::Payment).await;
        *h.api.reject_next.lock().unwrap() = Some("Gateway timeout".into());

        let resp = h.submit("payment", json!({})).await;
        assert!(!resp.advanced());
        let resp = h.submit("payment", json!({})).await;
        assert!(resp.advanced());

        let keys = h.api.idempotency_keys.lock().unwrap().clone();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0], keys[1]);
    }

    #[tokio::test]
    async fn failed_payment_clears_attempt() {
        let h = harness().await;
        h.sign_in().await;
        h.walk_to(Step::Payment).await;
        *h.api.payment_status.lock().unwrap() = PaymentStatus::Failed;

        let resp = h.submit("payment", json!({})).await;
        assert!(!resp.advanced());
        let state = h.state().await;
        assert_eq!(state.error.as_deref(), Some("payment failed"));
        assert!(state.payment.idempotency_key.is_none());
        assert!(state.payment.payment_id.is_none());
    }

    #[tokio::test]
    async fn changing_plan_drops_subscription() {
        let h = harness().await;
        h.sign_in().await;
        h.walk_to(Step::Delivery).await;
        h.manager.act(DEVICE, StepAction::Back).await.unwrap();
        h.manager.act(DEVICE, StepAction::Back).await.unwrap();

        h.submit("subscription", json!({"plan_id": "monthly"})).await;
        let state = h.state().await;
        assert_eq!(state.subscription.plan_id.as_deref(), Some("monthly"));
        assert!(state.subscription.subscription_id.is_none());
    }

    #[tokio::test]
    async fn close_keeps_collected_data() {
        let h = harness().await;
        h.sign_in().await;
        h.walk_to(Step::Child).await;

        let resp = h.manager.act(DEVICE, StepAction::Close).await.unwrap();
        assert_eq!(resp.route, Route::Home);
        let state = h.state().await;
        assert_eq!(state.current_step, Step::Child);
        assert_eq!(state.welcome.first_name, "Ann");
    }

    #[tokio::test]
    async fn validate_redirects_closed_step() {
        let h = harness().await;
        let resp = h.manager.validate(DEVICE, Some("/onboarding/payment")).await.unwrap();
        assert_eq!(resp.route, Route::Phone);

        h.sign_in().await;
        let resp = h.manager.validate(DEVICE, Some("/onboarding/payment")).await.unwrap();
        assert_eq!(resp.route, Route::Step(Step::Welcome));

        h.walk_to(Step::Child).await;
        let device = h.devices.get(DEVICE).await.unwrap();
        device
            .registration
            .update(|flow| {
                flow.state_mut().registration.terms_accepted = false;
                flow.state_mut().current_step = Step::Payment;
            })
            .await
            .unwrap();
        let resp = h.manager.validate(DEVICE, None).await.unwrap();
        assert_eq!(resp.route, Route::Step(Step::Child));
        device
            .registration
            .update(|flow| flow.state_mut().registration.terms_accepted = true)
            .await
            .unwrap();

        h.walk_to(Step::Subscription).await;
        let resp = h.manager.validate(DEVICE, Some("/onboarding/child")).await.unwrap();
        assert_eq!(resp.route, Route::Step(Step::Child));
        assert_eq!(h.state().await.current_step, Step::Child);
    }

    #[tokio::test]
    async fn state_reports_phone_route_when_signed_out() {
        let h = harness().await;
        let resp = h.manager.state(DEVICE).await.unwrap();
        assert_eq!(resp.route, Route::Phone);
        assert_eq!(resp.screen.unwrap().step, Step::Welcome);
    }

    #[tokio::test]
    async fn reset_keeps_session() {
        let h = harness().await;
        h.sign_in().await;
        h.walk_to(Step::Categories).await;

        let resp = h.manager.reset(DEVICE).await.unwrap();
        assert_eq!(resp.route, Route::Step(Step::Welcome));
        let device = h.devices.get(DEVICE).await.unwrap();
        assert!(device.session.is_authenticated().await);
        let state = h.state().await;
        assert!(state.phone.verified);
        assert_eq!(state.phone.number, "+15551234567");
        assert!(state.welcome.first_name.is_empty());
    }

    #[tokio::test]
    async fn reset_then_welcome_advances_to_register() {
        let h = harness().await;
        h.sign_in().await;
        h.walk_to(Step::Categories).await;
        h.manager.reset(DEVICE).await.unwrap();

        let resp = h
            .submit("welcome", json!({"first_name": "Bo", "last_name": "Kim"}))
            .await;
        assert!(resp.advanced(), "stuck on welcome: {resp:?}");
        assert_eq!(resp.route, Route::Step(Step::Register));

        let resp = h.manager.validate(DEVICE, None).await.unwrap();
        assert_eq!(resp.route, Route::Step(Step::Register));
    }

    #[tokio::test]
    async fn concurrent_submits_create_one_child() {
        let h = harness().await;
        h.sign_in().await;
        h.walk_to(Step::Child).await;
        let body = json!({"name": "Mia", "birth_date": "2021-03-14", "gender": "girl"});

        let (a, b) = tokio::join!(
            h.manager.submit(DEVICE, "child", body.clone()),
            h.manager.submit(DEVICE, "child", body.clone()),
        );

        let advanced = [&a, &b]
            .into_iter()
            .filter(|r| r.as_ref().is_ok_and(FlowResponse::advanced))
            .count();
        assert_eq!(advanced, 1);
        assert!(a.is_err() || b.is_err());
        assert_eq!(h.api.called("create_child"), 1);
        assert_eq!(h.state().await.current_step, Step::Categories);
    }

    #[tokio::test]
    async fn screen_renders_requested_step_without_moving() {
        let h = harness().await;
        h.sign_in().await;
        h.walk_to(Step::Child).await;

        let screen = h.manager.screen(DEVICE, "register").await.unwrap();
        assert_eq!(screen.step, Step::Register);
        assert!(screen.can_go_forward);
        let screen = h.manager.screen(DEVICE, "gift_wrap").await.unwrap();
        assert_eq!(screen.step, Step::Welcome);
        assert_eq!(h.state().await.current_step, Step::Child);
    }
}
