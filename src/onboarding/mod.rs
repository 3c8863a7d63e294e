//! Onboarding flow: the multi-step signup a parent walks through after
//! verifying their phone.
//!
//! The step registry ([`step`]) fixes the order, the gates ([`gate`]) decide
//! which steps the collected data opens, and the [`FlowController`] moves the
//! device's current step through them. [`OnboardingManager`] runs each
//! step's submit against the upstream API.

pub mod flow;
pub mod forms;
pub mod gate;
pub mod manager;
pub mod model;
pub mod routes;
pub mod screen;
pub mod step;
pub mod store;

pub use flow::{FlowController, Transition};
pub use gate::{can_access_step, next_valid_step};
pub use manager::{FlowResponse, OnboardingManager};
pub use model::RegistrationState;
pub use routes::{OnboardingRouteState, onboarding_routes};
pub use screen::{StepAction, StepScreen, StepView};
pub use step::{Route, STEPS, Step};
pub use store::RegistrationStore;
