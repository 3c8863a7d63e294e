//! Step dispatch: maps the current step to the screen the client mounts and
//! applies the screen's back / next / close actions.

use serde::{Deserialize, Serialize};

use super::flow::{FlowController, Transition};
use super::model::{
    CategoriesSlice, DeliverySlice, EditingChild, PaymentSlice, RegistrationSlice,
    SubscriptionSlice, WelcomeSlice,
};
use super::step::{Route, Step};

/// Data the client needs to draw one screen, tagged by `view`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "view", content = "data", rename_all = "snake_case")]
pub enum StepView {
    Welcome(WelcomeSlice),
    Register(RegistrationSlice),
    Child(EditingChild),
    Categories(CategoriesSlice),
    Subscription(SubscriptionSlice),
    ValidateSubscriptions {
        child_name: String,
        plan_id: Option<String>,
    },
    Delivery(DeliverySlice),
    Payment(PaymentSlice),
    Success {
        child_name: String,
    },
}

/// A rendered screen plus its navigation affordances.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepScreen {
    pub step: Step,
    pub route: Route,
    #[serde(flatten)]
    pub view: StepView,
    pub can_go_back: bool,
    pub can_go_forward: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The three callbacks every screen is wired with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Next,
    Back,
    /// Leave the flow for the landing page. Collected data is kept.
    Close,
}

/// Result of applying a [`StepAction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Navigated(Transition),
    Left(Route),
}

/// Render the screen for a step name coming from the client. Unknown names
/// render the first step.
pub fn render_named(raw_step: &str, flow: &FlowController) -> StepScreen {
    render(Step::parse_lenient(raw_step), flow)
}

/// Render the controller's current step.
pub fn render_current(flow: &FlowController) -> StepScreen {
    render(flow.current_step(), flow)
}

pub fn render(step: Step, flow: &FlowController) -> StepScreen {
    let state = flow.state();
    let view = match step {
        Step::Welcome => StepView::Welcome(state.welcome.clone()),
        Step::Register => StepView::Register(state.registration.clone()),
        Step::Child => StepView::Child(state.child.clone()),
        Step::Categories => StepView::Categories(state.categories.clone()),
        Step::Subscription => StepView::Subscription(state.subscription.clone()),
        Step::ValidateSubscriptions => StepView::ValidateSubscriptions {
            child_name: state.child.name.clone(),
            plan_id: state.subscription.selected_plan().map(String::from),
        },
        Step::Delivery => StepView::Delivery(state.delivery.clone()),
        Step::Payment => StepView::Payment(state.payment.clone()),
        Step::Success => StepView::Success {
            child_name: state.child.name.clone(),
        },
    };

    let is_current = step == flow.current_step();
    StepScreen {
        step,
        route: step.route(),
        view,
        can_go_back: !step.is_first(),
        can_go_forward: step.next().is_some_and(|next| flow.can_access(next)),
        error: state.error.clone().filter(|_| is_current),
    }
}

pub fn apply_action(flow: &mut FlowController, action: StepAction) -> ActionOutcome {
    match action {
        StepAction::Next => ActionOutcome::Navigated(flow.go_to_next_step()),
        StepAction::Back => ActionOutcome::Navigated(flow.go_to_prev_step()),
        StepAction::Close => ActionOutcome::Left(Route::Home),
    }
}
