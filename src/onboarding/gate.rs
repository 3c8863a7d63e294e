//! Gating predicate: which steps the collected data allows entering.
//!
//! Every gate reads only slices filled by earlier steps, so the gates form a
//! DAG along the step order and adding later data never closes an earlier
//! gate.

use super::model::RegistrationState;
use super::step::{STEPS, Step};

/// Whether `step` may be entered with the data collected in `state`.
pub fn can_access_step(step: Step, state: &RegistrationState) -> bool {
    match step {
        Step::Welcome | Step::Categories => true,
        Step::Register => {
            state.phone.verified
                && !state.welcome.first_name.trim().is_empty()
                && !state.welcome.last_name.trim().is_empty()
        }
        // Reads register-screen fields, not child-screen fields.
        Step::Child => {
            !state.registration.email.trim().is_empty()
                && state.registration.terms_accepted
                && !state.registration.name.trim().is_empty()
        }
        Step::Subscription => !state.categories.interest_ids.is_empty(),
        Step::ValidateSubscriptions | Step::Delivery => {
            state.subscription.selected_plan().is_some()
        }
        Step::Payment => state.delivery.is_filled(),
        Step::Success => state.payment.confirmed,
    }
}

/// First step in registry order whose gate fails, or the last step when
/// every gate passes.
pub fn next_valid_step(state: &RegistrationState) -> Step {
    STEPS
        .iter()
        .copied()
        .find(|step| !can_access_step(*step, state))
        .unwrap_or(Step::LAST)
}
