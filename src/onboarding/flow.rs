//! Flow controller: the navigation state machine over the step registry.

use serde::Serialize;

use super::gate::{can_access_step, next_valid_step};
use super::model::RegistrationState;
use super::step::{Route, Step};

/// Outcome of a navigation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Transition {
    Moved { from: Step, to: Step },
    /// Nothing happened. The caller keeps showing `at`.
    Blocked { at: Step },
}

impl Transition {
    pub fn moved(&self) -> bool {
        matches!(self, Self::Moved { .. })
    }

    /// The step shown after the request.
    pub fn step(&self) -> Step {
        match self {
            Self::Moved { to, .. } => *to,
            Self::Blocked { at } => *at,
        }
    }
}

/// Owns one user's `RegistrationState` and moves `current_step` through the
/// registry. Never fails: refused moves come back as [`Transition::Blocked`].
#[derive(Debug, Clone, Default)]
pub struct FlowController {
    state: RegistrationState,
}

impl FlowController {
    pub fn new(state: RegistrationState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &RegistrationState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut RegistrationState {
        &mut self.state
    }

    pub fn current_step(&self) -> Step {
        self.state.current_step
    }

    pub fn can_access(&self, step: Step) -> bool {
        can_access_step(step, &self.state)
    }

    pub fn can_go_back(&self) -> bool {
        !self.current_step().is_first()
    }

    pub fn can_go_forward(&self) -> bool {
        self.current_step()
            .next()
            .is_some_and(|next| self.can_access(next))
    }

    /// Advance one step if the next step's gate passes.
    pub fn go_to_next_step(&mut self) -> Transition {
        let from = self.current_step();
        match from.next() {
            Some(to) if self.can_access(to) => self.move_to(from, to),
            _ => {
                tracing::debug!(step = %from, "Forward navigation blocked");
                Transition::Blocked { at: from }
            }
        }
    }

    /// Go back one step. Earlier steps are not re-validated.
    pub fn go_to_prev_step(&mut self) -> Transition {
        let from = self.current_step();
        match from.prev() {
            Some(to) => self.move_to(from, to),
            None => Transition::Blocked { at: from },
        }
    }

    /// Jump straight to `target`, e.g. when the client router lands on a deep
    /// link. Allowed only when the target's gate passes.
    pub fn go_to(&mut self, target: Step) -> Transition {
        let from = self.current_step();
        if from == target || !self.can_access(target) {
            return Transition::Blocked { at: from };
        }
        self.move_to(from, target)
    }

    /// Decide where the client should be.
    ///
    /// Unauthenticated users go to phone entry whatever the stored step.
    /// Otherwise the current step is kept when its gate passes, and replaced
    /// by the first step whose gate fails when it does not.
    pub fn validate_and_redirect(&mut self, authenticated: bool) -> Route {
        if !authenticated {
            return Route::Phone;
        }
        let current = self.current_step();
        if self.can_access(current) {
            return current.route();
        }
        let target = next_valid_step(&self.state);
        tracing::info!(from = %current, to = %target, "Redirecting to first open step");
        self.move_to(current, target);
        target.route()
    }

    /// Clear every slice and return to the first step.
    pub fn reset(&mut self) {
        self.state = RegistrationState::default();
        self.state.touch();
    }

    fn move_to(&mut self, from: Step, to: Step) -> Transition {
        self.state.current_step = to;
        self.state.touch();
        Transition::Moved { from, to }
    }
}
