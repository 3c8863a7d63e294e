//! Step registry: the fixed, ordered list of onboarding screens and the
//! routes derived from them.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Path of the landing page. Abandoning the flow returns here.
pub const HOME_PATH: &str = "/";
/// Path of the phone entry / OTP screen that precedes the flow.
pub const PHONE_PATH: &str = "/auth/phone";
/// Prefix shared by every onboarding step route.
pub const ONBOARDING_PREFIX: &str = "/onboarding/";

/// One screen of the onboarding flow.
///
/// Declaration order is progression order: `Welcome → Register → Child →
/// Categories → Subscription → ValidateSubscriptions → Delivery → Payment →
/// Success`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Welcome,
    /// Email, display name and terms. Older clients call it `update_name`.
    #[serde(alias = "update_name")]
    Register,
    Child,
    Categories,
    Subscription,
    ValidateSubscriptions,
    Delivery,
    Payment,
    Success,
}

/// Every step, in progression order.
pub const STEPS: [Step; 9] = [
    Step::Welcome,
    Step::Register,
    Step::Child,
    Step::Categories,
    Step::Subscription,
    Step::ValidateSubscriptions,
    Step::Delivery,
    Step::Payment,
    Step::Success,
];

/// Returned when a step name does not match the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown onboarding step: {0:?}")]
pub struct UnknownStep(pub String);

impl Step {
    pub const FIRST: Step = Step::Welcome;
    pub const LAST: Step = Step::Success;

    /// Position in [`STEPS`].
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Step> {
        STEPS.get(index).copied()
    }

    /// The following step, `None` at the end of the flow.
    pub fn next(self) -> Option<Step> {
        Self::from_index(self.index() + 1)
    }

    /// The preceding step, `None` at the start of the flow.
    pub fn prev(self) -> Option<Step> {
        self.index().checked_sub(1).and_then(Self::from_index)
    }

    pub fn is_first(self) -> bool {
        self == Self::FIRST
    }

    pub fn is_terminal(self) -> bool {
        self == Self::LAST
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::Register => "register",
            Self::Child => "child",
            Self::Categories => "categories",
            Self::Subscription => "subscription",
            Self::ValidateSubscriptions => "validate_subscriptions",
            Self::Delivery => "delivery",
            Self::Payment => "payment",
            Self::Success => "success",
        }
    }

    /// Parse a step name from an untrusted source, recovering unknown names
    /// to the first step.
    pub fn parse_lenient(raw: &str) -> Step {
        raw.parse().unwrap_or_else(|e: UnknownStep| {
            tracing::debug!(error = %e, "Recovering unknown step to {}", Self::FIRST);
            Self::FIRST
        })
    }

    pub fn route(self) -> Route {
        Route::Step(self)
    }
}

impl Default for Step {
    fn default() -> Self {
        Self::FIRST
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Step {
    type Err = UnknownStep;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "update_name" {
            return Ok(Self::Register);
        }
        STEPS
            .iter()
            .copied()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| UnknownStep(s.to_string()))
    }
}

/// Serde helper for persisted steps: unknown names become [`Step::FIRST`]
/// instead of failing the whole record.
pub fn deserialize_lenient<'de, D>(deserializer: D) -> Result<Step, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(Step::parse_lenient(&raw))
}

/// A client-side location. Derived from the flow state, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Home,
    Phone,
    Step(Step),
}

impl Route {
    pub fn path(&self) -> String {
        match self {
            Self::Home => HOME_PATH.to_string(),
            Self::Phone => PHONE_PATH.to_string(),
            Self::Step(step) => format!("{ONBOARDING_PREFIX}{step}"),
        }
    }

    /// Parse a router path. Unknown onboarding sub-paths resolve to the first
    /// step; paths outside the app resolve to `None`.
    pub fn parse(path: &str) -> Option<Route> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let trimmed = path.trim_end_matches('/');
        match trimmed {
            "" => Some(Self::Home),
            PHONE_PATH => Some(Self::Phone),
            _ => trimmed
                .strip_prefix(ONBOARDING_PREFIX)
                .map(|raw| Self::Step(Step::parse_lenient(raw))),
        }
    }

    pub fn step(&self) -> Option<Step> {
        match self {
            Self::Step(step) => Some(*step),
            Self::Home | Self::Phone => None,
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path())
    }
}

impl Serialize for Route {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_in_declaration_order() {
        for (i, step) in STEPS.iter().enumerate() {
            assert_eq!(step.index(), i);
            assert_eq!(Step::from_index(i), Some(*step));
        }
        assert_eq!(Step::from_index(STEPS.len()), None);
    }

    #[test]
    fn next_walks_all_steps() {
        let mut current = Step::FIRST;
        let mut visited = vec![current];
        while let Some(next) = current.next() {
            visited.push(next);
            current = next;
        }
        assert_eq!(visited, STEPS.to_vec());
        assert!(current.is_terminal());
    }

    #[test]
    fn prev_stops_at_first() {
        assert_eq!(Step::Register.prev(), Some(Step::Welcome));
        assert_eq!(Step::Welcome.prev(), None);
        assert_eq!(Step::Success.prev(), Some(Step::Payment));
    }

    #[test]
    fn display_matches_serde() {
        for step in STEPS {
            let json = serde_json::to_string(&step).unwrap();
            assert_eq!(format!("\"{step}\""), json, "mismatch for {step:?}");
        }
    }

    #[test]
    fn update_name_is_an_alias_for_register() {
        assert_eq!("update_name".parse::<Step>(), Ok(Step::Register));
        let parsed: Step = serde_json::from_str("\"update_name\"").unwrap();
        assert_eq!(parsed, Step::Register);
    }

    #[test]
    fn unknown_names_recover_to_welcome() {
        assert!("checkout".parse::<Step>().is_err());
        assert_eq!(Step::parse_lenient("checkout"), Step::Welcome);
        assert_eq!(Step::parse_lenient(""), Step::Welcome);
    }

    #[test]
    fn route_paths_roundtrip() {
        for step in STEPS {
            let route = step.route();
            assert_eq!(Route::parse(&route.path()), Some(route));
        }
        assert_eq!(Route::parse("/"), Some(Route::Home));
        assert_eq!(Route::parse("/auth/phone/"), Some(Route::Phone));
        assert_eq!(
            Route::parse("/onboarding/delivery?from=email"),
            Some(Route::Step(Step::Delivery))
        );
        assert_eq!(Route::parse("/onboarding/bogus"), Some(Route::Step(Step::Welcome)));
        assert_eq!(Route::parse("/dashboard"), None);
    }

    #[test]
    fn route_serializes_as_path() {
        let json = serde_json::to_string(&Route::Step(Step::Payment)).unwrap();
        assert_eq!(json, "\"/onboarding/payment\"");
    }
}
