//! Request bodies for each step's submit, checked before any upstream call.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::model::{DeliverySlice, EditingChild, Gender, RegistrationSlice, WelcomeSlice};
use super::step::Step;
use crate::error::ValidationError;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

fn required(value: &str, field: &'static str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Required { field });
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WelcomeForm {
    pub first_name: String,
    pub last_name: String,
}

impl WelcomeForm {
    pub fn validate(&self) -> Result<WelcomeSlice, ValidationError> {
        Ok(WelcomeSlice {
            first_name: required(&self.first_name, "first_name")?,
            last_name: required(&self.last_name, "last_name")?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RegisterForm {
    pub email: String,
    pub name: String,
    pub terms_accepted: bool,
}

impl RegisterForm {
    pub fn validate(&self) -> Result<RegistrationSlice, ValidationError> {
        let email = required(&self.email, "email")?.to_lowercase();
        if !EMAIL_RE.is_match(&email) {
            return Err(ValidationError::Invalid {
                field: "email",
                reason: "not an email address".to_string(),
            });
        }
        let name = required(&self.name, "name")?;
        if !self.terms_accepted {
            return Err(ValidationError::Invalid {
                field: "terms_accepted",
                reason: "terms must be accepted".to_string(),
            });
        }
        Ok(RegistrationSlice {
            email,
            name,
            terms_accepted: true,
        })
    }
}

/// Child profile fields. Identity and categories come from the stored state.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChildForm {
    pub name: String,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub has_limitations: bool,
    pub comment: String,
}

impl ChildForm {
    /// Merge into the stored child and check the result.
    pub fn apply(&self, stored: &EditingChild, today: NaiveDate) -> Result<EditingChild, ValidationError> {
        let child = EditingChild {
            id: stored.id,
            name: self.name.trim().to_string(),
            birth_date: self.birth_date,
            gender: self.gender,
            has_limitations: self.has_limitations,
            comment: if self.has_limitations {
                self.comment.trim().to_string()
            } else {
                String::new()
            },
            interest_ids: stored.interest_ids.clone(),
            skill_ids: stored.skill_ids.clone(),
        };
        child.validate(today)?;
        Ok(child)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CategoriesForm {
    pub interest_ids: Vec<u64>,
    pub skill_ids: Vec<u64>,
}

impl CategoriesForm {
    /// Dedupe, keeping first-seen order.
    pub fn normalized(&self) -> Result<Self, ValidationError> {
        fn dedupe(ids: &[u64]) -> Vec<u64> {
            let mut out = Vec::with_capacity(ids.len());
            for id in ids {
                if !out.contains(id) {
                    out.push(*id);
                }
            }
            out
        }
        let interest_ids = dedupe(&self.interest_ids);
        if interest_ids.is_empty() {
            return Err(ValidationError::Required {
                field: "interest_ids",
            });
        }
        Ok(Self {
            interest_ids,
            skill_ids: dedupe(&self.skill_ids),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SubscriptionForm {
    pub plan_id: String,
}

impl SubscriptionForm {
    pub fn validate(&self) -> Result<String, ValidationError> {
        required(&self.plan_id, "plan_id")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeliveryForm {
    pub address: String,
    pub date: Option<NaiveDate>,
    pub time: String,
}

impl DeliveryForm {
    pub fn validate(&self, today: NaiveDate) -> Result<DeliverySlice, ValidationError> {
        let address = required(&self.address, "address")?;
        let date = self.date.ok_or(ValidationError::Required { field: "date" })?;
        if date < today {
            return Err(ValidationError::Invalid {
                field: "date",
                reason: "cannot be in the past".to_string(),
            });
        }
        let time = required(&self.time, "time")?;
        Ok(DeliverySlice {
            address,
            date: Some(date),
            time,
            address_id: None,
        })
    }
}

/// A parsed submit body, one variant per step.
#[derive(Debug, Clone)]
pub enum StepSubmission {
    Welcome(WelcomeForm),
    Register(RegisterForm),
    Child(ChildForm),
    Categories(CategoriesForm),
    Subscription(SubscriptionForm),
    ValidateSubscriptions,
    Delivery(DeliveryForm),
    Payment,
    Success,
}

impl StepSubmission {
    /// Parse `body` as the form of `step`. Confirm-only steps ignore the body.
    pub fn parse(step: Step, body: serde_json::Value) -> Result<Self, ValidationError> {
        Ok(match step {
            Step::Welcome => Self::Welcome(form(body)?),
            Step::Register => Self::Register(form(body)?),
            Step::Child => Self::Child(form(body)?),
            Step::Categories => Self::Categories(form(body)?),
            Step::Subscription => Self::Subscription(form(body)?),
            Step::ValidateSubscriptions => Self::ValidateSubscriptions,
            Step::Delivery => Self::Delivery(form(body)?),
            Step::Payment => Self::Payment,
            Step::Success => Self::Success,
        })
    }
}

fn form<T: DeserializeOwned + Default>(body: serde_json::Value) -> Result<T, ValidationError> {
    if body.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(body).map_err(|e| ValidationError::Invalid {
        field: "body",
        reason: e.to_string(),
    })
}
