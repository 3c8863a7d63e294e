//! Phone number and OTP helpers: input normalization, the resend countdown,
//! and the dev-only code autofill.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::api::SubscriptionApi;
use crate::error::ValidationError;
use crate::onboarding::store::RegistrationStore;

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\+?[1-9]\d{9,14}$").unwrap());
static CODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4,6}$").unwrap());

/// Strip formatting and return the number in `+<digits>` form.
pub fn normalize_phone(raw: &str) -> Result<String, ValidationError> {
    let compact: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();
    if compact.is_empty() {
        return Err(ValidationError::Required { field: "phone" });
    }
    if !PHONE_RE.is_match(&compact) {
        return Err(ValidationError::Invalid {
            field: "phone",
            reason: "expected 10 to 15 digits".to_string(),
        });
    }
    Ok(if compact.starts_with('+') {
        compact
    } else {
        format!("+{compact}")
    })
}

pub fn validate_code(raw: &str) -> Result<String, ValidationError> {
    let code = raw.trim();
    if code.is_empty() {
        return Err(ValidationError::Required { field: "code" });
    }
    if !CODE_RE.is_match(code) {
        return Err(ValidationError::Invalid {
            field: "code",
            reason: "expected 4 to 6 digits".to_string(),
        });
    }
    Ok(code.to_string())
}

/// Seconds left before another code may be requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResendStatus {
    pub remaining_secs: u64,
    pub can_resend: bool,
}

impl ResendStatus {
    pub fn ready() -> Self {
        Self {
            remaining_secs: 0,
            can_resend: true,
        }
    }
}

/// Countdown gating OTP resends.
///
/// One task ticks once per second and publishes the remaining seconds on a
/// watch channel. The task ends at zero and is aborted when the timer drops.
pub struct ResendTimer {
    remaining: watch::Receiver<u64>,
    handle: Option<JoinHandle<()>>,
}

impl ResendTimer {
    pub fn start(secs: u64) -> Self {
        let (tx, rx) = watch::channel(secs);
        let handle = (secs > 0).then(|| {
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(1));
                // First tick fires immediately.
                interval.tick().await;
                loop {
                    interval.tick().await;
                    let next = tx.borrow().saturating_sub(1);
                    if tx.send(next).is_err() || next == 0 {
                        break;
                    }
                }
            })
        });
        Self {
            remaining: rx,
            handle,
        }
    }

    pub fn remaining(&self) -> u64 {
        *self.remaining.borrow()
    }

    pub fn can_resend(&self) -> bool {
        self.remaining() == 0
    }

    pub fn status(&self) -> ResendStatus {
        let remaining_secs = self.remaining();
        ResendStatus {
            remaining_secs,
            can_resend: remaining_secs == 0,
        }
    }

    /// Watch the countdown, e.g. to stream it to a client.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.remaining.clone()
    }
}

impl Drop for ResendTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// After `delay`, ask the dev endpoint for the code just sent and stash it in
/// the phone slice. Failures are logged and dropped.
pub fn spawn_dev_autofill(
    api: Arc<dyn SubscriptionApi>,
    registration: Arc<RegistrationStore>,
    phone: String,
    delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        match api.dev_otp_code(&phone).await {
            Ok(Some(code)) => {
                let result = registration
                    .update(|flow| {
                        let slice = &mut flow.state_mut().phone;
                        if slice.number == phone && !slice.verified {
                            slice.autofill_code = Some(code);
                        }
                    })
                    .await;
                match result {
                    Ok(()) => info!(phone = %phone, "Dev OTP autofilled"),
                    Err(e) => debug!(error = %e, "Dev OTP autofill not saved"),
                }
            }
            Ok(None) => debug!(phone = %phone, "Dev OTP endpoint had no code"),
            Err(e) => debug!(error = %e, "Dev OTP autofill failed"),
        }
    })
}
