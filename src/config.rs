//! Configuration types, built from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default OTP resend lockout.
pub const DEFAULT_RESEND_SECS: u64 = 60;

/// Service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// libSQL database file.
    pub db_path: PathBuf,
    /// Base URL of the upstream subscription API.
    pub api_url: String,
    /// Optional service key sent to the upstream API.
    pub api_key: Option<SecretString>,
    pub otp: OtpConfig,
    /// Directory for rolling log files. Stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

/// OTP resend and dev autofill settings.
#[derive(Debug, Clone)]
pub struct OtpConfig {
    /// Seconds a user must wait before requesting another code.
    pub resend_secs: u64,
    /// Fetch the code from the upstream dev endpoint after sending it.
    /// Never enable in production.
    pub dev_autofill: bool,
    /// Delay before the dev autofill fetch.
    pub dev_autofill_delay: Duration,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            resend_secs: DEFAULT_RESEND_SECS,
            dev_autofill: false,
            dev_autofill_delay: Duration::from_millis(1500),
        }
    }
}

impl AppConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url = std::env::var("TOYBOX_API_URL")
            .map_err(|_| ConfigError::MissingEnvVar("TOYBOX_API_URL".to_string()))?;
        if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                key: "TOYBOX_API_URL".to_string(),
                message: format!("expected an http(s) URL, got {api_url:?}"),
            });
        }

        let port = parse_env("TOYBOX_PORT", 8080)?;

        let db_path = std::env::var("TOYBOX_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/toybox.db"));

        let api_key = std::env::var("TOYBOX_API_KEY")
            .ok()
            .filter(|s| !s.is_empty())
            .map(SecretString::from);

        let otp = OtpConfig {
            resend_secs: parse_env("TOYBOX_OTP_RESEND_SECS", DEFAULT_RESEND_SECS)?,
            dev_autofill: parse_env("TOYBOX_DEV_OTP_AUTOFILL", false)?,
            dev_autofill_delay: Duration::from_millis(parse_env("TOYBOX_DEV_OTP_DELAY_MS", 1500)?),
        };

        let log_dir = std::env::var("TOYBOX_LOG_DIR").ok().map(PathBuf::from);

        Ok(Self {
            port,
            db_path,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            otp,
            log_dir,
        })
    }
}

/// Read and parse an optional variable, falling back to `default` when unset.
fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(default),
    }
}
