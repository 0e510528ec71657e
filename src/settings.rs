//! Process settings loaded from the environment (and an optional `.env` file).

use crate::config::TimeoutConfig;
use crate::error::GuardError;
use http::StatusCode;
use serde::Deserialize;
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Serializable form of [`TimeoutConfig`]; durations in whole seconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GuardSettings {
    pub timeout_secs: u64,
    pub min_timeout_secs: u64,
    pub max_timeout_secs: u64,
    pub error_status: u16,
    pub allow_infinite: bool,
    pub fallback: Option<String>,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            min_timeout_secs: 2,
            max_timeout_secs: 50,
            error_status: StatusCode::SERVICE_UNAVAILABLE.as_u16(),
            allow_infinite: false,
            fallback: None,
        }
    }
}

impl GuardSettings {
    pub fn from_json(raw: &str) -> Result<Self, GuardError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Validates the settings through [`TimeoutConfig::builder`].
    pub fn into_config(self) -> Result<TimeoutConfig, GuardError> {
        let error_status =
            StatusCode::from_u16(self.error_status).map_err(|e| GuardError::InvalidSetting {
                name: "error_status",
                reason: e.to_string(),
            })?;
        let mut builder = TimeoutConfig::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .min_timeout(Duration::from_secs(self.min_timeout_secs))
            .max_timeout(Duration::from_secs(self.max_timeout_secs))
            .error_status(error_status)
            .allow_infinite(self.allow_infinite);
        if let Some(fallback) = self.fallback {
            builder = builder.fallback(fallback);
        }
        builder.build()
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub listen_addr: SocketAddr,
    pub otlp_endpoint: Option<String>,
    pub guard: GuardSettings,
}

impl Settings {
    pub fn from_env() -> Result<Self, GuardError> {
        // a missing .env file is fine
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, GuardError> {
        let defaults = GuardSettings::default();
        let guard = GuardSettings {
            timeout_secs: parse_var(&lookup, "GUARD_TIMEOUT_SECS")?.unwrap_or(defaults.timeout_secs),
            min_timeout_secs: parse_var(&lookup, "GUARD_MIN_TIMEOUT_SECS")?
                .unwrap_or(defaults.min_timeout_secs),
            max_timeout_secs: parse_var(&lookup, "GUARD_MAX_TIMEOUT_SECS")?
                .unwrap_or(defaults.max_timeout_secs),
            error_status: parse_var(&lookup, "GUARD_ERROR_STATUS")?.unwrap_or(defaults.error_status),
            allow_infinite: parse_var(&lookup, "GUARD_ALLOW_INFINITE")?
                .unwrap_or(defaults.allow_infinite),
            fallback: lookup("GUARD_FALLBACK").or(defaults.fallback),
        };

        Ok(Self {
            listen_addr: parse_var(&lookup, "GUARD_LISTEN_ADDR")?
                .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 3000))),
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|v| !v.is_empty()),
            guard,
        })
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, GuardError>
where
    T: FromStr,
    T::Err: Display,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|e: T::Err| GuardError::InvalidSetting {
            name,
            reason: e.to_string(),
        })
}
