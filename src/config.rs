//! Guard configuration.
//!
//! A [`TimeoutConfig`] is assembled once, when the layer is built, and shared
//! by reference with every request. Per-request state is limited to the
//! [`Deadline`] resolved from the `x-service-timeout` header.

use crate::error::GuardError;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Request, StatusCode};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Request header carrying a caller supplied timeout in whole seconds.
pub const TIMEOUT_HEADER: HeaderName = HeaderName::from_static("x-service-timeout");
/// Header value asking for no timeout at all.
pub const INFINITE_TIMEOUT: &str = "inf";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const MIN_TIMEOUT: Duration = Duration::from_secs(2);
pub const MAX_TIMEOUT: Duration = Duration::from_secs(50);
pub const DEFAULT_FALLBACK: &str = r#"{"code": -1, "msg":"http: Handler timeout"}"#;

/// Invoked with the request head after a timeout response was committed.
pub type OnTimeout = Arc<dyn Fn(&Request<()>) + Send + Sync>;

/// Body written to the client when the handler misses its deadline.
#[derive(Clone, Debug, PartialEq)]
pub enum FallbackPayload {
    Text(String),
    Bytes(Bytes),
    Json(serde_json::Value),
}

impl FallbackPayload {
    /// Serializes any structured value into a JSON payload.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, GuardError> {
        Ok(FallbackPayload::Json(serde_json::to_value(value)?))
    }

    pub fn encode(&self) -> Bytes {
        match self {
            FallbackPayload::Text(text) => Bytes::copy_from_slice(text.as_bytes()),
            FallbackPayload::Bytes(bytes) => bytes.clone(),
            // serializing a `Value` cannot fail
            FallbackPayload::Json(value) => Bytes::from(value.to_string()),
        }
    }

    pub(crate) fn content_type(&self) -> HeaderValue {
        match self {
            FallbackPayload::Text(_) => HeaderValue::from_static("text/plain; charset=utf-8"),
            FallbackPayload::Bytes(_) => HeaderValue::from_static("application/octet-stream"),
            FallbackPayload::Json(_) => HeaderValue::from_static("application/json"),
        }
    }
}

impl From<&str> for FallbackPayload {
    fn from(text: &str) -> Self {
        FallbackPayload::Text(text.to_owned())
    }
}

impl From<String> for FallbackPayload {
    fn from(text: String) -> Self {
        FallbackPayload::Text(text)
    }
}

impl From<Bytes> for FallbackPayload {
    fn from(bytes: Bytes) -> Self {
        FallbackPayload::Bytes(bytes)
    }
}

impl From<Vec<u8>> for FallbackPayload {
    fn from(bytes: Vec<u8>) -> Self {
        FallbackPayload::Bytes(Bytes::from(bytes))
    }
}

impl From<serde_json::Value> for FallbackPayload {
    fn from(value: serde_json::Value) -> Self {
        FallbackPayload::Json(value)
    }
}

/// How long a single request may run before the fallback is sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Deadline {
    /// The caller asked for `inf` and the config allows it; the handler runs unguarded.
    Unbounded,
    After(Duration),
}

#[derive(Clone)]
pub struct TimeoutConfig {
    timeout: Duration,
    min_timeout: Duration,
    max_timeout: Duration,
    allow_infinite: bool,
    fallback: FallbackPayload,
    error_status: StatusCode,
    extra_headers: HeaderMap,
    on_timeout: Option<OnTimeout>,
}

impl TimeoutConfig {
    pub fn builder() -> TimeoutConfigBuilder {
        TimeoutConfigBuilder::default()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn min_timeout(&self) -> Duration {
        self.min_timeout
    }

    pub fn max_timeout(&self) -> Duration {
        self.max_timeout
    }

    pub fn allow_infinite(&self) -> bool {
        self.allow_infinite
    }

    pub fn fallback(&self) -> &FallbackPayload {
        &self.fallback
    }

    pub fn error_status(&self) -> StatusCode {
        self.error_status
    }

    pub fn extra_headers(&self) -> &HeaderMap {
        &self.extra_headers
    }

    pub fn on_timeout(&self) -> Option<&OnTimeout> {
        self.on_timeout.as_ref()
    }

    /// Clamps a requested duration into `[min_timeout, max_timeout]`.
    pub fn clamp(&self, requested: Duration) -> Duration {
        requested.clamp(self.min_timeout, self.max_timeout)
    }

    /// Resolves the deadline for one request from its headers.
    ///
    /// A malformed header is not an error: the configured default applies.
    pub fn deadline_for(&self, headers: &HeaderMap) -> Deadline {
        let Some(raw) = headers
            .get(&TIMEOUT_HEADER)
            .and_then(|value| value.to_str().ok())
        else {
            return Deadline::After(self.timeout);
        };

        if raw == INFINITE_TIMEOUT && self.allow_infinite {
            return Deadline::Unbounded;
        }

        // plain decimal digits only; `u64::from_str` would also take a `+`
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Deadline::After(self.timeout);
        }
        match raw.parse::<u64>() {
            Ok(secs) => Deadline::After(self.clamp(Duration::from_secs(secs))),
            Err(_) => Deadline::After(self.timeout),
        }
    }

    /// Headers of a timeout response: a content type matching the payload,
    /// overridden by the configured extra headers.
    pub(crate) fn fallback_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, self.fallback.content_type());
        merge_headers(&mut headers, &self.extra_headers);
        headers
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            timeout: DEFAULT_TIMEOUT,
            min_timeout: MIN_TIMEOUT,
            max_timeout: MAX_TIMEOUT,
            allow_infinite: false,
            fallback: FallbackPayload::from(DEFAULT_FALLBACK),
            error_status: StatusCode::SERVICE_UNAVAILABLE,
            extra_headers: HeaderMap::new(),
            on_timeout: None,
        }
    }
}

impl fmt::Debug for TimeoutConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutConfig")
            .field("timeout", &self.timeout)
            .field("min_timeout", &self.min_timeout)
            .field("max_timeout", &self.max_timeout)
            .field("allow_infinite", &self.allow_infinite)
            .field("fallback", &self.fallback)
            .field("error_status", &self.error_status)
            .field("extra_headers", &self.extra_headers)
            .field("on_timeout", &self.on_timeout.is_some())
            .finish()
    }
}

/// Builder for [`TimeoutConfig`]; unset fields keep their defaults.
#[derive(Default)]
pub struct TimeoutConfigBuilder {
    config: TimeoutConfig,
}

impl TimeoutConfigBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn min_timeout(mut self, min: Duration) -> Self {
        self.config.min_timeout = min;
        self
    }

    pub fn max_timeout(mut self, max: Duration) -> Self {
        self.config.max_timeout = max;
        self
    }

    pub fn allow_infinite(mut self, allow: bool) -> Self {
        self.config.allow_infinite = allow;
        self
    }

    pub fn fallback(mut self, payload: impl Into<FallbackPayload>) -> Self {
        self.config.fallback = payload.into();
        self
    }

    pub fn error_status(mut self, status: StatusCode) -> Self {
        self.config.error_status = status;
        self
    }

    /// Sets the values of one extra timeout header, replacing earlier ones.
    pub fn header<I>(mut self, name: HeaderName, values: I) -> Self
    where
        I: IntoIterator<Item = HeaderValue>,
    {
        self.config.extra_headers.remove(&name);
        for value in values {
            self.config.extra_headers.append(name.clone(), value);
        }
        self
    }

    pub fn on_timeout<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Request<()>) + Send + Sync + 'static,
    {
        self.config.on_timeout = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> Result<TimeoutConfig, GuardError> {
        let config = self.config;
        if config.min_timeout > config.max_timeout {
            return Err(GuardError::InvalidConfig(format!(
                "min timeout {:?} exceeds max timeout {:?}",
                config.min_timeout, config.max_timeout
            )));
        }
        if config.timeout < config.min_timeout || config.timeout > config.max_timeout {
            return Err(GuardError::InvalidConfig(format!(
                "default timeout {:?} outside [{:?}, {:?}]",
                config.timeout, config.min_timeout, config.max_timeout
            )));
        }
        Ok(config)
    }
}

/// Copies `src` into `dst`; each name present in `src` has its value list
/// replaced rather than extended.
pub(crate) fn merge_headers(dst: &mut HeaderMap, src: &HeaderMap) {
    for name in src.keys() {
        dst.remove(name);
        for value in src.get_all(name) {
            dst.append(name.clone(), value.clone());
        }
    }
}
