//! Request timeout guard for `tower` services.
//!
//! [`TimeoutLayer`] runs the wrapped handler on its own task and buffers its
//! response. If the handler misses its deadline the client gets the
//! configured fallback response instead, while the handler keeps running in
//! the background; it is never cancelled. Callers may shorten or extend the
//! deadline per request with the `x-service-timeout` header (whole seconds,
//! clamped to the configured bounds, or `inf` when allowed).
//!
//! ```no_run
//! use service_timeout_guard::{TimeoutConfig, TimeoutLayer};
//! use std::time::Duration;
//! use tower::ServiceBuilder;
//!
//! # fn main() -> Result<(), service_timeout_guard::GuardError> {
//! let config = TimeoutConfig::builder()
//!     .timeout(Duration::from_secs(3))
//!     .fallback(r#"{"code": -1, "msg": "busy"}"#)
//!     .build()?;
//! let _builder = ServiceBuilder::new().layer(TimeoutLayer::new(config));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod settings;
pub mod telemetry;
pub mod timeout;

pub use config::{
    Deadline, FallbackPayload, INFINITE_TIMEOUT, OnTimeout, TIMEOUT_HEADER, TimeoutConfig,
    TimeoutConfigBuilder,
};
pub use error::GuardError;
pub use pool::BufferPool;
pub use settings::{GuardSettings, Settings};
pub use timeout::{
    HandlerPanic, RaceOutcome, RequestDeadline, ResponseCapture, TimeoutBody, TimeoutLayer,
    TimeoutService,
};
