//! Races a spawned handler against its deadline.
//!
//! The handler runs on its own tokio task and is never aborted: once the
//! deadline wins the task is left to finish on its own and whatever it
//! produces afterwards is discarded.

use crate::metrics::GuardMetrics;
use futures::FutureExt;
use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::oneshot;
use tower::BoxError;
use tracing::{Instrument, Level, event};

/// Result of one race; produced once per guarded request.
#[derive(Debug)]
pub enum RaceOutcome {
    /// The handler finished in time; `Err` carries its error.
    Completed(Result<(), BoxError>),
    TimedOut,
    Panicked(HandlerPanic),
}

impl RaceOutcome {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            RaceOutcome::Completed(Ok(())) => "completed",
            RaceOutcome::Completed(Err(_)) => "failed",
            RaceOutcome::TimedOut => "timed_out",
            RaceOutcome::Panicked(_) => "panicked",
        }
    }
}

/// A panic recovered from a handler task.
///
/// This is the payload the guard re-raises with [`std::panic::resume_unwind`],
/// so an outer panic boundary can downcast to it.
#[derive(Debug)]
pub struct HandlerPanic {
    message: String,
    backtrace: String,
}

impl HandlerPanic {
    /// Wraps a payload caught by `catch_unwind`.
    pub fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(msg) = payload.downcast_ref::<&'static str>() {
            (*msg).to_owned()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "Box<dyn Any>".to_owned()
        };
        Self {
            message,
            backtrace: Backtrace::force_capture().to_string(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Stack of the handler task at the recovery point, captured after
    /// unwinding finished.
    ///
    /// It shows how the handler was being polled, not the line that
    /// panicked; the panic hook reports the panic site when it fires.
    pub fn backtrace(&self) -> &str {
        &self.backtrace
    }
}

impl fmt::Display for HandlerPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timeout guard recovered panic: {}", self.message)
    }
}

impl std::error::Error for HandlerPanic {}

/// Spawns `work` and waits for the first of deadline expiry, a panic, or
/// completion.
///
/// Both signal channels are oneshots, so the task's send never blocks even
/// after this function returned and the receivers are gone.
pub async fn race<F>(work: F, duration: Duration, metrics: GuardMetrics) -> RaceOutcome
where
    F: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    let (done_tx, mut done_rx) = oneshot::channel();
    let (panic_tx, mut panic_rx) = oneshot::channel::<HandlerPanic>();

    tokio::spawn(
        async move {
            match AssertUnwindSafe(work).catch_unwind().await {
                Ok(result) => {
                    if done_tx.send(result).is_err() {
                        event!(target: "middleware::timeout", Level::DEBUG, "handler finished after the deadline, output discarded");
                    }
                }
                Err(payload) => {
                    let panic = HandlerPanic::from_payload(payload);
                    if let Err(panic) = panic_tx.send(panic) {
                        metrics.record_late_panic();
                        event!(
                            target: "middleware::timeout",
                            Level::ERROR,
                            panic_message = %panic.message,
                            backtrace = %panic.backtrace,
                            "handler panicked after the deadline"
                        );
                    }
                }
            }
        }
        .in_current_span(),
    );

    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);

    // a closed channel disables its branch, leaving the others to decide
    tokio::select! {
        Ok(panic) = &mut panic_rx => RaceOutcome::Panicked(panic),
        Ok(result) = &mut done_rx => RaceOutcome::Completed(result),
        _ = &mut deadline => RaceOutcome::TimedOut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::{Instant, sleep};

    #[tokio::test(start_paused = true)]
    async fn test_fast_handler_completes() {
        let outcome = race(
            async {
                sleep(Duration::from_secs(1)).await;
                Ok(())
            },
            Duration::from_secs(5),
            GuardMetrics::new(),
        )
        .await;
        assert!(matches!(outcome, RaceOutcome::Completed(Ok(()))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_error_is_reported() {
        let outcome = race(
            async { Err::<(), BoxError>("backend unavailable".into()) },
            Duration::from_secs(5),
            GuardMetrics::new(),
        )
        .await;
        match outcome {
            RaceOutcome::Completed(Err(err)) => assert_eq!(err.to_string(), "backend unavailable"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_times_out_and_keeps_running() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let start = Instant::now();
        let outcome = race(
            async move {
                sleep(Duration::from_secs(10)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            },
            Duration::from_secs(5),
            GuardMetrics::new(),
        )
        .await;
        assert!(matches!(outcome, RaceOutcome::TimedOut));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6));
        assert!(!finished.load(Ordering::SeqCst));

        sleep(Duration::from_secs(6)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    async fn explode_after(delay: Duration, msg: &'static str) -> Result<(), BoxError> {
        sleep(delay).await;
        panic!("{msg}")
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_is_captured() {
        let outcome = race(
            explode_after(Duration::from_millis(10), "handler exploded"),
            Duration::from_secs(5),
            GuardMetrics::new(),
        )
        .await;
        match outcome {
            RaceOutcome::Panicked(panic) => {
                assert_eq!(panic.message(), "handler exploded");
                assert!(!panic.backtrace().is_empty());
                assert!(panic.to_string().contains("handler exploded"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_panic_does_not_change_outcome() {
        let outcome = race(
            explode_after(Duration::from_secs(8), "too late"),
            Duration::from_secs(2),
            GuardMetrics::new(),
        )
        .await;
        assert!(matches!(outcome, RaceOutcome::TimedOut));
        // let the orphaned task panic; its send must not block or abort the runtime
        sleep(Duration::from_secs(10)).await;
    }

    #[test]
    fn test_formatted_panic_message() {
        let panic = HandlerPanic::from_payload(Box::new(format!("code {}", 7)));
        assert_eq!(panic.message(), "code 7");
        let panic = HandlerPanic::from_payload(Box::new(42u8));
        assert_eq!(panic.message(), "Box<dyn Any>");
    }
}
