use crate::config::{TimeoutConfig, merge_headers};
use crate::error::GuardError;
use crate::pool::BufferPool;
use crate::timeout::capture::ResponseCapture;
use crate::timeout::racer::RaceOutcome;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use std::mem;
use tower::BoxError;
use tracing::{Level, event};

/// Commits the winner of a race to the real response, exactly once.
pub(crate) struct OutcomeResolver<'a> {
    config: &'a TimeoutConfig,
    pool: &'a BufferPool,
}

impl<'a> OutcomeResolver<'a> {
    pub(crate) fn new(config: &'a TimeoutConfig, pool: &'a BufferPool) -> Self {
        Self { config, pool }
    }

    /// `head` is the request as seen by the `on_timeout` callback.
    ///
    /// # Panics
    ///
    /// Re-raises the handler's panic for [`RaceOutcome::Panicked`].
    pub(crate) fn resolve(
        &self,
        outcome: RaceOutcome,
        capture: &ResponseCapture,
        head: Option<&Request<()>>,
    ) -> Result<Response<Full<Bytes>>, BoxError> {
        match outcome {
            RaceOutcome::Completed(Ok(())) => {
                let res = capture
                    .finalize(|state| {
                        let mut res = Response::new(Full::new(Bytes::copy_from_slice(&state.body)));
                        *res.status_mut() = state.status.unwrap_or(StatusCode::OK);
                        merge_headers(res.headers_mut(), &state.headers);
                        self.pool.put(mem::take(&mut state.body));
                        res
                    })
                    .ok_or(GuardError::Finalized)?;
                event!(target: "middleware::timeout", Level::INFO, status = %res.status(), "Request completed in time");
                Ok(res)
            }
            RaceOutcome::Completed(Err(err)) => {
                self.recycle(capture);
                event!(target: "middleware::timeout", Level::WARN, error = %err, "Handler failed");
                Err(err)
            }
            RaceOutcome::TimedOut => {
                // the buffer stays with the capture: the handler task may still
                // hold it and it is freed once that task lets go
                let res = capture
                    .finalize(|_| {
                        let mut res = Response::new(Full::new(self.config.fallback().encode()));
                        *res.status_mut() = self.config.error_status();
                        *res.headers_mut() = self.config.fallback_headers();
                        res
                    })
                    .ok_or(GuardError::Finalized)?;
                event!(target: "middleware::timeout", Level::WARN, status = %res.status(), "Request timeout");

                if let (Some(on_timeout), Some(head)) = (self.config.on_timeout(), head) {
                    on_timeout(head);
                }
                Ok(res)
            }
            RaceOutcome::Panicked(panic) => {
                self.recycle(capture);
                event!(
                    target: "middleware::timeout",
                    Level::ERROR,
                    panic_message = %panic.message(),
                    backtrace = %panic.backtrace(),
                    "Handler panicked"
                );
                std::panic::resume_unwind(Box::new(panic))
            }
        }
    }

    /// Finalizes without a response; the handler task is done with the buffer.
    fn recycle(&self, capture: &ResponseCapture) {
        capture.finalize(|state| self.pool.put(mem::take(&mut state.body)));
    }
}
