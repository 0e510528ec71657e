use crate::config::{Deadline, TimeoutConfig};
use crate::metrics::GuardMetrics;
use crate::pool::BufferPool;
use crate::timeout::capture::{self, ResponseCapture};
use crate::timeout::future::ResponseFuture;
use crate::timeout::layer::TimeoutLayer;
use crate::timeout::racer;
use crate::timeout::resolver::OutcomeResolver;
use crate::timeout::TimeoutBody;
use bytes::Bytes;
use http::{Request, Response};
use http_body::Body;
use std::mem;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tower::{BoxError, Service};
use tracing::{Instrument, Level, event, info_span};

/// Deadline of a guarded request, inserted into the request extensions so a
/// handler can give up cooperatively. The guard itself never interrupts it.
#[derive(Clone, Copy, Debug)]
pub struct RequestDeadline {
    at: tokio::time::Instant,
    duration: Duration,
}

impl RequestDeadline {
    fn after(duration: Duration) -> Self {
        Self {
            at: tokio::time::Instant::now() + duration,
            duration,
        }
    }

    /// The effective timeout applied to the request.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn instant(&self) -> tokio::time::Instant {
        self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(tokio::time::Instant::now())
    }
}

#[derive(Clone)]
pub struct TimeoutService<S> {
    pub(crate) inner: S,
    pub(crate) config: Arc<TimeoutConfig>,
    pub(crate) pool: Arc<BufferPool>,
    pub(crate) metrics: GuardMetrics,
}

impl<S> TimeoutService<S> {
    pub fn new(inner: S, config: TimeoutConfig) -> Self {
        Self {
            inner,
            config: Arc::new(config),
            pool: Arc::new(BufferPool::new()),
            metrics: GuardMetrics::new(),
        }
    }

    /// Gets a reference to the underlying service.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Gets a mutable reference to the underlying service.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consumes `self`, returning the underlying service.
    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Returns a new [`Layer`] that wraps services with a `TimeoutLayer` middleware.
    ///
    /// [`Layer`]: tower::Layer
    pub fn layer(config: TimeoutConfig) -> TimeoutLayer {
        TimeoutLayer::new(config)
    }
}

impl<ReqBody, ResBody, S> Service<Request<ReqBody>> for TimeoutService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Error: Into<BoxError> + 'static,
    S::Future: Send + 'static,
    ResBody: Body<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError>,
    ReqBody: Send + 'static,
{
    type Response = Response<TimeoutBody<ResBody>>;
    type Error = BoxError;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let duration = match self.config.deadline_for(req.headers()) {
            Deadline::Unbounded => {
                self.metrics.record_bypass();
                event!(target: "middleware::timeout", Level::INFO, uri = %req.uri(), "Infinite timeout requested, running unguarded");
                return ResponseFuture::unguarded(self.inner.call(req));
            }
            Deadline::After(duration) => duration,
        };

        let head = self.config.on_timeout().map(|_| request_head(&req));
        req.extensions_mut().insert(RequestDeadline::after(duration));

        let span = info_span!(
            target: "middleware::timeout",
            "timeout",
            timeout_secs = duration.as_secs_f64(),
            uri = %req.uri(),
        );

        // the ready service goes to the handler task, the clone stays for the next call
        let clone = self.inner.clone();
        let mut inner = mem::replace(&mut self.inner, clone);
        let capture = ResponseCapture::new(self.pool.get());
        let handler_capture = capture.clone();
        // `call` itself runs on the handler task, under the deadline and the unwind guard
        let work = async move { capture::forward(inner.call(req), handler_capture).await };

        let config = self.config.clone();
        let pool = self.pool.clone();
        let metrics = self.metrics.clone();
        ResponseFuture::guarded(Box::pin(
            async move {
                let started = Instant::now();
                let outcome = racer::race(work, duration, metrics.clone()).await;
                metrics.record_outcome(outcome.label(), started.elapsed());
                OutcomeResolver::new(&config, &pool).resolve(outcome, &capture, head.as_ref())
            }
            .instrument(span),
        ))
    }
}

/// Body-less copy of the request for the `on_timeout` callback.
fn request_head<B>(req: &Request<B>) -> Request<()> {
    let mut head = Request::new(());
    *head.method_mut() = req.method().clone();
    *head.uri_mut() = req.uri().clone();
    *head.version_mut() = req.version();
    *head.headers_mut() = req.headers().clone();
    head
}
