//! Response future for [`TimeoutService`].
//!
//! A request either runs under the guard, in which case the response is
//! produced by the race and is always buffered, or it asked for an infinite
//! timeout and the inner service's future is polled directly.
//!
//! [`TimeoutService`]: super::TimeoutService

use crate::timeout::body::TimeoutBody;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::Response;
use http_body::Body;
use http_body_util::Full;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tower::BoxError;

pub(crate) type GuardedFuture = BoxFuture<'static, Result<Response<Full<Bytes>>, BoxError>>;

pin_project! {
    /// Response future for [`TimeoutService`].
    ///
    /// [`TimeoutService`]: super::TimeoutService
    pub struct ResponseFuture<F> {
        #[pin]
        inner: ResponseFutureInner<F>,
    }
}

impl<F> ResponseFuture<F> {
    pub(crate) fn guarded(future: GuardedFuture) -> Self {
        Self {
            inner: ResponseFutureInner::Guarded { future },
        }
    }

    pub(crate) fn unguarded(future: F) -> Self {
        Self {
            inner: ResponseFutureInner::Unguarded { future },
        }
    }
}

pin_project! {
    #[project = ResFutProj]
    enum ResponseFutureInner<F> {
        Guarded {
            future: GuardedFuture,
        },
        Unguarded {
            #[pin]
            future: F,
        },
    }
}

impl<ResBody, F, E> Future for ResponseFuture<F>
where
    ResBody: Body<Data = Bytes>,
    F: Future<Output = Result<Response<ResBody>, E>>,
    E: Into<BoxError>,
{
    type Output = Result<Response<TimeoutBody<ResBody>>, BoxError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let res = match self.project().inner.project() {
            ResFutProj::Guarded { future } => ready!(future.as_mut().poll(cx))?.map(TimeoutBody::buffered),
            ResFutProj::Unguarded { future } => ready!(future.poll(cx))
                .map_err(Into::<BoxError>::into)?
                .map(TimeoutBody::unguarded),
        };
        Poll::Ready(Ok(res))
    }
}
