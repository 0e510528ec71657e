use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use http_body_util::Full;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};

pin_project! {
    /// Response body for [`TimeoutService`].
    ///
    /// [`TimeoutService`]: super::TimeoutService
    #[derive(Debug)]
    pub struct TimeoutBody<B> {
        #[pin]
        inner: TimeoutBodyInner<B>,
    }
}

impl<B> TimeoutBody<B> {
    /// Body committed by the guard: captured handler output or the fallback payload.
    pub(crate) fn buffered(body: Full<Bytes>) -> Self {
        Self {
            inner: TimeoutBodyInner::Buffered { body },
        }
    }

    /// Body of a handler that ran without a deadline, streamed as is.
    pub(crate) fn unguarded(body: B) -> Self {
        Self {
            inner: TimeoutBodyInner::Unguarded { body },
        }
    }

    pub fn is_buffered(&self) -> bool {
        matches!(self.inner, TimeoutBodyInner::Buffered { .. })
    }
}

pin_project! {
    #[derive(Debug)]
    #[project = TimeoutBodyProj]
    enum TimeoutBodyInner<B> {
        Buffered {
            #[pin]
            body: Full<Bytes>,
        },
        Unguarded {
            #[pin]
            body: B,
        },
    }
}

impl<B> Body for TimeoutBody<B>
where
    B: Body<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project().inner.project() {
            TimeoutBodyProj::Buffered { body } => body.poll_frame(cx).map_err(|err| match err {}),
            TimeoutBodyProj::Unguarded { body } => body.poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.inner {
            TimeoutBodyInner::Buffered { body } => body.is_end_stream(),
            TimeoutBodyInner::Unguarded { body } => body.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.inner {
            TimeoutBodyInner::Buffered { body } => body.size_hint(),
            TimeoutBodyInner::Unguarded { body } => body.size_hint(),
        }
    }
}
