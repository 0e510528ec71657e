//! Buffering stand-in for the real response.
//!
//! The handler's status, headers and body land in a [`ResponseCapture`]
//! first. Nothing reaches the client until the resolver finalizes the
//! capture, and finalizing happens at most once: whichever of the timeout
//! path and the completion path takes the lock first wins, the other sees
//! `None`. Writes arriving after that are rejected with
//! [`GuardError::Finalized`].

use crate::error::GuardError;
use bytes::{Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Response, StatusCode};
use http_body::Body;
use http_body_util::BodyExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tower::BoxError;
use tracing::{Level, event};

#[derive(Debug)]
pub(crate) struct CaptureState {
    pub(crate) status: Option<StatusCode>,
    pub(crate) headers: HeaderMap,
    pub(crate) body: BytesMut,
    header_was_sent: bool,
    finalized: bool,
}

#[derive(Clone, Debug)]
pub struct ResponseCapture {
    state: Arc<Mutex<CaptureState>>,
}

impl ResponseCapture {
    pub fn new(body: BytesMut) -> Self {
        Self {
            state: Arc::new(Mutex::new(CaptureState {
                status: None,
                headers: HeaderMap::new(),
                body,
                header_was_sent: false,
                finalized: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn writable(&self) -> Result<MutexGuard<'_, CaptureState>, GuardError> {
        let state = self.lock();
        if state.finalized {
            return Err(GuardError::Finalized);
        }
        Ok(state)
    }

    /// Records the status code. Only the first call has an effect.
    pub fn write_header(&self, status: StatusCode) -> Result<(), GuardError> {
        let mut state = self.writable()?;
        if state.header_was_sent {
            event!(target: "middleware::timeout", Level::DEBUG, %status, "superfluous write_header ignored");
            return Ok(());
        }
        state.status = Some(status);
        state.header_was_sent = true;
        Ok(())
    }

    pub fn insert_header(&self, name: HeaderName, value: HeaderValue) -> Result<(), GuardError> {
        self.writable()?.headers.insert(name, value);
        Ok(())
    }

    pub fn append_header(&self, name: HeaderName, value: HeaderValue) -> Result<(), GuardError> {
        self.writable()?.headers.append(name, value);
        Ok(())
    }

    /// Appends every header of `headers`, keeping values already captured.
    pub fn extend_headers(&self, headers: HeaderMap) -> Result<(), GuardError> {
        let mut state = self.writable()?;
        let mut current = None;
        for (name, value) in headers {
            // `None` names continue the previous name's value list
            if let Some(name) = name {
                current = Some(name);
            }
            if let Some(name) = &current {
                state.headers.append(name.clone(), value);
            }
        }
        Ok(())
    }

    /// Appends body bytes, returning how many were buffered.
    pub fn write(&self, data: &[u8]) -> Result<usize, GuardError> {
        self.writable()?.body.extend_from_slice(data);
        Ok(data.len())
    }

    /// The captured status, `None` while unset.
    pub fn status(&self) -> Option<StatusCode> {
        self.lock().status
    }

    pub fn body_len(&self) -> usize {
        self.lock().body.len()
    }

    pub fn is_finalized(&self) -> bool {
        self.lock().finalized
    }

    /// Runs `commit` under the capture lock if nobody finalized the capture
    /// yet, then marks it finalized. The loser of a race gets `None`.
    pub(crate) fn finalize<R>(&self, commit: impl FnOnce(&mut CaptureState) -> R) -> Option<R> {
        let mut state = self.lock();
        if state.finalized {
            return None;
        }
        state.finalized = true;
        Some(commit(&mut state))
    }
}

/// Drives the wrapped handler and copies its response into `capture`.
///
/// Stops at the first write the capture rejects; trailers are not captured.
pub(crate) async fn forward<F, B, E>(handler: F, capture: ResponseCapture) -> Result<(), BoxError>
where
    F: Future<Output = Result<Response<B>, E>>,
    E: Into<BoxError>,
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let (parts, body) = handler.await.map_err(Into::<BoxError>::into)?.into_parts();
    capture.extend_headers(parts.headers)?;
    capture.write_header(parts.status)?;

    let mut body = std::pin::pin!(body);
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(Into::<BoxError>::into)?;
        if let Ok(data) = frame.into_data() {
            capture.write(&data)?;
        }
    }
    Ok(())
}
