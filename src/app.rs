use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{Method, Request, Response, StatusCode, Uri};
use http_body::Body;
use http_body_util::{BodyExt, Full};
use service_timeout_guard::RequestDeadline;
use std::time::Duration;
use tower::BoxError;
use tracing::{info, instrument};

const DEFAULT_SLOW_SECS: u64 = 10;

/// Demo routes used to exercise the guard.
///
/// ```bash
/// curl -v -X POST -d "hello world" http://127.0.0.1:3000/echo
/// curl -v "http://127.0.0.1:3000/slow?secs=8"
/// curl -v -H "x-service-timeout: 100" "http://127.0.0.1:3000/slow?secs=8"
/// curl -v http://127.0.0.1:3000/panic
/// ```
#[instrument(skip(req), fields(method = %req.method(), path = %req.uri().path()), target = "service::app")]
pub async fn route<B>(req: Request<B>) -> Result<Response<Full<Bytes>>, BoxError>
where
    B: Body<Data = Bytes> + Send,
    B::Error: Into<BoxError>,
{
    match (req.method(), req.uri().path()) {
        (&Method::POST, "/echo") => echo(req).await,
        (&Method::GET, "/slow") => {
            let deadline = req.extensions().get::<RequestDeadline>().copied();
            slow(slow_secs(req.uri()), deadline).await
        }
        (&Method::POST, "/created") => Ok(text(StatusCode::CREATED, "created")),
        (&Method::GET, "/panic") => panic!("handler panicked on purpose"),
        _ => Ok(text(StatusCode::NOT_FOUND, "not found")),
    }
}

async fn echo<B>(req: Request<B>) -> Result<Response<Full<Bytes>>, BoxError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let body = req.into_body().collect().await.map_err(Into::<BoxError>::into)?.to_bytes();
    let uppercased = body
        .iter()
        .map(|byte| byte.to_ascii_uppercase())
        .collect::<Bytes>();
    info!(target: "service::app", "Transformed data: {:?}", uppercased);
    Ok(Response::new(Full::new(uppercased)))
}

fn slow_secs(uri: &Uri) -> u64 {
    uri.query()
        .and_then(|query| query.split('&').find_map(|pair| pair.strip_prefix("secs=")))
        .and_then(|secs| secs.parse().ok())
        .unwrap_or(DEFAULT_SLOW_SECS)
}

async fn slow(
    secs: u64,
    deadline: Option<RequestDeadline>,
) -> Result<Response<Full<Bytes>>, BoxError> {
    if let Some(deadline) = deadline {
        info!(
            target: "service::app",
            sleep_secs = secs,
            deadline_ms = deadline.duration().as_millis() as u64,
            "Sleeping under a deadline"
        );
    }
    tokio::time::sleep(Duration::from_secs(secs)).await;

    let mut res = text(StatusCode::OK, r#"{"ok":true}"#);
    res.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(res)
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut res = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *res.status_mut() = status;
    res
}
