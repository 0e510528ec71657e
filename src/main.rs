mod app;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use service_timeout_guard::{HandlerPanic, Settings, TimeoutLayer, telemetry};
use std::any::Any;
use tokio::net::TcpListener;
use tower::{ServiceBuilder, service_fn};
use tower_http::catch_panic::CatchPanicLayer;

/// Demo server guarding the routes in [`app`] with a [`TimeoutLayer`].
///
/// how to run:
/// ```bash
/// GUARD_TIMEOUT_SECS=3 cargo run
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;
    let telemetry = telemetry::init_tracing(settings.otlp_endpoint.as_deref())?;

    let config = settings.guard.clone().into_config()?;
    tracing::info!(target: "service::main", ?config, "Timeout guard configured");

    // panics re-raised by the guard end up in CatchPanicLayer
    let t_service = ServiceBuilder::new()
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TimeoutLayer::new(config))
        .service(service_fn(app::route::<Incoming>));
    let h_service = TowerToHyperService::new(t_service);

    let listener = TcpListener::bind(settings.listen_addr).await?;
    tracing::info!(target: "service::main", addr = %settings.listen_addr, "Listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let io = TokioIo::new(stream);
                let cloned_service = h_service.clone();
                tokio::task::spawn(async move {
                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, cloned_service)
                        .await
                    {
                        tracing::warn!(target: "service::main", error = %err, "Error serving connection");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(target: "service::main", "Shutting down");
                break;
            }
        }
    }

    telemetry.shutdown();
    Ok(())
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response<Full<Bytes>> {
    // the guard already logged a `HandlerPanic` with its backtrace
    let details = match err.downcast::<HandlerPanic>() {
        Ok(panic) => panic.message().to_owned(),
        Err(err) => {
            tracing::error!(target: "service::main", "Panic outside the timeout guard");
            if let Some(msg) = err.downcast_ref::<String>() {
                msg.clone()
            } else if let Some(msg) = err.downcast_ref::<&str>() {
                (*msg).to_owned()
            } else {
                "Unknown panic message".to_owned()
            }
        }
    };

    let body = serde_json::json!({ "code": -1, "msg": "internal error", "details": details });
    let mut res = Response::new(Full::from(body.to_string()));
    *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    res.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    res
}
