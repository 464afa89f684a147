//! # HTTP Boundary
//!
//! [`HttpBoundaryLayer`] applies the boundary contract to an HTTP service:
//!
//! * the trace id is resolved from `X-Trace-Id`, then `traceparent`, then generated,
//! * the handler finds a [`CallContext`] in the request extensions,
//! * `start`/`done` records are logged with the caller's address (when the server was
//!   built with `into_make_service_with_connect_info::<SocketAddr>()`), the response status,
//!   the response size when known, and the elapsed time,
//! * a handler panic becomes a `500 internal error` response and an `http.panic` record,
//! * every response carries `X-Trace-Id` and `traceparent`.
//!
//! [`set_trace_headers`] is the outbound half, used when forwarding a call to a peer.
use crate::context::CallContext;
use crate::interceptor::{CallLog, HTTP_SERVER};
use crate::recover;
use crate::trace::{self, TRACE_ID_HEADER, TRACEPARENT_HEADER};
use axum::body::Body;
use axum::extract::ConnectInfo;
use futures_util::future::BoxFuture;
use http::header::{CONTENT_TYPE, InvalidHeaderValue};
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use http_body::Body as _;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Header naming the service that issued a forwarded call.
pub const CALLER_SERVICE_HEADER: &str = "x-caller-service";

/// Tower layer that wraps an HTTP service in the boundary contract.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpBoundaryLayer;

impl HttpBoundaryLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for HttpBoundaryLayer {
    type Service = HttpBoundary<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HttpBoundary { inner }
    }
}

#[derive(Debug, Clone)]
pub struct HttpBoundary<S> {
    inner: S,
}

impl<S, ReqBody> Service<Request<ReqBody>> for HttpBoundary<S>
where
    S: Service<Request<ReqBody>, Response = Response<Body>, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
{
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let trace_id = trace_id_from_headers(req.headers());
        let mut log = CallLog::new(
            HTTP_SERVER,
            trace_id.clone(),
            req.method().as_str(),
            req.uri().path(),
        );
        if let Some(ConnectInfo(peer)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
            log = log.with_peer(peer.to_string());
        }
        log.start();

        req.extensions_mut().insert(CallContext::new(trace_id.clone()));

        // The clone that was driven to readiness serves this request.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let mut response = match recover::catch_panic(inner.call(req)).await {
                Ok(Ok(response)) => response,
                Ok(Err(never)) => match never {},
                Err(recovered) => {
                    log.panic(StatusCode::INTERNAL_SERVER_ERROR.as_u16(), &recovered);
                    internal_error()
                }
            };

            if let Err(e) = set_trace_headers(response.headers_mut(), &trace_id) {
                tracing::warn!(
                    source = HTTP_SERVER.source,
                    traceId = %trace_id,
                    error = %e,
                    "trace id not representable as a header"
                );
            }

            log.set_response_bytes(response.body().size_hint().exact());
            log.done(response.status().as_u16());
            Ok(response)
        })
    }
}

/// Resolves the trace id of an inbound HTTP request from its headers.
pub fn trace_id_from_headers(headers: &HeaderMap) -> String {
    let get = |key: &str| {
        headers
            .get(key)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    };

    trace::extract_or_create(get(TRACE_ID_HEADER), get(TRACEPARENT_HEADER))
}

/// Writes `X-Trace-Id` and `traceparent` for `trace_id` into `headers`.
pub fn set_trace_headers(headers: &mut HeaderMap, trace_id: &str) -> Result<(), InvalidHeaderValue> {
    let raw = HeaderValue::from_str(trace_id)?;
    let traceparent = HeaderValue::from_str(&trace::format_traceparent(trace_id))?;

    headers.insert(TRACE_ID_HEADER, raw);
    headers.insert(TRACEPARENT_HEADER, traceparent);
    Ok(())
}

fn internal_error() -> Response<Body> {
    let mut response = Response::new(Body::from("internal error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::{Extension, Router};
    use tower::ServiceExt;
    use tracing_test::traced_test;

    const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";

    fn app() -> Router {
        Router::new()
            .route(
                "/echo",
                get(|Extension(ctx): Extension<CallContext>| async move {
                    ctx.trace_id().to_string()
                }),
            )
            .route(
                "/boom",
                get(|| async {
                    if true {
                        panic!("ledger unavailable");
                    }
                    "unreachable"
                }),
            )
            .layer(HttpBoundaryLayer::new())
    }

    async fn body_text(response: Response<Body>) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    #[traced_test]
    async fn test_explicit_trace_id_reaches_handler_and_response() {
        let request = Request::get("/echo")
            .header("X-Trace-Id", TRACE_ID)
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[TRACE_ID_HEADER], TRACE_ID);
        assert_eq!(
            response.headers()[TRACEPARENT_HEADER],
            "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01"
        );
        assert_eq!(body_text(response).await, TRACE_ID);

        assert!(logs_contain("http.inbound.start"));
        assert!(logs_contain("http.inbound.done"));
        assert!(logs_contain("status=200"));
        assert!(logs_contain("path=/echo"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_access_records_carry_peer_and_bytes() {
        let mut request = Request::get("/echo")
            .header("X-Trace-Id", TRACE_ID)
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 5555))));

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(body_text(response).await, TRACE_ID);

        logs_assert(|lines: &[&str]| {
            let start = lines.iter().find(|line| line.contains("http.inbound.start"));
            let done = lines.iter().find(|line| line.contains("http.inbound.done"));
            match (start, done) {
                (Some(start), Some(done))
                    if start.contains("peer=\"10.0.0.7:5555\"")
                        && done.contains("peer=\"10.0.0.7:5555\"")
                        && done.contains("bytes=32") =>
                {
                    Ok(())
                }
                other => Err(format!("access records without peer or bytes: {other:?}")),
            }
        });
    }

    #[tokio::test]
    #[traced_test]
    async fn test_access_records_without_connect_info_omit_peer() {
        let request = Request::get("/echo").body(Body::empty()).unwrap();

        app().oneshot(request).await.unwrap();

        assert!(logs_contain("http.inbound.done"));
        assert!(!logs_contain("peer="));
    }

    #[tokio::test]
    async fn test_trace_id_from_traceparent() {
        let request = Request::get("/echo")
            .header(
                "traceparent",
                "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
            )
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();

        assert_eq!(
            response.headers()[TRACE_ID_HEADER],
            "0af7651916cd43dd8448eb211c80319c"
        );
        assert_eq!(body_text(response).await, "0af7651916cd43dd8448eb211c80319c");
    }

    #[tokio::test]
    async fn test_trace_id_generated_when_absent() {
        let request = Request::get("/echo").body(Body::empty()).unwrap();

        let response = app().oneshot(request).await.unwrap();

        let header = response.headers()[TRACE_ID_HEADER]
            .to_str()
            .unwrap()
            .to_string();
        assert_eq!(header.len(), 32);
        assert_eq!(body_text(response).await, header);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_panic_becomes_internal_error() {
        let request = Request::get("/boom")
            .header("X-Trace-Id", TRACE_ID)
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[TRACE_ID_HEADER], TRACE_ID);
        assert_eq!(body_text(response).await, "internal error");

        assert!(logs_contain("http.panic"));
        assert!(logs_contain("ledger unavailable"));
        assert!(logs_contain("errorType=\"panic\""));
        assert!(logs_contain("status=500"));
    }

    #[test]
    fn test_set_trace_headers_rejects_unprintable_id() {
        let mut headers = HeaderMap::new();
        assert!(set_trace_headers(&mut headers, "bad\nid").is_err());
        assert!(headers.is_empty());
    }
}
