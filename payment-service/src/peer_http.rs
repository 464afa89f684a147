//! Outbound HTTP calls to the peer's API.
//!
//! Every forwarded call carries the caller's trace id (`X-Trace-Id` and `traceparent`) and
//! names this service in `X-Caller-Service`.
use std::time::Duration;

use http::{HeaderMap, HeaderValue, Method};
use tracebridge_core::CallContext;
use tracebridge_core::http::{CALLER_SERVICE_HEADER, set_trace_headers};
use tracebridge_core::interceptor::{CallLog, HTTP_CLIENT, status_label};

/// Upper bound of every forwarded HTTP call.
pub const PEER_HTTP_TIMEOUT: Duration = Duration::from_secs(3);

pub const CALLER_SERVICE: &str = "payment-service";

#[derive(Debug, thiserror::Error)]
pub enum PeerHttpError {
    #[error("Failed to build request headers: '{0}'")]
    Header(#[from] http::header::InvalidHeaderValue),
    #[error("Request to '{path}' failed: '{source}'")]
    Request {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Peer answered '{path}' with status {status}")]
    Status { path: String, status: u16 },
}

impl PeerHttpError {
    /// Short label logged as `errorType`.
    pub fn kind(&self) -> &'static str {
        match self {
            PeerHttpError::Header(_) => "request",
            PeerHttpError::Request { source, .. } if source.is_timeout() => "timeout",
            PeerHttpError::Request { .. } => "transport",
            PeerHttpError::Status { .. } => "http",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PeerHttpClient {
    base_url: String,
    remote_service: String,
    client: reqwest::Client,
}

impl PeerHttpClient {
    pub fn new(
        base_url: impl Into<String>,
        remote_service: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(PEER_HTTP_TIMEOUT)
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            remote_service: remote_service.into(),
            client,
        })
    }

    /// Sends `method path` to the peer and drains the body.
    ///
    /// Statuses of 400 and above are errors.
    pub async fn send(
        &self,
        ctx: &CallContext,
        method: Method,
        path: &str,
    ) -> Result<(), PeerHttpError> {
        let log = CallLog::new(HTTP_CLIENT, ctx.trace_id(), method.as_str(), path)
            .with_remote_service(self.remote_service.clone());
        log.start();

        let result = self.exchange(ctx, method, path).await;

        log.done(status_label(&result));
        if let Err(err) = &result {
            log.error(err.kind(), err);
        }

        result
    }

    async fn exchange(
        &self,
        ctx: &CallContext,
        method: Method,
        path: &str,
    ) -> Result<(), PeerHttpError> {
        let headers = forwarded_headers(ctx.trace_id())?;
        let request_error = |source: reqwest::Error| PeerHttpError::Request {
            path: path.to_string(),
            source,
        };

        let mut request = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .headers(headers);
        let remaining = ctx.remaining(PEER_HTTP_TIMEOUT);
        if remaining < PEER_HTTP_TIMEOUT {
            request = request.timeout(remaining);
        }

        let response = request.send().await.map_err(request_error)?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(PeerHttpError::Status {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }

        response.bytes().await.map_err(request_error)?;
        Ok(())
    }
}

fn forwarded_headers(trace_id: &str) -> Result<HeaderMap, PeerHttpError> {
    let mut headers = HeaderMap::new();
    set_trace_headers(&mut headers, trace_id)?;
    headers.insert(
        CALLER_SERVICE_HEADER,
        HeaderValue::from_static(CALLER_SERVICE),
    );
    Ok(headers)
}
