//! # Bridge Client
//!
//! A gRPC client that invokes bridge methods by their full path string
//! (e.g. `/bridge.v1.PeerBridge/ValidateUser`) with dynamically built messages.
//!
//! ## How it works
//!
//! Every call builds an `ActionRequest` from the [`DescriptorBundle`], attaches the trace id
//! of the [`CallContext`] as `x-trace-id` and `traceparent` metadata, and sends it through
//! `tonic::client::Grpc` with a [`DynamicCodec`]. The `result` field of the decoded
//! `ActionReply` is returned to the caller.
//!
//! ## Failure model
//!
//! * Construction fails only when the schema cannot be loaded. The channel connects lazily,
//!   so an unreachable peer does not prevent startup and is reconnected in the background.
//! * Each call is bounded by [`DEFAULT_CALL_TIMEOUT`] (or the client's configured timeout)
//!   and by the deadline of its [`CallContext`], whichever comes first.
//! * Calls are never retried by the bridge.
use crate::BoxError;
use crate::codec::DynamicCodec;
use crate::context::CallContext;
use crate::interceptor::{CallLog, GRPC_CLIENT, status_label};
use crate::message::{self, FieldAccessError, RESULT_FIELD};
use crate::schema::{DescriptorBundle, SchemaError, SchemaLoader};
use crate::trace::{self, TRACE_ID_HEADER, TRACEPARENT_HEADER};
use http_body::Body as HttpBody;
use std::str::FromStr;
use std::time::Duration;
use tonic::{
    Code, Status,
    client::GrpcService,
    metadata::{MetadataValue, errors::InvalidMetadataValue},
    transport::{Channel, Endpoint},
};

/// Port assumed for bridge addresses that do not name one.
pub const DEFAULT_BRIDGE_PORT: u16 = 9090;

/// Upper bound of every bridge call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(1500);

pub const VALIDATE_USER: &str = "/bridge.v1.PeerBridge/ValidateUser";
pub const RESERVE_INVENTORY: &str = "/bridge.v1.PeerBridge/ReserveInventory";
pub const AUDIT_ORDER: &str = "/bridge.v1.PeerBridge/AuditOrder";
pub const PROCESS_PAYMENT: &str = "/bridge.v1.LocalBridge/ProcessPayment";
pub const QUERY_PAYMENT: &str = "/bridge.v1.LocalBridge/QueryPayment";
pub const ISSUE_REFUND: &str = "/bridge.v1.LocalBridge/IssueRefund";

/// Errors that can occur when creating a [`BridgeClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientConnectError {
    #[error("Bridge schema unavailable: '{0}'")]
    Schema(#[from] SchemaError),
    #[error("Invalid URL '{0}': {1}")]
    InvalidUrl(String, #[source] tonic::transport::Error),
}

/// Errors of a single bridge call. None of them is retried.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("Transport failure calling '{method}': '{source}'")]
    Transport { method: String, source: BoxError },
    #[error("Call to '{method}' timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },
    #[error("Peer rejected '{method}': '{status}'")]
    Rejected { method: String, status: Status },
    #[error("Invalid metadata (header) value for key '{key}': '{source}'")]
    InvalidMetadata {
        key: &'static str,
        source: InvalidMetadataValue,
    },
    #[error("Invalid method path '{0}'")]
    InvalidMethod(String),
    #[error(transparent)]
    Message(#[from] FieldAccessError),
}

impl CallError {
    /// Short label logged as `errorType`.
    pub fn kind(&self) -> &'static str {
        match self {
            CallError::Transport { .. } => "transport",
            CallError::Timeout { .. } => "timeout",
            CallError::Rejected { .. } => "grpc",
            CallError::InvalidMetadata { .. } | CallError::InvalidMethod(_) => "request",
            CallError::Message(_) => "field",
        }
    }
}

/// A dynamic client for one bridge peer.
#[derive(Debug, Clone)]
pub struct BridgeClient<S = Channel> {
    grpc: tonic::client::Grpc<S>,
    bundle: DescriptorBundle,
    remote_service: String,
    timeout: Duration,
}

impl BridgeClient<Channel> {
    /// Creates a client for the peer at `addr`.
    ///
    /// The schema is loaded first so a broken schema fails here rather than on the first
    /// call. The connection itself is established lazily.
    ///
    /// # Arguments
    ///
    /// * `loader` - The process schema loader.
    /// * `addr` - The peer address: `host`, `host:port` or a full `http://` URI.
    /// * `remote_service` - The peer's logical name, logged as `remoteService`.
    pub fn connect(
        loader: &SchemaLoader,
        addr: &str,
        remote_service: impl Into<String>,
    ) -> Result<Self, ClientConnectError> {
        let bundle = loader.load()?;

        let uri = normalize_addr(addr, DEFAULT_BRIDGE_PORT);
        let channel = Endpoint::new(uri.clone())
            .map_err(|e| ClientConnectError::InvalidUrl(uri, e))?
            .connect_lazy();

        Ok(Self::from_service(channel, bundle, remote_service))
    }
}

impl<S> BridgeClient<S>
where
    S: GrpcService<tonic::body::Body> + Clone,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    /// Creates a client from an existing Tonic service/channel.
    pub fn from_service(
        service: S,
        bundle: DescriptorBundle,
        remote_service: impl Into<String>,
    ) -> Self {
        Self {
            grpc: tonic::client::Grpc::new(service),
            bundle,
            remote_service: remote_service.into(),
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Overrides the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn remote_service(&self) -> &str {
        &self.remote_service
    }

    /// Invokes `method` (a full path such as `/bridge.v1.PeerBridge/ValidateUser`) and
    /// returns the `result` field of the reply.
    ///
    /// `trace_id` fills the request's `trace_id` field; the metadata always carries the
    /// trace id of `ctx`.
    pub async fn call(
        &self,
        ctx: &CallContext,
        trace_id: &str,
        method: &str,
        action: &str,
        payload: &str,
    ) -> Result<String, CallError> {
        let log = CallLog::new(GRPC_CLIENT, ctx.trace_id(), method, method)
            .with_remote_service(self.remote_service.clone());
        log.start();

        let result = self.invoke(ctx, trace_id, method, action, payload).await;

        log.done(status_label(&result));
        if let Err(err) = &result {
            log.error(err.kind(), err);
        }

        result
    }

    async fn invoke(
        &self,
        ctx: &CallContext,
        trace_id: &str,
        method: &str,
        action: &str,
        payload: &str,
    ) -> Result<String, CallError> {
        let path = http::uri::PathAndQuery::from_str(method)
            .map_err(|_| CallError::InvalidMethod(method.to_string()))?;

        let timeout = ctx.remaining(self.timeout);
        if timeout.is_zero() {
            return Err(CallError::Timeout {
                method: method.to_string(),
                timeout,
            });
        }

        let body = self.bundle.new_request(trace_id, action, payload)?;
        let request = build_request(body, ctx.trace_id(), timeout)?;
        let codec = DynamicCodec::client(
            self.bundle.request_descriptor().clone(),
            self.bundle.reply_descriptor().clone(),
        );

        let mut grpc = self.grpc.clone();
        let exchange = async move {
            grpc.ready().await.map_err(|e| CallError::Transport {
                method: method.to_string(),
                source: e.into(),
            })?;

            grpc.unary(request, path, codec)
                .await
                .map_err(|status| classify(method, timeout, status))
        };

        let reply = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| CallError::Timeout {
                method: method.to_string(),
                timeout,
            })??;

        Ok(message::get_field(reply.get_ref(), RESULT_FIELD))
    }

    pub async fn validate_user(
        &self,
        ctx: &CallContext,
        payload: &str,
    ) -> Result<String, CallError> {
        self.call(ctx, ctx.trace_id(), VALIDATE_USER, "VALIDATE", payload)
            .await
    }

    pub async fn reserve_inventory(
        &self,
        ctx: &CallContext,
        payload: &str,
    ) -> Result<String, CallError> {
        self.call(ctx, ctx.trace_id(), RESERVE_INVENTORY, "RESERVE", payload)
            .await
    }

    pub async fn audit_order(
        &self,
        ctx: &CallContext,
        payload: &str,
    ) -> Result<String, CallError> {
        self.call(ctx, ctx.trace_id(), AUDIT_ORDER, "AUDIT", payload)
            .await
    }

    pub async fn process_payment(
        &self,
        ctx: &CallContext,
        payload: &str,
    ) -> Result<String, CallError> {
        self.call(ctx, ctx.trace_id(), PROCESS_PAYMENT, "PAY", payload)
            .await
    }

    pub async fn query_payment(
        &self,
        ctx: &CallContext,
        payload: &str,
    ) -> Result<String, CallError> {
        self.call(ctx, ctx.trace_id(), QUERY_PAYMENT, "QUERY", payload)
            .await
    }

    pub async fn issue_refund(
        &self,
        ctx: &CallContext,
        payload: &str,
    ) -> Result<String, CallError> {
        self.call(ctx, ctx.trace_id(), ISSUE_REFUND, "REFUND", payload)
            .await
    }
}

fn build_request<T>(
    payload: T,
    trace_id: &str,
    timeout: Duration,
) -> Result<tonic::Request<T>, CallError> {
    let mut request = tonic::Request::new(payload);
    request.set_timeout(timeout);

    let raw = MetadataValue::from_str(trace_id).map_err(|source| CallError::InvalidMetadata {
        key: TRACE_ID_HEADER,
        source,
    })?;
    let traceparent =
        MetadataValue::from_str(&trace::format_traceparent(trace_id)).map_err(|source| {
            CallError::InvalidMetadata {
                key: TRACEPARENT_HEADER,
                source,
            }
        })?;

    request.metadata_mut().insert(TRACE_ID_HEADER, raw);
    request.metadata_mut().insert(TRACEPARENT_HEADER, traceparent);
    Ok(request)
}

fn classify(method: &str, timeout: Duration, status: Status) -> CallError {
    let method = method.to_string();
    match status.code() {
        Code::DeadlineExceeded => CallError::Timeout { method, timeout },
        Code::Unavailable => CallError::Transport {
            method,
            source: Box::new(status),
        },
        _ => CallError::Rejected { method, status },
    }
}

/// Turns a peer address into an endpoint URI.
///
/// A missing scheme becomes `http://` and a missing port becomes `default_port`.
pub fn normalize_addr(addr: &str, default_port: u16) -> String {
    let addr = addr.trim();
    let (scheme, authority) = match addr.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("http", addr),
    };

    let host = authority.trim_end_matches('/');
    let has_port = match host.rsplit_once(':') {
        Some((_, port)) => !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    };

    if has_port {
        format!("{scheme}://{host}")
    } else {
        format!("{scheme}://{host}:{default_port}")
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_addr() {
        assert_eq!(normalize_addr("peer", 9090), "http://peer:9090");
        assert_eq!(normalize_addr("peer:7000", 9090), "http://peer:7000");
        assert_eq!(normalize_addr("http://peer:7000", 9090), "http://peer:7000");
        assert_eq!(normalize_addr("https://peer", 443), "https://peer:443");
        assert_eq!(normalize_addr(" 10.0.0.5:9091/ ", 9090), "http://10.0.0.5:9091");
        assert_eq!(normalize_addr("[::1]", 9090), "http://[::1]:9090");
        assert_eq!(normalize_addr("[::1]:7000", 9090), "http://[::1]:7000");
    }

    #[test]
    fn test_build_request_sets_trace_metadata() {
        let id = "4bf92f3577b34da6a3ce929d0e0e4736";
        let request = build_request((), id, Duration::from_millis(500)).unwrap();

        assert_eq!(request.metadata().get(TRACE_ID_HEADER).unwrap(), id);
        assert_eq!(
            request.metadata().get(TRACEPARENT_HEADER).unwrap(),
            "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01"
        );
    }

    #[test]
    fn test_build_request_rejects_unprintable_trace_id() {
        let result = build_request((), "bad\nid", Duration::from_millis(500));
        assert!(matches!(
            result,
            Err(CallError::InvalidMetadata { key, .. }) if key == TRACE_ID_HEADER
        ));
    }

    #[test]
    fn test_status_classification() {
        let timeout = Duration::from_millis(10);
        assert!(matches!(
            classify("/m", timeout, Status::deadline_exceeded("late")),
            CallError::Timeout { .. }
        ));
        assert!(matches!(
            classify("/m", timeout, Status::unavailable("down")),
            CallError::Transport { .. }
        ));
        assert!(matches!(
            classify("/m", timeout, Status::internal("internal error")),
            CallError::Rejected { status, .. } if status.code() == Code::Internal
        ));
    }
}
