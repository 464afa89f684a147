//! # Boundary Interceptors
//!
//! Every protocol boundary (inbound gRPC, outbound gRPC, inbound HTTP) follows the same
//! contract:
//!
//! * **Entry**: the trace id is resolved and a `start` record is logged.
//! * **Exit**: a `done` record with the status and the elapsed milliseconds is always
//!   logged. Panics are recovered first and logged as a `panic` record.
//! * **Outbound**: the trace id travels in the `x-trace-id` and `traceparent` metadata.
//!
//! [`CallLog`] emits those records for one call. [`intercept_unary`] is the inbound gRPC
//! interceptor used by [`crate::server`]; the outbound and HTTP boundaries live in
//! [`crate::client`] and [`crate::http`].
use crate::context::CallContext;
use crate::recover::{self, Recovered};
use crate::trace::{self, TRACE_ID_HEADER, TRACEPARENT_HEADER};
use prost_reflect::DynamicMessage;
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};
use tonic::{Status, metadata::MetadataMap};

const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Longest `grpc-timeout` amount the gRPC wire format allows.
const GRPC_TIMEOUT_MAX_DIGITS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Grpc,
    Http,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Grpc => "grpc",
            Protocol::Http => "http",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Where a record comes from: the emitting component, its protocol and the call direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
    pub source: &'static str,
    pub protocol: Protocol,
    pub direction: Direction,
}

pub const GRPC_SERVER: Boundary = Boundary {
    source: "BridgeServer",
    protocol: Protocol::Grpc,
    direction: Direction::Inbound,
};

pub const GRPC_CLIENT: Boundary = Boundary {
    source: "BridgeClient",
    protocol: Protocol::Grpc,
    direction: Direction::Outbound,
};

pub const HTTP_SERVER: Boundary = Boundary {
    source: "HttpAccessLog",
    protocol: Protocol::Http,
    direction: Direction::Inbound,
};

pub const HTTP_CLIENT: Boundary = Boundary {
    source: "PeerHttpClient",
    protocol: Protocol::Http,
    direction: Direction::Outbound,
};

/// Structured records of a single call across one boundary.
#[derive(Debug)]
pub struct CallLog {
    boundary: Boundary,
    trace_id: String,
    method: String,
    path: String,
    remote_service: String,
    peer: Option<String>,
    bytes: Option<u64>,
    started: Instant,
}

impl CallLog {
    pub fn new(
        boundary: Boundary,
        trace_id: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            boundary,
            trace_id: trace_id.into(),
            method: method.into(),
            path: path.into(),
            remote_service: String::new(),
            peer: None,
            bytes: None,
            started: Instant::now(),
        }
    }

    /// Names the peer of an outbound call.
    pub fn with_remote_service(mut self, remote_service: impl Into<String>) -> Self {
        self.remote_service = remote_service.into();
        self
    }

    /// Records the caller's address on inbound calls.
    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = Some(peer.into());
        self
    }

    /// Size of the response body, reported by the `done` record when known.
    pub fn set_response_bytes(&mut self, bytes: Option<u64>) {
        self.bytes = bytes;
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn cost_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }

    fn category(&self, event: &str) -> String {
        format!(
            "{}.{}.{}",
            self.boundary.protocol.as_str(),
            self.boundary.direction.as_str(),
            event
        )
    }

    pub fn start(&self) {
        let protocol = self.boundary.protocol.as_str();
        tracing::info!(
            source = self.boundary.source,
            category = %self.category("start"),
            traceId = %self.trace_id,
            protocol,
            direction = self.boundary.direction.as_str(),
            method = %self.method,
            path = %self.path,
            remoteService = %self.remote_service,
            peer = self.peer.as_deref(),
            "{protocol} {} start",
            self.boundary.direction.as_str()
        );
    }

    pub fn done(&self, status: impl Display) {
        let protocol = self.boundary.protocol.as_str();
        tracing::info!(
            source = self.boundary.source,
            category = %self.category("done"),
            traceId = %self.trace_id,
            protocol,
            direction = self.boundary.direction.as_str(),
            method = %self.method,
            path = %self.path,
            remoteService = %self.remote_service,
            peer = self.peer.as_deref(),
            status = %status,
            costMs = self.cost_ms() as u64,
            bytes = self.bytes,
            "{protocol} {} done",
            self.boundary.direction.as_str()
        );
    }

    pub fn error(&self, error_type: &str, error_message: impl Display) {
        let protocol = self.boundary.protocol.as_str();
        tracing::error!(
            source = self.boundary.source,
            category = %self.category("error"),
            traceId = %self.trace_id,
            protocol,
            direction = self.boundary.direction.as_str(),
            method = %self.method,
            path = %self.path,
            remoteService = %self.remote_service,
            status = "ERR",
            costMs = self.cost_ms() as u64,
            errorType = error_type,
            errorMessage = %error_message,
            "{protocol} {} error",
            self.boundary.direction.as_str()
        );
    }

    pub fn panic(&self, status: impl Display, recovered: &Recovered) {
        let protocol = self.boundary.protocol.as_str();
        tracing::error!(
            source = self.boundary.source,
            category = %format!("{protocol}.panic"),
            traceId = %self.trace_id,
            protocol,
            direction = self.boundary.direction.as_str(),
            method = %self.method,
            path = %self.path,
            status = %status,
            errorType = "panic",
            errorMessage = %recovered.message,
            errorStack = %recovered.stack,
            "panic recovered"
        );
    }
}

/// Maps a call outcome to the `status` field of `done` records.
pub fn status_label<T, E>(result: &Result<T, E>) -> &'static str {
    match result {
        Ok(_) => "OK",
        Err(_) => "ERR",
    }
}

/// Resolves the trace id of an inbound gRPC call from its metadata.
pub fn trace_id_from_metadata(metadata: &MetadataMap) -> String {
    let get = |key: &str| {
        metadata
            .get(key)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    };

    trace::extract_or_create(get(TRACE_ID_HEADER), get(TRACEPARENT_HEADER))
}

/// Reads the caller's `grpc-timeout` (e.g. `1500m`, `2S`), if any.
///
/// Amounts of more than eight digits are malformed and ignored.
pub fn timeout_from_metadata(metadata: &MetadataMap) -> Option<Duration> {
    let value = metadata.get(GRPC_TIMEOUT_HEADER)?.to_str().ok()?;
    if value.len() < 2 {
        return None;
    }

    let (amount, unit) = value.split_at(value.len() - 1);
    if amount.len() > GRPC_TIMEOUT_MAX_DIGITS || !amount.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = amount.parse().ok()?;
    let timeout = match unit {
        "H" => Duration::from_secs(amount.checked_mul(3600)?),
        "M" => Duration::from_secs(amount.checked_mul(60)?),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };

    Some(timeout)
}

/// Inbound gRPC interceptor.
///
/// Resolves the trace id, logs `start`, runs `handler` with a [`CallContext`] carrying the
/// trace id and the caller's deadline, recovers a panic into `Status::internal("internal error")`, and logs `done`.
pub async fn intercept_unary<H, F>(
    metadata: &MetadataMap,
    full_method: &str,
    request: DynamicMessage,
    handler: H,
) -> Result<DynamicMessage, Status>
where
    H: FnOnce(CallContext, DynamicMessage) -> F,
    F: Future<Output = Result<DynamicMessage, Status>>,
{
    let trace_id = trace_id_from_metadata(metadata);
    let log = CallLog::new(GRPC_SERVER, trace_id.clone(), full_method, full_method);
    log.start();

    if tracing::enabled!(tracing::Level::DEBUG) {
        let body = serde_json::to_string(&request).unwrap_or_default();
        tracing::debug!(
            source = GRPC_SERVER.source,
            category = "grpc.inbound.request",
            traceId = %trace_id,
            method = full_method,
            request = %body,
            "grpc request decoded"
        );
    }

    let mut ctx = CallContext::new(trace_id);
    if let Some(timeout) = timeout_from_metadata(metadata) {
        ctx = ctx.with_timeout(timeout);
    }

    let result = match recover::catch_panic(async move { handler(ctx, request).await }).await {
        Ok(result) => result,
        Err(recovered) => {
            log.panic("ERR", &recovered);
            Err(Status::internal("internal error"))
        }
    };

    log.done(status_label(&result));
    result
}
