//! # Trace Identity
//!
//! Every logical call chain carries one trace id: 32 lowercase hexadecimal characters.
//! It is resolved once at each inbound boundary with [`extract_or_create`] and copied
//! verbatim into outbound metadata and headers, both as a raw `x-trace-id` value and
//! wrapped in a W3C `traceparent`.
use uuid::Uuid;

/// Metadata key (gRPC) and header name (HTTP) carrying the raw trace id.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// W3C trace context header: `00-<trace id>-<parent id>-<flags>`.
pub const TRACEPARENT_HEADER: &str = "traceparent";

const TRACE_ID_LEN: usize = 32;

/// Resolves the trace id of an inbound call.
///
/// 1. A non-blank `explicit_id` always wins and is returned trimmed.
/// 2. Otherwise the trace id segment of a valid `traceparent` is returned.
/// 3. Otherwise a fresh random id is generated.
pub fn extract_or_create(explicit_id: &str, traceparent: &str) -> String {
    let explicit_id = explicit_id.trim();
    if !explicit_id.is_empty() {
        return explicit_id.to_string();
    }

    match parse_traceparent(traceparent) {
        Some(trace_id) => trace_id.to_string(),
        None => generate(),
    }
}

/// Returns the trace id segment of a `traceparent` value, if it is well formed.
///
/// The value must have exactly four dash-separated parts and the second one must be
/// 32 characters of `[0-9a-f]`, not all of them zero.
pub fn parse_traceparent(traceparent: &str) -> Option<&str> {
    let traceparent = traceparent.trim();
    if traceparent.is_empty() {
        return None;
    }

    let parts: Vec<&str> = traceparent.split('-').collect();
    if parts.len() != 4 {
        return None;
    }

    let trace_id = parts[1];
    let well_formed = trace_id.len() == TRACE_ID_LEN
        && trace_id
            .bytes()
            .all(|c| c.is_ascii_digit() || (b'a'..=b'f').contains(&c));

    if !well_formed || trace_id.bytes().all(|c| c == b'0') {
        return None;
    }

    Some(trace_id)
}

/// Wraps a trace id in a sampled `traceparent` with an empty parent span.
pub fn format_traceparent(trace_id: &str) -> String {
    format!("00-{trace_id}-0000000000000000-01")
}

/// Generates a random 128-bit trace id rendered as 32 lowercase hex characters.
pub fn generate() -> String {
    Uuid::new_v4().simple().to_string()
}
