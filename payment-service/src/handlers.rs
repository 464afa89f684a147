//! # HTTP API
//!
//! `/api/payment/{pay,refund,query}` accept `GET` and `POST`. Each logs `n` step records
//! (query parameter, `1..=2000`, default `10`), forwards one HTTP call and one bridge call
//! to the peer, and answers `OK`.
//!
//! Only the peer HTTP call of `pay` is required: when it fails the answer is
//! `502 bad gateway`. Every other peer failure is logged and ignored.
use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Router};
use serde::Deserialize;
use tracebridge_core::CallContext;
use tracebridge_core::client::BridgeClient;
use tracebridge_core::http::HttpBoundaryLayer;

use crate::peer_http::PeerHttpClient;

const DEFAULT_STEPS: usize = 10;
const MAX_STEPS: usize = 2000;

/// Payload sent with every bridge call issued from the HTTP API.
const BRIDGE_PAYLOAD: &str = "payment_http";

#[derive(Debug, Clone)]
pub struct AppState {
    pub bridge: BridgeClient,
    pub peer_http: PeerHttpClient,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/payment/pay", get(pay).post(pay))
        .route("/api/payment/refund", get(refund).post(refund))
        .route("/api/payment/query", get(query).post(query))
        .with_state(state)
        .layer(HttpBoundaryLayer::new())
}

#[derive(Debug, Default, Deserialize)]
pub struct StepsQuery {
    n: Option<String>,
}

impl StepsQuery {
    /// The requested step count, falling back to the default when absent or out of range.
    fn steps(&self) -> usize {
        self.n
            .as_deref()
            .and_then(|n| n.trim().parse::<usize>().ok())
            .filter(|n| (1..=MAX_STEPS).contains(n))
            .unwrap_or(DEFAULT_STEPS)
    }
}

#[derive(Debug)]
pub struct BadGateway;

impl IntoResponse for BadGateway {
    fn into_response(self) -> Response {
        (StatusCode::BAD_GATEWAY, "bad gateway").into_response()
    }
}

/// Request coordinates shared by the records of one handler.
struct Records<'a> {
    source: &'static str,
    category: &'static str,
    ctx: &'a CallContext,
    method: &'a Method,
    path: &'a str,
    started: Instant,
    warn: bool,
}

impl<'a> Records<'a> {
    fn new(
        source: &'static str,
        category: &'static str,
        ctx: &'a CallContext,
        method: &'a Method,
        uri: &'a Uri,
    ) -> Self {
        Self {
            source,
            category,
            ctx,
            method,
            path: uri.path(),
            started: Instant::now(),
            warn: false,
        }
    }

    /// Logs the received record at `WARN`.
    fn warning(mut self) -> Self {
        self.warn = true;
        self
    }

    fn received(&self, message: &str) {
        if self.warn {
            tracing::warn!(
                source = self.source,
                category = self.category,
                traceId = %self.ctx.trace_id(),
                protocol = "http",
                direction = "inbound",
                method = %self.method,
                path = self.path,
                "{message}"
            );
            return;
        }

        tracing::info!(
            source = self.source,
            category = self.category,
            traceId = %self.ctx.trace_id(),
            protocol = "http",
            direction = "inbound",
            method = %self.method,
            path = self.path,
            "{message}"
        );
    }

    fn steps(&self, count: usize, message: &str) {
        let category = format!("{}.step", self.category);
        for _ in 0..count {
            tracing::info!(
                source = self.source,
                category = %category,
                traceId = %self.ctx.trace_id(),
                protocol = "http",
                direction = "inbound",
                method = %self.method,
                path = self.path,
                "{message}"
            );
        }
    }

    fn remote_error(&self, protocol: &str, remote_path: &str, error: &dyn std::fmt::Display) {
        tracing::error!(
            source = self.source,
            category = %format!("remote.{protocol}.error"),
            traceId = %self.ctx.trace_id(),
            protocol,
            direction = "outbound",
            path = remote_path,
            errorType = protocol,
            errorMessage = %error,
            "peer {protocol} call failed"
        );
    }

    fn done(&self, message: &str) {
        tracing::info!(
            source = self.source,
            category = %format!("{}.done", self.category),
            traceId = %self.ctx.trace_id(),
            protocol = "http",
            direction = "inbound",
            method = %self.method,
            path = self.path,
            costMs = self.started.elapsed().as_millis() as u64,
            "{message}"
        );
    }
}

async fn pay(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallContext>,
    method: Method,
    uri: Uri,
    Query(params): Query<StepsQuery>,
) -> Result<&'static str, BadGateway> {
    let records = Records::new("PayHandler", "payment.pay", &ctx, &method, &uri);
    records.received("pay request received");
    records.steps(params.steps(), "step processing");

    let user_path = "/api/user/get?n=5";
    if let Err(e) = state.peer_http.send(&ctx, Method::GET, user_path).await {
        records.remote_error("http", user_path, &e);
        return Err(BadGateway);
    }

    if let Err(e) = state.bridge.validate_user(&ctx, BRIDGE_PAYLOAD).await {
        records.remote_error("grpc", "ValidateUser", &e);
    }

    records.done("pay done");
    Ok("OK")
}

async fn refund(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallContext>,
    method: Method,
    uri: Uri,
    Query(params): Query<StepsQuery>,
) -> &'static str {
    let records =
        Records::new("RefundHandler", "payment.refund", &ctx, &method, &uri).warning();
    records.received("refund request received");
    records.steps(params.steps(), "refund step");

    let inventory_path = "/api/inventory/reserve?n=5";
    if let Err(e) = state.peer_http.send(&ctx, Method::POST, inventory_path).await {
        records.remote_error("http", inventory_path, &e);
    }
    if let Err(e) = state.bridge.reserve_inventory(&ctx, BRIDGE_PAYLOAD).await {
        records.remote_error("grpc", "ReserveInventory", &e);
    }

    records.done("refund done");
    "OK"
}

async fn query(
    State(state): State<AppState>,
    Extension(ctx): Extension<CallContext>,
    method: Method,
    uri: Uri,
    Query(params): Query<StepsQuery>,
) -> &'static str {
    let records = Records::new("QueryHandler", "payment.query", &ctx, &method, &uri);
    records.received("query request received");
    records.steps(params.steps(), "query step");

    let order_path = "/api/order/create?n=5";
    if let Err(e) = state.peer_http.send(&ctx, Method::POST, order_path).await {
        records.remote_error("http", order_path, &e);
    }
    if let Err(e) = state.bridge.audit_order(&ctx, BRIDGE_PAYLOAD).await {
        records.remote_error("grpc", "AuditOrder", &e);
    }

    records.done("query done");
    "OK"
}


#[cfg(test)]
mod tests {
    use super::*;

    fn steps(n: Option<&str>) -> usize {
        StepsQuery {
            n: n.map(str::to_string),
        }
        .steps()
    }

    #[test]
    fn test_steps_parameter() {
        assert_eq!(steps(None), 10);
        assert_eq!(steps(Some("3")), 3);
        assert_eq!(steps(Some("2000")), 2000);
        assert_eq!(steps(Some("2001")), 10);
        assert_eq!(steps(Some("0")), 10);
        assert_eq!(steps(Some("-4")), 10);
        assert_eq!(steps(Some("many")), 10);
    }
}
