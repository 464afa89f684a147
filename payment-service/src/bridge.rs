//! The gRPC bridge methods this service answers for its peer.
use std::future::{Ready, ready};

use tracebridge_core::client::{ISSUE_REFUND, PROCESS_PAYMENT, QUERY_PAYMENT};
use tracebridge_core::message::{TRACE_ID_FIELD, get_field};
use tracebridge_core::prost_reflect::DynamicMessage;
use tracebridge_core::server::{BridgeServer, ServerError};
use tracebridge_core::tonic::Status;
use tracebridge_core::{CallContext, DescriptorBundle};

const SOURCE: &str = "PaymentBridge";

#[derive(Debug, Clone, Copy)]
struct Operation {
    method: &'static str,
    category: &'static str,
    result: &'static str,
    steps: usize,
    warn: bool,
}

const PROCESS: Operation = Operation {
    method: "ProcessPayment",
    category: "grpc.local.process_payment",
    result: "PAY_OK",
    steps: 5,
    warn: false,
};

const QUERY: Operation = Operation {
    method: "QueryPayment",
    category: "grpc.local.query_payment",
    result: "PAYMENT_FOUND",
    steps: 0,
    warn: false,
};

const REFUND: Operation = Operation {
    method: "IssueRefund",
    category: "grpc.local.issue_refund",
    result: "REFUND_OK",
    steps: 0,
    warn: true,
};

/// The bridge server with `ProcessPayment`, `QueryPayment` and `IssueRefund` registered.
pub fn server(bundle: DescriptorBundle) -> Result<BridgeServer, ServerError> {
    BridgeServer::builder(bundle.clone())
        .unary(PROCESS_PAYMENT, handler(bundle.clone(), PROCESS))
        .unary(QUERY_PAYMENT, handler(bundle.clone(), QUERY))
        .unary(ISSUE_REFUND, handler(bundle, REFUND))
        .build()
}

/// Replies with the operation's fixed result, echoing the request's `trace_id` field.
fn handler(
    bundle: DescriptorBundle,
    op: Operation,
) -> impl Fn(CallContext, DynamicMessage) -> Ready<Result<DynamicMessage, Status>> + Send + Sync + 'static
{
    move |ctx, request| {
        op.log(&ctx);

        let reply = bundle
            .new_reply(&get_field(&request, TRACE_ID_FIELD), op.result)
            .map_err(|e| {
                tracing::error!(
                    source = SOURCE,
                    category = op.category,
                    traceId = %ctx.trace_id(),
                    errorType = "field",
                    errorMessage = %e,
                    "reply could not be built"
                );
                Status::internal("internal error")
            });

        ready(reply)
    }
}

impl Operation {
    fn log(&self, ctx: &CallContext) {
        if self.warn {
            tracing::warn!(
                source = SOURCE,
                category = self.category,
                traceId = %ctx.trace_id(),
                protocol = "grpc",
                direction = "inbound",
                method = self.method,
                path = self.method,
                "{}",
                self.method
            );
        } else {
            tracing::info!(
                source = SOURCE,
                category = self.category,
                traceId = %ctx.trace_id(),
                protocol = "grpc",
                direction = "inbound",
                method = self.method,
                path = self.method,
                "{}",
                self.method
            );
        }

        for _ in 0..self.steps {
            tracing::info!(
                source = SOURCE,
                category = "payment.step",
                traceId = %ctx.trace_id(),
                protocol = "grpc",
                direction = "inbound",
                method = self.method,
                path = self.method,
                "payment step"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracebridge_core::SchemaLoader;
    use tracebridge_core::client::{BridgeClient, CallError};
    use tracebridge_core::tonic::Code;

    const TRACE_ID: &str = "0af7651916cd43dd8448eb211c80319c";

    fn local_client() -> BridgeClient<axum::Router> {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../proto/bridge/v1/bridge.binpb");
        let bundle = SchemaLoader::new(path).load().unwrap();

        let router = server(bundle.clone()).unwrap().into_router();
        BridgeClient::from_service(router, bundle, "payment-service")
    }

    #[test]
    fn test_registers_local_methods() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../proto/bridge/v1/bridge.binpb");
        let bundle = SchemaLoader::new(path).load().unwrap();

        let server = server(bundle).unwrap();

        assert_eq!(
            server.methods(),
            [ISSUE_REFUND, PROCESS_PAYMENT, QUERY_PAYMENT]
        );
    }

    #[tokio::test]
    async fn test_local_bridge_results() {
        let client = local_client();
        let ctx = CallContext::new(TRACE_ID);

        assert_eq!(client.process_payment(&ctx, "p").await.unwrap(), "PAY_OK");
        assert_eq!(client.query_payment(&ctx, "q").await.unwrap(), "PAYMENT_FOUND");
        assert_eq!(client.issue_refund(&ctx, "r").await.unwrap(), "REFUND_OK");
    }

    #[tokio::test]
    async fn test_peer_methods_are_not_served() {
        let client = local_client();
        let ctx = CallContext::new(TRACE_ID);

        let err = client.validate_user(&ctx, "u").await.unwrap_err();
        assert!(matches!(
            err,
            CallError::Rejected { status, .. } if status.code() == Code::Unimplemented
        ));
    }

    #[test]
    fn test_reply_echoes_request_trace_id() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../proto/bridge/v1/bridge.binpb");
        let bundle = SchemaLoader::new(path).load().unwrap();
        let request = bundle.new_request("body-id", "PAY", "p").unwrap();

        let reply = handler(bundle, PROCESS)(CallContext::new(TRACE_ID), request)
            .into_inner()
            .unwrap();

        assert_eq!(get_field(&reply, TRACE_ID_FIELD), "body-id");
        assert_eq!(get_field(&reply, "code"), "0");
        assert_eq!(get_field(&reply, "result"), "PAY_OK");
    }
}
