use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::oneshot;
use tracebridge_core::client::{self, BridgeClient, CallError};
use tracebridge_core::message::{PAYLOAD_FIELD, get_field};
use tracebridge_core::server::BridgeServer;
use tracebridge_core::tonic::Status;
use tracebridge_core::{CallContext, SchemaLoader};

fn schema_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../proto/bridge/v1/bridge.binpb")
}

/// Serves `ValidateUser` on an ephemeral local port until the returned sender is dropped.
async fn spawn_peer(loader: &SchemaLoader) -> (SocketAddr, oneshot::Sender<()>) {
    let bundle = loader.load().expect("Failed to load bridge schema");
    let replies = bundle.clone();

    let server = BridgeServer::builder(bundle)
        .unary(client::VALIDATE_USER, move |ctx: CallContext, req| {
            let result = format!("PAY_OK:{}", get_field(&req, PAYLOAD_FIELD));
            let reply = replies.new_reply(ctx.trace_id(), &result);
            async move { reply.map_err(|e| Status::internal(e.to_string())) }
        })
        .build()
        .expect("Failed to build the method table");

    let (server, listener) = server
        .start_on(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().unwrap();

    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(server.serve(listener, async move {
        let _ = rx.await;
    }));

    (addr, tx)
}

#[tokio::test]
async fn test_validate_user_over_tcp() {
    let loader = SchemaLoader::new(schema_path());
    let (addr, _shutdown) = spawn_peer(&loader).await;

    let client = BridgeClient::connect(&loader, &addr.to_string(), "java-service").unwrap();
    let ctx = CallContext::new("0af7651916cd43dd8448eb211c80319c");

    let result = client.validate_user(&ctx, "u-42").await.unwrap();

    assert_eq!(result, "PAY_OK:u-42");
}

#[tokio::test]
async fn test_concurrent_calls_share_one_channel() {
    let loader = SchemaLoader::new(schema_path());
    let (addr, _shutdown) = spawn_peer(&loader).await;

    let client = BridgeClient::connect(&loader, &format!("http://{addr}"), "java-service").unwrap();

    let calls = (0..16).map(|i| {
        let client = client.clone();
        tokio::spawn(async move {
            let ctx = CallContext::background();
            client.validate_user(&ctx, &format!("u-{i}")).await
        })
    });

    for (i, call) in calls.collect::<Vec<_>>().into_iter().enumerate() {
        assert_eq!(call.await.unwrap().unwrap(), format!("PAY_OK:u-{i}"));
    }
}

#[tokio::test]
async fn test_unreachable_peer_fails_the_call_not_the_client() {
    let loader = SchemaLoader::new(schema_path());

    // Nothing listens on port 1.
    let client = BridgeClient::connect(&loader, "127.0.0.1:1", "java-service")
        .unwrap()
        .with_timeout(Duration::from_millis(500));
    let ctx = CallContext::background();

    let err = client.validate_user(&ctx, "u-1").await.unwrap_err();

    assert!(
        matches!(err, CallError::Transport { .. } | CallError::Timeout { .. }),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn test_missing_schema_fails_client_construction() {
    let loader = SchemaLoader::new("/nonexistent/bridge.binpb");

    let result = BridgeClient::connect(&loader, "127.0.0.1:9090", "java-service");

    assert!(matches!(
        result,
        Err(client::ClientConnectError::Schema(_))
    ));
}

#[tokio::test]
async fn test_shutdown_stops_serving() {
    let loader = SchemaLoader::new(schema_path());
    let bundle = loader.load().unwrap();

    let (server, listener) = BridgeServer::builder(bundle)
        .build()
        .unwrap()
        .start_on(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();

    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.serve(listener, async move {
        let _ = rx.await;
    }));

    tx.send(()).unwrap();
    let served = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server did not shut down")
        .unwrap();
    assert!(served.is_ok());
}
