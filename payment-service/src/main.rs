//! # Payment Service Entry Point
//!
//! 1. **Configuration**: flags and environment variables via [`config::Config`].
//! 2. **Schema**: the bridge descriptor set is loaded before anything listens; a broken
//!    schema aborts startup.
//! 3. **Peers**: a lazily connected bridge client and an HTTP client for the peer service.
//! 4. **Serving**: the HTTP API and the gRPC bridge run side by side until Ctrl+C or
//!    SIGTERM, then both drain and stop.

mod bridge;
mod config;
mod handlers;
mod logging;
mod peer_http;

use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracebridge_core::SchemaLoader;
use tracebridge_core::client::BridgeClient;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::handlers::AppState;
use crate::peer_http::PeerHttpClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    logging::init();

    if let Err(e) = run(config).await {
        error!(
            source = "main",
            category = "startup.error",
            errorMessage = %format!("{e:#}"),
            "payment-service failed"
        );
        return Err(e);
    }

    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!(
        source = "main",
        category = "startup",
        env = %config.env,
        version = %config.app_version,
        "payment-service starting"
    );

    let loader = SchemaLoader::new(&config.descriptor_set);
    let bundle = loader
        .load()
        .with_context(|| format!("loading {}", config.descriptor_set.display()))?;

    let bridge = BridgeClient::connect(&loader, &config.peer_grpc_addr, &config.peer_service_name)
        .context("creating the peer bridge client")?;
    let peer_http = PeerHttpClient::new(&config.peer_http_base_url, &config.peer_service_name)
        .context("creating the peer HTTP client")?;

    let app = handlers::router(AppState { bridge, peer_http });

    let http_addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let http_listener = TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("binding the HTTP API on {http_addr}"))?;
    let (grpc_server, grpc_listener) = bridge::server(bundle)
        .context("building the gRPC bridge")?
        .start(config.grpc_port)
        .await
        .context("binding the gRPC bridge")?;

    let cancel = CancellationToken::new();

    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!(
            source = "main",
            category = "shutdown",
            "shutdown signal received"
        );
        cancel_on_signal.cancel();
    });

    let grpc = tokio::spawn(grpc_server.serve(grpc_listener, cancel.clone().cancelled_owned()));

    info!(
        source = "main",
        category = "startup",
        protocol = "http",
        direction = "inbound",
        method = "listen",
        path = %http_addr,
        "http server start"
    );
    let http_result = axum::serve(
        http_listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(cancel.clone().cancelled_owned())
    .await;

    // The HTTP API may stop on its own; the bridge must not outlive it.
    cancel.cancel();
    let grpc_result = grpc.await.context("gRPC bridge task")?;

    http_result.context("HTTP API")?;
    grpc_result.context("gRPC bridge")?;

    info!(
        source = "main",
        category = "shutdown.done",
        "shutdown complete"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
