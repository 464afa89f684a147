//! # Bridge Server
//!
//! A gRPC server whose method table is built by hand instead of generated from the schema.
//!
//! ## How it works
//!
//! [`BridgeServerBuilder::unary`] registers a handler under a full method path such as
//! `/bridge.v1.LocalBridge/ProcessPayment`. Each entry becomes a raw route whose dispatch:
//!
//! 1. decodes the body into an empty `ActionRequest` with the [`DynamicCodec`],
//! 2. runs the inbound interceptor ([`interceptor::intercept_unary`]) around the handler,
//! 3. encodes the `ActionReply` the handler returned.
//!
//! A method path must have the form `/<package.Service>/<Method>` with identifier
//! characters only; [`BridgeServerBuilder::build`] rejects anything else.
//!
//! Paths without an entry answer `UNIMPLEMENTED`. Handlers only agree with the schema on
//! field names; they read the request with [`crate::message::get_field`] and build replies
//! with [`DescriptorBundle::new_reply`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use tracebridge_core::{CallContext, SchemaLoader, server::BridgeServer};
//! use tracebridge_core::tonic::Status;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let bundle = SchemaLoader::from_env().load()?;
//! let replies = bundle.clone();
//!
//! let server = BridgeServer::builder(bundle)
//!     .unary("/bridge.v1.LocalBridge/ProcessPayment", move |ctx: CallContext, _req| {
//!         let reply = replies.new_reply(ctx.trace_id(), "PAY_OK");
//!         async move { reply.map_err(|e| Status::internal(e.to_string())) }
//!     })
//!     .build()?;
//!
//! let (server, listener) = server.start(9091).await?;
//! server.serve(listener, std::future::pending()).await?;
//! # Ok(())
//! # }
//! ```
use crate::codec::DynamicCodec;
use crate::context::CallContext;
use crate::interceptor;
use crate::schema::DescriptorBundle;
use axum::Router;
use futures_util::future::BoxFuture;
use prost_reflect::DynamicMessage;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::TcpListener;
use tonic::Status;
use tower::Service;

type Handler = Arc<
    dyn Fn(CallContext, DynamicMessage) -> BoxFuture<'static, Result<DynamicMessage, Status>>
        + Send
        + Sync,
>;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind '{addr}': '{source}'")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("Invalid method path '{0}', expected '/<package.Service>/<Method>'")]
    InvalidMethod(String),
    #[error("gRPC server failed: '{0}'")]
    Serve(#[source] std::io::Error),
}

pub struct BridgeServerBuilder {
    bundle: DescriptorBundle,
    methods: BTreeMap<String, Handler>,
}

impl BridgeServerBuilder {
    /// Registers `handler` under the full method path `method`.
    ///
    /// Registering the same path twice keeps the last handler.
    pub fn unary<H, F>(mut self, method: impl Into<String>, handler: H) -> Self
    where
        H: Fn(CallContext, DynamicMessage) -> F + Send + Sync + 'static,
        F: Future<Output = Result<DynamicMessage, Status>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |ctx, request| Box::pin(handler(ctx, request)));
        self.methods.insert(method.into(), handler);
        self
    }

    /// Builds the method table, failing on the first malformed method path.
    pub fn build(self) -> Result<BridgeServer, ServerError> {
        if let Some(invalid) = self.methods.keys().find(|m| !is_method_path(m)) {
            return Err(ServerError::InvalidMethod(invalid.clone()));
        }

        let methods: Vec<String> = self.methods.keys().cloned().collect();

        let router = self
            .methods
            .into_iter()
            .fold(Router::new(), |router, (method, handler)| {
                let service = MethodService {
                    full_method: Arc::from(method.as_str()),
                    bundle: self.bundle.clone(),
                    handler,
                };
                router.route_service(&method, service)
            })
            .fallback(|| async { unimplemented_response() });

        Ok(BridgeServer { router, methods })
    }
}

/// Whether `method` is `/<service>/<method>` with two non-empty identifier segments.
fn is_method_path(method: &str) -> bool {
    let identifier = |segment: &str| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    };

    method
        .strip_prefix('/')
        .and_then(|rest| rest.split_once('/'))
        .is_some_and(|(service, name)| identifier(service) && identifier(name))
}

/// A built method table, ready to be served.
#[derive(Debug, Clone)]
pub struct BridgeServer {
    router: Router,
    methods: Vec<String>,
}

impl BridgeServer {
    pub fn builder(bundle: DescriptorBundle) -> BridgeServerBuilder {
        BridgeServerBuilder {
            bundle,
            methods: BTreeMap::new(),
        }
    }

    /// The registered full method paths, sorted.
    pub fn methods(&self) -> &[String] {
        &self.methods
    }

    /// The method table as a service, usable in-process as a `BridgeClient` transport.
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Binds all interfaces on `port`.
    pub async fn start(self, port: u16) -> Result<(Self, TcpListener), ServerError> {
        self.start_on(SocketAddr::from(([0, 0, 0, 0], port))).await
    }

    pub async fn start_on(self, addr: SocketAddr) -> Result<(Self, TcpListener), ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        Ok((self, listener))
    }

    /// Serves the method table on `listener` until `shutdown` completes.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local = listener
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default();

        tracing::info!(
            source = "BridgeServer",
            category = "startup",
            protocol = "grpc",
            direction = "inbound",
            method = "listen",
            path = %local,
            methods = ?self.methods,
            "grpc server start"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(ServerError::Serve)
    }
}

/// One entry of the method table.
#[derive(Clone)]
struct MethodService {
    full_method: Arc<str>,
    bundle: DescriptorBundle,
    handler: Handler,
}

impl Service<axum::extract::Request> for MethodService {
    type Response = http::Response<tonic::body::Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: axum::extract::Request) -> Self::Future {
        let codec = DynamicCodec::server(
            self.bundle.request_descriptor().clone(),
            self.bundle.reply_descriptor().clone(),
        );
        let method = InterceptedUnary {
            full_method: self.full_method.clone(),
            handler: self.handler.clone(),
        };

        Box::pin(async move {
            let mut grpc = tonic::server::Grpc::new(codec);
            Ok(grpc.unary(method, req).await)
        })
    }
}

struct InterceptedUnary {
    full_method: Arc<str>,
    handler: Handler,
}

impl tonic::server::UnaryService<DynamicMessage> for InterceptedUnary {
    type Response = DynamicMessage;
    type Future = BoxFuture<'static, Result<tonic::Response<DynamicMessage>, Status>>;

    fn call(&mut self, request: tonic::Request<DynamicMessage>) -> Self::Future {
        let full_method = self.full_method.clone();
        let handler = self.handler.clone();

        Box::pin(async move {
            let (metadata, _extensions, message) = request.into_parts();
            let reply = interceptor::intercept_unary(&metadata, &full_method, message, |ctx, msg| {
                handler(ctx, msg)
            })
            .await?;

            Ok(tonic::Response::new(reply))
        })
    }
}

fn unimplemented_response() -> http::Response<axum::body::Body> {
    let mut response = http::Response::new(axum::body::Body::empty());
    let headers = response.headers_mut();
    headers.insert(
        http::HeaderName::from_static("grpc-status"),
        (tonic::Code::Unimplemented as i32).into(),
    );
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/grpc"),
    );
    response
}
