//! HTTP server.
//!
//! Every request goes through the same pipeline: request id, trailing-slash
//! normalization, the built-in `/health` and CORS preflight responses, body
//! collection under the size limit, authentication, routing, route filters
//! and finally the typed dispatch. The whole pipeline runs under the request
//! timeout.
//!
//! ```rust,ignore
//! use fabriq_server::{Router, Server, ServerConfig};
//!
//! let mut router = Router::new();
//! router.get("/ping", |_ctx: Ctx| async { Ok::<_, MicroError>("pong") });
//!
//! let server = Server::builder()
//!     .config(ServerConfig::builder().http_addr("0.0.0.0:8080").build())
//!     .router(router)
//!     .build();
//! server.run().await?;
//! ```

use std::any::Any;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures_util::FutureExt;
use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE, ACCESS_CONTROL_REQUEST_METHOD, ALLOW, CONTENT_TYPE, ORIGIN, VARY,
};
use http::{HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use fabriq_core::{
    Ctx, ErrorResponse, HandlerError, MicroError, NoopTransactions, RequestId,
    TransactionManager,
};

use crate::auth::{AuthResolver, TokenVerifier};
use crate::bind::{Exchange, BINDING_ERROR_KIND};
use crate::config::{CorsConfig, ServerConfig};
use crate::dispatch::Dispatcher;
use crate::error::ServerError;
use crate::error_mapper::{internal_error, map_error, INTERNAL_ERROR_KIND};
use crate::health::{HealthCheck, HEALTH_PATH};
use crate::router::{Route, RouteLookup, Router};
use crate::shutdown::{ConnectionTracker, ShutdownSignal};
use crate::validation::Validator;

/// Header carrying the request id, echoed on every response.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Response body type.
pub type ResponseBody = Full<Bytes>;

/// Response type produced by the server.
pub type HttpResponse = Response<ResponseBody>;

/// The HTTP server.
pub struct Server {
    config: ServerConfig,
    router: Router,
    dispatcher: Dispatcher,
    resolver: AuthResolver,
    health: HealthCheck,
    transactions: Arc<dyn TransactionManager>,
}

impl Server {
    /// Creates a server without token verification or transactions.
    #[must_use]
    pub fn new(config: ServerConfig, router: Router) -> Self {
        Self::builder().config(config).router(router).build()
    }

    /// Creates a builder.
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the router.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Returns the health check.
    #[must_use]
    pub fn health(&self) -> &HealthCheck {
        &self.health
    }

    /// Runs until SIGTERM or Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(ShutdownSignal::with_os_signals()).await
    }

    /// Binds the configured address and runs until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or cannot be bound.
    pub async fn run_with_shutdown(self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let addr = self.config.socket_addr().map_err(|e| {
            ServerError::Bind(format!("invalid address '{}': {e}", self.config.http_addr()))
        })?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(format!("failed to bind {addr}: {e}")))?;

        self.serve(listener, shutdown).await
    }

    /// Serves connections from `listener` until `shutdown` fires, then waits
    /// up to the shutdown timeout for open connections to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener address cannot be read.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: ShutdownSignal,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        info!(
            %addr,
            service = self.config.service_name(),
            routes = self.router.route_count(),
            "server listening"
        );

        let server = Arc::new(self);
        let tracker = ConnectionTracker::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let server = Arc::clone(&server);
                        let guard = tracker.acquire();
                        let shutdown = shutdown.clone();

                        tokio::spawn(async move {
                            server.handle_connection(stream, remote, shutdown).await;
                            drop(guard);
                        });
                    }
                    Err(e) => error!(error = %e, "failed to accept connection"),
                },
                () = shutdown.recv() => {
                    info!("shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }

        let timeout = server.config.shutdown_timeout();
        info!(
            timeout_secs = timeout.as_secs(),
            active = tracker.active_connections(),
            "waiting for connections to close"
        );

        if tokio::time::timeout(timeout, tracker.wait_idle()).await.is_err() {
            warn!(
                active = tracker.active_connections(),
                "shutdown timeout reached with connections still open"
            );
        }

        info!("server stopped");
        Ok(())
    }

    async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        remote: SocketAddr,
        shutdown: ShutdownSignal,
    ) {
        let io = TokioIo::new(stream);
        let server = Arc::clone(&self);

        let service = service_fn(move |req: Request<Incoming>| {
            let server = Arc::clone(&server);
            async move { Ok::<_, Infallible>(server.handle(req).await) }
        });

        let conn = http1::Builder::new().serve_connection(io, service);
        tokio::pin!(conn);

        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    debug!(%remote, error = %e, "connection error");
                }
            }
            () = shutdown.recv() => {
                conn.as_mut().graceful_shutdown();
                if let Err(e) = conn.await {
                    debug!(%remote, error = %e, "connection error during shutdown");
                }
            }
        }
    }

    /// Handles one request through the full pipeline.
    ///
    /// Never fails: every outcome, including handler panics and timeouts,
    /// becomes a response.
    pub async fn handle<B>(&self, req: Request<B>) -> HttpResponse
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let started = Instant::now();
        let request_id = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(RequestId::parse)
            .unwrap_or_default();
        let method = req.method().clone();
        let path = self.normalize_path(req.uri().path());
        let origin = req
            .headers()
            .get(ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let pipeline = self.process(req, request_id.clone(), &path);
        let mut response = match tokio::time::timeout(self.config.request_timeout(), pipeline).await {
            Ok(response) => response,
            Err(_) => {
                warn!(%request_id, %method, %path, "request timed out");
                error_response(StatusCode::GATEWAY_TIMEOUT, "timeout", "request timed out")
            }
        };

        if let (Some(cors), Some(origin)) = (self.config.cors(), origin.as_deref()) {
            apply_cors_origin(&mut response, cors, origin);
        }
        if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }

        info!(
            %request_id,
            %method,
            %path,
            status = response.status().as_u16(),
            duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "request completed"
        );

        response
    }

    fn normalize_path(&self, path: &str) -> String {
        if self.config.remove_trailing_slash() && path.len() > 1 {
            let trimmed = path.trim_end_matches('/');
            if trimmed.is_empty() {
                return "/".to_string();
            }
            return trimmed.to_string();
        }
        path.to_string()
    }

    async fn process<B>(&self, req: Request<B>, request_id: RequestId, path: &str) -> HttpResponse
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if req.method() == Method::GET && path == HEALTH_PATH {
            return json_response(StatusCode::OK, &self.health.status());
        }

        let preflight = req.method() == Method::OPTIONS
            && req.headers().contains_key(ACCESS_CONTROL_REQUEST_METHOD);
        if preflight {
            if let Some(cors) = self.config.cors() {
                return preflight_response(cors);
            }
        }

        let (parts, body) = req.into_parts();
        let body = match Limited::new(body, self.config.body_limit()).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                return error_response(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "input.too_large",
                    "request body too large",
                );
            }
            Err(e) => {
                warn!(%request_id, error = %e, "failed to read request body");
                return error_response(
                    StatusCode::BAD_REQUEST,
                    BINDING_ERROR_KIND,
                    "failed to read request body",
                );
            }
        };

        let auth = match self.resolver.resolve(&parts.headers) {
            Ok(auth) => auth,
            Err(e) => {
                warn!(%request_id, error = %e, "authentication failed");
                return json_response(e.status_code(), &e.to_response());
            }
        };

        let ctx = Ctx::from_auth(auth)
            .with_request_id(request_id)
            .with_transactions(Arc::clone(&self.transactions));

        match self.router.match_route(&parts.method, path) {
            RouteLookup::Found(route, params) => {
                let exchange = Exchange {
                    method: parts.method,
                    headers: parts.headers,
                    query: parts.uri.query().map(String::from),
                    params,
                    body,
                };
                self.invoke(route, ctx, exchange).await
            }
            RouteLookup::MethodNotAllowed(allowed) => method_not_allowed(&allowed),
            RouteLookup::NotFound => {
                error_response(StatusCode::NOT_FOUND, "route.not_found", "Not Found")
            }
        }
    }

    async fn invoke(&self, route: &Route, ctx: Ctx, exchange: Exchange) -> HttpResponse {
        let request_id = ctx.request_id().clone();

        let run = async move {
            for filter in route.filters() {
                if let Err(e) = filter.apply(&ctx) {
                    let request_id = ctx.request_id();
                    debug!(%request_id, filter = filter.name(), "filter rejected request");
                    return Err(e);
                }
            }
            self.dispatcher
                .dispatch(route.endpoint(), ctx, exchange)
                .await
        };

        let outcome = match AssertUnwindSafe(run).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => Err(recover_panic(payload, &request_id)),
        };

        match outcome {
            Ok(payload) => json_bytes(StatusCode::OK, payload),
            Err(err) => match map_error(&err) {
                Some((status, body)) => json_response(status, &body),
                None => {
                    error!(%request_id, error = %err, "unmapped handler error");
                    json_response(StatusCode::INTERNAL_SERVER_ERROR, &internal_error())
                }
            },
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("routes", &self.router.route_count())
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

/// A panic carrying a [`MicroError`] (raised with `std::panic::panic_any`)
/// maps like a returned error; any other panic is an internal error.
fn recover_panic(payload: Box<dyn Any + Send>, request_id: &RequestId) -> HandlerError {
    match payload.downcast::<MicroError>() {
        Ok(err) => {
            error!(%request_id, error = %err, "handler panicked");
            HandlerError::Micro(*err)
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(%request_id, panic = %message, "handler panicked");
            HandlerError::Micro(MicroError::technical(
                INTERNAL_ERROR_KIND,
                "Internal Server Error",
            ))
        }
    }
}

fn json_bytes(status: StatusCode, body: Bytes) -> HttpResponse {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(body))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> HttpResponse {
    match serde_json::to_vec(body) {
        Ok(bytes) => json_bytes(status, Bytes::from(bytes)),
        Err(e) => {
            error!(error = %e, "failed to serialize response body");
            let fallback = serde_json::to_vec(&internal_error()).unwrap_or_default();
            json_bytes(StatusCode::INTERNAL_SERVER_ERROR, Bytes::from(fallback))
        }
    }
}

fn error_response(status: StatusCode, kind: &str, message: &str) -> HttpResponse {
    json_response(
        status,
        &ErrorResponse {
            kind: kind.to_string(),
            message: message.to_string(),
            details: None,
        },
    )
}

fn method_not_allowed(allowed: &[Method]) -> HttpResponse {
    let mut response = error_response(
        StatusCode::METHOD_NOT_ALLOWED,
        "route.method_not_allowed",
        "Method Not Allowed",
    );
    let allow = allowed
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    if let Ok(value) = HeaderValue::from_str(&allow) {
        response.headers_mut().insert(ALLOW, value);
    }
    response
}

fn preflight_response(cors: &CorsConfig) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::NO_CONTENT;

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&cors.allow_methods.join(", ")) {
        headers.insert(ACCESS_CONTROL_ALLOW_METHODS, value);
    }
    if let Ok(value) = HeaderValue::from_str(&cors.allow_headers.join(", ")) {
        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, value);
    }
    if let Some(max_age) = cors.max_age {
        headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from(max_age));
    }
    response
}

fn apply_cors_origin(response: &mut HttpResponse, cors: &CorsConfig, origin: &str) {
    let Some(allowed) = cors.allowed_origin(origin) else {
        return;
    };
    let echoed = allowed != "*";
    if let Ok(value) = HeaderValue::from_str(&allowed) {
        response
            .headers_mut()
            .insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    if echoed {
        response
            .headers_mut()
            .insert(VARY, HeaderValue::from_static("Origin"));
    }
}

/// Builder for [`Server`].
pub struct ServerBuilder {
    config: Option<ServerConfig>,
    router: Router,
    validator: Validator,
    verifier: Option<Arc<dyn TokenVerifier>>,
    transactions: Arc<dyn TransactionManager>,
}

impl ServerBuilder {
    /// Creates a builder with default configuration and an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: None,
            router: Router::new(),
            validator: Validator::new(),
            verifier: None,
            transactions: Arc::new(NoopTransactions),
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the routes.
    #[must_use]
    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Sets the validator used for bound inputs.
    #[must_use]
    pub fn validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    /// Verifies bearer tokens with `verifier`.
    #[must_use]
    pub fn token_verifier(mut self, verifier: impl TokenVerifier) -> Self {
        self.verifier = Some(Arc::new(verifier));
        self
    }

    /// Opens a transaction per request with `transactions`.
    #[must_use]
    pub fn transactions(mut self, transactions: Arc<dyn TransactionManager>) -> Self {
        self.transactions = transactions;
        self
    }

    /// Builds the server.
    #[must_use]
    pub fn build(self) -> Server {
        let config = self.config.unwrap_or_default();

        let mut resolver = AuthResolver::new().multi_tenant(config.multi_tenant());
        if let Some(verifier) = self.verifier {
            resolver = resolver.with_verifier(verifier);
        }

        Server {
            health: HealthCheck::new(config.service_name(), config.service_version()),
            dispatcher: Dispatcher::new(Arc::new(self.validator)),
            router: self.router,
            resolver,
            transactions: self.transactions,
            config,
        }
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
