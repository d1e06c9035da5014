//! HTTP surface: router, authentication, and the serve loop.
//!
//! Two externally reachable surfaces: the authenticated programmatic
//! endpoint `/v1/ask` (long-poll JSON or event stream) and the token-gated
//! human interaction pages under `/r/{request_id}/`.

pub mod ask;
pub mod interact;
mod page;

use std::time::Duration;

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{header, Method};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tower::ServiceExt;
use tracing::debug;

use crate::error::ServiceError;
use crate::lifecycle::Engine;

/// Maximum accepted `/v1/ask` body size.
const ASK_BODY_LIMIT: usize = 1024 * 1024;

/// Slow-header connections are cut after this long.
const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state handed to every handler. No process-wide singletons; the
/// store and hub live behind the engine.
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub api_key: String,
    pub heartbeat_interval: Duration,
}

/// Builds the service router.
#[must_use]
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/v1/ask", get(ask::handle_ask).post(ask::handle_ask))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ))
        .layer(DefaultBodyLimit::max(ASK_BODY_LIMIT));

    Router::new()
        .merge(api)
        .route("/r/{request_id}", get(interact::show))
        .route("/r/{request_id}/", get(interact::show))
        .route("/r/{request_id}/submit", post(interact::submit))
        .with_state(state)
}

/// Shared-credential check for the programmatic endpoint.
///
/// `Authorization: Bearer <key>` is the primary form. A GET may instead
/// present `key=<credential>` in the query for constrained-header
/// environments; this is discouraged but accepted.
async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if bearer_matches(&request, &state.api_key)
        || (request.method() == Method::GET && query_key_matches(&request, &state.api_key))
    {
        return next.run(request).await;
    }
    ServiceError::Unauthorized.into_response()
}

fn bearer_matches(request: &Request, api_key: &str) -> bool {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|candidate| candidate.trim() == api_key)
}

fn query_key_matches(request: &Request, api_key: &str) -> bool {
    let Some(query) = request.uri().query() else {
        return false;
    };
    url::form_urlencoded::parse(query.as_bytes())
        .any(|(name, value)| name == "key" && value.trim() == api_key)
}

/// Accept loop: one task per connection, HTTP/1.1 and HTTP/2, with a
/// header-read timeout against slow-header connections.
pub async fn serve(listener: TcpListener, router: Router) -> std::io::Result<()> {
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let router = router.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = TowerToHyperService::new(
                router.map_request(|req: Request<hyper::body::Incoming>| {
                    req.map(axum::body::Body::new)
                }),
            );
            let mut builder = auto::Builder::new(TokioExecutor::new());
            builder
                .http1()
                .timer(TokioTimer::new())
                .header_read_timeout(HEADER_READ_TIMEOUT);
            if let Err(err) = builder.serve_connection(io, service).await {
                debug!(%peer_addr, error = %err, "connection ended with error");
            }
        });
    }
}
