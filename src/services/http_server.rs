//! HTTP server for the reviewer API.
//!
//! Wraps the API routes with request ids and access logging and serves them
//! until the shutdown token fires.

use crate::services::http_api::{api_routes, ApiState};
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Generates a v4 UUID per request unless the client sent one.
#[derive(Clone, Copy, Default)]
struct RequestUuid;

impl MakeRequestId for RequestUuid {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&uuid::Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Log method, path, status and latency of every request.
async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_owned();
    let started = Instant::now();

    let response = next.run(request).await;

    log::info!(
        "[api] {} {} {} {:?} id={}",
        method,
        path,
        response.status().as_u16(),
        started.elapsed(),
        request_id
    );
    response
}

/// Full application router: API routes plus request id and logging layers.
pub fn build_router(state: ApiState) -> Router {
    api_routes().with_state(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(RequestUuid))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(middleware::from_fn(log_requests)),
    )
}

/// Bind `addr` and serve until `shutdown` is cancelled.
pub async fn start_server(
    addr: &str,
    state: ApiState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, state, shutdown).await
}

/// Serve on an already bound listener. In-flight requests finish before this
/// returns; their store calls see `shutdown` as cancellation.
pub async fn serve(
    listener: TcpListener,
    state: ApiState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let local_addr = listener.local_addr()?;
    log::info!("[server] listening on http://{}", local_addr);

    let state = state.with_shutdown(shutdown.clone());
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            log::info!("[server] shutdown requested");
        })
        .await?;

    log::info!("[server] stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::reviewer_store::{ReviewerStore, StoreConfig};
    use axum::body::Body;
    use std::time::Duration;
    use tempfile::tempdir;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_responses_carry_request_id() {
        let dir = tempdir().unwrap();
        let store = ReviewerStore::connect(&StoreConfig::new(dir.path().join("r.db")))
            .await
            .unwrap();
        let app = build_router(ApiState::new(store, Duration::from_secs(2)));

        let response = app
            .clone()
            .oneshot(axum::http::Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));

        let response = app
            .oneshot(
                axum::http::Request::get("/health")
                    .header(REQUEST_ID_HEADER, "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "abc-123");
    }

    #[tokio::test]
    async fn test_requests_after_shutdown_are_unavailable() {
        let dir = tempdir().unwrap();
        let store = ReviewerStore::connect(&StoreConfig::new(dir.path().join("r.db")))
            .await
            .unwrap();
        let shutdown = CancellationToken::new();
        let app = build_router(
            ApiState::new(store, Duration::from_secs(2)).with_shutdown(shutdown.clone()),
        );
        shutdown.cancel();

        let response = app
            .oneshot(axum::http::Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 503);
    }

    #[tokio::test]
    async fn test_serve_stops_on_cancel() {
        let dir = tempdir().unwrap();
        let store = ReviewerStore::connect(&StoreConfig::new(dir.path().join("r.db")))
            .await
            .unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let shutdown = CancellationToken::new();

        let server = tokio::spawn(serve(
            listener,
            ApiState::new(store, Duration::from_secs(2)),
            shutdown.clone(),
        ));

        shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("server did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
