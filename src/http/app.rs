//! Application endpoint.
//!
//! Every path answers `hello world`. The request counter is handed in by the
//! caller rather than looked up from a global recorder.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    Router,
};
use metrics::Counter;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

pub const X_REQUEST_ID: &str = "x-request-id";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    requests: Counter,
}

/// Build the application router.
pub fn app_router(requests: Counter) -> Router {
    Router::new()
        .fallback(hello)
        .with_state(AppState { requests })
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    let request_id = request
                        .headers()
                        .get(X_REQUEST_ID)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("unknown");
                    tracing::debug_span!(
                        "request",
                        method = %request.method(),
                        path = %request.uri().path(),
                        request_id = %request_id,
                    )
                }))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

async fn hello(State(state): State<AppState>) -> &'static str {
    state.requests.increment(1);
    "hello world"
}
