//! Health endpoints

use axum::{
    extract::{Request, State},
    http::{header, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::HealthState;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Build the health router
///
/// Only GET and OPTIONS are served. Other methods get 405 on every path,
/// known or not; unknown paths get 404.
pub fn router(state: HealthState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(health).fallback(fallback))
        .route("/health", get(health).fallback(fallback))
        .route("/metrics", get(metrics).fallback(fallback))
        .route("/ready", get(ready).fallback(fallback))
        .route("/live", get(live).fallback(fallback))
        .fallback(fallback)
        .with_state(state)
        .layer(middleware::from_fn(reject_unsupported_methods))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn health(State(state): State<HealthState>) -> Response {
    let report = state.health();
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

async fn metrics(State(state): State<HealthState>) -> Response {
    Json(state.metrics()).into_response()
}

async fn ready(State(state): State<HealthState>) -> Response {
    let report = state.readiness();
    let status = if report.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

async fn live(State(state): State<HealthState>) -> Response {
    Json(state.liveness()).into_response()
}

/// Runs before routing so HEAD and friends never reach a GET handler
async fn reject_unsupported_methods(request: Request, next: Next) -> Response {
    let method = request.method();
    if method == Method::GET || method == Method::OPTIONS {
        next.run(request).await
    } else {
        method_not_allowed()
    }
}

fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(ErrorResponse::new("Method not allowed")),
    )
        .into_response()
}

async fn fallback(method: Method) -> Response {
    if method == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else if method != Method::GET {
        method_not_allowed()
    } else {
        (StatusCode::NOT_FOUND, Json(ErrorResponse::new("Not found"))).into_response()
    }
}
