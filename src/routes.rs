use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, HeaderValue, Method, Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{middleware, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::middleware::admission;
use crate::service::AbuseGuard;
use crate::utils::create_request_span;

/// Build the application router
///
/// `api` carries the business routes (projects, users); they and the
/// healthcheck sit behind the admission middleware, as does the 404 fallback.
/// `/metrics` is served outside of it.
pub fn app(
    guard: Arc<AbuseGuard>,
    server: &ServerConfig,
    api: Router,
    metrics: Option<PrometheusHandle>,
) -> Router {
    let mut router = Router::new()
        .route("/api/v1/healthcheck", get(healthcheck))
        .merge(api)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(guard, admission));

    if let Some(handle) = metrics {
        router = router.route("/metrics", get(move || async move { handle.render() }));
    }

    router.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http().make_span_with(request_span))
            .layer(cors_layer(&server.cors_origin))
            .layer(TimeoutLayer::new(Duration::from_millis(server.request_timeout_ms)))
            .layer(DefaultBodyLimit::max(server.body_limit_bytes)),
    )
}

async fn healthcheck() -> impl IntoResponse {
    Json(json!({
        "statusCode": 200,
        "data": "OK",
        "message": "Health check passed",
        "success": true,
    }))
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" })))
}

fn request_span(request: &Request<Body>) -> tracing::Span {
    create_request_span(
        &Uuid::new_v4().to_string(),
        request.method().as_str(),
        request.uri().path(),
    )
}

fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .expose_headers([
            HeaderName::from_static("ratelimit-limit"),
            HeaderName::from_static("ratelimit-remaining"),
            HeaderName::from_static("ratelimit-reset"),
            header::RETRY_AFTER,
        ]);

    if origin.trim() == "*" {
        // Credentials cannot be combined with a wildcard origin.
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origin
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(origins).allow_credentials(true)
}
