//! Popcorn HTTP API
//!
//! Axum server the dashboard talks to. Each endpoint has a thin axum handler
//! that delegates to a pure inner function, so the inner functions can be
//! tested without going through axum dispatch.
//!
//! Endpoints:
//! - POST /api/sentiment/analyze         : score a review, return the updated view
//! - GET  /api/subjects                  : tracked subjects with counts
//! - GET  /api/subjects/:id/view         : current view (`?baseline=` for empty history)
//! - GET  /health                        : liveness + scorer info
//! - GET  /version                       : server version info

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use popcorn_core::{AggregationService, PopcornConfig, ServiceError};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub service: Arc<AggregationService>,
    pub config: PopcornConfig,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    let cors = cors_layer(&state.config.http.cors_origins);
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/api/sentiment/analyze", post(analyze_handler))
        .route("/api/subjects", get(subjects_handler))
        .route("/api/subjects/:id/view", get(view_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(AllowOrigin::any());
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(origin = %o, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(allowed))
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    service: Arc<AggregationService>,
    config: PopcornConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let state = Arc::new(HttpState { service, config });

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Popcorn HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    pub text: Option<String>,
    /// Falls back to `aggregation.default_subject` when absent or blank.
    pub subject_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ViewQuery {
    pub baseline: Option<f64>,
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(kind: &str, msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            kind: kind.to_string(),
            status: "error".to_string(),
        }
    }

    fn into_value(self) -> serde_json::Value {
        serde_json::json!({
            "error": self.error,
            "kind": self.kind,
            "status": self.status,
        })
    }
}

/// Map a pipeline failure onto a status code and error body.
pub fn service_error_response(err: &ServiceError) -> (StatusCode, serde_json::Value) {
    let (status, kind) = match err {
        ServiceError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
        ServiceError::ScoringFailed(_) => (StatusCode::BAD_GATEWAY, "scoring_failed"),
        ServiceError::UnreadableScore(_) => (StatusCode::BAD_GATEWAY, "unreadable_score"),
        ServiceError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store"),
    };
    (status, ErrorResponse::new(kind, err.to_string()).into_value())
}

/// Malformed bodies get the same error shape as pipeline failures.
pub fn rejection_response(rejection: &JsonRejection) -> (StatusCode, serde_json::Value) {
    (
        StatusCode::BAD_REQUEST,
        ErrorResponse::new("invalid_input", rejection.body_text()).into_value(),
    )
}

fn to_json<T: Serialize>(value: &T) -> (StatusCode, serde_json::Value) {
    match serde_json::to_value(value) {
        Ok(v) => (StatusCode::OK, v),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorResponse::new("serialization", e.to_string()).into_value(),
        ),
    }
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health: reports scorer wiring and how many subjects are tracked.
pub fn health_inner(
    service: &AggregationService,
    config: &PopcornConfig,
) -> (StatusCode, serde_json::Value) {
    match service.subjects() {
        Ok(subjects) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "scorer": service.scorer_name(),
                "program": config.scorer.program,
                "subjects": subjects.len(),
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "popcorn/1",
    })
}

/// Inner analyze: validates the body, applies the default subject and runs the pipeline.
pub async fn analyze_inner(
    service: &AggregationService,
    config: &PopcornConfig,
    req: AnalyzeRequest,
) -> (StatusCode, serde_json::Value) {
    let text = match req.text {
        Some(t) if !t.trim().is_empty() => t,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("invalid_input", "text is required and must not be empty")
                    .into_value(),
            );
        }
    };

    let subject = req
        .subject_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| config.aggregation.default_subject.clone());

    let start = Instant::now();
    let result = service.submit_review(&subject, &text).await;
    let took_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(view) => {
            let (status, mut body) = to_json(&view);
            if let Some(obj) = body.as_object_mut() {
                obj.insert("tookMs".to_string(), serde_json::json!(took_ms));
            }
            (status, body)
        }
        Err(e) => {
            tracing::warn!(subject = %subject, error = %e, took_ms, "Analyze request failed");
            service_error_response(&e)
        }
    }
}

/// Inner view: current aggregate for one subject.
pub fn view_inner(
    service: &AggregationService,
    config: &PopcornConfig,
    subject: &str,
    query: ViewQuery,
) -> (StatusCode, serde_json::Value) {
    let baseline = query.baseline.unwrap_or(config.aggregation.baseline);
    if !(0.0..=1.0).contains(&baseline) {
        return (
            StatusCode::BAD_REQUEST,
            ErrorResponse::new("invalid_input", "baseline must be within [0, 1]").into_value(),
        );
    }
    match service.view(subject, baseline) {
        Ok(view) => to_json(&view),
        Err(e) => service_error_response(&e),
    }
}

/// Inner subjects: every tracked subject with review/alert counts.
pub fn subjects_inner(service: &AggregationService) -> (StatusCode, serde_json::Value) {
    match service.subjects() {
        Ok(subjects) => {
            let (status, list) = to_json(&subjects);
            (status, serde_json::json!({ "subjects": list }))
        }
        Err(e) => service_error_response(&e),
    }
}

// ============================================================================
// Axum handler wrappers (thin: delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.service, &state.config);
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn analyze_handler(
    State(state): State<Arc<HttpState>>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match payload {
        Ok(Json(req)) => analyze_inner(&state.service, &state.config, req).await,
        Err(rejection) => rejection_response(&rejection),
    };
    (status, Json(body))
}

pub async fn view_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    Query(query): Query<ViewQuery>,
) -> impl IntoResponse {
    let (status, body) = view_inner(&state.service, &state.config, &id, query);
    (status, Json(body))
}

pub async fn subjects_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = subjects_inner(&state.service);
    (status, Json(body))
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use popcorn_core::{ParseError, ScorerError};
    use std::time::Duration;

    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string(), "version must be string");
        assert_eq!(v["protocol"], "popcorn/1");
    }

    #[test]
    fn test_error_mapping_invalid_input() {
        let (status, body) =
            service_error_response(&ServiceError::InvalidInput("review text is empty".into()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_input");
        assert_eq!(body["status"], "error");
    }

    #[test]
    fn test_error_mapping_scorer_failures_are_bad_gateway() {
        let (status, body) = service_error_response(&ServiceError::ScoringFailed(
            ScorerError::Timeout {
                after: Duration::from_millis(1500),
            },
        ));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["kind"], "scoring_failed");
        assert!(body["error"].as_str().unwrap().contains("1500ms"));

        let (status, body) = service_error_response(&ServiceError::UnreadableScore(
            ParseError::NoStructuredResult,
        ));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["kind"], "unreadable_score");
    }

    #[test]
    fn test_error_mapping_keeps_stderr_detail() {
        let (_, body) = service_error_response(&ServiceError::ScoringFailed(
            ScorerError::NonZeroExit {
                code: Some(2),
                stderr: "ModuleNotFoundError: No module named 'joblib'".into(),
            },
        ));
        let msg = body["error"].as_str().unwrap();
        assert!(msg.contains("status 2"));
        assert!(msg.contains("joblib"));
    }

    #[test]
    fn test_cors_layer_skips_invalid_origins() {
        // Must not panic on a header-invalid origin.
        let _ = cors_layer(&["http://localhost:5173".to_string(), "bad\norigin".to_string()]);
    }
}
