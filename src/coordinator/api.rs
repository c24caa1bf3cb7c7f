//! REST API handlers for the assignment service
//!
//! This module defines the API routes, handlers and the mapping from
//! coordinator errors to HTTP status codes.

use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, MatchedPath, Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::Serialize;

use crate::metrics;
use crate::models::{parse_id, CreateAssignmentRequest, UpdateAssignmentStatusRequest};

use super::error::CoordinatorError;
use super::server::AppState;

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Simple error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// HTTP status for a coordinator error
pub fn status_for(err: &CoordinatorError) -> StatusCode {
    match err {
        CoordinatorError::NotFound { .. } => StatusCode::NOT_FOUND,
        CoordinatorError::InvalidState { .. } | CoordinatorError::Validation(_) => {
            StatusCode::BAD_REQUEST
        }
        CoordinatorError::Conflict { .. } => StatusCode::CONFLICT,
        CoordinatorError::Transaction(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        let message = match &self {
            CoordinatorError::Transaction(source) => {
                tracing::error!(error = %source, "Assignment transaction failed");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorResponse::new(message))).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message))).into_response()
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        // Health endpoints
        .route("/api/health", get(health_check))
        // Assignment endpoints
        .route("/api/assignments", post(create_assignment))
        .route("/api/assignments/{id}", get(get_assignment))
        .route("/api/assignments/{id}/status", patch(update_assignment_status));

    if state.config.expose_metrics {
        router = router.route("/metrics", get(metrics_endpoint));
    }

    router
        .layer(middleware::from_fn(track_requests))
        .with_state(state)
}

/// Count requests and latency per matched route
async fn track_requests(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    metrics::record_api_request(
        &endpoint,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

// ============================================================================
// Health Handlers
// ============================================================================

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();

    Json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: uptime,
    }))
}

/// Prometheus scrape endpoint
async fn metrics_endpoint() -> Response {
    match metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(format!("Failed to encode metrics: {e}"))),
        )
            .into_response(),
    }
}

// ============================================================================
// Assignment Handlers
// ============================================================================

/// Create an assignment
async fn create_assignment(
    State(state): State<AppState>,
    body: Result<Json<CreateAssignmentRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    let (driver_id, load_id) = match request.validate() {
        Ok(ids) => ids,
        Err(e) => return CoordinatorError::from(e).into_response(),
    };

    match state.coordinator.create(driver_id, load_id).await {
        Ok(assignment) => {
            (StatusCode::CREATED, Json(ApiResponse::success(assignment))).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// Get an assignment with its driver and load
async fn get_assignment(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match parse_id("id", &id) {
        Ok(id) => id,
        Err(e) => return CoordinatorError::from(e).into_response(),
    };

    match state.coordinator.find_one(id).await {
        Ok(details) => (StatusCode::OK, Json(ApiResponse::success(details))).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Complete or cancel an assignment
async fn update_assignment_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<UpdateAssignmentStatusRequest>, JsonRejection>,
) -> Response {
    let id = match parse_id("id", &id) {
        Ok(id) => id,
        Err(e) => return CoordinatorError::from(e).into_response(),
    };
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    let status = match request.validate() {
        Ok(status) => status,
        Err(e) => return CoordinatorError::from(e).into_response(),
    };

    match state.coordinator.update_status(id, status).await {
        Ok(assignment) => {
            (StatusCode::OK, Json(ApiResponse::success(assignment))).into_response()
        }
        Err(e) => e.into_response(),
    }
}

// ============================================================================
// Tests
// ============================================================================
