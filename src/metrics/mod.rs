//! Prometheus metrics for the assignment service and worker
//!
//! This module provides metrics tracking for:
//! - Assignment lifecycle: creations, transitions, rejections, store failures,
//!   side-effect failures
//! - HTTP API: request counts and latency
//! - Worker: consumed events and failures
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec, Encoder,
    HistogramVec, TextEncoder,
};
use std::sync::{Mutex, OnceLock};

use crate::error::ErrorCategory;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for assignment lifecycle metrics
struct AssignmentMetrics {
    created: Counter,
    transitions: CounterVec,
    rejections: CounterVec,
    failures: CounterVec,
    side_effect_failures: CounterVec,
    operation_duration: HistogramVec,
    api_requests: CounterVec,
    api_duration: HistogramVec,
}

/// Container for worker metrics
struct WorkerMetrics {
    consumed: Counter,
    failures: CounterVec,
}

static ASSIGNMENT_METRICS: OnceLock<AssignmentMetrics> = OnceLock::new();

static WORKER_METRICS: OnceLock<WorkerMetrics> = OnceLock::new();

/// Whether initialization was attempted; held while registering so concurrent
/// callers return only once the metrics are in place
static METRICS_INIT_ATTEMPTED: Mutex<bool> = Mutex::new(false);

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// If metric registration fails, subsequent metric operations become no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = freightline::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    // Prevent double initialization
    let mut attempted = METRICS_INIT_ATTEMPTED
        .lock()
        .unwrap_or_else(|e| e.into_inner());
    if *attempted {
        return Ok(());
    }
    *attempted = true;

    let assignment = AssignmentMetrics {
        created: register_counter!(
            "freightline_assignments_created_total",
            "Total assignments created"
        )?,
        transitions: register_counter_vec!(
            "freightline_assignment_transitions_total",
            "Total assignment transitions by target status",
            &["status"]
        )?,
        rejections: register_counter_vec!(
            "freightline_assignment_rejections_total",
            "Total rejected assignment operations by kind",
            &["operation", "kind"]
        )?,
        failures: register_counter_vec!(
            "freightline_assignment_failures_total",
            "Total assignment operations that failed in the store, by operation",
            &["operation"]
        )?,
        side_effect_failures: register_counter_vec!(
            "freightline_side_effect_failures_total",
            "Post-commit side effects that failed, by effect",
            &["effect"]
        )?,
        operation_duration: register_histogram_vec!(
            "freightline_assignment_operation_duration_seconds",
            "Assignment operation duration in seconds",
            &["operation"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
        )?,
        api_requests: register_counter_vec!(
            "freightline_api_requests_total",
            "Total API requests by endpoint and status",
            &["endpoint", "status"]
        )?,
        api_duration: register_histogram_vec!(
            "freightline_api_request_duration_seconds",
            "API request duration in seconds",
            &["endpoint"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
        )?,
    };

    let worker = WorkerMetrics {
        consumed: register_counter!(
            "freightline_worker_events_consumed_total",
            "Total assignment events recorded by the worker"
        )?,
        failures: register_counter_vec!(
            "freightline_worker_failures_total",
            "Total worker failures by stage",
            &["stage"]
        )?,
    };

    ASSIGNMENT_METRICS
        .set(assignment)
        .map_err(|_| "Assignment metrics already initialized")?;
    WORKER_METRICS
        .set(worker)
        .map_err(|_| "Worker metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    ASSIGNMENT_METRICS.get().is_some() && WORKER_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

pub fn record_assignment_created() {
    if let Some(m) = ASSIGNMENT_METRICS.get() {
        m.created.inc();
    }
}

pub fn record_transition(status: &str) {
    if let Some(m) = ASSIGNMENT_METRICS.get() {
        m.transitions.with_label_values(&[status]).inc();
    }
}

/// Record a failed operation: caller errors count as rejections by kind,
/// store failures count separately
pub fn record_operation_error(operation: &str, category: ErrorCategory) {
    let Some(m) = ASSIGNMENT_METRICS.get() else {
        return;
    };
    if category.is_client_error() {
        m.rejections
            .with_label_values(&[operation, category.as_str()])
            .inc();
    } else {
        m.failures.with_label_values(&[operation]).inc();
    }
}

/// Record a failed post-commit side effect
pub fn record_side_effect_failure(effect: &str) {
    if let Some(m) = ASSIGNMENT_METRICS.get() {
        m.side_effect_failures.with_label_values(&[effect]).inc();
    }
}

/// Record API request
pub fn record_api_request(endpoint: &str, status: u16, duration_secs: f64) {
    let Some(m) = ASSIGNMENT_METRICS.get() else {
        return;
    };

    let status_str = status.to_string();
    m.api_requests
        .with_label_values(&[endpoint, &status_str])
        .inc();
    m.api_duration
        .with_label_values(&[endpoint])
        .observe(duration_secs);
}

pub fn record_event_consumed() {
    if let Some(m) = WORKER_METRICS.get() {
        m.consumed.inc();
    }
}

pub fn record_worker_failure(stage: &str) {
    if let Some(m) = WORKER_METRICS.get() {
        m.failures.with_label_values(&[stage]).inc();
    }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start an operation timer (returns a timer handle)
pub fn start_operation_timer(operation: &str) -> MetricsTimer {
    match ASSIGNMENT_METRICS.get() {
        Some(m) => MetricsTimer::new(
            m.operation_duration
                .with_label_values(&[operation])
                .start_timer(),
        ),
        None => MetricsTimer::noop(),
    }
}

// ============================================================================
// Tests
// ============================================================================
