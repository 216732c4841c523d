//! Prometheus metrics for the Parcel server.
//!
//! Exposes metrics for session lifecycle, accepted bytes, and request
//! latency.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! **Deployment requirement**: restrict the endpoint to authorized scraper
//! IPs at the infrastructure level (firewall, load balancer, or reverse
//! proxy rules). Do NOT expose `/metrics` on public networks.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Session lifecycle metrics
pub static UPLOAD_SESSIONS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_upload_sessions_created_total",
        "Total number of upload sessions created",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_RESUMED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_upload_sessions_resumed_total",
        "Total number of upload sessions resumed",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_upload_sessions_completed_total",
        "Total number of upload sessions successfully completed",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_CANCELED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_upload_sessions_canceled_total",
        "Total number of upload sessions explicitly canceled",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_EXPIRED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_upload_sessions_expired_total",
        "Total number of upload sessions that expired",
    )
    .expect("metric creation failed")
});

// Chunk metrics
pub static PARTS_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_parts_uploaded_total",
        "Total number of parts accepted",
    )
    .expect("metric creation failed")
});

pub static BYTES_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("parcel_bytes_uploaded_total", "Total bytes accepted")
        .expect("metric creation failed")
});

// Error metrics
pub static OFFSET_CONFLICTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_offset_conflicts_total",
        "Total number of appends rejected for offset mismatch",
    )
    .expect("metric creation failed")
});

pub static COMPLETION_ROLLBACKS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "parcel_completion_rollbacks_total",
        "Total number of completions rolled back after failed verification",
    )
    .expect("metric creation failed")
});

// Gauges
pub static ACTIVE_UPLOAD_SESSIONS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "parcel_active_upload_sessions",
        "Number of upload sessions currently open",
    )
    .expect("metric creation failed")
});

// Timing metrics
pub static PART_UPLOAD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "parcel_part_upload_duration_seconds",
            "Time taken to accept a single part",
        )
        .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
    )
    .expect("metric creation failed")
});

pub static COMPLETION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "parcel_completion_duration_seconds",
            "Time taken to run the completion sequence",
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// This function is idempotent - subsequent calls after the first are
/// no-ops. This allows safe use in integration tests or when embedding
/// multiple routers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(UPLOAD_SESSIONS_CREATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_SESSIONS_RESUMED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_SESSIONS_COMPLETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_SESSIONS_CANCELED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_SESSIONS_EXPIRED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PARTS_UPLOADED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_UPLOADED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(OFFSET_CONFLICTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(COMPLETION_ROLLBACKS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ACTIVE_UPLOAD_SESSIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PART_UPLOAD_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(COMPLETION_DURATION.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}
