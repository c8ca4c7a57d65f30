//! Prometheus metrics for the chunklog server.
//!
//! Exposes metrics for uploads, retrievals, the response cache and watch
//! subscribers. Metrics carry no upload ids or key prefixes.
//!
//! The `/metrics` endpoint is unauthenticated. Restrict it to the scraper
//! network at the infrastructure level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Upload metrics
pub static UPLOADS_COMMITTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "chunklog_uploads_committed_total",
        "Total number of uploads whose index record was committed",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_CONFLICTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "chunklog_upload_conflicts_total",
        "Total number of uploads rejected because the id was already taken",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "chunklog_upload_errors_total",
            "Total number of failed uploads by error type",
        ),
        &["error_type"],
    )
    .expect("metric creation failed")
});

pub static BYTES_INGESTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "chunklog_bytes_ingested_total",
        "Total payload bytes of committed uploads",
    )
    .expect("metric creation failed")
});

pub static CHUNKS_INGESTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "chunklog_chunks_ingested_total",
        "Total chunks of committed uploads",
    )
    .expect("metric creation failed")
});

// Retrieval metrics
pub static RETRIEVALS_SERVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "chunklog_retrievals_served_total",
        "Total number of retrieval responses started",
    )
    .expect("metric creation failed")
});

pub static RETRIEVAL_SIZE_MISMATCHES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "chunklog_retrieval_size_mismatches_total",
        "Total number of retrievals whose reassembled size differed from the index record",
    )
    .expect("metric creation failed")
});

pub static RETRIEVAL_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "chunklog_retrieval_errors_total",
        "Total number of retrieval streams that ended with a storage error",
    )
    .expect("metric creation failed")
});

// Response cache metrics
pub static CACHE_HITS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "chunklog_response_cache_hits_total",
        "Total number of retrievals served from the response cache",
    )
    .expect("metric creation failed")
});

pub static CACHE_MISSES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "chunklog_response_cache_misses_total",
        "Total number of retrievals not found in the response cache",
    )
    .expect("metric creation failed")
});

// Watch metrics
pub static WATCH_SUBSCRIBERS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "chunklog_watch_subscribers",
        "Number of currently connected watch subscribers",
    )
    .expect("metric creation failed")
});

pub static WATCH_EVENTS_SENT: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "chunklog_watch_events_sent_total",
        "Total number of upload events pushed to watch subscribers",
    )
    .expect("metric creation failed")
});

// Timing metrics
pub static UPLOAD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "chunklog_upload_duration_seconds",
            "Time from upload request to commit",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("metric creation failed")
});

pub static RETRIEVAL_PREFLIGHT_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "chunklog_retrieval_preflight_duration_seconds",
            "Time from retrieval request to the first response byte being ready",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// This function is idempotent - subsequent calls after the first are no-ops.
/// This allows safe use in integration tests that build several routers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(UPLOADS_COMMITTED.clone()),
            Box::new(UPLOAD_CONFLICTS.clone()),
            Box::new(UPLOAD_ERRORS.clone()),
            Box::new(BYTES_INGESTED.clone()),
            Box::new(CHUNKS_INGESTED.clone()),
            Box::new(RETRIEVALS_SERVED.clone()),
            Box::new(RETRIEVAL_SIZE_MISMATCHES.clone()),
            Box::new(RETRIEVAL_ERRORS.clone()),
            Box::new(CACHE_HITS.clone()),
            Box::new(CACHE_MISSES.clone()),
            Box::new(WATCH_SUBSCRIBERS.clone()),
            Box::new(WATCH_EVENTS_SENT.clone()),
            Box::new(UPLOAD_DURATION.clone()),
            Box::new(RETRIEVAL_PREFLIGHT_DURATION.clone()),
        ];
        for collector in collectors {
            REGISTRY
                .register(collector)
                .expect("metric registration failed");
        }
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

/// Helper to record upload errors by type.
pub fn record_upload_error(error_type: &str) {
    UPLOAD_ERRORS.with_label_values(&[error_type]).inc();
}
