//! Prometheus metrics for the tarn server.
//!
//! Exposes cache hit/miss counts, origin fetch outcomes and latency, and
//! publish/login results.
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Labels never carry package names or usernames. Restrict the endpoint at
//! the network level or turn it off with `server.metrics_enabled = false`.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Cache metrics
pub static CACHE_LOOKUPS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tarn_cache_lookups_total",
            "Cache lookups by partition and result",
        ),
        &["partition", "result"],
    )
    .expect("metric creation failed")
});

pub static CACHE_SAVE_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tarn_cache_save_failures_total",
        "Origin responses served but not cached because the save failed",
    )
    .expect("metric creation failed")
});

// Origin metrics
pub static ORIGIN_FETCHES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tarn_origin_fetches_total",
            "Requests sent to the upstream registry by outcome",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static ORIGIN_FETCH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "tarn_origin_fetch_duration_seconds",
            "Time taken by upstream registry requests",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
    )
    .expect("metric creation failed")
});

pub static PASSTHROUGH_REQUESTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tarn_passthrough_requests_total",
        "Requests relayed to the upstream registry without caching",
    )
    .expect("metric creation failed")
});

// Write path metrics
pub static PUBLISHES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("tarn_publishes_total", "Publish attempts by outcome"),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static LOGINS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("tarn_logins_total", "Login attempts by outcome"),
        &["outcome"],
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so integration tests can build many routers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(CACHE_LOOKUPS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CACHE_SAVE_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ORIGIN_FETCHES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ORIGIN_FETCH_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PASSTHROUGH_REQUESTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PUBLISHES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(LOGINS.clone()))
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

/// Record a cache lookup result (`hit` or `miss`) for a partition.
pub fn record_cache_lookup(partition: &str, result: &str) {
    CACHE_LOOKUPS.with_label_values(&[partition, result]).inc();
}
