//! Prometheus metrics instrumentation for capstan.
//!
//! # Metrics
//!
//! ## Counters
//! - `capstan_jobs_enqueued_total` - jobs admitted to the queue
//! - `capstan_jobs_terminal_total` - jobs reaching a terminal state
//!
//! ## Gauges
//! - `capstan_queue_depth` - current queue depth per application
//! - `capstan_pool_size` - current pool size per application and state
#![cfg(feature = "metrics")]

use prometheus::{CounterVec, GaugeVec, Opts, Registry};
use std::sync::LazyLock;

/// Global Prometheus registry for capstan metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Counter for jobs admitted to the queue.
///
/// Labels:
/// - `app`: the application name
/// - `event`: the job event name
pub static JOBS_ENQUEUED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "capstan_jobs_enqueued_total",
        "Total number of jobs admitted to the queue",
    );
    CounterVec::new(opts, &["app", "event"])
        .expect("capstan_jobs_enqueued_total metric creation failed")
});

/// Counter for jobs reaching a terminal state.
///
/// Labels:
/// - `event`: the job event name
/// - `outcome`: `close` or the error code name
pub static JOBS_TERMINAL_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "capstan_jobs_terminal_total",
        "Total number of jobs reaching a terminal state",
    );
    CounterVec::new(opts, &["event", "outcome"])
        .expect("capstan_jobs_terminal_total metric creation failed")
});

/// Gauge for current queue depth.
///
/// Labels:
/// - `app`: the application name
pub static QUEUE_DEPTH: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new("capstan_queue_depth", "Current depth of the job queue");
    GaugeVec::new(opts, &["app"]).expect("capstan_queue_depth metric creation failed")
});

/// Gauge for current pool size.
///
/// Labels:
/// - `app`: the application name
/// - `state`: `total` or `busy`
pub static POOL_SIZE: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new("capstan_pool_size", "Current size of the worker pool");
    GaugeVec::new(opts, &["app", "state"]).expect("capstan_pool_size metric creation failed")
});

/// Register all metrics with the global registry.
///
/// Idempotent; duplicate registrations are ignored.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(JOBS_ENQUEUED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(JOBS_TERMINAL_TOTAL.clone()),
        Box::new(QUEUE_DEPTH.clone()),
        Box::new(POOL_SIZE.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            let msg = e.to_string();
            if !msg.contains("Duplicate metrics collector registration attempted") {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

/// Helper to record a job admission.
pub fn record_job_enqueued(app: &str, event: &str) {
    JOBS_ENQUEUED_TOTAL.with_label_values(&[app, event]).inc();
}

/// Helper to record a terminal job outcome.
pub fn record_job_terminal(event: &str, outcome: &str) {
    JOBS_TERMINAL_TOTAL.with_label_values(&[event, outcome]).inc();
}

/// Helper to update the queue depth gauge.
pub fn set_queue_depth(app: &str, depth: f64) {
    QUEUE_DEPTH.with_label_values(&[app]).set(depth);
}

/// Helper to update the pool size gauges.
pub fn set_pool_size(app: &str, total: f64, busy: f64) {
    POOL_SIZE.with_label_values(&[app, "total"]).set(total);
    POOL_SIZE.with_label_values(&[app, "busy"]).set(busy);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder.encode_to_string(&metric_families).map_err(Into::into)
}
