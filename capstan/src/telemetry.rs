//! Tracing and telemetry instrumentation for capstan.
//!
//! Helper functions for the spans and events the engine emits during job
//! and pool lifecycle transitions. All helpers also feed the Prometheus
//! metrics when the `metrics` feature is enabled, and are no-ops there
//! otherwise.

use tracing::{info_span, Span};

/// Create a tracing span for a job submission.
#[must_use]
pub fn job_enqueue_span(app: impl AsRef<str>, event: impl AsRef<str>) -> Span {
    info_span!(
        "capstan.enqueue",
        app = %app.as_ref(),
        event = %event.as_ref(),
    )
}

/// Create a tracing span for one scheduling pass.
#[must_use]
pub fn react_span(app: impl AsRef<str>) -> Span {
    info_span!("capstan.react", app = %app.as_ref())
}

/// Create a tracing span for a job invocation on a worker.
#[must_use]
pub fn job_invoke_span(
    app: impl AsRef<str>,
    event: impl AsRef<str>,
    worker: impl AsRef<str>,
) -> Span {
    info_span!(
        "capstan.invoke",
        app = %app.as_ref(),
        event = %event.as_ref(),
        worker = %worker.as_ref(),
    )
}

/// Record a job admission.
pub fn record_job_enqueued(app: impl AsRef<str>, event: impl AsRef<str>) {
    tracing::debug!(
        app = %app.as_ref(),
        event = %event.as_ref(),
        "job admitted"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_enqueued(app.as_ref(), event.as_ref());
}

/// Record a job reaching its terminal state. `outcome` is `close` for
/// success or the error code name for failures.
pub fn record_job_terminal(event: impl AsRef<str>, outcome: impl AsRef<str>) {
    tracing::debug!(
        event = %event.as_ref(),
        outcome = %outcome.as_ref(),
        "job reached terminal state"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_terminal(event.as_ref(), outcome.as_ref());
}

/// Update the queue depth gauge.
pub fn set_queue_depth(app: impl AsRef<str>, depth: usize) {
    tracing::trace!(app = %app.as_ref(), depth, "queue depth updated");

    #[cfg(feature = "metrics")]
    crate::metrics::set_queue_depth(app.as_ref(), depth as f64);
}

/// Update the pool size gauges.
pub fn set_pool_size(app: impl AsRef<str>, total: usize, busy: usize) {
    tracing::trace!(app = %app.as_ref(), total, busy, "pool size updated");

    #[cfg(feature = "metrics")]
    crate::metrics::set_pool_size(app.as_ref(), total as f64, busy as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_names() {
        let _guard = tracing::subscriber::set_default(tracing_subscriber::fmt().finish());
        assert_eq!(
            job_enqueue_span("echo", "ping").metadata().unwrap().name(),
            "capstan.enqueue"
        );
        assert_eq!(react_span("echo").metadata().unwrap().name(), "capstan.react");
        assert_eq!(
            job_invoke_span("echo", "ping", "w1").metadata().unwrap().name(),
            "capstan.invoke"
        );
    }

    #[test]
    fn test_recording_helpers_do_not_panic() {
        record_job_enqueued("echo", "ping");
        record_job_terminal("ping", "close");
        set_queue_depth("echo", 3);
        set_pool_size("echo", 2, 1);
    }
}
