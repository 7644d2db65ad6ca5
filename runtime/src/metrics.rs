//! Dispatch metrics through the `metrics` facade.
//!
//! [`MetricsObserver`] reports every send, query and publish. Installing a
//! recorder is left to the application; [`prometheus_recorder`] builds one
//! with latency buckets suited to in-process dispatch.
//!
//! # Example
//!
//! ```rust,no_run
//! use switchyard_runtime::metrics::{describe_metrics, prometheus_recorder};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let recorder = prometheus_recorder()?;
//! let handle = recorder.handle();
//! metrics::set_global_recorder(recorder).map_err(|_| "a recorder is already installed")?;
//! describe_metrics();
//!
//! // Later, from a scrape endpoint:
//! let body = handle.render();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusRecorder};
use std::time::Duration;
use switchyard_core::error::DispatchError;
use switchyard_core::observer::{DispatchEvent, DispatchObserver};
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Dispatches started.
pub const DISPATCH_STARTED: &str = "switchyard_dispatch_started_total";
/// Dispatches finished, labelled by outcome.
pub const DISPATCH_FINISHED: &str = "switchyard_dispatch_finished_total";
/// Dispatch latency.
pub const DISPATCH_DURATION: &str = "switchyard_dispatch_duration_seconds";

const LATENCY_BUCKETS_SECONDS: [f64; 10] = [0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build the Prometheus recorder
    #[error("Failed to build metrics recorder: {0}")]
    Build(String),
}

/// Build a Prometheus recorder with dispatch latency buckets.
///
/// # Errors
///
/// Returns [`MetricsError::Build`] if the bucket configuration is rejected.
pub fn prometheus_recorder() -> Result<PrometheusRecorder, MetricsError> {
    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &LATENCY_BUCKETS_SECONDS,
        )
        .map_err(|e| MetricsError::Build(e.to_string()))?;
    Ok(builder.build_recorder())
}

/// Register descriptions for every dispatch metric with the current
/// recorder.
pub fn describe_metrics() {
    describe_counter!(DISPATCH_STARTED, Unit::Count, "Total number of dispatches started");
    describe_counter!(
        DISPATCH_FINISHED,
        Unit::Count,
        "Total number of dispatches finished, by outcome"
    );
    describe_histogram!(
        DISPATCH_DURATION,
        Unit::Seconds,
        "Time from dispatch start to result"
    );
}

/// Reports dispatches to the installed `metrics` recorder.
///
/// Labels: `kind` (command, query, notification), `message` (type name)
/// and, on completion, `outcome` (success, failure, cancelled).
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsObserver;

impl MetricsObserver {
    fn finish(event: &DispatchEvent, outcome: &'static str, elapsed: Duration) {
        counter!(
            DISPATCH_FINISHED,
            "kind" => event.kind.to_string(),
            "message" => event.message,
            "outcome" => outcome
        )
        .increment(1);
        histogram!(
            DISPATCH_DURATION,
            "kind" => event.kind.to_string(),
            "message" => event.message
        )
        .record(elapsed.as_secs_f64());
    }
}

impl DispatchObserver for MetricsObserver {
    fn on_start(&self, event: &DispatchEvent) {
        counter!(
            DISPATCH_STARTED,
            "kind" => event.kind.to_string(),
            "message" => event.message
        )
        .increment(1);
    }

    fn on_success(&self, event: &DispatchEvent, elapsed: Duration) {
        Self::finish(event, "success", elapsed);
    }

    fn on_failure(&self, event: &DispatchEvent, error: &DispatchError, elapsed: Duration) {
        let outcome = if error.is_cancelled() { "cancelled" } else { "failure" };
        Self::finish(event, outcome, elapsed);
    }
}
