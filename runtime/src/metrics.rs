//! Prometheus metrics for observability and monitoring.
//!
//! The store records into the global [`metrics`] facade. Nothing is exported
//! until a recorder is installed; [`MetricsRecorder::install`] installs a
//! Prometheus recorder and keeps the handle used to render a scrape.
//!
//! # Example
//!
//! ```rust,no_run
//! use ticket_resale_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let recorder = MetricsRecorder::install()?;
//!
//! // ... run the ledger ...
//!
//! if let Some(text) = recorder.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Installed Prometheus recorder.
///
/// `handle` is `None` when another recorder was already installed in this
/// process (common in tests). Metrics are still recorded in that case, but
/// this instance cannot render them.
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// Describe the store metrics and install a Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed for a reason
    /// other than a recorder already being present.
    pub fn install() -> Result<Self, MetricsError> {
        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = match builder.install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    None
                } else {
                    return Err(MetricsError::Install(err_msg));
                }
            },
        };

        register_store_metrics();
        tracing::info!(rendering = handle.is_some(), "Metrics recorder installed");

        Ok(Self { handle })
    }

    /// Get the Prometheus handle, if this instance installed the recorder.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register descriptions for the metrics the store emits.
pub fn register_store_metrics() {
    describe_counter!("store.commands.total", "Actions accepted by a store");
    describe_histogram!(
        "store.reducer.duration_seconds",
        "Time spent in the reducer while holding the state lock"
    );
    describe_counter!("store.effects.executed", "Effects started, by effect type");
    describe_counter!("store.shutdown.initiated", "Graceful shutdowns started");
    describe_counter!("store.shutdown.completed", "Graceful shutdowns that drained all effects");
    describe_counter!("store.shutdown.timeout", "Graceful shutdowns that timed out");
    describe_counter!(
        "store.shutdown.rejected_actions",
        "Actions rejected because the store was shutting down"
    );
}
