//! Prometheus Metrics Module
//!
//! Exposes bridge metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Ingestion**: Ticks received, queue depth
//! - **Publishing**: Documents published per dataset, send failures, latency
//! - **Drops**: Records dropped by reason (unmapped, malformed, not permitted)
//! - **Handshake**: Current state, permission grants
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::handshake::HandshakeState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Later calls return the handle installed by the first.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "quote_bridge_ticks_received_total",
        "Total advisory ticks received from the feed"
    );
    describe_gauge!(
        "quote_bridge_queue_depth",
        "Ticks waiting in the ingestion queue"
    );

    describe_counter!(
        "quote_bridge_documents_published_total",
        "Total quote documents sent to the endpoint"
    );
    describe_counter!(
        "quote_bridge_send_failures_total",
        "Total endpoint send failures"
    );
    describe_histogram!(
        "quote_bridge_publish_seconds",
        "Time from normalization start to send completion"
    );

    describe_counter!(
        "quote_bridge_records_dropped_total",
        "Total records dropped before publishing, by reason"
    );

    describe_gauge!(
        "quote_bridge_handshake_state",
        "Handshake state (0=disconnected 1=feed_connected 2=logged_in 3=publishing 4=disposed)"
    );
    describe_counter!(
        "quote_bridge_permission_grants_total",
        "Total publish permissions granted by the endpoint"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Why a record never reached the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Source key or dataset value has no registry entry.
    Unmapped,
    /// Record could not be normalized.
    Malformed,
    /// Dataset has no publish permission.
    NotPermitted,
}

impl DropReason {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unmapped => "unmapped",
            Self::Malformed => "malformed",
            Self::NotPermitted => "not_permitted",
        }
    }
}

/// Record a tick received from the feed.
pub fn record_tick_received() {
    counter!("quote_bridge_ticks_received_total").increment(1);
}

/// Update the ingestion queue depth.
#[allow(clippy::cast_precision_loss)]
pub fn set_queue_depth(depth: usize) {
    gauge!("quote_bridge_queue_depth").set(depth as f64);
}

/// Record a document sent to `dataset`.
pub fn record_published(dataset: &str, elapsed: Duration) {
    counter!(
        "quote_bridge_documents_published_total",
        "dataset" => dataset.to_string()
    )
    .increment(1);
    histogram!("quote_bridge_publish_seconds").record(elapsed.as_secs_f64());
}

/// Record a failed send.
pub fn record_send_failure() {
    counter!("quote_bridge_send_failures_total").increment(1);
}

/// Record a dropped record.
pub fn record_dropped(reason: DropReason) {
    counter!(
        "quote_bridge_records_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Update the handshake state gauge.
pub fn set_handshake_state(state: HandshakeState) {
    gauge!("quote_bridge_handshake_state").set(f64::from(state.code()));
}

/// Record a publish permission grant.
pub fn record_permission_granted() {
    counter!("quote_bridge_permission_grants_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================
