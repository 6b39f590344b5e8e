//! Pipeline counters shared by the worker, batch publisher and health server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::domain::subscription::DatasetId;
use crate::infrastructure::metrics::{self, DropReason};

/// Running totals for one process.
///
/// Every `record_*` call also updates the matching Prometheus metric.
#[derive(Debug, Default)]
pub struct PipelineStats {
    received: AtomicU64,
    published: AtomicU64,
    send_failures: AtomicU64,
    dropped_unmapped: AtomicU64,
    dropped_malformed: AtomicU64,
    dropped_not_permitted: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Records taken from the feed or file.
    pub received: u64,
    /// Documents sent.
    pub published: u64,
    /// Sends that failed.
    pub send_failures: u64,
    /// Records with no registry entry.
    pub dropped_unmapped: u64,
    /// Records that failed normalization.
    pub dropped_malformed: u64,
    /// Records for a dataset without permission.
    pub dropped_not_permitted: u64,
}

impl PipelineStats {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a record entering normalization.
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a successful send.
    pub fn record_published(&self, dataset: &DatasetId, elapsed: Duration) {
        self.published.fetch_add(1, Ordering::Relaxed);
        metrics::record_published(dataset.as_str(), elapsed);
    }

    /// Count a failed send.
    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
        metrics::record_send_failure();
    }

    /// Count a dropped record.
    pub fn record_dropped(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::Unmapped => &self.dropped_unmapped,
            DropReason::Malformed => &self.dropped_malformed,
            DropReason::NotPermitted => &self.dropped_not_permitted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::record_dropped(reason);
    }

    /// Copy the current totals.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            dropped_unmapped: self.dropped_unmapped.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            dropped_not_permitted: self.dropped_not_permitted.load(Ordering::Relaxed),
        }
    }
}
