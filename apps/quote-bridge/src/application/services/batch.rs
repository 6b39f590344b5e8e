//! Batch Publisher
//!
//! File mode: walks a recorded CSV file once, from the first row to the
//! last, and sends one document per row whose dataset value is mapped and
//! granted. Rows have no header. Cells are trimmed, so `a , b` reads as
//! `a,b`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use csv_async::{AsyncReaderBuilder, ErrorKind as CsvErrorKind, StringRecord, Trim};
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use super::stats::PipelineStats;
use super::worker::{PublishOutcome, send_document};
use crate::application::ports::EndpointPort;
use crate::domain::handshake::Handshake;
use crate::domain::quote::RowNormalizer;
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::metrics::DropReason;

/// Input file could not be read.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// The file could not be opened.
    #[error("failed to open {path}: {source}")]
    Open {
        /// Path attempted.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Reading failed part-way through.
    #[error("failed to read input: {0}")]
    Read(#[from] csv_async::Error),
}

/// Totals for one pass over the file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Rows read.
    pub rows: u64,
    /// Documents sent.
    pub published: u64,
    /// Rows dropped before sending.
    pub dropped: u64,
    /// Sends the endpoint rejected.
    pub send_failures: u64,
    /// Whether the pass stopped early on cancellation.
    pub cancelled: bool,
}

impl BatchReport {
    fn count(&mut self, outcome: PublishOutcome) {
        match outcome {
            PublishOutcome::Published => self.published += 1,
            PublishOutcome::Dropped(_) => self.dropped += 1,
            PublishOutcome::SendFailed => self.send_failures += 1,
        }
    }
}

/// Sends every row of a recorded file.
pub struct BatchPublisher {
    endpoint: Arc<dyn EndpointPort>,
    registry: Arc<SubscriptionRegistry>,
    handshake: Arc<Handshake>,
    normalizer: RowNormalizer,
    dataset_column: usize,
    stats: Arc<PipelineStats>,
}

impl BatchPublisher {
    /// Create a publisher reading the dataset value from `dataset_column`.
    #[must_use]
    pub fn new(
        endpoint: Arc<dyn EndpointPort>,
        registry: Arc<SubscriptionRegistry>,
        handshake: Arc<Handshake>,
        normalizer: RowNormalizer,
        dataset_column: usize,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            endpoint,
            registry,
            handshake,
            normalizer,
            dataset_column,
            stats,
        }
    }

    /// Publish every row of the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `BatchError` if the file cannot be opened or read.
    pub async fn publish_file(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, BatchError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|source| BatchError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::info!(path = %path.display(), "Publishing input file");
        self.publish_reader(file, cancel).await
    }

    /// Publish every row read from `reader`.
    ///
    /// # Errors
    ///
    /// Returns `BatchError::Read` on an I/O failure. Rows that are not valid
    /// UTF-8 are dropped like any other malformed row.
    pub async fn publish_reader<R>(
        &self,
        reader: R,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, BatchError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut csv_reader = AsyncReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .create_reader(reader);
        let mut records = csv_reader.records();
        let mut report = BatchReport::default();

        while let Some(record) = records.next().await {
            if cancel.is_cancelled() {
                tracing::info!(rows = report.rows, "Batch publishing cancelled");
                report.cancelled = true;
                break;
            }

            report.rows += 1;
            let record = match record {
                Ok(record) => record,
                Err(e) if matches!(e.kind(), CsvErrorKind::Io(_)) => {
                    tracing::error!(row = report.rows, error = %e, "Input read failed");
                    return Err(e.into());
                }
                Err(e) => {
                    tracing::warn!(row = report.rows, error = %e, "Dropping unreadable row");
                    self.stats.record_received();
                    self.stats.record_dropped(DropReason::Malformed);
                    report.count(PublishOutcome::Dropped(DropReason::Malformed));
                    continue;
                }
            };

            let outcome = self.publish_row(report.rows, &record).await;
            report.count(outcome);
        }

        tracing::info!(
            rows = report.rows,
            published = report.published,
            dropped = report.dropped,
            send_failures = report.send_failures,
            "Batch publishing finished"
        );
        Ok(report)
    }

    async fn publish_row(&self, row_number: u64, record: &StringRecord) -> PublishOutcome {
        let started = Instant::now();
        self.stats.record_received();
        let row: Vec<&str> = record.iter().collect();

        let Some(value) = row.get(self.dataset_column) else {
            tracing::warn!(
                row = row_number,
                column = self.dataset_column,
                "Dropping row without dataset column"
            );
            self.stats.record_dropped(DropReason::Malformed);
            return PublishOutcome::Dropped(DropReason::Malformed);
        };

        let Some(dataset) = self.registry.resolve(value) else {
            tracing::trace!(row = row_number, value = %value, "Dropping row for unmapped value");
            self.stats.record_dropped(DropReason::Unmapped);
            return PublishOutcome::Dropped(DropReason::Unmapped);
        };

        if !self.handshake.may_send(dataset) {
            tracing::debug!(row = row_number, dataset = %dataset, "Dropping row for dataset without publish permission");
            self.stats.record_dropped(DropReason::NotPermitted);
            return PublishOutcome::Dropped(DropReason::NotPermitted);
        }

        let document = match self
            .normalizer
            .normalize(dataset, &row, self.registry.fields())
        {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!(row = row_number, error = %e, "Dropping malformed row");
                self.stats.record_dropped(DropReason::Malformed);
                return PublishOutcome::Dropped(DropReason::Malformed);
            }
        };

        send_document(self.endpoint.as_ref(), &self.stats, &document, started).await
    }
}

// =============================================================================
// Tests
// =============================================================================
