//! Publish Worker
//!
//! Single consumer of the ingestion queue (live mode). For each tick:
//! resolve the dataset, check its publish permission, normalize, send.
//! Every failure is per-tick; the loop only ends on cancellation or when
//! the queue closes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::queue::{Take, TickConsumer};
use super::stats::PipelineStats;
use crate::application::ports::EndpointPort;
use crate::domain::handshake::Handshake;
use crate::domain::quote::{LiveNormalizer, QuoteDocument, RawTick};
use crate::domain::subscription::SubscriptionRegistry;
use crate::domain::timestamp::TimestampState;
use crate::infrastructure::metrics::DropReason;

/// What happened to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Sent to the endpoint.
    Published,
    /// Dropped before sending.
    Dropped(DropReason),
    /// The endpoint rejected the send.
    SendFailed,
}

/// Serialize and send one document, recording the outcome.
pub(super) async fn send_document(
    endpoint: &dyn EndpointPort,
    stats: &PipelineStats,
    document: &QuoteDocument,
    started: Instant,
) -> PublishOutcome {
    let json = match document.to_json() {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(dataset = %document.dataset, error = %e, "Failed to serialize quote document");
            stats.record_dropped(DropReason::Malformed);
            return PublishOutcome::Dropped(DropReason::Malformed);
        }
    };

    match endpoint.send(&document.dataset, &json).await {
        Ok(()) => {
            tracing::debug!(dataset = %document.dataset, document = %json, "Published quote");
            stats.record_published(&document.dataset, started.elapsed());
            PublishOutcome::Published
        }
        Err(e) => {
            tracing::error!(dataset = %document.dataset, error = %e, "Failed to publish quote");
            stats.record_send_failure();
            PublishOutcome::SendFailed
        }
    }
}

/// Drains the ingestion queue into the endpoint.
pub struct PublishWorker {
    endpoint: Arc<dyn EndpointPort>,
    registry: Arc<SubscriptionRegistry>,
    handshake: Arc<Handshake>,
    normalizer: LiveNormalizer,
    stats: Arc<PipelineStats>,
    poll_interval: Duration,
    state: TimestampState,
}

impl PublishWorker {
    /// Create a worker with fresh timestamp state.
    #[must_use]
    pub fn new(
        endpoint: Arc<dyn EndpointPort>,
        registry: Arc<SubscriptionRegistry>,
        handshake: Arc<Handshake>,
        normalizer: LiveNormalizer,
        stats: Arc<PipelineStats>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            endpoint,
            registry,
            handshake,
            normalizer,
            stats,
            poll_interval,
            state: TimestampState::new(),
        }
    }

    /// Take ticks until cancelled or every producer is gone.
    pub async fn run(mut self, mut queue: TickConsumer, cancel: CancellationToken) {
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis(),
            "Publish worker started"
        );

        loop {
            let take = tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Publish worker cancelled");
                    break;
                }
                take = queue.take(self.poll_interval) => take,
            };

            match take {
                Take::Tick(tick) => match self.process(&tick).await {
                    PublishOutcome::Published => {}
                    PublishOutcome::Dropped(reason) => tracing::trace!(
                        source_key = %tick.source_key,
                        reason = reason.as_str(),
                        "Tick dropped"
                    ),
                    PublishOutcome::SendFailed => tracing::trace!(
                        source_key = %tick.source_key,
                        "Tick lost to a failed send"
                    ),
                },
                Take::Idle => tracing::trace!("Ingestion queue idle"),
                Take::Closed => {
                    tracing::info!("Ingestion queue closed");
                    break;
                }
            }
        }
    }

    /// Handle one tick.
    pub async fn process(&mut self, tick: &RawTick) -> PublishOutcome {
        let started = Instant::now();
        self.stats.record_received();

        let Some(dataset) = self.registry.resolve(&tick.source_key) else {
            tracing::trace!(source_key = %tick.source_key, "Dropping tick for unmapped key");
            self.stats.record_dropped(DropReason::Unmapped);
            return PublishOutcome::Dropped(DropReason::Unmapped);
        };

        if !self.handshake.may_send(dataset) {
            tracing::debug!(
                source_key = %tick.source_key,
                dataset = %dataset,
                "Dropping tick for dataset without publish permission"
            );
            self.stats.record_dropped(DropReason::NotPermitted);
            return PublishOutcome::Dropped(DropReason::NotPermitted);
        }

        let document = match self.normalizer.normalize(dataset, tick, &mut self.state) {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!(
                    source_key = %tick.source_key,
                    payload = %tick.payload,
                    error = %e,
                    "Dropping malformed tick"
                );
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{MockEndpointPort, TransportError};
    use crate::application::services::queue::ingestion_queue;
    use crate::domain::handshake::HandshakeState;
    use crate::domain::subscription::DatasetId;
    use crate::domain::timestamp::OffsetPolicy;

    fn registry() -> Arc<SubscriptionRegistry> {
        let mut registry = SubscriptionRegistry::new();
        registry.register("EURUSD", "DS1");
        registry.register("GBPUSD", "DS2");
        Arc::new(registry)
    }

    fn granted(datasets: &[&str]) -> Arc<Handshake> {
        let handshake = Handshake::new(registry().datasets());
        handshake.advance(HandshakeState::LoggedIn).unwrap();
        for ds in datasets {
            handshake.grant(&DatasetId::new(*ds)).unwrap();
        }
        Arc::new(handshake)
    }

    fn worker(endpoint: MockEndpointPort, handshake: Arc<Handshake>) -> PublishWorker {
        PublishWorker::new(
            Arc::new(endpoint),
            registry(),
            handshake,
            LiveNormalizer::new("fx", OffsetPolicy::default()),
            Arc::new(PipelineStats::new()),
            Duration::from_millis(20),
        )
    }

    fn tick(key: &str, payload: &str) -> RawTick {
        RawTick {
            received_at: 1_000,
            source_key: key.to_string(),
            payload: payload.to_string(),
        }
    }

    #[tokio::test]
    async fn publishes_mapped_and_granted_tick() {
        let mut endpoint = MockEndpointPort::new();
        endpoint
            .expect_send()
            .withf(|dataset, document| {
                dataset.as_str() == "DS1"
                    && document.contains(r#""bidPrice":1.1000"#)
                    && document.contains(r#""spread":0.0002"#)
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let mut worker = worker(endpoint, granted(&["DS1"]));
        let outcome = worker
            .process(&tick("EURUSD", "2024/01/01 12:00:00 1.1000 1.1002"))
            .await;

        assert_eq!(outcome, PublishOutcome::Published);
        assert_eq!(worker.stats.snapshot().published, 1);
    }

    #[tokio::test]
    async fn unmapped_key_is_dropped_without_send() {
        let mut endpoint = MockEndpointPort::new();
        endpoint.expect_send().never();

        let mut worker = worker(endpoint, granted(&["DS1", "DS2"]));
        let outcome = worker
            .process(&tick("USDJPY", "2024/01/01 12:00:00 150 150.1"))
            .await;

        assert_eq!(outcome, PublishOutcome::Dropped(DropReason::Unmapped));
        assert_eq!(worker.stats.snapshot().dropped_unmapped, 1);
    }

    #[tokio::test]
    async fn ungranted_dataset_is_never_sent() {
        let mut endpoint = MockEndpointPort::new();
        endpoint.expect_send().never();

        let mut worker = worker(endpoint, granted(&["DS1"]));
        let outcome = worker
            .process(&tick("GBPUSD", "2024/01/01 12:00:00 1.27 1.28"))
            .await;

        assert_eq!(outcome, PublishOutcome::Dropped(DropReason::NotPermitted));
    }

    #[tokio::test]
    async fn malformed_tick_does_not_stop_later_ticks() {
        let mut endpoint = MockEndpointPort::new();
        endpoint.expect_send().times(1).returning(|_, _| Ok(()));

        let mut worker = worker(endpoint, granted(&["DS1"]));
        assert_eq!(
            worker.process(&tick("EURUSD", "garbage")).await,
            PublishOutcome::Dropped(DropReason::Malformed)
        );
        assert_eq!(
            worker
                .process(&tick("EURUSD", "2024/01/01 12:00:00 1.1 1.2"))
                .await,
            PublishOutcome::Published
        );
    }

    #[tokio::test]
    async fn send_failure_is_reported_and_counted() {
        let mut endpoint = MockEndpointPort::new();
        endpoint
            .expect_send()
            .returning(|_, _| Err(TransportError::Send("broken pipe".into())));

        let mut worker = worker(endpoint, granted(&["DS1"]));
        let outcome = worker
            .process(&tick("EURUSD", "2024/01/01 12:00:00 1.1 1.2"))
            .await;

        assert_eq!(outcome, PublishOutcome::SendFailed);
        assert_eq!(worker.stats.snapshot().send_failures, 1);
    }

    #[tokio::test]
    async fn disposed_handshake_blocks_sends() {
        let mut endpoint = MockEndpointPort::new();
        endpoint.expect_send().never();

        let handshake = granted(&["DS1"]);
        handshake.dispose();
        let mut worker = worker(endpoint, handshake);
        let outcome = worker
            .process(&tick("EURUSD", "2024/01/01 12:00:00 1.1 1.2"))
            .await;

        assert_eq!(outcome, PublishOutcome::Dropped(DropReason::NotPermitted));
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let endpoint = MockEndpointPort::new();
        let worker = worker(endpoint, granted(&[]));
        let (_producer, consumer) = ingestion_queue();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(worker.run(consumer, cancel.clone()));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn run_drains_queue_then_stops_when_closed() {
        let mut endpoint = MockEndpointPort::new();
        endpoint.expect_send().times(2).returning(|_, _| Ok(()));

        let worker = worker(endpoint, granted(&["DS1"]));
        let (producer, consumer) = ingestion_queue();
        producer.push(tick("EURUSD", "2024/01/01 12:00:00 1.1 1.2"));
        producer.push(tick("EURUSD", "2024/01/01 12:00:01 1.1 1.2"));
        drop(producer);

        tokio::time::timeout(
            Duration::from_secs(1),
            worker.run(consumer, CancellationToken::new()),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn run_continues_past_dropped_and_failed_ticks() {
        let mut endpoint = MockEndpointPort::new();
        let mut sends = 0;
        endpoint.expect_send().times(2).returning(move |_, _| {
            sends += 1;
            if sends == 1 {
                Err(TransportError::Send("broken pipe".into()))
            } else {
                Ok(())
            }
        });

        let worker = worker(endpoint, granted(&["DS1"]));
        let stats = Arc::clone(&worker.stats);
        let (producer, consumer) = ingestion_queue();
        producer.push(tick("EURUSD", "garbage"));
        producer.push(tick("USDJPY", "2024/01/01 12:00:00 150 150.1"));
        producer.push(tick("EURUSD", "2024/01/01 12:00:00 1.1 1.2"));
        producer.push(tick("EURUSD", "2024/01/01 12:00:01 1.1 1.2"));
        drop(producer);

        tokio::time::timeout(
            Duration::from_secs(1),
            worker.run(consumer, CancellationToken::new()),
        )
        .await
        .unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.received, 4);
        assert_eq!(snapshot.dropped_malformed, 1);
        assert_eq!(snapshot.dropped_unmapped, 1);
        assert_eq!(snapshot.send_failures, 1);
        assert_eq!(snapshot.published, 1);
    }
}
