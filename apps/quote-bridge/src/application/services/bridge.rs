//! Bridge runners: wire the controller, worker and batch publisher together
//! for one process run.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::batch::{BatchError, BatchPublisher, BatchReport};
use super::controller::HandshakeController;
use super::queue::TickConsumer;
use super::worker::PublishWorker;
use crate::application::ports::{ConnectError, EndpointEvent, FeedEvent};

/// A run that ended in failure.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// A collaborator was unreachable at startup.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// The input file could not be read.
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// A bridge task panicked.
    #[error("bridge task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Live mode: feed -> queue -> worker -> endpoint.
pub struct LiveBridge {
    /// Handshake controller, shared with the signal handler.
    pub controller: Arc<HandshakeController>,
    /// Queue consumer.
    pub worker: PublishWorker,
    /// Consumer side of the ingestion queue.
    pub ticks: TickConsumer,
    /// Endpoint notifications.
    pub endpoint_events: mpsc::Receiver<EndpointEvent>,
    /// Feed notifications.
    pub feed_events: mpsc::Receiver<FeedEvent>,
}

impl LiveBridge {
    /// Run until disposed.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Connect` if the feed cannot be reached.
    pub async fn run(self) -> Result<(), BridgeError> {
        let Self {
            controller,
            worker,
            ticks,
            endpoint_events,
            feed_events,
        } = self;
        let cancel = controller.cancel_token().clone();

        let worker = tokio::spawn(worker.run(ticks, cancel));
        let events = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.run_events(endpoint_events, feed_events).await })
        };

        if let Err(e) = controller.start().await {
            tracing::error!(error = %e, "Startup failed");
            controller.dispose().await;
            worker.await?;
            events.await?;
            return Err(e.into());
        }

        controller.supervise().await;
        worker.await?;
        events.await?;
        Ok(())
    }
}

/// File mode: barrier on every dataset, then one pass over the file.
pub struct FileBridge {
    /// Handshake controller, shared with the signal handler.
    pub controller: Arc<HandshakeController>,
    /// Row publisher.
    pub publisher: BatchPublisher,
    /// Input file.
    pub path: PathBuf,
    /// Endpoint notifications.
    pub endpoint_events: mpsc::Receiver<EndpointEvent>,
}

impl FileBridge {
    /// Run until the file is sent or the bridge is disposed.
    ///
    /// Returns `None` if shutdown came before every dataset was granted.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Batch` if the input file cannot be read.
    pub async fn run(self) -> Result<Option<BatchReport>, BridgeError> {
        let Self {
            controller,
            publisher,
            path,
            endpoint_events,
        } = self;
        let cancel = controller.cancel_token().clone();
        let barrier = controller.batch_barrier();

        let events = {
            let controller = Arc::clone(&controller);
            let (_feed_tx, feed_events) = mpsc::channel(1);
            tokio::spawn(async move { controller.run_events(endpoint_events, feed_events).await })
        };

        let batch = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                let released = tokio::select! {
                    () = cancel.cancelled() => false,
                    released = barrier => released.is_ok(),
                };
                if !released {
                    return Ok(None);
                }
                let result = publisher.publish_file(&path, &cancel).await;
                controller.dispose().await;
                result.map(Some)
            })
        };

        if let Err(e) = controller.start().await {
            tracing::error!(error = %e, "Startup failed");
            controller.dispose().await;
            return Err(e.into());
        }
        controller.supervise().await;

        let report = batch.await??;
        events.await?;
        Ok(report)
    }
}
