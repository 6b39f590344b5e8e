//! Ingestion Queue
//!
//! Unbounded FIFO between the feed reader (producer) and the publish worker
//! (single consumer). `push` never blocks, so the feed's delivery path stays
//! fast however slow publishing gets.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::domain::quote::RawTick;
use crate::infrastructure::metrics;

/// Create a connected producer/consumer pair.
#[must_use]
pub fn ingestion_queue() -> (TickProducer, TickConsumer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        TickProducer {
            tx,
            depth: Arc::clone(&depth),
        },
        TickConsumer { rx, depth },
    )
}

/// Producer side. Cheap to clone; one per feed reader.
#[derive(Debug, Clone)]
pub struct TickProducer {
    tx: mpsc::UnboundedSender<RawTick>,
    depth: Arc<AtomicUsize>,
}

impl TickProducer {
    /// Enqueue a tick. Returns `false` if the consumer is gone.
    pub fn push(&self, tick: RawTick) -> bool {
        // Counted before the send so the consumer never sees depth go below zero.
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        if self.tx.send(tick).is_err() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
            return false;
        }
        metrics::record_tick_received();
        metrics::set_queue_depth(depth);
        true
    }

    /// Ticks currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of one bounded wait on the queue.
#[derive(Debug, PartialEq, Eq)]
pub enum Take {
    /// Next tick in arrival order.
    Tick(RawTick),
    /// Nothing arrived within the wait.
    Idle,
    /// Every producer is gone and the queue is drained.
    Closed,
}

/// Consumer side, owned by the publish worker.
#[derive(Debug)]
pub struct TickConsumer {
    rx: mpsc::UnboundedReceiver<RawTick>,
    depth: Arc<AtomicUsize>,
}

impl TickConsumer {
    /// Wait up to `wait` for the next tick.
    pub async fn take(&mut self, wait: Duration) -> Take {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(tick)) => {
                let depth = self.depth.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
                metrics::set_queue_depth(depth);
                Take::Tick(tick)
            }
            Ok(None) => Take::Closed,
            Err(_) => Take::Idle,
        }
    }
}
