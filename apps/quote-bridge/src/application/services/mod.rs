//! Application Services
//!
//! The ingestion-to-publish pipeline and the handshake that gates it.
//!
//! - `queue`: Unbounded tick hand-off from feed to worker
//! - `worker`: Live-mode publish loop
//! - `batch`: File-mode publish pass
//! - `controller`: Login / permission / disposal state machine
//! - `bridge`: Per-mode wiring of the above

pub mod batch;
pub mod bridge;
pub mod controller;
pub mod queue;
pub mod stats;
pub mod worker;

pub use batch::{BatchError, BatchPublisher, BatchReport};
pub use bridge::{BridgeError, FileBridge, LiveBridge};
pub use controller::{BridgeMode, ControllerSettings, FeedTarget, HandshakeController};
pub use queue::{Take, TickConsumer, TickProducer, ingestion_queue};
pub use stats::{PipelineStats, StatsSnapshot};
pub use worker::{PublishOutcome, PublishWorker};
