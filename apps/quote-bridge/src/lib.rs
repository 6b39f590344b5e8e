#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Quote Bridge - Market Quote Publisher
//!
//! Forwards market quotes to a remote publish/subscribe endpoint, one
//! dataset per source symbol, from either a live advisory feed or a recorded
//! CSV file. Nothing is sent to a dataset before the endpoint has granted
//! publish permission for it.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Pure rules and data types
//!   - `timestamp`: Millisecond synthesis and UTC offset selection
//!   - `quote`: Quote documents, live and file normalizers
//!   - `subscription`: Source key and field routing
//!   - `handshake`: Handshake state machine and publish gate
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Endpoint and feed interfaces
//!   - `services`: Queue, worker, batch publisher, handshake controller
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `endpoint`: WebSocket JSON session to the endpoint
//!   - `feed`: Line-oriented advisory relay client
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!   - `metrics`, `telemetry`: Prometheus and tracing
//!
//! # Data Flow
//!
//! ```text
//! Live:
//!   advisory relay --> FeedClient --> ingestion queue --> PublishWorker --+
//!                                                                         |
//! File:                                                                   v
//!   CSV file --(all datasets granted)--> BatchPublisher -------> EndpointClient --> endpoint
//!                                                                         ^
//!   HandshakeController: login --> publish requests --> grants -----------+
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Quote and handshake rules with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::handshake::{Handshake, HandshakeState, PermissionStatus, PublishGate};
pub use domain::quote::{
    LiveNormalizer, MalformedRecordError, QuoteDocument, RawTick, RowNormalizer,
};
pub use domain::subscription::{DatasetId, FieldMapping, Subscription, SubscriptionRegistry};
pub use domain::timestamp::{OffsetPolicy, TimestampState, reconstruct};

// Ports (for integration tests)
pub use application::ports::{
    ConnectError, EndpointEvent, EndpointPort, FeedError, FeedEvent, FeedPort, TransportError,
};

// Services
pub use application::services::{
    BatchPublisher, BatchReport, BridgeError, BridgeMode, ControllerSettings, FeedTarget,
    FileBridge, HandshakeController, LiveBridge, PipelineStats, PublishWorker, ingestion_queue,
};

// Infrastructure config
pub use infrastructure::config::{BridgeConfig, ConfigError, Credentials};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
