//! Feed Port (Driven Port)
//!
//! Interface to the live advisory feed. Ticks do not pass through this
//! trait: adapters push them straight into the ingestion queue so the
//! delivery path never waits on the publisher.

use async_trait::async_trait;

/// Feed command error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// No connection is held.
    #[error("feed is not connected")]
    NotConnected,

    /// Writing a command failed.
    #[error("feed I/O error: {0}")]
    Io(String),
}

/// Collaborator unreachable at startup. Fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// Advisory feed could not be reached.
    #[error("failed to connect to feed at {addr}: {reason}")]
    Feed {
        /// Address attempted.
        addr: String,
        /// Underlying error.
        reason: String,
    },

    /// Endpoint could not be reached.
    #[error("failed to connect to endpoint at {url}: {reason}")]
    Endpoint {
        /// URL attempted.
        url: String,
        /// Underlying error.
        reason: String,
    },
}

/// Inbound notification from the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// The feed dropped the connection.
    Disconnected {
        /// What ended the connection.
        reason: String,
    },
}

/// Port for controlling the advisory feed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedPort: Send + Sync {
    /// Open the feed on `channel`/`topic`.
    async fn connect(&self, channel: &str, topic: &str) -> Result<(), ConnectError>;

    /// Start advisory updates for `source_key`.
    async fn start_subscription(&self, source_key: &str) -> Result<(), FeedError>;

    /// Release the feed connection.
    async fn disconnect(&self) -> Result<(), FeedError>;
}
