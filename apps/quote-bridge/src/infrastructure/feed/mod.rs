//! Advisory Feed Adapter
//!
//! TCP client for a line-oriented advisory relay sitting in front of the
//! quote terminal.
//!
//! # Protocol
//!
//! Client to relay, one command per line:
//!
//! ```text
//! CONNECT <channel> <topic>
//! ADVISE <source_key>
//! DISCONNECT
//! ```
//!
//! Relay to client, one update per line:
//!
//! ```text
//! <source_key> <date> <time> <bid> <ask>
//! ```
//!
//! Every update is stamped with its arrival time and pushed straight into the
//! ingestion queue. EOF or a read error raises `FeedEvent::Disconnected`.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{ConnectError, FeedError, FeedEvent, FeedPort};
use crate::application::services::queue::TickProducer;
use crate::domain::quote::RawTick;

/// Longest accepted relay line.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

// =============================================================================
// Configuration
// =============================================================================

/// Relay connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedClientConfig {
    /// Relay address (`host:port`).
    pub addr: String,
    /// Give up connecting after this long.
    pub connect_timeout: Duration,
}

impl FeedClientConfig {
    /// Settings for `addr` with a 5 second connect timeout.
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

struct Connection {
    writer: FramedWrite<OwnedWriteHalf, LinesCodec>,
    reader_cancel: CancellationToken,
}

// =============================================================================
// Client
// =============================================================================

/// Advisory relay client.
pub struct FeedClient {
    config: FeedClientConfig,
    ticks: TickProducer,
    events: mpsc::Sender<FeedEvent>,
    cancel: CancellationToken,
    connection: Mutex<Option<Connection>>,
}

impl FeedClient {
    /// Create a disconnected client feeding `ticks`.
    #[must_use]
    pub fn new(
        config: FeedClientConfig,
        ticks: TickProducer,
        events: mpsc::Sender<FeedEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            ticks,
            events,
            cancel,
            connection: Mutex::new(None),
        }
    }

    async fn command(&self, line: String) -> Result<(), FeedError> {
        let mut connection = self.connection.lock().await;
        let connection = connection.as_mut().ok_or(FeedError::NotConnected)?;
        connection
            .writer
            .send(line)
            .await
            .map_err(|e| FeedError::Io(e.to_string()))
    }
}

#[async_trait]
impl FeedPort for FeedClient {
    async fn connect(&self, channel: &str, topic: &str) -> Result<(), ConnectError> {
        let addr = self.config.addr.clone();
        let failed = |reason: String| ConnectError::Feed {
            addr: addr.clone(),
            reason,
        };

        tracing::info!(addr = %self.config.addr, channel, topic, "Connecting to advisory feed");
        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(&self.config.addr),
        )
        .await
        .map_err(|_| failed("connect timed out".to_string()))?
        .map_err(|e| failed(e.to_string()))?;
        stream.set_nodelay(true).map_err(|e| failed(e.to_string()))?;

        let (read, write) = stream.into_split();
        let mut writer = FramedWrite::new(write, LinesCodec::new());
        writer
            .send(format!("CONNECT {channel} {topic}"))
            .await
            .map_err(|e| failed(e.to_string()))?;

        let reader_cancel = self.cancel.child_token();
        tokio::spawn(read_ticks(
            read,
            self.ticks.clone(),
            self.events.clone(),
            reader_cancel.clone(),
        ));

        *self.connection.lock().await = Some(Connection {
            writer,
            reader_cancel,
        });
        Ok(())
    }

    async fn start_subscription(&self, source_key: &str) -> Result<(), FeedError> {
        self.command(format!("ADVISE {source_key}")).await
    }

    async fn disconnect(&self) -> Result<(), FeedError> {
        let Some(mut connection) = self.connection.lock().await.take() else {
            return Err(FeedError::NotConnected);
        };
        connection.reader_cancel.cancel();

        let sent = connection
            .writer
            .send("DISCONNECT".to_string())
            .await
            .map_err(|e| FeedError::Io(e.to_string()));
        let _ = SinkExt::<String>::close(&mut connection.writer).await;
        tracing::info!(addr = %self.config.addr, "Advisory feed released");
        sent
    }
}

// =============================================================================
// Reader
// =============================================================================

/// Split a relay line into source key and payload.
///
/// Returns `None` for blank lines and lines without a payload.
#[must_use]
pub fn parse_line(line: &str) -> Option<(&str, &str)> {
    let (key, payload) = line.trim().split_once(char::is_whitespace)?;
    let payload = payload.trim_start();
    (!payload.is_empty()).then_some((key, payload))
}

/// Push every relay line into the queue until EOF, error or cancellation.
///
/// EOF and read errors are reported as `FeedEvent::Disconnected`;
/// cancellation is not.
pub async fn read_ticks<R>(
    reader: R,
    ticks: TickProducer,
    events: mpsc::Sender<FeedEvent>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    let reason = loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            line = lines.next() => match line {
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let Some((key, payload)) = parse_line(&line) else {
                        tracing::warn!(line = %line, "Dropping feed line without payload");
                        continue;
                    };
                    if !ticks.push(RawTick::now(key, payload)) {
                        tracing::debug!("Ingestion queue closed, stopping feed reader");
                        return;
                    }
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Advisory feed read failed");
                    break e.to_string();
                }
                None => {
                    tracing::warn!("Advisory feed closed the connection");
                    break "connection closed".to_string();
                }
            }
        }
    };

    let _ = events.send(FeedEvent::Disconnected { reason }).await;
}

// =============================================================================
// Tests
// =============================================================================
