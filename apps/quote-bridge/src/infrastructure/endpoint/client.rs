//! Endpoint WebSocket Client
//!
//! One WebSocket session to the publish/subscribe endpoint. Outbound frames
//! go through an unbounded channel to a writer task; a reader task matches
//! replies to pending requests and forwards them as [`EndpointEvent`]s.
//!
//! There is no reconnect: when the socket closes the client emits a
//! `Session` event and every later call fails with `NotConnected`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use serde_json::value::RawValue;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::messages::{InboundFrame, OutboundFrame};
use crate::application::ports::{ConnectError, EndpointEvent, EndpointPort, TransportError};
use crate::domain::subscription::DatasetId;

/// How long `logout` waits for the logout and close frames to reach the socket.
const LOGOUT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Configuration
// =============================================================================

/// Endpoint connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointClientConfig {
    /// WebSocket URL (`ws://` or `wss://`).
    pub url: String,
    /// Tenant / message VPN sent at login.
    pub vpn: String,
}

/// Request awaiting its reply.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingRequest {
    Login,
    Permission(DatasetId),
}

// =============================================================================
// Client
// =============================================================================

/// WebSocket session to the endpoint.
pub struct EndpointClient {
    config: EndpointClientConfig,
    outbound: mpsc::UnboundedSender<Message>,
    pending: Mutex<HashMap<String, PendingRequest>>,
    events: mpsc::Sender<EndpointEvent>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl EndpointClient {
    /// Open the session and start the reader and writer tasks.
    ///
    /// # Errors
    ///
    /// Returns `ConnectError::Endpoint` if the WebSocket handshake fails.
    pub async fn connect(
        config: EndpointClientConfig,
        events: mpsc::Sender<EndpointEvent>,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>, ConnectError> {
        tracing::info!(url = %config.url, "Connecting to endpoint");
        let (ws_stream, _response) = tokio_tungstenite::connect_async(&config.url)
            .await
            .map_err(|e| ConnectError::Endpoint {
                url: config.url.clone(),
                reason: e.to_string(),
            })?;
        tracing::info!(url = %config.url, "Endpoint session open");

        let (write, read) = ws_stream.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(write, outbound_rx, cancel.clone()));
        let client = Arc::new(Self::new(config, outbound, events, Some(writer)));

        tokio::spawn(Arc::clone(&client).read_loop(read, cancel));

        Ok(client)
    }

    fn new(
        config: EndpointClientConfig,
        outbound: mpsc::UnboundedSender<Message>,
        events: mpsc::Sender<EndpointEvent>,
        writer: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            config,
            outbound,
            pending: Mutex::new(HashMap::new()),
            events,
            writer: Mutex::new(writer),
        }
    }

    /// Wait for the writer task to drain its queue and close the socket.
    async fn flush_writer(&self) -> Result<(), TransportError> {
        let Some(writer) = self.writer.lock().take() else {
            return Ok(());
        };
        match tokio::time::timeout(LOGOUT_FLUSH_TIMEOUT, writer).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::Send(format!("writer task failed: {e}"))),
            Err(_) => Err(TransportError::Send(format!(
                "logout not flushed within {}s",
                LOGOUT_FLUSH_TIMEOUT.as_secs()
            ))),
        }
    }

    /// Read frames until the socket closes or the token is cancelled.
    async fn read_loop<S>(self: Arc<Self>, mut read: S, cancel: CancellationToken)
    where
        S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        let reason = loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        let event = self.route(&text);
                        if self.events.send(event).await.is_err() {
                            tracing::debug!("Endpoint event receiver dropped");
                            return;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = self.outbound.send(Message::Pong(data));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "Endpoint sent close frame");
                        break "closed by endpoint".to_string();
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Endpoint read failed");
                        break e.to_string();
                    }
                    None => {
                        tracing::info!("Endpoint stream ended");
                        break "stream ended".to_string();
                    }
                }
            }
        };

        let body = serde_json::json!({ "event": "closed", "reason": reason }).to_string();
        let _ = self.events.send(EndpointEvent::Session { body }).await;
    }

    /// Turn an inbound text frame into an event, consuming its pending request.
    fn route(&self, text: &str) -> EndpointEvent {
        let body = text.to_string();
        let pending = InboundFrame::parse(text)
            .request_id
            .and_then(|id| self.pending.lock().remove(&id));

        match pending {
            Some(PendingRequest::Login) => EndpointEvent::LoginResponse { body },
            Some(PendingRequest::Permission(dataset)) => {
                EndpointEvent::PermissionResponse { dataset, body }
            }
            None => EndpointEvent::Session { body },
        }
    }

    fn send_frame(&self, frame: &OutboundFrame<'_>) -> Result<(), TransportError> {
        let json = frame
            .to_json()
            .map_err(|e| TransportError::Encode(e.to_string()))?;
        self.outbound
            .send(Message::Text(json.into()))
            .map_err(|_| TransportError::NotConnected)
    }

    /// Register a request and return its correlation id.
    fn track(&self, request: PendingRequest) -> String {
        let request_id = Uuid::new_v4().to_string();
        self.pending.lock().insert(request_id.clone(), request);
        request_id
    }

    /// Send a tracked request, forgetting it if the send fails.
    fn send_tracked(&self, request_id: &str, frame: &OutboundFrame<'_>) -> Result<(), TransportError> {
        let result = self.send_frame(frame);
        if result.is_err() {
            self.pending.lock().remove(request_id);
        }
        result
    }

    /// Requests still awaiting a reply.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }
}

#[async_trait]
impl EndpointPort for EndpointClient {
    async fn login(&self, user: &str, password: &str) -> Result<(), TransportError> {
        let request_id = self.track(PendingRequest::Login);
        let frame = OutboundFrame::Login {
            request_id: &request_id,
            vpn: &self.config.vpn,
            user,
            password,
        };
        self.send_tracked(&request_id, &frame)
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.send_frame(&OutboundFrame::Logout)?;
        self.outbound
            .send(Message::Close(None))
            .map_err(|_| TransportError::NotConnected)?;
        self.flush_writer().await
    }

    async fn request_publish_permission(
        &self,
        dataset: &DatasetId,
    ) -> Result<(), TransportError> {
        let request_id = self.track(PendingRequest::Permission(dataset.clone()));
        let frame = OutboundFrame::PublishRequest {
            request_id: &request_id,
            dataset: dataset.as_str(),
        };
        self.send_tracked(&request_id, &frame)
    }

    async fn send(&self, dataset: &DatasetId, document: &str) -> Result<(), TransportError> {
        let data = RawValue::from_string(document.to_string())
            .map_err(|e| TransportError::Encode(e.to_string()))?;
        self.send_frame(&OutboundFrame::Publish {
            dataset: dataset.as_str(),
            data: &data,
        })
    }
}

/// Forward queued frames to the socket until the queue closes or a close
/// frame goes out.
async fn write_loop<W>(
    mut write: W,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
) where
    W: Sink<Message> + Unpin,
    W::Error: std::fmt::Display,
{
    loop {
        // Queued frames (logout, close) go out before cancellation is honoured.
        let message = tokio::select! {
            biased;
            message = outbound.recv() => message,
            () = cancel.cancelled() => None,
        };
        let Some(message) = message else {
            break;
        };

        let closing = matches!(message, Message::Close(_));
        if let Err(e) = write.send(message).await {
            tracing::error!(error = %e, "Endpoint write failed");
            break;
        }
        if closing {
            break;
        }
    }
    outbound.close();
    let _ = write.close().await;
}

// =============================================================================
// Tests
// =============================================================================
