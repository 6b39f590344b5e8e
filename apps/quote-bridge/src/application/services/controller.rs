//! Handshake Controller
//!
//! Drives the bridge through feed connect, endpoint login, per-dataset
//! publish permission and disposal.
//!
//! # Flow
//!
//! 1. `start`: connect the feed (live, when enabled), then send the login.
//! 2. Login acknowledged: one permission request per distinct dataset.
//! 3. Permission granted:
//!    - live: start advisory updates for every source key of that dataset;
//!    - file: once *every* dataset is granted, release the batch barrier.
//! 4. `dispose`: log out, release the feed, cancel the shared token.
//!
//! Endpoint and feed notifications arrive on channels and are handled one
//! at a time by [`HandshakeController::run_events`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    ConnectError, EndpointEvent, EndpointPort, FeedEvent, FeedPort, ResponseStatus,
};
use crate::domain::handshake::{Handshake, HandshakeState};
use crate::domain::subscription::{DatasetId, SubscriptionRegistry};
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Ingestion mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BridgeMode {
    /// Advisory feed, one subscription per granted dataset.
    #[default]
    Live,
    /// Recorded file, sent once every dataset is granted.
    File,
}

impl BridgeMode {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::File => "file",
        }
    }
}

/// Advisory feed channel and topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedTarget {
    /// Advisory channel (service) name.
    pub channel: String,
    /// Advisory topic.
    pub topic: String,
}

/// Controller settings.
#[derive(Clone)]
pub struct ControllerSettings {
    /// Ingestion mode.
    pub mode: BridgeMode,
    /// Endpoint login user.
    pub user: String,
    /// Endpoint login password.
    pub password: String,
    /// Feed to connect in live mode. `None` when the feed capability is off.
    pub feed: Option<FeedTarget>,
    /// Liveness log interval while supervising.
    pub supervisor_interval: Duration,
}

impl std::fmt::Debug for ControllerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerSettings")
            .field("mode", &self.mode)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("feed", &self.feed)
            .field("supervisor_interval", &self.supervisor_interval)
            .finish()
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Drives the login / permission / publish handshake.
pub struct HandshakeController {
    settings: ControllerSettings,
    endpoint: Arc<dyn EndpointPort>,
    feed: Option<Arc<dyn FeedPort>>,
    registry: Arc<SubscriptionRegistry>,
    handshake: Arc<Handshake>,
    cancel: CancellationToken,
    batch_barrier: Mutex<Option<oneshot::Sender<()>>>,
}

impl HandshakeController {
    /// Create a controller. `feed` is ignored in file mode.
    #[must_use]
    pub fn new(
        settings: ControllerSettings,
        endpoint: Arc<dyn EndpointPort>,
        feed: Option<Arc<dyn FeedPort>>,
        registry: Arc<SubscriptionRegistry>,
        handshake: Arc<Handshake>,
        cancel: CancellationToken,
    ) -> Self {
        let feed = match settings.mode {
            BridgeMode::Live => feed,
            BridgeMode::File => None,
        };
        Self {
            settings,
            endpoint,
            feed,
            registry,
            handshake,
            cancel,
            batch_barrier: Mutex::new(None),
        }
    }

    /// Shared handshake state.
    #[must_use]
    pub fn handshake(&self) -> &Arc<Handshake> {
        &self.handshake
    }

    /// Shutdown token cancelled on disposal.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Barrier released once every dataset is granted (file mode).
    ///
    /// A new call replaces the previous barrier; the old receiver then sees
    /// a closed channel.
    pub fn batch_barrier(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        *self.batch_barrier.lock() = Some(tx);
        rx
    }

    /// Connect the feed (live mode, when present), then send the login.
    ///
    /// A failed login request is logged and leaves the handshake stalled.
    ///
    /// # Errors
    ///
    /// Returns `ConnectError` if the feed cannot be reached.
    pub async fn start(&self) -> Result<(), ConnectError> {
        if let (Some(feed), Some(target)) = (&self.feed, &self.settings.feed) {
            feed.connect(&target.channel, &target.topic).await?;
            self.transition(HandshakeState::FeedConnected);
            tracing::info!(channel = %target.channel, topic = %target.topic, "Feed connected");
        } else if self.settings.mode == BridgeMode::Live {
            tracing::warn!("Feed capability disabled, running without advisory feed");
        }

        tracing::info!(user = %self.settings.user, "Logging in to endpoint");
        if let Err(e) = self
            .endpoint
            .login(&self.settings.user, &self.settings.password)
            .await
        {
            tracing::error!(error = %e, "Login request failed, handshake stalled until restart");
        }
        Ok(())
    }

    /// Handle endpoint and feed notifications until cancelled.
    pub async fn run_events(
        &self,
        mut endpoint_events: mpsc::Receiver<EndpointEvent>,
        mut feed_events: mpsc::Receiver<FeedEvent>,
    ) {
        let mut feed_open = true;
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                event = endpoint_events.recv() => match event {
                    Some(event) => self.handle_endpoint_event(event).await,
                    None => {
                        tracing::debug!("Endpoint event channel closed");
                        break;
                    }
                },
                event = feed_events.recv(), if feed_open => match event {
                    Some(event) => self.handle_feed_event(event).await,
                    None => feed_open = false,
                },
            }
        }
    }

    /// Apply one endpoint notification.
    pub async fn handle_endpoint_event(&self, event: EndpointEvent) {
        match event {
            EndpointEvent::LoginResponse { body } => self.on_login_response(&body).await,
            EndpointEvent::PermissionResponse { dataset, body } => {
                self.on_permission_response(&dataset, &body).await;
            }
            EndpointEvent::Session { body } => {
                tracing::info!(event = %body, "Endpoint session event");
            }
        }
    }

    /// Apply one feed notification.
    pub async fn handle_feed_event(&self, event: FeedEvent) {
        match event {
            FeedEvent::Disconnected { reason } => {
                tracing::warn!(reason = %reason, "Feed disconnected, shutting down");
                self.dispose().await;
            }
        }
    }

    async fn on_login_response(&self, body: &str) {
        let status = ResponseStatus::parse(body);
        if !status.is_login_accepted() {
            tracing::error!(response = %body, "Login rejected, handshake stalled until restart");
            return;
        }

        if let Err(e) = self.handshake.advance(HandshakeState::LoggedIn) {
            tracing::warn!(error = %e, "Ignoring login response");
            return;
        }
        metrics::set_handshake_state(HandshakeState::LoggedIn);
        tracing::info!(user = %self.settings.user, "Logged in to endpoint");

        for dataset in self.registry.datasets() {
            self.request_permission(&dataset).await;
        }
    }

    async fn request_permission(&self, dataset: &DatasetId) {
        tracing::info!(dataset = %dataset, "Requesting publish permission");
        if let Err(e) = self.endpoint.request_publish_permission(dataset).await {
            tracing::error!(
                dataset = %dataset,
                error = %e,
                "Publish permission request failed, dataset stays unpublished"
            );
            self.handshake.gate().deny(dataset);
        }
    }

    async fn on_permission_response(&self, dataset: &DatasetId, body: &str) {
        let status = ResponseStatus::parse(body);
        if !status.is_grant() {
            tracing::error!(dataset = %dataset, response = %body, "Publish permission refused");
            self.handshake.gate().deny(dataset);
            return;
        }

        match self.handshake.grant(dataset) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(dataset = %dataset, "Ignoring repeated or unknown permission grant");
                return;
            }
            Err(e) => {
                tracing::warn!(dataset = %dataset, error = %e, "Ignoring permission grant");
                return;
            }
        }
        metrics::record_permission_granted();
        metrics::set_handshake_state(HandshakeState::Publishing);
        tracing::info!(
            dataset = %dataset,
            granted = self.handshake.gate().granted_count(),
            total = self.handshake.gate().len(),
            "Publish permission granted"
        );

        match self.settings.mode {
            BridgeMode::Live => self.start_subscriptions(dataset).await,
            BridgeMode::File => {
                if self.handshake.gate().all_granted() {
                    self.release_batch();
                }
            }
        }
    }

    async fn start_subscriptions(&self, dataset: &DatasetId) {
        let Some(feed) = &self.feed else {
            tracing::debug!(dataset = %dataset, "No feed, skipping advisory subscriptions");
            return;
        };

        for key in self.registry.source_keys_for(dataset) {
            match feed.start_subscription(&key).await {
                Ok(()) => tracing::info!(source_key = %key, dataset = %dataset, "Advisory subscription started"),
                Err(e) => tracing::error!(source_key = %key, error = %e, "Failed to start advisory subscription"),
            }
        }
    }

    fn release_batch(&self) {
        if let Some(tx) = self.batch_barrier.lock().take() {
            tracing::info!("All datasets granted, starting batch publish");
            let _ = tx.send(());
        }
    }

    fn transition(&self, next: HandshakeState) {
        match self.handshake.advance(next) {
            Ok(_) => metrics::set_handshake_state(next),
            Err(e) => tracing::warn!(error = %e, "Skipped handshake transition"),
        }
    }

    /// Shut down: log out, release the feed, cancel the shared token.
    ///
    /// Only the first call does anything.
    pub async fn dispose(&self) {
        let previous = self.handshake.state();
        if !self.handshake.dispose() {
            return;
        }
        metrics::set_handshake_state(HandshakeState::Disposed);
        tracing::info!(from = %previous, "Disposing bridge");

        if let Err(e) = self.endpoint.logout().await {
            tracing::error!(error = %e, "Endpoint logout failed");
        }
        if let Some(feed) = &self.feed
            && let Err(e) = feed.disconnect().await
        {
            tracing::warn!(error = %e, "Feed disconnect failed");
        }
        self.cancel.cancel();
        tracing::info!("Bridge disposed");
    }

    /// Block until disposed, logging liveness every supervisor interval.
    pub async fn supervise(&self) {
        let interval = self.settings.supervisor_interval;
        loop {
            if tokio::time::timeout(interval, self.cancel.cancelled())
                .await
                .is_ok()
            {
                break;
            }
            tracing::info!(
                state = %self.handshake.state(),
                granted = self.handshake.gate().granted_count(),
                total = self.handshake.gate().len(),
                "Bridge running"
            );
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
