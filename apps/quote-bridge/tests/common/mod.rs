//! Shared fakes for the bridge integration tests.
//!
//! `FakeEndpoint` answers login and permission requests through the event
//! channel the way the real endpoint does, and records every send together
//! with whether the handshake allowed it at that moment.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use quote_bridge::application::services::TickProducer;
use quote_bridge::{
    ConnectError, DatasetId, EndpointEvent, EndpointPort, FeedError, FeedPort, Handshake, RawTick,
    TransportError,
};

/// One call seen by the fake endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Login,
    Permission(DatasetId),
    Send {
        dataset: DatasetId,
        document: String,
        permitted: bool,
        all_granted: bool,
    },
    Logout,
}

pub struct FakeEndpoint {
    events: mpsc::Sender<EndpointEvent>,
    handshake: Arc<Handshake>,
    denied: Vec<DatasetId>,
    permission_delay: Duration,
    calls: Mutex<Vec<Call>>,
}

impl FakeEndpoint {
    pub fn new(events: mpsc::Sender<EndpointEvent>, handshake: Arc<Handshake>) -> Self {
        Self {
            events,
            handshake,
            denied: Vec::new(),
            permission_delay: Duration::from_millis(5),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn deny(mut self, dataset: &str) -> Self {
        self.denied.push(DatasetId::new(dataset));
        self
    }

    pub fn with_permission_delay(mut self, delay: Duration) -> Self {
        self.permission_delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Documents sent, in order.
    pub fn sent(&self) -> Vec<(DatasetId, String)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Send {
                    dataset, document, ..
                } => Some((dataset.clone(), document.clone())),
                _ => None,
            })
            .collect()
    }

    /// Sends made while the dataset was not cleared.
    pub fn premature_sends(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, Call::Send { permitted: false, .. }))
            .count()
    }

    pub fn logged_out(&self) -> bool {
        self.calls.lock().contains(&Call::Logout)
    }
}

#[async_trait]
impl EndpointPort for FakeEndpoint {
    async fn login(&self, _user: &str, _password: &str) -> Result<(), TransportError> {
        self.calls.lock().push(Call::Login);
        let events = self.events.clone();
        tokio::spawn(async move {
            let body = r#"{"requestId":"login","status":"SUCCESS"}"#.to_string();
            let _ = events.send(EndpointEvent::LoginResponse { body }).await;
        });
        Ok(())
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.calls.lock().push(Call::Logout);
        Ok(())
    }

    async fn request_publish_permission(&self, dataset: &DatasetId) -> Result<(), TransportError> {
        self.calls.lock().push(Call::Permission(dataset.clone()));
        let status = if self.denied.contains(dataset) {
            "DENIED"
        } else {
            "SUCCESS"
        };
        let events = self.events.clone();
        let dataset = dataset.clone();
        let delay = self.permission_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let body = format!(r#"{{"requestId":"p","status":"{status}"}}"#);
            let _ = events
                .send(EndpointEvent::PermissionResponse { dataset, body })
                .await;
        });
        Ok(())
    }

    async fn send(&self, dataset: &DatasetId, document: &str) -> Result<(), TransportError> {
        let call = Call::Send {
            dataset: dataset.clone(),
            document: document.to_string(),
            permitted: self.handshake.may_send(dataset),
            all_granted: self.handshake.gate().all_granted(),
        };
        self.calls.lock().push(call);
        Ok(())
    }
}

/// Feed that replays canned ticks when a source key is advised.
pub struct FakeFeed {
    ticks: TickProducer,
    on_connect: Vec<RawTick>,
    script: HashMap<String, Vec<RawTick>>,
    advised: Mutex<Vec<String>>,
    disconnected: Mutex<bool>,
}

impl FakeFeed {
    pub fn new(ticks: TickProducer) -> Self {
        Self {
            ticks,
            on_connect: Vec::new(),
            script: HashMap::new(),
            advised: Mutex::new(Vec::new()),
            disconnected: Mutex::new(false),
        }
    }

    /// Ticks pushed as soon as the feed connects, before any grant.
    pub fn on_connect(mut self, tick: RawTick) -> Self {
        self.on_connect.push(tick);
        self
    }

    /// Ticks pushed when `tick.source_key` is advised.
    pub fn on_advise(mut self, tick: RawTick) -> Self {
        self.script
            .entry(tick.source_key.clone())
            .or_default()
            .push(tick);
        self
    }

    pub fn advised(&self) -> Vec<String> {
        self.advised.lock().clone()
    }

    pub fn disconnected(&self) -> bool {
        *self.disconnected.lock()
    }
}

#[async_trait]
impl FeedPort for FakeFeed {
    async fn connect(&self, _channel: &str, _topic: &str) -> Result<(), ConnectError> {
        for tick in &self.on_connect {
            self.ticks.push(tick.clone());
        }
        Ok(())
    }

    async fn start_subscription(&self, source_key: &str) -> Result<(), FeedError> {
        self.advised.lock().push(source_key.to_string());
        for tick in self.script.get(source_key).into_iter().flatten() {
            self.ticks.push(tick.clone());
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), FeedError> {
        *self.disconnected.lock() = true;
        Ok(())
    }
}

/// Poll `condition` until it holds or `limit` passes.
pub async fn wait_until(limit: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
