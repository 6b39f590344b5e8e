//! Endpoint Port (Driven Port)
//!
//! Interface to the remote publish/subscribe endpoint. Calls return once
//! the request is on the wire; the endpoint's replies come back later as
//! [`EndpointEvent`]s on the channel handed to the adapter.

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::subscription::DatasetId;

/// Status string the endpoint uses for a granted request.
pub const SUCCESS_STATUS: &str = "SUCCESS";

/// Endpoint transport error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The session is not open (never connected, or already closed).
    #[error("endpoint session is not open")]
    NotConnected,

    /// A frame could not be encoded.
    #[error("failed to encode frame: {0}")]
    Encode(String),

    /// Writing to the session failed.
    #[error("endpoint send failed: {0}")]
    Send(String),
}

/// Inbound notification from the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointEvent {
    /// Reply to `login`.
    LoginResponse {
        /// Raw JSON body.
        body: String,
    },
    /// Reply to `request_publish_permission` for `dataset`.
    PermissionResponse {
        /// Dataset the request was made for.
        dataset: DatasetId,
        /// Raw JSON body.
        body: String,
    },
    /// Unsolicited session notification (including session close).
    Session {
        /// Raw JSON body.
        body: String,
    },
}

/// `status` field of a response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseStatus {
    /// `"status": "SUCCESS"`.
    Success,
    /// Any other status value.
    Failure(String),
    /// No `status` field, or the body is not a JSON object.
    Missing,
}

#[derive(Deserialize)]
struct StatusBody {
    status: Option<serde_json::Value>,
}

impl ResponseStatus {
    /// Read the status out of a response body.
    #[must_use]
    pub fn parse(body: &str) -> Self {
        let Ok(StatusBody { status: Some(status) }) = serde_json::from_str::<StatusBody>(body)
        else {
            return Self::Missing;
        };
        match status {
            serde_json::Value::String(s) if s == SUCCESS_STATUS => Self::Success,
            serde_json::Value::String(s) => Self::Failure(s),
            other => Self::Failure(other.to_string()),
        }
    }

    /// Whether a publish-permission reply grants the dataset.
    #[must_use]
    pub const fn is_grant(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Whether a login reply counts as a successful login.
    ///
    /// The endpoint acknowledges logins without always echoing a status, so
    /// only an explicit non-success status is a failure.
    #[must_use]
    pub const fn is_login_accepted(&self) -> bool {
        !matches!(self, Self::Failure(_))
    }
}

/// Port for publishing to the endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EndpointPort: Send + Sync {
    /// Send the login request.
    async fn login(&self, user: &str, password: &str) -> Result<(), TransportError>;

    /// End the session.
    async fn logout(&self) -> Result<(), TransportError>;

    /// Ask for permission to publish to `dataset`.
    async fn request_publish_permission(&self, dataset: &DatasetId)
    -> Result<(), TransportError>;

    /// Publish one JSON document to `dataset`.
    async fn send(&self, dataset: &DatasetId, document: &str) -> Result<(), TransportError>;
}
