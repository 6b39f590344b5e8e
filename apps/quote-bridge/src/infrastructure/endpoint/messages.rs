//! Endpoint Wire Messages
//!
//! JSON frames exchanged with the publish/subscribe endpoint over the
//! WebSocket session.
//!
//! # Outbound
//!
//! ```json
//! {"action":"login","requestId":"<uuid>","vpn":"<vpn>","user":"<user>","password":"<password>"}
//! {"action":"publishRequest","requestId":"<uuid>","dataset":"<dataset>"}
//! {"action":"publish","dataset":"<dataset>","data":{...quote document...}}
//! {"action":"logout"}
//! ```
//!
//! # Inbound
//!
//! Replies echo the `requestId` of the request they answer and carry a
//! `status` (`"SUCCESS"` on grant). Frames without a known `requestId` are
//! session events.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Frame sent to the endpoint.
#[derive(Debug, Serialize)]
#[serde(tag = "action")]
pub enum OutboundFrame<'a> {
    /// Open the session.
    #[serde(rename = "login")]
    Login {
        /// Correlation id echoed in the reply.
        #[serde(rename = "requestId")]
        request_id: &'a str,
        /// Tenant / message VPN.
        vpn: &'a str,
        /// Login user.
        user: &'a str,
        /// Login password.
        password: &'a str,
    },

    /// Ask to publish to a dataset.
    #[serde(rename = "publishRequest")]
    PublishRequest {
        /// Correlation id echoed in the reply.
        #[serde(rename = "requestId")]
        request_id: &'a str,
        /// Dataset to publish to.
        dataset: &'a str,
    },

    /// Publish one document.
    #[serde(rename = "publish")]
    Publish {
        /// Destination dataset.
        dataset: &'a str,
        /// Quote document, embedded verbatim.
        data: &'a RawValue,
    },

    /// Close the session.
    #[serde(rename = "logout")]
    Logout,
}

impl OutboundFrame<'_> {
    /// Serialize to JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (should not happen with valid data).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Correlation part of an inbound frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InboundFrame {
    /// Id of the request this frame answers, if any.
    #[serde(rename = "requestId", default)]
    pub request_id: Option<String>,
}

impl InboundFrame {
    /// Read the correlation id out of a text frame. Non-JSON text has none.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        serde_json::from_str(text).unwrap_or_default()
    }
}
