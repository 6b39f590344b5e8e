//! Endpoint Adapter
//!
//! WebSocket JSON session to the publish/subscribe endpoint:
//!
//! - **client**: connection, request correlation, [`EndpointPort`] impl
//! - **messages**: wire frames
//!
//! [`EndpointPort`]: crate::application::ports::EndpointPort

pub mod client;
pub mod messages;

pub use client::{EndpointClient, EndpointClientConfig};
pub use messages::{InboundFrame, OutboundFrame};
