//! Application Ports (Driven)
//!
//! Interfaces the core uses to reach its two collaborators.
//! - **Endpoint**: login, publish permission and publishing
//! - **Feed**: live advisory updates (live mode only)

mod endpoint_port;
mod feed_port;

#[cfg(test)]
pub use endpoint_port::MockEndpointPort;
pub use endpoint_port::{
    EndpointEvent, EndpointPort, ResponseStatus, SUCCESS_STATUS, TransportError,
};
#[cfg(test)]
pub use feed_port::MockFeedPort;
pub use feed_port::{ConnectError, FeedError, FeedEvent, FeedPort};
