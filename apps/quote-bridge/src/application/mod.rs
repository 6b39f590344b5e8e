//! Application Layer - Pipeline services and port definitions.
//!
//! Coordinates the domain rules with the endpoint and feed collaborators,
//! which it reaches only through the ports.

/// Endpoint and feed interfaces.
pub mod ports;

/// Queue, worker, batch publisher and handshake controller.
pub mod services;
