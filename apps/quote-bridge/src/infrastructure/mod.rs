//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the port interfaces defined in the
//! application layer, plus process-level plumbing.

/// Configuration loading.
pub mod config;

/// Publish/subscribe endpoint WebSocket client.
pub mod endpoint;

/// Advisory feed relay client.
pub mod feed;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
