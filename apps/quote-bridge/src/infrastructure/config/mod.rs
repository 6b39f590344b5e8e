//! Configuration Module
//!
//! Environment-driven configuration for the quote bridge.

mod settings;

pub use settings::{
    BridgeConfig, ConfigError, Credentials, EndpointSettings, FileSettings, LiveSettings,
    ServerSettings, parse_field_mapping, parse_subscription_mapping,
};
