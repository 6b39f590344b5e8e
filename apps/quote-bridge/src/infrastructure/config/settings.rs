//! Bridge Configuration Settings
//!
//! Configuration types for the quote bridge, loaded from environment
//! variables (after `.env`, see `main`).
//!
//! Mapping lists are flat comma-separated pairs:
//!
//! ```text
//! SUBSCRIPTION_MAPPING=EURUSD,ds-eur,GBPUSD,ds-gbp
//! FIELD_MAPPING=bid,2,ask,3
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;

use crate::application::services::controller::{BridgeMode, ControllerSettings, FeedTarget};
use crate::domain::subscription::{DatasetId, FieldMapping, Subscription, SubscriptionRegistry};
use crate::domain::timestamp::OffsetPolicy;

// =============================================================================
// Credentials
// =============================================================================

/// Endpoint login credentials.
#[derive(Clone)]
pub struct Credentials {
    user: String,
    password: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(user: String, password: String) -> Self {
        Self { user, password }
    }

    /// Get the login user.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Get the login password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// Settings Groups
// =============================================================================

/// Endpoint session settings.
#[derive(Debug, Clone)]
pub struct EndpointSettings {
    /// WebSocket URL.
    pub url: String,
    /// Tenant / message VPN.
    pub vpn: String,
    /// Login credentials.
    pub credentials: Credentials,
}

/// Live-mode settings.
#[derive(Debug, Clone)]
pub struct LiveSettings {
    /// Whether the advisory feed is usable on this host.
    pub feed_enabled: bool,
    /// Relay address.
    pub feed_addr: String,
    /// Advisory channel.
    pub channel: String,
    /// Advisory topic.
    pub topic: String,
    /// UTC correction for feed times.
    pub offsets: OffsetPolicy,
    /// Worker bounded wait on the ingestion queue.
    pub queue_poll_interval: Duration,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            feed_enabled: true,
            feed_addr: "127.0.0.1:4500".to_string(),
            channel: "MT4".to_string(),
            topic: "QUOTE".to_string(),
            offsets: OffsetPolicy::default(),
            queue_poll_interval: Duration::from_secs(10),
        }
    }
}

/// File-mode settings.
#[derive(Debug, Clone)]
pub struct FileSettings {
    /// Input file.
    pub path: PathBuf,
    /// Column holding the dataset-bearing value.
    pub dataset_column: usize,
    /// Column holding the local timestamp.
    pub timestamp_column: usize,
    /// chrono format pattern of the timestamp column.
    pub timestamp_format: String,
    /// Zone the timestamps are recorded in.
    pub source_timezone: Tz,
    /// Output fields in emission order.
    pub fields: Vec<FieldMapping>,
}

/// Process-level settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
    /// Supervisor liveness interval.
    pub supervisor_interval: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            health_port: 8083,
            supervisor_interval: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Bridge Config
// =============================================================================

/// Complete bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Ingestion mode.
    pub mode: BridgeMode,
    /// Endpoint session.
    pub endpoint: EndpointSettings,
    /// `typeId` of every document.
    pub type_id: String,
    /// Source key routes.
    pub subscriptions: Vec<Subscription>,
    /// Live-mode settings (defaults in file mode).
    pub live: LiveSettings,
    /// File-mode settings (`None` in live mode).
    pub file: Option<FileSettings>,
    /// Process-level settings.
    pub server: ServerSettings,
}

impl BridgeConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or any value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or any value is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mode = match lookup("QUOTE_BRIDGE_MODE") {
            Some(value) => parse_mode(&value)?,
            None => BridgeMode::default(),
        };

        let endpoint = EndpointSettings {
            url: required(&lookup, "ENDPOINT_URL")?,
            vpn: required(&lookup, "ENDPOINT_VPN")?,
            credentials: Credentials::new(
                required(&lookup, "ENDPOINT_USER")?,
                required(&lookup, "ENDPOINT_PASSWORD")?,
            ),
        };
        let type_id = required(&lookup, "QUOTE_TYPE_ID")?;
        let subscriptions = parse_subscription_mapping(
            "SUBSCRIPTION_MAPPING",
            &required(&lookup, "SUBSCRIPTION_MAPPING")?,
        )?;

        let defaults = LiveSettings::default();
        let region = match lookup("DST_REGION") {
            Some(value) => parse_timezone("DST_REGION", &value)?,
            None => defaults.offsets.region,
        };
        let live = LiveSettings {
            feed_enabled: parse_env_bool(&lookup, "FEED_ENABLED", defaults.feed_enabled)?,
            feed_addr: lookup("FEED_ADDR").unwrap_or(defaults.feed_addr),
            channel: lookup("FEED_CHANNEL").unwrap_or(defaults.channel),
            topic: lookup("FEED_TOPIC").unwrap_or(defaults.topic),
            offsets: OffsetPolicy::from_secs(
                parse_env_offset_secs(&lookup, "DST_OFFSET_SECS")?,
                parse_env_offset_secs(&lookup, "STANDARD_OFFSET_SECS")?,
                region,
            )
            .ok_or_else(|| invalid("DST_OFFSET_SECS", "", "offset out of range"))?,
            queue_poll_interval: parse_env_duration_millis(
                &lookup,
                "QUEUE_POLL_INTERVAL_MS",
                defaults.queue_poll_interval,
            )?,
        };

        let file = match mode {
            BridgeMode::Live => None,
            BridgeMode::File => Some(FileSettings {
                path: PathBuf::from(required(&lookup, "DATA_FILE")?),
                dataset_column: parse_required(&lookup, "DATASET_COLUMN")?,
                timestamp_column: parse_required(&lookup, "TIMESTAMP_COLUMN")?,
                timestamp_format: required(&lookup, "TIMESTAMP_FORMAT")?,
                source_timezone: match lookup("SOURCE_TIMEZONE") {
                    Some(value) => parse_timezone("SOURCE_TIMEZONE", &value)?,
                    None => chrono_tz::America::New_York,
                },
                fields: parse_field_mapping("FIELD_MAPPING", &required(&lookup, "FIELD_MAPPING")?)?,
            }),
        };

        let server = ServerSettings {
            health_port: parse_env(&lookup, "HEALTH_PORT", ServerSettings::default().health_port)?,
            supervisor_interval: parse_env_duration_secs(
                &lookup,
                "SUPERVISOR_POLL_INTERVAL_SECS",
                ServerSettings::default().supervisor_interval,
            )?,
        };

        Ok(Self {
            mode,
            endpoint,
            type_id,
            subscriptions,
            live,
            file,
            server,
        })
    }

    /// Build the frozen routing tables.
    #[must_use]
    pub fn registry(&self) -> SubscriptionRegistry {
        let fields = self
            .file
            .as_ref()
            .map(|file| file.fields.clone())
            .unwrap_or_default();
        SubscriptionRegistry::from_parts(self.subscriptions.clone(), fields)
    }

    /// Settings for the handshake controller.
    #[must_use]
    pub fn controller_settings(&self) -> ControllerSettings {
        let feed = (self.mode == BridgeMode::Live && self.live.feed_enabled).then(|| FeedTarget {
            channel: self.live.channel.clone(),
            topic: self.live.topic.clone(),
        });
        ControllerSettings {
            mode: self.mode,
            user: self.endpoint.credentials.user().to_string(),
            password: self.endpoint.credentials.password().to_string(),
            feed,
            supervisor_interval: self.server.supervisor_interval,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable cannot be parsed.
    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
        /// What is wrong with it.
        reason: String,
    },
    /// Mapping list does not consist of whole pairs.
    #[error("{key} must hold name,value pairs but has {len} entries")]
    OddMapping {
        /// Variable name.
        key: String,
        /// Number of entries found.
        len: usize,
    },
}

// =============================================================================
// Parsing Helpers
// =============================================================================

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value.to_string())
}

fn invalid(key: &str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| invalid(key, value, e))
}

fn parse_required<F, T>(lookup: &F, key: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_value(key, &required(lookup, key)?)
}

fn parse_env<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key).map_or(Ok(default), |value| parse_value(key, &value))
}

fn parse_env_bool<F>(lookup: &F, key: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, &value, "expected true or false")),
    }
}

fn parse_env_offset_secs<F>(lookup: &F, key: &str) -> Result<i64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs = parse_env::<_, i64>(lookup, key, 0)?;
    if !(-OffsetPolicy::MAX_OFFSET_SECS..=OffsetPolicy::MAX_OFFSET_SECS).contains(&secs) {
        return Err(invalid(
            key,
            &secs.to_string(),
            format!(
                "offset must be within {} seconds of UTC",
                OffsetPolicy::MAX_OFFSET_SECS
            ),
        ));
    }
    Ok(secs)
}

/// Parse a positive interval; zero would turn poll loops into busy loops.
fn parse_env_interval<F>(lookup: &F, key: &str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_env::<_, u64>(lookup, key, default)? {
        0 => Err(invalid(key, "0", "interval must be greater than zero")),
        value => Ok(value),
    }
}

fn parse_env_duration_secs<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_env_interval(lookup, key, default.as_secs()).map(Duration::from_secs)
}

fn parse_env_duration_millis<F>(
    lookup: &F,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse_env_interval(lookup, key, default_ms).map(Duration::from_millis)
}

fn parse_mode(value: &str) -> Result<BridgeMode, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "live" => Ok(BridgeMode::Live),
        "file" => Ok(BridgeMode::File),
        _ => Err(invalid("QUOTE_BRIDGE_MODE", value, "expected live or file")),
    }
}

fn parse_timezone(key: &str, value: &str) -> Result<Tz, ConfigError> {
    value
        .trim()
        .parse::<Tz>()
        .map_err(|e| invalid(key, value, e))
}

/// Split a flat `a,b,c,d` list into trimmed `(a,b)`, `(c,d)` pairs.
fn parse_pairs<'a>(key: &str, value: &'a str) -> Result<Vec<(&'a str, &'a str)>, ConfigError> {
    let entries: Vec<&str> = value.split(',').map(str::trim).collect();
    if entries.len() % 2 != 0 {
        return Err(ConfigError::OddMapping {
            key: key.to_string(),
            len: entries.len(),
        });
    }
    if entries.iter().any(|entry| entry.is_empty()) {
        return Err(invalid(key, value, "empty entry"));
    }
    Ok(entries
        .chunks_exact(2)
        .map(|pair| (pair[0], pair[1]))
        .collect())
}

/// Parse `key,dataset,key,dataset,...`.
///
/// # Errors
///
/// Returns `ConfigError` for odd-length lists or empty entries.
pub fn parse_subscription_mapping(key: &str, value: &str) -> Result<Vec<Subscription>, ConfigError> {
    Ok(parse_pairs(key, value)?
        .into_iter()
        .map(|(source_key, dataset)| Subscription {
            source_key: source_key.to_string(),
            dataset_id: DatasetId::new(dataset),
        })
        .collect())
}

/// Parse `name,column,name,column,...`.
///
/// # Errors
///
/// Returns `ConfigError` for odd-length lists, empty entries or non-numeric columns.
pub fn parse_field_mapping(key: &str, value: &str) -> Result<Vec<FieldMapping>, ConfigError> {
    parse_pairs(key, value)?
        .into_iter()
        .map(|(field_name, column)| {
            Ok(FieldMapping {
                field_name: field_name.to_string(),
                column_index: parse_value(key, column)?,
            })
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use test_case::test_case;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    const BASE: &[(&str, &str)] = &[
        ("ENDPOINT_URL", "wss://endpoint.example/ws"),
        ("ENDPOINT_VPN", "quotes"),
        ("ENDPOINT_USER", "bridge"),
        ("ENDPOINT_PASSWORD", "hunter2"),
        ("QUOTE_TYPE_ID", "fx-quote"),
        ("SUBSCRIPTION_MAPPING", "EURUSD,DS1,GBPUSD,DS2"),
    ];

    fn with(extra: &[(&'static str, &'static str)]) -> Vec<(&'static str, &'static str)> {
        let mut vars: Vec<_> = BASE.to_vec();
        vars.extend_from_slice(extra);
        vars
    }

    #[test]
    fn live_defaults() {
        let config = BridgeConfig::from_lookup(lookup(BASE)).unwrap();

        assert_eq!(config.mode, BridgeMode::Live);
        assert_eq!(config.type_id, "fx-quote");
        assert_eq!(config.subscriptions.len(), 2);
        assert!(config.live.feed_enabled);
        assert_eq!(config.live.feed_addr, "127.0.0.1:4500");
        assert_eq!(config.live.channel, "MT4");
        assert_eq!(config.live.topic, "QUOTE");
        assert_eq!(config.live.offsets, OffsetPolicy::default());
        assert_eq!(config.live.queue_poll_interval, Duration::from_secs(10));
        assert_eq!(config.server.health_port, 8083);
        assert_eq!(config.server.supervisor_interval, Duration::from_secs(10));
        assert!(config.file.is_none());
    }

    #[test]
    fn live_overrides() {
        let vars = with(&[
            ("FEED_ENABLED", "false"),
            ("DST_OFFSET_SECS", "10800"),
            ("STANDARD_OFFSET_SECS", "7200"),
            ("DST_REGION", "Europe/London"),
            ("QUEUE_POLL_INTERVAL_MS", "250"),
            ("HEALTH_PORT", "0"),
        ]);
        let config = BridgeConfig::from_lookup(lookup(&vars)).unwrap();

        assert!(!config.live.feed_enabled);
        assert_eq!(
            config.live.offsets,
            OffsetPolicy::from_secs(10_800, 7_200, chrono_tz::Europe::London).unwrap()
        );
        assert_eq!(config.live.queue_poll_interval, Duration::from_millis(250));
        assert_eq!(config.server.health_port, 0);
        assert!(config.controller_settings().feed.is_none());
    }

    #[test]
    fn file_mode() {
        let vars = with(&[
            ("QUOTE_BRIDGE_MODE", "FILE"),
            ("DATA_FILE", "/data/quotes.csv"),
            ("DATASET_COLUMN", "0"),
            ("TIMESTAMP_COLUMN", "1"),
            ("TIMESTAMP_FORMAT", "%Y-%m-%dT%H:%M:%S"),
            ("SOURCE_TIMEZONE", "UTC"),
            ("FIELD_MAPPING", "bid, 2, ask, 3"),
        ]);
        let config = BridgeConfig::from_lookup(lookup(&vars)).unwrap();
        let file = config.file.as_ref().unwrap();

        assert_eq!(config.mode, BridgeMode::File);
        assert_eq!(file.path, PathBuf::from("/data/quotes.csv"));
        assert_eq!(file.timestamp_column, 1);
        assert_eq!(file.source_timezone, chrono_tz::UTC);
        assert_eq!(file.fields.len(), 2);

        let registry = config.registry();
        assert_eq!(registry.fields()[1].field_name, "ask");
        assert_eq!(registry.fields()[1].column_index, 3);
        assert!(config.controller_settings().feed.is_none());
    }

    #[test]
    fn file_mode_requires_file_settings() {
        let vars = with(&[("QUOTE_BRIDGE_MODE", "file")]);
        let err = BridgeConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref key) if key == "DATA_FILE"));
    }

    #[test]
    fn missing_required_variable() {
        let vars: Vec<_> = BASE
            .iter()
            .copied()
            .filter(|(k, _)| *k != "ENDPOINT_PASSWORD")
            .collect();
        let err = BridgeConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref key) if key == "ENDPOINT_PASSWORD"));
    }

    #[test]
    fn empty_required_variable() {
        let vars = with(&[("QUOTE_TYPE_ID", "  ")]);
        let err = BridgeConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(_)));
    }

    #[test_case("QUOTE_BRIDGE_MODE", "replay" ; "unknown mode")]
    #[test_case("FEED_ENABLED", "maybe" ; "bad bool")]
    #[test_case("HEALTH_PORT", "70000" ; "port out of range")]
    #[test_case("DST_OFFSET_SECS", "3h" ; "non numeric offset")]
    #[test_case("DST_REGION", "Mars/Olympus" ; "unknown zone")]
    #[test_case("DST_OFFSET_SECS", "9223372036854775807" ; "offset beyond a day")]
    #[test_case("STANDARD_OFFSET_SECS", "-86401" ; "negative offset beyond a day")]
    #[test_case("QUEUE_POLL_INTERVAL_MS", "0" ; "zero queue poll")]
    #[test_case("SUPERVISOR_POLL_INTERVAL_SECS", "0" ; "zero supervisor poll")]
    fn invalid_values_are_rejected(key: &'static str, value: &'static str) {
        let vars = with(&[(key, value)]);
        let err = BridgeConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }), "{err}");
    }

    #[test]
    fn subscription_mapping_pairs() {
        let subs = parse_subscription_mapping("K", " EURUSD , DS1 ,EURUSD.m,DS1").unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].source_key, "EURUSD");
        assert_eq!(subs[1].dataset_id, DatasetId::new("DS1"));
    }

    #[test]
    fn odd_mapping_is_rejected() {
        let err = parse_subscription_mapping("K", "EURUSD,DS1,GBPUSD").unwrap_err();
        assert!(matches!(err, ConfigError::OddMapping { len: 3, .. }));
    }

    #[test]
    fn empty_mapping_entry_is_rejected() {
        assert!(parse_subscription_mapping("K", "EURUSD,,GBPUSD,DS2").is_err());
    }

    #[test]
    fn field_mapping_requires_numeric_columns() {
        let err = parse_field_mapping("K", "bid,two").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn credentials_redacted_debug() {
        let creds = Credentials::new("bridge".to_string(), "hunter2".to_string());
        let debug = format!("{creds:?}");
        assert!(debug.contains("bridge"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn controller_settings_carry_feed_target() {
        let config = BridgeConfig::from_lookup(lookup(BASE)).unwrap();
        let settings = config.controller_settings();
        assert_eq!(settings.user, "bridge");
        assert_eq!(
            settings.feed,
            Some(FeedTarget {
                channel: "MT4".to_string(),
                topic: "QUOTE".to_string(),
            })
        );
        assert!(!format!("{settings:?}").contains("hunter2"));
    }
}
