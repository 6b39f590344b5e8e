//! Quote Bridge Binary
//!
//! Starts the quote bridge in live or file mode.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin quote-bridge
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `ENDPOINT_URL`, `ENDPOINT_VPN`, `ENDPOINT_USER`, `ENDPOINT_PASSWORD`
//! - `QUOTE_TYPE_ID`: `typeId` of every document
//! - `SUBSCRIPTION_MAPPING`: `source_key,dataset,...`
//!
//! ## File mode (`QUOTE_BRIDGE_MODE=file`)
//! - `DATA_FILE`, `DATASET_COLUMN`, `TIMESTAMP_COLUMN`, `TIMESTAMP_FORMAT`
//! - `FIELD_MAPPING`: `field_name,column,...`
//! - `SOURCE_TIMEZONE` (default: America/New_York)
//!
//! ## Optional
//! - `QUOTE_BRIDGE_MODE`: live | file (default: live)
//! - `FEED_ENABLED`, `FEED_ADDR`, `FEED_CHANNEL`, `FEED_TOPIC`
//! - `DST_OFFSET_SECS`, `STANDARD_OFFSET_SECS`, `DST_REGION`
//! - `QUEUE_POLL_INTERVAL_MS` (default: 10000)
//! - `SUPERVISOR_POLL_INTERVAL_SECS` (default: 10)
//! - `HEALTH_PORT`: Health check HTTP port, 0 disables (default: 8083)
//! - `LOG_FORMAT`, `RUST_LOG`, `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`

use std::process::ExitCode;
use std::sync::Arc;

use quote_bridge::application::ports::{EndpointPort, FeedPort};
use quote_bridge::application::services::{
    BatchPublisher, BridgeMode, FileBridge, HandshakeController, LiveBridge, PipelineStats,
    PublishWorker, ingestion_queue,
};
use quote_bridge::domain::handshake::Handshake;
use quote_bridge::domain::quote::{LiveNormalizer, RowNormalizer};
use quote_bridge::infrastructure::config::BridgeConfig;
use quote_bridge::infrastructure::endpoint::{EndpointClient, EndpointClientConfig};
use quote_bridge::infrastructure::feed::{FeedClient, FeedClientConfig};
use quote_bridge::infrastructure::health::{HealthServer, HealthServerState};
use quote_bridge::infrastructure::telemetry;
use quote_bridge::init_metrics;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the endpoint and feed notification channels.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Quote bridge failed");
            eprintln!("quote-bridge: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        return Err("failed to install rustls crypto provider".into());
    }

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting Quote Bridge");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics()?;

    let config = BridgeConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let registry = Arc::new(config.registry());
    let handshake = Arc::new(Handshake::new(registry.datasets()));
    let stats = Arc::new(PipelineStats::new());

    // Spawn health server
    if config.server.health_port != 0 {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            config.mode,
            Arc::clone(&handshake),
            Arc::clone(&stats),
        ));
        let health_server = HealthServer::new(
            config.server.health_port,
            health_state,
            shutdown_token.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    // Open the endpoint session
    let (endpoint_tx, endpoint_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let endpoint_config = EndpointClientConfig {
        url: config.endpoint.url.clone(),
        vpn: config.endpoint.vpn.clone(),
    };
    let endpoint: Arc<dyn EndpointPort> =
        EndpointClient::connect(endpoint_config, endpoint_tx, shutdown_token.clone()).await?;

    match config.mode {
        BridgeMode::Live => {
            let (ticks, consumer) = ingestion_queue();
            let (feed_tx, feed_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            let feed: Option<Arc<dyn FeedPort>> = config.live.feed_enabled.then(|| {
                Arc::new(FeedClient::new(
                    FeedClientConfig::new(config.live.feed_addr.clone()),
                    ticks.clone(),
                    feed_tx,
                    shutdown_token.clone(),
                )) as Arc<dyn FeedPort>
            });
            if feed.is_none() {
                tracing::warn!("Advisory feed disabled on this host, no ticks will arrive");
            }

            let controller = Arc::new(HandshakeController::new(
                config.controller_settings(),
                Arc::clone(&endpoint),
                feed,
                Arc::clone(&registry),
                Arc::clone(&handshake),
                shutdown_token.clone(),
            ));
            spawn_signal_handler(Arc::clone(&controller));

            let worker = PublishWorker::new(
                endpoint,
                registry,
                handshake,
                LiveNormalizer::new(config.type_id.clone(), config.live.offsets),
                Arc::clone(&stats),
                config.live.queue_poll_interval,
            );

            tracing::info!("Quote bridge ready (live)");
            LiveBridge {
                controller,
                worker,
                ticks: consumer,
                endpoint_events: endpoint_rx,
                feed_events: feed_rx,
            }
            .run()
            .await?;
            drop(ticks);
        }
        BridgeMode::File => {
            let Some(file) = config.file.clone() else {
                return Err("file mode requires file settings".into());
            };

            let controller = Arc::new(HandshakeController::new(
                config.controller_settings(),
                Arc::clone(&endpoint),
                None,
                Arc::clone(&registry),
                Arc::clone(&handshake),
                shutdown_token.clone(),
            ));
            spawn_signal_handler(Arc::clone(&controller));

            let publisher = BatchPublisher::new(
                endpoint,
                registry,
                handshake,
                RowNormalizer::new(
                    config.type_id.clone(),
                    file.timestamp_column,
                    file.timestamp_format,
                    file.source_timezone,
                ),
                file.dataset_column,
                Arc::clone(&stats),
            );

            tracing::info!(path = %file.path.display(), "Quote bridge ready (file)");
            let report = FileBridge {
                controller,
                publisher,
                path: file.path,
                endpoint_events: endpoint_rx,
            }
            .run()
            .await?;

            match report {
                Some(report) => tracing::info!(?report, "Input file published"),
                None => tracing::warn!("Shut down before every dataset was granted"),
            }
        }
    }

    shutdown_token.cancel();
    tracing::info!(stats = ?stats.snapshot(), "Quote bridge stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &BridgeConfig) {
    tracing::info!(
        mode = config.mode.as_str(),
        endpoint = %config.endpoint.url,
        vpn = %config.endpoint.vpn,
        type_id = %config.type_id,
        subscriptions = config.subscriptions.len(),
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    if config.mode == BridgeMode::Live {
        tracing::debug!(
            feed_enabled = config.live.feed_enabled,
            feed_addr = %config.live.feed_addr,
            channel = %config.live.channel,
            topic = %config.live.topic,
            "Advisory feed"
        );
    }
}

/// Dispose the bridge on SIGTERM or SIGINT.
fn spawn_signal_handler(controller: Arc<HandshakeController>) {
    tokio::spawn(async move {
        let cancel = controller.cancel_token().clone();
        tokio::select! {
            () = cancel.cancelled() => return,
            received = await_shutdown_signal() => {
                if let Err(e) = received {
                    tracing::error!(error = %e, "Signal handler installation failed");
                    return;
                }
            }
        }
        controller.dispose().await;
    });
}

/// Wait for SIGTERM or SIGINT.
async fn await_shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                tracing::info!("Received Ctrl+C, initiating shutdown");
            }
            _ = terminate.recv() => {
                tracing::info!("Received SIGTERM, initiating shutdown");
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C, initiating shutdown");
        Ok(())
    }
}
