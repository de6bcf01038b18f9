mod config;
mod db;
mod dispatcher;
mod kafka;
mod models;
mod notification;
mod scheduler;
mod store;

use std::sync::Arc;
use std::time::Duration;

use config::AppConfig;
use dispatcher::{Dispatcher, DispatcherSettings};
use notification::WebhookNotifier;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!("Starting Drowsiness Alert Service...");

    // The generic webhook path needs no database; the device-token lookup is
    // opt-in for deployments that deliver through a push gateway.
    let tokens = if config.device_lookup_enabled {
        let pool = db::init_pool(&config.database_url).await?;
        info!("Connected to database");
        Some(db::DeviceTokenStore::new(pool))
    } else {
        None
    };

    let notifier = WebhookNotifier::new(
        &config.notification_endpoint,
        Duration::from_secs(config.notification_timeout_secs),
    )?;

    let dispatcher = Arc::new(Dispatcher::new(
        notifier,
        tokens,
        DispatcherSettings {
            alert_interval: Duration::from_secs(config.alert_interval_secs),
            min_notify_interval: Duration::from_secs(config.min_notify_interval_secs),
            confidence_threshold: config.confidence_threshold,
            shutdown_grace: Duration::from_secs(config.shutdown_grace_secs),
        },
    ));

    // Dropping the consumer future on signal stops event intake; the
    // dispatcher then drains timers and in-flight sends.
    tokio::select! {
        result = kafka::start_kafka_consumer(&config, Arc::clone(&dispatcher)) => result?,
        _ = shutdown_signal() => {}
    }

    dispatcher.shutdown().await;
    info!("Drowsiness Alert Service stopped");

    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down gracefully..."),
        _ = terminate => info!("Received termination signal, shutting down gracefully..."),
    }
}
