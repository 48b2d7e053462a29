//! # homegated: homegate daemon
//!
//! Composition root that wires all adapters together and runs the gateway.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Install the tracing subscriber
//! - Initialize the `SQLite` connection pool and run migrations
//! - Construct the MQTT client factory and the embedded broker backend
//! - Build the [`Gateway`] and start it
//! - Log user-visible notifications
//! - Stop the gateway on SIGINT
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer; no domain logic belongs here.

mod config;
mod modem;

use homegate_adapter_mqtt::{RumqttClientFactory, RumqttdBackend};
use homegate_adapter_storage_sqlite_sqlx::SqliteStorage;
use homegate_app::gateway::Gateway;
use homegate_domain::notification::Notification;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::modem::DisabledModem;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.logging.filter))
        .init();

    // Database
    let db = homegate_adapter_storage_sqlite_sqlx::Config {
        database_url: config.database_url().to_string(),
    }
    .build()
    .await?;
    let storage = SqliteStorage::from(&db);

    // Transports
    let factory = RumqttClientFactory::new(config.mqtt.clone());
    let mut backend = RumqttdBackend::new(config.broker.properties_path.clone());
    if let Some(port) = config.broker.port {
        backend = backend.with_port(port);
    }

    let gateway = Gateway::new(
        storage,
        factory,
        backend,
        DisabledModem,
        config.gateway_options(),
    );
    let notifications = tokio::spawn(log_notifications(
        gateway.sink().subscribe_notifications(),
    ));

    gateway.start().await?;
    tracing::info!(database = %config.database_url(), "homegated running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    gateway.stop().await;
    notifications.abort();

    Ok(())
}

async fn log_notifications(mut notifications: broadcast::Receiver<Notification>) {
    loop {
        match notifications.recv().await {
            Ok(notification) => {
                tracing::info!(
                    title = %notification.title,
                    content = %notification.content,
                    retryable = notification.retry.is_some(),
                    "notification"
                );
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "notification log lagging");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
