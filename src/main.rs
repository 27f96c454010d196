pub mod config;
pub mod mastodon;
pub mod mqtt;
pub mod relay;

use crate::config::RelayConfig;
use crate::mastodon::MastodonClientFactory;
use crate::mqtt::mqtt_handler::BusHandler;
use crate::relay::MessageRelay;
use color_eyre::{eyre::WrapErr, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = RelayConfig::load()
        .await
        .wrap_err("Failed to load configuration")?;
    info!("Broker: {}", config.mqtt.broker);
    info!("Topic: {}", config.mqtt.topic);
    info!("Default Mastodon server: {}", config.default_server);

    // Each HTTP request is bounded on its own; the whole message by message_timeout
    let factory = MastodonClientFactory::new(config.message_timeout)
        .wrap_err("Failed to build HTTP client")?;
    let relay = Arc::new(MessageRelay::new(
        Arc::new(factory),
        config.relay_settings(),
    ));

    let shutdown = CancellationToken::new();
    let bus = BusHandler::create(config.mqtt, relay).start();
    let bus_task = tokio::spawn(bus.run(shutdown.clone()));

    wait_for_signal().await?;
    info!("Signal caught -> Exit");
    shutdown.cancel();

    let status = bus_task.await.wrap_err("Bus handler task failed")?;
    info!("Final status: {}", status);
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).wrap_err("Failed to install SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.wrap_err("Failed to listen for SIGINT")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .wrap_err("Failed to listen for Ctrl-C")
}
