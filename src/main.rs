pub mod config;
pub mod controller;
pub mod led;
pub mod mqtt;

use crate::config::Config;
use crate::controller::{ButtonDebouncer, LockController, SequenceLock};
use crate::led::{ws2812::Ws2812Spi, LedFeedback};
use crate::mqtt::{BrokerLink, TcpConnector};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level, Subscriber};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    // config decides the level, so loading logs through a temporary default subscriber
    let (config_path, config) = tracing::subscriber::with_default(log_subscriber(Level::INFO), || {
        let path = std::env::args_os()
            .nth(1)
            .map(PathBuf::from)
            .unwrap_or_else(Config::default_path);
        Config::load_or_create(&path).map(|config| (path, config))
    })?;
    setup_logging_env(&config.log_level)?;
    info!("Loaded configuration from {}", config_path.display());

    let shutdown = CancellationToken::new();
    let loop_token = shutdown.clone();

    // the control loop blocks on sockets, GPIO and LED timing
    let control = tokio::task::spawn_blocking(move || run_lock(config, loop_token));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.map_err(|e| eyre!("Failed to listen for Ctrl-C: {}", e))?;
            info!("Ctrl-C received, stopping lock controller");
            shutdown.cancel();
        }
        _ = shutdown.cancelled() => {}
    }

    control
        .await
        .map_err(|e| eyre!("Control loop panicked: {}", e))?
}

fn run_lock(config: Config, shutdown: CancellationToken) -> Result<()> {
    let result = build_and_run(config, shutdown.clone());
    if let Err(e) = &result {
        error!("Lock controller stopped: {}", e);
    }
    // wake the signal task if the loop ended on its own
    shutdown.cancel();
    result
}

fn build_and_run(config: Config, shutdown: CancellationToken) -> Result<()> {
    let layout = config.led_layout()?;
    let strip = Ws2812Spi::new(config.leds.spi_bus, layout.total(), config.leds.brightness)
        .map_err(|e| eyre!("Failed to open LED strip: {}", e))?;
    let leds = LedFeedback::new(Box::new(strip), layout)?;

    let buttons = ButtonDebouncer::from_gpio(
        config.buttons.red_pin,
        config.buttons.green_pin,
        config.buttons.blue_pin,
        Duration::from_millis(config.buttons.debounce_ms),
    )
    .map_err(|e| eyre!("Failed to set up buttons: {}", e))?;

    let link = BrokerLink::new(
        TcpConnector::new(config.broker.host.clone(), config.broker.port),
        config.link_settings(),
    );
    let lock = SequenceLock::new(config.security_code()?);

    let controller = LockController::create(
        link,
        lock,
        buttons,
        leds,
        config.controller_settings(),
        shutdown,
    )
    .initialize()?;

    controller.run();
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
    Ok(())
}

fn setup_logging_env(level: &str) -> Result<()> {
    let level = Level::from_str(level).unwrap_or(Level::INFO);
    tracing::subscriber::set_global_default(log_subscriber(level))
        .map_err(|e| eyre!("Failed to install log subscriber: {}", e))
}

fn log_subscriber(level: Level) -> impl Subscriber + Send + Sync + 'static {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .finish()
}
