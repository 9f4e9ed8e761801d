//! # Rotor Bridge
//!
//! Drive GS-232B compatible antenna rotor controllers over a supervised
//! serial link.
//!
//! The daemon loads its configuration, brings up the serial link with
//! health monitoring and automatic reconnection, starts the motion
//! control loop, and persists link events to JSONL files until Ctrl+C.

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use rotor_bridge::calibration::RotorCalibration;
use rotor_bridge::config::Config;
use rotor_bridge::link::{available_ports, RotorLink};
use rotor_bridge::motion::MotionController;
use rotor_bridge::telemetry::EventLogger;

/// Configuration file consulted at startup
const CONFIG_PATH: &str = "config/default.toml";

/// Directory for the process log file
const LOG_DIR: &str = "./logs";

/// Main entry point for the Rotor Bridge daemon
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Set up logging to stdout and a daily-rolling file
///    - Load and validate the configuration file
///    - Wire the serial link, motion controller, and event logger
///
/// 2. **Startup**
///    - Start the motion control loop
///    - Connect to the configured port when auto-connect is enabled;
///      a failed first connect is logged and the link waits for a
///      later connect rather than aborting the daemon
///
/// 3. **Graceful Shutdown**
///    - Ctrl+C stops the motion loop, closes the link, and exits
///
/// # Errors
///
/// Returns error if the configuration file cannot be read or fails
/// validation.
#[tokio::main]
async fn main() -> Result<()> {
    // Operators watch stdout; the rolling file keeps history for later
    let file_appender = tracing_appender::rolling::daily(LOG_DIR, "rotor-bridge.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();

    info!("Rotor Bridge v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::load(CONFIG_PATH)
        .with_context(|| format!("Failed to load configuration from {}", CONFIG_PATH))?;

    match available_ports() {
        Ok(ports) if ports.is_empty() => info!("No serial ports detected"),
        Ok(ports) => {
            for port in &ports {
                info!("Detected serial port: {}", port.friendly_name);
            }
        }
        Err(e) => warn!("Serial port enumeration failed: {}", e),
    }

    let link = RotorLink::new(config.link.clone());

    // The link discards events until someone subscribes, so take the
    // stream before anything can connect
    if let Some(events) = link.subscribe() {
        if config.telemetry.enabled {
            let logger = EventLogger::new(config.telemetry.clone());
            tokio::spawn(logger.run(events));
        } else {
            tokio::spawn(async move {
                let mut events = events;
                while let Some(event) = events.recv().await {
                    debug!("Link event: {:?}", event);
                }
            });
        }
    }

    let calibration = RotorCalibration::from_config(&config.calibration);
    let motion = MotionController::new(link.clone(), config.motion.clone(), calibration);
    motion.start().await;

    if config.serial.auto_connect {
        if let Err(e) = link
            .connect(&config.serial.port, config.serial.baud_rate)
            .await
        {
            warn!("Initial connect to {} failed: {}", config.serial.port, e);
        }
    } else {
        info!("Auto-connect disabled; waiting for a manual connect");
    }

    info!("Press Ctrl+C to exit");
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");

    motion.stop().await;
    link.disconnect(None).await;
    info!("Shutdown complete");

    Ok(())
}
