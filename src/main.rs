//! # Periphlink
//!
//! Bring up the peripherals of one node and run the radio ping-pong probe.
//!
//! ```text
//! periphlink [CONFIG] [--simulate]
//! ```
//!
//! Without the `raspberry-pi` feature, or with `--simulate`, both ends of the
//! link run in this process over a simulated air interface.

use anyhow::{Context, Result};
use std::path::Path;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use periphlink::bus::sim::{SimGpio, SimI2c};
use periphlink::bus::{I2cBus, SpiBus};
use periphlink::calibration::ServoCalibration;
use periphlink::config::{Config, LoggingConfig, RadioConfig};
use periphlink::device::{
    DeviceKind, DeviceRegistry, GpioDevice, Mcp23017, Pca9685, PinIo, PinMode, PinState, RadioPins,
};
use periphlink::ping::{LinkStats, PingPong, Role};
use periphlink::radio::rf24::format_address;
use periphlink::radio::sim::{simulated_radio, Air};
use periphlink::radio::Rf24;
use periphlink::telemetry::ProbeLog;

/// Configuration file used when none is given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Base name of the daily rolling log file
const LOG_FILE_NAME: &str = "periphlink.log";

/// Main entry point for Periphlink
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration and set up logging
///    - Register servo controller, I/O expander, GPIO and radio lines
///    - Configure the radio pipes and retry policy
///
/// 2. **Probe**
///    - Run the ping-pong loop on a background task
///    - Stream probe reports to the telemetry log
///
/// 3. **Graceful Shutdown**
///    - Ctrl+C signals the loop, which stops at its next wait
///    - Log the link statistics
///
/// # Errors
///
/// Returns error if the configuration is invalid or the radio cannot be
/// brought up. Servo and expander faults only disable that peripheral.
#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let simulate = args.iter().any(|arg| arg == "--simulate") || !cfg!(feature = "raspberry-pi");
    let explicit_path = args.iter().find(|arg| !arg.starts_with("--")).cloned();

    let (config, config_source) = match &explicit_path {
        Some(path) => (
            Config::load(path).with_context(|| format!("loading {}", path))?,
            path.clone(),
        ),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => (
            Config::load(DEFAULT_CONFIG_PATH).context("loading default configuration")?,
            DEFAULT_CONFIG_PATH.to_string(),
        ),
        None => (Config::default(), "built-in defaults".to_string()),
    };

    let _log_guard = init_logging(&config.logging).context("setting up logging")?;

    info!("Periphlink v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {}", config_source);

    if simulate {
        run_simulated(config).await
    } else {
        run_hardware(config).await
    }
}

/// Console logging, plus a daily rolling file when configured
fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    match &config.file_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .try_init()?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .try_init()?;
            Ok(None)
        }
    }
}

#[cfg(feature = "raspberry-pi")]
async fn run_hardware(config: Config) -> Result<()> {
    use periphlink::bus::rpi::{RpiGpio, RpiI2c, RpiSpi};

    let gpio = GpioDevice::new(
        Box::new(RpiGpio::open().context("opening GPIO")?),
        config.gpio.pin_count,
    );
    let servo_bus = RpiI2c::open(config.servo.i2c_bus).context("opening I2C for servo")?;
    let expander_bus = RpiI2c::open(config.expander.i2c_bus).context("opening I2C for expander")?;
    let (registry, pins) = build_registry(&config, gpio, Box::new(servo_bus), Box::new(expander_bus))?;

    let spi = RpiSpi::open(config.radio.spi_bus, config.radio.spi_clock_hz).context("opening SPI")?;
    let radio = bring_up_radio(Rf24::new(spi, pins), &config.radio, false)?;

    let stats = run_probe(&config, radio, None::<(Rf24<RpiSpi>, Role)>).await?;
    log_stats(&stats);
    drop(registry);
    Ok(())
}

#[cfg(not(feature = "raspberry-pi"))]
async fn run_hardware(_config: Config) -> Result<()> {
    anyhow::bail!("built without the raspberry-pi feature; run with --simulate")
}

/// This node on simulated buses, with its peer echoing over simulated air
async fn run_simulated(config: Config) -> Result<()> {
    info!("Running simulated two-node link");
    let air = Air::new();

    let sim_gpio = SimGpio::new();
    let chip = air.attach(sim_gpio.clone(), config.radio.ce_pin)?;
    let gpio = GpioDevice::new(Box::new(sim_gpio), config.gpio.pin_count);
    let i2c = SimI2c::new();
    let (registry, pins) = build_registry(&config, gpio, Box::new(i2c.clone()), Box::new(i2c))?;
    let radio = bring_up_radio(Rf24::new(chip, pins), &config.radio, false)?;

    let (peer, _) = simulated_radio(&air)?;
    let peer = bring_up_radio(peer, &config.radio, true)?;
    let peer_role = match config.radio.role {
        Role::Initiator => Role::Responder,
        Role::Responder => Role::Initiator,
    };

    let stats = run_probe(&config, radio, Some((peer, peer_role))).await?;
    log_stats(&stats);
    drop(registry);
    Ok(())
}

/// Register every peripheral of this node
///
/// Servo and expander faults are logged and leave that device out; the GPIO
/// device and the radio lines are required.
fn build_registry(
    config: &Config,
    gpio: GpioDevice,
    servo_bus: Box<dyn I2cBus>,
    expander_bus: Box<dyn I2cBus>,
) -> Result<(DeviceRegistry, RadioPins)> {
    let mut registry = DeviceRegistry::new();

    let irq = config.radio.irq_pin.map(|pin| gpio.line(pin)).transpose()?;
    let pins = RadioPins::new(gpio.line(config.radio.ce_pin)?, irq)?;
    registry.register(DeviceKind::GenericGpio, gpio)?;
    registry.register(DeviceKind::Radio, pins.clone())?;

    if let Some(led) = config.gpio.status_led_pin {
        let gpio = registry.gpio_mut()?;
        gpio.set_pin_mode(led, PinMode::Output)?;
        gpio.write_pin(led, PinState::High)?;
    }

    if config.servo.enabled {
        let mut servo = Pca9685::new(servo_bus, config.servo.i2c_address);
        let ready = servo
            .init(config.servo.pwm_frequency_hz)
            .and_then(|_| servo.set_servo_range(config.servo.range()));
        match ready {
            Ok(()) => registry.register(DeviceKind::ServoController, servo)?,
            Err(e) => warn!("Servo controller disabled: {}", e),
        }
    }

    if config.expander.enabled {
        registry.register(
            DeviceKind::IoExpander,
            Mcp23017::new(expander_bus, config.expander.i2c_address),
        )?;
    }

    if registry.contains(DeviceKind::ServoController) {
        if let Err(e) = park_selected_servo(config, &mut registry) {
            warn!("Calibration unavailable: {}", e);
        }
    }

    info!("{} devices registered", registry.len());
    Ok((registry, pins))
}

/// Drive the last selected servo channel to its calibrated left end
fn park_selected_servo(config: &Config, registry: &mut DeviceRegistry) -> periphlink::error::Result<()> {
    let mut calibration = ServoCalibration::load(
        &config.calibration.path,
        config.calibration.channels,
        config.calibration.default_left,
        config.calibration.default_right,
    )?;
    let channel = calibration.selected_channel();
    calibration.toggle_servo(registry.servo_mut()?, channel)?;
    Ok(())
}

/// Initialise and configure a radio; `swap_pipes` gives the peer's view
fn bring_up_radio<S: SpiBus>(mut radio: Rf24<S>, config: &RadioConfig, swap_pipes: bool) -> Result<Rf24<S>> {
    let (writing, reading) = if swap_pipes {
        (&config.reading_pipe, &config.writing_pipe)
    } else {
        (&config.writing_pipe, &config.reading_pipe)
    };

    radio.set_address_width(config.address_width)?;
    radio.begin().context("radio did not come up")?;
    radio.set_channel(config.channel)?;
    radio.set_payload_size(config.payload_size)?;
    radio.set_retries(config.retry_delay, config.retry_count)?;
    radio.open_writing_pipe(writing.as_bytes())?;
    radio.open_reading_pipe(1, reading.as_bytes())?;

    info!(
        "Radio writing to {}, reading pipe 1 at {}",
        format_address(writing.as_bytes()),
        format_address(reading.as_bytes())
    );
    for line in radio.details()?.lines() {
        info!("  {}", line);
    }
    Ok(radio)
}

/// Run this node's loop (and the simulated peer's) until Ctrl+C
async fn run_probe<S, P>(config: &Config, radio: Rf24<S>, peer: Option<(Rf24<P>, Role)>) -> Result<LinkStats>
where
    S: SpiBus + 'static,
    P: SpiBus + 'static,
{
    let timing = config.ping.timing();
    let (stop, shutdown) = watch::channel(false);

    let mut probe = PingPong::new(radio, config.radio.role, timing, shutdown.clone());
    let telemetry = if config.telemetry.enabled {
        let (reports, rx) = mpsc::unbounded_channel();
        probe = probe.with_reports(reports);
        Some(tokio::spawn(ProbeLog::from_config(&config.telemetry)?.consume(rx)))
    } else {
        None
    };

    let probe = tokio::spawn(probe.run());
    let peer = peer.map(|(radio, role)| tokio::spawn(PingPong::new(radio, role, timing, shutdown).run()));

    info!("Probing as {:?}. Press Ctrl+C to exit", config.radio.role);
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");
    stop.send(true).ok();

    let stats = probe.await?;
    if let Some(peer) = peer {
        let peer_stats = peer.await?;
        info!("Peer: {} echoed, {} completed", peer_stats.echoed, peer_stats.completed);
    }
    if let Some(telemetry) = telemetry {
        match telemetry.await {
            Ok(count) => info!("{} probe reports logged", count),
            Err(e) => error!("Telemetry task failed: {}", e),
        }
    }
    Ok(stats)
}

fn log_stats(stats: &LinkStats) {
    info!(
        "Link: {}/{} probes answered ({:.0}%), {} timed out, {} send failures",
        stats.completed,
        stats.sent,
        stats.success_rate() * 100.0,
        stats.timed_out,
        stats.send_failures
    );
    if let (Some(min), Some(avg), Some(max)) = (stats.min_delay_ms, stats.average_delay_ms(), stats.max_delay_ms) {
        info!("Round trip: min {} ms, avg {:.1} ms, max {} ms", min, avg, max);
    }
}
