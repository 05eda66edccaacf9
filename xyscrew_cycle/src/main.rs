//! # xyscrew Cycle Node
//!
//! Runs one device program on the screw station and prints the final cycle
//! status as JSON.
//!
//! # Usage
//!
//! ```bash
//! # Everything simulated: in-process motion node, simulated station I/O
//! xyscrew_cycle --config config/cycle.toml --device pcb-a
//!
//! # Motion node on a serial port
//! xyscrew_cycle --config config/cycle.toml --device pcb-a --serial /dev/ttyUSB0
//! ```
//!
//! Exit status is 0 only when every requested cycle completed.

#![deny(warnings)]

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use xyscrew_common::config::{ConfigError, ConfigLoader, secs};
use xyscrew_common::safety::{EstopCause, EstopLatch};
use xyscrew_common::time::{MonotonicClock, SharedClock};
use xyscrew_cycle::drivers::IoDriverRegistry;
use xyscrew_cycle::{
    CycleConfig, CycleState, CycleStateMachine, EstopWatcher, MotionLink, StreamLink,
};
use xyscrew_motion::axis::AxisId;
use xyscrew_motion::config::MotionConfig;
use xyscrew_motion::drivers::DriverRegistry;
use xyscrew_motion::rt::RtOptions;
use xyscrew_motion::transport;
use xyscrew_motion::{MotionEngine, MotionServer};

/// xyscrew cycle node - screw-driving program runner
#[derive(Parser, Debug)]
#[command(name = "xyscrew_cycle")]
#[command(version)]
#[command(about = "Screw-driving cycle controller for the X/Y table")]
#[command(long_about = None)]
struct Args {
    /// Path to the cycle configuration (cycle.toml)
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Device program to run
    #[arg(long)]
    device: String,

    /// Number of cycles to run back to back
    #[arg(long, default_value_t = 1)]
    cycles: u32,

    /// Motion configuration for the in-process motion node
    #[arg(long, value_name = "FILE")]
    motion_config: Option<PathBuf>,

    /// Talk to a motion node on this serial device instead of in-process
    #[arg(long, value_name = "DEVICE")]
    serial: Option<String>,

    /// Serial baud rate
    #[arg(long, default_value_t = 115_200)]
    baud: u32,

    /// Response timeout on the serial link, in seconds
    #[arg(long, default_value_t = 120.0)]
    link_timeout: f64,

    /// Station I/O driver to load
    #[arg(long, default_value = "simulation")]
    io: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("xyscrew_cycle: {e}");
        error!("Cycle node failed: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = CycleConfig::load(&args.config)?;
    config.validate()?;
    setup_tracing(&args, &config);
    info!(
        "{} v{} starting...",
        config.shared.service_name,
        env!("CARGO_PKG_VERSION")
    );

    let clock = MonotonicClock::shared();
    let estop = EstopLatch::new();

    let (link, server): (Box<dyn MotionLink>, Option<MotionServer>) = match &args.serial {
        Some(path) => {
            let (reader, writer) = transport::open_serial(path, args.baud)?;
            info!("Motion node on {} at {} baud", path, args.baud);
            let link = StreamLink::new(reader, writer, clock.clone(), secs(args.link_timeout));
            (Box::new(link), None)
        }
        None => {
            let server = spawn_motion(&args, clock.clone(), estop.clone())?;
            (Box::new(server.client()), Some(server))
        }
    };

    let registry = IoDriverRegistry::with_builtin();
    let io = registry.create_io(&args.io, &config.io, clock.clone())?;

    let watcher = EstopWatcher::spawn(
        io.estop_input,
        config.io.estop_sensor.clone(),
        estop.clone(),
        link.estop_signal(),
        config.timeouts.poll(),
    )?;
    let mut machine =
        CycleStateMachine::new(&config, link, io.relays, io.sensors, clock, estop.clone());
    ctrlc::set_handler(move || {
        warn!("Interrupted; stopping the cycle");
        estop.trigger(EstopCause::Operator);
    })?;

    machine.load_device(&args.device)?;
    let mut outcome = CycleState::Ready;
    for cycle in 1..=args.cycles {
        if cycle > 1 {
            machine.reset()?;
        }
        info!("Cycle {}/{} on '{}'", cycle, args.cycles, args.device);
        outcome = machine.start()?;
        if outcome != CycleState::Completed {
            break;
        }
    }

    let status = machine.status();
    println!("{}", serde_json::to_string_pretty(&status)?);

    watcher.stop();
    if let Some(server) = server {
        server.shutdown();
    }

    if outcome != CycleState::Completed {
        return Err(format!(
            "cycle ended in {}{}",
            outcome,
            status
                .error_code
                .or(status.message)
                .map(|c| format!(" ({c})"))
                .unwrap_or_default()
        )
        .into());
    }
    info!("Cycle node finished ({} cycles)", status.cycle_count);
    Ok(())
}

/// In-process motion node on simulated pins sharing the cycle's latch.
fn spawn_motion(
    args: &Args,
    clock: SharedClock,
    estop: EstopLatch,
) -> Result<MotionServer, Box<dyn std::error::Error>> {
    let config = load_motion_config(args)?;
    let registry = DriverRegistry::with_builtin();
    let x_pins = registry.create_pins("simulation", AxisId::X, &config)?;
    let y_pins = registry.create_pins("simulation", AxisId::Y, &config)?;
    let engine = MotionEngine::new(&config, x_pins, y_pins, clock, estop);
    let server = MotionServer::spawn(engine, RtOptions::default())?;
    info!("In-process motion node started");
    Ok(server)
}

fn load_motion_config(args: &Args) -> Result<MotionConfig, ConfigError> {
    let config = match &args.motion_config {
        Some(path) => MotionConfig::load(path)?,
        None => MotionConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Setup tracing subscriber from CLI arguments and the configured level.
fn setup_tracing(args: &Args, config: &CycleConfig) {
    let directive = if args.verbose {
        "debug"
    } else {
        config.shared.log_level.as_directive()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    // Logs go to stderr; stdout carries the status JSON.
    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }
}
