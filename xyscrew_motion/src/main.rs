//! # xyscrew Motion Node
//!
//! Owns the X/Y step pins and serves the line command protocol over stdin
//! or a serial port.
//!
//! # Usage
//!
//! ```bash
//! # Simulated pins, commands on stdin
//! xyscrew_motion --config config/motion.toml
//!
//! # Serial link to the cycle controller, pinned RT thread
//! xyscrew_motion --config config/motion.toml --serial /dev/ttyAMA0 --cpu-core 3 --rt-priority 80
//! ```

#![deny(warnings)]

use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use xyscrew_common::config::{ConfigError, ConfigLoader};
use xyscrew_common::safety::{EstopCause, EstopLatch};
use xyscrew_common::time::MonotonicClock;
use xyscrew_motion::axis::AxisId;
use xyscrew_motion::config::MotionConfig;
use xyscrew_motion::drivers::DriverRegistry;
use xyscrew_motion::rt::RtOptions;
use xyscrew_motion::transport::{self, SessionEnd};
use xyscrew_motion::{MotionClient, MotionEngine, MotionServer};

/// xyscrew motion node - step pulses, homing and the line protocol
#[derive(Parser, Debug)]
#[command(name = "xyscrew_motion")]
#[command(version)]
#[command(about = "Step-pulse motion node for the X/Y screw-driving table")]
#[command(long_about = None)]
struct Args {
    /// Path to the motion configuration (motion.toml). Defaults apply when omitted.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Serve on this serial device instead of stdin
    #[arg(long, value_name = "DEVICE")]
    serial: Option<String>,

    /// Serial baud rate
    #[arg(long, default_value_t = 115_200)]
    baud: u32,

    /// Pin driver to load
    #[arg(short, long, default_value = "simulation")]
    driver: String,

    /// Pin the motion thread to this CPU core (requires the `rt` feature)
    #[arg(long)]
    cpu_core: Option<usize>,

    /// SCHED_FIFO priority of the motion thread (requires the `rt` feature)
    #[arg(long)]
    rt_priority: Option<i32>,

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
        // Tracing may not be initialised yet (bad config).
        eprintln!("xyscrew_motion: {e}");
        error!("Motion node failed: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&args)?;
    setup_tracing(&args, &config);
    info!(
        "{} v{} starting...",
        config.shared.service_name,
        env!("CARGO_PKG_VERSION")
    );
    if args.config.is_none() {
        warn!("No --config given; using built-in defaults");
    }

    let registry = DriverRegistry::with_builtin();
    info!("Pin drivers available: {:?}", registry.list_drivers());
    let x_pins = registry.create_pins(&args.driver, AxisId::X, &config)?;
    let y_pins = registry.create_pins(&args.driver, AxisId::Y, &config)?;

    let estop = EstopLatch::new();
    let engine = MotionEngine::new(&config, x_pins, y_pins, MonotonicClock::shared(), estop.clone());
    let server = MotionServer::spawn(
        engine,
        RtOptions {
            cpu_core: args.cpu_core,
            priority: args.rt_priority,
        },
    )?;

    let running = Arc::new(AtomicBool::new(true));
    let (done_tx, done_rx) = mpsc::channel::<()>();
    {
        let running = Arc::clone(&running);
        let done_tx = done_tx.clone();
        ctrlc::set_handler(move || {
            info!("Received shutdown signal");
            estop.trigger(EstopCause::Signal);
            running.store(false, Ordering::SeqCst);
            let _ = done_tx.send(());
        })?;
    }

    let client = server.client();
    let serial = args.serial.clone();
    let baud = args.baud;
    let session_running = Arc::clone(&running);
    // stdin cannot be interrupted, so the session runs detached and main
    // waits for whichever ends first: the session or the signal.
    thread::Builder::new()
        .name("xyscrew-session".to_string())
        .spawn(move || {
            match run_session(&client, serial.as_deref(), baud, &session_running) {
                Ok(end) => info!("Session ended: {:?}", end),
                Err(e) => error!("Session error: {}", e),
            }
            let _ = done_tx.send(());
        })?;

    let _ = done_rx.recv();
    running.store(false, Ordering::SeqCst);
    server.shutdown();
    info!("Motion node shutdown complete");
    Ok(())
}

fn run_session(
    client: &MotionClient,
    serial: Option<&str>,
    baud: u32,
    running: &AtomicBool,
) -> io::Result<SessionEnd> {
    match serial {
        Some(path) => {
            // A serial peer may reconnect; only a QUIT or signal ends service.
            loop {
                let (reader, writer) =
                    transport::open_serial(path, baud).map_err(io::Error::other)?;
                info!("Serving on {} at {} baud", path, baud);
                match transport::serve_session(client, reader, writer, Some(running))? {
                    SessionEnd::Eof => continue,
                    end => return Ok(end),
                }
            }
        }
        None => {
            info!("Serving on stdin");
            let stdin = io::BufReader::new(io::stdin());
            transport::serve_session(client, stdin, io::stdout().lock(), Some(running))
        }
    }
}

fn load_config(args: &Args) -> Result<MotionConfig, ConfigError> {
    let config = match &args.config {
        Some(path) => MotionConfig::load(path)?,
        None => MotionConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Setup tracing subscriber from CLI arguments and the configured level.
fn setup_tracing(args: &Args, config: &MotionConfig) {
    let directive = if args.verbose {
        "debug"
    } else {
        config.shared.log_level.as_directive()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    if args.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}
