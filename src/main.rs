use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use owl_teleop_runtime::behavior::{LogOnlyPower, PowerControl, SystemShutdown};
use owl_teleop_runtime::config::{RuntimeConfig, SERIAL_BAUDRATE, SERIAL_PORT};
use owl_teleop_runtime::motor::SerialCanSink;
use owl_teleop_runtime::runtime::{self, ZenohFrameSink};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SinkKind {
    /// Publish frames on zenoh for a bus bridge
    Zenoh,
    /// Write frames to an SLCAN serial adapter
    Serial,
    /// Drop all frames (dry run)
    None,
}

/// Gamepad teleoperation runtime for owlRobotics platforms
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// JSON config file (defaults are used for anything missing)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Control loop period in milliseconds (10 to 100)
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Where encoded bus frames go
    #[arg(long, value_enum, default_value_t = SinkKind::Zenoh)]
    sink: SinkKind,

    /// Serial port of the CAN adapter
    #[arg(long, default_value = SERIAL_PORT)]
    serial_port: String,

    /// Serial baudrate of the CAN adapter
    #[arg(long, default_value_t = SERIAL_BAUDRATE)]
    serial_baud: u32,

    /// CAN bus bitrate in kbit/s
    #[arg(long, default_value_t = 1000)]
    can_bitrate: u32,

    /// Let the rectangle button power off the host
    #[arg(long)]
    allow_shutdown: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    if let Err(e) = start(args).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

async fn start(args: Args) -> Result<(), BoxError> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading config from {}", path.display());
            RuntimeConfig::load(path)?
        }
        None => RuntimeConfig::default(),
    };
    if let Some(ms) = args.tick_ms {
        config.tick_period = Duration::from_millis(ms);
        config.validate()?;
    }

    if args.allow_shutdown {
        launch(args, config, SystemShutdown).await
    } else {
        launch(args, config, LogOnlyPower).await
    }
}

async fn launch<P: PowerControl>(
    args: Args,
    config: RuntimeConfig,
    power: P,
) -> Result<(), BoxError> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    match args.sink {
        SinkKind::Zenoh => {
            let sink = ZenohFrameSink::declare(&session).await?;
            runtime::run(session, config, power, Some(sink)).await
        }
        SinkKind::Serial => {
            let sink = match SerialCanSink::open(
                &args.serial_port,
                args.serial_baud,
                args.can_bitrate,
                config.bus_send_timeout,
            ) {
                Ok(sink) => Some(sink),
                Err(e) => {
                    // keep running: input and health still work, motors stay idle
                    warn!("CAN adapter unavailable: {}", e);
                    None
                }
            };
            runtime::run(session, config, power, sink).await
        }
        SinkKind::None => runtime::run(session, config, power, None::<ZenohFrameSink>).await,
    }
}
