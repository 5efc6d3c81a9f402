//! simcp-node - CLI for the station simulator
//!
//! Connects a simulated charge point to a CSMS and prints the protocol
//! traffic until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Connect with defaults
//! simcp-node --station CS-001
//!
//! # Three connectors against a specific CSMS, sped up 4x
//! simcp-node --station CS-001 \
//!     --url ws://localhost:8081/ocpp/ws --connectors 3 --sim-speed 4.0
//!
//! # Begin charging on connector 1 immediately
//! simcp-node --station CS-001 --auto-start
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use simcp_station::{ConnectorSnapshot, StationConfig, StationObserver, StationSimulator};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// OCPP-like charge point simulator for exercising a CSMS by hand
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// CSMS WebSocket URL
    #[arg(long, default_value = "ws://localhost:8081/ocpp/ws")]
    url: String,

    /// Station ID
    #[arg(short, long, default_value = "CS-001")]
    station: String,

    /// Number of connectors
    #[arg(short, long, default_value = "1")]
    connectors: u32,

    /// Heartbeat interval in seconds
    #[arg(long, default_value = "30")]
    heartbeat: u64,

    /// Start a session on connector 1 right after connecting
    #[arg(long)]
    auto_start: bool,

    /// Simulated-time speed multiplier
    #[arg(long, default_value = "1.0")]
    sim_speed: f64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Prints protocol traffic and connector state to stdout. Both callbacks
/// arrive from the simulator's own task; `println!` already serializes
/// cross-thread output, so no extra hand-off is needed.
struct StdoutObserver;

impl StationObserver for StdoutObserver {
    fn log(&self, line: &str) {
        println!("{line}");
    }

    fn publish_state(&self, connectors: &[ConnectorSnapshot]) {
        let row = connectors
            .iter()
            .map(|c| {
                format!(
                    "{}:{} {:.2} kWh {}",
                    c.connector_id,
                    c.status,
                    c.energy_kwh,
                    c.transaction_id.as_deref().unwrap_or("-"),
                )
            })
            .collect::<Vec<_>>()
            .join(" | ");
        println!("state: {row}");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = StationConfig::new(&args.url, &args.station)
        .with_connectors(args.connectors)
        .with_heartbeat_interval(Duration::from_secs(args.heartbeat))
        .with_auto_start(args.auto_start)
        .with_sim_speed(args.sim_speed);

    info!(
        url = %args.url,
        station = %args.station,
        connectors = args.connectors,
        "starting station simulator"
    );

    let station = StationSimulator::spawn(config, Arc::new(StdoutObserver))?;
    station.connect();

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    station.disconnect();
    station.shutdown().await;

    Ok(())
}
