//! iioflux - submit iiod measurements into InfluxDB
//!
//! Every flag can also be set through an `IIOFLUX_`-prefixed environment variable.

use anyhow::Context;
use clap::Parser;
use iioflux::config::influx::{DEFAULT_INFLUXDB_BUCKET, DEFAULT_INFLUXDB_TOKEN, DEFAULT_INFLUXDB_URL};
use iioflux::{InfluxConfig, SensorConfig, Submitter, DEFAULT_INTERVAL, DEFAULT_SENSORS_PATH};
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "iioflux")]
#[command(about = "submit iiod measurements into influxdb")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// YAML file containing the remote config
    #[arg(long, env = "IIOFLUX_SENSORS", default_value = DEFAULT_SENSORS_PATH)]
    sensors: String,

    /// Interval between polls, e.g. 30s, 1m or 1h30m
    #[arg(long, env = "IIOFLUX_INTERVAL", default_value = DEFAULT_INTERVAL)]
    interval: String,

    /// Log level
    #[arg(long, env = "IIOFLUX_LOGLEVEL", default_value = "info")]
    loglevel: String,

    /// InfluxDB Organization
    #[arg(long = "influxdb_org", env = "IIOFLUX_INFLUXDB_ORG", default_value = "")]
    influxdb_org: String,

    /// InfluxDB URL
    #[arg(long = "influxdb_url", env = "IIOFLUX_INFLUXDB_URL", default_value = DEFAULT_INFLUXDB_URL)]
    influxdb_url: String,

    /// InfluxDB token
    #[arg(
        long = "influxdb_token",
        env = "IIOFLUX_INFLUXDB_TOKEN",
        default_value = DEFAULT_INFLUXDB_TOKEN,
        hide_env_values = true
    )]
    influxdb_token: String,

    /// InfluxDB bucket
    #[arg(long = "influxdb_bucket", env = "IIOFLUX_INFLUXDB_BUCKET", default_value = DEFAULT_INFLUXDB_BUCKET)]
    influxdb_bucket: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = parse_log_level(&cli.loglevel)?;
    init_logging(level)?;
    info!("setting log level to {}", level);

    let sensors = SensorConfig::load(&cli.sensors)
        .with_context(|| format!("loading sensor config from {}", cli.sensors))?;

    let influx = InfluxConfig::new(&cli.influxdb_url, &cli.influxdb_token)
        .with_org(&cli.influxdb_org)
        .with_bucket(&cli.influxdb_bucket);

    let submitter = Submitter::new(&sensors, influx, &cli.interval)
        .await
        .context("starting submitter")?;

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    submitter.run(shutdown).await;
    submitter.shutdown().await;

    info!("quitting");
    Ok(())
}

/// Parse a log level name, case-insensitively.
fn parse_log_level(s: &str) -> iioflux::Result<Level> {
    match s.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(iioflux::Error::LogLevel(format!("not a valid log level: {:?}", s))),
    }
}

fn init_logging(level: Level) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

/// Cancel `token` on SIGINT or SIGTERM.
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT caught, scheduling a stop"),
        _ = terminate => info!("SIGTERM caught, scheduling a stop"),
    }

    token.cancel();
}
