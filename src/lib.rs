//! # iioflux - IIO sensors to InfluxDB
//!
//! Periodically polls a fleet of remote Linux IIO daemons (`iiod`) for their
//! current channel readings and submits them as points to InfluxDB v2.
//!
//! ## Features
//!
//! - **Concurrent polling**: one worker per host per cycle, failures scoped to their host
//! - **Fixed interval**: cycles never overlap, overruns delay the next tick
//! - **Buffered writes**: points are batched and flushed in the background
//! - **Graceful shutdown**: the final cycle's points are flushed before exit
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use iioflux::{InfluxConfig, SensorConfig, Submitter};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sensors = SensorConfig::load("config.yaml")?;
//!     let influx = InfluxConfig::new("http://localhost:8086", "token")
//!         .with_org("home")
//!         .with_bucket("sensors");
//!
//!     let submitter = Submitter::new(&sensors, influx, "1m").await?;
//!     let shutdown = CancellationToken::new();
//!
//!     submitter.run(shutdown).await;
//!     submitter.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod poll;
pub mod sensor;
pub mod submitter;

// Re-export public API
pub use config::{DeviceMatch, DeviceSpec, HostConfig, InfluxConfig, SensorConfig};
pub use error::{Error, Result};
pub use metrics::{InfluxClient, Point, PointSink, WriteBuffer};
pub use poll::{BuildError, CycleReport, HostRegistry, PointBuilder, PollCycle, Scheduler, SchedulerState};
pub use sensor::{IiodClient, IiodConnector, SensorClient, SensorConnector, SensorContext};
pub use submitter::Submitter;

/// The default poll interval
pub const DEFAULT_INTERVAL: &str = "1m";

/// The default sensor configuration file
pub const DEFAULT_SENSORS_PATH: &str = "config.yaml";
