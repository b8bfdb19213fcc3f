//! Startup wiring and shutdown for the poller.

use crate::config::{parse_interval, InfluxConfig, SensorConfig};
use crate::error::Result;
use crate::metrics::{InfluxClient, WriteBuffer};
use crate::poll::{HostRegistry, PollCycle, Scheduler};
use crate::sensor::{IiodConnector, SensorConnector};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Connects hosts and backend at startup, runs the scheduler, and flushes on shutdown.
pub struct Submitter {
    registry: Arc<HostRegistry>,
    influx: InfluxClient,
    buffer: Arc<WriteBuffer>,
    interval: Duration,
}

impl Submitter {
    /// Build a submitter talking iiod to every configured host.
    pub async fn new(sensors: &SensorConfig, influx: InfluxConfig, interval: &str) -> Result<Self> {
        Self::with_connector(sensors, influx, interval, &IiodConnector::default()).await
    }

    /// Build a submitter using `connector` to reach the sensor hosts.
    ///
    /// Fails if the interval is malformed, any host is unreachable, or the
    /// backend is unreachable or unhealthy.
    pub async fn with_connector(
        sensors: &SensorConfig,
        influx: InfluxConfig,
        interval: &str,
        connector: &dyn SensorConnector,
    ) -> Result<Self> {
        let interval = parse_interval(interval)?;
        let registry = HostRegistry::connect(&sensors.hosts, connector).await?;

        let influx = InfluxClient::connect(influx)?;
        let health = influx.check_health().await?;
        info!(
            "connected with InfluxDB version {}",
            health.version.as_deref().unwrap_or("unknown")
        );

        let buffer = influx.write_buffer()?;

        Ok(Self {
            registry: Arc::new(registry),
            influx,
            buffer,
            interval,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn registry(&self) -> &HostRegistry {
        &self.registry
    }

    /// The write buffer every cycle submits into.
    pub fn write_buffer(&self) -> &WriteBuffer {
        &self.buffer
    }

    /// A scheduler over this submitter's hosts and write buffer.
    pub fn scheduler(&self) -> Scheduler {
        let cycle = PollCycle::new(Arc::clone(&self.registry), self.buffer.clone());
        Scheduler::new(cycle, self.interval)
    }

    /// Poll until `shutdown` is cancelled. Returns the number of completed cycles.
    pub async fn run(&self, shutdown: CancellationToken) -> u64 {
        self.scheduler().run(shutdown).await
    }

    /// Flush buffered points and close the backend connection.
    ///
    /// Call after [`Submitter::run`] has returned so the final cycle's points are included.
    pub async fn shutdown(self) {
        info!("shutting down, flushing buffered points");
        self.influx.close().await;
    }
}
