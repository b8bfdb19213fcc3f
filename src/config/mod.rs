//! Startup configuration: the sensor fleet, the InfluxDB backend and the poll interval.

pub mod influx;
pub mod sensors;

pub use influx::InfluxConfig;
pub use sensors::{DeviceMatch, DeviceSpec, HostConfig, SensorConfig};

use crate::error::{Error, Result};
use std::time::Duration;

/// Parse a poll interval such as `1m`, `30s` or `1h30m`.
pub fn parse_interval(s: &str) -> Result<Duration> {
    let interval = humantime::parse_duration(s.trim())
        .map_err(|e| Error::interval_error(format!("'{}': {}", s, e)))?;

    if interval.is_zero() {
        return Err(Error::interval_error(format!("'{}': must be positive", s)));
    }

    Ok(interval)
}
