//! Turns one device's channel readings into a measurement point.

use crate::config::DeviceSpec;
use crate::metrics::Point;
use crate::sensor::{ChannelSource, SensorContext};
use tracing::{debug, info};

/// Tag carrying the originating host's name.
pub const HOST_TAG: &str = "host";

/// Why a configured device produced no point this cycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("could not find device {device} at host {host}")]
    DeviceNotFound { device: String, host: String },

    #[error("device {device} at host {host} yielded zero attributes")]
    Empty { device: String, host: String },
}

/// Builds points for the devices of one host.
#[derive(Debug, Clone, Copy)]
pub struct PointBuilder<'a> {
    host: &'a str,
}

impl<'a> PointBuilder<'a> {
    pub fn new(host: &'a str) -> Self {
        Self { host }
    }

    /// Resolve `spec` against a freshly fetched context and build its point.
    pub fn build_for(&self, spec: &DeviceSpec, context: &SensorContext) -> Result<Point, BuildError> {
        let device = context
            .find_device(spec.matcher.name.as_deref(), spec.matcher.id.as_deref())
            .ok_or_else(|| BuildError::DeviceNotFound {
                device: spec.display_name.clone(),
                host: self.host.to_string(),
            })?;

        self.build(&spec.display_name, device)
    }

    /// Build a point named `display_name` from every channel of `device` that has a value.
    pub fn build(&self, display_name: &str, device: &impl ChannelSource) -> Result<Point, BuildError> {
        let mut point = Point::new(display_name).add_tag(HOST_TAG, self.host);

        for channel in device.list_channels() {
            match device.read_channel_value(channel) {
                Some(value) if value.is_finite() => {
                    info!("{}/{}/{}: {:.2}", self.host, display_name, channel, value);
                    point.add_field(channel, value);
                }
                Some(value) => debug!("{}/{}/{}: skipping {}", self.host, display_name, channel, value),
                None => debug!("{}/{}/{}: no value", self.host, display_name, channel),
            }
        }

        if point.is_empty() {
            return Err(BuildError::Empty {
                device: display_name.to_string(),
                host: self.host.to_string(),
            });
        }

        Ok(point)
    }
}
