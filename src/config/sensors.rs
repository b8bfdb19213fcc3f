//! YAML sensor configuration: which hosts to poll and which devices to read on each.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// The complete sensor configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SensorConfig {
    /// Hosts to poll, in configuration order
    pub hosts: Vec<HostConfig>,
}

/// One remote iiod host.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HostConfig {
    /// Name used as the `host` tag on every point from this host
    pub name: String,
    /// Remote address: `host`, `host:port` or `ip:host[:port]`
    pub remote: String,
    /// Devices to read on this host
    #[serde(default)]
    pub devices: Vec<DeviceSpec>,
}

/// A device to poll, with the measurement name it is submitted under.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceSpec {
    /// Measurement name for this device's points
    #[serde(rename = "name")]
    pub display_name: String,
    /// How to find the device in the host's context
    #[serde(rename = "match")]
    pub matcher: DeviceMatch,
}

/// Identifies a device on its host by IIO name, IIO id, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DeviceMatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

impl DeviceSpec {
    /// Create a device spec matched by IIO device name.
    pub fn by_name(display_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            matcher: DeviceMatch {
                name: Some(name.into()),
                id: None,
            },
        }
    }

    /// Create a device spec matched by IIO device id (e.g. `iio:device0`).
    pub fn by_id(display_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            matcher: DeviceMatch {
                name: None,
                id: Some(id.into()),
            },
        }
    }
}

impl DeviceMatch {
    /// Whether at least one identifier is set.
    pub fn is_set(&self) -> bool {
        self.name.is_some() || self.id.is_some()
    }
}

impl SensorConfig {
    /// Load and validate the configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path).map_err(|e| {
            Error::config_error(format!("error loading '{}': {}", path.display(), e))
        })?;

        Self::from_yaml(&yaml).map_err(|e| match e {
            Error::Config(msg) => Error::config_error(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Parse and validate the configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: SensorConfig = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config_error(format!("error unmarshalling YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the poller relies on.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();

        for host in &self.hosts {
            if host.name.is_empty() {
                return Err(Error::config_error(format!(
                    "host with remote '{}' has an empty name",
                    host.remote
                )));
            }
            if !seen.insert(host.name.as_str()) {
                return Err(Error::config_error(format!(
                    "host {} is declared more than once",
                    host.name
                )));
            }
            if host.remote.is_empty() {
                return Err(Error::config_error(format!(
                    "host {} has an empty remote",
                    host.name
                )));
            }

            for device in &host.devices {
                if !device.matcher.is_set() {
                    return Err(Error::config_error(format!(
                        "device {} at host {} has neither match.name nor match.id",
                        device.display_name, host.name
                    )));
                }
            }
        }

        Ok(())
    }
}
