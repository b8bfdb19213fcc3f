//! The fixed set of hosts to poll, each with its connected client.

use crate::config::{DeviceSpec, HostConfig};
use crate::error::{Error, Result};
use crate::sensor::{SensorClient, SensorConnector};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// A connected host and the devices to read from it.
pub struct HostEntry {
    pub name: String,
    pub client: Arc<dyn SensorClient>,
    pub devices: Vec<DeviceSpec>,
}

impl HostEntry {
    pub fn new(
        name: impl Into<String>,
        client: Arc<dyn SensorClient>,
        devices: Vec<DeviceSpec>,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            devices,
        }
    }
}

impl std::fmt::Debug for HostEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostEntry")
            .field("name", &self.name)
            .field("devices", &self.devices)
            .finish_non_exhaustive()
    }
}

/// Immutable registry of hosts, built once at startup.
///
/// Entries are reference counted so every poll worker can own the entry it works on.
#[derive(Debug, Default)]
pub struct HostRegistry {
    entries: Vec<Arc<HostEntry>>,
}

impl HostRegistry {
    /// Connect to every configured host, in configuration order.
    ///
    /// The first host that cannot be reached aborts construction.
    pub async fn connect(hosts: &[HostConfig], connector: &dyn SensorConnector) -> Result<Self> {
        let mut entries = Vec::with_capacity(hosts.len());

        for host in hosts {
            let client = connector.connect(host).await?;
            info!(
                "registered host {} ({}) with {} devices",
                host.name,
                host.remote,
                host.devices.len()
            );
            entries.push(HostEntry::new(&host.name, client, host.devices.clone()));
        }

        Self::from_entries(entries)
    }

    /// Build a registry from already connected entries.
    pub fn from_entries(entries: Vec<HostEntry>) -> Result<Self> {
        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert(entry.name.as_str()) {
                return Err(Error::config_error(format!(
                    "host {} is declared more than once",
                    entry.name
                )));
            }
        }

        Ok(Self {
            entries: entries.into_iter().map(Arc::new).collect(),
        })
    }

    pub fn get(&self, name: &str) -> Option<&Arc<HostEntry>> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<HostEntry>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of configured devices across all hosts.
    pub fn device_count(&self) -> usize {
        self.entries.iter().map(|e| e.devices.len()).sum()
    }
}
