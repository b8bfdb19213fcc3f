//! Remote sensor access.
//!
//! A [`SensorClient`] fetches a fresh [`SensorContext`] from one host. Device
//! lookup and channel reads then work on that owned snapshot, so a worker never
//! holds the connection while building points.

pub mod context;
pub mod iiod;

// Re-export commonly used items
pub use context::{Channel, ChannelSource, Device, SensorContext};
pub use iiod::{IiodClient, IiodConnector};

use crate::config::HostConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// A connected client for one sensor host.
#[async_trait]
pub trait SensorClient: Send + Sync {
    /// Fetch the host's devices, channels and current attribute values.
    async fn refresh_attributes(&self) -> Result<SensorContext>;
}

/// Establishes [`SensorClient`] connections at startup.
#[async_trait]
pub trait SensorConnector: Send + Sync {
    /// Connect to the host described by `host`.
    ///
    /// Fails with [`crate::Error::Connection`] naming the host.
    async fn connect(&self, host: &HostConfig) -> Result<Arc<dyn SensorClient>>;
}
