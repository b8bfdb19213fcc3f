//! Measurement points and their delivery to InfluxDB.
//!
//! Points are built per device by the poller and handed to a [`PointSink`].
//! The production sink is [`WriteBuffer`], which batches line protocol and
//! writes it from a background task.

pub mod influx;
pub mod point;
pub mod sink;

// Re-export commonly used items
pub use influx::{Health, InfluxClient, WriteBuffer, WriteStats};
pub use point::Point;
pub use sink::PointSink;
