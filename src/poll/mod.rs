//! The polling core: host registry, point builder, poll cycle and scheduler.

pub mod builder;
pub mod cycle;
pub mod registry;
pub mod scheduler;

// Re-export commonly used items
pub use builder::{BuildError, PointBuilder, HOST_TAG};
pub use cycle::{CycleReport, PollCycle};
pub use registry::{HostEntry, HostRegistry};
pub use scheduler::{Scheduler, SchedulerState};
