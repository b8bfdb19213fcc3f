//! One round of collection across every registered host.

use crate::metrics::PointSink;
use crate::poll::builder::PointBuilder;
use crate::poll::registry::{HostEntry, HostRegistry};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// What a poll cycle (or one host within it) did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Hosts whose worker ran
    pub hosts_polled: usize,
    /// Hosts that contributed nothing because their refresh failed or the worker died
    pub hosts_failed: usize,
    /// Points handed to the sink
    pub points_submitted: usize,
    /// Devices skipped because they were not found or yielded no fields
    pub devices_skipped: usize,
}

impl CycleReport {
    fn merge(&mut self, other: CycleReport) {
        self.hosts_polled += other.hosts_polled;
        self.hosts_failed += other.hosts_failed;
        self.points_submitted += other.points_submitted;
        self.devices_skipped += other.devices_skipped;
    }
}

/// Fans out one worker per host and waits for all of them.
#[derive(Clone)]
pub struct PollCycle {
    registry: Arc<HostRegistry>,
    sink: Arc<dyn PointSink>,
}

impl PollCycle {
    pub fn new(registry: Arc<HostRegistry>, sink: Arc<dyn PointSink>) -> Self {
        Self { registry, sink }
    }

    pub fn registry(&self) -> &HostRegistry {
        &self.registry
    }

    /// Run one cycle. Returns once every host's worker has finished.
    ///
    /// Failures stay scoped to their host: they are logged and counted, never
    /// propagated.
    pub async fn run(&self) -> CycleReport {
        debug!("entering poll cycle");

        let mut workers = JoinSet::new();
        for entry in self.registry.iter() {
            debug!("working on host {}", entry.name);
            workers.spawn(poll_host(Arc::clone(entry), Arc::clone(&self.sink)));
        }

        let mut report = CycleReport::default();
        while let Some(result) = workers.join_next().await {
            match result {
                Ok(host_report) => report.merge(host_report),
                Err(e) => {
                    error!("host worker did not complete: {}", e);
                    report.hosts_polled += 1;
                    report.hosts_failed += 1;
                }
            }
        }

        report
    }
}

async fn poll_host(entry: Arc<HostEntry>, sink: Arc<dyn PointSink>) -> CycleReport {
    let mut report = CycleReport {
        hosts_polled: 1,
        ..Default::default()
    };

    let context = match entry.client.refresh_attributes().await {
        Ok(context) => context,
        Err(e) => {
            warn!("error fetching attributes from host {}: {}", entry.name, e);
            report.hosts_failed = 1;
            return report;
        }
    };

    let builder = PointBuilder::new(&entry.name);
    for device in &entry.devices {
        match builder.build_for(device, &context) {
            Ok(point) => {
                sink.submit(point);
                report.points_submitted += 1;
            }
            Err(e) => {
                warn!("{}", e);
                report.devices_skipped += 1;
            }
        }
    }

    report
}
