//! The submission side of a poll cycle.

use crate::metrics::point::Point;

/// Accepts points for asynchronous delivery.
///
/// Submission never blocks and never reports failure: delivery problems are
/// the sink's own concern.
pub trait PointSink: Send + Sync {
    fn submit(&self, point: Point);
}
