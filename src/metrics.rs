//! Observability counters the executor and era supervisor update as they
//! run. Kept as a narrow trait rather than a concrete metrics backend so
//! deployments can wire in whichever exporter (Prometheus, StatsD, ...)
//! fits their infrastructure; the default implementation just logs at
//! debug level through `tracing`, which is enough for local runs and
//! tests.

use tracing::debug;

pub trait Metrics: Send + Sync {
  fn message_inserted(&self);
  fn equivocation_detected(&self);
  fn block_finalized(&self, fault_tolerance: f64);
  fn orphan_parked(&self);
  fn orphan_pruned(&self, count: usize);
}

#[derive(Debug, Default)]
pub struct TracingMetrics;

impl Metrics for TracingMetrics {
  fn message_inserted(&self) {
    debug!("message inserted");
  }

  fn equivocation_detected(&self) {
    debug!("equivocation detected");
  }

  fn block_finalized(&self, fault_tolerance: f64) {
    debug!(fault_tolerance, "block finalized");
  }

  fn orphan_parked(&self) {
    debug!("orphan parked");
  }

  fn orphan_pruned(&self, count: usize) {
    debug!(count, "orphans pruned");
  }
}
