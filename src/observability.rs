//! Job counters and tracing setup

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::worker::JobStatus;

/// Counters shared by every job the harness runs
#[derive(Debug, Default)]
pub struct Metrics {
    jobs_started: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_cancelled: AtomicU64,
    messages_drained: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_started(&self) {
        self.jobs_started.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_started", "Metric incremented");
    }

    /// Count a terminal status under its outcome
    pub fn job_finished(&self, status: &JobStatus) {
        let (counter, name) = match status {
            JobStatus::Succeeded => (&self.jobs_succeeded, "jobs_succeeded"),
            JobStatus::Cancelled => (&self.jobs_cancelled, "jobs_cancelled"),
            JobStatus::Failed(_) => (&self.jobs_failed, "jobs_failed"),
        };
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = name, "Metric incremented");
    }

    pub fn messages_drained(&self, count: u64) {
        self.messages_drained.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_started: self.jobs_started.load(Ordering::Relaxed),
            jobs_succeeded: self.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_cancelled: self.jobs_cancelled.load(Ordering::Relaxed),
            messages_drained: self.messages_drained.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_started: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_cancelled: u64,
    pub messages_drained: u64,
}

/// Install the global subscriber; `RUST_LOG` wins over `default_filter`
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // A subscriber may already be installed (tests, embedding applications)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::FailureCause;

    #[test]
    fn test_finished_jobs_counted_by_outcome() {
        let metrics = Metrics::new();
        metrics.job_started();
        metrics.job_started();
        metrics.job_started();
        metrics.job_finished(&JobStatus::Succeeded);
        metrics.job_finished(&JobStatus::Cancelled);
        metrics.job_finished(&JobStatus::Failed(FailureCause::Numerical("nan".into())));
        metrics.messages_drained(123);

        let snapshot = metrics.snapshot();
        assert_eq!(
            snapshot,
            MetricsSnapshot {
                jobs_started: 3,
                jobs_succeeded: 1,
                jobs_failed: 1,
                jobs_cancelled: 1,
                messages_drained: 123,
            }
        );
    }
}
