use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

use crate::worker::{JobInfo, Message, Phase};

/// Destination for messages popped by [`Harness::drain`](super::Harness::drain)
///
/// Called from one consumer thread per job, so implementations must tolerate concurrent calls
/// for different jobs.
pub trait MessageSink: Send + Sync {
    /// Handle one message; returning `false` cancels the job
    fn deliver(&self, job: &JobInfo, message: Message) -> bool;
}

/// Per-topic message counts of one job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopicCounts {
    pub progress: u64,
    pub draws: u64,
    pub adaptation: u64,
}

impl TopicCounts {
    pub fn total(&self) -> u64 {
        self.progress + self.draws + self.adaptation
    }
}

/// Counts messages by job and topic, discarding their content
#[derive(Debug, Default)]
pub struct CountingSink {
    total: AtomicU64,
    jobs: Mutex<HashMap<Uuid, TopicCounts>>,
}

impl CountingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn counts(&self, job: &Uuid) -> TopicCounts {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(job)
            .copied()
            .unwrap_or_default()
    }
}

impl MessageSink for CountingSink {
    fn deliver(&self, job: &JobInfo, message: Message) -> bool {
        self.total.fetch_add(1, Ordering::Relaxed);
        let mut jobs = self
            .jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let counts = jobs.entry(job.id).or_default();
        match message {
            Message::Progress { .. } => counts.progress += 1,
            Message::Draw(_) => counts.draws += 1,
            Message::Adaptation { .. } => counts.adaptation += 1,
        }
        true
    }
}

/// Keeps every message in memory, grouped by job
#[derive(Debug, Default)]
pub struct CollectingSink {
    jobs: Mutex<HashMap<Uuid, Vec<Message>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return the messages collected for `job`, in arrival order
    pub fn take(&self, job: &Uuid) -> Vec<Message> {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(job)
            .unwrap_or_default()
    }
}

impl MessageSink for CollectingSink {
    fn deliver(&self, job: &JobInfo, message: Message) -> bool {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(job.id)
            .or_default()
            .push(message);
        true
    }
}

/// Reports progress through `tracing`; draws are only visible at trace level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MessageSink for TracingSink {
    fn deliver(&self, job: &JobInfo, message: Message) -> bool {
        match &message {
            Message::Progress {
                iteration,
                total,
                phase,
            } => {
                let percent = if *total > 0 { 100 * iteration / total } else { 100 };
                let phase = match phase {
                    Phase::Warmup => "Warmup",
                    Phase::Sampling => "Sampling",
                };
                tracing::info!(job = %job.name, "Iteration: {iteration} / {total} [{percent:>3}%] ({phase})");
            }
            Message::Adaptation {
                step_size,
                inv_metric,
            } => {
                tracing::info!(job = %job.name, step_size, ?inv_metric, "Adaptation terminated");
            }
            Message::Draw(draw) => {
                tracing::trace!(
                    job = %job.name,
                    iteration = draw.iteration,
                    lp = draw.lp,
                    divergent = draw.divergent,
                    "Draw"
                );
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(iteration: u64) -> Message {
        Message::Progress {
            iteration,
            total: 10,
            phase: Phase::Warmup,
        }
    }

    #[test]
    fn test_counting_sink_separates_jobs() {
        let sink = CountingSink::new();
        let a = JobInfo::new("a");
        let b = JobInfo::new("b");

        assert!(sink.deliver(&a, progress(1)));
        assert!(sink.deliver(
            &a,
            Message::Adaptation {
                step_size: 0.5,
                inv_metric: vec![1.0],
            }
        ));
        assert!(sink.deliver(&b, progress(1)));

        assert_eq!(sink.total(), 3);
        assert_eq!(
            sink.counts(&a.id),
            TopicCounts {
                progress: 1,
                draws: 0,
                adaptation: 1
            }
        );
        assert_eq!(sink.counts(&b.id).total(), 1);
        assert_eq!(sink.counts(&uuid::Uuid::nil()).total(), 0);
    }

    #[test]
    fn test_collecting_sink_keeps_order() {
        let sink = CollectingSink::new();
        let job = JobInfo::new("a");
        for i in 1..=3 {
            sink.deliver(&job, progress(i));
        }

        let messages = sink.take(&job.id);
        assert_eq!(messages, vec![progress(1), progress(2), progress(3)]);
        assert!(sink.take(&job.id).is_empty());
    }
}
