//! Execution harness
//!
//! [`Harness::launch`] pairs every [`JobRequest`] with a fresh channel and a worker thread.
//! Jobs share nothing but the read-only default tables, so one job failing or blocking on a
//! full channel never affects another. The resulting [`Batch`] is either drained by the
//! harness itself ([`Harness::drain`]) or handed to external readers through
//! [`Batch::take_receiver`] and then joined.

mod report;
mod sink;

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::channel::{self, CancelHandle, ChannelError, Receiver};
use crate::defaults::{DefaultRegistry, DefaultSource, Method};
use crate::observability::Metrics;
use crate::worker::{
    ConfigError, FailureCause, JobInfo, JobStatus, LogDensity, Message, SamplerArgs, StdNormal,
    Worker,
};

pub use report::{BatchReport, JobReport};
pub use sink::{CollectingSink, CountingSink, MessageSink, TopicCounts, TracingSink};

/// Bounded waits applied to every job of a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HarnessOptions {
    /// Longest a worker may block on a full channel before failing as stalled
    pub push_timeout: Option<Duration>,
    /// Longest the draining consumer waits for the next message before cancelling the job
    pub pop_timeout: Option<Duration>,
}

/// One job submission: arguments left unset are resolved from the defaults
#[derive(Clone)]
pub struct JobRequest {
    pub name: String,
    pub method: Method,
    pub args: SamplerArgs,
    pub capacity: usize,
    pub model: Arc<dyn LogDensity>,
}

impl JobRequest {
    /// A `sample` job against a one-dimensional standard normal
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            method: Method::Sample,
            args: SamplerArgs::default(),
            capacity,
            model: Arc::new(StdNormal::default()),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn args(mut self, args: SamplerArgs) -> Self {
        self.args = args;
        self
    }

    pub fn model(mut self, model: Arc<dyn LogDensity>) -> Self {
        self.model = model;
        self
    }
}

impl fmt::Debug for JobRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRequest")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("args", &self.args)
            .field("capacity", &self.capacity)
            .field("dim", &self.model.dim())
            .finish()
    }
}

#[derive(Clone)]
pub struct Harness {
    defaults: Arc<dyn DefaultSource>,
    options: HarnessOptions,
    metrics: Arc<Metrics>,
}

impl Harness {
    pub fn new(defaults: Arc<dyn DefaultSource>, options: HarnessOptions) -> Self {
        Self {
            defaults,
            options,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Harness over the built-in CmdStan defaults with unbounded waits
    pub fn with_builtin_defaults() -> Self {
        Self::new(DefaultRegistry::builtin(), HarnessOptions::default())
    }

    pub fn options(&self) -> HarnessOptions {
        self.options
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Start every request on its own thread
    ///
    /// A request that cannot start (unsupported method, bad default, invalid capacity) becomes
    /// an already-failed job in the batch; the others are unaffected.
    pub fn launch(&self, requests: impl IntoIterator<Item = JobRequest>) -> Batch {
        let id = Uuid::now_v7();
        let jobs: Vec<RunningJob> = requests
            .into_iter()
            .map(|request| self.start(request))
            .collect();

        tracing::info!(batch = %id, jobs = jobs.len(), "Batch launched");
        Batch {
            id,
            jobs,
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Pop every job's messages into `sink` until each channel ends, then join the workers
    ///
    /// Receivers already taken from the batch are left to their owners.
    pub fn drain<S>(&self, mut batch: Batch, sink: &S) -> BatchReport
    where
        S: MessageSink + ?Sized,
    {
        let pop_timeout = self.options.pop_timeout;

        let counts: Vec<Option<u64>> = thread::scope(|scope| {
            let consumers: Vec<_> = batch
                .jobs
                .iter_mut()
                .map(|job| {
                    let receiver = job.receiver.take()?;
                    let info = job.info.clone();
                    thread::Builder::new()
                        .name(format!("drain-{}", info.name))
                        .spawn_scoped(scope, move || consume(&info, receiver, sink, pop_timeout))
                        .inspect_err(|err| {
                            tracing::error!(job = %job.info.name, error = %err, "Failed to spawn consumer thread, job will be cancelled");
                        })
                        .ok()
                })
                .collect();

            consumers
                .into_iter()
                .map(|consumer| consumer.and_then(|handle| handle.join().ok()))
                .collect()
        });

        let total: u64 = counts.iter().flatten().sum();
        self.metrics.messages_drained(total);
        batch.join_with_counts(counts)
    }

    /// [`Harness::launch`] followed by [`Harness::drain`]
    pub fn run<S>(&self, requests: impl IntoIterator<Item = JobRequest>, sink: &S) -> BatchReport
    where
        S: MessageSink + ?Sized,
    {
        let batch = self.launch(requests);
        self.drain(batch, sink)
    }

    fn start(&self, request: JobRequest) -> RunningJob {
        let info = JobInfo::new(request.name.clone());
        let started_at = Utc::now();
        self.metrics.job_started();

        match self.spawn_worker(&info, request) {
            Ok((handle, receiver)) => RunningJob {
                canceller: Some(receiver.canceller()),
                receiver: Some(receiver),
                state: JobState::Running(handle),
                info,
                started_at,
            },
            Err(cause) => {
                tracing::error!(job = %info.name, %cause, "Job could not start");
                RunningJob {
                    info,
                    started_at,
                    state: JobState::Finished(JobStatus::Failed(cause)),
                    receiver: None,
                    canceller: None,
                }
            }
        }
    }

    fn spawn_worker(
        &self,
        info: &JobInfo,
        request: JobRequest,
    ) -> Result<(JoinHandle<JobStatus>, Receiver<Message>), FailureCause> {
        if request.method != Method::Sample {
            return Err(ConfigError::UnsupportedMethod(request.method).into());
        }

        let args = request
            .args
            .merge_defaults(request.method, self.defaults.as_ref())?;
        let (sender, receiver) = channel::bounded(request.capacity).map_err(FailureCause::Channel)?;

        tracing::debug!(job = %info.name, capacity = request.capacity, ?args, "Resolved job arguments");

        let handle = Worker::new(info.clone(), args, request.model, sender)
            .push_timeout(self.options.push_timeout)
            .spawn()
            .map_err(|err| FailureCause::Spawn(err.to_string()))?;

        Ok((handle, receiver))
    }
}

impl fmt::Debug for Harness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Harness")
            .field("options", &self.options)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

fn consume<S>(
    info: &JobInfo,
    receiver: Receiver<Message>,
    sink: &S,
    pop_timeout: Option<Duration>,
) -> u64
where
    S: MessageSink + ?Sized,
{
    let mut count = 0u64;
    loop {
        let next = match pop_timeout {
            Some(timeout) => receiver.pop_timeout(timeout),
            None => receiver.pop(),
        };

        match next {
            Ok(message) => {
                count += 1;
                if !sink.deliver(info, message) {
                    tracing::info!(job = %info.name, "Sink declined message, cancelling job");
                    receiver.cancel();
                    break;
                }
            }
            Err(ChannelError::EndOfStream) => break,
            Err(ChannelError::TimedOut(waited)) => {
                tracing::warn!(job = %info.name, ?waited, "Job stalled, cancelling");
                receiver.cancel();
                break;
            }
            Err(err) => {
                tracing::error!(job = %info.name, error = %err, "Unexpected channel state");
                receiver.cancel();
                break;
            }
        }
    }
    tracing::debug!(job = %info.name, count, "Consumer finished");
    count
}

enum JobState {
    Running(JoinHandle<JobStatus>),
    Finished(JobStatus),
}

struct RunningJob {
    info: JobInfo,
    started_at: DateTime<Utc>,
    state: JobState,
    receiver: Option<Receiver<Message>>,
    canceller: Option<CancelHandle>,
}

/// Jobs started together by [`Harness::launch`]
pub struct Batch {
    id: Uuid,
    jobs: Vec<RunningJob>,
    metrics: Arc<Metrics>,
}

impl Batch {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Jobs in submission order
    pub fn jobs(&self) -> impl Iterator<Item = &JobInfo> {
        self.jobs.iter().map(|job| &job.info)
    }

    /// Hand the read end of job `index` to an external reader
    ///
    /// `None` if the job never started or its receiver was already taken.
    pub fn take_receiver(&mut self, index: usize) -> Option<Receiver<Message>> {
        self.jobs.get_mut(index)?.receiver.take()
    }

    pub fn canceller(&self) -> BatchCanceller {
        BatchCanceller {
            handles: self
                .jobs
                .iter()
                .filter_map(|job| job.canceller.clone())
                .collect(),
        }
    }

    /// Wait for every worker to reach a terminal status
    ///
    /// Receivers still held by the batch stay open until all workers finish, so a job whose
    /// channel fills up with no reader blocks here unless a push timeout is configured.
    pub fn join(self) -> BatchReport {
        let counts = vec![None; self.jobs.len()];
        self.join_with_counts(counts)
    }

    fn join_with_counts(self, counts: Vec<Option<u64>>) -> BatchReport {
        let Batch { id, jobs, metrics } = self;
        let mut open_receivers = Vec::new();

        let reports = jobs
            .into_iter()
            .zip(counts)
            .map(|(job, messages)| {
                let status = match job.state {
                    JobState::Finished(status) => status,
                    JobState::Running(handle) => handle.join().unwrap_or_else(|_| {
                        JobStatus::Failed(FailureCause::Panicked(
                            "worker thread terminated abnormally".into(),
                        ))
                    }),
                };
                open_receivers.extend(job.receiver);
                metrics.job_finished(&status);
                tracing::info!(job = %job.info.name, %status, "Job finished");
                JobReport::new(job.info, status, messages, job.started_at)
            })
            .collect();

        drop(open_receivers);
        let report = BatchReport {
            batch_id: id,
            jobs: reports,
        };
        tracing::info!(batch = %id, summary = %report.summary(), "Batch finished");
        report
    }
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("id", &self.id)
            .field("jobs", &self.jobs.iter().map(|job| &job.info).collect::<Vec<_>>())
            .finish()
    }
}

/// Cancels every channel of a batch, e.g. from a signal handler
#[derive(Debug, Clone)]
pub struct BatchCanceller {
    handles: Vec<CancelHandle>,
}

impl BatchCanceller {
    pub fn cancel_all(&self) {
        for handle in &self.handles {
            handle.cancel();
        }
        tracing::warn!(jobs = self.handles.len(), "Cancelled all jobs in batch");
    }
}
