//! Sampling worker
//!
//! A [`Worker`] owns the write end of one channel. It validates its arguments, runs NUTS
//! warmup and sampling, pushes [`Message`]s at the configured cadence and always closes the
//! channel before reporting a [`JobStatus`]. Failures never cross the thread boundary as
//! panics: [`Worker::spawn`] turns them into [`FailureCause::Panicked`].

mod adaptation;
pub mod args;
pub mod message;
pub mod model;
mod nuts;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::channel::{ChannelError, Sender};
use adaptation::Adaptation;
use nuts::{Nuts, Transition};

pub use args::{ARGUMENT_NAMES, ConfigError, SamplerArgs, WorkerConfig};
pub use message::{Draw, Message, Phase};
pub use model::{DiagNormal, LogDensity, ModelError, StdNormal};
pub use nuts::SamplerError;

/// Identity of one job within a batch
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct JobInfo {
    pub id: Uuid,
    pub name: String,
}

impl JobInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

/// Why a job did not succeed
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FailureCause {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("numerical failure: {0}")]
    Numerical(String),

    #[error("consumer stalled, push waited {0:?}")]
    Stalled(Duration),

    #[error("channel error: {0}")]
    Channel(ChannelError),

    #[error("worker panicked: {0}")]
    Panicked(String),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

impl From<SamplerError> for FailureCause {
    fn from(err: SamplerError) -> Self {
        FailureCause::Numerical(err.to_string())
    }
}

/// Terminal outcome of one worker
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Succeeded,
    Cancelled,
    Failed(FailureCause),
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Succeeded => "succeeded",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Failed(_) => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Succeeded)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobStatus::Cancelled)
    }

    pub fn failure(&self) -> Option<&FailureCause> {
        match self {
            JobStatus::Failed(cause) => Some(cause),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Failed(cause) => write!(f, "failed: {cause}"),
            other => f.write_str(other.as_str()),
        }
    }
}

impl Serialize for JobStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("JobStatus", 2)?;
        state.serialize_field("state", self.as_str())?;
        state.serialize_field("cause", &self.failure().map(ToString::to_string))?;
        state.end()
    }
}

/// Early exit from the sampling loop
enum Stop {
    Cancelled,
    Failed(FailureCause),
}

impl From<FailureCause> for Stop {
    fn from(cause: FailureCause) -> Self {
        Stop::Failed(cause)
    }
}

impl From<SamplerError> for Stop {
    fn from(err: SamplerError) -> Self {
        Stop::Failed(err.into())
    }
}

pub struct Worker {
    info: JobInfo,
    args: SamplerArgs,
    model: Arc<dyn LogDensity>,
    sender: Sender<Message>,
    push_timeout: Option<Duration>,
}

impl Worker {
    /// `args` should already carry resolved defaults; validation happens in [`Worker::run`]
    pub fn new(
        info: JobInfo,
        args: SamplerArgs,
        model: Arc<dyn LogDensity>,
        sender: Sender<Message>,
    ) -> Self {
        Self {
            info,
            args,
            model,
            sender,
            push_timeout: None,
        }
    }

    /// Fail with [`FailureCause::Stalled`] instead of blocking longer than `timeout` on a full
    /// channel
    pub fn push_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.push_timeout = timeout;
        self
    }

    pub fn info(&self) -> &JobInfo {
        &self.info
    }

    /// Run to completion on the current thread
    pub fn run(self) -> JobStatus {
        let span = tracing::info_span!("worker", job = %self.info.name, id = %self.info.id);
        let _enter = span.enter();

        let outcome = self.execute();
        self.sender.close();

        let status = match outcome {
            Ok(()) => JobStatus::Succeeded,
            Err(Stop::Cancelled) => JobStatus::Cancelled,
            Err(Stop::Failed(cause)) => JobStatus::Failed(cause),
        };

        match &status {
            JobStatus::Succeeded => tracing::info!("Job succeeded"),
            JobStatus::Cancelled => tracing::warn!("Job cancelled by consumer"),
            JobStatus::Failed(cause) => tracing::error!(%cause, "Job failed"),
        }
        status
    }

    /// Run on a dedicated named thread; panics are reported as a failed status
    pub fn spawn(self) -> std::io::Result<JoinHandle<JobStatus>> {
        thread::Builder::new()
            .name(format!("worker-{}", self.info.name))
            .spawn(move || {
                let job = self.info.name.clone();
                panic::catch_unwind(AssertUnwindSafe(|| self.run())).unwrap_or_else(|payload| {
                    let reason = panic_message(payload.as_ref());
                    tracing::error!(job = %job, reason = %reason, "Worker panicked");
                    JobStatus::Failed(FailureCause::Panicked(reason))
                })
            })
    }

    fn execute(&self) -> Result<(), Stop> {
        let config = WorkerConfig::try_from(self.args.clone()).map_err(FailureCause::Config)?;

        let dim = self.model.dim();
        if dim == 0 {
            return Err(FailureCause::Numerical("model has no parameters".into()).into());
        }

        tracing::info!(
            chain = config.chain,
            seed = config.seed,
            num_warmup = config.num_warmup,
            num_samples = config.num_samples,
            expected_messages = config.expected_messages(),
            "Starting sampler"
        );

        let mut nuts = Nuts::initialize(self.model.as_ref(), &config)?;
        let mut adaptation = Adaptation::new(&config, dim);
        let total = config.total_iterations();

        if config.num_warmup > 0 {
            adaptation.stepsize.restart(config.stepsize);
            nuts.init_stepsize()?;
        }

        for m in 0..config.num_warmup {
            self.ensure_running()?;
            if config.is_progress_step(0, m) {
                self.emit(Message::Progress {
                    iteration: m + 1,
                    total,
                    phase: Phase::Warmup,
                })?;
            }

            let transition = nuts.transition();
            adaptation
                .stepsize
                .learn(nuts.nominal_stepsize_mut(), transition.accept_stat);
            if let Some(inv_metric) = adaptation.learn_metric(nuts.position()) {
                tracing::debug!(iteration = m + 1, "Updated inverse metric");
                nuts.set_inv_metric(inv_metric);
                nuts.init_stepsize()?;
                adaptation.stepsize.restart(nuts.nominal_stepsize());
            }

            if config.save_warmup && m % config.num_thin == 0 {
                self.emit(draw(m + 1, Phase::Warmup, &transition, nuts.position()))?;
            }
        }

        if config.num_warmup > 0 {
            let step_size = adaptation.stepsize.complete();
            nuts.set_nominal_stepsize(step_size);
            tracing::info!(step_size, "Adaptation terminated");
            self.emit(Message::Adaptation {
                step_size,
                inv_metric: nuts.inv_metric().to_vec(),
            })?;
        }

        let mut divergent = 0u64;
        for m in 0..config.num_samples {
            self.ensure_running()?;
            let iteration = config.num_warmup + m + 1;
            if config.is_progress_step(config.num_warmup, m) {
                self.emit(Message::Progress {
                    iteration,
                    total,
                    phase: Phase::Sampling,
                })?;
            }

            let transition = nuts.transition();
            divergent += u64::from(transition.divergent);

            if m % config.num_thin == 0 {
                self.emit(draw(iteration, Phase::Sampling, &transition, nuts.position()))?;
            }
        }

        if divergent > 0 {
            tracing::warn!(divergent, "Divergent transitions after warmup");
        }
        Ok(())
    }

    fn ensure_running(&self) -> Result<(), Stop> {
        if self.sender.is_cancelled() {
            return Err(Stop::Cancelled);
        }
        Ok(())
    }

    fn emit(&self, message: Message) -> Result<(), Stop> {
        let pushed = match self.push_timeout {
            Some(timeout) => self.sender.push_timeout(message, timeout),
            None => self.sender.push(message),
        };

        pushed.map_err(|err| match err {
            ChannelError::Cancelled => Stop::Cancelled,
            ChannelError::TimedOut(waited) => Stop::Failed(FailureCause::Stalled(waited)),
            other => Stop::Failed(FailureCause::Channel(other)),
        })
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("info", &self.info)
            .field("args", &self.args)
            .field("push_timeout", &self.push_timeout)
            .finish_non_exhaustive()
    }
}

fn draw(iteration: u64, phase: Phase, transition: &Transition, position: &[f64]) -> Message {
    Message::Draw(Box::new(Draw {
        iteration,
        phase,
        lp: transition.lp,
        accept_stat: transition.accept_stat,
        stepsize: transition.stepsize,
        treedepth: transition.treedepth,
        n_leapfrog: transition.n_leapfrog,
        divergent: transition.divergent,
        energy: transition.energy,
        values: position.to_vec(),
    }))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic payload")
    }
}
