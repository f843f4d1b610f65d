use std::sync::Arc;
use std::thread;
use std::time::Duration;

use samplebox::defaults::{DefaultRegistry, DefaultSource, LookupError, Method, ParamValue};
use samplebox::harness::{
    CollectingSink, CountingSink, Harness, HarnessOptions, JobRequest, MessageSink,
};
use samplebox::worker::{
    ConfigError, FailureCause, JobInfo, JobStatus, LogDensity, Message, ModelError, SamplerArgs,
    StdNormal, WorkerConfig,
};

/// Short runs keep the suite fast while still crossing warmup and sampling
fn short_args(chain: i64) -> SamplerArgs {
    SamplerArgs::new()
        .random_seed(20240601)
        .chain(chain)
        .num_warmup(40)
        .num_samples(40)
        .refresh(10)
}

fn expected_messages(args: SamplerArgs) -> u64 {
    let resolved = args
        .merge_defaults(Method::Sample, DefaultRegistry::builtin().as_ref())
        .unwrap();
    WorkerConfig::try_from(resolved).unwrap().expected_messages()
}

/// Density whose gradient evaluation always fails
struct Unevaluable;

impl LogDensity for Unevaluable {
    fn dim(&self) -> usize {
        3
    }

    fn log_density_gradient(&self, _: &[f64], _: &mut [f64]) -> Result<f64, ModelError> {
        Err(ModelError("log density is undefined everywhere".into()))
    }
}

#[test]
fn test_one_invalid_job_does_not_affect_others() {
    let harness = Harness::with_builtin_defaults();
    let sink = CountingSink::new();

    let requests = (1..=4).map(|chain| {
        let args = if chain == 3 {
            short_args(chain).stepsize(-1.0)
        } else {
            short_args(chain)
        };
        JobRequest::new(format!("chain-{chain}"), 1024).args(args)
    });

    let report = harness.run(requests, &sink);

    assert!(!report.is_success());
    assert_eq!(report.exit_code(), 1);

    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].name, "chain-3");
    match &failures[0].status {
        JobStatus::Failed(FailureCause::Config(err)) => assert_eq!(err.field(), Some("stepsize")),
        other => panic!("unexpected status {other:?}"),
    }
    assert_eq!(failures[0].messages, Some(0));

    let expected = expected_messages(short_args(1));
    for name in ["chain-1", "chain-2", "chain-4"] {
        let job = report.job(name).unwrap();
        assert_eq!(job.status, JobStatus::Succeeded, "{name}");
        assert_eq!(job.messages, Some(expected), "{name}");
        assert_eq!(sink.counts(&job.id).total(), expected, "{name}");
    }

    let metrics = harness.metrics().snapshot();
    assert_eq!(metrics.jobs_started, 4);
    assert_eq!(metrics.jobs_succeeded, 3);
    assert_eq!(metrics.jobs_failed, 1);
    assert_eq!(metrics.messages_drained, 3 * expected);
}

#[test]
fn test_default_lookup_is_deterministic() {
    let registry = DefaultRegistry::builtin();

    for name in ["num_warmup", "delta", "save_warmup", "random_seed"] {
        let first = registry.lookup(Method::Sample, name).unwrap();
        for _ in 0..10 {
            assert_eq!(registry.lookup(Method::Sample, name).unwrap(), first);
        }
    }
    assert_eq!(
        registry.lookup(Method::Sample, "delta").unwrap(),
        ParamValue::Float(0.8)
    );

    let missing = registry.lookup(Method::Sample, "not_an_argument");
    assert!(matches!(missing, Err(LookupError::NotFound { .. })));
}

#[test]
fn test_defaults_shared_across_threads() {
    let registry = DefaultRegistry::builtin();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.lookup(Method::Sample, "max_depth").unwrap())
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), ParamValue::Int(10));
    }
}

#[test]
fn test_override_source_changes_resolution() {
    let overrides = DefaultRegistry::from_toml_str("[sample]\nnum_samples = 7\nrefresh = 0\n").unwrap();
    let registry = DefaultRegistry::builtin().with_overrides(&overrides);
    let harness = Harness::new(Arc::new(registry), HarnessOptions::default());

    let sink = CollectingSink::new();
    let args = SamplerArgs::new().random_seed(9).num_warmup(0);
    let report = harness.run([JobRequest::new("overridden", 64).args(args)], &sink);

    assert!(report.is_success());
    let messages = sink.take(&report.jobs[0].id);
    assert_eq!(messages.len(), 7);
    assert!(messages.iter().all(|m| matches!(m, Message::Draw(_))));
}

#[test]
fn test_out_of_range_settings_fail_as_config_errors() {
    let harness = Harness::with_builtin_defaults();
    let huge_radius = SamplerArgs {
        init_radius: Some(1e308),
        ..short_args(1)
    };
    let overflowing_windows = SamplerArgs {
        init_buffer: Some(i64::MAX),
        window: Some(i64::MAX),
        term_buffer: Some(5),
        ..short_args(2).num_warmup(30)
    };

    let report = harness.run(
        [
            JobRequest::new("huge-radius", 64).args(huge_radius),
            JobRequest::new("overflowing-windows", 64).args(overflowing_windows),
        ],
        &CountingSink::new(),
    );

    for (name, field) in [("huge-radius", "init_radius"), ("overflowing-windows", "window")] {
        let job = report.job(name).unwrap();
        match &job.status {
            JobStatus::Failed(FailureCause::Config(err)) => {
                assert_eq!(err.field(), Some(field), "{name}")
            }
            other => panic!("unexpected status for {name}: {other:?}"),
        }
        assert_eq!(job.messages, Some(0), "{name}");
    }
    assert_eq!(harness.metrics().snapshot().jobs_failed, 2);
}

#[test]
fn test_missing_default_reported_by_worker() {
    let overrides = DefaultRegistry::from_toml_str("[sample]\nnum_thin = 1\n").unwrap();
    let harness = Harness::new(Arc::new(overrides), HarnessOptions::default());

    let report = harness.run([JobRequest::new("bare", 8)], &CountingSink::new());
    match &report.jobs[0].status {
        JobStatus::Failed(FailureCause::Config(ConfigError::MissingField { field })) => {
            assert_eq!(*field, "chain");
        }
        other => panic!("unexpected status {other:?}"),
    }
}

#[test]
fn test_numerical_failure_is_reported_not_raised() {
    let harness = Harness::with_builtin_defaults();
    let report = harness.run(
        [
            JobRequest::new("broken", 16)
                .args(short_args(1))
                .model(Arc::new(Unevaluable)),
            JobRequest::new("healthy", 1024).args(short_args(2)),
        ],
        &CountingSink::new(),
    );

    match &report.job("broken").unwrap().status {
        JobStatus::Failed(FailureCause::Numerical(reason)) => {
            assert!(reason.contains("Initialization failed"), "{reason}");
        }
        other => panic!("unexpected status {other:?}"),
    }
    assert!(report.job("healthy").unwrap().status.is_success());
}

#[test]
fn test_unread_job_blocks_only_itself() {
    let harness = Harness::with_builtin_defaults();
    let mut batch = harness.launch([
        JobRequest::new("stuck", 1).args(short_args(1)),
        JobRequest::new("free", 1024).args(short_args(2)),
    ]);

    // Nobody reads "stuck"; it fills its single slot and waits
    let stuck = batch.take_receiver(0).unwrap();
    let free = batch.take_receiver(1).unwrap();

    let free_count = thread::spawn(move || free.iter().count()).join().unwrap();
    assert_eq!(free_count as u64, expected_messages(short_args(2)));

    thread::sleep(Duration::from_millis(50));
    assert_eq!(stuck.len(), 1);
    assert!(!stuck.is_closed());

    drop(stuck);
    let report = batch.join();
    assert_eq!(report.job("stuck").unwrap().status, JobStatus::Cancelled);
    assert!(report.job("free").unwrap().status.is_success());
}

#[test]
fn test_batch_canceller_stops_every_job() {
    let harness = Harness::with_builtin_defaults();
    let mut batch = harness.launch(
        (1..=3).map(|chain| JobRequest::new(format!("chain-{chain}"), 1).args(short_args(chain))),
    );
    let receivers: Vec<_> = (0..3).filter_map(|i| batch.take_receiver(i)).collect();
    assert_eq!(receivers.len(), 3);

    batch.canceller().cancel_all();
    let report = batch.join();

    assert!(report.jobs.iter().all(|job| job.status.is_cancelled()));
    assert_eq!(harness.metrics().snapshot().jobs_cancelled, 3);
    drop(receivers);
}

#[test]
fn test_pop_timeout_cancels_stalled_job() {
    /// Density that takes far longer than the consumer is willing to wait
    struct Sluggish;

    impl LogDensity for Sluggish {
        fn dim(&self) -> usize {
            1
        }

        fn log_density_gradient(&self, theta: &[f64], grad: &mut [f64]) -> Result<f64, ModelError> {
            thread::sleep(Duration::from_millis(20));
            StdNormal::new(1).log_density_gradient(theta, grad)
        }
    }

    let harness = Harness::new(
        DefaultRegistry::builtin(),
        HarnessOptions {
            push_timeout: None,
            pop_timeout: Some(Duration::from_millis(5)),
        },
    );
    let report = harness.run(
        [JobRequest::new("slow", 64)
            .args(short_args(1))
            .model(Arc::new(Sluggish))],
        &CountingSink::new(),
    );

    assert_eq!(report.jobs[0].status, JobStatus::Cancelled);
}

#[test]
fn test_sink_sees_messages_in_order() {
    struct AcceptAll;

    impl MessageSink for AcceptAll {
        fn deliver(&self, _: &JobInfo, _: Message) -> bool {
            true
        }
    }

    let harness = Harness::with_builtin_defaults();
    let sink = CollectingSink::new();
    let report = harness.run([JobRequest::new("ordered", 4).args(short_args(1))], &sink);
    assert!(report.is_success());

    let iterations: Vec<u64> = sink
        .take(&report.jobs[0].id)
        .iter()
        .filter_map(|message| match message {
            Message::Progress { iteration, .. } => Some(*iteration),
            Message::Draw(draw) => Some(draw.iteration),
            Message::Adaptation { .. } => None,
        })
        .collect();
    assert!(iterations.windows(2).all(|pair| pair[0] <= pair[1]));

    // A sink that accepts everything never cancels
    let report = harness.run([JobRequest::new("accepting", 4).args(short_args(2))], &AcceptAll);
    assert!(report.is_success());
}
