use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use samplebox::config::Settings;
use samplebox::defaults::{DefaultRegistry, DefaultSource};
use samplebox::harness::{BatchReport, Harness, JobRequest, TracingSink};
use samplebox::worker::SamplerArgs;
use tracing::info;

use crate::cli::{DefaultsArgs, RunArgs};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub async fn run(settings: Settings, args: RunArgs) -> Result<ExitCode, AnyError> {
    let requests = job_requests(&settings, &args)?;
    let harness = Harness::new(settings.default_registry()?, settings.harness_options());

    let batch = harness.launch(requests);
    let canceller = batch.canceller();
    info!(batch = %batch.id(), jobs = batch.len(), "Draining jobs");

    let drain_harness = harness.clone();
    let mut draining = tokio::task::spawn_blocking(move || drain_harness.drain(batch, &TracingSink));

    let report = tokio::select! {
        report = &mut draining => report?,
        _ = shutdown_signal() => {
            canceller.cancel_all();
            draining.await?
        }
    };

    print_report(&report, args.json)?;
    info!(metrics = ?harness.metrics().snapshot(), "Run complete");
    Ok(ExitCode::from(report.exit_code()))
}

/// Jobs to run: `--chains` replaces the configured jobs, and with neither a single chain runs
fn job_requests(settings: &Settings, args: &RunArgs) -> Result<Vec<JobRequest>, AnyError> {
    let capacity = args
        .capacity
        .unwrap_or(settings.harness.default_capacity)
        .get();

    let mut requests = match args.chains {
        Some(chains) => (1..=chains)
            .map(|chain| {
                JobRequest::new(format!("chain-{chain}"), capacity)
                    .args(SamplerArgs::new().chain(i64::from(chain)))
            })
            .collect(),
        None if settings.jobs.is_empty() => vec![JobRequest::new("chain-1", capacity)],
        None => settings.job_requests()?,
    };

    for request in &mut requests {
        if args.capacity.is_some() {
            request.capacity = capacity;
        }
        if let Some(seed) = args.seed {
            request.args.random_seed.get_or_insert(i64::from(seed));
        }
    }

    Ok(requests)
}

fn print_report(report: &BatchReport, json: bool) -> Result<(), AnyError> {
    let mut stdout = std::io::stdout().lock();

    if json {
        serde_json::to_writer_pretty(&mut stdout, report)?;
        writeln!(stdout)?;
        return Ok(());
    }

    for job in &report.jobs {
        let messages = job
            .messages
            .map(|count| format!(" ({count} messages)"))
            .unwrap_or_default();
        writeln!(stdout, "{}: {}{}", job.name, job.status, messages)?;
    }
    if report.is_success() {
        writeln!(stdout, "success")?;
    } else {
        writeln!(stdout, "failure: {}", report.summary())?;
    }
    Ok(())
}

/// Print `name = value` for the requested arguments; unknown names go to stderr
pub fn defaults(settings: &Settings, args: DefaultsArgs) -> Result<ExitCode, AnyError> {
    let registry: Arc<DefaultRegistry> = settings.default_registry()?;

    let names: Vec<String> = if args.names.is_empty() {
        registry.names(args.method).map(str::to_string).collect()
    } else {
        args.names
    };

    let mut stdout = std::io::stdout().lock();
    let mut missing = 0;
    for name in &names {
        match registry.lookup(args.method, name) {
            Ok(value) => writeln!(stdout, "{name} = {value}")?,
            Err(err) => {
                eprintln!("{err}");
                missing += 1;
            }
        }
    }

    Ok(if missing == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, cancelling jobs");
}
