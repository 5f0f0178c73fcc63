use crate::aggregator::Aggregator;
use crate::config::BenchConfig;
use crate::lifecycle::Lifecycle;
use crate::result::BenchResult;
use crate::worker::{spawn_worker, WorkerCommand, WorkerEvent, WorkerHandle};
use anyhow::{bail, Result};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};
use tracing::{info, warn};

const READY_TIMEOUT: Duration = Duration::from_secs(10);
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Run one benchmark to completion. Blocks the calling thread; the workers
/// run on their own OS threads and report back over an MPSC channel.
///
/// Every spawned worker is either joined cleanly or, past the hard deadline,
/// abandoned with the run surfacing an error.
pub fn run_benchmark(config: BenchConfig) -> Result<BenchResult> {
    config.validate()?;

    let plans = config.worker_plans();
    let worker_count = plans.len();
    info!(
        url = %config.url,
        connections = config.connections,
        workers = worker_count,
        duration_secs = config.duration.as_secs(),
        rate = config.rate,
        "starting benchmark"
    );

    let (event_tx, event_rx) = mpsc::channel();
    let mut handles = Vec::with_capacity(worker_count);
    for plan in &plans {
        handles.push(spawn_worker(plan.id, event_tx.clone())?);
    }
    // Workers hold their own clones; the orchestrator's sender would keep
    // the channel open forever.
    drop(event_tx);

    wait_for_ready(&event_rx, &handles, worker_count)?;

    let mut lifecycle = Lifecycle::new(config.warmup, config.duration);
    lifecycle.start();
    let wall_start = Instant::now();
    for (handle, plan) in handles.iter().zip(plans.into_iter()) {
        handle.send(WorkerCommand::Start(Box::new(plan)));
    }

    let hard_deadline = lifecycle
        .hard_deadline(config.timeout)
        .unwrap_or_else(|| wall_start + config.warmup + config.duration + 2 * config.timeout);

    let mut aggregator = Aggregator::new();
    let mut completed = 0usize;
    let mut failure: Option<String> = None;
    let mut last_progress = Instant::now();

    while completed < worker_count {
        let now = Instant::now();
        if now >= hard_deadline {
            break;
        }
        match event_rx.recv_timeout(hard_deadline - now) {
            Ok(WorkerEvent::Metrics(snapshot)) => {
                aggregator.fold(&snapshot)?;
                if last_progress.elapsed() >= PROGRESS_INTERVAL {
                    log_progress(&aggregator, &lifecycle);
                    last_progress = Instant::now();
                }
            }
            Ok(WorkerEvent::Done(snapshot)) => {
                aggregator.fold(&snapshot)?;
                completed += 1;
            }
            Ok(WorkerEvent::Error { id, message }) => {
                completed += 1;
                if failure.is_none() {
                    warn!(worker = id, %message, "worker failed, stopping the run");
                    failure = Some(format!("worker {id} failed: {message}"));
                    broadcast_stop(&handles);
                }
            }
            Ok(WorkerEvent::Ready { .. }) => {}
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    lifecycle.complete();
    let wall = wall_start.elapsed();

    if completed < worker_count {
        // Unresponsive past the hard deadline: tell them to stop, but do not
        // block on threads that may never finish.
        broadcast_stop(&handles);
        for handle in handles {
            handle.detach();
        }
        let msg = failure.unwrap_or_else(|| {
            format!(
                "{} of {worker_count} workers missed the hard deadline",
                worker_count - completed
            )
        });
        bail!("benchmark aborted: {msg}");
    }

    for handle in handles {
        handle.join();
    }
    if let Some(message) = failure {
        bail!("benchmark aborted: {message}");
    }

    let result = BenchResult::assemble(&config, &aggregator, wall);
    info!(
        total = result.requests.total,
        failed = result.requests.failed,
        rps = result.throughput.rps,
        p99_ms = result.latency.p99,
        "benchmark complete"
    );
    Ok(result)
}

fn wait_for_ready(
    events: &mpsc::Receiver<WorkerEvent>,
    handles: &[WorkerHandle],
    worker_count: usize,
) -> Result<()> {
    let deadline = Instant::now() + READY_TIMEOUT;
    let mut ready = 0usize;
    while ready < worker_count {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        match events.recv_timeout(deadline - now) {
            Ok(WorkerEvent::Ready { .. }) => ready += 1,
            Ok(WorkerEvent::Error { id, message }) => {
                broadcast_stop(handles);
                bail!("worker {id} failed before start: {message}");
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
    if ready < worker_count {
        broadcast_stop(handles);
        bail!("only {ready} of {worker_count} workers became ready");
    }
    Ok(())
}

fn broadcast_stop(handles: &[WorkerHandle]) {
    for handle in handles {
        handle.send(WorkerCommand::Stop);
    }
}

fn log_progress(aggregator: &Aggregator, lifecycle: &Lifecycle) {
    let hist = aggregator.histogram();
    info!(
        progress = format!("{:.0}%", lifecycle.progress() * 100.0),
        requests = aggregator.requests,
        failed = aggregator.failures,
        p50_ms = hist.percentile_us(50.0) / 1_000.0,
        p99_ms = hist.percentile_us(99.0) / 1_000.0,
        "progress"
    );
}
