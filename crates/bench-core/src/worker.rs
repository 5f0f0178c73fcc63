use crate::client::HttpClient;
use crate::config::WorkerPlan;
use crate::histogram::LatencyHistogram;
use crate::rate_limiter::SharedRateLimiter;
use crate::request_loop::{
    ramp_rate_at, run_connection, run_rate_ramp, stagger_delay, LoopCtx, Recorder,
};
use anyhow::{anyhow, Context, Result};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};
use tokio::task::LocalSet;
use tokio::time::sleep;

const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(1);
const COMMAND_POLL: Duration = Duration::from_millis(250);

/// Orchestrator -> worker.
#[derive(Debug)]
pub enum WorkerCommand {
    Start(Box<WorkerPlan>),
    Stop,
}

/// Worker -> orchestrator.
#[derive(Debug)]
pub enum WorkerEvent {
    Ready { id: usize },
    Metrics(MetricsSnapshot),
    Done(MetricsSnapshot),
    Error { id: usize, message: String },
}

/// Latency data carried by a snapshot: a mergeable histogram delta (the
/// default producer) or raw microsecond samples. The aggregator folds both.
#[derive(Debug, Clone)]
pub enum LatencyPayload {
    Delta(LatencyHistogram),
    Raw(Vec<u64>),
}

/// Atomic copy of a worker's metrics since its previous snapshot.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub worker_id: usize,
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub bytes: u64,
    pub timeouts: u64,
    pub connection_errors: u64,
    pub by_status: BTreeMap<u16, u64>,
    pub latency: LatencyPayload,
}

/// Owned handle to a spawned worker thread.
pub struct WorkerHandle {
    pub id: usize,
    commands: Sender<WorkerCommand>,
    thread: thread::JoinHandle<()>,
}

impl WorkerHandle {
    pub fn send(&self, command: WorkerCommand) {
        let _ = self.commands.send(command);
    }

    pub fn join(self) {
        let _ = self.thread.join();
    }

    /// Abandon the thread without waiting. Used only past the hard deadline.
    pub fn detach(self) {}
}

/// Spawn a worker OS thread. It immediately reports `Ready` and waits for
/// `Start`; all communication happens over the two channels.
pub fn spawn_worker(id: usize, events: Sender<WorkerEvent>) -> Result<WorkerHandle> {
    let (cmd_tx, cmd_rx) = std::sync::mpsc::channel();
    let thread = thread::Builder::new()
        .name(format!("bench-worker-{id}"))
        .spawn(move || worker_main(id, cmd_rx, events))
        .with_context(|| format!("failed to spawn worker thread {id}"))?;
    Ok(WorkerHandle {
        id,
        commands: cmd_tx,
        thread,
    })
}

fn worker_main(id: usize, commands: Receiver<WorkerCommand>, events: Sender<WorkerEvent>) {
    let _ = events.send(WorkerEvent::Ready { id });

    let plan = match commands.recv() {
        Ok(WorkerCommand::Start(plan)) => *plan,
        // Stop before Start, or the orchestrator is gone: nothing to do.
        Ok(WorkerCommand::Stop) | Err(_) => return,
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            let _ = events.send(WorkerEvent::Error {
                id,
                message: format!("failed to build worker runtime: {err}"),
            });
            return;
        }
    };

    match runtime.block_on(run_worker(plan, &commands, &events)) {
        Ok(final_snapshot) => {
            let _ = events.send(WorkerEvent::Done(final_snapshot));
        }
        Err(err) => {
            let _ = events.send(WorkerEvent::Error {
                id,
                message: format!("{err:#}"),
            });
        }
    }
}

/// Drive the worker: build the client pool, run the connection tasks on a
/// single-threaded cooperative runtime, emit periodic snapshot deltas, and
/// hand back the final snapshot once every task has quiesced.
async fn run_worker(
    plan: WorkerPlan,
    commands: &Receiver<WorkerCommand>,
    events: &Sender<WorkerEvent>,
) -> Result<MetricsSnapshot> {
    let client = Rc::new(HttpClient::build(&plan)?);
    let ramp = plan.bench.ramp_up;
    let deadline = Instant::now() + plan.bench.warmup + plan.bench.duration;

    let limiter = plan.rate.map(|rate| {
        let initial = if ramp.is_zero() {
            rate as u64
        } else {
            ramp_rate_at(rate as u64, Duration::ZERO, ramp)
        };
        SharedRateLimiter::new(initial)
    });

    let ctx = Rc::new(LoopCtx {
        recorder: RefCell::new(Recorder::new()),
        limiter: limiter.clone(),
        stop: Cell::new(false),
        deadline,
    });

    let local = LocalSet::new();
    local
        .run_until(async {
            let mut tasks = Vec::with_capacity(plan.connections as usize);
            for k in 0..plan.connections {
                let delay = stagger_delay(ramp, k, plan.connections);
                tasks.push(tokio::task::spawn_local(run_connection(
                    ctx.clone(),
                    client.clone(),
                    delay,
                )));
            }
            if let (Some(limiter), Some(rate)) = (limiter.clone(), plan.rate) {
                if !ramp.is_zero() {
                    tokio::task::spawn_local(run_rate_ramp(limiter, rate as u64, ramp));
                }
            }

            let mut last_emit = Instant::now();
            loop {
                sleep(COMMAND_POLL).await;

                match commands.try_recv() {
                    Ok(WorkerCommand::Stop) => ctx.stop.set(true),
                    Ok(WorkerCommand::Start(_)) => {}
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Disconnected) => ctx.stop.set(true),
                }

                if last_emit.elapsed() >= SNAPSHOT_INTERVAL {
                    let snapshot = ctx.recorder.borrow_mut().take_snapshot(plan.id);
                    let _ = events.send(WorkerEvent::Metrics(snapshot));
                    last_emit = Instant::now();
                }

                if tasks.iter().all(|task| task.is_finished()) {
                    break;
                }
            }

            for task in tasks {
                task.await
                    .map_err(|err| anyhow!("connection task panicked: {err}"))?;
            }
            Ok::<(), anyhow::Error>(())
        })
        .await?;

    let snapshot = ctx.recorder.borrow_mut().take_snapshot(plan.id);
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BenchConfig;
    use std::sync::mpsc;

    fn tiny_plan(url: &str) -> WorkerPlan {
        let mut bench = BenchConfig::new(url);
        bench.duration = Duration::from_millis(300);
        bench.timeout = Duration::from_millis(200);
        WorkerPlan {
            id: 0,
            connections: 2,
            rate: None,
            bench,
        }
    }

    #[test]
    fn worker_reports_ready_then_exits_on_stop() {
        let (event_tx, event_rx) = mpsc::channel();
        let handle = spawn_worker(0, event_tx).unwrap();

        match event_rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            WorkerEvent::Ready { id } => assert_eq!(id, 0),
            other => panic!("expected Ready, got {other:?}"),
        }

        handle.send(WorkerCommand::Stop);
        handle.join();
    }

    #[test]
    fn worker_finishes_with_done_snapshot_against_dead_target() {
        let (event_tx, event_rx) = mpsc::channel();
        let handle = spawn_worker(0, event_tx).unwrap();

        match event_rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            WorkerEvent::Ready { .. } => {}
            other => panic!("expected Ready, got {other:?}"),
        }

        // Nothing listens on port 1: every request fails fast, but the
        // worker itself must complete cleanly.
        handle.send(WorkerCommand::Start(Box::new(tiny_plan("http://127.0.0.1:1/"))));

        let mut total = MetricsSnapshot {
            worker_id: 0,
            requests: 0,
            successes: 0,
            failures: 0,
            bytes: 0,
            timeouts: 0,
            connection_errors: 0,
            by_status: BTreeMap::new(),
            latency: LatencyPayload::Raw(Vec::new()),
        };
        loop {
            match event_rx.recv_timeout(Duration::from_secs(10)).unwrap() {
                WorkerEvent::Metrics(s) => {
                    total.requests += s.requests;
                    total.failures += s.failures;
                }
                WorkerEvent::Done(s) => {
                    total.requests += s.requests;
                    total.failures += s.failures;
                    break;
                }
                WorkerEvent::Error { message, .. } => panic!("worker failed: {message}"),
                WorkerEvent::Ready { .. } => {}
            }
        }

        assert!(total.requests > 0);
        assert_eq!(total.requests, total.failures);
        handle.join();
    }

    #[test]
    fn stop_command_ends_the_run_early() {
        let (event_tx, event_rx) = mpsc::channel();
        let handle = spawn_worker(0, event_tx).unwrap();

        let _ready = event_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let mut plan = tiny_plan("http://127.0.0.1:1/");
        plan.bench.duration = Duration::from_secs(30);
        handle.send(WorkerCommand::Start(Box::new(plan)));
        handle.send(WorkerCommand::Stop);

        let started = Instant::now();
        loop {
            match event_rx.recv_timeout(Duration::from_secs(10)).unwrap() {
                WorkerEvent::Done(_) => break,
                WorkerEvent::Error { message, .. } => panic!("worker failed: {message}"),
                _ => {}
            }
        }
        // Far sooner than the 30s configured duration.
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join();
    }
}
